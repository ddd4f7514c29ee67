//! Shared types for the history-analytics streaming core.
//!
//! This crate provides:
//! - The data model (`Commit`, `Tc`, `TickRecord`, `ConfigValue`,
//!   `CommitHash`, `AnalyzerId`, `Timestamp`) and the `CommitSource`/
//!   `PlumbingProvider` collaborator seams
//! - The error taxonomy (`Error`, `Result`)
//! - Lock-ordering discipline (`OrderedMutex`, `OrderedRwLock`, `LockLevel`)
//! - Process-memory sampling and pressure classification for the chunk driver
//! - Lock-free metrics primitives and the chunk driver's stats block

#![forbid(unsafe_code)]

pub mod error;
pub mod lock_order;
pub mod memory;
pub mod metrics;
pub mod model;

pub use error::{Error, Result};
pub use lock_order::{
    LockContentionEntry, LockLevel, OrderedMutex, OrderedRwLock, lock_contention_reset,
    lock_contention_snapshot,
};
pub use memory::{
    MemoryPressure, MemorySample, MemoryThresholds, classify_pressure, read_rss_bytes,
    sample_memory,
};
pub use metrics::{
    Counter, DriverStats, DriverStatsSnapshot, GaugeI64, GaugeU64, HistogramSnapshot,
    Log2Histogram,
};
pub use model::{
    AnalyzerId, CancellationToken, Commit, CommitHash, CommitSource, ConfigValue,
    PlumbingProvider, Tc, Tick, TickRecord, Timestamp,
};
