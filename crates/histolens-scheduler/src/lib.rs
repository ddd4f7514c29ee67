//! Budget-aware chunk-size planner (C5) and adaptive replanner (C6) for
//! the history-analytics streaming core.

#![forbid(unsafe_code)]

pub mod planner;
pub mod replanner;

pub use planner::{
    plan, BudgetRegions, ChunkBounds, ChunkPlan, PlanRequest, DEFAULT_GROWTH_BYTES,
    DEFAULT_PIPELINE_OVERHEAD_BYTES, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, SAFETY_MARGIN, SLACK_FRACTION,
};
pub use replanner::{AdaptiveReplanner, ReplanObservation, DIVERGENCE_THRESHOLD, EMA_ALPHA};
