//! Shared data model: commits, ticks, TC/TICK records, configuration
//! facts, and the external-collaborator seams this crate leaves open
//! (`CommitSource`, `PlumbingProvider`).
//!
//! Everything here is inert data plus the two trait seams; the analyzer
//! contract itself (`Fork`/`Consume`/`Merge`/...) lives in
//! `histolens-analyzer`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A tick is an integer bucket index for a fixed-width time window since
/// the repository's first commit.
pub type Tick = i64;

/// 20-byte content hash identifying a commit.
///
/// The "zero hash" is the sentinel for an absent/skipped commit
/// throughout §3/§4 — callers check [`CommitHash::is_zero`] rather than
/// wrapping this in an `Option`, matching the source's convention.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitHash(pub [u8; 20]);

impl CommitHash {
    pub const ZERO: Self = Self([0u8; 20]);

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        let mut i = 0;
        while i < self.0.len() {
            if self.0[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(40);
        for byte in self.0 {
            s.push_str(&format!("{byte:02x}"));
        }
        s
    }

    /// Parse a 40-character lowercase/uppercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, crate::error::Error> {
        if s.len() != 40 {
            return Err(crate::error::Error::Internal(format!(
                "commit hash must be 40 hex chars, got {}",
                s.len()
            )));
        }
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            let hi = s.as_bytes()[i * 2];
            let lo = s.as_bytes()[i * 2 + 1];
            let hex_digit = |b: u8| -> Option<u8> {
                match b {
                    b'0'..=b'9' => Some(b - b'0'),
                    b'a'..=b'f' => Some(b - b'a' + 10),
                    b'A'..=b'F' => Some(b - b'A' + 10),
                    _ => None,
                }
            };
            let hi = hex_digit(hi)
                .ok_or_else(|| crate::error::Error::Internal(format!("invalid hex in {s}")))?;
            let lo = hex_digit(lo)
                .ok_or_else(|| crate::error::Error::Internal(format!("invalid hex in {s}")))?;
            *byte = (hi << 4) | lo;
        }
        Ok(Self(out))
    }
}

impl From<[u8; 20]> for CommitHash {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitHash({})", self.to_hex())
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Analyzer identifier; doubles as the store key and report namespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnalyzerId(pub String);

impl AnalyzerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalyzerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnalyzerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AnalyzerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A UTC, tz-naive timestamp. Thin wrapper over `chrono::NaiveDateTime`,
/// consistent with how every persisted timestamp in this lineage is
/// represented.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub chrono::NaiveDateTime);

impl Timestamp {
    #[must_use]
    pub fn from_unix_micros(micros: i64) -> Self {
        let secs = micros.div_euclid(1_000_000);
        let subsec_micros = micros.rem_euclid(1_000_000);
        let dt = chrono::DateTime::from_timestamp(secs, (subsec_micros * 1000) as u32)
            .unwrap_or_default();
        Self(dt.naive_utc())
    }

    #[must_use]
    pub fn to_unix_micros(self) -> i64 {
        self.0.and_utc().timestamp_micros()
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0.format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

/// A commit as seen by the streaming core. Opaque beyond the fields
/// needed for scheduling and tick derivation; tree contents, diffs, and
/// identity resolution are the job of [`CommitSource`]/[`PlumbingProvider`].
#[derive(Clone, Debug)]
pub struct Commit {
    pub hash: CommitHash,
    pub author: String,
    pub timestamp: Timestamp,
    pub parent_count: u32,
}

impl Commit {
    #[must_use]
    pub const fn is_merge(&self) -> bool {
        self.parent_count > 1
    }
}

/// The output of one `Consume` call — the only inter-stage data carrier
/// between an analyzer worker and the tick aggregator.
#[derive(Clone, Debug)]
pub struct Tc<P> {
    pub commit_hash: CommitHash,
    pub tick: Tick,
    pub timestamp: Timestamp,
    pub payload: Option<P>,
}

impl<P> Tc<P> {
    /// Construct an empty TC (zero hash, nil payload) — the "skip this
    /// commit" signal. Never an error at the type level.
    #[must_use]
    pub fn empty(tick: Tick, timestamp: Timestamp) -> Self {
        Self {
            commit_hash: CommitHash::ZERO,
            tick,
            timestamp,
            payload: None,
        }
    }

    /// A TC is empty iff its commit hash is zero or its payload is nil,
    /// either of which the aggregator discards silently (§3 invariants).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commit_hash.is_zero() || self.payload.is_none()
    }
}

/// An aggregated per-tick record, materialized by an analyzer's
/// `buildTick` callback. One per (analyzer, tick) pair at the boundary
/// between streaming and reporting.
#[derive(Clone, Debug)]
pub struct TickRecord<D> {
    pub tick: Tick,
    pub start: Timestamp,
    pub end: Timestamp,
    pub data: D,
}

/// A configuration fact value, as passed into an analyzer's `Configure`.
///
/// Deliberately a small closed enum rather than `serde_json::Value`: it
/// covers every fact named in the external-interfaces surface
/// (`TemporalAnomaly.Threshold`, `WindowSize`, `FactCommitsByTick`,
/// `FactTickSize`) without pulling a generic JSON value into this layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ConfigValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    TickMap(BTreeMap<i64, Vec<CommitHash>>),
    Duration(Duration),
}

impl ConfigValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tick_map(&self) -> Option<&BTreeMap<i64, Vec<CommitHash>>> {
        match self {
            Self::TickMap(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(v) => Some(*v),
            _ => None,
        }
    }
}

/// Cooperative cancellation handle threaded through `Consume` and the
/// chunk driver. Checked between substantial work units, never used to
/// interrupt in-flight work.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stands in for Git object access (out of scope per §1): a source of
/// commits in topological order. Callers supply their own implementation
/// against a real repository.
pub trait CommitSource: Send + Sync {
    fn commits(&self) -> crate::error::Result<Vec<Commit>>;
}

/// Stands in for tree-diff/line-stat/identity/language resolution (out of
/// scope per §1). An analyzer's `Consume` receives whatever this resolves
/// for a given commit as an immutable argument, never retained state.
pub trait PlumbingProvider: Send + Sync {
    type Plumbing;

    fn resolve(&self, commit: &Commit) -> crate::error::Result<Self::Plumbing>;
}
