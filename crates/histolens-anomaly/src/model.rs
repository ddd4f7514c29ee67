//! Per-commit payload, the plumbing this analyzer expects to be resolved
//! for it, and the per-tick accumulator/TICK-data types the aggregator
//! folds commits into.

use std::collections::{BTreeMap, BTreeSet};

use histolens_core::{CommitHash, Timestamp};
use serde::{Deserialize, Serialize};

/// Tree-diff/line-stat/language facts a [`histolens_core::PlumbingProvider`]
/// resolves for one commit. The commit's author and timestamp come from
/// [`histolens_core::Commit`] itself, not from here.
#[derive(Clone, Debug, Default)]
pub struct CommitPlumbing {
    pub files_changed: u32,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub changed_paths: Vec<String>,
    pub languages: BTreeMap<String, u32>,
}

/// One commit's worth of churn metrics, as both the `Consume` payload and
/// the unit the final report's `commit_metrics` map preserves verbatim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitAnomalyData {
    pub files_changed: u32,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub net_churn: i64,
    pub changed_paths: Vec<String>,
    pub languages: BTreeMap<String, u32>,
    pub author: String,
}

impl CommitAnomalyData {
    #[must_use]
    pub fn from_plumbing(plumbing: &CommitPlumbing, author: &str) -> Self {
        Self {
            files_changed: plumbing.files_changed,
            lines_added: plumbing.lines_added,
            lines_removed: plumbing.lines_removed,
            net_churn: i64::from(plumbing.lines_added) - i64::from(plumbing.lines_removed),
            changed_paths: plumbing.changed_paths.clone(),
            languages: plumbing.languages.clone(),
            author: author.to_string(),
        }
    }

    /// Conservative resident-byte estimate for one commit's record, used
    /// by the tick accumulator's `sizeState` callback.
    #[must_use]
    pub fn estimated_bytes(&self) -> u64 {
        let paths_bytes: usize = self.changed_paths.iter().map(String::len).sum();
        let lang_bytes: usize = self.languages.keys().map(String::len).sum();
        (64 + paths_bytes + lang_bytes + self.author.len()) as u64
    }
}

/// Per-tick accumulator (`S` in the aggregator). Holds every commit's raw
/// record for the tick rather than pre-summed totals, since the final
/// report needs per-commit detail (`commit_metrics`) alongside the
/// tick-level sums the detector scores.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TickAccumulator {
    pub commits: Vec<(CommitHash, CommitAnomalyData)>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl TickAccumulator {
    pub fn absorb(&mut self, hash: CommitHash, timestamp: Timestamp, data: CommitAnomalyData) {
        self.start = Some(self.start.map_or(timestamp, |s| s.min(timestamp)));
        self.end = Some(self.end.map_or(timestamp, |e| e.max(timestamp)));
        self.commits.push((hash, data));
    }

    #[must_use]
    pub fn merge(mut self, mut other: Self) -> Self {
        self.commits.append(&mut other.commits);
        self.start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.commits.iter().map(|(_, d)| d.estimated_bytes()).sum()
    }
}

/// What `buildTick` reduces a [`TickAccumulator`] to: the tick's sums
/// across the six detection dimensions plus the raw per-commit records
/// the report reassembles `commit_metrics`/`commits_by_tick` from.
#[derive(Clone, Debug)]
pub struct TickMetrics {
    pub files_changed: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub net_churn: i64,
    pub language_diversity: usize,
    pub author_count: usize,
    pub changed_paths: Vec<String>,
    pub commits: Vec<(CommitHash, CommitAnomalyData)>,
}

impl From<TickAccumulator> for TickMetrics {
    fn from(acc: TickAccumulator) -> Self {
        let mut files_changed = 0u64;
        let mut lines_added = 0u64;
        let mut lines_removed = 0u64;
        let mut net_churn = 0i64;
        let mut languages = BTreeSet::new();
        let mut authors = BTreeSet::new();
        let mut changed_paths = Vec::new();

        for (_, data) in &acc.commits {
            files_changed += u64::from(data.files_changed);
            lines_added += u64::from(data.lines_added);
            lines_removed += u64::from(data.lines_removed);
            net_churn += data.net_churn;
            languages.extend(data.languages.keys().cloned());
            authors.insert(data.author.clone());
            changed_paths.extend(data.changed_paths.iter().cloned());
        }

        Self {
            files_changed,
            lines_added,
            lines_removed,
            net_churn,
            language_diversity: languages.len(),
            author_count: authors.len(),
            changed_paths,
            commits: acc.commits,
        }
    }
}
