//! Per-file metrics, the per-commit "slice bundle" payload, and the
//! per-tick accumulator/TICK-data types the aggregator folds commits
//! into by concatenation.

use histolens_core::{CommitHash, Timestamp};
use serde::{Deserialize, Serialize};

/// One file's worth of static-analysis output, as a
/// [`histolens_core::PlumbingProvider`] resolves it for a commit.
#[derive(Clone, Debug, Default)]
pub struct FileMetricsInput {
    pub path: String,
    pub cyclomatic_complexity: f64,
    pub cognitive_complexity: f64,
    pub max_function_complexity: f64,
    pub function_count: u32,
    pub halstead_volume: f64,
    pub halstead_effort: f64,
    pub delivered_bugs: f64,
    pub comment_quality: f64,
    pub doc_coverage: f64,
    pub cohesion: f64,
}

/// Plumbing this analyzer expects resolved for one commit: one entry per
/// file touched by the commit.
#[derive(Clone, Debug, Default)]
pub struct QualityPlumbing {
    pub files: Vec<FileMetricsInput>,
}

/// One file's metrics as carried in the `Consume` payload and preserved
/// verbatim in the report's `commit_quality` map. Structurally identical
/// to [`FileMetricsInput`]; kept as a distinct, serializable type since
/// the plumbing input is this analyzer's own concern and the payload is
/// a shared contract with the aggregator and report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileQualityMetrics {
    pub path: String,
    pub cyclomatic_complexity: f64,
    pub cognitive_complexity: f64,
    pub max_function_complexity: f64,
    pub function_count: u32,
    pub halstead_volume: f64,
    pub halstead_effort: f64,
    pub delivered_bugs: f64,
    pub comment_quality: f64,
    pub doc_coverage: f64,
    pub cohesion: f64,
}

impl From<&FileMetricsInput> for FileQualityMetrics {
    fn from(f: &FileMetricsInput) -> Self {
        Self {
            path: f.path.clone(),
            cyclomatic_complexity: f.cyclomatic_complexity,
            cognitive_complexity: f.cognitive_complexity,
            max_function_complexity: f.max_function_complexity,
            function_count: f.function_count,
            halstead_volume: f.halstead_volume,
            halstead_effort: f.halstead_effort,
            delivered_bugs: f.delivered_bugs,
            comment_quality: f.comment_quality,
            doc_coverage: f.doc_coverage,
            cohesion: f.cohesion,
        }
    }
}

/// The unmerged per-file slice bundle `Consume` emits for one commit —
/// the TC payload, and the value type of the report's `commit_quality`
/// map.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommitQualityData {
    pub files: Vec<FileQualityMetrics>,
}

impl CommitQualityData {
    #[must_use]
    pub fn estimated_bytes(&self) -> u64 {
        (self.files.len() * 96 + self.files.iter().map(|f| f.path.len()).sum::<usize>()) as u64
    }
}

/// Per-tick accumulator (`S`). Concatenates every commit's slice bundle
/// for the tick rather than pre-summing, since the report needs both the
/// raw per-commit detail (`commit_quality`) and the tick-level
/// statistics the detector never sees (quality has no anomaly pass).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TickAccumulator {
    pub commits: Vec<(CommitHash, CommitQualityData)>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl TickAccumulator {
    pub fn absorb(&mut self, hash: CommitHash, timestamp: Timestamp, data: CommitQualityData) {
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
