//! Report assembly: six-dimension Z-score detection over ordered ticks,
//! plus the `commit_metrics`/`commits_by_tick` reassembly from each
//! tick's raw commit list.

use std::collections::BTreeMap;

use histolens_aggregator::z_scores;
use histolens_core::{CommitHash, Tick, TickRecord, Timestamp};

use crate::model::{CommitAnomalyData, TickMetrics};

/// The six dimensions the detector scores independently, in report order.
const DIMENSIONS: [&str; 6] = [
    "net_churn",
    "files_changed",
    "lines_added",
    "lines_removed",
    "language_diversity",
    "author_count",
];

/// The subset of a tick's sums an anomaly record carries, mirroring
/// `AnomalyMetrics` in the canonical report keys.
#[derive(Clone, Debug, serde::Serialize)]
pub struct AnomalyMetrics {
    pub files_changed: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub net_churn: i64,
    pub language_diversity: usize,
    pub author_count: usize,
}

impl From<&TickMetrics> for AnomalyMetrics {
    fn from(m: &TickMetrics) -> Self {
        Self {
            files_changed: m.files_changed,
            lines_added: m.lines_added,
            lines_removed: m.lines_removed,
            net_churn: m.net_churn,
            language_diversity: m.language_diversity,
            author_count: m.author_count,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct AnomalyRecord {
    pub tick: Tick,
    pub max_abs_z_score: f64,
    pub dimension: &'static str,
    pub metrics: AnomalyMetrics,
}

/// One tick's worth of the `time_series` store kind.
#[derive(Clone, Debug, serde::Serialize)]
pub struct TickSeriesEntry {
    pub tick: Tick,
    pub start: Timestamp,
    pub end: Timestamp,
    pub metrics: AnomalyMetrics,
}

/// The analyzer's canonical report (§6 report keys).
#[derive(Clone, Debug)]
pub struct AnomalyReport {
    pub commit_metrics: BTreeMap<CommitHash, CommitAnomalyData>,
    pub commits_by_tick: BTreeMap<Tick, Vec<CommitHash>>,
    pub anomalies: Vec<AnomalyRecord>,
    pub threshold: f64,
    pub window_size: usize,
    pub time_series: Vec<TickSeriesEntry>,
    pub total_commits: u64,
}

impl AnomalyReport {
    #[must_use]
    pub fn anomaly_rate(&self) -> f64 {
        if self.time_series.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.anomalies.len() as f64 / self.time_series.len() as f64;
            rate
        }
    }
}

/// Builds the report from ascending-order TICKs: six per-dimension
/// Z-score series over the trailing window `window_size`, then one
/// [`AnomalyRecord`] per tick whose max absolute Z-score across all six
/// dimensions exceeds `threshold`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn build_report(
    ticks: &[TickRecord<TickMetrics>],
    threshold: f64,
    window_size: usize,
) -> AnomalyReport {
    let series: [Vec<f64>; 6] = [
        ticks.iter().map(|t| t.data.net_churn as f64).collect(),
        ticks.iter().map(|t| t.data.files_changed as f64).collect(),
        ticks.iter().map(|t| t.data.lines_added as f64).collect(),
        ticks.iter().map(|t| t.data.lines_removed as f64).collect(),
        ticks.iter().map(|t| t.data.language_diversity as f64).collect(),
        ticks.iter().map(|t| t.data.author_count as f64).collect(),
    ];
    let z: [Vec<f64>; 6] = series.map(|s| z_scores(&s, window_size));

    let mut commit_metrics = BTreeMap::new();
    let mut commits_by_tick = BTreeMap::new();
    let mut time_series = Vec::with_capacity(ticks.len());
    let mut anomalies = Vec::new();
    let mut total_commits = 0u64;

    for (i, tick_record) in ticks.iter().enumerate() {
        let metrics = AnomalyMetrics::from(&tick_record.data);

        let (dimension, max_abs_z) = (0..DIMENSIONS.len())
            .map(|d| (DIMENSIONS[d], z[d][i]))
            .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
            .unwrap_or(("net_churn", 0.0));

        if max_abs_z.abs() > threshold {
            anomalies.push(AnomalyRecord {
                tick: tick_record.tick,
                max_abs_z_score: max_abs_z.abs(),
                dimension,
                metrics: metrics.clone(),
            });
        }

        time_series.push(TickSeriesEntry {
            tick: tick_record.tick,
            start: tick_record.start,
            end: tick_record.end,
            metrics,
        });

        let mut hashes: Vec<CommitHash> = Vec::with_capacity(tick_record.data.commits.len());
        for (hash, data) in &tick_record.data.commits {
            hashes.push(*hash);
            commit_metrics.insert(*hash, data.clone());
            total_commits += 1;
        }
        commits_by_tick.insert(tick_record.tick, hashes);
    }

    anomalies.sort_by(|a, b| {
        b.max_abs_z_score
            .total_cmp(&a.max_abs_z_score)
            .then(a.tick.cmp(&b.tick))
    });

    tracing::debug!(
        ticks = ticks.len(),
        anomalies = anomalies.len(),
        total_commits,
        threshold,
        "anomaly report assembled"
    );

    AnomalyReport {
        commit_metrics,
        commits_by_tick,
        anomalies,
        threshold,
        window_size,
        time_series,
        total_commits,
    }
}
