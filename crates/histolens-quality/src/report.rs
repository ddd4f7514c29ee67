//! Tick-level statistics (mean/median/P95/max for complexity dimensions
//! and Halstead volume; min for comment quality and cohesion; sum for
//! delivered bugs; count for files analyzed) and report assembly.

use std::collections::BTreeMap;

use histolens_aggregator::{max, mean_stddev, median, min, percentile, sum};
use histolens_core::{CommitHash, Tick, TickRecord, Timestamp};

use crate::model::{CommitQualityData, FileQualityMetrics, TickAccumulator};

/// `TickData` (`D`): one tick's file-level statistics plus the raw
/// per-commit records the report reassembles `commit_quality`/
/// `commits_by_tick` from.
#[derive(Clone, Debug)]
pub struct QualityTickStats {
    pub complexity_mean: f64,
    pub complexity_median: f64,
    pub complexity_p95: f64,
    pub complexity_max: f64,
    pub cognitive_mean: f64,
    pub cognitive_median: f64,
    pub cognitive_p95: f64,
    pub cognitive_max: f64,
    pub max_function_complexity_mean: f64,
    pub max_function_complexity_median: f64,
    pub max_function_complexity_p95: f64,
    pub max_function_complexity_max: f64,
    pub halstead_volume_mean: f64,
    pub halstead_volume_median: f64,
    pub halstead_volume_p95: f64,
    pub halstead_volume_max: f64,
    pub comment_quality_min: f64,
    pub cohesion_min: f64,
    pub delivered_bugs_sum: f64,
    pub files_analyzed: usize,
    pub commits: Vec<(CommitHash, CommitQualityData)>,
}

fn four_stats(xs: &[f64]) -> (f64, f64, f64, f64) {
    let (mean, _) = mean_stddev(xs);
    (mean, median(xs), percentile(xs, 95.0), max(xs))
}

impl From<TickAccumulator> for QualityTickStats {
    fn from(acc: TickAccumulator) -> Self {
        let files: Vec<&FileQualityMetrics> =
            acc.commits.iter().flat_map(|(_, d)| d.files.iter()).collect();

        let complexity: Vec<f64> = files.iter().map(|f| f.cyclomatic_complexity).collect();
        let cognitive: Vec<f64> = files.iter().map(|f| f.cognitive_complexity).collect();
        let max_fn_complexity: Vec<f64> = files.iter().map(|f| f.max_function_complexity).collect();
        let halstead_volume: Vec<f64> = files.iter().map(|f| f.halstead_volume).collect();
        let comment_quality: Vec<f64> = files.iter().map(|f| f.comment_quality).collect();
        let cohesion: Vec<f64> = files.iter().map(|f| f.cohesion).collect();
        let delivered_bugs: Vec<f64> = files.iter().map(|f| f.delivered_bugs).collect();

        let (complexity_mean, complexity_median, complexity_p95, complexity_max) =
            four_stats(&complexity);
        let (cognitive_mean, cognitive_median, cognitive_p95, cognitive_max) = four_stats(&cognitive);
        let (
            max_function_complexity_mean,
            max_function_complexity_median,
            max_function_complexity_p95,
            max_function_complexity_max,
        ) = four_stats(&max_fn_complexity);
        let (halstead_volume_mean, halstead_volume_median, halstead_volume_p95, halstead_volume_max) =
            four_stats(&halstead_volume);

        let files_analyzed = files.len();

        Self {
            complexity_mean,
            complexity_median,
            complexity_p95,
            complexity_max,
            cognitive_mean,
            cognitive_median,
            cognitive_p95,
            cognitive_max,
            max_function_complexity_mean,
            max_function_complexity_median,
            max_function_complexity_p95,
            max_function_complexity_max,
            halstead_volume_mean,
            halstead_volume_median,
            halstead_volume_p95,
            halstead_volume_max,
            comment_quality_min: min(&comment_quality),
            cohesion_min: min(&cohesion),
            delivered_bugs_sum: sum(&delivered_bugs),
            files_analyzed,
            commits: acc.commits,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct QualityTickEntry {
    pub tick: Tick,
    pub start: Timestamp,
    pub end: Timestamp,
    pub complexity_mean: f64,
    pub complexity_median: f64,
    pub complexity_p95: f64,
    pub complexity_max: f64,
    pub cognitive_mean: f64,
    pub cognitive_median: f64,
    pub cognitive_p95: f64,
    pub cognitive_max: f64,
    pub max_function_complexity_mean: f64,
    pub max_function_complexity_median: f64,
    pub max_function_complexity_p95: f64,
    pub max_function_complexity_max: f64,
    pub halstead_volume_mean: f64,
    pub halstead_volume_median: f64,
    pub halstead_volume_p95: f64,
    pub halstead_volume_max: f64,
    pub comment_quality_min: f64,
    pub cohesion_min: f64,
    pub delivered_bugs_sum: f64,
    pub files_analyzed: usize,
}

#[derive(Clone, Debug)]
pub struct QualityReport {
    pub commit_quality: BTreeMap<CommitHash, CommitQualityData>,
    pub commits_by_tick: BTreeMap<Tick, Vec<CommitHash>>,
    pub time_series: Vec<QualityTickEntry>,
    pub total_commits: u64,
}

#[must_use]
pub fn build_report(ticks: &[TickRecord<QualityTickStats>]) -> QualityReport {
    let mut commit_quality = BTreeMap::new();
    let mut commits_by_tick = BTreeMap::new();
    let mut time_series = Vec::with_capacity(ticks.len());
    let mut total_commits = 0u64;

    for tick_record in ticks {
        let stats = &tick_record.data;
        time_series.push(QualityTickEntry {
            tick: tick_record.tick,
            start: tick_record.start,
            end: tick_record.end,
            complexity_mean: stats.complexity_mean,
            complexity_median: stats.complexity_median,
            complexity_p95: stats.complexity_p95,
            complexity_max: stats.complexity_max,
            cognitive_mean: stats.cognitive_mean,
            cognitive_median: stats.cognitive_median,
            cognitive_p95: stats.cognitive_p95,
            cognitive_max: stats.cognitive_max,
            max_function_complexity_mean: stats.max_function_complexity_mean,
            max_function_complexity_median: stats.max_function_complexity_median,
            max_function_complexity_p95: stats.max_function_complexity_p95,
            max_function_complexity_max: stats.max_function_complexity_max,
            halstead_volume_mean: stats.halstead_volume_mean,
            halstead_volume_median: stats.halstead_volume_median,
            halstead_volume_p95: stats.halstead_volume_p95,
            halstead_volume_max: stats.halstead_volume_max,
            comment_quality_min: stats.comment_quality_min,
            cohesion_min: stats.cohesion_min,
            delivered_bugs_sum: stats.delivered_bugs_sum,
            files_analyzed: stats.files_analyzed,
        });

        let mut hashes = Vec::with_capacity(tick_record.data.commits.len());
        for (hash, data) in &tick_record.data.commits {
            hashes.push(*hash);
            commit_quality.insert(*hash, data.clone());
            total_commits += 1;
        }
        commits_by_tick.insert(tick_record.tick, hashes);
    }

    tracing::debug!(
        ticks = ticks.len(),
        total_commits,
        "quality report assembled"
    );

    QualityReport {
        commit_quality,
        commits_by_tick,
        time_series,
        total_commits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use histolens_core::Timestamp;

    fn file(cyclomatic: f64) -> FileQualityMetrics {
        FileQualityMetrics {
            path: "a.rs".to_string(),
            cyclomatic_complexity: cyclomatic,
            cognitive_complexity: 0.0,
            max_function_complexity: 0.0,
            function_count: 1,
            halstead_volume: 0.0,
            halstead_effort: 0.0,
            delivered_bugs: 1.0,
            comment_quality: 0.5,
            doc_coverage: 0.5,
            cohesion: 0.8,
        }
    }

    fn tick_with_complexity(tick: Tick, values: &[f64]) -> TickRecord<QualityTickStats> {
        let mut acc = TickAccumulator::default();
        for (i, &v) in values.iter().enumerate() {
            acc.absorb(
                histolens_core::CommitHash::from([i as u8 + 1; 20]),
                Timestamp::from_unix_micros(0),
                CommitQualityData { files: vec![file(v)] },
            );
        }
        TickRecord {
            tick,
            start: Timestamp::from_unix_micros(0),
            end: Timestamp::from_unix_micros(0),
            data: QualityTickStats::from(acc),
        }
    }

    #[test]
    fn complexity_median_matches_fixture_series() {
        let (fixture_ticks, values) = histolens_test_support::fixtures::quality_complexity_median_series();
        let ticks: Vec<TickRecord<QualityTickStats>> = fixture_ticks
            .iter()
            .zip(values.iter())
            .map(|(&t, &v)| tick_with_complexity(t, &[v]))
            .collect();
        let medians: Vec<f64> = ticks.iter().map(|t| t.data.complexity_median).collect();
        assert_eq!(medians, values);
    }

    #[test]
    fn empty_tick_stats_are_zero() {
        let acc = TickAccumulator::default();
        let stats = QualityTickStats::from(acc);
        assert_eq!(stats.files_analyzed, 0);
        assert_eq!(stats.complexity_mean, 0.0);
        assert_eq!(stats.delivered_bugs_sum, 0.0);
    }

    #[test]
    fn build_report_reassembles_commit_quality_and_commits_by_tick() {
        let ticks = vec![tick_with_complexity(0, &[1.0, 2.0, 3.0])];
        let report = build_report(&ticks);
        assert_eq!(report.total_commits, 3);
        assert_eq!(report.commit_quality.len(), 3);
        assert_eq!(report.commits_by_tick[&0].len(), 3);
    }
}
