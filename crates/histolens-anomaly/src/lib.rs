//! Temporal anomaly detector (C8): flags ticks whose commit-churn
//! profile diverges from its own trailing history across six dimensions
//! — net churn, files changed, lines added, lines removed, language
//! diversity, and author count.
//!
//! This analyzer carries no growing resident state of its own; every
//! commit's metrics flow straight into its TC payload and the tick
//! aggregator does the folding. `Fork`/`Merge`/`Hibernate`/`Boot` exist
//! to satisfy the lifecycle, not because there is meaningful state to
//! shuffle around.

#![forbid(unsafe_code)]

pub mod model;
pub mod report;

use std::collections::HashMap;

use histolens_aggregator::TickAggregator;
use histolens_analyzer::{Analyzer, AnalyzerDescriptor, CommitContext};
use histolens_core::{ConfigValue, Result, Tc, Tick, TickRecord};
use histolens_store::Writer;
use serde_json::json;

pub use model::{CommitAnomalyData, CommitPlumbing, TickAccumulator, TickMetrics};
pub use report::{build_report, AnomalyMetrics, AnomalyRecord, AnomalyReport, TickSeriesEntry};

/// `TemporalAnomaly.Threshold` default (§6).
pub const DEFAULT_THRESHOLD: f64 = 2.0;
/// `TemporalAnomaly.Threshold` minimum before an out-of-range value
/// reverts to the default.
pub const MIN_THRESHOLD: f64 = 0.1;
/// `TemporalAnomaly.WindowSize` default (§6).
pub const DEFAULT_WINDOW_SIZE: usize = 20;
/// `TemporalAnomaly.WindowSize` minimum before an out-of-range value
/// reverts to the default.
pub const MIN_WINDOW_SIZE: usize = 2;

/// Conservative average TC payload size, used to feed the scheduler's
/// chunk-size solve. A handful of changed paths plus a small language map
/// comfortably fits this estimate; `working_state_size` stays at the
/// struct's own footprint since no per-commit state survives `Consume`.
const AVG_TC_SIZE_BYTES: u64 = 512;

#[derive(Clone, Debug)]
struct AnomalyConfig {
    threshold: f64,
    window_size: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// The per-commit analyzer implementing temporal anomaly detection.
#[derive(Clone, Debug)]
pub struct TemporalAnomalyAnalyzer {
    descriptor: AnalyzerDescriptor,
    config: AnomalyConfig,
}

impl TemporalAnomalyAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: AnalyzerDescriptor::new("temporal-anomaly", "Temporal Anomaly Detector"),
            config: AnomalyConfig::default(),
        }
    }
}

impl Default for TemporalAnomalyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for TemporalAnomalyAnalyzer {
    type Payload = CommitAnomalyData;
    type Accumulator = TickAccumulator;
    type TickData = TickMetrics;
    type Plumbing = CommitPlumbing;
    type Report = AnomalyReport;

    fn descriptor(&self) -> AnalyzerDescriptor {
        self.descriptor.clone()
    }

    fn configure(&mut self, facts: &HashMap<String, ConfigValue>) -> Result<()> {
        self.config.threshold = facts
            .get("TemporalAnomaly.Threshold")
            .and_then(ConfigValue::as_f64)
            .filter(|v| *v >= MIN_THRESHOLD)
            .unwrap_or(DEFAULT_THRESHOLD);

        self.config.window_size = facts
            .get("TemporalAnomaly.WindowSize")
            .and_then(ConfigValue::as_i64)
            .filter(|v| *v >= MIN_WINDOW_SIZE as i64)
            .map_or(DEFAULT_WINDOW_SIZE, |v| v as usize);

        Ok(())
    }

    fn fork(&self) -> Self {
        self.clone()
    }

    fn consume(&mut self, ctx: &CommitContext<'_, Self::Plumbing>) -> Option<Tc<Self::Payload>> {
        let data = CommitAnomalyData::from_plumbing(ctx.plumbing, &ctx.commit.author);
        Some(Tc {
            commit_hash: ctx.commit.hash,
            tick: ctx.tick,
            timestamp: ctx.commit.timestamp,
            payload: Some(data),
        })
    }

    fn merge(&mut self, _other: Self) {}

    fn hibernate(&mut self) -> Result<Vec<u8>> {
        let snapshot = (self.config.threshold, self.config.window_size);
        Ok(serde_json::to_vec(&snapshot)?)
    }

    fn boot(&mut self, state: &[u8]) -> Result<()> {
        if state.is_empty() {
            return Ok(());
        }
        let (threshold, window_size): (f64, usize) = serde_json::from_slice(state)?;
        self.config.threshold = threshold;
        self.config.window_size = window_size;
        Ok(())
    }

    fn working_state_size(&self) -> u64 {
        std::mem::size_of::<Self>() as u64
    }

    fn avg_tc_size(&self) -> u64 {
        AVG_TC_SIZE_BYTES
    }

    fn new_aggregator(
        &self,
        spill_budget_bytes: u64,
    ) -> TickAggregator<Self::Payload, Self::Accumulator, Self::TickData> {
        TickAggregator::new(
            self.descriptor.id.clone(),
            spill_budget_bytes,
            TickAccumulator::default,
            |tc: &Tc<CommitAnomalyData>, acc: &mut TickAccumulator| {
                if let Some(data) = &tc.payload {
                    acc.absorb(tc.commit_hash, tc.timestamp, data.clone());
                }
            },
            TickAccumulator::merge,
            TickAccumulator::size_bytes,
            |tick: Tick, acc: TickAccumulator| {
                let start = acc.start.unwrap_or(histolens_core::Timestamp::from_unix_micros(0));
                let end = acc.end.unwrap_or(start);
                TickRecord {
                    tick,
                    start,
                    end,
                    data: TickMetrics::from(acc),
                }
            },
        )
    }

    fn report_from_ticks(&self, ticks: &[TickRecord<Self::TickData>]) -> Self::Report {
        build_report(ticks, self.config.threshold, self.config.window_size)
    }

    fn write_report(&self, report: &Self::Report, writer: &mut dyn Writer) -> Result<()> {
        for entry in &report.time_series {
            writer.write("time_series", serde_json::to_value(entry)?)?;
        }
        for anomaly in &report.anomalies {
            writer.write("anomaly_record", serde_json::to_value(anomaly)?)?;
        }
        writer.write(
            "aggregate",
            json!({
                "total_commits": report.total_commits,
                "total_ticks": report.time_series.len(),
                "total_anomalies": report.anomalies.len(),
                "anomaly_rate": report.anomaly_rate(),
                "threshold": report.threshold,
                "window_size": report.window_size,
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use histolens_analyzer::CommitContext;
    use histolens_core::{CancellationToken, Commit, CommitHash, Timestamp};

    fn commit(hash: u8, timestamp_secs: i64) -> Commit {
        Commit {
            hash: CommitHash::from([hash; 20]),
            author: format!("author-{hash}"),
            timestamp: Timestamp::from_unix_micros(timestamp_secs * 1_000_000),
            parent_count: 1,
        }
    }

    #[test]
    fn configure_reverts_out_of_range_values_to_defaults() {
        let mut analyzer = TemporalAnomalyAnalyzer::new();
        let mut facts = HashMap::new();
        facts.insert("TemporalAnomaly.Threshold".to_string(), ConfigValue::Float(0.0));
        facts.insert("TemporalAnomaly.WindowSize".to_string(), ConfigValue::Int(1));
        analyzer.configure(&facts).unwrap();
        assert_eq!(analyzer.config.threshold, DEFAULT_THRESHOLD);
        assert_eq!(analyzer.config.window_size, DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn configure_accepts_in_range_values() {
        let mut analyzer = TemporalAnomalyAnalyzer::new();
        let mut facts = HashMap::new();
        facts.insert("TemporalAnomaly.Threshold".to_string(), ConfigValue::Float(3.5));
        facts.insert("TemporalAnomaly.WindowSize".to_string(), ConfigValue::Int(10));
        analyzer.configure(&facts).unwrap();
        assert_eq!(analyzer.config.threshold, 3.5);
        assert_eq!(analyzer.config.window_size, 10);
    }

    #[test]
    fn configure_is_idempotent() {
        let mut analyzer = TemporalAnomalyAnalyzer::new();
        let mut facts = HashMap::new();
        facts.insert("TemporalAnomaly.Threshold".to_string(), ConfigValue::Float(3.0));
        analyzer.configure(&facts).unwrap();
        analyzer.configure(&facts).unwrap();
        assert_eq!(analyzer.config.threshold, 3.0);
    }

    #[test]
    fn consume_produces_tc_with_derived_net_churn() {
        let mut analyzer = TemporalAnomalyAnalyzer::new();
        let commit = commit(1, 0);
        let plumbing = CommitPlumbing {
            files_changed: 3,
            lines_added: 50,
            lines_removed: 20,
            changed_paths: vec!["src/lib.rs".to_string()],
            languages: std::collections::BTreeMap::from([("rust".to_string(), 1)]),
        };
        let cancellation = CancellationToken::new();
        let ctx = CommitContext {
            commit: &commit,
            plumbing: &plumbing,
            tick: 0,
            cancellation: &cancellation,
        };
        let tc = analyzer.consume(&ctx).expect("consume always succeeds");
        let data = tc.payload.expect("payload present");
        assert_eq!(data.net_churn, 30);
        assert_eq!(data.author, "author-1");
    }

    #[test]
    fn hibernate_boot_round_trips_config() {
        let mut analyzer = TemporalAnomalyAnalyzer::new();
        analyzer.config.threshold = 5.0;
        analyzer.config.window_size = 7;
        let state = analyzer.hibernate().unwrap();

        let mut restored = TemporalAnomalyAnalyzer::new();
        restored.boot(&state).unwrap();
        assert_eq!(restored.config.threshold, 5.0);
        assert_eq!(restored.config.window_size, 7);
    }

    #[test]
    fn single_commit_chunk_produces_zero_anomalies() {
        let analyzer = TemporalAnomalyAnalyzer::new();
        let ticks = vec![TickRecord {
            tick: 0,
            start: Timestamp::from_unix_micros(0),
            end: Timestamp::from_unix_micros(0),
            data: TickMetrics {
                files_changed: 1,
                lines_added: 1,
                lines_removed: 1,
                net_churn: 0,
                language_diversity: 1,
                author_count: 1,
                changed_paths: Vec::new(),
                commits: vec![(CommitHash::from([1u8; 20]), CommitAnomalyData {
                    files_changed: 1,
                    lines_added: 1,
                    lines_removed: 1,
                    net_churn: 0,
                    changed_paths: Vec::new(),
                    languages: std::collections::BTreeMap::new(),
                    author: "a".to_string(),
                })],
            },
        }];
        let report = analyzer.report_from_ticks(&ticks);
        assert!(report.anomalies.is_empty());
    }
}
