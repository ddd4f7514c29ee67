//! Quality-metrics analyzer (C9): per-file complexity, Halstead, and
//! cohesion metrics concatenated per tick and reduced to descriptive
//! statistics at report time.
//!
//! Like the anomaly analyzer, this one carries no growing resident state
//! of its own — every commit's file-level metrics flow straight into its
//! TC payload, and the tick aggregator concatenates them.

#![forbid(unsafe_code)]

pub mod model;
pub mod report;

use std::collections::HashMap;

use histolens_aggregator::TickAggregator;
use histolens_analyzer::{Analyzer, AnalyzerDescriptor, CommitContext};
use histolens_core::{ConfigValue, Result, Tc, Tick, TickRecord};
use histolens_store::Writer;
use serde_json::json;

pub use model::{CommitQualityData, FileMetricsInput, FileQualityMetrics, QualityPlumbing, TickAccumulator};
pub use report::{build_report, QualityReport, QualityTickEntry, QualityTickStats};

/// Conservative average TC payload size: a handful of files at ~100
/// bytes each. `working_state_size` stays at the struct's own footprint
/// since no per-commit state survives `Consume`.
const AVG_TC_SIZE_BYTES: u64 = 800;

/// The per-commit analyzer implementing the quality-metrics aggregation.
#[derive(Clone, Debug)]
pub struct QualityAnalyzer {
    descriptor: AnalyzerDescriptor,
}

impl QualityAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: AnalyzerDescriptor::new("quality-metrics", "Quality Metrics Analyzer"),
        }
    }
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for QualityAnalyzer {
    type Payload = CommitQualityData;
    type Accumulator = TickAccumulator;
    type TickData = QualityTickStats;
    type Plumbing = QualityPlumbing;
    type Report = QualityReport;

    fn descriptor(&self) -> AnalyzerDescriptor {
        self.descriptor.clone()
    }

    fn configure(&mut self, _facts: &HashMap<String, ConfigValue>) -> Result<()> {
        // No quality-specific facts are named in the external interface
        // beyond the common ones the driver consumes directly (tick
        // size, commit listing); nothing to apply here.
        Ok(())
    }

    fn fork(&self) -> Self {
        self.clone()
    }

    fn consume(&mut self, ctx: &CommitContext<'_, Self::Plumbing>) -> Option<Tc<Self::Payload>> {
        let files = ctx.plumbing.files.iter().map(FileQualityMetrics::from).collect();
        Some(Tc {
            commit_hash: ctx.commit.hash,
            tick: ctx.tick,
            timestamp: ctx.commit.timestamp,
            payload: Some(CommitQualityData { files }),
        })
    }

    fn merge(&mut self, _other: Self) {}

    fn hibernate(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn boot(&mut self, _state: &[u8]) -> Result<()> {
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
            |tc: &Tc<CommitQualityData>, acc: &mut TickAccumulator| {
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
                    data: QualityTickStats::from(acc),
                }
            },
        )
    }

    fn report_from_ticks(&self, ticks: &[TickRecord<Self::TickData>]) -> Self::Report {
        build_report(ticks)
    }

    fn write_report(&self, report: &Self::Report, writer: &mut dyn Writer) -> Result<()> {
        for entry in &report.time_series {
            writer.write("time_series", serde_json::to_value(entry)?)?;
        }
        let total_files: usize = report.time_series.iter().map(|t| t.files_analyzed).sum();
        let total_delivered_bugs: f64 = report.time_series.iter().map(|t| t.delivered_bugs_sum).sum();
        writer.write(
            "aggregate",
            json!({
                "total_commits": report.total_commits,
                "total_ticks": report.time_series.len(),
                "total_files_analyzed": total_files,
                "total_delivered_bugs": total_delivered_bugs,
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use histolens_core::{CancellationToken, Commit, CommitHash, Timestamp};

    fn commit(hash: u8) -> Commit {
        Commit {
            hash: CommitHash::from([hash; 20]),
            author: format!("author-{hash}"),
            timestamp: Timestamp::from_unix_micros(0),
            parent_count: 1,
        }
    }

    #[test]
    fn configure_is_always_ok() {
        let mut analyzer = QualityAnalyzer::new();
        assert!(analyzer.configure(&HashMap::new()).is_ok());
    }

    #[test]
    fn consume_carries_every_file_into_the_payload() {
        let mut analyzer = QualityAnalyzer::new();
        let commit = commit(1);
        let plumbing = QualityPlumbing {
            files: vec![
                FileMetricsInput {
                    path: "a.rs".to_string(),
                    cyclomatic_complexity: 4.0,
                    ..Default::default()
                },
                FileMetricsInput {
                    path: "b.rs".to_string(),
                    cyclomatic_complexity: 9.0,
                    ..Default::default()
                },
            ],
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
        assert_eq!(data.files.len(), 2);
        assert_eq!(data.files[1].cyclomatic_complexity, 9.0);
    }

    #[test]
    fn empty_history_produces_well_formed_report() {
        let analyzer = QualityAnalyzer::new();
        let report = analyzer.report_from_ticks(&[]);
        assert!(report.time_series.is_empty());
        assert_eq!(report.total_commits, 0);
    }
}
