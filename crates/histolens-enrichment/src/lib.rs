//! Cross-analyzer enrichment (C10): runs the temporal anomaly detector's
//! Z-score pass over every other analyzer's time series and appends the
//! findings to the anomaly analyzer's own store slot.
//!
//! The anomaly analyzer only ever sees its own commit-churn dimensions.
//! This pass lets every other analyzer's `time_series` records get the
//! same trailing-window scrutiny, without the anomaly analyzer itself
//! knowing those analyzers exist — the registry of [`extractor::Extractor`]
//! implementations is the only coupling point, and it is built and owned
//! by the caller.

#![forbid(unsafe_code)]

pub mod extractor;

use serde::Serialize;
use serde_json::Value;

use histolens_aggregator::z_scores;
use histolens_core::{AnalyzerId, Result, Tick};
use histolens_store::Store;

pub use extractor::{Extractor, ExtractorRegistry, QualityTimeSeriesExtractor};

/// One tick, from one analyzer, on one dimension, whose trailing-window
/// Z-score exceeded the threshold.
#[derive(Clone, Debug, Serialize)]
pub struct ExternalAnomaly {
    pub source: AnalyzerId,
    pub dimension: String,
    pub tick: Tick,
    pub z_score: f64,
    pub value: f64,
}

/// Per-(source, dimension) roll-up, so a reader can see how anomaly-prone
/// each external series was without scanning every [`ExternalAnomaly`].
#[derive(Clone, Debug, Serialize)]
pub struct ExternalSummary {
    pub source: AnalyzerId,
    pub dimension: String,
    pub anomaly_count: usize,
    pub tick_count: usize,
}

/// Re-scores every other analyzer's extractable time series against the
/// anomaly analyzer's own `threshold`/`window_size`, and atomically
/// rewrites the anomaly analyzer's store slot: its three original kinds
/// verbatim, followed by `external_anomaly` and `external_summary`.
///
/// Analyzers with no registered extractor are skipped. A dimension whose
/// value series doesn't line up one-to-one with its tick series is
/// skipped rather than treated as an error — the extractor already
/// dropped the malformed records that caused the mismatch.
///
/// # Errors
/// Propagates the store's read/write errors, tagged with the anomaly
/// analyzer's ID by the `Store` implementation.
pub fn run_enrichment(
    store: &dyn Store,
    anomaly_analyzer_id: &AnalyzerId,
    threshold: f64,
    window_size: usize,
    extractors: &ExtractorRegistry,
) -> Result<()> {
    let reader = store.open(anomaly_analyzer_id)?;
    let preserved: Vec<(String, Vec<Value>)> = reader
        .kinds()
        .into_iter()
        .map(|kind| {
            let values: Vec<Value> = reader.iter(&kind).collect();
            (kind, values)
        })
        .collect();
    drop(reader);

    let mut findings = Vec::new();
    let mut summaries = Vec::new();

    for source_id in store.analyzer_ids() {
        if &source_id == anomaly_analyzer_id {
            continue;
        }
        let Some(extractor) = extractors.get(&source_id) else {
            continue;
        };
        let source_reader = store.open(&source_id)?;
        let (ticks, dimensions) = extractor.extract(source_reader.as_ref());

        let mut dimension_names: Vec<&String> = dimensions.keys().collect();
        dimension_names.sort();

        for dimension in dimension_names {
            let values = &dimensions[dimension];
            if values.len() != ticks.len() {
                tracing::warn!(
                    analyzer = %source_id,
                    dimension,
                    ticks = ticks.len(),
                    values = values.len(),
                    "enrichment: dimension/tick length mismatch, skipping"
                );
                continue;
            }

            let z = z_scores(values, window_size);
            let mut anomaly_count = 0usize;
            for i in 0..ticks.len() {
                if z[i].abs() > threshold {
                    findings.push(ExternalAnomaly {
                        source: source_id.clone(),
                        dimension: dimension.clone(),
                        tick: ticks[i],
                        z_score: z[i].abs(),
                        value: values[i],
                    });
                    anomaly_count += 1;
                }
            }
            summaries.push(ExternalSummary {
                source: source_id.clone(),
                dimension: dimension.clone(),
                anomaly_count,
                tick_count: ticks.len(),
            });
        }
    }

    findings.sort_by(|a, b| b.z_score.total_cmp(&a.z_score));
    summaries.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.dimension.cmp(&b.dimension)));

    let mut writer = store.begin(anomaly_analyzer_id.clone(), Value::Null)?;
    for (kind, values) in preserved {
        for value in values {
            writer.write(&kind, value)?;
        }
    }
    for finding in &findings {
        writer.write("external_anomaly", serde_json::to_value(finding)?)?;
    }
    for summary in &summaries {
        writer.write("external_summary", serde_json::to_value(summary)?)?;
    }
    writer.close()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use histolens_store::MemStore;

    fn seed_anomaly_slot(store: &MemStore, id: &AnalyzerId) {
        let mut writer = store.begin(id.clone(), serde_json::json!({"kind": "anomaly"})).unwrap();
        writer
            .write("time_series", serde_json::json!({"tick": 0, "net_churn": 10}))
            .unwrap();
        writer
            .write("anomaly_record", serde_json::json!({"tick": 0, "maxAbsZScore": 0.1}))
            .unwrap();
        writer
            .write("aggregate", serde_json::json!({"total_commits": 1}))
            .unwrap();
        writer.close().unwrap();
    }

    fn seed_quality_slot(store: &MemStore, id: &AnalyzerId, medians: &[f64]) {
        let mut writer = store.begin(id.clone(), serde_json::json!({})).unwrap();
        for (tick, median) in medians.iter().enumerate() {
            writer
                .write(
                    "time_series",
                    serde_json::json!({
                        "tick": tick as i64,
                        "complexity_median": median,
                        "complexity_mean": median,
                        "halstead_volume_mean": 0.0,
                        "delivered_bugs_sum": 0.0,
                    }),
                )
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn cross_analyzer_enrichment_flags_the_quality_spike() {
        let store = MemStore::new();
        let anomaly_id = AnalyzerId::new("temporal-anomaly");
        let quality_id = AnalyzerId::new("quality-metrics");
        seed_anomaly_slot(&store, &anomaly_id);

        let (_ticks, medians) = histolens_test_support::fixtures::quality_complexity_median_series();
        seed_quality_slot(&store, &quality_id, &medians);

        let mut registry: ExtractorRegistry = ExtractorRegistry::new();
        registry.insert(quality_id.clone(), Box::new(QualityTimeSeriesExtractor));

        run_enrichment(&store, &anomaly_id, 2.0, 3, &registry).unwrap();

        let reader = store.open(&anomaly_id).unwrap();
        let kinds = reader.kinds();
        assert!(kinds.contains(&"time_series".to_string()));
        assert!(kinds.contains(&"external_anomaly".to_string()));
        assert!(kinds.contains(&"external_summary".to_string()));

        let preserved: Vec<Value> = reader.iter("time_series").collect();
        assert_eq!(preserved.len(), 1);
        assert_eq!(preserved[0]["net_churn"], 10);

        let external: Vec<Value> = reader.iter("external_anomaly").collect();
        let complexity_median_findings: Vec<&Value> = external
            .iter()
            .filter(|v| v["dimension"] == "complexity_median")
            .collect();
        assert_eq!(complexity_median_findings.len(), 1);
        assert_eq!(complexity_median_findings[0]["source"], "quality-metrics");
        assert_eq!(complexity_median_findings[0]["tick"], 4);
        assert!(complexity_median_findings[0]["z_score"].as_f64().unwrap() > 2.0);
    }

    #[test]
    fn unregistered_analyzers_are_skipped() {
        let store = MemStore::new();
        let anomaly_id = AnalyzerId::new("temporal-anomaly");
        let other_id = AnalyzerId::new("some-other-analyzer");
        seed_anomaly_slot(&store, &anomaly_id);
        let mut writer = store.begin(other_id.clone(), serde_json::json!({})).unwrap();
        writer.write("time_series", serde_json::json!({"tick": 0})).unwrap();
        writer.close().unwrap();

        let registry = ExtractorRegistry::new();
        run_enrichment(&store, &anomaly_id, 2.0, 3, &registry).unwrap();

        let reader = store.open(&anomaly_id).unwrap();
        assert!(reader.iter("external_anomaly").next().is_none());
    }

    #[test]
    fn preserved_kinds_are_byte_identical_after_rewrite() {
        let store = MemStore::new();
        let anomaly_id = AnalyzerId::new("temporal-anomaly");
        seed_anomaly_slot(&store, &anomaly_id);

        let registry = ExtractorRegistry::new();
        run_enrichment(&store, &anomaly_id, 2.0, 3, &registry).unwrap();

        let reader = store.open(&anomaly_id).unwrap();
        let records: Vec<Value> = reader.iter("anomaly_record").collect();
        assert_eq!(records, vec![serde_json::json!({"tick": 0, "maxAbsZScore": 0.1})]);
    }
}
