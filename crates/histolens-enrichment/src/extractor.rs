//! Store time-series extractors: the seam that lets the enrichment pass
//! read another analyzer's `time_series` records without knowing that
//! analyzer's payload types.

use std::collections::HashMap;

use histolens_core::Tick;
use histolens_store::Reader;

/// Reads one analyzer's `time_series` store kind into an aligned set of
/// per-tick dimensions. Every returned dimension's `Vec<f64>` must be the
/// same length as `ticks`; a mismatch is the enrichment pass's signal to
/// skip that dimension rather than panic.
pub trait Extractor: Send + Sync {
    fn extract(&self, reader: &dyn Reader) -> (Vec<Tick>, HashMap<String, Vec<f64>>);
}

/// Reads the quality-metrics analyzer's `time_series` kind, pulling out
/// the dimensions that are meaningful to flag as externally anomalous:
/// the cyclomatic-complexity median (the dimension the enrichment
/// scenario is framed around), its mean, the mean Halstead volume, and
/// the summed delivered-bugs estimate.
#[derive(Debug, Default, Clone, Copy)]
pub struct QualityTimeSeriesExtractor;

impl Extractor for QualityTimeSeriesExtractor {
    fn extract(&self, reader: &dyn Reader) -> (Vec<Tick>, HashMap<String, Vec<f64>>) {
        let mut ticks = Vec::new();
        let mut complexity_median = Vec::new();
        let mut complexity_mean = Vec::new();
        let mut halstead_volume_mean = Vec::new();
        let mut delivered_bugs_sum = Vec::new();

        for record in reader.iter("time_series") {
            let (Some(tick), Some(cm), Some(ca), Some(hv), Some(db)) = (
                record.get("tick").and_then(serde_json::Value::as_i64),
                record.get("complexity_median").and_then(serde_json::Value::as_f64),
                record.get("complexity_mean").and_then(serde_json::Value::as_f64),
                record.get("halstead_volume_mean").and_then(serde_json::Value::as_f64),
                record.get("delivered_bugs_sum").and_then(serde_json::Value::as_f64),
            ) else {
                continue;
            };
            ticks.push(tick);
            complexity_median.push(cm);
            complexity_mean.push(ca);
            halstead_volume_mean.push(hv);
            delivered_bugs_sum.push(db);
        }

        let dimensions = HashMap::from([
            ("complexity_median".to_string(), complexity_median),
            ("complexity_mean".to_string(), complexity_mean),
            ("halstead_volume_mean".to_string(), halstead_volume_mean),
            ("delivered_bugs_sum".to_string(), delivered_bugs_sum),
        ]);
        (ticks, dimensions)
    }
}

/// Maps analyzer IDs to the extractor that knows how to read that
/// analyzer's `time_series` records. Built by the caller; the
/// enrichment pass never constructs one itself.
pub type ExtractorRegistry = HashMap<histolens_core::AnalyzerId, Box<dyn Extractor>>;

#[cfg(test)]
mod tests {
    use super::*;
    use histolens_store::{MemStore, Store};

    #[test]
    fn extracts_aligned_dimensions_from_well_formed_records() {
        let store = MemStore::new();
        let id = histolens_core::AnalyzerId::new("quality-metrics");
        let mut writer = store.begin(id.clone(), serde_json::json!({})).unwrap();
        for (tick, median) in [(0, 1.0), (1, 1.0), (2, 100.0)] {
            writer
                .write(
                    "time_series",
                    serde_json::json!({
                        "tick": tick,
                        "complexity_median": median,
                        "complexity_mean": median,
                        "halstead_volume_mean": 10.0,
                        "delivered_bugs_sum": 0.5,
                    }),
                )
                .unwrap();
        }
        writer.close().unwrap();

        let reader = store.open(&id).unwrap();
        let (ticks, dims) = QualityTimeSeriesExtractor.extract(reader.as_ref());
        assert_eq!(ticks, vec![0, 1, 2]);
        assert_eq!(dims["complexity_median"], vec![1.0, 1.0, 100.0]);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let store = MemStore::new();
        let id = histolens_core::AnalyzerId::new("quality-metrics");
        let mut writer = store.begin(id.clone(), serde_json::json!({})).unwrap();
        writer.write("time_series", serde_json::json!({"tick": 0})).unwrap();
        writer.close().unwrap();

        let reader = store.open(&id).unwrap();
        let (ticks, dims) = QualityTimeSeriesExtractor.extract(reader.as_ref());
        assert!(ticks.is_empty());
        assert!(dims["complexity_median"].is_empty());
    }
}
