//! Statistics kernel (C1) and spill-aware tick aggregator (C2) for the
//! history-analytics streaming core.

#![forbid(unsafe_code)]

pub mod stats;
pub mod tick_aggregator;

pub use stats::{max, mean_stddev, median, min, percentile, sum, z_scores, SENTINEL};
pub use tick_aggregator::TickAggregator;
