//! Lock-free metrics primitives + the chunk driver's process-wide stats.
//!
//! Design goals:
//! - Hot-path recording: O(1), no allocations, no locks.
//! - Snapshotting: lock-free loads + derived quantiles (approx) for histograms.
//!
//! This is intentionally lightweight (std-only) so all crates can record metrics.

#![forbid(unsafe_code)]

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Counter {
    v: AtomicU64,
}

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.v.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store(&self, value: u64) {
        self.v.store(value, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct GaugeI64 {
    v: AtomicI64,
}

impl GaugeI64 {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn add(&self, delta: i64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.v.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> i64 {
        self.v.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct GaugeU64 {
    v: AtomicU64,
}

impl GaugeU64 {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn set(&self, value: u64) {
        self.v.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fetch_max(&self, value: u64) {
        let mut cur = self.v.load(Ordering::Relaxed);
        while value > cur {
            match self
                .v
                .compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(next) => cur = next,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Histogram (fixed-bucket log2)
// ---------------------------------------------------------------------------

const LOG2_BUCKETS: usize = 64;

#[derive(Debug)]
pub struct Log2Histogram {
    buckets: [AtomicU64; LOG2_BUCKETS],
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl Default for Log2Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Log2Histogram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record(&self, value: u64) {
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
        let idx = bucket_index(value);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        // count is written LAST with Release so that an Acquire load on count
        // in snapshot() establishes a happens-before edge for all prior writes.
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Reset all counters to their initial state.
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        // Acquire on count pairs with Release in record(), ensuring all prior
        // writes (sum, min, max, buckets) are visible.
        let count = self.count.load(Ordering::Acquire);
        if count == 0 {
            return HistogramSnapshot {
                count: 0,
                sum: 0,
                min: 0,
                max: 0,
                p50: 0,
                p95: 0,
                p99: 0,
            };
        }

        let buckets: [u64; LOG2_BUCKETS] =
            std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed));

        let raw_min = self.min.load(Ordering::Relaxed);
        let max = self.max.load(Ordering::Relaxed);
        // Clamp min <= max to maintain invariant even under concurrent races.
        let min = raw_min.min(max);
        let p50 = estimate_quantile_frac(&buckets, count, 1, 2, max);
        let p95 = estimate_quantile_frac(&buckets, count, 19, 20, max);
        let p99 = estimate_quantile_frac(&buckets, count, 99, 100, max);

        HistogramSnapshot {
            count,
            sum: self.sum.load(Ordering::Relaxed),
            min,
            max,
            p50,
            p95,
            p99,
        }
    }
}

#[inline]
const fn bucket_index(value: u64) -> usize {
    if value == 0 {
        return 0;
    }
    let lz = value.leading_zeros() as usize;
    // floor(log2(value)) in range 0..=63
    63usize.saturating_sub(lz)
}

const fn bucket_upper_bound(idx: usize) -> u64 {
    if idx >= 63 {
        return u64::MAX;
    }
    (1u64 << (idx + 1)).saturating_sub(1)
}

fn estimate_quantile_frac(
    buckets: &[u64; LOG2_BUCKETS],
    count: u64,
    numerator: u64,
    denominator: u64,
    observed_max: u64,
) -> u64 {
    debug_assert!(denominator > 0);
    // Nearest-rank method: smallest value x such that F(x) >= q.
    // rank is 1-indexed, clamp to [1, count]
    let numerator = numerator.min(denominator);
    let mut rank = count
        .saturating_mul(numerator)
        .saturating_add(denominator.saturating_sub(1))
        / denominator;
    rank = rank.clamp(1, count);

    let mut cumulative = 0u64;
    for (idx, c) in buckets.iter().copied().enumerate() {
        cumulative = cumulative.saturating_add(c);
        if cumulative >= rank {
            return bucket_upper_bound(idx).min(observed_max);
        }
    }
    // Should not happen unless counts race snapshot; return max as conservative fallback.
    observed_max
}

// ---------------------------------------------------------------------------
// Driver-wide stats (§4.7 `DriverStats`)
// ---------------------------------------------------------------------------

/// Process-wide counters for one chunk-driver run, exposed via
/// [`DriverStats::snapshot`] so §8 scenario 5 (`Stats().ReplanCount == 1`) is
/// directly observable.
#[derive(Debug, Default)]
pub struct DriverStats {
    pub commits_processed: Counter,
    pub chunks_completed: Counter,
    pub replan_count: Counter,
    pub spill_count: Counter,
    pub last_rss_bytes: GaugeU64,
    pub chunk_duration_us: Log2Histogram,
    /// Number of chunks after which sampled RSS crossed the 80% warning
    /// threshold (§4.6).
    pub memory_pressure_warnings: Counter,
    /// Number of chunks where the 90% threshold forced an early hibernate
    /// ahead of the next chunk's plan (§4.6).
    pub early_hibernate_count: Counter,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DriverStatsSnapshot {
    pub commits_processed: u64,
    pub chunks_completed: u64,
    pub replan_count: u64,
    pub spill_count: u64,
    pub last_rss_bytes: u64,
    pub chunk_duration_us: HistogramSnapshot,
    pub memory_pressure_warnings: u64,
    pub early_hibernate_count: u64,
}

impl DriverStats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            commits_processed: Counter::new(),
            chunks_completed: Counter::new(),
            replan_count: Counter::new(),
            spill_count: Counter::new(),
            last_rss_bytes: GaugeU64::new(),
            chunk_duration_us: Log2Histogram::new(),
            memory_pressure_warnings: Counter::new(),
            early_hibernate_count: Counter::new(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> DriverStatsSnapshot {
        DriverStatsSnapshot {
            commits_processed: self.commits_processed.load(),
            chunks_completed: self.chunks_completed.load(),
            replan_count: self.replan_count.load(),
            spill_count: self.spill_count.load(),
            last_rss_bytes: self.last_rss_bytes.load(),
            chunk_duration_us: self.chunk_duration_us.snapshot(),
            memory_pressure_warnings: self.memory_pressure_warnings.load(),
            early_hibernate_count: self.early_hibernate_count.load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2_bucket_indexing_smoke() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(1), 0);
        assert_eq!(bucket_index(2), 1);
        assert_eq!(bucket_index(3), 1);
        assert_eq!(bucket_index(4), 2);
        assert_eq!(bucket_index(7), 2);
        assert_eq!(bucket_index(8), 3);
    }

    #[test]
    fn histogram_snapshot_empty_is_zeros() {
        let h = Log2Histogram::new();
        let snap = h.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.min, 0);
        assert_eq!(snap.p99, 0);
    }

    #[test]
    fn histogram_quantiles_are_monotonic() {
        let h = Log2Histogram::new();
        for v in [1u64, 2, 3, 4, 10, 100, 1000, 10_000] {
            h.record(v);
        }
        let snap = h.snapshot();
        assert!(snap.p50 <= snap.p95);
        assert!(snap.p95 <= snap.p99);
        assert!(snap.max >= snap.p99);
    }

    #[test]
    fn histogram_min_max_clamped_invariant() {
        use std::sync::Arc;
        use std::thread;

        let h = Arc::new(Log2Histogram::new());

        let h1 = Arc::clone(&h);
        let t1 = thread::spawn(move || {
            h1.record(1000);
        });
        let h2 = Arc::clone(&h);
        let t2 = thread::spawn(move || {
            h2.record(1);
        });
        t1.join().unwrap();
        t2.join().unwrap();

        let snap = h.snapshot();
        assert!(
            snap.min <= snap.max,
            "Invariant violated: min={} > max={}",
            snap.min,
            snap.max
        );
        assert_eq!(snap.count, 2);
    }

    #[test]
    fn driver_stats_snapshot_reflects_counters() {
        let stats = DriverStats::new();
        stats.commits_processed.add(120);
        stats.chunks_completed.add(3);
        stats.replan_count.inc();
        stats.spill_count.add(2);
        stats.last_rss_bytes.set(512 * 1024 * 1024);
        stats.chunk_duration_us.record(5_000);

        let snap = stats.snapshot();
        assert_eq!(snap.commits_processed, 120);
        assert_eq!(snap.chunks_completed, 3);
        assert_eq!(snap.replan_count, 1);
        assert_eq!(snap.spill_count, 2);
        assert_eq!(snap.last_rss_bytes, 512 * 1024 * 1024);
        assert_eq!(snap.chunk_duration_us.count, 1);
    }

    #[test]
    fn driver_stats_json_round_trips() {
        let stats = DriverStats::new();
        stats.replan_count.inc();
        let snap = stats.snapshot();
        let json = serde_json::to_string(&snap).expect("snapshot should serialize");
        assert!(json.contains("\"replan_count\":1"));
    }
}
