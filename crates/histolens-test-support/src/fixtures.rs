//! Deterministic fixtures for the six worked end-to-end scenarios used
//! throughout the workspace's scenario tests.
//!
//! Each function returns plain data — callers build whatever analyzer- or
//! scheduler-specific type they need from it, keeping this crate free of
//! a dependency on any single downstream crate.

use std::collections::BTreeMap;

use histolens_core::{CommitHash, Tick};

use crate::harness::Harness;

/// One tick's worth of per-commit churn metrics, pre-aggregated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChurnTick {
    pub files_changed: f64,
    pub added: f64,
    pub removed: f64,
    pub net_churn: f64,
}

/// Scenario 1 ("stable then spike"): ticks 0..=9 each hold one commit with
/// `(filesChanged=5, added=20, removed=10, netChurn=10)`; tick 10 holds
/// `(filesChanged=200, added=5000, removed=50, netChurn=4950)`.
#[must_use]
pub fn stable_then_spike_ticks() -> Vec<ChurnTick> {
    let mut ticks: Vec<ChurnTick> = (0..10)
        .map(|_| ChurnTick {
            files_changed: 5.0,
            added: 20.0,
            removed: 10.0,
            net_churn: 10.0,
        })
        .collect();
    ticks.push(ChurnTick {
        files_changed: 200.0,
        added: 5000.0,
        removed: 50.0,
        net_churn: 4950.0,
    });
    ticks
}

/// Just the net-churn dimension of [`stable_then_spike_ticks`], the
/// dimension the scenario's anomaly assertion keys on.
#[must_use]
pub fn stable_then_spike_churn() -> Vec<f64> {
    stable_then_spike_ticks().iter().map(|t| t.net_churn).collect()
}

/// Scenario 2a ("identical values"): a flat series with no variance.
#[must_use]
pub fn identical_values() -> Vec<f64> {
    vec![10.0; 5]
}

/// Scenario 2b ("one step"): a flat series with a single step change at
/// the last index.
#[must_use]
pub fn identical_values_one_step() -> Vec<f64> {
    vec![10.0, 10.0, 10.0, 10.0, 50.0]
}

/// Scenario 3 ("classic spike"): a noisy baseline with one clear spike.
#[must_use]
pub fn classic_spike() -> Vec<f64> {
    vec![10.0, 12.0, 8.0, 11.0, 50.0, 9.0, 10.0]
}

/// Scenario 4 ("cross-analyzer enrichment"): the quality analyzer's
/// `complexity_median` time series an extractor would read, as
/// `(ticks, values)` aligned pairs.
#[must_use]
pub fn quality_complexity_median_series() -> (Vec<i64>, Vec<f64>) {
    (vec![0, 1, 2, 3, 4], vec![1.0, 1.0, 1.0, 1.0, 100.0])
}

/// Scenario 5 ("replan trigger") parameters: a declared per-commit growth
/// rate, the chunk size it produces, and the observed growth the driver
/// reports after the first chunk.
#[derive(Debug, Clone, Copy)]
pub struct ReplanScenario {
    pub declared_growth_bytes: u64,
    pub chunk_size: u64,
    pub observed_growth_bytes: u64,
}

#[must_use]
pub fn replan_trigger_scenario() -> ReplanScenario {
    ReplanScenario {
        declared_growth_bytes: 100 * 1024,
        chunk_size: 1000,
        observed_growth_bytes: 300 * 1024,
    }
}

/// Scenario 6 ("spill under pressure") parameters: a spill budget and a
/// batch of TCs, each on its own distinct tick, that together exceed it.
#[derive(Debug, Clone, Copy)]
pub struct SpillScenario {
    pub spill_budget_bytes: u64,
    pub tc_count: usize,
    pub payload_bytes: usize,
}

#[must_use]
pub fn spill_under_pressure_scenario() -> SpillScenario {
    SpillScenario {
        spill_budget_bytes: 1024 * 1024,
        tc_count: 100,
        payload_bytes: 20 * 1024,
    }
}

/// Build `n` distinct ticks, each mapped to one deterministic commit hash,
/// for the spill scenario (one TC per tick, as the scenario requires).
#[must_use]
pub fn distinct_tick_commit_hashes(harness: &Harness, n: usize) -> BTreeMap<Tick, CommitHash> {
    harness
        .commit_hashes(n)
        .into_iter()
        .enumerate()
        .map(|(i, hash)| (i as Tick, hash))
        .collect()
}
