//! The analyzer contract (C3): the lifecycle every per-commit analyzer
//! implements — Descriptor, Configure, Initialize, Fork/Consume/Merge,
//! Snapshot-Apply-Release, Hibernate/Boot, and the aggregator/report
//! handoff at the end of a run.
//!
//! Two concrete analyzers live downstream of this crate: the temporal
//! anomaly detector and the quality-metrics aggregator. Both implement
//! [`Analyzer`] rather than being special-cased by the driver.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use histolens_aggregator::TickAggregator;
use histolens_core::{AnalyzerId, CancellationToken, Commit, ConfigValue, Result, Tc, Tick, TickRecord};
use histolens_store::Writer;

/// Static identity of an analyzer, reported once at registration and used
/// as the store namespace and report key prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalyzerDescriptor {
    pub id: AnalyzerId,
    pub name: String,
}

impl AnalyzerDescriptor {
    #[must_use]
    pub fn new(id: impl Into<AnalyzerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The immutable, per-commit argument `Consume` receives: the commit
/// itself, whatever the plumbing provider resolved for it (tree diff
/// stats, line stats, identity, languages), the tick it falls in, and the
/// run's cancellation handle. Analyzers retain none of this beyond the
/// call — all state lives in the payload they return.
pub struct CommitContext<'a, P> {
    pub commit: &'a Commit,
    pub plumbing: &'a P,
    pub tick: Tick,
    pub cancellation: &'a CancellationToken,
}

/// The per-commit analyzer contract.
///
/// An analyzer instance is created, `configure`d (idempotent), then
/// `initialize`d once. For each chunk it is `fork`ed into N worker clones;
/// each clone's `consume` is called once per commit it owns, and the
/// clones are folded back with `merge` at chunk end. Between chunks
/// `hibernate`/`boot` compress and restore resident state; after the
/// final chunk `new_aggregator`/`report_from_ticks` turn the accumulated
/// TICKs into the analyzer's report.
pub trait Analyzer: Send {
    /// Per-commit payload type this analyzer's `Consume` emits.
    type Payload: Send + 'static;
    /// Per-tick accumulator type the tick aggregator folds TCs into.
    type Accumulator: Send + serde::Serialize + serde::de::DeserializeOwned;
    /// Per-tick data the accumulator is reduced to at drain time.
    type TickData: Send;
    /// Whatever the plumbing provider resolves for a commit, as consumed
    /// by this analyzer.
    type Plumbing;
    /// The analyzer's final, canonical output.
    type Report;

    /// Static identity: store namespace and report key prefix.
    fn descriptor(&self) -> AnalyzerDescriptor;

    /// Apply configuration facts. Idempotent: `configure(f); configure(f)`
    /// is equivalent to one call. Out-of-range scalar values are silently
    /// clamped to defaults; only a missing required fact with no default
    /// is an error.
    ///
    /// # Errors
    /// [`histolens_core::Error::InvalidConfig`] for a structural
    /// configuration problem.
    fn configure(&mut self, facts: &HashMap<String, ConfigValue>) -> Result<()>;

    /// One-time setup after the final `configure`. Default is a no-op.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Produce an independent worker clone for a chunk's parallel
    /// consumption. Clones share no mutable state; each accumulates
    /// independently until folded back by `merge`.
    fn fork(&self) -> Self
    where
        Self: Sized;

    /// Process one commit, returning its TC. Per-commit failures are
    /// swallowed — return `None` (or a TC with a zero hash/nil payload)
    /// rather than an error.
    fn consume(&mut self, ctx: &CommitContext<'_, Self::Plumbing>) -> Option<Tc<Self::Payload>>;

    /// Fold a sibling worker clone's state into `self` at chunk end.
    fn merge(&mut self, other: Self)
    where
        Self: Sized;

    /// Serialize the shared plumbing inputs that must survive a
    /// hibernate/boot cycle. Default is empty (no shared plumbing state).
    fn snapshot_plumbing(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restore plumbing inputs from a prior `snapshot_plumbing`. Default
    /// is a no-op.
    fn apply_snapshot(&mut self, _snapshot: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Release the resources `apply_snapshot` restored, once the boot
    /// cycle is complete. Default is a no-op.
    fn release_snapshot(&mut self) {}

    /// Compress resident state to its minimal between-chunk footprint,
    /// returning the bytes `boot` will later restore.
    ///
    /// # Errors
    /// Implementation-defined serialization failures.
    fn hibernate(&mut self) -> Result<Vec<u8>>;

    /// Restore state from a prior `hibernate` call at the start of the
    /// next chunk.
    ///
    /// # Errors
    /// Implementation-defined deserialization failures.
    fn boot(&mut self, state: &[u8]) -> Result<()>;

    /// Conservative estimate, in bytes, of this analyzer's currently
    /// resident working state (excluding aggregator accumulators). Feeds
    /// the scheduler's chunk-size solve and the replanner's growth
    /// measurement.
    fn working_state_size(&self) -> u64;

    /// Conservative estimate, in bytes, of one TC's resident footprint.
    /// Used by the scheduler to size the in-flight TC backlog.
    fn avg_tc_size(&self) -> u64;

    /// Build a fresh tick aggregator wired to this analyzer's
    /// `extractTC`/`mergeState`/`sizeState`/`buildTick` callbacks, bounded
    /// by `spill_budget_bytes` (`0` disables spilling).
    fn new_aggregator(
        &self,
        spill_budget_bytes: u64,
    ) -> TickAggregator<Self::Payload, Self::Accumulator, Self::TickData>;

    /// Materialize the final report from the aggregator's drained TICKs,
    /// in ascending tick order.
    fn report_from_ticks(&self, ticks: &[TickRecord<Self::TickData>]) -> Self::Report;

    /// Write a completed report to the store writer attached to this
    /// analyzer's slot. Only the analyzer knows its own record kinds and
    /// their JSON shape, so the driver hands the report off rather than
    /// serializing it generically.
    ///
    /// # Errors
    /// Propagates the writer's [`histolens_core::Error::StoreIo`].
    fn write_report(&self, report: &Self::Report, writer: &mut dyn Writer) -> Result<()>;
}
