//! Chunk-at-a-time execution driver (C7).
//!
//! Obtains a plan from the scheduler, forks an analyzer across a fixed-size
//! worker pool for each chunk, merges clones and feeds their TCs into the
//! analyzer's tick aggregator, hibernates between chunks, and reports
//! observed growth to the adaptive replanner. After the final chunk the
//! aggregator is drained and the analyzer's report is written to the
//! store. A chunk-loop iteration also samples process RSS against the
//! configured memory budget: 80% logs a warning, 90% ends the run after
//! the current chunk's hibernate instead of starting another. Cancelling
//! between chunks drains and writes whatever the aggregator already holds
//! before returning `Error::Cancelled`, so the store reflects every chunk
//! that completed its merge.
//!
//! Concurrency uses a `std::thread::scope` worker pool: no async
//! runtime, a bounded set of spawned threads per chunk, sequential
//! joins.

#![forbid(unsafe_code)]

use std::time::Duration;

use serde_json::json;

use histolens_aggregator::TickAggregator;
use histolens_analyzer::{Analyzer, AnalyzerDescriptor, CommitContext};
use histolens_core::{
    memory::{sample_memory, MemoryPressure, MemoryThresholds},
    metrics::DriverStats,
    model::{CancellationToken, Commit, CommitSource, PlumbingProvider},
    Error, Result, Tick, Timestamp,
};
use histolens_scheduler::{plan, AdaptiveReplanner, PlanRequest};
use histolens_store::Store;

/// Default tick width (§3 "Tick"): 24 hours.
pub const DEFAULT_TICK_SIZE: Duration = Duration::from_secs(24 * 60 * 60);

/// Worker pool size, budget, and tick-width knobs for one driver run.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Number of threads used to parallelize `Consume` within a chunk.
    pub worker_count: usize,
    /// Total memory budget passed to the scheduler; `None` means
    /// unlimited (§4.5 "unlimited-budget" path).
    pub memory_budget_bytes: Option<u64>,
    /// Fixed overhead subtracted from the budget before the three-region
    /// split; `None` uses the scheduler's default.
    pub pipeline_overhead_bytes: Option<u64>,
    /// Cap on in-flight aggregator state before it spills to the store.
    pub spill_budget_bytes: u64,
    /// Upper bound on the scheduler's buffering factor search.
    pub max_buffering: u64,
    /// Width of one tick bucket.
    pub tick_size: Duration,
}

impl DriverConfig {
    /// Sensible defaults: available-parallelism worker count, the given
    /// memory budget, a 10% spill budget, and a 24-hour tick.
    #[must_use]
    pub fn new(memory_budget_bytes: Option<u64>) -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            worker_count,
            memory_budget_bytes,
            pipeline_overhead_bytes: None,
            spill_budget_bytes: memory_budget_bytes.unwrap_or(0) / 10,
            max_buffering: PlanRequest::default_max_buffering(),
            tick_size: DEFAULT_TICK_SIZE,
        }
    }
}

/// Integer tick bucket for `commit`, measured from `first_timestamp` in
/// units of `tick_size` (§3 "Tick").
#[must_use]
pub fn tick_for(commit: &Commit, first_timestamp: Timestamp, tick_size: Duration) -> Tick {
    let delta_micros = commit.timestamp.to_unix_micros() - first_timestamp.to_unix_micros();
    #[allow(clippy::cast_possible_wrap)]
    let tick_size_micros = tick_size.as_micros() as i64;
    if tick_size_micros <= 0 {
        return 0;
    }
    delta_micros.div_euclid(tick_size_micros)
}

/// One chunk's heap/aggregator measurements, used to derive a
/// [`histolens_scheduler::ReplanObservation`] after merge + hibernate.
struct ChunkMeasurement {
    working_state_bytes: u64,
    agg_resident_bytes: u64,
}

fn measure<A: Analyzer>(
    analyzer: &A,
    aggregator: &TickAggregator<A::Payload, A::Accumulator, A::TickData>,
) -> ChunkMeasurement {
    ChunkMeasurement {
        working_state_bytes: analyzer.working_state_size(),
        agg_resident_bytes: aggregator.resident_bytes(),
    }
}

/// Drains the aggregator and writes the analyzer's canonical report to the
/// store. Shared by the end-of-run path and the cancellation path, since
/// both leave the store in the same consistent, reportable state.
fn drain_and_report<A: Analyzer>(
    analyzer: &A,
    aggregator: &TickAggregator<A::Payload, A::Accumulator, A::TickData>,
    store: &dyn Store,
    descriptor: &AnalyzerDescriptor,
) -> Result<A::Report> {
    let ticks = aggregator.drain(store)?;
    let report = analyzer.report_from_ticks(&ticks);

    let mut writer = store.begin(descriptor.id.clone(), json!({ "analyzer": descriptor.name }))?;
    analyzer.write_report(&report, writer.as_mut())?;
    writer.close()?;

    Ok(report)
}

/// Run one analyzer over the commits `source` provides, from plan through
/// final report, against `store`.
///
/// # Errors
/// Returns [`Error::Cancelled`] if `cancellation` is set between chunks.
/// If at least one chunk has already merged and hibernated, the
/// aggregator is drained and the report written before the error is
/// returned, so the store still reflects that work; a cancellation seen
/// before the first chunk completes skips the drain entirely. Any
/// store/analyzer error encountered along the way is propagated as-is.
/// Per-commit failures never surface here — they are swallowed as empty
/// TCs per the analyzer contract.
pub fn run<A>(
    mut analyzer: A,
    source: &dyn CommitSource,
    plumbing: &dyn PlumbingProvider<Plumbing = A::Plumbing>,
    store: &dyn Store,
    config: &DriverConfig,
    cancellation: &CancellationToken,
    stats: &DriverStats,
) -> Result<A::Report>
where
    A: Analyzer,
{
    let descriptor = analyzer.descriptor();
    let commits = source.commits()?;
    let total_commits = commits.len();
    let first_timestamp = commits.first().map_or(Timestamp::from_unix_micros(0), |c| c.timestamp);

    let declared_growth_bytes = analyzer.working_state_size() + analyzer.avg_tc_size();
    let base_request = PlanRequest {
        total_commits,
        budget_bytes: config.memory_budget_bytes,
        pipeline_overhead_bytes: config.pipeline_overhead_bytes,
        declared_growth_bytes: Some(declared_growth_bytes),
        max_buffering: config.max_buffering.max(1),
    };
    let initial_plan = plan(&base_request);

    let aggregator = analyzer.new_aggregator(config.spill_budget_bytes);
    let replanner = AdaptiveReplanner::new();

    let mut chunks = initial_plan.chunks;
    let mut solved_growth_bytes = initial_plan.solved_growth_bytes;
    let mut chunk_index = 0usize;

    while chunk_index < chunks.len() {
        if cancellation.is_cancelled() {
            if chunk_index > 0 {
                tracing::warn!(
                    chunks_completed = chunk_index,
                    "cancellation requested, draining pending work before aborting"
                );
                drain_and_report(&analyzer, &aggregator, store, &descriptor)?;
            } else {
                tracing::warn!("cancellation requested before any chunk completed, aborting with nothing to drain");
            }
            return Err(Error::Cancelled);
        }

        let bounds = chunks[chunk_index];
        let before = measure(&analyzer, &aggregator);

        tracing::debug!(
            chunk_index,
            chunk_start = bounds.start,
            chunk_end = bounds.end,
            "starting chunk"
        );

        let tcs = run_chunk_workers(
            &mut analyzer,
            &commits[bounds.start..bounds.end],
            plumbing,
            first_timestamp,
            config,
            cancellation,
        )?;

        let tc_count = tcs.len();
        for tc in tcs {
            if !tc.is_empty() {
                aggregator.ingest(store, tc)?;
            }
        }

        stats.commits_processed.add(bounds.len() as u64);
        stats.chunks_completed.inc();

        let mut pressure_critical = false;
        if let Some(budget) = config.memory_budget_bytes {
            let sample = sample_memory(MemoryThresholds::from_budget_bytes(budget));
            if let Some(rss) = sample.rss_bytes {
                stats.last_rss_bytes.set(rss);
            }
            match sample.pressure {
                MemoryPressure::Ok => {}
                MemoryPressure::Warning => {
                    stats.memory_pressure_warnings.inc();
                    tracing::warn!(
                        rss_bytes = sample.rss_bytes,
                        budget_bytes = budget,
                        "memory pressure above warning threshold"
                    );
                }
                MemoryPressure::Critical | MemoryPressure::Fatal => {
                    stats.memory_pressure_warnings.inc();
                    stats.early_hibernate_count.inc();
                    pressure_critical = true;
                    tracing::warn!(
                        rss_bytes = sample.rss_bytes,
                        budget_bytes = budget,
                        pressure = sample.pressure.label(),
                        "memory pressure above critical threshold, hibernating early and skipping remaining chunks"
                    );
                }
            }
        }

        let hibernated = analyzer.hibernate()?;

        let after = measure(&analyzer, &aggregator);
        let commits_processed = bounds.len() as u64;
        #[allow(clippy::cast_possible_wrap)]
        let tc_payload_delta_bytes = tc_count as i64 * analyzer.avg_tc_size() as i64;
        let observation = histolens_scheduler::ReplanObservation {
            commits_processed,
            working_state_delta_bytes: after.working_state_bytes as i64 - before.working_state_bytes as i64,
            tc_payload_delta_bytes,
            agg_state_delta_bytes: after.agg_resident_bytes as i64 - before.agg_resident_bytes as i64,
        };

        if let Some(new_tail) = replanner.observe(&observation, solved_growth_bytes, &base_request, bounds.end) {
            chunks.truncate(chunk_index + 1);
            chunks.extend(new_tail);
            stats.replan_count.store(replanner.replan_count());
            tracing::info!(
                replan_count = replanner.replan_count(),
                next_chunk_start = bounds.end,
                remaining_commits = total_commits.saturating_sub(bounds.end),
                "replanning remaining chunks"
            );
            let tail_request = PlanRequest {
                total_commits: total_commits.saturating_sub(bounds.end),
                ..base_request.clone()
            };
            solved_growth_bytes = plan(&tail_request).solved_growth_bytes;
        }

        if pressure_critical {
            // Critical memory pressure wins over any replan-driven tail:
            // this chunk is the last one regardless of what the replanner
            // just scheduled.
            chunks.truncate(chunk_index + 1);
        }

        analyzer.boot(&hibernated)?;
        tracing::debug!(
            chunk_index,
            hibernated_bytes = hibernated.len(),
            "chunk complete: hibernated and booted"
        );
        chunk_index += 1;
    }

    tracing::info!(chunks_completed = chunk_index, "run complete, writing final report");
    let report = drain_and_report(&analyzer, &aggregator, store, &descriptor)?;
    Ok(report)
}

/// Fork `analyzer` across `config.worker_count` threads, each consuming a
/// contiguous sub-slice of `commits`, and merge the clones back in.
fn run_chunk_workers<A>(
    analyzer: &mut A,
    commits: &[Commit],
    plumbing: &dyn PlumbingProvider<Plumbing = A::Plumbing>,
    first_timestamp: Timestamp,
    config: &DriverConfig,
    cancellation: &CancellationToken,
) -> Result<Vec<histolens_core::Tc<A::Payload>>>
where
    A: Analyzer,
{
    if commits.is_empty() {
        return Ok(Vec::new());
    }

    let worker_count = config.worker_count.max(1).min(commits.len());
    let slice_len = commits.len().div_ceil(worker_count);
    let slices: Vec<&[Commit]> = commits.chunks(slice_len).collect();
    let clones: Vec<A> = slices.iter().map(|_| analyzer.fork()).collect();

    let results: Vec<Result<(A, Vec<histolens_core::Tc<A::Payload>>)>> = std::thread::scope(|scope| {
        let handles: Vec<_> = clones
            .into_iter()
            .zip(slices.iter())
            .map(|(mut clone, slice)| {
                scope.spawn(move || {
                    let mut tcs = Vec::with_capacity(slice.len());
                    for commit in slice.iter() {
                        if cancellation.is_cancelled() {
                            break;
                        }
                        let resolved = plumbing.resolve(commit)?;
                        let tick = tick_for(commit, first_timestamp, config.tick_size);
                        let ctx = CommitContext {
                            commit,
                            plumbing: &resolved,
                            tick,
                            cancellation,
                        };
                        if let Some(tc) = clone.consume(&ctx) {
                            tcs.push(tc);
                        }
                    }
                    Ok((clone, tcs))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("consume worker thread panicked"))
            .collect()
    });

    let mut all_tcs = Vec::new();
    for result in results {
        let (clone, tcs) = result?;
        analyzer.merge(clone);
        all_tcs.extend(tcs);
    }
    Ok(all_tcs)
}
