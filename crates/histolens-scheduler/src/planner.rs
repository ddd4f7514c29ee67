//! Chunk-size planner (C5): decomposes a memory budget into three
//! regions and solves for a chunk size and buffering factor that keep
//! resident analyzer state inside the `workState` region.

/// Fraction of the total budget treated as usable; the rest is slack.
pub const SLACK_FRACTION: f64 = 0.95;
/// Fallback pipeline overhead (worker caches, buffers, runtime floor)
/// when the caller supplies none.
pub const DEFAULT_PIPELINE_OVERHEAD_BYTES: u64 = 400 * 1024 * 1024;
/// Share of the post-overhead remainder reserved for analyzer resident
/// state.
pub const WORK_STATE_FRACTION: f64 = 0.60;
/// Share reserved as the per-analyzer aggregator spill ceiling.
pub const AGG_STATE_FRACTION: f64 = 0.30;
/// Share reserved for the in-flight TC backlog (informational only).
pub const CHUNK_MEM_FRACTION: f64 = 0.10;
/// Fallback declared per-commit growth when the caller supplies none.
pub const DEFAULT_GROWTH_BYTES: u64 = 500 * 1024;
/// Safety margin applied to declared growth to absorb transient
/// per-commit allocations that scale with chunk size.
pub const SAFETY_MARGIN: f64 = 1.5;
/// Upper bound on chunk size regardless of budget.
pub const MAX_CHUNK_SIZE: u64 = 3000;
/// Lower bound on chunk size the solver will accept.
pub const MIN_CHUNK_SIZE: u64 = 50;

/// The three memory regions a budget is split into after slack and
/// pipeline overhead are removed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BudgetRegions {
    pub work_state_bytes: u64,
    pub agg_state_bytes: u64,
    pub chunk_mem_bytes: u64,
}

impl BudgetRegions {
    /// Decompose `total_budget_bytes` into the three regions, after
    /// reserving [`SLACK_FRACTION`] and subtracting `pipeline_overhead_bytes`
    /// (or [`DEFAULT_PIPELINE_OVERHEAD_BYTES`] if unset).
    #[must_use]
    pub fn decompose(total_budget_bytes: u64, pipeline_overhead_bytes: Option<u64>) -> Self {
        let usable = (total_budget_bytes as f64 * SLACK_FRACTION) as u64;
        let overhead = pipeline_overhead_bytes.unwrap_or(DEFAULT_PIPELINE_OVERHEAD_BYTES);
        let remainder = usable.saturating_sub(overhead);
        #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
        let scale = |fraction: f64| (remainder as f64 * fraction) as u64;
        Self {
            work_state_bytes: scale(WORK_STATE_FRACTION),
            agg_state_bytes: scale(AGG_STATE_FRACTION),
            chunk_mem_bytes: scale(CHUNK_MEM_FRACTION),
        }
    }
}

/// A half-open `[start, end)` range of commit indices processed as one
/// chunk between hibernate/boot boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkBounds {
    pub start: usize,
    pub end: usize,
}

impl ChunkBounds {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Parameters for one planning pass, covering both the initial plan and
/// every subsequent replan of the tail.
#[derive(Clone, Debug)]
pub struct PlanRequest {
    pub total_commits: usize,
    /// `None` means an unlimited (unbudgeted) run.
    pub budget_bytes: Option<u64>,
    pub pipeline_overhead_bytes: Option<u64>,
    pub declared_growth_bytes: Option<u64>,
    /// Maximum number of concurrent chunks' worth of working-state memory
    /// the solver may provision for pipelining.
    pub max_buffering: u64,
}

impl PlanRequest {
    /// A `max_buffering` derived from the available parallelism, clamped
    /// to at least 1. A reasonable default absent an explicit caller
    /// preference.
    #[must_use]
    pub fn default_max_buffering() -> u64 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u64)
            .unwrap_or(1)
            .max(1)
    }
}

/// The output of a planning pass: chunk bounds plus the parameters that
/// produced them.
#[derive(Clone, Debug)]
pub struct ChunkPlan {
    pub chunks: Vec<ChunkBounds>,
    pub chunk_size: u64,
    pub buffering_factor: u64,
    pub agg_spill_budget_bytes: u64,
    /// The inflated growth figure (`g × `[`SAFETY_MARGIN`]) this plan was
    /// solved against — the replanner's divergence check compares
    /// smoothed observations against this value.
    pub solved_growth_bytes: f64,
}

/// Produce a chunk plan for `req`. An unlimited budget (`budget_bytes ==
/// None`) yields a single chunk covering the whole history, sized at
/// [`MAX_CHUNK_SIZE`] (or smaller if the history is shorter).
#[must_use]
pub fn plan(req: &PlanRequest) -> ChunkPlan {
    let Some(budget_bytes) = req.budget_bytes else {
        let chunk_size = MAX_CHUNK_SIZE.min(req.total_commits as u64);
        return ChunkPlan {
            chunks: vec![ChunkBounds {
                start: 0,
                end: req.total_commits,
            }],
            chunk_size,
            buffering_factor: req.max_buffering.max(1),
            agg_spill_budget_bytes: 0,
            solved_growth_bytes: 0.0,
        };
    };

    let regions = BudgetRegions::decompose(budget_bytes, req.pipeline_overhead_bytes);
    let (chunk_size, buffering_factor, solved_growth_bytes) =
        solve_chunk_size(regions.work_state_bytes, req.declared_growth_bytes, req.max_buffering);

    tracing::debug!(
        chunk_size,
        buffering_factor,
        work_state_bytes = regions.work_state_bytes,
        agg_state_bytes = regions.agg_state_bytes,
        "solved chunk plan"
    );

    ChunkPlan {
        chunks: chunks_from_size(req.total_commits, chunk_size),
        chunk_size,
        buffering_factor,
        agg_spill_budget_bytes: regions.agg_state_bytes,
        solved_growth_bytes,
    }
}

/// Solves `cs = workState / (b·G)` for the highest buffering factor `b`
/// in `[max_buffering ..= 1]` whose chunk size clears [`MIN_CHUNK_SIZE`],
/// capping `cs` at [`MAX_CHUNK_SIZE`]. Falls back to `(MIN_CHUNK_SIZE, 1)`
/// if no buffering factor qualifies. Returns `(chunk_size, buffering_factor,
/// solved_growth_bytes)` where `solved_growth_bytes` is `g × SAFETY_MARGIN`.
fn solve_chunk_size(
    work_state_bytes: u64,
    declared_growth_bytes: Option<u64>,
    max_buffering: u64,
) -> (u64, u64, f64) {
    let g = declared_growth_bytes.unwrap_or(DEFAULT_GROWTH_BYTES);
    #[allow(clippy::cast_precision_loss)]
    let big_g = g as f64 * SAFETY_MARGIN;
    let max_buffering = max_buffering.max(1);

    for b in (1..=max_buffering).rev() {
        #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let cs = ((work_state_bytes as f64 / (b as f64 * big_g)) as u64).min(MAX_CHUNK_SIZE);
        if cs >= MIN_CHUNK_SIZE {
            return (cs, b, big_g);
        }
    }
    (MIN_CHUNK_SIZE, 1, big_g)
}

/// Partitions `[0, total_commits)` into contiguous chunks of `chunk_size`.
/// A final remainder shorter than [`MIN_CHUNK_SIZE`] is folded into the
/// preceding chunk instead of standing alone, so every chunk but possibly
/// the first satisfies the minimum-size testable property.
fn chunks_from_size(total_commits: usize, chunk_size: u64) -> Vec<ChunkBounds> {
    if total_commits == 0 {
        return vec![ChunkBounds { start: 0, end: 0 }];
    }
    let cs = (chunk_size.max(1) as usize).min(total_commits.max(1));
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total_commits {
        let end = (start + cs).min(total_commits);
        chunks.push(ChunkBounds { start, end });
        start = end;
    }
    if chunks.len() > 1 {
        let last_len = chunks[chunks.len() - 1].len();
        if last_len < MIN_CHUNK_SIZE as usize {
            let last = chunks.pop().expect("len > 1");
            chunks.last_mut().expect("len > 1").end = last.end;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn req(total_commits: usize, budget_bytes: u64, declared_growth_bytes: u64) -> PlanRequest {
        PlanRequest {
            total_commits,
            budget_bytes: Some(budget_bytes),
            pipeline_overhead_bytes: None,
            declared_growth_bytes: Some(declared_growth_bytes),
            max_buffering: 4,
        }
    }

    #[test]
    fn unlimited_budget_is_one_chunk() {
        let r = PlanRequest {
            total_commits: 100,
            budget_bytes: None,
            pipeline_overhead_bytes: None,
            declared_growth_bytes: None,
            max_buffering: 4,
        };
        let p = plan(&r);
        assert_eq!(p.chunks, vec![ChunkBounds { start: 0, end: 100 }]);
        assert_eq!(p.chunk_size, 100);
        assert_eq!(p.agg_spill_budget_bytes, 0);
    }

    #[test]
    fn unlimited_budget_caps_chunk_size_at_max() {
        let r = PlanRequest {
            total_commits: 10_000,
            budget_bytes: None,
            pipeline_overhead_bytes: None,
            declared_growth_bytes: None,
            max_buffering: 4,
        };
        let p = plan(&r);
        assert_eq!(p.chunk_size, MAX_CHUNK_SIZE);
    }

    #[test]
    fn bounded_plan_chunks_cover_exactly_the_history() {
        let p = plan(&req(10_000, 2 * 1024 * 1024 * 1024, 100 * 1024));
        let covered: usize = p.chunks.iter().map(ChunkBounds::len).sum();
        assert_eq!(covered, 10_000);
        assert_eq!(p.chunks.first().unwrap().start, 0);
        assert_eq!(p.chunks.last().unwrap().end, 10_000);
    }

    #[test]
    fn chunk_sizes_respect_bounds() {
        let p = plan(&req(50_000, 512 * 1024 * 1024, 200 * 1024));
        for chunk in &p.chunks {
            assert!(chunk.len() as u64 <= MAX_CHUNK_SIZE);
        }
        assert!(p.chunk_size >= MIN_CHUNK_SIZE);
        assert!(p.chunk_size <= MAX_CHUNK_SIZE);
    }

    #[test]
    fn no_qualifying_buffering_factor_falls_back() {
        // Tiny work-state region forces the b=1, cs=MinChunkSize fallback.
        let (cs, b, _) = solve_chunk_size(1, Some(1024 * 1024 * 1024), 8);
        assert_eq!(cs, MIN_CHUNK_SIZE);
        assert_eq!(b, 1);
    }

    #[test]
    fn empty_history_yields_one_empty_chunk() {
        let p = plan(&req(0, 1024 * 1024 * 1024, 500 * 1024));
        assert_eq!(p.chunks, vec![ChunkBounds { start: 0, end: 0 }]);
    }

    #[test]
    fn tail_remainder_below_minimum_merges_into_predecessor() {
        let chunks = chunks_from_size(1010, 500);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], ChunkBounds { start: 0, end: 500 });
        assert_eq!(chunks[1], ChunkBounds { start: 500, end: 1010 });
    }

    proptest! {
        #![proptest_config(histolens_test_support::generators::proptest_config())]

        /// §8: every chunk a bounded plan produces is no larger than
        /// `MaxChunkSize`, and every chunk but possibly the last (which
        /// absorbs a sub-minimum remainder) is no smaller than
        /// `MinChunkSize`.
        #[test]
        fn bounded_plans_respect_chunk_size_bounds(
            total_commits in 1_000usize..200_000,
            budget_bytes in (512u64 * 1024 * 1024)..(16 * 1024 * 1024 * 1024),
            growth_bytes in 1u64..(2 * 1024 * 1024),
        ) {
            let p = plan(&req(total_commits, budget_bytes, growth_bytes));
            let covered: usize = p.chunks.iter().map(ChunkBounds::len).sum();
            prop_assert_eq!(covered, total_commits);
            for chunk in &p.chunks {
                prop_assert!(chunk.len() as u64 <= MAX_CHUNK_SIZE);
            }
            for chunk in &p.chunks[..p.chunks.len() - 1] {
                prop_assert!(chunk.len() as u64 >= MIN_CHUNK_SIZE);
            }
        }
    }
}
