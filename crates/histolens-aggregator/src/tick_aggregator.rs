//! Tick aggregator (C2): absorbs a stream of TCs for one analyzer and
//! yields an ordered sequence of TICKs, spilling oversized accumulators
//! to the store under a well-known kind prefix.

use std::collections::{BTreeMap, BTreeSet};

use histolens_core::{AnalyzerId, Error, LockLevel, OrderedMutex, Result, Tc, Tick, TickRecord};
use histolens_store::{Store, Writer};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

/// Kind prefix under which spilled accumulators are staged in the store.
/// Not a canonical report kind — internal to the aggregator and never
/// read back by anything but the aggregator itself.
const SPILL_KIND: &str = "__tick_aggregator_spill";

struct AggregatorState<S> {
    resident: BTreeMap<Tick, S>,
    spilled: BTreeSet<Tick>,
    resident_bytes: u64,
    drained: bool,
}

/// Absorbs TCs for one analyzer and produces TICKs at drain time.
///
/// Generic over the TC payload `P`, the per-tick accumulator `S`, and the
/// TICK payload `D` the analyzer's `build_tick` callback produces.
pub struct TickAggregator<P, S, D> {
    analyzer_id: AnalyzerId,
    spill_budget_bytes: u64,
    new_state: Box<dyn Fn() -> S + Send + Sync>,
    extract_tc: Box<dyn Fn(&Tc<P>, &mut S) + Send + Sync>,
    merge_state: Box<dyn Fn(S, S) -> S + Send + Sync>,
    size_state: Box<dyn Fn(&S) -> u64 + Send + Sync>,
    build_tick: Box<dyn Fn(Tick, S) -> TickRecord<D> + Send + Sync>,
    state: OrderedMutex<AggregatorState<S>>,
}

impl<P, S, D> TickAggregator<P, S, D>
where
    S: Serialize + DeserializeOwned,
{
    /// Builds a new aggregator for `analyzer_id`. `spill_budget_bytes == 0`
    /// disables spilling entirely — all accumulators stay resident.
    pub fn new(
        analyzer_id: AnalyzerId,
        spill_budget_bytes: u64,
        new_state: impl Fn() -> S + Send + Sync + 'static,
        extract_tc: impl Fn(&Tc<P>, &mut S) + Send + Sync + 'static,
        merge_state: impl Fn(S, S) -> S + Send + Sync + 'static,
        size_state: impl Fn(&S) -> u64 + Send + Sync + 'static,
        build_tick: impl Fn(Tick, S) -> TickRecord<D> + Send + Sync + 'static,
    ) -> Self {
        Self {
            analyzer_id,
            spill_budget_bytes,
            new_state: Box::new(new_state),
            extract_tc: Box::new(extract_tc),
            merge_state: Box::new(merge_state),
            size_state: Box::new(size_state),
            build_tick: Box::new(build_tick),
            state: OrderedMutex::new(
                LockLevel::AggregatorAccumulators,
                AggregatorState {
                    resident: BTreeMap::new(),
                    spilled: BTreeSet::new(),
                    resident_bytes: 0,
                    drained: false,
                },
            ),
        }
    }

    /// Ingests one TC. A TC with a zero commit hash or an absent payload is
    /// discarded without error (§3 invariant). Accepts TCs in arbitrary
    /// order.
    ///
    /// # Errors
    /// [`Error::StoreClosed`] if called after [`Self::drain`]; a store
    /// error if spilling the resulting oversized accumulator set fails.
    pub fn ingest(&self, store: &dyn Store, tc: Tc<P>) -> Result<()> {
        if tc.is_empty() {
            return Ok(());
        }
        let mut guard = self.state.lock();
        if guard.drained {
            return Err(Error::StoreClosed(self.analyzer_id.to_string()));
        }

        let tick = tc.tick;
        let was_spilled = guard.spilled.remove(&tick);
        let mut acc = if was_spilled {
            self.reload(store, tick)?
        } else {
            guard.resident.remove(&tick)
        }
        .unwrap_or_else(|| (self.new_state)());

        let before = (self.size_state)(&acc);
        (self.extract_tc)(&tc, &mut acc);
        let after = (self.size_state)(&acc);

        guard.resident_bytes = guard.resident_bytes.saturating_sub(before) + after;
        guard.resident.insert(tick, acc);

        self.enforce_budget(store, &mut guard)?;
        Ok(())
    }

    /// Spills resident accumulators, largest first (ties broken by lower
    /// tick index), until the resident total is back under budget.
    fn enforce_budget(&self, store: &dyn Store, guard: &mut AggregatorState<S>) -> Result<()> {
        if self.spill_budget_bytes == 0 {
            return Ok(());
        }
        while guard.resident_bytes > self.spill_budget_bytes {
            let Some((&victim_tick, _)) = guard
                .resident
                .iter()
                .max_by_key(|(&tick, state)| ((self.size_state)(state), std::cmp::Reverse(tick)))
            else {
                break;
            };
            let victim = guard.resident.remove(&victim_tick).expect("just selected");
            let victim_bytes = (self.size_state)(&victim);
            self.spill(store, victim_tick, &victim)?;
            guard.spilled.insert(victim_tick);
            guard.resident_bytes = guard.resident_bytes.saturating_sub(victim_bytes);
        }
        Ok(())
    }

    fn spill(&self, store: &dyn Store, tick: Tick, state: &S) -> Result<()> {
        let payload = serde_json::to_value(state)?;
        tracing::debug!(
            analyzer = %self.analyzer_id,
            tick,
            "spilling resident accumulator to store"
        );
        let mut writer = store.begin(
            spill_analyzer_id(&self.analyzer_id, tick),
            json!({"tick": tick}),
        )?;
        writer.write(SPILL_KIND, payload)?;
        writer.close()
    }

    fn reload(&self, store: &dyn Store, tick: Tick) -> Result<Option<S>> {
        let reader = match store.open(&spill_analyzer_id(&self.analyzer_id, tick)) {
            Ok(reader) => reader,
            Err(Error::UnknownAnalyzer(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let mut values = reader.iter(SPILL_KIND);
        let Some(value) = values.next() else {
            return Ok(None);
        };
        let state: S = serde_json::from_value(value)?;
        Ok(Some(state))
    }

    /// Drains the aggregator, reloading any spilled accumulators and
    /// calling `build_tick` in ascending tick order. Idempotent re-binding
    /// after a drain is an error — the aggregator is single-use.
    ///
    /// # Errors
    /// [`Error::StoreClosed`] if the aggregator was already drained; a
    /// store error if reloading a spilled accumulator fails.
    pub fn drain(&self, store: &dyn Store) -> Result<Vec<TickRecord<D>>> {
        let mut guard = self.state.lock();
        if guard.drained {
            return Err(Error::StoreClosed(self.analyzer_id.to_string()));
        }
        guard.drained = true;

        let mut all_ticks: BTreeSet<Tick> = guard.resident.keys().copied().collect();
        all_ticks.extend(guard.spilled.iter().copied());

        let mut out = Vec::with_capacity(all_ticks.len());
        for tick in all_ticks {
            let state = if let Some(state) = guard.resident.remove(&tick) {
                state
            } else {
                self.reload(store, tick)?
                    .ok_or_else(|| Error::Internal(format!("spilled tick {tick} missing from store")))?
            };
            out.push((self.build_tick)(tick, state));
        }
        Ok(out)
    }

    /// Merges `incoming` into an existing resident (or freshly created)
    /// accumulator for `tick`, via the analyzer-supplied `merge_state`
    /// callback. Used when parallel workers each produce partial per-tick
    /// state that must be combined before drain.
    pub fn merge(&self, tick: Tick, incoming: S) {
        let mut guard = self.state.lock();
        let before = guard.resident.remove(&tick);
        let before_bytes = before.as_ref().map_or(0, |s| (self.size_state)(s));
        let merged = match before {
            Some(existing) => (self.merge_state)(existing, incoming),
            None => incoming,
        };
        let after_bytes = (self.size_state)(&merged);
        guard.resident_bytes = guard.resident_bytes.saturating_sub(before_bytes) + after_bytes;
        guard.resident.insert(tick, merged);
    }

    /// Sum of `size_state` over currently-resident (non-spilled)
    /// accumulators. Exposed for tests validating the spill-budget
    /// invariant.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.state.lock().resident_bytes
    }
}

fn spill_analyzer_id(analyzer_id: &AnalyzerId, tick: Tick) -> AnalyzerId {
    AnalyzerId::new(format!("{analyzer_id}::spill::{tick}"))
}
