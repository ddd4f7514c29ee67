//! Property-based test generators for commits, ticks, and configuration
//! facts.
//!
//! Provides `proptest` strategies for `CommitHash`, commit streams, and
//! `commits_by_tick` maps. All generated values satisfy the domain
//! constraints documented on each type.

use std::collections::BTreeMap;

use proptest::prelude::*;

use histolens_core::{CommitHash, ConfigValue};

// ─── Configuration ───────────────────────────────────────────────────────

/// Shared proptest configuration: 1 000 cases, generous shrink budget.
#[must_use]
pub fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 1000,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    }
}

// ─── Leaf strategies ─────────────────────────────────────────────────────

/// Strategy for a non-zero commit hash.
pub fn arb_commit_hash() -> impl Strategy<Value = CommitHash> {
    proptest::array::uniform20(any::<u8>()).prop_map(|mut bytes| {
        if bytes == [0u8; 20] {
            bytes[0] = 1;
        }
        CommitHash::from(bytes)
    })
}

/// Strategy for a tick index in a plausible range for a multi-year history
/// at the default 24-hour tick width (`0..=4000`, roughly 10 years).
pub fn arb_tick() -> impl Strategy<Value = i64> {
    0i64..=4000
}

/// Strategy for a commit timestamp: microseconds since epoch, always
/// non-negative, bounded to a realistic range so derived ticks stay small.
pub fn arb_timestamp_micros() -> impl Strategy<Value = i64> {
    0i64..=(20 * 365 * 24 * 60 * 60 * 1_000_000i64)
}

/// Strategy for an author identifier: a short alphanumeric handle.
pub fn arb_author() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z][a-z0-9._-]{0,31}").expect("valid regex")
}

/// Strategy for parent count: 1 (normal commit) heavily weighted, with
/// occasional merges (2) and octopus merges (3+).
pub fn arb_parent_count() -> impl Strategy<Value = u32> {
    prop_oneof![
        8 => Just(1u32),
        3 => Just(2u32),
        1 => 3..=5u32,
    ]
}

// ─── Composite strategies ────────────────────────────────────────────────

/// Strategy for `(hash, author, timestamp_micros, parent_count)` tuples —
/// the fields callers use to build a [`histolens_core::Commit`] without
/// coupling this crate to any one analyzer's construction helpers.
pub fn arb_commit_fields() -> impl Strategy<Value = (CommitHash, String, i64, u32)> {
    (
        arb_commit_hash(),
        arb_author(),
        arb_timestamp_micros(),
        arb_parent_count(),
    )
}

/// Strategy for a commit stream of `len` commits with strictly
/// non-decreasing timestamps (topological order), as the chunk driver
/// always receives them.
pub fn arb_commit_stream(len: usize) -> impl Strategy<Value = Vec<(CommitHash, String, i64, u32)>> {
    (
        proptest::collection::vec(arb_commit_hash(), len),
        proptest::collection::vec(arb_author(), len),
        proptest::collection::vec(0i64..=86_400_000_000i64, len), // per-step delta, up to 1 day
        proptest::collection::vec(arb_parent_count(), len),
    )
        .prop_map(|(hashes, authors, deltas, parents)| {
            let mut ts = 0i64;
            hashes
                .into_iter()
                .zip(authors)
                .zip(deltas)
                .zip(parents)
                .map(|(((hash, author), delta), parent_count)| {
                    ts += delta;
                    (hash, author, ts, parent_count)
                })
                .collect()
        })
}

/// Strategy for a `commits_by_tick` fact: a small map from tick index to a
/// non-empty list of distinct commit hashes, as consumed via
/// [`ConfigValue::TickMap`].
pub fn arb_commits_by_tick() -> impl Strategy<Value = BTreeMap<i64, Vec<CommitHash>>> {
    proptest::collection::btree_map(
        arb_tick(),
        proptest::collection::vec(arb_commit_hash(), 1..=10),
        0..=20,
    )
}

/// Strategy for an arbitrary [`ConfigValue`], covering every variant the
/// external-interfaces surface names.
pub fn arb_config_value() -> impl Strategy<Value = ConfigValue> {
    prop_oneof![
        any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(ConfigValue::Float),
        any::<i64>().prop_map(ConfigValue::Int),
        any::<bool>().prop_map(ConfigValue::Bool),
        "[a-zA-Z0-9_]{0,32}".prop_map(ConfigValue::Str),
        arb_commits_by_tick().prop_map(ConfigValue::TickMap),
        (0u64..=1_000_000u64).prop_map(|secs| ConfigValue::Duration(std::time::Duration::from_secs(secs))),
    ]
}

// ─── Tests ───────────────────────────────────────────────────────────────
