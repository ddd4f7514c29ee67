//! Append-only per-analyzer record store (C4).
//!
//! `Store` is a trait; this crate ships one production implementation,
//! [`MemStore`], an in-process store behind one [`OrderedRwLock`] per
//! analyzer slot (lock level [`LockLevel::StoreAnalyzerSlot`]). A durable
//! (file/object-store) backend is an external collaborator the trait
//! leaves room for.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use histolens_core::{AnalyzerId, Error, LockLevel, OrderedRwLock, Result};
use indexmap::IndexMap;
use serde_json::Value;

/// A handle for appending records to one analyzer's slot. Records are
/// staged locally and become visible atomically when [`Writer::close`]
/// is called — concurrent readers never observe a partially-written
/// slot.
pub trait Writer: Send {
    /// Append one `(kind, value)` record.
    ///
    /// # Errors
    /// Implementations backed by disk or network I/O may return
    /// [`Error::StoreIo`]; [`MemStore`]'s writer never fails.
    fn write(&mut self, kind: &str, value: Value) -> Result<()>;

    /// Commit the staged records, replacing the analyzer's prior slot (if
    /// any) in a single atomic swap.
    ///
    /// # Errors
    /// Implementations backed by disk or network I/O may return
    /// [`Error::StoreIo`]; [`MemStore`]'s writer never fails.
    fn close(self: Box<Self>) -> Result<()>;
}

/// A read-only, point-in-time view over one analyzer's records.
pub trait Reader: Send {
    /// All record kinds present in this snapshot, in first-seen order.
    fn kinds(&self) -> Vec<String>;

    /// Iterate the records of `kind` in insertion order. An unknown kind
    /// yields an empty iterator — readers skip unknown kinds without
    /// error (§3 invariants).
    fn iter(&self, kind: &str) -> Box<dyn Iterator<Item = Value> + '_>;
}

/// Append-only per-analyzer record store.
pub trait Store: Send + Sync {
    /// Enumerate all analyzers with data.
    fn analyzer_ids(&self) -> Vec<AnalyzerId>;

    /// Begin writing a fresh record set for `analyzer_id`. If the
    /// analyzer already has records (the enrichment rewrite path), they
    /// are replaced — not merged — when the returned writer is closed.
    ///
    /// # Errors
    /// Implementations backed by disk or network I/O may return
    /// [`Error::StoreIo`].
    fn begin(&self, analyzer_id: AnalyzerId, meta: Value) -> Result<Box<dyn Writer + '_>>;

    /// Open a consistent snapshot of `analyzer_id`'s current records.
    ///
    /// # Errors
    /// Returns [`Error::UnknownAnalyzer`] if no records have ever been
    /// written for `analyzer_id`.
    fn open(&self, analyzer_id: &AnalyzerId) -> Result<Box<dyn Reader>>;
}

#[derive(Debug, Clone, Default)]
struct AnalyzerSlot {
    meta: Value,
    records: IndexMap<String, Vec<Value>>,
}

/// In-process, in-memory [`Store`] implementation. Suitable for
/// single-process runs and tests; not durable across process restarts.
#[derive(Debug)]
pub struct MemStore {
    slots: OrderedRwLock<HashMap<AnalyzerId, AnalyzerSlot>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: OrderedRwLock::new(LockLevel::StoreAnalyzerSlot, HashMap::new()),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemWriter<'a> {
    store: &'a MemStore,
    analyzer_id: AnalyzerId,
    staged: AnalyzerSlot,
}

impl Writer for MemWriter<'_> {
    fn write(&mut self, kind: &str, value: Value) -> Result<()> {
        self.staged
            .records
            .entry(kind.to_string())
            .or_default()
            .push(value);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let kind_count = self.staged.records.len();
        let mut guard = self.store.slots.write();
        let replaced = guard.insert(self.analyzer_id.clone(), self.staged).is_some();
        drop(guard);
        tracing::debug!(
            analyzer = %self.analyzer_id,
            kind_count,
            replaced,
            "committed analyzer slot"
        );
        Ok(())
    }
}

struct MemReader {
    slot: AnalyzerSlot,
}

impl Reader for MemReader {
    fn kinds(&self) -> Vec<String> {
        self.slot.records.keys().cloned().collect()
    }

    fn iter(&self, kind: &str) -> Box<dyn Iterator<Item = Value> + '_> {
        match self.slot.records.get(kind) {
            Some(values) => Box::new(values.iter().cloned()),
            None => Box::new(std::iter::empty()),
        }
    }
}

impl Store for MemStore {
    fn analyzer_ids(&self) -> Vec<AnalyzerId> {
        let guard = self.slots.read();
        let mut ids: Vec<AnalyzerId> = guard.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn begin(&self, analyzer_id: AnalyzerId, meta: Value) -> Result<Box<dyn Writer + '_>> {
        Ok(Box::new(MemWriter {
            store: self,
            analyzer_id,
            staged: AnalyzerSlot {
                meta,
                records: IndexMap::new(),
            },
        }))
    }

    fn open(&self, analyzer_id: &AnalyzerId) -> Result<Box<dyn Reader>> {
        let guard = self.slots.read();
        let slot = guard.get(analyzer_id).cloned().ok_or_else(|| {
            tracing::debug!(analyzer = %analyzer_id, "open requested for unknown analyzer");
            Error::UnknownAnalyzer(analyzer_id.to_string())
        })?;
        Ok(Box::new(MemReader { slot }))
    }
}
