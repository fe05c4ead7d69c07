//! StateHistory: the producer and query facade over a history backend
//!
//! ## Design
//!
//! The facade composes three pieces:
//! - an [`AttributeRegistry`] mapping hierarchical paths to dense ids,
//! - a [`TransientState`] holding each attribute's still-ongoing value,
//! - a [`HistoryBackend`] storing finished intervals.
//!
//! Producers describe state changes (`set_value`, `push_ongoing`,
//! `close_ongoing`); each change flushes the segment the outgoing value
//! covered into the backend. Queries consult the backend first and fall back
//! to the ongoing layer, so the current value of an attribute is visible
//! before anything ends it.
//!
//! ## Time
//!
//! The history's end time is the latest write seen across all attributes,
//! stored or ongoing. Queries beyond it are [`Error::TimeRange`]: the future
//! is unknown, not empty. `close()` materializes every ongoing value as an
//! open-ended interval, after which the whole timeline is queryable.

use tracing::info;

use histree_core::{
    AttrInterval, AttributeId, Error, HistoryBackend, Result, Value, TIME_OPEN,
};
use histree_storage::{HistoryTree, HtConfig, LazyIntervalStore};
use std::path::Path;

use crate::attribute::AttributeRegistry;
use crate::transient::TransientState;

/// A queryable state history built from interval writes.
///
/// Generic over the backend so small histories can stay in memory while
/// large ones go to disk; see [`StateHistory::in_memory`] and
/// [`StateHistory::create`].
#[derive(Debug)]
pub struct StateHistory<B: HistoryBackend> {
    backend: B,
    registry: AttributeRegistry,
    transient: TransientState,
}

impl StateHistory<HistoryTree> {
    /// Create a disk-backed history at `path`.
    pub fn create(path: &Path, cfg: HtConfig) -> Result<Self> {
        Ok(Self::with_backend(HistoryTree::create(path, cfg)?))
    }

    /// Open a previously closed disk-backed history, read-only.
    ///
    /// The path registry is a session artifact and is not persisted;
    /// reopened histories are addressed by raw [`AttributeId`]s.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::with_backend(HistoryTree::open(path)?))
    }
}

impl StateHistory<LazyIntervalStore> {
    /// Create an in-memory history starting at `start_time`.
    pub fn in_memory(start_time: i64) -> Self {
        Self::with_backend(LazyIntervalStore::new(start_time))
    }
}

impl<B: HistoryBackend> StateHistory<B> {
    /// Wrap an existing backend.
    pub fn with_backend(backend: B) -> Self {
        StateHistory {
            backend,
            registry: AttributeRegistry::new(),
            transient: TransientState::new(),
        }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Earliest queryable time.
    pub fn start_time(&self) -> i64 {
        self.backend.start_time()
    }

    /// Latest write seen across all attributes, stored or ongoing.
    pub fn end_time(&self) -> i64 {
        let ongoing = self
            .transient
            .currents()
            .iter()
            .map(|(_, entry)| entry.start)
            .max()
            .unwrap_or(i64::MIN);
        self.backend.end_time().max(ongoing)
    }

    /// Whether the history was closed for writing.
    pub fn is_closed(&self) -> bool {
        self.backend.is_closed()
    }

    // ========== Attribute Operations ==========

    /// Get the id for an attribute path, registering it if unseen.
    pub fn open_attribute(&self, path: &[&str]) -> AttributeId {
        self.registry.open(path)
    }

    /// The path registered for `attr`.
    pub fn attribute_path(&self, attr: AttributeId) -> Result<Vec<String>> {
        self.registry
            .path(attr)
            .ok_or(Error::UnknownAttribute(attr))
    }

    /// Ids of registered attributes matching `pattern` (`"*"` matches one
    /// segment), in id order.
    pub fn attributes_matching(&self, pattern: &[&str]) -> Vec<AttributeId> {
        self.registry.matching(pattern)
    }

    /// Number of registered attributes.
    pub fn attribute_count(&self) -> usize {
        self.registry.len()
    }

    // ========== Write Operations ==========
    //
    // Writes take registered attributes only. Queries pass ids straight to
    // the backend, so reopened histories stay queryable without a registry.

    /// Replace the current value of `attr` as of time `t`.
    ///
    /// The previous value, if any, is stored as `[prev_t, t)`.
    pub fn set_value(&self, attr: AttributeId, t: i64, value: Value) -> Result<()> {
        self.check_write(attr, t)?;
        self.store(self.transient.set(attr, t, value)?)
    }

    /// Push `value` over the current value of `attr` at time `t`.
    ///
    /// The covered value resumes when the pushed one is closed.
    pub fn push_ongoing(&self, attr: AttributeId, t: i64, value: Value) -> Result<()> {
        self.check_write(attr, t)?;
        self.store(self.transient.push(attr, t, value)?)
    }

    /// Close the most recently pushed value of `attr` at time `t`.
    pub fn close_ongoing(&self, attr: AttributeId, t: i64) -> Result<()> {
        self.check_write(attr, t)?;
        self.store(self.transient.pop(attr, t)?)
    }

    /// Store a pre-closed interval directly.
    pub fn insert(&self, attr: AttributeId, start: i64, end: i64, value: Value) -> Result<()> {
        if !self.registry.contains(attr) {
            return Err(Error::UnknownAttribute(attr));
        }
        self.backend.insert(AttrInterval::new(attr, start, end, value))
    }

    /// Flush every ongoing value as an open-ended interval and close the
    /// backend. Further writes fail with [`Error::Closed`].
    ///
    /// An ongoing entry leaves the transient layer only once the backend
    /// has accepted it, so a close that fails part way keeps the remaining
    /// entries and can be retried.
    pub fn close(&self) -> Result<()> {
        for (attr, entry) in self.transient.currents() {
            self.backend
                .insert(AttrInterval::new(attr, entry.start, TIME_OPEN, entry.value))?;
            self.transient.discard(attr);
        }
        self.backend.close()?;
        info!(target: "histree::engine", end_time = self.backend.end_time(), "State history closed");
        Ok(())
    }

    fn check_write(&self, attr: AttributeId, t: i64) -> Result<()> {
        if !self.registry.contains(attr) {
            return Err(Error::UnknownAttribute(attr));
        }
        if self.backend.is_closed() {
            return Err(Error::Closed);
        }
        let start = self.backend.start_time();
        if t < start {
            return Err(Error::time_range(t, start, TIME_OPEN));
        }
        Ok(())
    }

    fn store(&self, flushed: Option<AttrInterval>) -> Result<()> {
        match flushed {
            Some(iv) => self.backend.insert(iv),
            None => Ok(()),
        }
    }

    // ========== Query Operations ==========

    /// The value of `attr` at time `t`, or `None` when nothing covers `t`.
    pub fn value_at(&self, attr: AttributeId, t: i64) -> Result<Option<Value>> {
        Ok(self.interval_at(attr, t)?.map(|iv| iv.value))
    }

    /// The interval covering `t` for `attr`. Ongoing values are reported
    /// with an open end.
    pub fn interval_at(&self, attr: AttributeId, t: i64) -> Result<Option<AttrInterval>> {
        self.check_query_time(t)?;
        self.lookup(attr, t)
    }

    /// The state of every registered attribute at time `t`, indexed by id.
    pub fn full_state_at(&self, t: i64) -> Result<Vec<Option<AttrInterval>>> {
        self.check_query_time(t)?;
        let count = self.registry.len();
        let mut out = Vec::with_capacity(count);
        for raw in 0..count {
            out.push(self.lookup(AttributeId::new(raw as u32), t)?);
        }
        Ok(out)
    }

    /// All stored intervals for `attrs` overlapping `[qs, qe]`, plus any
    /// ongoing values reaching into the window, sorted by attribute then
    /// start.
    pub fn query_range(
        &self,
        attrs: &[AttributeId],
        qs: i64,
        qe: i64,
    ) -> Result<Vec<AttrInterval>> {
        let mut out: Vec<AttrInterval> = self
            .backend
            .query_range(attrs, qs, qe)?
            .collect::<Result<_>>()?;
        for (attr, entry) in self.transient.currents() {
            if attrs.contains(&attr) && entry.start <= qe {
                out.push(AttrInterval::new(attr, entry.start, TIME_OPEN, entry.value));
            }
        }
        out.sort_by_key(|iv| (iv.attr, iv.start, iv.end));
        Ok(out)
    }

    fn check_query_time(&self, t: i64) -> Result<()> {
        let (start, end) = (self.backend.start_time(), self.end_time());
        if t < start || t > end {
            return Err(Error::time_range(t, start, end));
        }
        Ok(())
    }

    /// Backend first, ongoing layer second. The backend's own range check
    /// is superseded by `check_query_time`, which accounts for ongoing
    /// values the backend has not seen yet.
    fn lookup(&self, attr: AttributeId, t: i64) -> Result<Option<AttrInterval>> {
        match self.backend.query_at(attr, t) {
            Ok(found) => Ok(found.or_else(|| self.ongoing_interval(attr, t))),
            Err(Error::TimeRange { .. }) => Ok(self.ongoing_interval(attr, t)),
            Err(err) => Err(err),
        }
    }

    fn ongoing_interval(&self, attr: AttributeId, t: i64) -> Option<AttrInterval> {
        let entry = self.transient.current(attr)?;
        if entry.start <= t {
            Some(AttrInterval::new(attr, entry.start, TIME_OPEN, entry.value))
        } else {
            None
        }
    }
}
