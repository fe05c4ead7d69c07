//! In-memory interval store with deferred sorting.
//!
//! Inserts append in O(1) and only mark the store dirty when the new
//! interval lands out of `(start, end)` order against the current tail.
//! The first read after a dirty insert sorts the whole sequence once, so
//! a bulk load followed by queries pays one sort instead of n.
//!
//! One mutex covers the sequence, the dirty flag, and the cached snapshot;
//! sorting and result copying happen inside the same critical section, so
//! a reader never observes a partially sorted sequence.

use histree_core::{AttrInterval, AttributeId, Error, Result, TIME_OPEN};
use parking_lot::Mutex;
use std::sync::Arc;

/// Flat interval store for data sets that fit in memory.
///
/// Offers the same interval contract as the history tree without any
/// persistence: half-open `[start, end)` intervals, exact overlap
/// queries, and a start time before which inserts are rejected.
pub struct LazyIntervalStore {
    start_time: i64,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    intervals: Vec<AttrInterval>,
    dirty: bool,
    /// Sorted copy handed to iterators; dropped on any insert or sort.
    snapshot: Option<Arc<[AttrInterval]>>,
    end_time: i64,
    closed: bool,
}

impl StoreInner {
    fn ensure_sorted(&mut self) {
        if self.dirty {
            self.intervals.sort_by_key(|iv| iv.sort_key());
            self.dirty = false;
            self.snapshot = None;
        }
    }
}

impl LazyIntervalStore {
    /// Create an empty store covering times from `start_time` on.
    pub fn new(start_time: i64) -> Self {
        LazyIntervalStore {
            start_time,
            inner: Mutex::new(StoreInner {
                intervals: Vec::new(),
                dirty: false,
                snapshot: None,
                end_time: start_time,
                closed: false,
            }),
        }
    }

    /// Earliest time the store covers.
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Latest end time seen across all inserted intervals.
    pub fn end_time(&self) -> i64 {
        self.inner.lock().end_time
    }

    /// Number of stored intervals.
    pub fn len(&self) -> usize {
        self.inner.lock().intervals.len()
    }

    /// Whether the store holds no intervals.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().intervals.is_empty()
    }

    /// Append one interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeRange`] when the interval starts before the
    /// store's start time or ends before it starts, and [`Error::Closed`]
    /// after `close`.
    pub fn insert(&self, iv: AttrInterval) -> Result<()> {
        if iv.start < self.start_time {
            return Err(Error::time_range(iv.start, self.start_time, TIME_OPEN));
        }
        if iv.end < iv.start {
            return Err(Error::time_range(iv.end, iv.start, TIME_OPEN));
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        let out_of_order = inner
            .intervals
            .last()
            .map_or(false, |last| iv.sort_key() < last.sort_key());
        if out_of_order {
            inner.dirty = true;
        }
        inner.end_time = inner.end_time.max(iv.end);
        inner.snapshot = None;
        inner.intervals.push(iv);
        Ok(())
    }

    /// All intervals overlapping `[qs, qe]`, sorted by `(start, end)`.
    ///
    /// Sorts first if a preceding insert arrived out of order, then binary
    /// searches for the first interval starting past `qe` and scans the
    /// prefix with the exact overlap test.
    pub fn intersecting(&self, qs: i64, qe: i64) -> Vec<AttrInterval> {
        let mut inner = self.inner.lock();
        inner.ensure_sorted();
        let cut = inner.intervals.partition_point(|iv| iv.start <= qe);
        inner.intervals[..cut]
            .iter()
            .filter(|iv| iv.overlaps(qs, qe))
            .cloned()
            .collect()
    }

    /// Latest interval of `attr` whose `[start, end)` span contains `t`.
    ///
    /// With several matches (overlapping inserts for one attribute), the
    /// greatest `(start, end)` pair wins.
    pub fn find_at(&self, attr: AttributeId, t: i64) -> Option<AttrInterval> {
        let mut inner = self.inner.lock();
        inner.ensure_sorted();
        let cut = inner.intervals.partition_point(|iv| iv.start <= t);
        inner.intervals[..cut]
            .iter()
            .rev()
            .find(|iv| iv.attr == attr && iv.contains(t))
            .cloned()
    }

    /// Restartable iterator over all intervals in `(start, end)` order.
    ///
    /// The iterator works on a snapshot taken under the lock; repeated
    /// calls without intervening inserts reuse the same snapshot.
    pub fn iter(&self) -> StoreSnapshotIter {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.ensure_sorted();
        let snapshot = match &inner.snapshot {
            Some(snap) => Arc::clone(snap),
            None => {
                let snap: Arc<[AttrInterval]> = inner.intervals.clone().into();
                inner.snapshot = Some(Arc::clone(&snap));
                snap
            }
        };
        StoreSnapshotIter { snapshot, idx: 0 }
    }

    /// Drop every interval; the store stays usable.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.intervals.clear();
        inner.dirty = false;
        inner.snapshot = None;
        inner.end_time = self.start_time;
    }

    /// Refuse further inserts. Queries keep working.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Iterator over a sorted snapshot of a [`LazyIntervalStore`].
pub struct StoreSnapshotIter {
    snapshot: Arc<[AttrInterval]>,
    idx: usize,
}

impl Iterator for StoreSnapshotIter {
    type Item = AttrInterval;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.snapshot.get(self.idx).cloned();
        if item.is_some() {
            self.idx += 1;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.snapshot.len() - self.idx;
        (rest, Some(rest))
    }
}
