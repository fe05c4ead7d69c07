//! The backend trait both storage variants implement
//!
//! This module defines the [`HistoryBackend`] trait: the shared contract of
//! the disk-resident history tree and the in-memory lazy interval store.
//! Upper layers (the state-history facade) are generic over it, so a history
//! can be built in memory for small traces and on disk for large ones
//! without the producer code changing.

use crate::error::Result;
use crate::interval::AttrInterval;
use crate::times::AttributeId;

/// Boxed lazy iterator returned by range queries.
///
/// Items are `Result` because the disk-backed variant may hit I/O or
/// corruption errors mid-traversal; iteration stops after the first error.
pub type IntervalIter<'a> = Box<dyn Iterator<Item = Result<AttrInterval>> + Send + 'a>;

/// Storage abstraction for interval histories.
///
/// Implementations accept half-open intervals tagged with an attribute id
/// and answer point and range overlap queries. Writes are expected from a
/// single producer thread; queries may run concurrently from many threads
/// (requires Send + Sync).
pub trait HistoryBackend: Send + Sync {
    /// Earliest time this history covers.
    fn start_time(&self) -> i64;

    /// Latest time this history covers so far (grows while building).
    fn end_time(&self) -> i64;

    /// Insert one interval.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TimeRange`] if the interval starts before
    /// `start_time` or has `start > end`, and [`crate::Error::Closed`] after
    /// `close`.
    fn insert(&self, interval: AttrInterval) -> Result<()>;

    /// Find the interval covering `t` for one attribute.
    ///
    /// Returns `Ok(None)` when the attribute has no value at `t`; that is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TimeRange`] if `t` lies outside the span
    /// covered by this history.
    fn query_at(&self, attr: AttributeId, t: i64) -> Result<Option<AttrInterval>>;

    /// Stream every stored interval of the selected attributes that
    /// intersects `[qs, qe]` under the test `!(qe < start || qs > end)`.
    ///
    /// The iterator is finite and one-shot. No global ordering is
    /// guaranteed; intervals sharing a storage node arrive sorted by
    /// `(start, end)`. A range disjoint from the covered span yields an
    /// empty iterator, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TimeRange`] if `qs > qe`.
    fn query_range(&self, attrs: &[AttributeId], qs: i64, qe: i64) -> Result<IntervalIter<'_>>;

    /// Seal the history. Idempotent; writes fail afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing to the underlying medium fails.
    fn close(&self) -> Result<()>;

    /// Whether `close` has completed.
    fn is_closed(&self) -> bool;
}
