//! Attribute intervals
//!
//! An [`AttrInterval`] records that one attribute held one value over a span
//! of time. Spans are half-open `[start, end)`: the interval covers `start`
//! but not `end`, so consecutive intervals of the same attribute tile time
//! without gaps or double-coverage. An interval whose end is [`TIME_OPEN`]
//! is still ongoing.
//!
//! Two different tests exist on purpose:
//! - [`AttrInterval::contains`] is the half-open point test used by point
//!   queries.
//! - [`AttrInterval::overlaps`] is the range-intersection test used by range
//!   queries: `!(query_end < start || query_start > end)`. It treats both
//!   bounds inclusively, so an interval touching the query boundary is
//!   returned.

use crate::times::{AttributeId, TIME_OPEN};
use crate::value::Value;

/// One attribute's value over a half-open span of time.
///
/// Invariant: `start <= end`. The storage layer rejects intervals that
/// violate it; constructing one directly is possible but it will never be
/// accepted by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrInterval {
    /// Attribute this interval belongs to
    pub attr: AttributeId,
    /// Inclusive start time
    pub start: i64,
    /// Exclusive end time, or [`TIME_OPEN`] while ongoing
    pub end: i64,
    /// Value the attribute held over `[start, end)`
    pub value: Value,
}

impl AttrInterval {
    /// Create a new interval.
    pub fn new(attr: AttributeId, start: i64, end: i64, value: Value) -> Self {
        AttrInterval {
            attr,
            start,
            end,
            value,
        }
    }

    /// Whether this interval is still ongoing (end not yet known).
    #[inline]
    pub fn is_open_ended(&self) -> bool {
        self.end == TIME_OPEN
    }

    /// Half-open point test: `start <= t < end`.
    #[inline]
    pub fn contains(&self, t: i64) -> bool {
        self.start <= t && t < self.end
    }

    /// Range-intersection test against the inclusive query `[qs, qe]`.
    #[inline]
    pub fn overlaps(&self, qs: i64, qe: i64) -> bool {
        !(qe < self.start || qs > self.end)
    }

    /// Sort key used everywhere intervals are ordered: `(start, end)`.
    #[inline]
    pub fn sort_key(&self) -> (i64, i64) {
        (self.start, self.end)
    }

    /// Duration of the interval; `None` while ongoing.
    pub fn duration(&self) -> Option<i64> {
        if self.is_open_ended() {
            None
        } else {
            Some(self.end - self.start)
        }
    }
}
