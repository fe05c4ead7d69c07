//! Time constants and attribute identifiers
//!
//! Timestamps in histree are plain `i64` values in whatever unit the producer
//! uses (trace parsers typically feed nanoseconds). The library never
//! interprets the unit; it only compares and orders timestamps.
//!
//! Attributes of the modeled system (each thing whose value changes over
//! time) are named by [`AttributeId`], a dense small-integer handle assigned
//! by the attribute registry. The storage layer only ever sees the integer.

use std::fmt;

/// Sentinel end time marking an interval that has not been closed yet.
///
/// Stored verbatim on disk. An open-ended interval covers every query time
/// at or after its start.
pub const TIME_OPEN: i64 = i64::MAX;

/// Dense integer handle for one attribute of the modeled system.
///
/// Ids are assigned sequentially starting at 0 by the attribute registry,
/// so `Vec`s indexed by id stay compact. The id carries no meaning beyond
/// identity; the path it was created from lives in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeId(u32);

impl AttributeId {
    /// Create an attribute id from its raw integer.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        AttributeId(raw)
    }

    /// Get the raw integer value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get the id as a usize, for indexing id-dense vectors.
    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for AttributeId {
    fn from(raw: u32) -> Self {
        AttributeId(raw)
    }
}

impl From<AttributeId> for u32 {
    fn from(id: AttributeId) -> Self {
        id.0
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
