//! Error types for histree
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! The taxonomy is deliberate:
//! - [`Error::TimeRange`] is recoverable and expected; callers asked about a
//!   time the history does not cover. It is never silently clamped.
//! - [`Error::CorruptFormat`] is fatal for the affected file; there is no
//!   partial recovery from a bad header or block.
//! - [`Error::CapacityExceeded`] indicates an internal invariant was broken
//!   (a child table grew past its configured maximum), i.e. a bug.
//! - "Value not set at time T" is NOT an error; queries return `Ok(None)`.

use crate::times::AttributeId;
use std::io;
use thiserror::Error;

/// Result type alias for histree operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for histree
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A query or insert time falls outside the history's valid span
    #[error("Time {time} outside valid range [{valid_start}, {valid_end}]")]
    TimeRange {
        /// The offending time (for range queries, the bound that missed)
        time: i64,
        /// Start of the valid span
        valid_start: i64,
        /// End of the valid span
        valid_end: i64,
    },

    /// On-disk data failed validation (bad magic, version, or checksum)
    #[error("Corrupt history file: {0}")]
    CorruptFormat(String),

    /// A node was asked to hold more children or intervals than configured
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Operation referenced an attribute id the registry never issued
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(AttributeId),

    /// close_ongoing was called for an attribute with no ongoing interval
    #[error("No ongoing interval for attribute {0}")]
    NoOngoing(AttributeId),

    /// Write attempted after the history was closed
    #[error("History is closed for writing")]
    Closed,
}

impl Error {
    /// Build a [`Error::TimeRange`] for one offending time.
    pub fn time_range(time: i64, valid_start: i64, valid_end: i64) -> Self {
        Error::TimeRange {
            time,
            valid_start,
            valid_end,
        }
    }

    /// Build a [`Error::CorruptFormat`] from any displayable detail.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Error::CorruptFormat(detail.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
    }

    #[test]
    fn test_error_display_time_range() {
        let err = Error::time_range(150, 0, 100);
        let msg = err.to_string();
        assert!(msg.contains("150"));
        assert!(msg.contains("[0, 100]"));
    }

    #[test]
    fn test_error_display_corrupt_format() {
        let err = Error::corrupt("checksum mismatch in block 3");
        let msg = err.to_string();
        assert!(msg.contains("Corrupt history file"));
        assert!(msg.contains("block 3"));
    }

    #[test]
    fn test_error_display_capacity_exceeded() {
        let err = Error::CapacityExceeded("node 7 already has 50 children".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Capacity exceeded"));
        assert!(msg.contains("node 7"));
    }

    #[test]
    fn test_error_display_unknown_attribute() {
        let err = Error::UnknownAttribute(AttributeId::new(99));
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_error_display_no_ongoing() {
        let err = Error::NoOngoing(AttributeId::new(4));
        let msg = err.to_string();
        assert!(msg.contains("No ongoing interval"));
        assert!(msg.contains("4"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_pattern_matching() {
        let err = Error::time_range(5, 10, 20);
        match err {
            Error::TimeRange {
                time,
                valid_start,
                valid_end,
            } => {
                assert_eq!(time, 5);
                assert_eq!(valid_start, 10);
                assert_eq!(valid_end, 20);
            }
            _ => panic!("Wrong error variant"),
        }
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(returns_result().unwrap(), 42);
    }
}
