//! State-history engine for histree
//!
//! This crate assembles the user-facing system from the lower layers:
//! - StateHistory: producer and query facade, generic over the backend
//! - AttributeRegistry: hierarchical paths to dense attribute ids
//! - TransientState: per-attribute ongoing values awaiting their end time
//!
//! The engine is the only component that knows about attribute paths and
//! ongoing state; the backends below it store finished intervals keyed by
//! raw ids.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod system;
pub mod transient;

pub use attribute::AttributeRegistry;
pub use system::StateHistory;
pub use transient::{OngoingEntry, TransientState};

// Re-export the types callers need to drive a StateHistory.
pub use histree_core::{
    AttrInterval, AttributeId, Error, HistoryBackend, Result, Value, TIME_OPEN,
};
pub use histree_storage::{HistoryTree, HtConfig, LazyIntervalStore};
