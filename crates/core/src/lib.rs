//! Core types and traits for histree
//!
//! This crate defines the foundational types used throughout the system:
//! - AttributeId: Small integer handle naming one attribute of the modeled system
//! - Value: Unified value enum for attribute states
//! - AttrInterval: Half-open time interval carrying an attribute id and a value
//! - Error: Error type hierarchy
//! - Traits: The HistoryBackend trait both storage variants implement

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
pub mod error;
pub mod interval;
pub mod times;
pub mod traits;
pub mod value;

// Re-export commonly used types and traits
pub use error::{Error, Result};
pub use interval::AttrInterval;
pub use times::{AttributeId, TIME_OPEN};
pub use traits::{HistoryBackend, IntervalIter};
pub use value::Value;
