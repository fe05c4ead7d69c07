//! histree - Disk-backed interval store for trace state histories
//!
//! histree records how modeled state evolves over a trace and answers
//! "what was the value of X at time T" in logarithmic time, long after the
//! events that built the state are gone.
//!
//! # Quick Start
//!
//! ```ignore
//! use histree::{HtConfig, StateHistory, Value};
//!
//! // Build a disk-backed history.
//! let hist = StateHistory::create("run.ht".as_ref(), HtConfig::new(0))?;
//! let cpu = hist.open_attribute(&["CPUs", "0", "Status"]);
//!
//! hist.set_value(cpu, 0, Value::Str("idle".into()))?;
//! hist.set_value(cpu, 1000, Value::Str("running".into()))?;
//! hist.close()?;
//!
//! // The file is self-contained and queryable forever.
//! let hist = StateHistory::open("run.ht".as_ref())?;
//! let value = hist.value_at(cpu, 500)?;
//! ```
//!
//! # Architecture
//!
//! Writes flow through the [`StateHistory`] facade into one of two
//! backends: the disk-resident [`HistoryTree`] for full traces or the
//! in-memory [`LazyIntervalStore`] for small ones. Both answer the same
//! [`HistoryBackend`] contract.

// Re-export the public API from histree-engine
pub use histree_engine::*;
