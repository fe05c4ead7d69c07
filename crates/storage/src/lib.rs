//! Storage backends for histree
//!
//! Two implementations of `histree_core::HistoryBackend` live here:
//!
//! - [`HistoryTree`]: the disk-resident variant. Intervals land in
//!   fixed-size node blocks inside a single file; core nodes route queries
//!   by time through per-child start tables, so point queries touch one
//!   root-to-leaf path and range queries touch only subtrees whose span
//!   intersects the query.
//! - [`LazyIntervalStore`]: the in-memory variant. Appends are O(1) and
//!   sorting is deferred until the first read after a misordered insert.
//!
//! Module layout:
//! - `config`: tree geometry (block size, fan-out, per-node interval cap)
//! - `block`: file header codec and block-granular file I/O with a small
//!   node cache
//! - `node`: in-memory node representation and the node <-> block codec
//! - `tree`: the history tree manager (insert placement, splits, close)
//! - `query`: the lazy range-query iterator over the tree
//! - `lazy`: the lazy interval store
//! - `backend`: `HistoryBackend` impls for both variants

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod block;
pub mod config;
pub mod lazy;
pub mod node;
pub mod query;
pub mod tree;

pub use block::{FileHeader, FILE_FORMAT_VERSION, FILE_HEADER_SIZE, FILE_MAGIC};
pub use config::HtConfig;
pub use lazy::{LazyIntervalStore, StoreSnapshotIter};
pub use node::{HtNode, NodeType};
pub use query::TreeRangeQuery;
pub use tree::HistoryTree;
