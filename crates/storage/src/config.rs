//! History tree geometry
//!
//! All three limits are fixed at creation time and serialized into the file
//! header, so a reopened tree always decodes blocks with the geometry they
//! were written with.

use crate::node::{core_section_size, INTERVAL_COUNT_SIZE, NODE_HEADER_SIZE, NODE_TRAILER_SIZE};
use histree_core::{Error, Result};

/// Configuration for one history tree.
///
/// Node splitting is fully determined by `max_children` and `max_intervals`:
/// a node accepts an interval while it holds fewer than `max_intervals` of
/// them AND the serialized record still fits the block's free bytes; a core
/// node accepts at most `max_children` child links before the tree grows an
/// extension node (non-root) or a new root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtConfig {
    /// Size in bytes of every node block (default: 64 KiB)
    pub block_size: u32,
    /// Maximum child links per core node (default: 50)
    pub max_children: u32,
    /// Maximum intervals per node (default: 2048)
    pub max_intervals: u32,
    /// Earliest time the tree covers; inserts before it are rejected
    pub tree_start: i64,
}

impl HtConfig {
    /// Default node block size: 64 KiB.
    pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;
    /// Default core-node fan-out.
    pub const DEFAULT_MAX_CHILDREN: u32 = 50;
    /// Default per-node interval cap.
    pub const DEFAULT_MAX_INTERVALS: u32 = 2048;

    /// Create a config with default geometry starting at `tree_start`.
    pub fn new(tree_start: i64) -> Self {
        HtConfig {
            block_size: Self::DEFAULT_BLOCK_SIZE,
            max_children: Self::DEFAULT_MAX_CHILDREN,
            max_intervals: Self::DEFAULT_MAX_INTERVALS,
            tree_start,
        }
    }

    /// Set the node block size.
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the core-node fan-out.
    pub fn with_max_children(mut self, max_children: u32) -> Self {
        self.max_children = max_children;
        self
    }

    /// Set the per-node interval cap.
    pub fn with_max_intervals(mut self, max_intervals: u32) -> Self {
        self.max_intervals = max_intervals;
        self
    }

    /// Byte budget available for interval records in a leaf block.
    pub fn leaf_data_budget(&self) -> usize {
        (self.block_size as usize)
            .saturating_sub(NODE_HEADER_SIZE + INTERVAL_COUNT_SIZE + NODE_TRAILER_SIZE)
    }

    /// Byte budget available for interval records in a core block.
    ///
    /// Smaller than the leaf budget: the child table section is reserved up
    /// front at its fixed maximum size.
    pub fn core_data_budget(&self) -> usize {
        self.leaf_data_budget()
            .saturating_sub(core_section_size(self.max_children))
    }

    /// Check the geometry is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when a limit is zero or the block
    /// is too small to hold a core node's fixed sections plus at least one
    /// minimal interval record.
    pub fn validate(&self) -> Result<()> {
        if self.max_children < 2 {
            return Err(Error::CapacityExceeded(format!(
                "max_children must be at least 2, got {}",
                self.max_children
            )));
        }
        if self.max_intervals == 0 {
            return Err(Error::CapacityExceeded(
                "max_intervals must be at least 1".to_string(),
            ));
        }
        // Smallest useful core block: sections plus one null-valued record.
        let min_record = crate::node::MIN_INTERVAL_DISK_SIZE;
        if self.core_data_budget() < min_record {
            return Err(Error::CapacityExceeded(format!(
                "block_size {} too small for max_children {}",
                self.block_size, self.max_children
            )));
        }
        Ok(())
    }
}
