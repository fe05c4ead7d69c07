//! The history tree manager.
//!
//! A history tree indexes intervals by time across a file of fixed-size
//! node blocks. Writes go through the *latest branch*, the chain of
//! still-open nodes from the root down to the open leaf; everything to the
//! left of that branch is sealed and immutable:
//!
//! ```text
//!                      ┌────────┐
//!                      │ root   │            sealed   open
//!                      └─┬────┬─┘
//!                  ┌─────┘    └──────┐
//!              ┌───┴───┐        ┌────┴────┐ ext ┌─────────┐
//!              │ core  │        │ core    ├────►│ core    │
//!              └─┬───┬─┘        └─┬─────┬─┘     └────┬────┘
//!              ┌─┘   └─┐        ┌─┘     └─┐          └─┐
//!            leaf    leaf     leaf      leaf          leaf  ◄─ open
//! ```
//!
//! Inserts land in the deepest open node whose window covers the interval's
//! start, so late-arriving intervals settle in an open ancestor instead of
//! forcing a rebalance. When a node fills up, the branch below it is sealed
//! at the current tree end and rebuilt:
//!
//! - parent has a free child slot: plain sibling split,
//! - parent full and parent is the root: a new root one level up,
//! - parent full below the root: an *extension* core continues the parent
//!   at the same level, keeping the tree shallow.
//!
//! Extensions are reachable only through the sealed node's extension link,
//! never through the grandparent's child table, so point queries hop
//! sideways when the query time lies past a sealed node's end.

use histree_core::{AttrInterval, AttributeId, Error, Result, TIME_OPEN};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::block::{BlockIo, FileHeader};
use crate::config::HtConfig;
use crate::node::{interval_disk_size, HtNode};
use crate::query::TreeRangeQuery;

/// Mutable tree shape, guarded by one reader-writer lock.
///
/// Readers copy the fields they need and release the lock before touching
/// any node, so queries never hold it across I/O.
pub(crate) struct TreeState {
    /// Open nodes, root first, open leaf last. Empty once closed.
    pub(crate) latest_branch: Vec<Arc<HtNode>>,
    /// Total nodes allocated; also the next sequence number.
    pub(crate) node_count: u32,
    /// Sequence number of the current root.
    pub(crate) root_seq: u32,
    /// Latest end time seen across all inserted intervals.
    pub(crate) tree_end: i64,
    /// Set by `close` (or at open time for a reloaded file).
    pub(crate) closed: bool,
}

/// Disk-resident interval index.
///
/// One writer builds the tree while any number of readers query it; a
/// closed tree (or one reloaded with [`HistoryTree::open`]) is read-only.
pub struct HistoryTree {
    cfg: HtConfig,
    io: BlockIo,
    state: RwLock<TreeState>,
}

impl HistoryTree {
    /// Create a new, empty history tree backed by the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] for an unusable geometry and
    /// [`Error::Io`] if the file cannot be created.
    pub fn create(path: &Path, cfg: HtConfig) -> Result<Self> {
        cfg.validate()?;
        let io = BlockIo::create(path, cfg)?;
        let root = Arc::new(HtNode::new_leaf(0, None, cfg.tree_start));
        info!(
            target: "histree::tree",
            path = %path.display(),
            tree_start = cfg.tree_start,
            block_size = cfg.block_size,
            "History tree created"
        );
        Ok(HistoryTree {
            cfg,
            io,
            state: RwLock::new(TreeState {
                latest_branch: vec![root],
                node_count: 1,
                root_seq: 0,
                tree_end: cfg.tree_start,
                closed: false,
            }),
        })
    }

    /// Reload a finished history tree read-only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFormat`] for bad magic bytes, an unsupported
    /// version, or a file length that disagrees with the header, and
    /// [`Error::Io`] if the file cannot be read.
    pub fn open(path: &Path) -> Result<Self> {
        let (io, header) = BlockIo::open(path)?;
        info!(
            target: "histree::tree",
            path = %path.display(),
            nodes = header.node_count,
            tree_start = header.tree_start,
            tree_end = header.tree_end,
            "History tree opened"
        );
        Ok(HistoryTree {
            cfg: header.config(),
            io,
            state: RwLock::new(TreeState {
                latest_branch: Vec::new(),
                node_count: header.node_count,
                root_seq: header.root_seq,
                tree_end: header.tree_end,
                closed: true,
            }),
        })
    }

    /// Tree geometry.
    pub fn config(&self) -> &HtConfig {
        &self.cfg
    }

    /// Earliest time the tree covers.
    pub fn start_time(&self) -> i64 {
        self.cfg.tree_start
    }

    /// Latest end time seen so far (the final end once closed).
    pub fn end_time(&self) -> i64 {
        self.state.read().tree_end
    }

    /// Number of nodes allocated so far.
    pub fn node_count(&self) -> u32 {
        self.state.read().node_count
    }

    /// Whether the tree has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    // =========================================================================
    // Insert path
    // =========================================================================

    /// Insert one interval.
    ///
    /// Intervals are expected to arrive in roughly increasing start order;
    /// an interval starting before the open leaf's window settles in the
    /// deepest open ancestor that still covers its start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeRange`] when the interval starts before the
    /// tree's start time or ends before it starts, [`Error::Closed`] after
    /// `close`, and [`Error::Io`] if sealing a full branch fails to write.
    pub fn insert(&self, iv: AttrInterval) -> Result<()> {
        if iv.start < self.cfg.tree_start {
            return Err(Error::time_range(iv.start, self.cfg.tree_start, TIME_OPEN));
        }
        if iv.end < iv.start {
            return Err(Error::time_range(iv.end, iv.start, TIME_OPEN));
        }
        // An interval must fit an empty node of either kind, or splitting
        // could never make room for it.
        let size = interval_disk_size(&iv);
        if size > self.cfg.core_data_budget() {
            return Err(Error::CapacityExceeded(format!(
                "interval record of {size} bytes exceeds the {} byte node budget",
                self.cfg.core_data_budget()
            )));
        }

        let mut state = self.state.write();
        if state.closed {
            return Err(Error::Closed);
        }

        'placement: loop {
            // Walk up from the open leaf to the deepest node that both has
            // room and covers the interval's start.
            let mut depth = state.latest_branch.len() - 1;
            loop {
                let node = &state.latest_branch[depth];
                if !node.has_room(&iv, &self.cfg) {
                    self.split_branch(&mut state, depth)?;
                    continue 'placement;
                }
                if iv.start < node.node_start() && depth > 0 {
                    depth -= 1;
                    continue;
                }
                let end = iv.end;
                let inserted = node.try_insert(iv, &self.cfg);
                debug_assert!(inserted, "room check raced on single-writer tree");
                state.tree_end = state.tree_end.max(end);
                return Ok(());
            }
        }
    }

    /// Seal the branch from `depth` down and grow a fresh sub-branch.
    fn split_branch(&self, state: &mut TreeState, depth: usize) -> Result<()> {
        if depth == 0 {
            return self.add_new_root(state);
        }
        let parent = &state.latest_branch[depth - 1];
        if parent.has_child_room(self.cfg.max_children) {
            self.add_sibling(state, depth)
        } else if depth - 1 == 0 {
            self.add_new_root(state)
        } else {
            self.add_extension(state, depth - 1)
        }
    }

    /// Plain split: the parent at `depth - 1` has a free child slot.
    fn add_sibling(&self, state: &mut TreeState, depth: usize) -> Result<()> {
        let boundary = state.tree_end;
        let levels = state.latest_branch.len();

        for node in state.latest_branch[depth..].iter().rev() {
            node.seal(boundary);
            self.io.write_node(node)?;
        }
        state.latest_branch.truncate(depth);

        for level in depth..levels {
            let node = self.new_branch_node(state, level, levels, boundary)?;
            state.latest_branch.push(node);
        }
        debug!(
            target: "histree::tree",
            depth,
            boundary,
            nodes = state.node_count,
            "Branch split"
        );
        Ok(())
    }

    /// Grow the tree one level: the old root becomes the first child of a
    /// new core root spanning the whole tree.
    fn add_new_root(&self, state: &mut TreeState) -> Result<()> {
        let boundary = state.tree_end;
        let levels = state.latest_branch.len();
        let old_root = Arc::clone(&state.latest_branch[0]);

        let new_root = Arc::new(HtNode::new_core(
            state.node_count,
            None,
            self.cfg.tree_start,
        ));
        state.node_count += 1;
        old_root.set_parent(new_root.seq());

        for node in state.latest_branch.iter().rev() {
            node.seal(boundary);
            self.io.write_node(node)?;
        }

        new_root.link_new_child(old_root.seq(), old_root.node_start(), self.cfg.max_children)?;
        state.latest_branch.clear();
        state.latest_branch.push(Arc::clone(&new_root));
        state.root_seq = new_root.seq();

        // One level deeper than before: the new spine next to the old tree.
        for level in 1..=levels {
            let node = self.new_branch_node(state, level, levels + 1, boundary)?;
            state.latest_branch.push(node);
        }
        info!(
            target: "histree::tree",
            root = new_root.seq(),
            boundary,
            depth = levels + 1,
            "New root added"
        );
        Ok(())
    }

    /// The parent at `parent_depth` is full and not the root: continue it
    /// with an extension core at the same level.
    ///
    /// The extension and its sub-branch are fully built before the sealed
    /// parent's extension link is published, so a reader that hops never
    /// sees a half-linked subtree.
    fn add_extension(&self, state: &mut TreeState, parent_depth: usize) -> Result<()> {
        let boundary = state.tree_end;
        let levels = state.latest_branch.len();
        let parent = Arc::clone(&state.latest_branch[parent_depth]);

        let extension = Arc::new(HtNode::new_core(state.node_count, parent.parent(), boundary));
        state.node_count += 1;

        let mut new_chain = vec![Arc::clone(&extension)];
        for level in parent_depth + 1..levels {
            let prev = &new_chain[new_chain.len() - 1];
            let node: Arc<HtNode> = if level == levels - 1 {
                Arc::new(HtNode::new_leaf(state.node_count, Some(prev.seq()), boundary))
            } else {
                Arc::new(HtNode::new_core(state.node_count, Some(prev.seq()), boundary))
            };
            state.node_count += 1;
            prev.link_new_child(node.seq(), boundary, self.cfg.max_children)?;
            new_chain.push(node);
        }

        parent.set_extension(extension.seq())?;

        for node in state.latest_branch[parent_depth..].iter().rev() {
            node.seal(boundary);
            self.io.write_node(node)?;
        }

        state.latest_branch.truncate(parent_depth);
        state.latest_branch.extend(new_chain);
        info!(
            target: "histree::tree",
            sealed = parent.seq(),
            extension = extension.seq(),
            boundary,
            "Extension added"
        );
        Ok(())
    }

    /// Allocate one node of a fresh sub-branch and link it to its parent,
    /// which must be the current tail of the latest branch.
    fn new_branch_node(
        &self,
        state: &mut TreeState,
        level: usize,
        levels: usize,
        boundary: i64,
    ) -> Result<Arc<HtNode>> {
        let parent = Arc::clone(&state.latest_branch[level - 1]);
        let node: Arc<HtNode> = if level == levels - 1 {
            Arc::new(HtNode::new_leaf(state.node_count, Some(parent.seq()), boundary))
        } else {
            Arc::new(HtNode::new_core(state.node_count, Some(parent.seq()), boundary))
        };
        state.node_count += 1;
        parent.link_new_child(node.seq(), boundary, self.cfg.max_children)?;
        Ok(node)
    }

    // =========================================================================
    // Query path
    // =========================================================================

    /// Copy out the routing snapshot a query needs.
    pub(crate) fn snapshot(&self) -> (u32, i64, Vec<Arc<HtNode>>) {
        let state = self.state.read();
        (state.root_seq, state.tree_end, state.latest_branch.clone())
    }

    /// Look a node up in the branch snapshot, then the live branch, then
    /// disk.
    ///
    /// A split that runs after a snapshot was taken publishes its new open
    /// nodes into child tables the snapshot shares; until those nodes are
    /// sealed and written they exist only in the live branch, so the live
    /// branch must be consulted before falling back to the file.
    pub(crate) fn resolve_node(&self, seq: u32, branch: &[Arc<HtNode>]) -> Result<Arc<HtNode>> {
        if let Some(node) = branch.iter().find(|n| n.seq() == seq) {
            return Ok(Arc::clone(node));
        }
        {
            let state = self.state.read();
            if let Some(node) = state.latest_branch.iter().find(|n| n.seq() == seq) {
                return Ok(Arc::clone(node));
            }
        }
        self.io.read_node(seq)
    }

    /// Latest interval of `attr` whose `[start, end)` span contains `t`.
    ///
    /// Descends from the root, scanning the intervals held at every visited
    /// node; a sealed node whose end lies at or before `t` defers to its
    /// extension when it has one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeRange`] when `t` lies outside the tree's
    /// covered span, [`Error::CorruptFormat`] or [`Error::Io`] when a
    /// sealed node cannot be read back.
    pub fn query_at(&self, attr: AttributeId, t: i64) -> Result<Option<AttrInterval>> {
        let (root_seq, tree_end, branch) = self.snapshot();
        if t < self.cfg.tree_start || t > tree_end {
            return Err(Error::time_range(t, self.cfg.tree_start, tree_end));
        }

        let mut node = self.resolve_node(root_seq, &branch)?;
        loop {
            if t < node.node_start() {
                return Err(Error::time_range(t, node.node_start(), tree_end));
            }
            if node.is_sealed() {
                if let Some(end) = node.node_end() {
                    if t >= end {
                        if let Some(ext) = node.extension() {
                            node = self.resolve_node(ext, &branch)?;
                            continue;
                        }
                        if t > end {
                            return Err(Error::time_range(t, node.node_start(), end));
                        }
                    }
                }
            }

            if let Some(found) = node.find_at(attr, t) {
                return Ok(Some(found));
            }
            if !node.is_core() {
                return Ok(None);
            }
            match node.child_snapshot().and_then(|table| table.best_child_at(t)) {
                Some((_, child)) => node = self.resolve_node(child, &branch)?,
                // An open core whose children are still being linked; there
                // is no data at `t` yet.
                None => return Ok(None),
            }
        }
    }

    /// All intervals of the selected attributes overlapping `[qs, qe]`.
    ///
    /// The returned iterator is lazy and one-shot: nodes are read as the
    /// caller consumes it, and it fuses after yielding an error. An empty
    /// attribute set or a range disjoint from the tree yields nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeRange`] when `qs > qe`.
    pub fn query_range(
        &self,
        attrs: &[AttributeId],
        qs: i64,
        qe: i64,
    ) -> Result<TreeRangeQuery<'_>> {
        if qs > qe {
            return Err(Error::time_range(qe, qs, TIME_OPEN));
        }
        Ok(TreeRangeQuery::new(self, attrs, qs, qe))
    }

    /// Seal every open node at the tree's end time, write them out, and
    /// finish the file with its header.
    ///
    /// Closing an already closed tree is a no-op. A close that fails on
    /// I/O can be retried; nodes already written are simply rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if writing a node, the header, or the final
    /// sync fails; the tree stays open in that case.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        let end = state.tree_end;
        for node in state.latest_branch.iter().rev() {
            node.seal(end);
            self.io.write_node(node)?;
        }
        let header = FileHeader::new(&self.cfg, state.node_count, state.root_seq, end);
        self.io.write_header(&header)?;
        self.io.sync()?;
        state.closed = true;
        state.latest_branch.clear();
        info!(
            target: "histree::tree",
            nodes = state.node_count,
            tree_end = end,
            "History tree closed"
        );
        Ok(())
    }
}
