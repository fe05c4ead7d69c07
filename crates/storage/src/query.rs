//! Range queries over the history tree.
//!
//! A range query walks the tree depth-first, visiting only subtrees whose
//! time window can overlap the query, and filters each visited node's
//! intervals with the exact overlap test `!(qe < start || qs > end)`.

use histree_core::{AttrInterval, AttributeId, Result};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::node::HtNode;
use crate::tree::HistoryTree;

/// Lazy, one-shot range query.
///
/// Yields every stored interval of the selected attributes overlapping
/// `[qs, qe]`, reading nodes only as the caller consumes the iterator.
/// Nodes are visited in child-start order and each node's matches come
/// back sorted by `(start, end)`; intervals held by a routing node are
/// yielded before those of its children. The iterator fuses after
/// yielding an error, and an abandoned query issues no further reads.
pub struct TreeRangeQuery<'a> {
    tree: &'a HistoryTree,
    branch: Vec<Arc<HtNode>>,
    attrs: FxHashSet<AttributeId>,
    qs: i64,
    qe: i64,
    /// Nodes still to visit, next one at the back.
    stack: Vec<u32>,
    buffer: VecDeque<AttrInterval>,
    done: bool,
}

impl<'a> TreeRangeQuery<'a> {
    pub(crate) fn new(tree: &'a HistoryTree, attrs: &[AttributeId], qs: i64, qe: i64) -> Self {
        let (root_seq, tree_end, branch) = tree.snapshot();
        let disjoint = qe < tree.config().tree_start || qs > tree_end;
        let mut stack = Vec::new();
        if !attrs.is_empty() && !disjoint {
            stack.push(root_seq);
        }
        TreeRangeQuery {
            tree,
            branch,
            attrs: attrs.iter().copied().collect(),
            qs,
            qe,
            stack,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn visit(&mut self, seq: u32) -> Result<()> {
        let node = self.tree.resolve_node(seq, &self.branch)?;

        let mut matches = Vec::new();
        node.matching_intervals(self.qs, self.qe, &self.attrs, &mut matches);
        matches.sort_by_key(|iv| iv.sort_key());
        self.buffer.extend(matches);

        if let Some(table) = node.child_snapshot() {
            // The extension continues this node past its end; push it
            // first so it pops after every child.
            if let (Some(ext), Some(end)) = (table.extension(), node.node_end()) {
                if self.qe >= end {
                    self.stack.push(ext);
                }
            }
            // A child's window runs to the next child's start; the last
            // one runs to the node's own end (unbounded while open).
            let last_end = node.node_end().unwrap_or(i64::MAX);
            let starts = table.starts();
            let children = table.children();
            for i in (0..table.len()).rev() {
                let child_end = if i + 1 < table.len() {
                    starts[i + 1]
                } else {
                    last_end
                };
                if !(self.qe < starts[i] || self.qs > child_end) {
                    self.stack.push(children[i]);
                }
            }
        }
        Ok(())
    }
}

impl Iterator for TreeRangeQuery<'_> {
    type Item = Result<AttrInterval>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(iv) = self.buffer.pop_front() {
                return Some(Ok(iv));
            }
            if self.done {
                return None;
            }
            match self.stack.pop() {
                Some(seq) => {
                    if let Err(e) = self.visit(seq) {
                        self.done = true;
                        self.stack.clear();
                        return Some(Err(e));
                    }
                }
                None => self.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HtConfig;
    use histree_core::{Error, Value};
    use tempfile::tempdir;

    fn iv(attr: u32, start: i64, end: i64, v: i64) -> AttrInterval {
        AttrInterval::new(AttributeId::new(attr), start, end, Value::Int(v))
    }

    fn attr(ids: &[u32]) -> Vec<AttributeId> {
        ids.iter().map(|&i| AttributeId::new(i)).collect()
    }

    fn collect(tree: &HistoryTree, ids: &[u32], qs: i64, qe: i64) -> Vec<AttrInterval> {
        tree.query_range(&attr(ids), qs, qe)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    /// Spread intervals across many nodes.
    fn multi_node_tree(dir: &std::path::Path) -> HistoryTree {
        let cfg = HtConfig::new(0)
            .with_block_size(4096)
            .with_max_children(2)
            .with_max_intervals(1);
        let tree = HistoryTree::create(&dir.join("q.ht"), cfg).unwrap();
        for i in 0..8i64 {
            tree.insert(iv(1, i * 10, i * 10 + 10, i)).unwrap();
        }
        tree
    }

    #[test]
    fn test_full_span_comes_back_in_time_order() {
        let dir = tempdir().unwrap();
        let tree = multi_node_tree(dir.path());

        let got = collect(&tree, &[1], 0, 80);
        assert_eq!(got.len(), 8);
        let starts: Vec<i64> = got.iter().map(|iv| iv.start).collect();
        assert_eq!(starts, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn test_partial_range_prunes_subtrees() {
        let dir = tempdir().unwrap();
        let tree = multi_node_tree(dir.path());

        // [25, 35] overlaps [20,30) and [30,40), and touches nothing else.
        let got = collect(&tree, &[1], 25, 35);
        let values: Vec<_> = got.iter().map(|iv| iv.value.clone()).collect();
        assert_eq!(values, vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_touching_endpoints_are_included() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(&dir.path().join("q.ht"), HtConfig::new(0)).unwrap();
        tree.insert(iv(1, 0, 10, 0)).unwrap();
        tree.insert(iv(1, 10, 20, 1)).unwrap();

        // Query start sitting exactly on an interval's end still matches.
        assert_eq!(collect(&tree, &[1], 10, 12).len(), 2);
        // Query end sitting exactly on an interval's start still matches.
        assert_eq!(collect(&tree, &[1], 5, 10).len(), 2);
        assert_eq!(collect(&tree, &[1], 11, 15).len(), 1);
    }

    #[test]
    fn test_attribute_filter() {
        let dir = tempdir().unwrap();
        let tree = HistoryTree::create(&dir.path().join("q.ht"), HtConfig::new(0)).unwrap();
        tree.insert(iv(1, 0, 10, 1)).unwrap();
        tree.insert(iv(2, 0, 10, 2)).unwrap();
        tree.insert(iv(3, 0, 10, 3)).unwrap();

        let got = collect(&tree, &[1, 3], 0, 10);
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|iv| iv.attr != AttributeId::new(2)));

        assert!(collect(&tree, &[], 0, 10).is_empty());
    }

    #[test]
    fn test_disjoint_range_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let tree = multi_node_tree(dir.path());
        assert!(collect(&tree, &[1], 200, 300).is_empty());
        assert!(collect(&tree, &[1], -50, -10).is_empty());
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let dir = tempdir().unwrap();
        let tree = multi_node_tree(dir.path());
        assert!(matches!(
            tree.query_range(&attr(&[1]), 30, 20),
            Err(Error::TimeRange { .. })
        ));
    }

    #[test]
    fn test_interval_held_by_routing_node_is_found() {
        let dir = tempdir().unwrap();
        let cfg = HtConfig::new(0)
            .with_block_size(4096)
            .with_max_children(2)
            .with_max_intervals(1);
        let tree = HistoryTree::create(&dir.path().join("q.ht"), cfg).unwrap();
        tree.insert(iv(1, 0, 2, 0)).unwrap();
        tree.insert(iv(1, 2, 4, 1)).unwrap();
        // Late arrival: settles in the open root core, not a leaf.
        tree.insert(iv(2, 1, 3, 9)).unwrap();

        let got = collect(&tree, &[1, 2], 0, 4);
        assert_eq!(got.len(), 3);
        assert!(got.iter().any(|x| x.attr == AttributeId::new(2)));
    }

    #[test]
    fn test_iterator_survives_split_after_creation() {
        let dir = tempdir().unwrap();
        let cfg = HtConfig::new(0).with_max_intervals(1);
        let tree = HistoryTree::create(&dir.path().join("q.ht"), cfg).unwrap();
        tree.insert(iv(1, 0, 10, 0)).unwrap();
        tree.insert(iv(1, 10, 20, 1)).unwrap();

        let query = tree.query_range(&attr(&[1]), 0, 1000).unwrap();

        // Splits the open leaf: the replacement leaf lands in the root's
        // child table while it exists only in memory, and the iterator
        // discovers it through the shared table.
        tree.insert(iv(1, 20, 30, 2)).unwrap();

        let got = query.collect::<Result<Vec<_>>>().unwrap();
        let starts: Vec<i64> = got.iter().map(|iv| iv.start).collect();
        assert_eq!(starts, vec![0, 10, 20]);
    }

    #[test]
    fn test_iterator_survives_extension_after_creation() {
        let dir = tempdir().unwrap();
        let cfg = HtConfig::new(0)
            .with_block_size(4096)
            .with_max_children(2)
            .with_max_intervals(1);
        let tree = HistoryTree::create(&dir.path().join("q.ht"), cfg).unwrap();
        for i in 0..4i64 {
            tree.insert(iv(1, i * 2, i * 2 + 2, i)).unwrap();
        }

        let query = tree.query_range(&attr(&[1]), 0, 1000).unwrap();

        // Fills a core below the root: its continuation node and the new
        // leaf are unwritten when the iterator hops to them.
        tree.insert(iv(1, 8, 10, 4)).unwrap();

        let got = query.collect::<Result<Vec<_>>>().unwrap();
        let starts: Vec<i64> = got.iter().map(|iv| iv.start).collect();
        assert_eq!(starts, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_query_works_after_reopen() {
        let dir = tempdir().unwrap();
        let tree = multi_node_tree(dir.path());
        tree.close().unwrap();
        drop(tree);

        let tree = HistoryTree::open(&dir.path().join("q.ht")).unwrap();
        let got = collect(&tree, &[1], 15, 45);
        let values: Vec<_> = got.iter().map(|iv| iv.value.clone()).collect();
        assert_eq!(
            values,
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
        );
    }
}
