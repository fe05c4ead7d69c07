//! History tree nodes and the node <-> block codec.
//!
//! Every node serializes into one fixed-size block; a node's position in the
//! file is `FILE_HEADER_SIZE + seq * block_size`, so lookups are a single
//! seek.
//!
//! # Block Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Common header (25 bytes)                                     │
//! │   seq (u32) | parent (i32, -1 = root) | node_start (i64)     │
//! │   node_end (i64) | type tag (u8)                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Core section (core nodes only)                               │
//! │   extension (i32, -1 = none) | nb_children (u32)             │
//! │   child seqs   (u32 x max_children, unused slots zeroed)     │
//! │   child starts (i64 x max_children, unused slots zeroed)     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Interval count (u32)                                         │
//! │ Interval records (variable)                                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Zero fill up to block_size - 4                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │ CRC32 of everything above (u32)                              │
//! └──────────────────────────────────────────────────────────────┘
//!
//! Interval record:
//! ┌──────────┬─────────────┬───────────┬─────────┬────────────────┐
//! │ attr (4) │ start (8)   │ end (8)   │ tag (1) │ payload (var)  │
//! └──────────┴─────────────┴───────────┴─────────┴────────────────┘
//! ```
//!
//! Cores hold intervals too: an interval whose start precedes the open
//! leaf's window lands in the deepest still-open ancestor that covers it,
//! so queries scan intervals at every node they visit, not only leaves.
//!
//! Locking: a node guards its mutable body (parent link, end time,
//! intervals) and, for cores, its child table with two separate RwLocks,
//! taken in body-then-table order. Once sealed a node never changes, so
//! readers of sealed nodes see plain immutable data.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use histree_core::{AttrInterval, AttributeId, Error, Result, Value};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::io::Cursor;

use crate::config::HtConfig;

/// Size of the common node header in bytes.
pub const NODE_HEADER_SIZE: usize = 25;

/// Size of the interval-count prefix in bytes.
pub const INTERVAL_COUNT_SIZE: usize = 4;

/// Size of the block trailer (CRC32) in bytes.
pub const NODE_TRAILER_SIZE: usize = 4;

/// Smallest possible interval record: null value, no payload.
pub const MIN_INTERVAL_DISK_SIZE: usize = 21;

/// Sequence number written for "no parent" / "no extension".
const SEQ_NONE: i32 = -1;

const NODE_TYPE_LEAF: u8 = 1;
const NODE_TYPE_CORE: u8 = 2;

const VALUE_TAG_NULL: u8 = 0;
const VALUE_TAG_INT: u8 = 1;
const VALUE_TAG_FLOAT: u8 = 2;
const VALUE_TAG_STR: u8 = 3;

/// Size of the core-specific section for a given fan-out.
pub fn core_section_size(max_children: u32) -> usize {
    // extension (4) + nb_children (4) + seqs (4 each) + starts (8 each)
    8 + 12 * max_children as usize
}

/// Serialized size of one interval record.
pub fn interval_disk_size(iv: &AttrInterval) -> usize {
    let payload = match &iv.value {
        Value::Null => 0,
        Value::Int(_) | Value::Float(_) => 8,
        Value::Str(s) => 4 + s.len(),
    };
    MIN_INTERVAL_DISK_SIZE + payload
}

/// Node kind, also the on-disk type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Bottom-level node: intervals only
    Leaf,
    /// Routing node: intervals plus a child table
    Core,
}

impl NodeType {
    fn as_tag(self) -> u8 {
        match self {
            NodeType::Leaf => NODE_TYPE_LEAF,
            NodeType::Core => NODE_TYPE_CORE,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            NODE_TYPE_LEAF => Ok(NodeType::Leaf),
            NODE_TYPE_CORE => Ok(NodeType::Core),
            other => Err(Error::corrupt(format!("unknown node type tag {other}"))),
        }
    }
}

/// A core node's child table.
///
/// `children[i]` was created when the tree's end had reached `starts[i]`,
/// and starts are non-decreasing, so the child responsible for a time `t`
/// is the last one with `starts[i] <= t`. `extension` names a sibling core
/// that continues this table once it is full.
#[derive(Debug, Clone, Default)]
pub struct ChildTable {
    children: Vec<u32>,
    starts: Vec<i64>,
    extension: Option<u32>,
}

impl ChildTable {
    /// Number of linked children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the table has no children yet.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Child sequence numbers, in link order.
    pub fn children(&self) -> &[u32] {
        &self.children
    }

    /// Per-child start times, parallel to [`ChildTable::children`].
    pub fn starts(&self) -> &[i64] {
        &self.starts
    }

    /// Continuation sibling, if this table overflowed.
    pub fn extension(&self) -> Option<u32> {
        self.extension
    }

    /// Iterate `(child_seq, child_start)` pairs in link order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, i64)> + '_ {
        self.children.iter().copied().zip(self.starts.iter().copied())
    }

    /// Last child whose start is <= `t`, with its slot index.
    pub fn best_child_at(&self, t: i64) -> Option<(usize, u32)> {
        let mut best = None;
        for (i, &start) in self.starts.iter().enumerate() {
            if start <= t {
                best = Some((i, self.children[i]));
            } else {
                break;
            }
        }
        best
    }
}

#[derive(Debug)]
struct NodeBody {
    parent: Option<u32>,
    node_end: Option<i64>,
    sealed: bool,
    intervals: Vec<AttrInterval>,
    data_bytes: usize,
}

#[derive(Debug)]
enum NodeVariant {
    Leaf,
    Core(RwLock<ChildTable>),
}

/// One node of the history tree.
///
/// Immutable identity (sequence number, start time, kind) lives in plain
/// fields; everything that changes while the node is open sits behind
/// locks. Sealing is one-way: `seal` records the end time, and after the
/// node is written out nothing mutates it again.
#[derive(Debug)]
pub struct HtNode {
    seq: u32,
    node_start: i64,
    body: RwLock<NodeBody>,
    variant: NodeVariant,
}

impl HtNode {
    /// Create an open leaf node.
    pub(crate) fn new_leaf(seq: u32, parent: Option<u32>, node_start: i64) -> Self {
        HtNode {
            seq,
            node_start,
            body: RwLock::new(NodeBody {
                parent,
                node_end: None,
                sealed: false,
                intervals: Vec::new(),
                data_bytes: 0,
            }),
            variant: NodeVariant::Leaf,
        }
    }

    /// Create an open core node with an empty child table.
    pub(crate) fn new_core(seq: u32, parent: Option<u32>, node_start: i64) -> Self {
        HtNode {
            seq,
            node_start,
            body: RwLock::new(NodeBody {
                parent,
                node_end: None,
                sealed: false,
                intervals: Vec::new(),
                data_bytes: 0,
            }),
            variant: NodeVariant::Core(RwLock::new(ChildTable::default())),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// This node's sequence number.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Earliest time this node covers.
    pub fn node_start(&self) -> i64 {
        self.node_start
    }

    /// Node kind.
    pub fn node_type(&self) -> NodeType {
        match self.variant {
            NodeVariant::Leaf => NodeType::Leaf,
            NodeVariant::Core(_) => NodeType::Core,
        }
    }

    /// Whether this is a core (routing) node.
    pub fn is_core(&self) -> bool {
        matches!(self.variant, NodeVariant::Core(_))
    }

    /// Parent sequence number; `None` for the root.
    pub fn parent(&self) -> Option<u32> {
        self.body.read().parent
    }

    pub(crate) fn set_parent(&self, parent: u32) {
        self.body.write().parent = Some(parent);
    }

    /// End time, recorded when the node was sealed.
    pub fn node_end(&self) -> Option<i64> {
        self.body.read().node_end
    }

    /// Whether the node has been sealed (one-way).
    pub fn is_sealed(&self) -> bool {
        self.body.read().sealed
    }

    /// Number of intervals currently stored.
    pub fn interval_count(&self) -> usize {
        self.body.read().intervals.len()
    }

    /// Bytes the stored interval records occupy on disk.
    pub fn data_bytes(&self) -> usize {
        self.body.read().data_bytes
    }

    // =========================================================================
    // Interval storage
    // =========================================================================

    fn data_budget(&self, cfg: &HtConfig) -> usize {
        match self.variant {
            NodeVariant::Leaf => cfg.leaf_data_budget(),
            NodeVariant::Core(_) => cfg.core_data_budget(),
        }
    }

    /// Whether `iv` fits under both capacity limits.
    pub(crate) fn has_room(&self, iv: &AttrInterval, cfg: &HtConfig) -> bool {
        let size = interval_disk_size(iv);
        let body = self.body.read();
        body.intervals.len() < cfg.max_intervals as usize
            && body.data_bytes + size <= self.data_budget(cfg)
    }

    /// Append an interval if both capacity limits allow it.
    ///
    /// Returns false when the node is full (count cap reached or the record
    /// does not fit the block's remaining bytes); the caller then splits.
    pub(crate) fn try_insert(&self, iv: AttrInterval, cfg: &HtConfig) -> bool {
        let size = interval_disk_size(&iv);
        let budget = self.data_budget(cfg);
        let mut body = self.body.write();
        debug_assert!(!body.sealed, "insert into sealed node {}", self.seq);
        debug_assert!(iv.start >= self.node_start);
        if body.intervals.len() >= cfg.max_intervals as usize || body.data_bytes + size > budget {
            return false;
        }
        body.data_bytes += size;
        body.intervals.push(iv);
        true
    }

    /// Record the end time; the node accepts no further mutation.
    ///
    /// Sealing again with the same end is a no-op, so a close interrupted
    /// by an I/O failure can be retried.
    pub(crate) fn seal(&self, end: i64) {
        let mut body = self.body.write();
        if body.sealed {
            debug_assert_eq!(body.node_end, Some(end), "node {} resealed at a different end", self.seq);
            return;
        }
        debug_assert!(end >= self.node_start);
        body.node_end = Some(end);
        body.sealed = true;
    }

    /// Latest interval covering `t` for `attr`, scanning newest-first.
    pub fn find_at(&self, attr: AttributeId, t: i64) -> Option<AttrInterval> {
        let body = self.body.read();
        body.intervals
            .iter()
            .rev()
            .find(|iv| iv.attr == attr && iv.contains(t))
            .cloned()
    }

    /// Collect intervals of the selected attributes overlapping `[qs, qe]`.
    pub(crate) fn matching_intervals(
        &self,
        qs: i64,
        qe: i64,
        attrs: &FxHashSet<AttributeId>,
        out: &mut Vec<AttrInterval>,
    ) {
        let body = self.body.read();
        for iv in &body.intervals {
            if attrs.contains(&iv.attr) && iv.overlaps(qs, qe) {
                out.push(iv.clone());
            }
        }
    }

    // =========================================================================
    // Child table (core nodes)
    // =========================================================================

    fn table(&self) -> Option<&RwLock<ChildTable>> {
        match &self.variant {
            NodeVariant::Leaf => None,
            NodeVariant::Core(t) => Some(t),
        }
    }

    /// Consistent copy of the child table; `None` for leaves.
    pub fn child_snapshot(&self) -> Option<ChildTable> {
        self.table().map(|t| t.read().clone())
    }

    /// Number of linked children (0 for leaves).
    pub fn child_count(&self) -> usize {
        self.table().map_or(0, |t| t.read().len())
    }

    /// Continuation sibling of this node's child table, if any.
    pub fn extension(&self) -> Option<u32> {
        self.table().and_then(|t| t.read().extension)
    }

    /// Whether another child link fits.
    pub(crate) fn has_child_room(&self, max_children: u32) -> bool {
        self.table()
            .map_or(false, |t| t.read().len() < max_children as usize)
    }

    /// Link a new child at the end of the table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when the table already holds
    /// `max_children` links or the node is a leaf; both indicate a bug in
    /// the split logic, never a recoverable condition.
    pub(crate) fn link_new_child(
        &self,
        child_seq: u32,
        child_start: i64,
        max_children: u32,
    ) -> Result<()> {
        let table = self.table().ok_or_else(|| {
            Error::CapacityExceeded(format!("leaf node {} cannot hold children", self.seq))
        })?;
        let mut t = table.write();
        if t.children.len() >= max_children as usize {
            return Err(Error::CapacityExceeded(format!(
                "node {} already has {} children",
                self.seq, max_children
            )));
        }
        debug_assert!(
            t.starts.last().map_or(true, |&s| s <= child_start),
            "child starts must be non-decreasing"
        );
        t.children.push(child_seq);
        t.starts.push(child_start);
        Ok(())
    }

    /// Point the child table's continuation at a sibling core node.
    pub(crate) fn set_extension(&self, seq: u32) -> Result<()> {
        let table = self.table().ok_or_else(|| {
            Error::CapacityExceeded(format!("leaf node {} cannot take an extension", self.seq))
        })?;
        table.write().extension = Some(seq);
        Ok(())
    }

    // =========================================================================
    // Block codec
    // =========================================================================

    /// Serialize into one zero-padded, CRC-trailed block.
    ///
    /// Only sealed nodes are ever written; the end time must be known.
    pub(crate) fn to_block(&self, cfg: &HtConfig) -> Result<Vec<u8>> {
        let block_size = cfg.block_size as usize;
        let body = self.body.read();
        let end = body
            .node_end
            .ok_or_else(|| Error::corrupt(format!("node {} written before sealing", self.seq)))?;

        let mut buf = Vec::with_capacity(block_size);
        buf.write_u32::<LittleEndian>(self.seq)?;
        buf.write_i32::<LittleEndian>(body.parent.map_or(SEQ_NONE, |p| p as i32))?;
        buf.write_i64::<LittleEndian>(self.node_start)?;
        buf.write_i64::<LittleEndian>(end)?;
        buf.push(self.node_type().as_tag());

        if let Some(table) = self.table() {
            let t = table.read();
            buf.write_i32::<LittleEndian>(t.extension.map_or(SEQ_NONE, |e| e as i32))?;
            buf.write_u32::<LittleEndian>(t.children.len() as u32)?;
            for i in 0..cfg.max_children as usize {
                buf.write_u32::<LittleEndian>(t.children.get(i).copied().unwrap_or(0))?;
            }
            for i in 0..cfg.max_children as usize {
                buf.write_i64::<LittleEndian>(t.starts.get(i).copied().unwrap_or(0))?;
            }
        }

        buf.write_u32::<LittleEndian>(body.intervals.len() as u32)?;
        for iv in &body.intervals {
            write_interval(&mut buf, iv)?;
        }

        if buf.len() + NODE_TRAILER_SIZE > block_size {
            return Err(Error::CapacityExceeded(format!(
                "node {} overflows its block: {} bytes used of {}",
                self.seq,
                buf.len(),
                block_size
            )));
        }
        buf.resize(block_size - NODE_TRAILER_SIZE, 0);

        let mut hasher = Hasher::new();
        hasher.update(&buf);
        let crc = hasher.finalize();
        buf.write_u32::<LittleEndian>(crc)?;
        Ok(buf)
    }

    /// Decode one block back into a (sealed) node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFormat`] for a wrong block length, checksum
    /// mismatch, unknown type tag, counts that exceed the configured
    /// geometry, or truncated records.
    pub(crate) fn from_block(buf: &[u8], cfg: &HtConfig) -> Result<HtNode> {
        let block_size = cfg.block_size as usize;
        if buf.len() != block_size {
            return Err(Error::corrupt(format!(
                "block is {} bytes, expected {}",
                buf.len(),
                block_size
            )));
        }

        let payload = &buf[..block_size - NODE_TRAILER_SIZE];
        let stored_crc = u32::from_le_bytes(
            buf[block_size - NODE_TRAILER_SIZE..]
                .try_into()
                .map_err(|_| Error::corrupt("truncated block trailer"))?,
        );
        let mut hasher = Hasher::new();
        hasher.update(payload);
        let computed_crc = hasher.finalize();
        if computed_crc != stored_crc {
            return Err(Error::corrupt(format!(
                "checksum mismatch: expected {stored_crc:08x}, computed {computed_crc:08x}"
            )));
        }

        let mut cur = Cursor::new(payload);
        let seq = read_u32(&mut cur)?;
        let parent_raw = read_i32(&mut cur)?;
        let node_start = read_i64(&mut cur)?;
        let node_end = read_i64(&mut cur)?;
        let tag = read_u8(&mut cur)?;
        let node_type = NodeType::from_tag(tag)?;

        let parent = if parent_raw == SEQ_NONE {
            None
        } else {
            Some(parent_raw as u32)
        };

        let variant = match node_type {
            NodeType::Leaf => NodeVariant::Leaf,
            NodeType::Core => {
                let extension_raw = read_i32(&mut cur)?;
                let nb_children = read_u32(&mut cur)? as usize;
                if nb_children == 0 || nb_children > cfg.max_children as usize {
                    return Err(Error::corrupt(format!(
                        "core node {seq} claims {nb_children} children (max {})",
                        cfg.max_children
                    )));
                }
                let mut children = Vec::with_capacity(nb_children);
                let mut starts = Vec::with_capacity(nb_children);
                for i in 0..cfg.max_children as usize {
                    let child = read_u32(&mut cur)?;
                    if i < nb_children {
                        children.push(child);
                    }
                }
                for i in 0..cfg.max_children as usize {
                    let start = read_i64(&mut cur)?;
                    if i < nb_children {
                        starts.push(start);
                    }
                }
                if starts.windows(2).any(|w| w[0] > w[1]) {
                    return Err(Error::corrupt(format!(
                        "core node {seq} has decreasing child starts"
                    )));
                }
                let extension = if extension_raw == SEQ_NONE {
                    None
                } else {
                    Some(extension_raw as u32)
                };
                NodeVariant::Core(RwLock::new(ChildTable {
                    children,
                    starts,
                    extension,
                }))
            }
        };

        let count = read_u32(&mut cur)? as usize;
        if count > cfg.max_intervals as usize {
            return Err(Error::corrupt(format!(
                "node {seq} claims {count} intervals (max {})",
                cfg.max_intervals
            )));
        }
        let mut intervals = Vec::with_capacity(count);
        let mut data_bytes = 0;
        for _ in 0..count {
            let iv = read_interval(&mut cur)?;
            data_bytes += interval_disk_size(&iv);
            intervals.push(iv);
        }

        Ok(HtNode {
            seq,
            node_start,
            body: RwLock::new(NodeBody {
                parent,
                node_end: Some(node_end),
                sealed: true,
                intervals,
                data_bytes,
            }),
            variant,
        })
    }
}

fn write_interval(buf: &mut Vec<u8>, iv: &AttrInterval) -> Result<()> {
    buf.write_u32::<LittleEndian>(iv.attr.as_u32())?;
    buf.write_i64::<LittleEndian>(iv.start)?;
    buf.write_i64::<LittleEndian>(iv.end)?;
    match &iv.value {
        Value::Null => buf.push(VALUE_TAG_NULL),
        Value::Int(i) => {
            buf.push(VALUE_TAG_INT);
            buf.write_i64::<LittleEndian>(*i)?;
        }
        Value::Float(f) => {
            buf.push(VALUE_TAG_FLOAT);
            buf.write_f64::<LittleEndian>(*f)?;
        }
        Value::Str(s) => {
            buf.push(VALUE_TAG_STR);
            buf.write_u32::<LittleEndian>(s.len() as u32)?;
            buf.extend_from_slice(s.as_bytes());
        }
    }
    Ok(())
}

fn read_interval(cur: &mut Cursor<&[u8]>) -> Result<AttrInterval> {
    let attr = AttributeId::new(read_u32(cur)?);
    let start = read_i64(cur)?;
    let end = read_i64(cur)?;
    let tag = read_u8(cur)?;
    let value = match tag {
        VALUE_TAG_NULL => Value::Null,
        VALUE_TAG_INT => Value::Int(read_i64(cur)?),
        VALUE_TAG_FLOAT => Value::Float(cur.read_f64::<LittleEndian>().map_err(truncated)?),
        VALUE_TAG_STR => {
            let len = read_u32(cur)? as usize;
            let pos = cur.position() as usize;
            let data = cur.get_ref();
            let bytes = data
                .get(pos..pos + len)
                .ok_or_else(|| Error::corrupt("truncated string payload"))?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| Error::corrupt("interval value is not valid UTF-8"))?
                .to_string();
            cur.set_position((pos + len) as u64);
            Value::Str(s)
        }
        other => return Err(Error::corrupt(format!("unknown value tag {other}"))),
    };
    if start > end {
        return Err(Error::corrupt(format!(
            "interval record with start {start} > end {end}"
        )));
    }
    Ok(AttrInterval::new(attr, start, end, value))
}

// Readers inside a block: any EOF means the block content lies about its
// own counts, which is corruption, not an I/O failure.
fn truncated(_: std::io::Error) -> Error {
    Error::corrupt("truncated interval record")
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8> {
    cur.read_u8().map_err(truncated)
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32> {
    cur.read_u32::<LittleEndian>().map_err(truncated)
}

fn read_i32(cur: &mut Cursor<&[u8]>) -> Result<i32> {
    cur.read_i32::<LittleEndian>().map_err(truncated)
}

fn read_i64(cur: &mut Cursor<&[u8]>) -> Result<i64> {
    cur.read_i64::<LittleEndian>().map_err(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use histree_core::TIME_OPEN;

    fn cfg() -> HtConfig {
        HtConfig::new(0)
            .with_block_size(4096)
            .with_max_children(8)
            .with_max_intervals(64)
    }

    fn iv(attr: u32, start: i64, end: i64, value: Value) -> AttrInterval {
        AttrInterval::new(AttributeId::new(attr), start, end, value)
    }

    fn filter(ids: &[u32]) -> FxHashSet<AttributeId> {
        ids.iter().map(|&i| AttributeId::new(i)).collect()
    }

    // ========== Leaf Codec Tests ==========

    #[test]
    fn test_leaf_roundtrip() {
        let cfg = cfg();
        let node = HtNode::new_leaf(3, Some(1), 100);
        assert!(node.try_insert(iv(0, 100, 150, Value::Str("running".into())), &cfg));
        assert!(node.try_insert(iv(1, 120, 180, Value::Int(-42)), &cfg));
        assert!(node.try_insert(iv(2, 150, TIME_OPEN, Value::Float(0.5)), &cfg));
        assert!(node.try_insert(iv(0, 150, 160, Value::Null), &cfg));
        node.seal(200);

        let block = node.to_block(&cfg).unwrap();
        assert_eq!(block.len(), cfg.block_size as usize);

        let parsed = HtNode::from_block(&block, &cfg).unwrap();
        assert_eq!(parsed.seq(), 3);
        assert_eq!(parsed.parent(), Some(1));
        assert_eq!(parsed.node_start(), 100);
        assert_eq!(parsed.node_end(), Some(200));
        assert_eq!(parsed.node_type(), NodeType::Leaf);
        assert!(parsed.is_sealed());
        assert_eq!(parsed.interval_count(), 4);
        assert_eq!(parsed.data_bytes(), node.data_bytes());
        assert_eq!(
            parsed.find_at(AttributeId::new(0), 120),
            Some(iv(0, 100, 150, Value::Str("running".into())))
        );
        assert_eq!(
            parsed.find_at(AttributeId::new(2), i64::MAX - 1),
            Some(iv(2, 150, TIME_OPEN, Value::Float(0.5)))
        );
    }

    #[test]
    fn test_core_roundtrip_with_extension() {
        let cfg = cfg();
        let node = HtNode::new_core(7, None, 0);
        node.link_new_child(1, 0, cfg.max_children).unwrap();
        node.link_new_child(4, 50, cfg.max_children).unwrap();
        node.link_new_child(6, 50, cfg.max_children).unwrap();
        node.set_extension(9).unwrap();
        assert!(node.try_insert(iv(5, 10, 90, Value::Int(1)), &cfg));
        node.seal(120);

        let block = node.to_block(&cfg).unwrap();
        let parsed = HtNode::from_block(&block, &cfg).unwrap();
        assert_eq!(parsed.node_type(), NodeType::Core);
        assert_eq!(parsed.parent(), None);
        assert_eq!(parsed.extension(), Some(9));
        let table = parsed.child_snapshot().unwrap();
        assert_eq!(table.children(), &[1, 4, 6]);
        assert_eq!(table.starts(), &[0, 50, 50]);
        assert_eq!(parsed.interval_count(), 1);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let cfg = cfg();
        let node = HtNode::new_leaf(0, None, 0);
        assert!(node.try_insert(iv(0, 0, 10, Value::Str("a".into())), &cfg));
        node.seal(10);
        assert_eq!(node.to_block(&cfg).unwrap(), node.to_block(&cfg).unwrap());
    }

    #[test]
    fn test_unsealed_node_refuses_to_serialize() {
        let cfg = cfg();
        let node = HtNode::new_leaf(0, None, 0);
        assert!(matches!(
            node.to_block(&cfg),
            Err(Error::CorruptFormat(_))
        ));
    }

    // ========== Corruption Tests ==========

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let cfg = cfg();
        let node = HtNode::new_leaf(0, None, 0);
        assert!(node.try_insert(iv(0, 0, 10, Value::Int(7)), &cfg));
        node.seal(10);
        let mut block = node.to_block(&cfg).unwrap();
        block[40] ^= 0xFF;
        let err = HtNode::from_block(&block, &cfg).unwrap_err();
        match err {
            Error::CorruptFormat(msg) => assert!(msg.contains("checksum mismatch")),
            other => panic!("expected CorruptFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_block_length_rejected() {
        let cfg = cfg();
        let err = HtNode::from_block(&[0u8; 100], &cfg).unwrap_err();
        assert!(matches!(err, Error::CorruptFormat(_)));
    }

    #[test]
    fn test_bad_type_tag_rejected() {
        let cfg = cfg();
        let node = HtNode::new_leaf(0, None, 0);
        node.seal(10);
        let mut block = node.to_block(&cfg).unwrap();
        block[24] = 0x7F; // type tag offset
        recompute_crc(&mut block);
        let err = HtNode::from_block(&block, &cfg).unwrap_err();
        match err {
            Error::CorruptFormat(msg) => assert!(msg.contains("type tag")),
            other => panic!("expected CorruptFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_overlong_string_payload_rejected() {
        let cfg = cfg();
        let node = HtNode::new_leaf(0, None, 0);
        assert!(node.try_insert(iv(0, 0, 10, Value::Str("abc".into())), &cfg));
        node.seal(10);
        let mut block = node.to_block(&cfg).unwrap();
        // String length field sits after header + count + attr/start/end/tag.
        let len_offset = NODE_HEADER_SIZE + INTERVAL_COUNT_SIZE + 21;
        block[len_offset..len_offset + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        recompute_crc(&mut block);
        assert!(matches!(
            HtNode::from_block(&block, &cfg),
            Err(Error::CorruptFormat(_))
        ));
    }

    fn recompute_crc(block: &mut [u8]) {
        let len = block.len();
        let mut hasher = Hasher::new();
        hasher.update(&block[..len - NODE_TRAILER_SIZE]);
        let crc = hasher.finalize();
        block[len - NODE_TRAILER_SIZE..].copy_from_slice(&crc.to_le_bytes());
    }

    // ========== Capacity Tests ==========

    #[test]
    fn test_interval_count_cap() {
        let cfg = cfg().with_max_intervals(2);
        let node = HtNode::new_leaf(0, None, 0);
        assert!(node.try_insert(iv(0, 0, 1, Value::Null), &cfg));
        assert!(node.try_insert(iv(0, 1, 2, Value::Null), &cfg));
        assert!(!node.try_insert(iv(0, 2, 3, Value::Null), &cfg));
        assert_eq!(node.interval_count(), 2);
    }

    #[test]
    fn test_byte_budget_cap() {
        // Block so small only a couple of records fit.
        let cfg = HtConfig::new(0)
            .with_block_size(128)
            .with_max_children(2)
            .with_max_intervals(1000);
        let node = HtNode::new_leaf(0, None, 0);
        let big = iv(0, 0, 1, Value::Str("x".repeat(60)));
        assert!(node.try_insert(big.clone(), &cfg));
        assert!(!node.try_insert(big, &cfg));
    }

    #[test]
    fn test_link_capacity_exceeded() {
        let cfg = cfg().with_max_children(2);
        let node = HtNode::new_core(0, None, 0);
        node.link_new_child(1, 0, cfg.max_children).unwrap();
        node.link_new_child(2, 5, cfg.max_children).unwrap();
        let err = node.link_new_child(3, 9, cfg.max_children).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded(_)));
        assert!(!node.has_child_room(cfg.max_children));
    }

    #[test]
    fn test_leaf_refuses_children() {
        let node = HtNode::new_leaf(0, None, 0);
        assert!(node.link_new_child(1, 0, 8).is_err());
        assert!(node.set_extension(1).is_err());
        assert_eq!(node.child_count(), 0);
        assert!(node.child_snapshot().is_none());
    }

    // ========== Routing Tests ==========

    #[test]
    fn test_best_child_at_picks_last_covering_slot() {
        let node = HtNode::new_core(0, None, 0);
        node.link_new_child(1, 0, 8).unwrap();
        node.link_new_child(2, 10, 8).unwrap();
        node.link_new_child(3, 20, 8).unwrap();
        let table = node.child_snapshot().unwrap();
        assert_eq!(table.best_child_at(0), Some((0, 1)));
        assert_eq!(table.best_child_at(9), Some((0, 1)));
        assert_eq!(table.best_child_at(10), Some((1, 2)));
        assert_eq!(table.best_child_at(25), Some((2, 3)));
        assert_eq!(table.best_child_at(-1), None);
    }

    #[test]
    fn test_best_child_at_equal_starts_prefers_newest() {
        let node = HtNode::new_core(0, None, 0);
        node.link_new_child(1, 5, 8).unwrap();
        node.link_new_child(2, 5, 8).unwrap();
        let table = node.child_snapshot().unwrap();
        assert_eq!(table.best_child_at(5), Some((1, 2)));
    }

    // ========== Query Helper Tests ==========

    #[test]
    fn test_find_at_last_insert_wins() {
        let cfg = cfg();
        let node = HtNode::new_leaf(0, None, 0);
        assert!(node.try_insert(iv(0, 0, 10, Value::Int(1)), &cfg));
        assert!(node.try_insert(iv(0, 0, 10, Value::Int(2)), &cfg));
        assert_eq!(
            node.find_at(AttributeId::new(0), 5),
            Some(iv(0, 0, 10, Value::Int(2)))
        );
        assert_eq!(node.find_at(AttributeId::new(0), 10), None);
        assert_eq!(node.find_at(AttributeId::new(9), 5), None);
    }

    #[test]
    fn test_matching_intervals_filters_attr_and_range() {
        let cfg = cfg();
        let node = HtNode::new_leaf(0, None, 0);
        assert!(node.try_insert(iv(0, 0, 10, Value::Int(1)), &cfg));
        assert!(node.try_insert(iv(1, 5, 15, Value::Int(2)), &cfg));
        assert!(node.try_insert(iv(0, 20, 30, Value::Int(3)), &cfg));

        let mut out = Vec::new();
        node.matching_intervals(0, 12, &filter(&[0]), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, Value::Int(1));

        out.clear();
        node.matching_intervals(10, 20, &filter(&[0, 1]), &mut out);
        // [0,10) touches qs=10, [5,15) overlaps, [20,30) touches qe=20.
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_interval_disk_size_by_value_kind() {
        assert_eq!(interval_disk_size(&iv(0, 0, 1, Value::Null)), 21);
        assert_eq!(interval_disk_size(&iv(0, 0, 1, Value::Int(5))), 29);
        assert_eq!(interval_disk_size(&iv(0, 0, 1, Value::Float(0.1))), 29);
        assert_eq!(
            interval_disk_size(&iv(0, 0, 1, Value::Str("abcd".into()))),
            29
        );
    }
}
