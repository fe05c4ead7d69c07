//! History file header and block-level I/O.
//!
//! A history file is one header page followed by fixed-size node blocks:
//!
//! ```text
//! ┌─────────────────────────────┐ offset 0
//! │ File header (4096 reserved) │
//! ├─────────────────────────────┤ offset 4096
//! │ Node block, seq 0           │
//! ├─────────────────────────────┤ offset 4096 + block_size
//! │ Node block, seq 1           │
//! │ ...                         │
//! └─────────────────────────────┘
//! ```
//!
//! The header page stays zeroed while the tree is being built and is only
//! written on close, so a file that was never closed fails the magic check
//! on reopen instead of silently yielding a half-built tree.

use histree_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::HtConfig;
use crate::node::HtNode;

/// Magic bytes identifying a history tree file: "HTRE"
pub const FILE_MAGIC: [u8; 4] = *b"HTRE";

/// Current file format version
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Bytes reserved for the file header; node blocks start here.
pub const FILE_HEADER_SIZE: usize = 4096;

/// Bytes of the header page actually encoded.
const HEADER_ENCODED_SIZE: usize = 52;

/// Direct-mapped node cache slots (seq % slots).
const NODE_CACHE_SLOTS: usize = 256;

/// History file header.
///
/// Written once, at close; everything a reader needs to decode the blocks
/// (geometry) and to route queries (root, covered span) lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic bytes: "HTRE"
    pub magic: [u8; 4],
    /// Format version for forward compatibility
    pub format_version: u32,
    /// Size in bytes of every node block
    pub block_size: u32,
    /// Maximum child links per core node
    pub max_children: u32,
    /// Maximum intervals per node
    pub max_intervals: u32,
    /// Number of node blocks in the file
    pub node_count: u32,
    /// Sequence number of the root node
    pub root_seq: u32,
    /// Earliest time the tree covers
    pub tree_start: i64,
    /// Latest time the tree covers
    pub tree_end: i64,
    /// Microseconds since the epoch when the header was written
    pub written_at: u64,
}

impl FileHeader {
    /// Build the header for a finished tree.
    pub fn new(cfg: &HtConfig, node_count: u32, root_seq: u32, tree_end: i64) -> Self {
        let written_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        FileHeader {
            magic: FILE_MAGIC,
            format_version: FILE_FORMAT_VERSION,
            block_size: cfg.block_size,
            max_children: cfg.max_children,
            max_intervals: cfg.max_intervals,
            node_count,
            root_seq,
            tree_start: cfg.tree_start,
            tree_end,
            written_at,
        }
    }

    /// Serialize the header to its encoded form.
    pub fn to_bytes(&self) -> [u8; HEADER_ENCODED_SIZE] {
        let mut bytes = [0u8; HEADER_ENCODED_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.max_children.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.max_intervals.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.node_count.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.root_seq.to_le_bytes());
        bytes[28..36].copy_from_slice(&self.tree_start.to_le_bytes());
        bytes[36..44].copy_from_slice(&self.tree_end.to_le_bytes());
        bytes[44..52].copy_from_slice(&self.written_at.to_le_bytes());
        bytes
    }

    /// Deserialize and validate a header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptFormat`] on wrong magic bytes or an
    /// unsupported format version.
    pub fn from_bytes(bytes: &[u8; HEADER_ENCODED_SIZE]) -> Result<Self> {
        let header = FileHeader {
            magic: bytes[0..4].try_into().map_err(|_| bad_header())?,
            format_version: read_u32(&bytes[4..8])?,
            block_size: read_u32(&bytes[8..12])?,
            max_children: read_u32(&bytes[12..16])?,
            max_intervals: read_u32(&bytes[16..20])?,
            node_count: read_u32(&bytes[20..24])?,
            root_seq: read_u32(&bytes[24..28])?,
            tree_start: read_i64(&bytes[28..36])?,
            tree_end: read_i64(&bytes[36..44])?,
            written_at: read_u64(&bytes[44..52])?,
        };
        if header.magic != FILE_MAGIC {
            return Err(Error::corrupt(format!(
                "bad magic bytes {:02x?}, not a history tree file",
                header.magic
            )));
        }
        if header.format_version > FILE_FORMAT_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported format version {} (newest supported: {})",
                header.format_version, FILE_FORMAT_VERSION
            )));
        }
        Ok(header)
    }

    /// Tree geometry recorded in this header.
    pub fn config(&self) -> HtConfig {
        HtConfig::new(self.tree_start)
            .with_block_size(self.block_size)
            .with_max_children(self.max_children)
            .with_max_intervals(self.max_intervals)
    }
}

fn bad_header() -> Error {
    Error::corrupt("truncated file header")
}

fn read_u32(bytes: &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(bytes.try_into().map_err(|_| bad_header())?))
}

fn read_i64(bytes: &[u8]) -> Result<i64> {
    Ok(i64::from_le_bytes(bytes.try_into().map_err(|_| bad_header())?))
}

fn read_u64(bytes: &[u8]) -> Result<u64> {
    Ok(u64::from_le_bytes(bytes.try_into().map_err(|_| bad_header())?))
}

/// Block-granular file access with a small read cache.
///
/// One file handle serves all readers and the writer; the handle is seeked
/// per call under a mutex. Sealed nodes are immutable, so the direct-mapped
/// cache never needs invalidation, only eviction on slot collision.
pub(crate) struct BlockIo {
    file: Mutex<File>,
    cfg: HtConfig,
    cache: Vec<RwLock<Option<Arc<HtNode>>>>,
}

impl BlockIo {
    /// Create a new history file with a zeroed header page.
    pub(crate) fn create(path: &Path, cfg: HtConfig) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&[0u8; FILE_HEADER_SIZE])?;
        Ok(Self::with_file(file, cfg))
    }

    /// Open an existing, finished history file read-only.
    pub(crate) fn open(path: &Path) -> Result<(Self, FileHeader)> {
        let mut file = OpenOptions::new().read(true).open(path)?;

        let mut header_bytes = [0u8; HEADER_ENCODED_SIZE];
        file.read_exact(&mut header_bytes).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                bad_header()
            } else {
                Error::Io(e)
            }
        })?;
        let header = FileHeader::from_bytes(&header_bytes)?;

        let cfg = header.config();
        cfg.validate()?;
        let expected_len =
            FILE_HEADER_SIZE as u64 + header.node_count as u64 * header.block_size as u64;
        let actual_len = file.seek(SeekFrom::End(0))?;
        if actual_len != expected_len {
            return Err(Error::corrupt(format!(
                "file is {actual_len} bytes, header implies {expected_len}"
            )));
        }

        Ok((Self::with_file(file, cfg), header))
    }

    fn with_file(file: File, cfg: HtConfig) -> Self {
        let mut cache = Vec::with_capacity(NODE_CACHE_SLOTS);
        cache.resize_with(NODE_CACHE_SLOTS, || RwLock::new(None));
        BlockIo {
            file: Mutex::new(file),
            cfg,
            cache,
        }
    }

    fn block_offset(&self, seq: u32) -> u64 {
        FILE_HEADER_SIZE as u64 + seq as u64 * self.cfg.block_size as u64
    }

    /// Read one node, serving repeats from the cache.
    pub(crate) fn read_node(&self, seq: u32) -> Result<Arc<HtNode>> {
        let slot = &self.cache[seq as usize % NODE_CACHE_SLOTS];
        if let Some(node) = slot.read().as_ref() {
            if node.seq() == seq {
                return Ok(Arc::clone(node));
            }
        }

        let mut buf = vec![0u8; self.cfg.block_size as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.block_offset(seq)))?;
            file.read_exact(&mut buf).map_err(|e| {
                if e.kind() == ErrorKind::UnexpectedEof {
                    Error::corrupt(format!("node {seq} extends past end of file"))
                } else {
                    Error::Io(e)
                }
            })?;
        }

        let node = HtNode::from_block(&buf, &self.cfg)?;
        if node.seq() != seq {
            return Err(Error::corrupt(format!(
                "block at position {seq} claims sequence number {}",
                node.seq()
            )));
        }
        let node = Arc::new(node);
        *slot.write() = Some(Arc::clone(&node));
        Ok(node)
    }

    /// Write a sealed node at its block position and warm the cache.
    pub(crate) fn write_node(&self, node: &Arc<HtNode>) -> Result<()> {
        let block = node.to_block(&self.cfg)?;
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.block_offset(node.seq())))?;
            file.write_all(&block)?;
        }
        *self.cache[node.seq() as usize % NODE_CACHE_SLOTS].write() = Some(Arc::clone(node));
        Ok(())
    }

    /// Write the header page at offset 0.
    pub(crate) fn write_header(&self, header: &FileHeader) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes())?;
        Ok(())
    }

    /// Flush file contents to stable storage.
    pub(crate) fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}
