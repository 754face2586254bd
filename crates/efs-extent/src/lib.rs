#![forbid(unsafe_code)]
//! Extent-tree engine: cursor traversal and in-place mutation.
//!
//! An `ExtentHandle` is a stateful cursor over one inode's extent B+tree.
//! The tree root lives inside the inode's 60-byte `i_block` region; deeper
//! nodes occupy one filesystem block each and are loaded lazily on
//! descent. The handle keeps one `PathFrame` per tree level; traversal is
//! expressed as atomic frame transitions (sibling step, descend, ascend)
//! that compound operations are decoded into.
//!
//! Mutations edit the current frame's buffer in place and write it back:
//! root edits rewrite the inode, deeper edits rewrite the one filesystem
//! block addressed by the parent's current index record.

use efs_core::Filesystem;
use efs_error::{EfsError, Result};
use efs_ondisk::{
    DiskExtent, DiskExtentIndex, EXT_INIT_MAX_LEN, EXTENT_RECORD_SIZE, INODE_BLOCK_OFFSET,
    INODE_BLOCK_SIZE, extent_header_verify, inode_extent_root, record_offset,
    set_header_entries,
};
use efs_types::{BlockNumber, EXT4_EXTENTS_FL, InodeNumber};
use tracing::{debug, trace};

// ── Extent records returned to callers ──────────────────────────────────────

/// The cursor sits on a leaf record.
pub const EXTENT_FLAG_LEAF: u32 = 0x0001;
/// The leaf's logical range is allocated but reads as zeroes.
pub const EXTENT_FLAG_UNINIT: u32 = 0x0002;
/// The cursor has passed through this interior node before.
pub const EXTENT_FLAG_SECOND_VISIT: u32 = 0x0004;

/// Insert the new record after the cursor instead of before it.
pub const EXTENT_INSERT_AFTER: u32 = 0x0001;

/// An extent as seen through the cursor.
///
/// At a leaf, `physical` is the mapped block run and `len` the run length
/// (with the uninitialized bias already removed). At an interior node,
/// `physical` addresses the child node and `len` spans the subtree's
/// logical range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub logical: u64,
    pub physical: u64,
    pub len: u64,
    pub flags: u32,
}

// ── Operations ──────────────────────────────────────────────────────────────

/// Cursor operations accepted by [`ExtentHandle::get`].
///
/// `Next`, `Prev`, `NextLeaf`, `PrevLeaf` and `LastLeaf` are compound:
/// they are decoded into a sequence of the atomic operations below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExtentOp {
    Current = 0,
    Root = 1,
    LastLeaf = 2,
    FirstSib = 3,
    LastSib = 4,
    NextSib = 5,
    PrevSib = 6,
    NextLeaf = 7,
    PrevLeaf = 8,
    Next = 9,
    Prev = 10,
    Up = 11,
    Down = 12,
    DownAndLast = 13,
}

impl ExtentOp {
    /// Decode a numeric operation code.
    pub fn from_raw(op: u32) -> Result<Self> {
        Ok(match op {
            0 => Self::Current,
            1 => Self::Root,
            2 => Self::LastLeaf,
            3 => Self::FirstSib,
            4 => Self::LastSib,
            5 => Self::NextSib,
            6 => Self::PrevSib,
            7 => Self::NextLeaf,
            8 => Self::PrevLeaf,
            9 => Self::Next,
            10 => Self::Prev,
            11 => Self::Up,
            12 => Self::Down,
            13 => Self::DownAndLast,
            _ => return Err(EfsError::OpNotSupported),
        })
    }
}

// ── Geometry report ─────────────────────────────────────────────────────────

/// Cursor geometry as reported by [`ExtentHandle::info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentInfo {
    /// Cursor position in record-size units from the start of the node:
    /// the first record reports 1, 0 means no current record.
    pub curr_entry: u32,
    pub num_entries: u32,
    pub max_entries: u32,
    /// Bytes remaining for new records in the current node.
    pub bytes_avail: u32,
    pub curr_level: u32,
    pub max_depth: u32,
    pub max_lblk: u64,
    pub max_pblk: u64,
    pub max_len: u32,
    pub max_uninit_len: u32,
}

// ── Path frames ─────────────────────────────────────────────────────────────

/// Per-level cursor state.
///
/// Invariants: `entries <= max_entries`; when `curr` is set,
/// `left + curr + 1 == entries`; `left == entries` with `curr` unset only
/// right after a frame reset.
#[derive(Debug, Default, Clone)]
struct PathFrame {
    /// Node bytes for levels 1 and below, lazily allocated on first
    /// descent. Level 0 reads through the handle's inode copy instead.
    buf: Vec<u8>,
    entries: usize,
    max_entries: usize,
    /// Records remaining strictly to the right of the cursor.
    left: usize,
    /// Record index of the cursor within the node.
    curr: Option<usize>,
    /// 0 before the first descent through this index, nonzero after.
    visit_num: u32,
    /// Exclusive upper bound on logical blocks covered by this subtree.
    end_blk: u64,
}

// ── Handle ──────────────────────────────────────────────────────────────────

/// Cursor over one inode's extent tree.
///
/// Dropping the handle releases the inode copy and every lazily
/// allocated frame buffer.
pub struct ExtentHandle<'fs> {
    fs: &'fs Filesystem,
    ino: InodeNumber,
    /// Verbatim copy of the raw inode; the tree root is its `i_block`
    /// region, so root mutations rewrite this buffer and then the inode.
    inode: Vec<u8>,
    level: usize,
    max_depth: usize,
    path: Vec<PathFrame>,
}

impl<'fs> ExtentHandle<'fs> {
    /// Open a cursor on `ino`'s extent tree.
    ///
    /// Reads the full inode, checks the extents flag, verifies the root
    /// header, and seeds the root frame. The root frame starts with
    /// `visit_num = 1`: its first visit happened implicitly by opening, so
    /// the first `Next` walks siblings instead of descending again.
    pub fn open(fs: &'fs Filesystem, ino: InodeNumber) -> Result<Self> {
        if ino.0 == 0 || ino.0 > fs.inodes_count() {
            return Err(EfsError::BadInodeNum(ino.0));
        }

        let inode = fs.read_inode_full(ino)?;

        let flags = efs_ondisk::inode_flags(&inode)
            .map_err(|e| EfsError::Format(e.to_string()))?;
        if flags & EXT4_EXTENTS_FL == 0 {
            return Err(EfsError::InodeNotExtent);
        }

        let root = inode_extent_root(&inode).map_err(|e| EfsError::Format(e.to_string()))?;
        let header = extent_header_verify(root).map_err(|_| EfsError::ExtentHeaderBad)?;

        let size = efs_ondisk::inode_file_size(&inode)
            .map_err(|e| EfsError::Format(e.to_string()))?;

        let max_depth = usize::from(header.depth);
        let mut path = vec![PathFrame::default(); max_depth + 1];
        path[0].entries = usize::from(header.entries);
        path[0].left = path[0].entries;
        path[0].max_entries = usize::from(header.max_entries);
        path[0].curr = None;
        path[0].visit_num = 1;
        path[0].end_blk = size.div_ceil(u64::from(fs.block_size()));

        debug!(
            target: "efs::extent",
            ino = ino.0,
            max_depth,
            entries = path[0].entries,
            end_blk = path[0].end_blk,
            "handle opened"
        );

        Ok(Self {
            fs,
            ino,
            inode,
            level: 0,
            max_depth,
            path,
        })
    }

    #[must_use]
    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    /// The 60-byte root node inside the handle's inode copy.
    #[must_use]
    pub fn root_node(&self) -> &[u8] {
        self.node(0)
    }

    fn node(&self, level: usize) -> &[u8] {
        if level == 0 {
            // Open guarantees the inode buffer covers the i_block region.
            &self.inode[INODE_BLOCK_OFFSET..INODE_BLOCK_OFFSET + INODE_BLOCK_SIZE]
        } else {
            &self.path[level].buf
        }
    }

    fn node_mut(&mut self, level: usize) -> &mut [u8] {
        if level == 0 {
            &mut self.inode[INODE_BLOCK_OFFSET..INODE_BLOCK_OFFSET + INODE_BLOCK_SIZE]
        } else {
            &mut self.path[level].buf
        }
    }

    // ── Traversal ────────────────────────────────────────────────────────

    /// Move the cursor per `op` and return the record it lands on.
    ///
    /// Compound operations run one atomic transition per step; the leaf
    /// variants keep stepping until the cursor reaches max depth.
    pub fn get(&mut self, op: ExtentOp) -> Result<Extent> {
        let orig = op;
        loop {
            let atomic = self.translate(orig)?;
            self.step(atomic, orig)?;
            let extent = self.current_record()?;

            match orig {
                ExtentOp::NextLeaf | ExtentOp::PrevLeaf if self.level != self.max_depth => {}
                ExtentOp::LastLeaf
                    if self.level != self.max_depth || self.path[self.level].left != 0 => {}
                _ => return Ok(extent),
            }
        }
    }

    /// Decode a compound operation into the next atomic transition for the
    /// current cursor state. Atomic operations pass through unchanged.
    fn translate(&mut self, orig: ExtentOp) -> Result<ExtentOp> {
        let at_leaf = self.level == self.max_depth;
        let at_root = self.level == 0;
        let frame = &mut self.path[self.level];

        let op = match orig {
            ExtentOp::Next | ExtentOp::NextLeaf => {
                if !at_leaf && frame.visit_num == 0 {
                    frame.visit_num += 1;
                    ExtentOp::Down
                } else if frame.left > 0 {
                    ExtentOp::NextSib
                } else if !at_root {
                    ExtentOp::Up
                } else {
                    return Err(EfsError::ExtentNoNext);
                }
            }
            ExtentOp::Prev | ExtentOp::PrevLeaf => {
                if !at_leaf && frame.visit_num > 0 {
                    ExtentOp::DownAndLast
                } else if frame.left + 1 < frame.entries {
                    ExtentOp::PrevSib
                } else if !at_root {
                    ExtentOp::Up
                } else {
                    return Err(EfsError::ExtentNoPrev);
                }
            }
            ExtentOp::LastLeaf => {
                if !at_leaf && frame.left == 0 {
                    ExtentOp::Down
                } else {
                    ExtentOp::LastSib
                }
            }
            other => other,
        };

        if op != orig {
            trace!(target: "efs::extent", from = ?orig, to = ?op, level = self.level, "op decoded");
        }
        Ok(op)
    }

    /// Execute one atomic cursor transition.
    fn step(&mut self, op: ExtentOp, orig: ExtentOp) -> Result<()> {
        match op {
            ExtentOp::Current => {
                if self.path[self.level].curr.is_none() {
                    return Err(EfsError::NoCurrentNode);
                }
            }
            ExtentOp::Root | ExtentOp::FirstSib | ExtentOp::NextSib => {
                if op == ExtentOp::Root {
                    self.level = 0;
                }
                let frame = &mut self.path[self.level];
                if op != ExtentOp::NextSib {
                    // Reset to the pre-first position, then advance once.
                    frame.left = frame.entries;
                    frame.curr = None;
                }
                if frame.left == 0 {
                    return Err(EfsError::ExtentNoNext);
                }
                let idx = frame.curr.map_or(0, |i| i + 1);
                frame.left -= 1;
                frame.curr = Some(idx);
                frame.visit_num = 0;
            }
            ExtentOp::PrevSib => {
                let at_leaf = self.level == self.max_depth;
                let frame = &mut self.path[self.level];
                let Some(idx) = frame.curr else {
                    return Err(EfsError::ExtentNoPrev);
                };
                if idx == 0 || frame.left + 1 >= frame.entries {
                    return Err(EfsError::ExtentNoPrev);
                }
                frame.curr = Some(idx - 1);
                frame.left += 1;
                if !at_leaf {
                    frame.visit_num = 1;
                }
            }
            ExtentOp::LastSib => {
                let frame = &mut self.path[self.level];
                frame.curr = frame.entries.checked_sub(1);
                frame.left = 0;
                frame.visit_num = 0;
            }
            ExtentOp::Up => {
                if self.level == 0 {
                    return Err(EfsError::ExtentNoUp);
                }
                self.level -= 1;
                // Coming up on a backward move clears the first-visit mark
                // so the next step walks to the previous sibling before
                // descending into its last child.
                if matches!(orig, ExtentOp::Prev | ExtentOp::PrevLeaf) {
                    self.path[self.level].visit_num = 0;
                }
            }
            ExtentOp::Down | ExtentOp::DownAndLast => {
                self.descend(op == ExtentOp::DownAndLast)?;
            }
            _ => return Err(EfsError::OpNotSupported),
        }
        Ok(())
    }

    /// Descend one level through the current index record, lazily loading
    /// the child node.
    fn descend(&mut self, to_last: bool) -> Result<()> {
        let level = self.level;
        if level >= self.max_depth {
            return Err(EfsError::ExtentNoDown);
        }
        let frame = &self.path[level];
        let Some(idx) = frame.curr else {
            return Err(EfsError::ExtentNoDown);
        };
        let parent_left = frame.left;
        let parent_end = frame.end_blk;

        let node = self.node(level);
        let ix = DiskExtentIndex::parse_at(node, idx)
            .map_err(|e| EfsError::Format(e.to_string()))?;
        // The child subtree ends where the next sibling's begins, or at
        // the parent's own bound when the parent has no next sibling.
        let child_end = if parent_left > 0 {
            u64::from(
                DiskExtentIndex::parse_at(node, idx + 1)
                    .map_err(|e| EfsError::Format(e.to_string()))?
                    .logical,
            )
        } else {
            parent_end
        };

        let block_size = self.fs.block_size() as usize;
        let metadata_only = self.fs.metadata_only();

        if self.path[level + 1].buf.is_empty() {
            self.path[level + 1].buf = vec![0_u8; block_size];
        }

        if metadata_only {
            // Image file with a detached data channel: serve the child as
            // zeroes so metadata-only tools can keep iterating.
            self.path[level + 1].buf.fill(0);
        } else {
            let buf = self.fs.read_block(BlockNumber(ix.child))?;
            if buf.len() != block_size {
                return Err(EfsError::Corruption {
                    block: ix.child,
                    detail: "short block read".into(),
                });
            }
            self.path[level + 1].buf.copy_from_slice(buf.as_slice());
        }

        self.level += 1;

        let (entries, max_entries) = if metadata_only {
            (0, 0)
        } else {
            let header = extent_header_verify(&self.path[self.level].buf)
                .map_err(|_| EfsError::ExtentHeaderBad)?;
            (usize::from(header.entries), usize::from(header.max_entries))
        };

        let below_max = self.level < self.max_depth;
        let child = &mut self.path[self.level];
        child.entries = entries;
        child.max_entries = max_entries;
        child.end_blk = child_end;
        if to_last {
            child.curr = entries.checked_sub(1);
            child.left = 0;
            if below_max {
                child.visit_num = 1;
            }
        } else {
            child.curr = if entries == 0 { None } else { Some(0) };
            child.left = entries.saturating_sub(1);
            child.visit_num = 0;
        }

        debug!(
            target: "efs::extent",
            level = self.level,
            max_depth = self.max_depth,
            end_blk = child.end_blk,
            "descended"
        );
        Ok(())
    }

    /// Decode the record under the cursor.
    fn current_record(&self) -> Result<Extent> {
        let frame = &self.path[self.level];
        let Some(idx) = frame.curr else {
            return Err(EfsError::NoCurrentNode);
        };
        let node = self.node(self.level);
        let mut flags = 0_u32;

        let (logical, physical, len) = if self.level == self.max_depth {
            let ex = DiskExtent::parse_at(node, idx)
                .map_err(|e| EfsError::Format(e.to_string()))?;
            flags |= EXTENT_FLAG_LEAF;
            let mut len = u64::from(ex.raw_len);
            if len > u64::from(EXT_INIT_MAX_LEN) {
                len -= u64::from(EXT_INIT_MAX_LEN);
                flags |= EXTENT_FLAG_UNINIT;
            }
            (u64::from(ex.logical), ex.physical, len)
        } else {
            let ix = DiskExtentIndex::parse_at(node, idx)
                .map_err(|e| EfsError::Format(e.to_string()))?;
            let end_blk = if frame.left > 0 {
                u64::from(
                    DiskExtentIndex::parse_at(node, idx + 1)
                        .map_err(|e| EfsError::Format(e.to_string()))?
                        .logical,
                )
            } else {
                frame.end_blk
            };
            let logical = u64::from(ix.logical);
            (logical, ix.child, end_blk.saturating_sub(logical))
        };

        if frame.visit_num != 0 {
            flags |= EXTENT_FLAG_SECOND_VISIT;
        }

        Ok(Extent {
            logical,
            physical,
            len,
            flags,
        })
    }

    // ── Seek ─────────────────────────────────────────────────────────────

    /// Position the cursor on the leaf containing logical block `blk`.
    ///
    /// If `blk` falls in a hole the cursor is left on the last extent
    /// before it (when one exists) and `ExtentNotFound` is returned.
    pub fn goto_block(&mut self, blk: u64) -> Result<()> {
        let mut extent = self.get(ExtentOp::Root)?;
        debug!(target: "efs::extent", ino = self.ino.0, blk, "seek");

        loop {
            if self.level == self.max_depth {
                if blk >= extent.logical && blk < extent.logical + extent.len {
                    return Ok(());
                }
                if blk < extent.logical {
                    // Hole before this extent. Step back for the caller's
                    // benefit; the step's own outcome is irrelevant here.
                    let _ = self.get(ExtentOp::PrevSib);
                    return Err(EfsError::ExtentNotFound);
                }
                extent = match self.get(ExtentOp::NextSib) {
                    Err(EfsError::ExtentNoNext) => return Err(EfsError::ExtentNotFound),
                    result => result?,
                };
                continue;
            }

            // Interior level: walk right while the next subtree still
            // starts at or before blk, then descend.
            match self.get(ExtentOp::NextSib) {
                Err(EfsError::ExtentNoNext) => {}
                Err(err) => return Err(err),
                Ok(next) => {
                    if blk > next.logical {
                        continue;
                    }
                    if blk < next.logical {
                        self.get(ExtentOp::PrevSib)?;
                    }
                }
            }
            extent = self.get(ExtentOp::Down)?;
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────────

    /// Overwrite the record under the cursor and write the node back.
    ///
    /// No reordering or range checking happens here: callers keep records
    /// sorted and non-overlapping.
    pub fn replace(&mut self, extent: &Extent) -> Result<()> {
        if !self.fs.is_writable() {
            return Err(EfsError::ReadOnlyFilesystem);
        }
        let Some(idx) = self.path[self.level].curr else {
            return Err(EfsError::NoCurrentNode);
        };
        self.write_record(self.level, idx, extent)?;
        self.write_back()
    }

    /// Insert one record before the cursor (or after it with
    /// [`EXTENT_INSERT_AFTER`]) and write the node back.
    ///
    /// A failed write-back rolls the insert back via [`Self::delete`].
    pub fn insert(&mut self, flags: u32, extent: &Extent) -> Result<()> {
        if !self.fs.is_writable() {
            return Err(EfsError::ReadOnlyFilesystem);
        }
        let level = self.level;
        let frame = &self.path[level];
        if frame.entries >= frame.max_entries {
            return Err(EfsError::CantInsertExtent);
        }
        let idx = match frame.curr {
            Some(i) if flags & EXTENT_INSERT_AFTER != 0 => i + 1,
            Some(i) => i,
            None => 0,
        };
        let entries = frame.entries;

        // Shift the tail one record slot to the right.
        {
            let node = self.node_mut(level);
            let start = record_offset(idx);
            let end = record_offset(entries);
            node.copy_within(start..end, start + EXTENT_RECORD_SIZE);
        }

        let frame = &mut self.path[level];
        frame.entries += 1;
        frame.curr = Some(idx);
        frame.left = frame.entries - idx - 1;
        let count = frame.entries;
        self.set_entry_count(level, count)?;

        self.write_record(level, idx, extent)?;
        if let Err(err) = self.write_back() {
            // Roll back so a failed insert leaves the node unchanged; the
            // nested delete result is deliberately dropped.
            let _ = self.delete();
            return Err(err);
        }
        Ok(())
    }

    /// Remove the record under the cursor and write the node back.
    ///
    /// When records follow the cursor they shift left and the cursor stays
    /// put; otherwise the cursor steps back one record. Deleting the last
    /// record leaves the cursor unset.
    pub fn delete(&mut self) -> Result<()> {
        if !self.fs.is_writable() {
            return Err(EfsError::ReadOnlyFilesystem);
        }
        let level = self.level;
        let frame = &self.path[level];
        let Some(idx) = frame.curr else {
            return Err(EfsError::NoCurrentNode);
        };
        let left = frame.left;
        let entries = frame.entries;

        {
            let node = self.node_mut(level);
            if left > 0 {
                let start = record_offset(idx + 1);
                let end = record_offset(idx + 1 + left);
                node.copy_within(start..end, record_offset(idx));
            }
            // Zero the vacated tail slot; slack bytes stay zero so an
            // insert-then-delete pair restores the node exactly.
            let tail = record_offset(entries - 1);
            node[tail..tail + EXTENT_RECORD_SIZE].fill(0);
        }

        let frame = &mut self.path[level];
        if left > 0 {
            frame.left -= 1;
        } else {
            frame.curr = idx.checked_sub(1);
        }
        frame.entries -= 1;
        if frame.entries == 0 {
            frame.curr = None;
        }
        let count = frame.entries;
        self.set_entry_count(level, count)?;

        self.write_back()
    }

    /// Encode a record at `idx` in the node at `level`. At max depth the
    /// record is a leaf extent (re-applying the uninitialized length
    /// bias); above it, an index record with `ei_unused` zeroed.
    #[allow(clippy::cast_possible_truncation)] // casts mirror the on-disk field widths
    fn write_record(&mut self, level: usize, idx: usize, extent: &Extent) -> Result<()> {
        let leaf = level == self.max_depth;
        let node = self.node_mut(level);
        if leaf {
            let raw_len = if extent.flags & EXTENT_FLAG_UNINIT != 0 {
                (extent.len as u16).wrapping_add(EXT_INIT_MAX_LEN)
            } else {
                extent.len as u16
            };
            DiskExtent {
                logical: extent.logical as u32,
                raw_len,
                physical: extent.physical,
            }
            .encode_at(node, idx)
            .map_err(|e| EfsError::Format(e.to_string()))
        } else {
            DiskExtentIndex {
                logical: extent.logical as u32,
                child: extent.physical,
            }
            .encode_at(node, idx)
            .map_err(|e| EfsError::Format(e.to_string()))
        }
    }

    /// Mirror the frame's entry count into the in-buffer header.
    #[allow(clippy::cast_possible_truncation)] // entry counts originate from a u16 header
    fn set_entry_count(&mut self, level: usize, entries: usize) -> Result<()> {
        set_header_entries(self.node_mut(level), entries as u16)
            .map_err(|e| EfsError::Format(e.to_string()))
    }

    /// Write the current frame back: the whole inode for the root, the
    /// parent-addressed filesystem block otherwise.
    fn write_back(&mut self) -> Result<()> {
        if self.level == 0 {
            trace!(target: "efs::extent", ino = self.ino.0, "write back root");
            self.fs.write_inode_full(self.ino, &self.inode)
        } else {
            let parent = &self.path[self.level - 1];
            let idx = parent.curr.ok_or(EfsError::NoCurrentNode)?;
            let ix = DiskExtentIndex::parse_at(self.node(self.level - 1), idx)
                .map_err(|e| EfsError::Format(e.to_string()))?;
            trace!(target: "efs::extent", block = ix.child, "write back node");
            self.fs
                .write_block(BlockNumber(ix.child), &self.path[self.level].buf)
        }
    }

    // ── Geometry report ──────────────────────────────────────────────────

    /// Report the cursor's position within its frame and the tree's
    /// global geometric limits.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // frame counts originate from u16 headers
    pub fn info(&self) -> ExtentInfo {
        let frame = &self.path[self.level];
        ExtentInfo {
            curr_entry: frame.curr.map_or(0, |i| i as u32 + 1),
            num_entries: frame.entries as u32,
            max_entries: frame.max_entries as u32,
            bytes_avail: ((frame.max_entries - frame.entries) * EXTENT_RECORD_SIZE) as u32,
            curr_level: self.level as u32,
            max_depth: self.max_depth as u32,
            max_lblk: (1_u64 << 32) - 1,
            max_pblk: (1_u64 << 48) - 1,
            max_len: 1 << 15,
            max_uninit_len: (1 << 15) - 1,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
