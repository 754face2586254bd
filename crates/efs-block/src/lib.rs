#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the `BlockDevice` trait, an owned copy-on-write `BlockBuf`,
//! a sparse in-memory device for tests and tools, and a file-backed
//! device using positional reads/writes.

use efs_error::{EfsError, Result};
use efs_types::{BlockNumber, EXT4_SUPERBLOCK_OFFSET, EXT4_SUPERBLOCK_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Owned block buffer.
///
/// Invariant: length == device block size for the originating device.
/// Cloning is cheap; mutation copies on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Arc<Vec<u8>>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        trace!(target: "efs::block::io", event = "buffer_alloc", size = len);
        Self::new(vec![0_u8; len])
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn make_mut(&mut self) -> &mut Vec<u8> {
        Arc::make_mut(&mut self.bytes)
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        match Arc::try_unwrap(self.bytes) {
            Ok(bytes) => bytes,
            Err(shared) => shared.as_slice().to_vec(),
        }
    }
}

/// Block-addressed device.
pub trait BlockDevice: Send + Sync {
    /// Read one block.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Write one block. `data` must be exactly one block long.
    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()>;

    /// Block size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of blocks.
    fn block_count(&self) -> u64;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

// ── In-memory device ────────────────────────────────────────────────────────

/// Sparse in-memory block device. Blocks never written read back as zeroes.
pub struct MemBlockDevice {
    block_size: u32,
    block_count: u64,
    blocks: Mutex<HashMap<u64, Vec<u8>>>,
}

impl MemBlockDevice {
    #[must_use]
    pub fn new(block_size: u32, block_count: u64) -> Self {
        Self {
            block_size,
            block_count,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of blocks that have been materialized by writes.
    #[must_use]
    pub fn resident_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        if block.0 >= self.block_count {
            return Err(EfsError::Corruption {
                block: block.0,
                detail: "read beyond device".into(),
            });
        }
        trace!(target: "efs::block::io", event = "read_block", block = block.0);
        let blocks = self.blocks.lock();
        Ok(blocks.get(&block.0).map_or_else(
            || BlockBuf::zeroed(self.block_size as usize),
            |data| BlockBuf::new(data.clone()),
        ))
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        if block.0 >= self.block_count {
            return Err(EfsError::Corruption {
                block: block.0,
                detail: "write beyond device".into(),
            });
        }
        if data.len() != self.block_size as usize {
            return Err(EfsError::Format(format!(
                "write of {} bytes to device with {}-byte blocks",
                data.len(),
                self.block_size
            )));
        }
        trace!(target: "efs::block::io", event = "write_block", block = block.0);
        self.blocks.lock().insert(block.0, data.to_vec());
        Ok(())
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

// ── File-backed device ──────────────────────────────────────────────────────

/// File-backed block device using `pread`/`pwrite` style positional I/O.
pub struct FileBlockDevice {
    file: File,
    block_size: u32,
    block_count: u64,
}

impl FileBlockDevice {
    /// Open an existing image read-write.
    pub fn open(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, block_size)
    }

    /// Open an existing image read-only.
    pub fn open_readonly(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(file, block_size)
    }

    fn from_file(file: File, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(EfsError::Format(format!(
                "invalid block size {block_size}"
            )));
        }
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            block_size,
            block_count: len / u64::from(block_size),
        })
    }

    fn byte_offset(&self, block: BlockNumber) -> Result<u64> {
        block
            .0
            .checked_mul(u64::from(self.block_size))
            .ok_or_else(|| EfsError::Corruption {
                block: block.0,
                detail: "block offset overflows u64".into(),
            })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let offset = self.byte_offset(block)?;
        let mut buf = vec![0_u8; self.block_size as usize];
        self.file.read_exact_at(&mut buf, offset)?;
        trace!(target: "efs::block::io", event = "read_block", block = block.0);
        Ok(BlockBuf::new(buf))
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size as usize {
            return Err(EfsError::Format(format!(
                "write of {} bytes to device with {}-byte blocks",
                data.len(),
                self.block_size
            )));
        }
        let offset = self.byte_offset(block)?;
        self.file.write_all_at(data, offset)?;
        trace!(target: "efs::block::io", event = "write_block", block = block.0);
        Ok(())
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

// ── Superblock region ───────────────────────────────────────────────────────

/// Read the 1024-byte superblock window at byte offset 1024, independent of
/// the device block size.
pub fn read_superblock_region(dev: &dyn BlockDevice) -> Result<Vec<u8>> {
    let bs = dev.block_size() as usize;
    let start = EXT4_SUPERBLOCK_OFFSET;
    let end = EXT4_SUPERBLOCK_OFFSET + EXT4_SUPERBLOCK_SIZE;

    let first_block = start / bs;
    let last_block = (end - 1) / bs;

    let mut raw = Vec::with_capacity((last_block - first_block + 1) * bs);
    for blk in first_block..=last_block {
        let buf = dev.read_block(BlockNumber(blk as u64))?;
        raw.extend_from_slice(buf.as_slice());
    }

    let skip = start - first_block * bs;
    Ok(raw[skip..skip + EXT4_SUPERBLOCK_SIZE].to_vec())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mem_device_roundtrip() {
        let dev = MemBlockDevice::new(1024, 16);
        let data = vec![0xAB_u8; 1024];
        dev.write_block(BlockNumber(3), &data).unwrap();

        let back = dev.read_block(BlockNumber(3)).unwrap();
        assert_eq!(back.as_slice(), &data[..]);
        assert_eq!(dev.resident_blocks(), 1);
    }

    #[test]
    fn mem_device_sparse_reads_zero() {
        let dev = MemBlockDevice::new(1024, 16);
        let buf = dev.read_block(BlockNumber(7)).unwrap();
        assert!(buf.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn mem_device_bounds() {
        let dev = MemBlockDevice::new(1024, 4);
        assert!(dev.read_block(BlockNumber(4)).is_err());
        assert!(dev.write_block(BlockNumber(4), &[0_u8; 1024]).is_err());
        // Short write rejected.
        assert!(dev.write_block(BlockNumber(0), &[0_u8; 12]).is_err());
    }

    #[test]
    fn block_buf_copy_on_write() {
        let original = BlockBuf::new(vec![1, 2, 3]);
        let mut copy = original.clone();
        copy.make_mut()[0] = 9;
        assert_eq!(original.as_slice(), &[1, 2, 3]);
        assert_eq!(copy.as_slice(), &[9, 2, 3]);
    }

    #[test]
    fn file_device_roundtrip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0_u8; 8192]).unwrap();
        tmp.flush().unwrap();

        let dev = FileBlockDevice::open(tmp.path(), 1024).unwrap();
        assert_eq!(dev.block_count(), 8);

        let data = vec![0x5C_u8; 1024];
        dev.write_block(BlockNumber(2), &data).unwrap();
        dev.sync().unwrap();

        let back = dev.read_block(BlockNumber(2)).unwrap();
        assert_eq!(back.as_slice(), &data[..]);
    }

    #[test]
    fn superblock_region_spans_blocks() {
        // 1024-byte blocks: the superblock is exactly block 1.
        let dev = MemBlockDevice::new(1024, 16);
        let mut sb_block = vec![0_u8; 1024];
        sb_block[0] = 0x42;
        dev.write_block(BlockNumber(1), &sb_block).unwrap();

        let region = read_superblock_region(&dev).unwrap();
        assert_eq!(region.len(), 1024);
        assert_eq!(region[0], 0x42);

        // 4096-byte blocks: the superblock sits at offset 1024 inside block 0.
        let dev = MemBlockDevice::new(4096, 16);
        let mut block0 = vec![0_u8; 4096];
        block0[1024] = 0x42;
        dev.write_block(BlockNumber(0), &block0).unwrap();

        let region = read_superblock_region(&dev).unwrap();
        assert_eq!(region.len(), 1024);
        assert_eq!(region[0], 0x42);
    }
}
