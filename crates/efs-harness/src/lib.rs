#![forbid(unsafe_code)]
//! Test-image construction for the emberfs workspace.
//!
//! Builds small but structurally valid ext-family images in memory:
//! superblock, one block group descriptor, an inode table, and extent
//! tree node blocks. Integration tests and benchmarks drive the full
//! stack — `Filesystem::open` through the extent engine — against these
//! images.

use anyhow::{Context, Result, bail};
use efs_block::{BlockDevice, MemBlockDevice};
use efs_core::Filesystem;
use efs_ondisk::{
    DiskExtent, DiskExtentIndex, EXT4_EXTENT_MAGIC, ExtentHeader, INODE_BLOCK_SIZE,
};
use efs_types::{BlockNumber, EXT4_EXTENTS_FL, EXT4_SUPER_MAGIC, InodeNumber};
use std::sync::Arc;

/// Block size used by every built image.
pub const IMAGE_BLOCK_SIZE: u32 = 4096;

/// Record capacity of a full-block extent node: `(4096 - 12) / 12`.
pub const IMAGE_BLOCK_MAX: u16 = 340;

/// Inode the builder populates with the extent tree under test.
pub const IMAGE_TEST_INO: InodeNumber = InodeNumber(12);

const IMAGE_BLOCK_COUNT: u64 = 4096;
const IMAGE_INODE_SIZE: usize = 256;
const IMAGE_INODE_TABLE_BLOCK: u64 = 3;

/// A leaf extent as `(logical, raw_len, physical)`. Raw lengths above
/// `EXT_INIT_MAX_LEN` encode uninitialized extents, as on disk.
pub type LeafRecord = (u32, u16, u64);

/// An index record as `(logical, child_block)`.
pub type IndexRecord = (u32, u64);

/// Encode a leaf node of the given byte length.
pub fn leaf_node(len: usize, max: u16, extents: &[LeafRecord]) -> Result<Vec<u8>> {
    let mut node = vec![0_u8; len];
    ExtentHeader {
        magic: EXT4_EXTENT_MAGIC,
        entries: u16::try_from(extents.len()).context("too many leaf records")?,
        max_entries: max,
        depth: 0,
        generation: 0,
    }
    .encode(&mut node)
    .context("encode leaf header")?;
    for (i, &(logical, raw_len, physical)) in extents.iter().enumerate() {
        DiskExtent {
            logical,
            raw_len,
            physical,
        }
        .encode_at(&mut node, i)
        .with_context(|| format!("encode leaf record {i}"))?;
    }
    Ok(node)
}

/// Encode an interior node of the given byte length.
pub fn index_node(len: usize, max: u16, depth: u16, children: &[IndexRecord]) -> Result<Vec<u8>> {
    if depth == 0 {
        bail!("interior nodes need depth > 0");
    }
    let mut node = vec![0_u8; len];
    ExtentHeader {
        magic: EXT4_EXTENT_MAGIC,
        entries: u16::try_from(children.len()).context("too many index records")?,
        max_entries: max,
        depth,
        generation: 0,
    }
    .encode(&mut node)
    .context("encode index header")?;
    for (i, &(logical, child)) in children.iter().enumerate() {
        DiskExtentIndex { logical, child }
            .encode_at(&mut node, i)
            .with_context(|| format!("encode index record {i}"))?;
    }
    Ok(node)
}

/// Encode a 60-byte depth-0 root for the inode's `i_block` region.
pub fn root_leaf(extents: &[LeafRecord]) -> Result<Vec<u8>> {
    leaf_node(INODE_BLOCK_SIZE, 4, extents)
}

/// Encode a 60-byte interior root for the inode's `i_block` region.
pub fn root_index(depth: u16, children: &[IndexRecord]) -> Result<Vec<u8>> {
    index_node(INODE_BLOCK_SIZE, 4, depth, children)
}

/// Build a device holding a superblock, one group descriptor, and
/// [`IMAGE_TEST_INO`] with `root` as its extent tree root and the given
/// file size. `node_blocks` land verbatim at their block addresses.
pub fn build_device(
    root: &[u8],
    size_bytes: u64,
    node_blocks: &[(u64, Vec<u8>)],
) -> Result<Arc<MemBlockDevice>> {
    if root.len() != INODE_BLOCK_SIZE {
        bail!("root region must be {INODE_BLOCK_SIZE} bytes, got {}", root.len());
    }

    let dev = MemBlockDevice::new(IMAGE_BLOCK_SIZE, IMAGE_BLOCK_COUNT);

    // Superblock at byte offset 1024 inside block 0.
    let mut block0 = vec![0_u8; IMAGE_BLOCK_SIZE as usize];
    let sb = &mut block0[1024..2048];
    sb[0x00..0x04].copy_from_slice(&64_u32.to_le_bytes()); // inodes_count
    sb[0x04..0x08].copy_from_slice(&u32::try_from(IMAGE_BLOCK_COUNT)?.to_le_bytes());
    sb[0x18..0x1C].copy_from_slice(&2_u32.to_le_bytes()); // log_block_size → 4096
    sb[0x20..0x24].copy_from_slice(&32768_u32.to_le_bytes()); // blocks_per_group
    sb[0x28..0x2C].copy_from_slice(&64_u32.to_le_bytes()); // inodes_per_group
    sb[0x38..0x3A].copy_from_slice(&EXT4_SUPER_MAGIC.to_le_bytes());
    sb[0x58..0x5A].copy_from_slice(&u16::try_from(IMAGE_INODE_SIZE)?.to_le_bytes());
    dev.write_block(BlockNumber(0), &block0)?;

    // Group descriptor table at block 1.
    let mut gdt = vec![0_u8; IMAGE_BLOCK_SIZE as usize];
    gdt[0x08..0x0C].copy_from_slice(&u32::try_from(IMAGE_INODE_TABLE_BLOCK)?.to_le_bytes());
    dev.write_block(BlockNumber(1), &gdt)?;

    // The test inode: index 11 within the table's first block.
    let mut table_block = vec![0_u8; IMAGE_BLOCK_SIZE as usize];
    let offset = 11 * IMAGE_INODE_SIZE;
    let inode = &mut table_block[offset..offset + IMAGE_INODE_SIZE];
    let size_lo = u32::try_from(size_bytes & 0xFFFF_FFFF)?;
    let size_hi = u32::try_from(size_bytes >> 32)?;
    inode[0x04..0x08].copy_from_slice(&size_lo.to_le_bytes());
    inode[0x6C..0x70].copy_from_slice(&size_hi.to_le_bytes());
    inode[0x20..0x24].copy_from_slice(&EXT4_EXTENTS_FL.to_le_bytes());
    inode[0x28..0x28 + INODE_BLOCK_SIZE].copy_from_slice(root);
    dev.write_block(BlockNumber(IMAGE_INODE_TABLE_BLOCK), &table_block)?;

    for (block, bytes) in node_blocks {
        dev.write_block(BlockNumber(*block), bytes)
            .with_context(|| format!("write node block {block}"))?;
    }

    Ok(Arc::new(dev))
}

/// Build a device and open a [`Filesystem`] on it.
pub fn build_fs(
    root: &[u8],
    size_bytes: u64,
    node_blocks: &[(u64, Vec<u8>)],
    flags: u32,
) -> Result<Filesystem> {
    let dev = build_device(root, size_bytes, node_blocks)?;
    Filesystem::open(dev, flags).context("open built filesystem")
}
