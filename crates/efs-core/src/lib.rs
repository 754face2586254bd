#![forbid(unsafe_code)]
//! The filesystem handle.
//!
//! Owns the block I/O channel, the parsed superblock and group descriptor
//! table, and the open flags. Everything the extent engine consumes —
//! block size, writability, image-mode bookkeeping, block and inode I/O —
//! goes through this handle.

use efs_block::{BlockBuf, BlockDevice, read_superblock_region};
use efs_error::{EfsError, Result};
use efs_ondisk::{Ext4GroupDesc, Ext4Superblock};
use efs_types::{BlockNumber, FsGeometry, InodeNumber};
use std::sync::Arc;
use tracing::debug;

// ── Open flags ──────────────────────────────────────────────────────────────

/// Open the filesystem for writing.
pub const FS_FLAG_RW: u32 = 1 << 0;

/// The device holds a metadata image rather than a live filesystem.
pub const FS_FLAG_IMAGE_FILE: u32 = 1 << 1;

// ── Filesystem handle ───────────────────────────────────────────────────────

pub struct Filesystem {
    io: Arc<dyn BlockDevice>,
    image_io: Option<Arc<dyn BlockDevice>>,
    flags: u32,
    sb: Ext4Superblock,
    geometry: FsGeometry,
    groups: Vec<Ext4GroupDesc>,
}

impl Filesystem {
    /// Open a filesystem on `io`: load and validate the superblock, derive
    /// the geometry, and load the group descriptor table.
    pub fn open(io: Arc<dyn BlockDevice>, flags: u32) -> Result<Self> {
        let region = read_superblock_region(io.as_ref())?;
        let sb = Ext4Superblock::parse_superblock_region(&region)
            .map_err(|e| EfsError::Format(e.to_string()))?;

        if sb.block_size != io.block_size() {
            return Err(EfsError::Format(format!(
                "superblock block size {} does not match device block size {}",
                sb.block_size,
                io.block_size()
            )));
        }

        let geometry = FsGeometry {
            block_size: sb.block_size,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            inode_size: sb.inode_size,
            first_data_block: sb.first_data_block,
            group_count: sb.group_count(),
            total_inodes: sb.inodes_count,
            total_blocks: sb.blocks_count,
        };

        let groups = load_group_descriptors(io.as_ref(), &sb)?;

        debug!(
            target: "efs::core",
            block_size = geometry.block_size,
            groups = groups.len(),
            inodes = geometry.total_inodes,
            "filesystem opened"
        );

        Ok(Self {
            io,
            image_io: None,
            flags,
            sb,
            geometry,
            groups,
        })
    }

    /// Attach a separate image I/O channel. When the image channel differs
    /// from the active channel, descents through file data are served as
    /// zero-filled buffers instead of device reads.
    #[must_use]
    pub fn with_image_io(mut self, image_io: Arc<dyn BlockDevice>) -> Self {
        self.image_io = Some(image_io);
        self
    }

    #[must_use]
    pub fn superblock(&self) -> &Ext4Superblock {
        &self.sb
    }

    #[must_use]
    pub fn geometry(&self) -> &FsGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn group_descriptors(&self) -> &[Ext4GroupDesc] {
        &self.groups
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.geometry.block_size
    }

    #[must_use]
    pub fn inode_size(&self) -> u16 {
        self.geometry.inode_size
    }

    #[must_use]
    pub fn inodes_count(&self) -> u32 {
        self.geometry.total_inodes
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.flags & FS_FLAG_RW != 0
    }

    #[must_use]
    pub fn is_image_file(&self) -> bool {
        self.flags & FS_FLAG_IMAGE_FILE != 0
    }

    /// True when the filesystem is an image file whose data channel is
    /// detached from the active I/O channel. Reads that would go through
    /// file data must then be served as zeroes.
    #[must_use]
    pub fn metadata_only(&self) -> bool {
        self.is_image_file()
            && self
                .image_io
                .as_ref()
                .is_some_and(|im| !Arc::ptr_eq(im, &self.io))
    }

    // ── Block I/O ────────────────────────────────────────────────────────

    pub fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        self.io.read_block(block)
    }

    pub fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        if !self.is_writable() {
            return Err(EfsError::ReadOnlyFilesystem);
        }
        self.io.write_block(block, data)
    }

    // ── Inode I/O ────────────────────────────────────────────────────────

    /// Read the full raw inode (`inode_size` bytes).
    pub fn read_inode_full(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        efs_inode::read_inode_full(self.io.as_ref(), &self.geometry, &self.groups, ino)
    }

    /// Write a full raw inode back to disk.
    pub fn write_inode_full(&self, ino: InodeNumber, raw: &[u8]) -> Result<()> {
        if !self.is_writable() {
            return Err(EfsError::ReadOnlyFilesystem);
        }
        efs_inode::write_inode_full(self.io.as_ref(), &self.geometry, &self.groups, ino, raw)
    }
}

// ── Group descriptor table ──────────────────────────────────────────────────

fn load_group_descriptors(
    dev: &dyn BlockDevice,
    sb: &Ext4Superblock,
) -> Result<Vec<Ext4GroupDesc>> {
    let desc_size = sb.group_desc_size();
    let group_count = sb.group_count() as usize;
    let bs = sb.block_size as usize;

    // The descriptor table starts in the block after the superblock.
    let gdt_start = u64::from(sb.first_data_block) + 1;
    let total_bytes = group_count * desc_size;
    let block_count = total_bytes.div_ceil(bs);

    let mut raw = Vec::with_capacity(block_count * bs);
    for i in 0..block_count {
        let buf = dev.read_block(BlockNumber(gdt_start + i as u64))?;
        raw.extend_from_slice(buf.as_slice());
    }

    let mut groups = Vec::with_capacity(group_count);
    for g in 0..group_count {
        let start = g * desc_size;
        let desc = Ext4GroupDesc::parse(&raw[start..start + desc_size], desc_size)
            .map_err(|e| EfsError::Format(e.to_string()))?;
        groups.push(desc);
    }
    Ok(groups)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use efs_block::MemBlockDevice;
    use efs_ondisk::EXT4_FEATURE_INCOMPAT_EXTENTS;
    use efs_types::EXT4_SUPER_MAGIC;

    const BLOCK_SIZE: u32 = 4096;
    const INODE_TABLE_BLOCK: u64 = 3;

    fn build_device() -> Arc<MemBlockDevice> {
        let dev = MemBlockDevice::new(BLOCK_SIZE, 256);

        // Superblock at byte offset 1024 inside block 0.
        let mut block0 = vec![0_u8; BLOCK_SIZE as usize];
        let sb = &mut block0[1024..2048];
        sb[0x00..0x04].copy_from_slice(&64_u32.to_le_bytes()); // inodes_count
        sb[0x04..0x08].copy_from_slice(&256_u32.to_le_bytes()); // blocks_count
        sb[0x18..0x1C].copy_from_slice(&2_u32.to_le_bytes()); // log_block_size
        sb[0x20..0x24].copy_from_slice(&32768_u32.to_le_bytes()); // blocks_per_group
        sb[0x28..0x2C].copy_from_slice(&64_u32.to_le_bytes()); // inodes_per_group
        sb[0x38..0x3A].copy_from_slice(&EXT4_SUPER_MAGIC.to_le_bytes());
        sb[0x58..0x5A].copy_from_slice(&256_u16.to_le_bytes()); // inode_size
        sb[0x60..0x64].copy_from_slice(&EXT4_FEATURE_INCOMPAT_EXTENTS.to_le_bytes());
        dev.write_block(BlockNumber(0), &block0).unwrap();

        // Group descriptor table at block 1.
        let mut gdt = vec![0_u8; BLOCK_SIZE as usize];
        gdt[0x00..0x04].copy_from_slice(&1_u32.to_le_bytes()); // block bitmap
        gdt[0x04..0x08].copy_from_slice(&2_u32.to_le_bytes()); // inode bitmap
        gdt[0x08..0x0C]
            .copy_from_slice(&u32::try_from(INODE_TABLE_BLOCK).unwrap().to_le_bytes());
        dev.write_block(BlockNumber(1), &gdt).unwrap();

        Arc::new(dev)
    }

    #[test]
    fn open_derives_geometry() {
        let dev = build_device();
        let fs = Filesystem::open(dev, FS_FLAG_RW).unwrap();

        assert_eq!(fs.block_size(), BLOCK_SIZE);
        assert_eq!(fs.inode_size(), 256);
        assert_eq!(fs.inodes_count(), 64);
        assert_eq!(fs.geometry().group_count, 1);
        assert_eq!(fs.group_descriptors().len(), 1);
        assert_eq!(fs.group_descriptors()[0].inode_table, INODE_TABLE_BLOCK);
        assert!(fs.is_writable());
        assert!(!fs.metadata_only());
    }

    #[test]
    fn open_rejects_garbage() {
        let dev = Arc::new(MemBlockDevice::new(BLOCK_SIZE, 16));
        assert!(Filesystem::open(dev, 0).is_err());
    }

    #[test]
    fn inode_roundtrip_through_handle() {
        let dev = build_device();
        let fs = Filesystem::open(dev, FS_FLAG_RW).unwrap();

        let mut raw = vec![0_u8; 256];
        raw[0] = 0x77;
        fs.write_inode_full(InodeNumber(5), &raw).unwrap();
        assert_eq!(fs.read_inode_full(InodeNumber(5)).unwrap(), raw);
    }

    #[test]
    fn readonly_blocks_writes() {
        let dev = build_device();
        let fs = Filesystem::open(dev, 0).unwrap();

        let raw = vec![0_u8; 256];
        assert!(matches!(
            fs.write_inode_full(InodeNumber(5), &raw),
            Err(EfsError::ReadOnlyFilesystem)
        ));
        assert!(matches!(
            fs.write_block(BlockNumber(10), &vec![0_u8; BLOCK_SIZE as usize]),
            Err(EfsError::ReadOnlyFilesystem)
        ));
    }

    #[test]
    fn metadata_only_requires_detached_image_io() {
        let dev = build_device();

        // Image flag without a separate channel: data reads still work.
        let fs = Filesystem::open(dev.clone(), FS_FLAG_IMAGE_FILE).unwrap();
        assert!(fs.is_image_file());
        assert!(!fs.metadata_only());

        // Same channel attached as image io: still not detached.
        let io: Arc<dyn BlockDevice> = dev.clone();
        let fs = Filesystem::open(dev.clone(), FS_FLAG_IMAGE_FILE)
            .unwrap()
            .with_image_io(io);
        assert!(!fs.metadata_only());

        // A different channel detaches data reads.
        let other: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(BLOCK_SIZE, 16));
        let fs = Filesystem::open(dev, FS_FLAG_IMAGE_FILE)
            .unwrap()
            .with_image_io(other);
        assert!(fs.metadata_only());
    }
}
