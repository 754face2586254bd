#![forbid(unsafe_code)]
//! Inode table I/O.
//!
//! Locates inodes inside the per-group inode tables and reads/writes them
//! as raw `inode_size`-byte buffers. The extent engine keeps a verbatim
//! copy of the raw inode and writes it back unchanged apart from the
//! `i_block` region, so no struct materialization happens here.

use efs_block::BlockDevice;
use efs_error::{EfsError, Result};
use efs_ondisk::Ext4GroupDesc;
use efs_types::{BlockNumber, FsGeometry, InodeNumber, inode_index_in_group, inode_to_group};

// ── Inode location ──────────────────────────────────────────────────────────

/// Computed on-disk location of an inode.
#[derive(Debug, Clone, Copy)]
pub struct InodeLocation {
    pub block: BlockNumber,
    pub byte_offset: usize,
}

/// Compute the disk location of an inode within its group's inode table.
#[must_use]
pub fn locate_inode(
    ino: InodeNumber,
    geo: &FsGeometry,
    groups: &[Ext4GroupDesc],
) -> Option<InodeLocation> {
    let group = inode_to_group(ino, geo.inodes_per_group);
    let desc = groups.get(group.0 as usize)?;
    let index = inode_index_in_group(ino, geo.inodes_per_group);
    let byte_in_table = u64::from(index) * u64::from(geo.inode_size);
    let block_offset = byte_in_table / u64::from(geo.block_size);
    #[allow(clippy::cast_possible_truncation)] // remainder of a u32 block size
    let byte_offset = (byte_in_table % u64::from(geo.block_size)) as usize;
    Some(InodeLocation {
        block: BlockNumber(desc.inode_table + block_offset),
        byte_offset,
    })
}

// ── Read ────────────────────────────────────────────────────────────────────

/// Read the full raw inode (`inode_size` bytes) from the block device.
pub fn read_inode_full(
    dev: &dyn BlockDevice,
    geo: &FsGeometry,
    groups: &[Ext4GroupDesc],
    ino: InodeNumber,
) -> Result<Vec<u8>> {
    let loc = locate_inode(ino, geo, groups).ok_or(EfsError::BadInodeNum(ino.0))?;

    let buf = dev.read_block(loc.block)?;
    let data = buf.as_slice();
    let inode_size = usize::from(geo.inode_size);

    if loc.byte_offset + inode_size > data.len() {
        return Err(EfsError::Corruption {
            block: loc.block.0,
            detail: "inode extends beyond block boundary".into(),
        });
    }

    Ok(data[loc.byte_offset..loc.byte_offset + inode_size].to_vec())
}

// ── Write ───────────────────────────────────────────────────────────────────

/// Write a full raw inode back to the block device.
///
/// Reads the containing block, patches the inode bytes, writes the block
/// back. The buffer must be exactly `inode_size` bytes.
pub fn write_inode_full(
    dev: &dyn BlockDevice,
    geo: &FsGeometry,
    groups: &[Ext4GroupDesc],
    ino: InodeNumber,
    raw: &[u8],
) -> Result<()> {
    let inode_size = usize::from(geo.inode_size);
    if raw.len() != inode_size {
        return Err(EfsError::Format(format!(
            "inode buffer is {} bytes, expected {inode_size}",
            raw.len()
        )));
    }

    let loc = locate_inode(ino, geo, groups).ok_or(EfsError::BadInodeNum(ino.0))?;

    let buf = dev.read_block(loc.block)?;
    let mut block_data = buf.into_inner();
    if loc.byte_offset + inode_size > block_data.len() {
        return Err(EfsError::Corruption {
            block: loc.block.0,
            detail: "inode extends beyond block boundary".into(),
        });
    }
    block_data[loc.byte_offset..loc.byte_offset + inode_size].copy_from_slice(raw);
    dev.write_block(loc.block, &block_data)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use efs_block::MemBlockDevice;

    fn make_geometry() -> FsGeometry {
        FsGeometry {
            block_size: 4096,
            blocks_per_group: 32768,
            inodes_per_group: 32,
            inode_size: 256,
            first_data_block: 0,
            group_count: 2,
            total_inodes: 64,
            total_blocks: 256,
        }
    }

    fn make_groups() -> Vec<Ext4GroupDesc> {
        vec![
            Ext4GroupDesc {
                block_bitmap: 5,
                inode_bitmap: 6,
                inode_table: 7,
                free_blocks_count: 100,
                free_inodes_count: 32,
                used_dirs_count: 0,
            },
            Ext4GroupDesc {
                block_bitmap: 105,
                inode_bitmap: 106,
                inode_table: 107,
                free_blocks_count: 100,
                free_inodes_count: 32,
                used_dirs_count: 0,
            },
        ]
    }

    #[test]
    fn locate_inode_basic() {
        let geo = make_geometry();
        let groups = make_groups();

        // Inode 1 → group 0, index 0.
        let loc = locate_inode(InodeNumber(1), &geo, &groups).unwrap();
        assert_eq!(loc.block, BlockNumber(7));
        assert_eq!(loc.byte_offset, 0);

        // Inode 2 → group 0, index 1.
        let loc = locate_inode(InodeNumber(2), &geo, &groups).unwrap();
        assert_eq!(loc.block, BlockNumber(7));
        assert_eq!(loc.byte_offset, 256);

        // 16 inodes per 4096-byte block: inode 17 lands in the table's
        // second block.
        let loc = locate_inode(InodeNumber(17), &geo, &groups).unwrap();
        assert_eq!(loc.block, BlockNumber(8));
        assert_eq!(loc.byte_offset, 0);

        // Group boundary: inode 33 → group 1.
        let loc = locate_inode(InodeNumber(33), &geo, &groups).unwrap();
        assert_eq!(loc.block, BlockNumber(107));
        assert_eq!(loc.byte_offset, 0);
    }

    #[test]
    fn locate_inode_out_of_range_group() {
        let geo = make_geometry();
        let groups = make_groups();
        assert!(locate_inode(InodeNumber(1000), &geo, &groups).is_none());
    }

    #[test]
    fn raw_inode_roundtrip() {
        let dev = MemBlockDevice::new(4096, 256);
        let geo = make_geometry();
        let groups = make_groups();

        let mut raw = vec![0_u8; 256];
        raw[0x00] = 0xA4;
        raw[0x20..0x24].copy_from_slice(&efs_types::EXT4_EXTENTS_FL.to_le_bytes());

        write_inode_full(&dev, &geo, &groups, InodeNumber(12), &raw).unwrap();
        let back = read_inode_full(&dev, &geo, &groups, InodeNumber(12)).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn write_preserves_neighbors() {
        let dev = MemBlockDevice::new(4096, 256);
        let geo = make_geometry();
        let groups = make_groups();

        let first = vec![0x11_u8; 256];
        let second = vec![0x22_u8; 256];
        write_inode_full(&dev, &geo, &groups, InodeNumber(1), &first).unwrap();
        write_inode_full(&dev, &geo, &groups, InodeNumber(2), &second).unwrap();

        assert_eq!(
            read_inode_full(&dev, &geo, &groups, InodeNumber(1)).unwrap(),
            first
        );
        assert_eq!(
            read_inode_full(&dev, &geo, &groups, InodeNumber(2)).unwrap(),
            second
        );
    }

    #[test]
    fn write_rejects_wrong_size() {
        let dev = MemBlockDevice::new(4096, 256);
        let geo = make_geometry();
        let groups = make_groups();
        let raw = vec![0_u8; 128];
        assert!(write_inode_full(&dev, &geo, &groups, InodeNumber(1), &raw).is_err());
    }
}
