#![forbid(unsafe_code)]
//! On-disk format and core types for MinFS.
//!
//! Format constants, unit-carrying newtypes, and the two fixed-size
//! on-disk records (superblock and inode) with explicit little-endian
//! serialization. Nothing in this crate touches a device.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── Format constants ────────────────────────────────────────────────────────

/// Filesystem block size in bytes. Fixed; the superblock must agree.
pub const MINFS_BLOCK_SIZE: u32 = 8192;
/// Bits per filesystem block (bitmap sizing).
pub const MINFS_BLOCK_BITS: u32 = MINFS_BLOCK_SIZE * 8;
/// On-disk inode record size in bytes.
pub const MINFS_INODE_SIZE: u32 = 256;
/// Inode records per filesystem block.
pub const MINFS_INODES_PER_BLOCK: u32 = MINFS_BLOCK_SIZE / MINFS_INODE_SIZE;

/// Direct block pointers per inode.
pub const MINFS_DIRECT: usize = 16;
/// Single-indirect pointers per inode.
pub const MINFS_INDIRECT: usize = 31;
/// Double-indirect pointers per inode.
pub const MINFS_DOUBLY_INDIRECT: usize = 1;
/// Block pointers per indirect block (u32 pointers).
pub const MINFS_DIRECT_PER_INDIRECT: u32 = MINFS_BLOCK_SIZE / 4;

/// Highest addressable file block (exclusive).
pub const MINFS_MAX_FILE_BLOCK: u64 = MINFS_DIRECT as u64
    + (MINFS_INDIRECT as u64) * MINFS_DIRECT_PER_INDIRECT as u64
    + (MINFS_DOUBLY_INDIRECT as u64)
        * MINFS_DIRECT_PER_INDIRECT as u64
        * MINFS_DIRECT_PER_INDIRECT as u64;
/// Maximum file size in bytes, bounded by the pointer tree.
pub const MINFS_MAX_FILE_SIZE: u64 = MINFS_MAX_FILE_BLOCK * MINFS_BLOCK_SIZE as u64;

pub const MINFS_MAGIC0: u64 = 0x002153466e694d21;
pub const MINFS_MAGIC1: u64 = 0x385000d3d3d3d385;
pub const MINFS_CURRENT_FORMAT_VERSION: u32 = 9;
pub const MINFS_CURRENT_REVISION: u32 = 1;

/// Inode magics. Zero means the slot has never held an inode.
pub const MINFS_MAGIC_NONE: u32 = 0;
pub const MINFS_MAGIC_DIR: u32 = 0x4d46_4449;
pub const MINFS_MAGIC_FILE: u32 = 0x4d46_464c;
/// Written over the magic of a freed inode so stale table contents are
/// never misread as live.
pub const MINFS_MAGIC_PURGED: u32 = 0x4d46_5052;

/// Superblock flag: set on clean unmount, cleared while mounted writable.
pub const MINFS_FLAG_CLEAN: u32 = 0x0000_0001;
/// Superblock flag: the volume is sliced (FVM-style backend).
pub const MINFS_FLAG_FVM: u32 = 0x0000_0002;

/// Inode 0 is never handed out; the root directory is inode 1.
pub const MINFS_ROOT_INO: u32 = 1;
pub const MINFS_DEFAULT_INODE_COUNT: u32 = 32768;

/// Non-sliced layout: superblock, backup, then the inode bitmap.
pub const SUPERBLOCK_START: u32 = 0;
pub const NON_FVM_SUPERBLOCK_BACKUP: u32 = 7;
pub const NON_FVM_INODE_BITMAP_START: u32 = 8;

/// Sliced layout: regions live at fixed slice-aligned offsets, 0x10000
/// blocks apart. With one-MiB slices (128 blocks) each region is
/// bounded at 512 slices.
pub const FVM_BLOCK_INODE_BM_START: u32 = 0x10000;
pub const FVM_BLOCK_DATA_BM_START: u32 = 0x20000;
pub const FVM_BLOCK_INODE_START: u32 = 0x30000;
pub const FVM_SUPERBLOCK_BACKUP: u32 = 0x40000;
pub const FVM_BLOCK_DATA_START: u32 = 0x50000;
/// Slice size in bytes for the sliced backend.
pub const FVM_SLICE_SIZE: u32 = 1 << 20;

/// Serialized superblock record length in bytes.
pub const SUPERBLOCK_RECORD_SIZE: usize = 112;

// ── Newtypes ────────────────────────────────────────────────────────────────

/// Absolute device block number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockNumber(pub u32);

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl BlockNumber {
    /// Byte offset of this block on the device.
    #[must_use]
    pub fn byte_offset(self) -> u64 {
        u64::from(self.0) * u64::from(MINFS_BLOCK_SIZE)
    }
}

/// Logical block index within a file (byte offset / block size).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct FileBlock(pub u32);

impl fmt::Display for FileBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data-region-relative block number, as stored in inode pointer slots
/// and indirect blocks. Value 0 is the reserved null block: it marks a
/// sparse hole and is never handed out by the allocator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct DataBlock(pub u32);

impl fmt::Display for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DataBlock {
    /// Absolute device block of this data block.
    #[must_use]
    pub fn absolute(self, data_start: BlockNumber) -> BlockNumber {
        BlockNumber(data_start.0 + self.0)
    }
}

/// Inode number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct InodeNumber(pub u32);

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Parse errors ────────────────────────────────────────────────────────────

/// Record-level parse/validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("record truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("checksum mismatch: stored {stored:#x}, computed {computed:#x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

// ── LE helpers ──────────────────────────────────────────────────────────────

#[must_use]
pub fn read_le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

#[must_use]
pub fn read_le_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset + 8)?;
    Some(u64::from_le_bytes([
        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
    ]))
}

pub fn write_le_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn write_le_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// The on-disk superblock record.
///
/// Lives at block 0, with a backup copy at [`NON_FVM_SUPERBLOCK_BACKUP`]
/// (or [`FVM_SUPERBLOCK_BACKUP`] on a sliced volume). All block fields are
/// absolute device blocks; `block_count`/`inode_count` count the data
/// region and inode table respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Superblock {
    pub magic0: u64,
    pub magic1: u64,
    pub format_version: u32,
    pub flags: u32,
    pub block_size: u32,
    pub inode_size: u32,
    /// Data blocks in the data region.
    pub block_count: u32,
    pub inode_count: u32,
    pub alloc_block_count: u32,
    pub alloc_inode_count: u32,
    /// Start of the inode bitmap.
    pub ibm_block: u32,
    /// Start of the data-block bitmap.
    pub abm_block: u32,
    /// Start of the inode table.
    pub ino_block: u32,
    /// Start of the integrity region (backup superblock + journal on a
    /// sliced volume; journal only otherwise).
    pub integrity_start_block: u32,
    /// Start of the data region.
    pub dat_block: u32,
    pub slice_size: u32,
    pub ibm_slices: u32,
    pub abm_slices: u32,
    pub ino_slices: u32,
    pub integrity_slices: u32,
    pub dat_slices: u32,
    /// Head/tail of the on-disk unlinked-inode list (0 = empty).
    pub unlinked_head: u32,
    pub unlinked_tail: u32,
    pub oldest_revision: u32,
    pub generation_count: u32,
    pub checksum: u32,
}

impl Superblock {
    /// Parse a superblock record from the start of a block.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < SUPERBLOCK_RECORD_SIZE {
            return Err(ParseError::Truncated {
                need: SUPERBLOCK_RECORD_SIZE,
                have: bytes.len(),
            });
        }
        let u32_at = |off| read_le_u32(bytes, off).unwrap_or(0);
        Ok(Self {
            magic0: read_le_u64(bytes, 0).unwrap_or(0),
            magic1: read_le_u64(bytes, 8).unwrap_or(0),
            format_version: u32_at(16),
            flags: u32_at(20),
            block_size: u32_at(24),
            inode_size: u32_at(28),
            block_count: u32_at(32),
            inode_count: u32_at(36),
            alloc_block_count: u32_at(40),
            alloc_inode_count: u32_at(44),
            ibm_block: u32_at(48),
            abm_block: u32_at(52),
            ino_block: u32_at(56),
            integrity_start_block: u32_at(60),
            dat_block: u32_at(64),
            slice_size: u32_at(68),
            ibm_slices: u32_at(72),
            abm_slices: u32_at(76),
            ino_slices: u32_at(80),
            integrity_slices: u32_at(84),
            dat_slices: u32_at(88),
            unlinked_head: u32_at(92),
            unlinked_tail: u32_at(96),
            oldest_revision: u32_at(100),
            generation_count: u32_at(104),
            checksum: u32_at(108),
        })
    }

    /// Serialize into the fixed record layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_RECORD_SIZE] {
        let mut out = [0u8; SUPERBLOCK_RECORD_SIZE];
        write_le_u64(&mut out, 0, self.magic0);
        write_le_u64(&mut out, 8, self.magic1);
        write_le_u32(&mut out, 16, self.format_version);
        write_le_u32(&mut out, 20, self.flags);
        write_le_u32(&mut out, 24, self.block_size);
        write_le_u32(&mut out, 28, self.inode_size);
        write_le_u32(&mut out, 32, self.block_count);
        write_le_u32(&mut out, 36, self.inode_count);
        write_le_u32(&mut out, 40, self.alloc_block_count);
        write_le_u32(&mut out, 44, self.alloc_inode_count);
        write_le_u32(&mut out, 48, self.ibm_block);
        write_le_u32(&mut out, 52, self.abm_block);
        write_le_u32(&mut out, 56, self.ino_block);
        write_le_u32(&mut out, 60, self.integrity_start_block);
        write_le_u32(&mut out, 64, self.dat_block);
        write_le_u32(&mut out, 68, self.slice_size);
        write_le_u32(&mut out, 72, self.ibm_slices);
        write_le_u32(&mut out, 76, self.abm_slices);
        write_le_u32(&mut out, 80, self.ino_slices);
        write_le_u32(&mut out, 84, self.integrity_slices);
        write_le_u32(&mut out, 88, self.dat_slices);
        write_le_u32(&mut out, 92, self.unlinked_head);
        write_le_u32(&mut out, 96, self.unlinked_tail);
        write_le_u32(&mut out, 100, self.oldest_revision);
        write_le_u32(&mut out, 104, self.generation_count);
        write_le_u32(&mut out, 108, self.checksum);
        out
    }

    /// Compute the record checksum: crc32c over the serialized record
    /// with the checksum slot zeroed.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut copy = *self;
        copy.checksum = 0;
        crc32c::crc32c(&copy.to_bytes())
    }

    /// Recompute and store the checksum, bumping the generation count.
    pub fn update_checksum(&mut self) {
        self.generation_count = self.generation_count.wrapping_add(1);
        self.checksum = self.compute_checksum();
    }

    /// Validate the stored checksum.
    pub fn validate_checksum(&self) -> Result<(), ParseError> {
        let computed = self.compute_checksum();
        if computed != self.checksum {
            return Err(ParseError::ChecksumMismatch {
                stored: self.checksum,
                computed,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.flags & MINFS_FLAG_CLEAN != 0
    }

    #[must_use]
    pub fn uses_fvm(&self) -> bool {
        self.flags & MINFS_FLAG_FVM != 0
    }

    /// First block of the journal ring (the journal info block).
    ///
    /// On a sliced volume the backup superblock occupies the first block
    /// of the integrity region and the journal starts one block later.
    #[must_use]
    pub fn journal_start_block(&self) -> BlockNumber {
        if self.uses_fvm() {
            BlockNumber(self.integrity_start_block + 1)
        } else {
            BlockNumber(self.integrity_start_block)
        }
    }

    /// Total journal ring length in blocks (info block included).
    ///
    /// On a sliced volume the ring fills the allocated integrity slices
    /// minus the backup superblock; on a raw volume it fills the gap up
    /// to the data region.
    #[must_use]
    pub fn journal_blocks(&self) -> u32 {
        if self.uses_fvm() {
            let blocks_per_slice = self.slice_size / MINFS_BLOCK_SIZE;
            self.integrity_slices * blocks_per_slice - 1
        } else {
            self.dat_block - self.integrity_start_block
        }
    }

    /// Blocks occupied by the inode bitmap.
    #[must_use]
    pub fn inode_bitmap_blocks(&self) -> u32 {
        blocks_required_for_bits(u64::from(self.inode_count))
    }

    /// Blocks occupied by the data-block bitmap.
    #[must_use]
    pub fn block_bitmap_blocks(&self) -> u32 {
        blocks_required_for_bits(u64::from(self.block_count))
    }

    /// Blocks occupied by the inode table.
    #[must_use]
    pub fn inode_table_blocks(&self) -> u32 {
        blocks_required_for_inodes(u64::from(self.inode_count))
    }

    /// Device block of the backup superblock for this layout.
    #[must_use]
    pub fn backup_location(&self) -> BlockNumber {
        if self.uses_fvm() {
            BlockNumber(FVM_SUPERBLOCK_BACKUP)
        } else {
            BlockNumber(NON_FVM_SUPERBLOCK_BACKUP)
        }
    }
}

/// Bitmap blocks needed to track `bit_count` bits.
#[must_use]
pub fn blocks_required_for_bits(bit_count: u64) -> u32 {
    u32::try_from(bit_count.div_ceil(u64::from(MINFS_BLOCK_BITS))).unwrap_or(u32::MAX)
}

/// Inode-table blocks needed to hold `inode_count` records.
#[must_use]
pub fn blocks_required_for_inodes(inode_count: u64) -> u32 {
    u32::try_from(inode_count.div_ceil(u64::from(MINFS_INODES_PER_BLOCK))).unwrap_or(u32::MAX)
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// The on-disk inode record (256 bytes).
///
/// A zero entry in `dnum`/`inum`/`dinum` marks a sparse hole; reads
/// return zeros and no block is owned. `block_count` counts non-zero
/// leaf pointers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub magic: u32,
    pub size: u64,
    pub block_count: u32,
    pub link_count: u32,
    pub create_time: u64,
    pub modify_time: u64,
    pub seq_num: u32,
    pub gen_num: u32,
    pub dirent_count: u32,
    /// Previous inode in the unlinked list (0 = none).
    pub last_inode: u32,
    /// Next inode in the unlinked list (0 = none).
    pub next_inode: u32,
    pub dnum: [u32; MINFS_DIRECT],
    pub inum: [u32; MINFS_INDIRECT],
    pub dinum: [u32; MINFS_DOUBLY_INDIRECT],
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            magic: MINFS_MAGIC_NONE,
            size: 0,
            block_count: 0,
            link_count: 0,
            create_time: 0,
            modify_time: 0,
            seq_num: 0,
            gen_num: 0,
            dirent_count: 0,
            last_inode: 0,
            next_inode: 0,
            dnum: [0; MINFS_DIRECT],
            inum: [0; MINFS_INDIRECT],
            dinum: [0; MINFS_DOUBLY_INDIRECT],
        }
    }
}

impl Inode {
    /// Parse an inode record from `bytes` (at least 256 bytes).
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < MINFS_INODE_SIZE as usize {
            return Err(ParseError::Truncated {
                need: MINFS_INODE_SIZE as usize,
                have: bytes.len(),
            });
        }
        let u32_at = |off| read_le_u32(bytes, off).unwrap_or(0);
        let mut inode = Self {
            magic: u32_at(0),
            size: read_le_u64(bytes, 4).unwrap_or(0),
            block_count: u32_at(12),
            link_count: u32_at(16),
            create_time: read_le_u64(bytes, 20).unwrap_or(0),
            modify_time: read_le_u64(bytes, 28).unwrap_or(0),
            seq_num: u32_at(36),
            gen_num: u32_at(40),
            dirent_count: u32_at(44),
            last_inode: u32_at(48),
            next_inode: u32_at(52),
            ..Self::default()
        };
        for (i, slot) in inode.dnum.iter_mut().enumerate() {
            *slot = u32_at(60 + i * 4);
        }
        for (i, slot) in inode.inum.iter_mut().enumerate() {
            *slot = u32_at(124 + i * 4);
        }
        for (i, slot) in inode.dinum.iter_mut().enumerate() {
            *slot = u32_at(248 + i * 4);
        }
        Ok(inode)
    }

    /// Serialize into the fixed 256-byte record.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MINFS_INODE_SIZE as usize] {
        let mut out = [0u8; MINFS_INODE_SIZE as usize];
        write_le_u32(&mut out, 0, self.magic);
        write_le_u64(&mut out, 4, self.size);
        write_le_u32(&mut out, 12, self.block_count);
        write_le_u32(&mut out, 16, self.link_count);
        write_le_u64(&mut out, 20, self.create_time);
        write_le_u64(&mut out, 28, self.modify_time);
        write_le_u32(&mut out, 36, self.seq_num);
        write_le_u32(&mut out, 40, self.gen_num);
        write_le_u32(&mut out, 44, self.dirent_count);
        write_le_u32(&mut out, 48, self.last_inode);
        write_le_u32(&mut out, 52, self.next_inode);
        for (i, slot) in self.dnum.iter().enumerate() {
            write_le_u32(&mut out, 60 + i * 4, *slot);
        }
        for (i, slot) in self.inum.iter().enumerate() {
            write_le_u32(&mut out, 124 + i * 4, *slot);
        }
        for (i, slot) in self.dinum.iter().enumerate() {
            write_le_u32(&mut out, 248 + i * 4, *slot);
        }
        out
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.magic == MINFS_MAGIC_FILE
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.magic == MINFS_MAGIC_DIR
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.is_file() || self.is_directory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_constant_math() {
        assert_eq!(MINFS_INODES_PER_BLOCK, 32);
        assert_eq!(MINFS_DIRECT_PER_INDIRECT, 2048);
        assert_eq!(MINFS_MAX_FILE_BLOCK, 16 + 31 * 2048 + 2048 * 2048);
        assert_eq!(MINFS_MAX_FILE_SIZE, MINFS_MAX_FILE_BLOCK * 8192);
    }

    #[test]
    fn superblock_roundtrip() {
        let mut sb = Superblock {
            magic0: MINFS_MAGIC0,
            magic1: MINFS_MAGIC1,
            format_version: MINFS_CURRENT_FORMAT_VERSION,
            flags: MINFS_FLAG_CLEAN,
            block_size: MINFS_BLOCK_SIZE,
            inode_size: MINFS_INODE_SIZE,
            block_count: 1000,
            inode_count: 512,
            ibm_block: 8,
            abm_block: 16,
            ino_block: 24,
            integrity_start_block: 40,
            dat_block: 56,
            oldest_revision: MINFS_CURRENT_REVISION,
            ..Superblock::default()
        };
        sb.update_checksum();

        let parsed = Superblock::parse_from_bytes(&sb.to_bytes()).unwrap();
        assert_eq!(parsed, sb);
        parsed.validate_checksum().unwrap();
    }

    #[test]
    fn superblock_checksum_detects_corruption() {
        let mut sb = Superblock {
            magic0: MINFS_MAGIC0,
            magic1: MINFS_MAGIC1,
            block_count: 42,
            ..Superblock::default()
        };
        sb.update_checksum();
        sb.format_version = 77;
        assert!(sb.validate_checksum().is_err());
    }

    #[test]
    fn superblock_update_checksum_bumps_generation() {
        let mut sb = Superblock::default();
        assert_eq!(sb.generation_count, 0);
        sb.update_checksum();
        assert_eq!(sb.generation_count, 1);
        sb.validate_checksum().unwrap();
        sb.update_checksum();
        assert_eq!(sb.generation_count, 2);
    }

    #[test]
    fn superblock_truncated() {
        let err = Superblock::parse_from_bytes(&[0u8; 20]).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { .. }));
    }

    #[test]
    fn journal_region_non_fvm() {
        let sb = Superblock {
            integrity_start_block: 40,
            dat_block: 72,
            ..Superblock::default()
        };
        assert_eq!(sb.journal_start_block(), BlockNumber(40));
        assert_eq!(sb.journal_blocks(), 32);
    }

    #[test]
    fn journal_region_fvm_skips_backup() {
        let sb = Superblock {
            flags: MINFS_FLAG_FVM,
            slice_size: FVM_SLICE_SIZE,
            integrity_slices: 1,
            integrity_start_block: FVM_SUPERBLOCK_BACKUP,
            dat_block: FVM_BLOCK_DATA_START,
            ..Superblock::default()
        };
        assert_eq!(sb.journal_start_block(), BlockNumber(FVM_SUPERBLOCK_BACKUP + 1));
        assert_eq!(sb.backup_location(), BlockNumber(FVM_SUPERBLOCK_BACKUP));
        assert_eq!(sb.journal_blocks(), FVM_SLICE_SIZE / MINFS_BLOCK_SIZE - 1);
    }

    #[test]
    fn inode_roundtrip() {
        let mut inode = Inode {
            magic: MINFS_MAGIC_FILE,
            size: 123_456,
            block_count: 16,
            link_count: 1,
            create_time: 11,
            modify_time: 22,
            ..Inode::default()
        };
        inode.dnum[0] = 7;
        inode.dnum[15] = 99;
        inode.inum[30] = 1234;
        inode.dinum[0] = 5678;

        let bytes = inode.to_bytes();
        assert_eq!(bytes.len(), 256);
        let parsed = Inode::parse_from_bytes(&bytes).unwrap();
        assert_eq!(parsed, inode);
        assert!(parsed.is_file());
        assert!(!parsed.is_directory());
    }

    #[test]
    fn inode_default_is_unallocated() {
        let inode = Inode::default();
        assert!(!inode.is_allocated());
        assert_eq!(inode.to_bytes(), [0u8; 256]);
    }

    #[test]
    fn bitmap_sizing() {
        assert_eq!(blocks_required_for_bits(0), 0);
        assert_eq!(blocks_required_for_bits(1), 1);
        assert_eq!(blocks_required_for_bits(u64::from(MINFS_BLOCK_BITS)), 1);
        assert_eq!(blocks_required_for_bits(u64::from(MINFS_BLOCK_BITS) + 1), 2);
        assert_eq!(blocks_required_for_inodes(32), 1);
        assert_eq!(blocks_required_for_inodes(33), 2);
    }
}
