//! Formatting a device as MinFS.

use crate::superblock::{check_superblock, superblock_block};
use crate::transaction::TransactionLimits;
use minfs_block::Bcache;
use minfs_error::{MinfsError, Result};
use minfs_journal::Journal;
use minfs_types::{
    blocks_required_for_bits, blocks_required_for_inodes, write_le_u32, BlockNumber, Inode,
    Superblock, FVM_BLOCK_DATA_BM_START, FVM_BLOCK_DATA_START, FVM_BLOCK_INODE_BM_START,
    FVM_BLOCK_INODE_START, FVM_SLICE_SIZE, FVM_SUPERBLOCK_BACKUP, MINFS_BLOCK_SIZE,
    MINFS_CURRENT_FORMAT_VERSION, MINFS_CURRENT_REVISION, MINFS_DEFAULT_INODE_COUNT,
    MINFS_FLAG_CLEAN, MINFS_FLAG_FVM, MINFS_INODE_SIZE, MINFS_MAGIC0, MINFS_MAGIC1,
    MINFS_MAGIC_DIR, MINFS_ROOT_INO, NON_FVM_INODE_BITMAP_START, SUPERBLOCK_START,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Format-time configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
    pub inode_count: u32,
    /// Total journal ring blocks; `None` picks the recommended size.
    pub journal_blocks: Option<u32>,
    /// Lay out a sliced (FVM-style) volume instead of a raw one.
    pub fvm: bool,
    /// Slices to preallocate for data on a sliced volume.
    pub fvm_data_slices: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            inode_count: MINFS_DEFAULT_INODE_COUNT,
            journal_blocks: None,
            fvm: false,
            fvm_data_slices: 1,
        }
    }
}

const MINFS_TYPE_DIR: u8 = 2;
const MINFS_RECLEN_LAST: u32 = 0x8000_0000;

fn dirent_size(namelen: u8) -> u32 {
    (10 + u32::from(namelen) + 3) & !3
}

/// Write the "." and ".." entries for a fresh directory.
fn initialize_directory(block: &mut [u8], ino_self: u32, ino_parent: u32) {
    let self_size = dirent_size(1);
    write_le_u32(block, 0, ino_self);
    write_le_u32(block, 4, self_size);
    block[8] = 1;
    block[9] = MINFS_TYPE_DIR;
    block[10] = b'.';

    let off = self_size as usize;
    write_le_u32(block, off, ino_parent);
    write_le_u32(block, off + 4, dirent_size(2) | MINFS_RECLEN_LAST);
    block[off + 8] = 2;
    block[off + 9] = MINFS_TYPE_DIR;
    block[off + 10] = b'.';
    block[off + 11] = b'.';
}

fn round_up(value: u32, multiple: u32) -> u32 {
    value.div_ceil(multiple) * multiple
}

/// Compute the non-sliced layout: bitmap starts, inode table, journal,
/// and data region, sized for the device.
fn plan_raw_layout(info: &mut Superblock, options: &FormatOptions, device_blocks: u32) -> Result<()> {
    let inodes = options.inode_count;
    let inoblks = blocks_required_for_inodes(u64::from(inodes));
    let ibmblks = blocks_required_for_bits(u64::from(inodes));

    info.inode_count = inodes;
    info.ibm_block = NON_FVM_INODE_BITMAP_START;
    info.abm_block = info.ibm_block + round_up(ibmblks, 8);

    // The data-bitmap size depends on the data-region size, which in
    // turn depends on the bitmap size. Grow the bitmap allowance in
    // 8-block steps until it covers the data blocks that remain.
    let mut alloc_bitmap_rounded = 8u32;
    loop {
        info.ino_block = info.abm_block + alloc_bitmap_rounded;

        let limits = TransactionLimits::new(info);
        let mut journal_blocks = options
            .journal_blocks
            .unwrap_or(limits.recommended_integrity_blocks)
            .max(limits.min_integrity_blocks);

        let mut non_dat_blocks = NON_FVM_INODE_BITMAP_START
            + round_up(ibmblks, 8)
            + alloc_bitmap_rounded
            + inoblks;
        if non_dat_blocks + journal_blocks >= device_blocks {
            journal_blocks = limits.min_integrity_blocks;
        }
        non_dat_blocks += journal_blocks;
        if non_dat_blocks >= device_blocks {
            error!(
                target: "minfs::mkfs",
                event = "partition_too_small",
                bytes = u64::from(device_blocks) * u64::from(MINFS_BLOCK_SIZE)
            );
            return Err(MinfsError::InvalidArgs(
                "partition too small for MinFS".to_owned(),
            ));
        }

        info.block_count = device_blocks - non_dat_blocks;
        let abmblks = blocks_required_for_bits(u64::from(info.block_count));
        if alloc_bitmap_rounded >= abmblks {
            info.integrity_start_block = info.ino_block + inoblks;
            info.dat_block = info.integrity_start_block + journal_blocks;
            return Ok(());
        }
        alloc_bitmap_rounded += 8;
    }
}

/// Compute the sliced layout: regions at fixed offsets, each sized in
/// whole slices.
fn plan_fvm_layout(info: &mut Superblock, options: &FormatOptions, device_blocks: u32) -> Result<()> {
    let blocks_per_slice = FVM_SLICE_SIZE / MINFS_BLOCK_SIZE;
    info.flags |= MINFS_FLAG_FVM;
    info.slice_size = FVM_SLICE_SIZE;
    info.inode_count = options.inode_count;
    info.ibm_block = FVM_BLOCK_INODE_BM_START;
    info.abm_block = FVM_BLOCK_DATA_BM_START;
    info.ino_block = FVM_BLOCK_INODE_START;
    info.integrity_start_block = FVM_SUPERBLOCK_BACKUP;
    info.dat_block = FVM_BLOCK_DATA_START;

    if options.fvm_data_slices == 0 {
        return Err(MinfsError::InvalidArgs("need at least one data slice".to_owned()));
    }
    info.dat_slices = options.fvm_data_slices;
    info.block_count = info.dat_slices * blocks_per_slice;

    info.ibm_slices = info.inode_bitmap_blocks().div_ceil(blocks_per_slice).max(1);
    info.abm_slices = info.block_bitmap_blocks().div_ceil(blocks_per_slice).max(1);
    info.ino_slices = info.inode_table_blocks().div_ceil(blocks_per_slice).max(1);

    let limits = TransactionLimits::new(info);
    let journal_blocks = options
        .journal_blocks
        .unwrap_or(limits.recommended_integrity_blocks)
        .max(limits.min_integrity_blocks);
    // Backup superblock plus the journal ring.
    info.integrity_slices = (1 + journal_blocks).div_ceil(blocks_per_slice).max(1);

    if info.dat_block + info.block_count > device_blocks {
        return Err(MinfsError::InvalidArgs(format!(
            "device of {device_blocks} blocks cannot back {} data slices",
            info.dat_slices
        )));
    }
    Ok(())
}

/// Format the partition backed by `bcache` as MinFS.
pub fn mkfs(options: &FormatOptions, bcache: &Bcache) -> Result<()> {
    let mut info = Superblock {
        magic0: MINFS_MAGIC0,
        magic1: MINFS_MAGIC1,
        format_version: MINFS_CURRENT_FORMAT_VERSION,
        flags: MINFS_FLAG_CLEAN,
        block_size: MINFS_BLOCK_SIZE,
        inode_size: MINFS_INODE_SIZE,
        oldest_revision: MINFS_CURRENT_REVISION,
        ..Superblock::default()
    };

    if options.fvm {
        plan_fvm_layout(&mut info, options, bcache.max_blocks())?;
    } else {
        plan_raw_layout(&mut info, options, bcache.max_blocks())?;
    }

    // Validate the computed layout before anything reaches the device:
    // an inode count or slice request that overflows a fixed region gap
    // must fail here, not on the next mount.
    {
        let mut probe = info;
        probe.update_checksum();
        check_superblock(&probe, bcache.max_blocks()).map_err(|err| {
            error!(target: "minfs::mkfs", event = "layout_invalid", %err);
            MinfsError::InvalidArgs(format!("computed layout is invalid: {err}"))
        })?;
    }

    let zero_block = vec![0u8; MINFS_BLOCK_SIZE as usize];

    // Bitmaps: inode 0 and the root inode; data blocks 0 (the null
    // block) and 1 (root directory data).
    let mut ibm = vec![0u8; MINFS_BLOCK_SIZE as usize];
    ibm[0] = 0b0000_0011;
    info.alloc_inode_count = 2;
    let mut abm = vec![0u8; MINFS_BLOCK_SIZE as usize];
    abm[0] = 0b0000_0011;
    info.alloc_block_count = 2;

    bcache.write_block(BlockNumber(info.ibm_block), &ibm)?;
    for rel in 1..info.inode_bitmap_blocks() {
        bcache.write_block(BlockNumber(info.ibm_block + rel), &zero_block)?;
    }
    bcache.write_block(BlockNumber(info.abm_block), &abm)?;
    for rel in 1..info.block_bitmap_blocks() {
        bcache.write_block(BlockNumber(info.abm_block + rel), &zero_block)?;
    }

    // Root directory data block.
    let mut root_data = vec![0u8; MINFS_BLOCK_SIZE as usize];
    initialize_directory(&mut root_data, MINFS_ROOT_INO, MINFS_ROOT_INO);
    bcache.write_block(BlockNumber(info.dat_block + 1), &root_data)?;

    // Inode table: zeroed, with the root inode in the first block.
    let mut table_block = vec![0u8; MINFS_BLOCK_SIZE as usize];
    let root = Inode {
        magic: MINFS_MAGIC_DIR,
        size: u64::from(MINFS_BLOCK_SIZE),
        block_count: 1,
        link_count: 2,
        dirent_count: 2,
        create_time: crate::current_time_nanos(),
        dnum: {
            let mut dnum = [0u32; minfs_types::MINFS_DIRECT];
            dnum[0] = 1;
            dnum
        },
        ..Inode::default()
    };
    let root_offset = (MINFS_ROOT_INO * MINFS_INODE_SIZE) as usize;
    table_block[root_offset..root_offset + MINFS_INODE_SIZE as usize]
        .copy_from_slice(&root.to_bytes());
    bcache.write_block(BlockNumber(info.ino_block), &table_block)?;
    for rel in 1..info.inode_table_blocks() {
        bcache.write_block(BlockNumber(info.ino_block + rel), &zero_block)?;
    }

    // Fresh journal ring.
    Journal::format(bcache, info.journal_start_block(), info.journal_blocks())?;

    // Superblocks last: primary, then backup.
    info.update_checksum();
    let sb_block = superblock_block(&info);
    bcache.write_block(BlockNumber(SUPERBLOCK_START), &sb_block)?;
    bcache.write_block(info.backup_location(), &sb_block)?;
    bcache.sync()?;

    info!(
        target: "minfs::mkfs",
        event = "formatted",
        blocks = info.block_count,
        inodes = info.inode_count,
        journal_blocks = info.journal_blocks(),
        fvm = info.uses_fvm()
    );
    Ok(())
}
