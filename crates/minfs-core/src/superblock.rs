//! Superblock loading, validation, repair, and write-back.

use crate::transaction::TransactionLimits;
use minfs_alloc::bitmap_count_allocated;
use minfs_block::Bcache;
use minfs_error::{MinfsError, Result};
use minfs_inode::PendingWork;
use minfs_types::{
    BlockNumber, Superblock, MINFS_BLOCK_BITS, MINFS_BLOCK_SIZE, MINFS_CURRENT_FORMAT_VERSION,
    MINFS_INODE_SIZE, MINFS_MAGIC0, MINFS_MAGIC1, SUPERBLOCK_START,
};
use tracing::{debug, error, warn};

/// Controls the validation performed when loading structures from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityCheck {
    /// Do not validate on load (inspection-style use).
    None,
    /// Validate before use. The recommended option for mounts.
    All,
}

/// Whether a superblock write also refreshes the backup copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateBackupSuperblock {
    NoUpdate,
    Update,
}

/// In-memory authority for the superblock while mounted.
#[derive(Debug)]
pub struct SuperblockManager {
    info: Superblock,
}

impl SuperblockManager {
    pub fn create(info: Superblock, max_blocks: u32, checks: IntegrityCheck) -> Result<Self> {
        if checks == IntegrityCheck::All {
            check_superblock(&info, max_blocks).inspect_err(|err| {
                error!(target: "minfs::superblock", event = "check_failed", %err);
            })?;
        }
        Ok(Self { info })
    }

    #[must_use]
    pub fn info(&self) -> &Superblock {
        &self.info
    }

    pub fn mutable_info(&mut self) -> &mut Superblock {
        &mut self.info
    }

    /// Recompute the checksum and stage the superblock (and optionally
    /// the backup copy) as transaction metadata.
    pub fn write(&mut self, txn: &mut dyn PendingWork, update_backup: UpdateBackupSuperblock) {
        self.info.update_checksum();
        let block = superblock_block(&self.info);
        txn.enqueue_metadata(BlockNumber(SUPERBLOCK_START), block.clone());
        if update_backup == UpdateBackupSuperblock::Update {
            txn.enqueue_metadata(self.info.backup_location(), block);
        }
    }
}

/// Serialize a superblock into a block-sized buffer.
#[must_use]
pub fn superblock_block(info: &Superblock) -> Vec<u8> {
    let mut block = vec![0u8; MINFS_BLOCK_SIZE as usize];
    let record = info.to_bytes();
    block[..record.len()].copy_from_slice(&record);
    block
}

/// Validate a superblock against the format and the device geometry.
pub fn check_superblock(info: &Superblock, max_blocks: u32) -> Result<()> {
    if info.magic0 != MINFS_MAGIC0 || info.magic1 != MINFS_MAGIC1 {
        return Err(MinfsError::BadState(format!(
            "bad magic: {:#x}/{:#x}",
            info.magic0, info.magic1
        )));
    }
    if info.format_version != MINFS_CURRENT_FORMAT_VERSION {
        return Err(MinfsError::BadState(format!(
            "format version {} unsupported (driver speaks {})",
            info.format_version, MINFS_CURRENT_FORMAT_VERSION
        )));
    }
    if info.block_size != MINFS_BLOCK_SIZE || info.inode_size != MINFS_INODE_SIZE {
        return Err(MinfsError::BadState(format!(
            "bsz/isz {}/{} unsupported",
            info.block_size, info.inode_size
        )));
    }
    info.validate_checksum()
        .map_err(|err| MinfsError::BadState(err.to_string()))?;
    if info.alloc_block_count > info.block_count || info.alloc_inode_count > info.inode_count {
        return Err(MinfsError::BadState(format!(
            "allocation counts exceed totals: {}/{} blocks, {}/{} inodes",
            info.alloc_block_count, info.block_count, info.alloc_inode_count, info.inode_count
        )));
    }
    if !(info.ibm_block < info.abm_block
        && info.abm_block < info.ino_block
        && info.ino_block < info.integrity_start_block
        && info.integrity_start_block < info.dat_block)
    {
        return Err(MinfsError::BadState(
            "region starts are not monotonic".to_owned(),
        ));
    }

    let limits = TransactionLimits::new(info);
    if info.uses_fvm() {
        verify_slices_size(info, &limits)?;
    } else {
        if info.dat_block + info.block_count != max_blocks {
            return Err(MinfsError::BadState(format!(
                "filesystem of {} blocks does not match device of {max_blocks}",
                info.dat_block + info.block_count
            )));
        }
        if info.dat_block - info.integrity_start_block < limits.min_integrity_blocks {
            return Err(MinfsError::BadState("journal too small".to_owned()));
        }
    }
    Ok(())
}

/// Sliced-volume geometry checks: each region's slices must cover its
/// need and regions must not collide.
fn verify_slices_size(info: &Superblock, limits: &TransactionLimits) -> Result<()> {
    let blocks_per_slice = info.slice_size / MINFS_BLOCK_SIZE;
    if blocks_per_slice == 0 {
        return Err(MinfsError::BadState("slice smaller than a block".to_owned()));
    }

    let regions = [
        (
            "inode bitmap",
            info.inode_bitmap_blocks(),
            info.ibm_slices,
            info.ibm_block,
            info.abm_block,
        ),
        (
            "block bitmap",
            info.block_bitmap_blocks(),
            info.abm_slices,
            info.abm_block,
            info.ino_block,
        ),
        (
            "inode table",
            info.inode_table_blocks(),
            info.ino_slices,
            info.ino_block,
            info.integrity_start_block,
        ),
        (
            "integrity",
            1 + limits.min_integrity_blocks,
            info.integrity_slices,
            info.integrity_start_block,
            info.dat_block,
        ),
        (
            "data",
            info.block_count,
            info.dat_slices,
            info.dat_block,
            u32::MAX,
        ),
    ];
    for (name, needed, slices, start, next_start) in regions {
        let allocated = slices * blocks_per_slice;
        if needed > allocated {
            return Err(MinfsError::BadState(format!(
                "not enough slices for {name}: need {needed} blocks, have {allocated}"
            )));
        }
        if next_start != u32::MAX && start + allocated > next_start {
            return Err(MinfsError::BadState(format!(
                "{name} region collides with its neighbor"
            )));
        }
    }
    Ok(())
}

/// Read and validate the primary superblock.
pub fn load_superblock(bcache: &Bcache) -> Result<Superblock> {
    let raw = bcache.read_block(BlockNumber(SUPERBLOCK_START))?;
    let info = Superblock::parse_from_bytes(raw.as_slice())
        .map_err(|err| MinfsError::BadState(err.to_string()))?;
    check_superblock(&info, bcache.max_blocks())?;
    Ok(info)
}

/// Verify the primary superblock; if it is invalid, validate the backup
/// and copy it over the primary.
pub fn repair_superblock(bcache: &Bcache) -> Result<Superblock> {
    if let Ok(info) = load_superblock(bcache) {
        return Ok(info);
    }
    warn!(target: "minfs::superblock", event = "repair_attempt");

    for candidate in [
        BlockNumber(minfs_types::NON_FVM_SUPERBLOCK_BACKUP),
        BlockNumber(minfs_types::FVM_SUPERBLOCK_BACKUP),
    ] {
        if candidate.0 >= bcache.max_blocks() {
            continue;
        }
        let raw = bcache.read_block(candidate)?;
        let Ok(backup) = Superblock::parse_from_bytes(raw.as_slice()) else {
            continue;
        };
        if check_superblock(&backup, bcache.max_blocks()).is_err() {
            continue;
        }
        // The backup location must agree with the flags it claims.
        if backup.backup_location() != candidate {
            continue;
        }
        bcache.write_block(BlockNumber(SUPERBLOCK_START), &superblock_block(&backup))?;
        bcache.sync()?;
        warn!(
            target: "minfs::superblock",
            event = "repaired_from_backup",
            backup_block = candidate.0
        );
        return Ok(backup);
    }
    Err(MinfsError::BadState(
        "both superblocks are corrupt".to_owned(),
    ))
}

/// Fuses "read the superblock" with "correct it if it is wrong".
pub fn load_superblock_with_repair(bcache: &Bcache, repair: bool) -> Result<Superblock> {
    match load_superblock(bcache) {
        Ok(info) => Ok(info),
        Err(err) if repair => {
            warn!(target: "minfs::superblock", event = "primary_invalid", %err);
            repair_superblock(bcache)
        }
        Err(err) => Err(err),
    }
}

/// Scan both on-disk bitmaps and rewrite the superblock's allocation
/// counts from their popcounts.
pub fn reconstruct_alloc_counts(bcache: &Bcache, info: &mut Superblock) -> Result<()> {
    // Direct popcount over every bitmap block in the region; bits past
    // the tracked range are never set by the allocator.
    let count_region = |start: u32, blocks: u32| -> Result<u32> {
        let mut allocated = 0u32;
        for rel in 0..blocks {
            let raw = bcache.read_block(BlockNumber(start + rel))?;
            allocated += bitmap_count_allocated(raw.as_slice(), MINFS_BLOCK_BITS);
        }
        Ok(allocated)
    };

    info.alloc_inode_count = count_region(info.ibm_block, info.inode_bitmap_blocks())?;
    info.alloc_block_count = count_region(info.abm_block, info.block_bitmap_blocks())?;
    info.update_checksum();
    debug!(
        target: "minfs::superblock",
        event = "reconstructed_counts",
        alloc_blocks = info.alloc_block_count,
        alloc_inodes = info.alloc_inode_count
    );
    Ok(())
}
