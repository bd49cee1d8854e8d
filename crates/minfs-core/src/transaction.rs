//! Transactions: the unit of atomic work.
//!
//! A `Transaction` holds allocator reservations, staged metadata and
//! data operations, and pinned vnodes until `commit` hands everything to
//! the journal. `CachedBlockTransaction` carries a block reservation
//! across calls when the dirty cache keeps a write open.

use crate::Minfs;
use minfs_alloc::Reservation;
use minfs_error::{MinfsError, Result};
use minfs_inode::PendingWork;
use minfs_journal::MAX_ENTRY_PAYLOAD_BLOCKS;
use minfs_types::{BlockNumber, DataBlock, InodeNumber, Superblock, MINFS_DIRECT,
    MINFS_DIRECT_PER_INDIRECT};
use std::collections::HashMap;
use std::sync::Arc;

/// Indirect and double-indirect block updates allowed per transaction.
pub const MAX_META_BLOCKS_PER_TXN: u32 = 16;

/// Blocks of in-flight data writeback the filesystem budgets for.
pub const WRITEBACK_CAPACITY_BLOCKS: u32 = 256;

/// Derived limits tying transaction size to the journal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionLimits {
    pub max_meta_blocks: u32,
    /// Worst-case metadata blocks a single journal entry must hold.
    pub max_entry_data_blocks: u32,
    /// Smallest integrity region that fits the info block plus one
    /// maximal entry.
    pub min_integrity_blocks: u32,
    pub recommended_integrity_blocks: u32,
}

impl TransactionLimits {
    #[must_use]
    pub fn new(info: &Superblock) -> Self {
        let max_meta_blocks = MAX_META_BLOCKS_PER_TXN;
        // Superblock + backup, two inode-table blocks, bitmap spill on
        // both bitmaps, and the double-indirect root.
        let fixed_overhead = 2
            + 2
            + info.inode_bitmap_blocks().clamp(1, 2)
            + info.block_bitmap_blocks().clamp(1, 2)
            + 1;
        let max_entry_data_blocks =
            (max_meta_blocks + fixed_overhead).min(MAX_ENTRY_PAYLOAD_BLOCKS);
        let min_integrity_blocks = 1 + max_entry_data_blocks + 2;
        Self {
            max_meta_blocks,
            max_entry_data_blocks,
            min_integrity_blocks,
            recommended_integrity_blocks: min_integrity_blocks * 2,
        }
    }

    /// Most data blocks one transaction may carry: bounded by the
    /// indirect blocks it may touch and by half the writeback budget.
    #[must_use]
    pub fn max_data_blocks(&self) -> u32 {
        (MINFS_DIRECT as u32 + MINFS_DIRECT_PER_INDIRECT * self.max_meta_blocks)
            .min(WRITEBACK_CAPACITY_BLOCKS / 2)
    }
}

/// Holds a block reservation across multiple writes while the dirty
/// cache defers flushing. Unlike a full `Transaction` it carries no
/// staged operations.
#[derive(Debug)]
pub struct CachedBlockTransaction {
    block_reservation: Reservation,
}

impl CachedBlockTransaction {
    #[must_use]
    pub(crate) fn new(block_reservation: Reservation) -> Self {
        Self { block_reservation }
    }

    #[must_use]
    pub(crate) fn take_block_reservation(self) -> Reservation {
        self.block_reservation
    }

    #[must_use]
    pub fn reserved_blocks(&self) -> u32 {
        self.block_reservation.reserved()
    }
}

/// A unit of atomic work against the filesystem.
///
/// Dropping an uncommitted transaction rolls its reservations back; the
/// blocks it swapped out stay live.
pub struct Transaction<'a> {
    pub(crate) fs: &'a Minfs,
    pub(crate) inode_reservation: Reservation,
    pub(crate) block_reservation: Reservation,
    pub(crate) metadata_ops: Vec<(BlockNumber, Vec<u8>)>,
    metadata_index: HashMap<u32, usize>,
    pub(crate) data_ops: Vec<(BlockNumber, Vec<u8>)>,
    pub(crate) deferred_frees: Vec<DataBlock>,
    pub(crate) pinned: Vec<Arc<crate::VnodeMinfs>>,
    /// Stage the backup superblock alongside the primary at commit.
    pub(crate) update_backup_superblock: bool,
    pub(crate) committed: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        fs: &'a Minfs,
        inode_reservation: Reservation,
        block_reservation: Reservation,
    ) -> Self {
        Self {
            fs,
            inode_reservation,
            block_reservation,
            metadata_ops: Vec::new(),
            metadata_index: HashMap::new(),
            data_ops: Vec::new(),
            deferred_frees: Vec::new(),
            pinned: Vec::new(),
            update_backup_superblock: false,
            committed: false,
        }
    }

    /// Allocate an inode from this transaction's inode reservation.
    pub fn allocate_inode(&mut self) -> InodeNumber {
        let mut inodes = self.fs.inode_allocator.lock();
        InodeNumber(inodes.allocate(&mut self.inode_reservation))
    }

    /// Copy-on-write block swap against this transaction's block
    /// reservation: the old block is freed when the transaction commits.
    pub fn swap_block(&mut self, old: Option<DataBlock>) -> Result<DataBlock> {
        if self.block_reservation.reserved() == 0 {
            return Err(MinfsError::BadState(
                "block swap without remaining reservation".to_owned(),
            ));
        }
        let mut blocks = self.fs.block_allocator.lock();
        let new = blocks.swap(&mut self.block_reservation, old.map(|block| block.0));
        Ok(DataBlock(new))
    }

    /// Stage one data-region write at its final device location.
    pub fn enqueue_data(&mut self, dev_block: BlockNumber, data: Vec<u8>) {
        self.data_ops.push((dev_block, data));
    }

    /// Keep `vnode` alive until this transaction commits or aborts.
    pub fn pin_vnode(&mut self, vnode: Arc<crate::VnodeMinfs>) {
        if !self
            .pinned
            .iter()
            .any(|pinned| Arc::ptr_eq(pinned, &vnode))
        {
            self.pinned.push(vnode);
        }
    }

    #[must_use]
    pub fn reserved_blocks(&self) -> u32 {
        self.block_reservation.reserved()
    }

    #[must_use]
    pub fn metadata_op_count(&self) -> usize {
        self.metadata_ops.len()
    }

    /// Convert into a cached continuation. Only legal while no
    /// operations have been staged.
    pub(crate) fn into_cached(mut self) -> CachedBlockTransaction {
        debug_assert!(self.metadata_ops.is_empty());
        debug_assert!(self.data_ops.is_empty());
        debug_assert!(self.deferred_frees.is_empty());
        debug_assert_eq!(self.inode_reservation.reserved(), 0);
        self.committed = true; // suppress rollback in Drop
        CachedBlockTransaction::new(std::mem::take(&mut self.block_reservation))
    }

    /// Journal and write back everything staged in this transaction.
    pub fn commit(self) -> Result<()> {
        let fs = self.fs;
        fs.commit_transaction(self)
    }
}

impl PendingWork for Transaction<'_> {
    fn allocate_block(&mut self) -> Result<DataBlock> {
        if self.block_reservation.reserved() == 0 {
            return Err(MinfsError::BadState(
                "block allocation without remaining reservation".to_owned(),
            ));
        }
        let mut blocks = self.fs.block_allocator.lock();
        Ok(DataBlock(blocks.allocate(&mut self.block_reservation)))
    }

    fn deallocate_block(&mut self, block: DataBlock) {
        self.deferred_frees.push(block);
    }

    fn enqueue_metadata(&mut self, dev_block: BlockNumber, data: Vec<u8>) {
        if let Some(&index) = self.metadata_index.get(&dev_block.0) {
            self.metadata_ops[index].1 = data;
        } else {
            self.metadata_index
                .insert(dev_block.0, self.metadata_ops.len());
            self.metadata_ops.push((dev_block, data));
        }
    }

    fn staged_metadata(&self, dev_block: BlockNumber) -> Option<Vec<u8>> {
        self.metadata_index
            .get(&dev_block.0)
            .map(|&index| self.metadata_ops[index].1.clone())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Return unused reservations and roll back swapped-in bits.
        let mut blocks = self.fs.block_allocator.lock();
        blocks.cancel(&mut self.block_reservation);
        drop(blocks);
        let mut inodes = self.fs.inode_allocator.lock();
        inodes.cancel(&mut self.inode_reservation);
    }
}
