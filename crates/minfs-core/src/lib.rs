#![forbid(unsafe_code)]
//! MinFS core: a small journaled block filesystem.
//!
//! `Minfs` ties the layers together: the block cache, the two bitmap
//! allocators, the inode table, the write-ahead journal, and the vnodes
//! holding the file engine. All mutating metadata work flows through
//! `Transaction`s that commit via the journal; data blocks are written
//! copy-on-write to their final locations.

mod mkfs;
mod superblock;
mod transaction;
mod vnode;
mod volume;

pub use mkfs::{mkfs, FormatOptions};
pub use superblock::{
    check_superblock, load_superblock, load_superblock_with_repair, reconstruct_alloc_counts,
    repair_superblock, superblock_block, IntegrityCheck, SuperblockManager,
    UpdateBackupSuperblock,
};
pub use transaction::{
    CachedBlockTransaction, Transaction, TransactionLimits, MAX_META_BLOCKS_PER_TXN,
    WRITEBACK_CAPACITY_BLOCKS,
};
pub use vnode::{VnodeAttributes, VnodeMinfs};
pub use volume::{volume_for, RawVolume, RegionId, SlicedVolume, VolumeManager};

use minfs_alloc::{Allocator, Reservation};
use minfs_block::Bcache;
use minfs_error::{MinfsError, Result};
use minfs_inode::{InodeManager, PendingWork};
use minfs_journal::{replay_journal, Journal, JournalOp};
use minfs_types::{
    BlockNumber, Inode, InodeNumber, Superblock, MINFS_BLOCK_SIZE, MINFS_CURRENT_REVISION,
    MINFS_FLAG_CLEAN, MINFS_MAGIC_FILE, MINFS_MAGIC_PURGED, MINFS_ROOT_INO,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Mount-time options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountOptions {
    /// Make no changes at all, not even journal replay or the clean bit.
    pub readonly: bool,
    /// Replay and repair as usual, then serve read-only.
    pub readonly_after_initialization: bool,
    /// Record metric collection in the mount state. No pipeline is wired
    /// up here.
    pub metrics: bool,
    pub verbose: bool,
    /// Repair the superblock from the backup when the primary is bad.
    pub repair_filesystem: bool,
    pub fvm_data_slices: u32,
    /// Keep transactions open across writes, deferring writeback.
    pub dirty_cache_enabled: bool,
    /// Suppress non-error logs.
    pub quiet: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            readonly_after_initialization: false,
            metrics: false,
            verbose: false,
            repair_filesystem: true,
            fvm_data_slices: 1,
            dirty_cache_enabled: false,
            quiet: false,
        }
    }
}

/// Nanoseconds since the Unix epoch.
pub(crate) fn current_time_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A mounted MinFS instance.
pub struct Minfs {
    pub(crate) bcache: Bcache,
    pub(crate) sb: Mutex<SuperblockManager>,
    pub(crate) block_allocator: Mutex<Allocator>,
    pub(crate) inode_allocator: Mutex<Allocator>,
    pub(crate) inodes: Mutex<InodeManager>,
    journal: Mutex<Option<Journal>>,
    volume: Mutex<Box<dyn VolumeManager>>,
    vnodes: Mutex<HashMap<u32, Weak<VnodeMinfs>>>,
    dirty_bytes: AtomicU64,
    readonly: AtomicBool,
    options: MountOptions,
    limits: TransactionLimits,
    data_start: BlockNumber,
}

/// Mount the filesystem backed by `bcache` and return it with its root
/// vnode resolved.
pub fn mount(bcache: Bcache, options: MountOptions) -> Result<Minfs> {
    let fs = Minfs::create(bcache, options)?;
    let root = fs.vnode_get(InodeNumber(MINFS_ROOT_INO))?;
    if !root.is_directory() {
        return Err(MinfsError::BadState("root inode is not a directory".to_owned()));
    }
    Ok(fs)
}

impl Minfs {
    /// Load the filesystem: superblock (repairing if allowed), journal
    /// replay, allocator and inode-table load, clean-bit bookkeeping,
    /// and the unlinked-inode purge.
    pub fn create(bcache: Bcache, options: MountOptions) -> Result<Self> {
        let mut info = load_superblock_with_repair(&bcache, options.repair_filesystem)?;

        if !info.is_clean() && !options.quiet {
            warn!(target: "minfs::mount", event = "dirty_mount");
        }

        if options.readonly {
            if !options.quiet {
                warn!(target: "minfs::mount", event = "skipping_replay");
            }
        } else {
            // Replay the journal before loading any other structures;
            // the superblock itself may be rewritten by replay.
            replay_journal(&bcache, info.journal_start_block(), info.journal_blocks())?;
            info = load_superblock(&bcache)?;
        }

        if options.verbose {
            dump_info(&info);
        }

        let checks = if options.repair_filesystem {
            IntegrityCheck::All
        } else {
            IntegrityCheck::None
        };
        let sb = SuperblockManager::create(info, bcache.max_blocks(), checks)?;
        let info = *sb.info();
        let volume = volume_for(&info, &bcache)?;
        let data_start = volume.region_start(RegionId::Data);

        let inode_bitmap = read_region(&bcache, info.ibm_block, info.inode_bitmap_blocks())?;
        let inode_allocator = Allocator::from_bitmap(
            inode_bitmap,
            info.inode_count,
            BlockNumber(info.ibm_block),
        );
        let block_bitmap = read_region(&bcache, info.abm_block, info.block_bitmap_blocks())?;
        let block_allocator = Allocator::from_bitmap(
            block_bitmap,
            info.block_count,
            BlockNumber(info.abm_block),
        );
        let inodes = InodeManager::load_from(&bcache, BlockNumber(info.ino_block), info.inode_count)?;

        let journal = if options.readonly {
            None
        } else {
            Some(Journal::open(
                &bcache,
                info.journal_start_block(),
                info.journal_blocks(),
            )?)
        };

        let limits = TransactionLimits::new(&info);
        let fs = Self {
            bcache,
            sb: Mutex::new(sb),
            block_allocator: Mutex::new(block_allocator),
            inode_allocator: Mutex::new(inode_allocator),
            inodes: Mutex::new(inodes),
            journal: Mutex::new(journal),
            volume: Mutex::new(volume),
            vnodes: Mutex::new(HashMap::new()),
            dirty_bytes: AtomicU64::new(0),
            readonly: AtomicBool::new(false),
            options,
            limits,
            data_start,
        };

        if !fs.options.readonly {
            // Mark the filesystem as receiving modifications; the clean
            // flag is restored on orderly shutdown.
            fs.update_clean_bit_and_oldest_revision(false)?;
            fs.purge_unlinked()?;
            if fs.options.readonly_after_initialization {
                fs.stop_writeback()?;
            }
        }
        fs.readonly.store(
            fs.options.readonly || fs.options.readonly_after_initialization,
            Ordering::SeqCst,
        );
        Ok(fs)
    }

    /// Flush everything, restore the clean flag, and hand the device
    /// back.
    pub fn unmount(self) -> Result<Bcache> {
        let live: Vec<Arc<VnodeMinfs>> = self
            .vnodes
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for vnode in live {
            vnode.flush_cached_writes(&self)?;
        }
        if !self.is_readonly() {
            self.update_clean_bit_and_oldest_revision(true)?;
        }
        if let Some(journal) = self.journal.lock().as_mut() {
            journal.sync(&self.bcache)?;
        }
        self.bcache.sync()?;
        if !self.options.quiet {
            info!(target: "minfs::mount", event = "unmounted");
        }
        Ok(self.bcache)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Snapshot of the in-memory superblock.
    #[must_use]
    pub fn info(&self) -> Superblock {
        *self.sb.lock().info()
    }

    #[must_use]
    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    #[must_use]
    pub fn limits(&self) -> &TransactionLimits {
        &self.limits
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn dirty_cache_enabled(&self) -> bool {
        self.options.dirty_cache_enabled
    }

    /// First device block of the data region.
    #[must_use]
    pub fn data_start(&self) -> BlockNumber {
        self.data_start
    }

    /// Free data blocks net of reservations.
    #[must_use]
    pub fn free_data_blocks(&self) -> u32 {
        self.block_allocator.lock().free_count()
    }

    #[must_use]
    pub fn free_inodes(&self) -> u32 {
        self.inode_allocator.lock().free_count()
    }

    #[must_use]
    pub fn dirty_bytes(&self) -> u64 {
        self.dirty_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn add_dirty_bytes(&self, bytes: u64, _was_allocated: bool) {
        self.dirty_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn subtract_dirty_bytes(&self, bytes: u64, _was_allocated: bool) {
        self.dirty_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Begin a transaction holding the requested reservations.
    pub fn begin_transaction(
        &self,
        reserve_inodes: u32,
        reserve_blocks: u32,
    ) -> Result<Transaction<'_>> {
        if self.is_readonly() {
            return Err(MinfsError::ReadOnly);
        }
        let mut inode_reservation = if reserve_inodes > 0 {
            self.inode_allocator.lock().reserve(reserve_inodes)?
        } else {
            Reservation::default()
        };
        let block_reservation = match self.reserve_data_blocks(reserve_blocks) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.inode_allocator.lock().cancel(&mut inode_reservation);
                return Err(err);
            }
        };
        Ok(Transaction::new(self, inode_reservation, block_reservation))
    }

    /// Reattach a cached transaction, extending its block reservation.
    /// On failure the transaction is still returned so the caller can
    /// flush the writes it already covers.
    pub(crate) fn continue_transaction(
        &self,
        extra_blocks: u32,
        cached: CachedBlockTransaction,
    ) -> std::result::Result<Transaction<'_>, (Transaction<'_>, MinfsError)> {
        let mut block_reservation = cached.take_block_reservation();
        if extra_blocks > 0 {
            let mut outcome = self
                .block_allocator
                .lock()
                .extend(&mut block_reservation, extra_blocks);
            if matches!(outcome, Err(MinfsError::NoSpace)) && self.try_grow_data_region(extra_blocks)
            {
                outcome = self
                    .block_allocator
                    .lock()
                    .extend(&mut block_reservation, extra_blocks);
            }
            if let Err(err) = outcome {
                return Err((
                    Transaction::new(self, Reservation::default(), block_reservation),
                    err,
                ));
            }
        }
        Ok(Transaction::new(self, Reservation::default(), block_reservation))
    }

    fn reserve_data_blocks(&self, n: u32) -> Result<Reservation> {
        if n == 0 {
            return Ok(Reservation::default());
        }
        match self.block_allocator.lock().reserve(n) {
            Ok(reservation) => return Ok(reservation),
            Err(MinfsError::NoSpace) => {}
            Err(err) => return Err(err),
        }
        if self.try_grow_data_region(n) {
            self.block_allocator.lock().reserve(n)
        } else {
            Err(MinfsError::NoSpace)
        }
    }

    /// Attempt to grow the data region (sliced volumes only) so at least
    /// `needed` blocks can be reserved.
    fn try_grow_data_region(&self, needed: u32) -> bool {
        let mut volume = self.volume.lock();
        let blocks_per_slice = volume.blocks_per_slice();
        if blocks_per_slice == 0 {
            return false;
        }
        let free = self.block_allocator.lock().free_count();
        let deficit = needed.saturating_sub(free);
        if deficit == 0 {
            return true;
        }
        let slices = deficit.div_ceil(blocks_per_slice);

        // The data bitmap region bounds how far the volume can grow.
        let max_bits = {
            let sb = self.sb.lock();
            let info = sb.info();
            let region_blocks = if info.uses_fvm() {
                info.abm_slices * blocks_per_slice
            } else {
                info.ino_block - info.abm_block
            };
            u64::from(region_blocks) * u64::from(minfs_types::MINFS_BLOCK_BITS)
        };
        let current = self.block_allocator.lock().capacity();
        let new_capacity = u64::from(current) + u64::from(slices) * u64::from(blocks_per_slice);
        if new_capacity > max_bits {
            return false;
        }

        match volume.grow_slices(slices) {
            Ok(new_capacity) => {
                self.block_allocator.lock().grow(new_capacity);
                let mut sb = self.sb.lock();
                let sb_info = sb.mutable_info();
                sb_info.block_count = new_capacity;
                sb_info.dat_slices += slices;
                info!(
                    target: "minfs::mount",
                    event = "data_region_grown",
                    slices,
                    block_count = new_capacity
                );
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn release_cached_transaction(&self, cached: CachedBlockTransaction) {
        let mut reservation = cached.take_block_reservation();
        self.block_allocator.lock().cancel(&mut reservation);
    }

    /// Stage an inode update as transaction metadata.
    pub(crate) fn inode_sync(
        &self,
        txn: &mut Transaction<'_>,
        ino: InodeNumber,
        inode: &Inode,
    ) -> Result<()> {
        self.inodes.lock().update(txn, ino, inode)
    }

    /// Journal the transaction's metadata, then write everything to its
    /// final locations and retire the journal entry.
    pub(crate) fn commit_transaction(&self, mut txn: Transaction<'_>) -> Result<()> {
        {
            let mut blocks = self.block_allocator.lock();
            for freed in std::mem::take(&mut txn.deferred_frees) {
                blocks.free(freed.0);
            }
            blocks.commit(&mut txn.block_reservation);
            let mut inodes_alloc = self.inode_allocator.lock();
            inodes_alloc.commit(&mut txn.inode_reservation);

            let mut sb = self.sb.lock();
            {
                let sb_info = sb.mutable_info();
                sb_info.alloc_block_count = blocks.allocated_count();
                sb_info.alloc_inode_count = inodes_alloc.allocated_count();
            }
            for (block, data) in blocks.take_dirty_blocks() {
                txn.enqueue_metadata(block, data);
            }
            for (block, data) in inodes_alloc.take_dirty_blocks() {
                txn.enqueue_metadata(block, data);
            }
            let update = if txn.update_backup_superblock {
                UpdateBackupSuperblock::Update
            } else {
                UpdateBackupSuperblock::NoUpdate
            };
            sb.write(&mut txn, update);
        }
        // In-memory state is applied; there is no rollback past here.
        txn.committed = true;

        let ops: Vec<JournalOp> = txn
            .metadata_ops
            .iter()
            .map(|(block, data)| JournalOp {
                target: *block,
                data: data.clone(),
                revoked: false,
            })
            .collect();

        let outcome = (|| -> Result<()> {
            let mut journal_guard = self.journal.lock();
            let journal = journal_guard
                .as_mut()
                .ok_or(MinfsError::ReadOnly)?;
            let seq = journal.append_entry(&self.bcache, &ops)?;
            for (block, data) in &txn.metadata_ops {
                self.bcache.write_block(*block, data)?;
            }
            for (block, data) in &txn.data_ops {
                self.bcache.write_block(*block, data)?;
            }
            self.bcache.sync()?;
            journal.retire(&self.bcache)?;
            trace!(
                target: "minfs::txn",
                event = "committed",
                seq,
                metadata_blocks = txn.metadata_ops.len(),
                data_blocks = txn.data_ops.len()
            );
            Ok(())
        })();

        if let Err(err) = outcome {
            // A failed journal write poisons the mount.
            error!(
                target: "minfs::txn",
                event = "commit_failed",
                %err
            );
            self.readonly.store(true, Ordering::SeqCst);
            return Err(err);
        }
        txn.pinned.clear();
        Ok(())
    }

    /// Barrier: all prior transactions have reached their final
    /// locations when this returns.
    pub fn sync(&self) -> Result<()> {
        if let Some(journal) = self.journal.lock().as_mut() {
            journal.sync(&self.bcache)?;
        }
        self.bcache.sync()
    }

    // ── Clean flag ──────────────────────────────────────────────────────

    fn update_clean_bit_and_oldest_revision(&self, is_clean: bool) -> Result<()> {
        let mut txn = self.begin_transaction(0, 0)?;
        {
            let mut sb = self.sb.lock();
            let sb_info = sb.mutable_info();
            if MINFS_CURRENT_REVISION < sb_info.oldest_revision {
                sb_info.oldest_revision = MINFS_CURRENT_REVISION;
            }
            if is_clean {
                sb_info.flags |= MINFS_FLAG_CLEAN;
            } else {
                sb_info.flags &= !MINFS_FLAG_CLEAN;
            }
        }
        txn.update_backup_superblock = true;
        txn.commit()
    }

    /// Flush outstanding work and stop accepting modifications.
    fn stop_writeback(&self) -> Result<()> {
        if !self.is_readonly() {
            self.update_clean_bit_and_oldest_revision(true)?;
        }
        self.readonly.store(true, Ordering::SeqCst);
        self.bcache.sync()
    }

    // ── Vnodes ──────────────────────────────────────────────────────────

    /// Open the vnode for `ino`, serving from the open-file table when
    /// it is already live.
    pub fn vnode_get(&self, ino: InodeNumber) -> Result<Arc<VnodeMinfs>> {
        let info = self.info();
        if ino.0 < 1 || ino.0 >= info.inode_count {
            return Err(MinfsError::InvalidArgs(format!("inode {ino} out of range")));
        }
        if let Some(vnode) = self.vnodes.lock().get(&ino.0).and_then(Weak::upgrade) {
            return Ok(vnode);
        }

        let inode = self.inodes.lock().load(ino)?;
        if inode.magic == MINFS_MAGIC_PURGED || !inode.is_allocated() {
            return Err(MinfsError::NotFound(format!("inode {ino}")));
        }
        if inode.link_count == 0 {
            // An unlinked inode surviving to lookup means an interrupted
            // unlink; keep it quarantined.
            warn!(target: "minfs::mount", event = "unlinked_vnode_load", ino = ino.0);
            return Err(MinfsError::BadState(format!("inode {ino} is unlinked")));
        }
        let vnode = VnodeMinfs::from_inode(ino, inode);
        self.vnodes.lock().insert(ino.0, Arc::downgrade(&vnode));
        Ok(vnode)
    }

    /// Create a new regular file vnode.
    pub fn create_file(&self) -> Result<Arc<VnodeMinfs>> {
        let mut txn = self.begin_transaction(1, 0)?;
        let now = current_time_nanos();
        let ino = txn.allocate_inode();
        let inode = Inode {
            magic: MINFS_MAGIC_FILE,
            link_count: 1,
            create_time: now,
            modify_time: now,
            ..Inode::default()
        };
        self.inodes.lock().update(&mut txn, ino, &inode)?;
        let vnode = VnodeMinfs::from_inode(ino, inode);
        txn.pin_vnode(Arc::clone(&vnode));
        txn.commit()?;
        self.vnodes.lock().insert(ino.0, Arc::downgrade(&vnode));
        debug!(target: "minfs::file", event = "created", ino = ino.0);
        Ok(vnode)
    }

    /// Free a vnode's inode and every block it owns (the unlink path for
    /// a file with no remaining holders).
    pub fn remove_vnode(&self, vnode: &Arc<VnodeMinfs>) -> Result<()> {
        let mut txn = self.begin_transaction(0, 0)?;
        vnode.inner.lock().inode.link_count = 0;
        self.ino_free(&mut txn, vnode)?;
        txn.pin_vnode(Arc::clone(vnode));
        txn.commit()?;
        self.vnodes.lock().remove(&vnode.ino().0);
        Ok(())
    }

    /// Release the inode and data of `vnode` into `txn`.
    fn ino_free(&self, txn: &mut Transaction<'_>, vnode: &Arc<VnodeMinfs>) -> Result<()> {
        vnode.cancel_pending_writeback(self);
        self.inode_allocator.lock().free(vnode.ino().0);

        let mut inner = vnode.inner.lock();
        let bs = u64::from(MINFS_BLOCK_SIZE);
        let end_fb = inner.inode.size.div_ceil(bs) as u32;
        if end_fb > 0 {
            vnode.blocks_shrink(&mut inner, self, txn, 0, end_fb)?;
        }
        debug_assert_eq!(inner.inode.block_count, 0);

        // Stamp the record so stale table contents are never misread as
        // a live inode.
        inner.inode = Inode {
            magic: MINFS_MAGIC_PURGED,
            ..Inode::default()
        };
        inner.node_size = 0;
        inner.purged = true;
        self.inodes.lock().update(txn, vnode.ino(), &inner.inode)?;
        Ok(())
    }

    /// Drop one link to an open vnode. At zero links the inode moves
    /// onto the unlinked list; its storage is reclaimed by the purge on
    /// the next mount, or by `remove_vnode` when the last holder closes.
    pub fn unlink_vnode(&self, vnode: &Arc<VnodeMinfs>) -> Result<()> {
        let mut txn = self.begin_transaction(0, 0)?;
        let links = {
            let mut inner = vnode.inner.lock();
            inner.inode.link_count = inner.inode.link_count.saturating_sub(1);
            inner.inode.link_count
        };
        if links == 0 {
            self.add_unlinked(&mut txn, vnode)?;
            self.vnodes.lock().remove(&vnode.ino().0);
        } else {
            let inner = vnode.inner.lock();
            self.inodes.lock().update(&mut txn, vnode.ino(), &inner.inode)?;
        }
        txn.pin_vnode(Arc::clone(vnode));
        txn.commit()
    }

    // ── Unlinked list ───────────────────────────────────────────────────

    /// Append `vnode` (whose link count has reached zero while open) to
    /// the on-disk unlinked list.
    pub fn add_unlinked(&self, txn: &mut Transaction<'_>, vnode: &Arc<VnodeMinfs>) -> Result<()> {
        debug_assert_eq!(vnode.inner.lock().inode.link_count, 0);
        let ino = vnode.ino();
        let tail = {
            let mut sb = self.sb.lock();
            let sb_info = sb.mutable_info();
            let tail = sb_info.unlinked_tail;
            if tail == 0 {
                debug_assert_eq!(sb_info.unlinked_head, 0);
                sb_info.unlinked_head = ino.0;
            }
            sb_info.unlinked_tail = ino.0;
            tail
        };
        if tail != 0 {
            let mut tail_inode = self.inodes.lock().load(InodeNumber(tail))?;
            tail_inode.next_inode = ino.0;
            self.inodes.lock().update(txn, InodeNumber(tail), &tail_inode)?;
            let mut inner = vnode.inner.lock();
            inner.inode.last_inode = tail;
            self.inodes.lock().update(txn, ino, &inner.inode)?;
        } else {
            let inner = vnode.inner.lock();
            self.inodes.lock().update(txn, ino, &inner.inode)?;
        }
        Ok(())
    }

    /// Remove `vnode` from the on-disk unlinked list (relink performed).
    pub fn remove_unlinked(&self, txn: &mut Transaction<'_>, vnode: &Arc<VnodeMinfs>) -> Result<()> {
        let (last, next) = {
            let inner = vnode.inner.lock();
            (inner.inode.last_inode, inner.inode.next_inode)
        };
        if last == 0 {
            let mut sb = self.sb.lock();
            debug_assert_eq!(sb.info().unlinked_head, vnode.ino().0);
            sb.mutable_info().unlinked_head = next;
        } else {
            let mut last_inode = self.inodes.lock().load(InodeNumber(last))?;
            last_inode.next_inode = next;
            self.inodes.lock().update(txn, InodeNumber(last), &last_inode)?;
        }
        if next == 0 {
            let mut sb = self.sb.lock();
            debug_assert_eq!(sb.info().unlinked_tail, vnode.ino().0);
            sb.mutable_info().unlinked_tail = last;
        } else {
            let mut next_inode = self.inodes.lock().load(InodeNumber(next))?;
            next_inode.last_inode = last;
            self.inodes.lock().update(txn, InodeNumber(next), &next_inode)?;
        }
        Ok(())
    }

    /// Walk the unlinked list left behind by an interrupted unlink and
    /// free every inode on it.
    fn purge_unlinked(&self) -> Result<()> {
        let mut next_ino = self.info().unlinked_head;
        if next_ino == 0 {
            debug_assert_eq!(self.info().unlinked_tail, 0);
            return Ok(());
        }

        let mut purged = 0u32;
        while next_ino != 0 {
            let inode = self.inodes.lock().load(InodeNumber(next_ino))?;
            debug_assert_eq!(inode.link_count, 0);
            let following = inode.next_inode;
            let vnode = VnodeMinfs::from_inode(InodeNumber(next_ino), inode);

            let mut txn = self.begin_transaction(0, 0)?;
            self.ino_free(&mut txn, &vnode)?;
            {
                let mut sb = self.sb.lock();
                let sb_info = sb.mutable_info();
                sb_info.unlinked_head = following;
                if following == 0 {
                    sb_info.unlinked_tail = 0;
                }
            }
            if following != 0 {
                let mut next_inode = self.inodes.lock().load(InodeNumber(following))?;
                debug_assert_eq!(next_inode.last_inode, next_ino);
                next_inode.last_inode = 0;
                self.inodes
                    .lock()
                    .update(&mut txn, InodeNumber(following), &next_inode)?;
            }
            txn.commit()?;
            next_ino = following;
            purged += 1;
        }

        if !self.options.quiet {
            warn!(
                target: "minfs::mount",
                event = "purged_unlinked",
                count = purged
            );
        }
        Ok(())
    }
}

fn read_region(bcache: &Bcache, start: u32, blocks: u32) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(blocks as usize * MINFS_BLOCK_SIZE as usize);
    for rel in 0..blocks {
        out.extend_from_slice(bcache.read_block(BlockNumber(start + rel))?.as_slice());
    }
    Ok(out)
}

/// Field-by-field superblock dump for verbose mounts.
fn dump_info(info: &Superblock) {
    debug!(target: "minfs::mount", magic0 = info.magic0, magic1 = info.magic1);
    debug!(target: "minfs::mount", format_version = info.format_version);
    debug!(target: "minfs::mount", data_blocks = info.block_count, block_size = info.block_size);
    debug!(target: "minfs::mount", inodes = info.inode_count, inode_size = info.inode_size);
    debug!(target: "minfs::mount", alloc_block_count = info.alloc_block_count);
    debug!(target: "minfs::mount", alloc_inode_count = info.alloc_inode_count);
    debug!(target: "minfs::mount", ibm_block = info.ibm_block);
    debug!(target: "minfs::mount", abm_block = info.abm_block);
    debug!(target: "minfs::mount", ino_block = info.ino_block);
    debug!(target: "minfs::mount", integrity_start_block = info.integrity_start_block);
    debug!(target: "minfs::mount", dat_block = info.dat_block);
    debug!(target: "minfs::mount", fvm = info.uses_fvm());
    debug!(target: "minfs::mount", checksum = info.checksum);
    debug!(target: "minfs::mount", generation_count = info.generation_count);
    debug!(target: "minfs::mount", oldest_revision = info.oldest_revision);
}

// Commonly needed alongside the core types.
pub use minfs_types::{FileBlock, MINFS_MAX_FILE_SIZE};
