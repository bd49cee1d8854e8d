//! In-memory vnodes and the file write engine.
//!
//! A `VnodeMinfs` owns its inode; bytes written land in an in-memory
//! page buffer and the touched file blocks are marked pending. Flushing
//! drains the pending set through copy-on-write block swaps into a
//! transaction, which journals the metadata and writes the data to its
//! final locations. With the dirty cache enabled the transaction (really
//! its block reservation) is kept open across writes.

use crate::transaction::Transaction;
use crate::{current_time_nanos, Minfs};
use minfs_block::ResizeableBuffer;
use minfs_error::{MinfsError, Result};
use minfs_inode::{lookup_file_block, PendingWork, VnodeIterator};
use minfs_types::{
    DataBlock, FileBlock, Inode, InodeNumber, MINFS_BLOCK_SIZE, MINFS_DIRECT,
    MINFS_DIRECT_PER_INDIRECT, MINFS_INDIRECT, MINFS_MAX_FILE_BLOCK, MINFS_MAX_FILE_SIZE,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Global dirty-byte ceiling before a write forces a flush. Best-effort
/// throttle; the knob is `MountOptions::dirty_cache_enabled`.
pub(crate) const DIRTY_BYTE_FLUSH_THRESHOLD: u64 = 256 * 1024;

/// Attributes surfaced at the VFS boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnodeAttributes {
    pub ino: u32,
    pub size: u64,
    pub block_count: u32,
    pub link_count: u32,
    pub create_time: u64,
    pub modify_time: u64,
    pub is_directory: bool,
}

// ── Pending allocation state ────────────────────────────────────────────────

/// Per-file map of pending file blocks: written into the page buffer but
/// not yet assigned an absolute block. The payload bit records whether
/// the slot was previously allocated (for dirty-byte accounting and
/// copy-on-write).
#[derive(Debug, Default)]
pub(crate) struct PendingAllocations {
    map: BTreeMap<u32, bool>,
}

impl PendingAllocations {
    pub fn is_pending(&self, fb: u32) -> bool {
        self.map.contains_key(&fb)
    }

    /// Mark `fb` pending. Returns false if it already was; the original
    /// `was_allocated` bit is kept in that case.
    pub fn set_pending(&mut self, fb: u32, was_allocated: bool) -> bool {
        use std::collections::btree_map::Entry;
        match self.map.entry(fb) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(was_allocated);
                true
            }
        }
    }

    pub fn clear_pending(&mut self, fb: u32) -> Option<bool> {
        self.map.remove(&fb)
    }

    pub fn total(&self) -> u32 {
        self.map.len() as u32
    }

    /// Pending blocks that were holes (not yet counted in
    /// `Inode::block_count`).
    pub fn new_pending(&self) -> u32 {
        self.map.values().filter(|&&was| !was).count() as u32
    }

    /// First contiguous run of pending file blocks.
    pub fn next_range(&self) -> Option<(u32, u32)> {
        let (&start, _) = self.map.iter().next()?;
        let mut count = 1;
        for (&fb, _) in self.map.range(start + 1..) {
            if fb != start + count {
                break;
            }
            count += 1;
        }
        Some((start, count))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (u32, bool)> {
        std::mem::take(&mut self.map).into_iter()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

// ── Reservation sizing ──────────────────────────────────────────────────────

/// Blocks to reserve for a write of `length` bytes at `offset`: the data
/// blocks touched plus, worst case, every indirect and double-indirect
/// container newly reachable from the range.
pub(crate) fn required_block_count(offset: u64, length: u64) -> Result<u32> {
    if length == 0 {
        return Ok(0);
    }
    let bs = u64::from(MINFS_BLOCK_SIZE);
    let end = offset.checked_add(length).ok_or(MinfsError::FileTooBig)?;
    let start_fb = offset / bs;
    let end_fb = end.div_ceil(bs);
    if end_fb > MINFS_MAX_FILE_BLOCK {
        return Err(MinfsError::FileTooBig);
    }
    let mut blocks = (end_fb - start_fb) as u32;

    let per = u64::from(MINFS_DIRECT_PER_INDIRECT);
    let ind_lo = MINFS_DIRECT as u64;
    let dind_lo = ind_lo + MINFS_INDIRECT as u64 * per;

    let s = start_fb.max(ind_lo);
    let e = end_fb.min(dind_lo);
    if s < e {
        let first = (s - ind_lo) / per;
        let last = (e - 1 - ind_lo) / per;
        blocks += (last - first + 1) as u32;
    }

    let s = start_fb.max(dind_lo);
    if s < end_fb {
        let first = (s - dind_lo) / per;
        let last = (end_fb - 1 - dind_lo) / per;
        // Child windows plus the double-indirect root itself.
        blocks += (last - first + 1) as u32 + 1;
    }
    Ok(blocks)
}

// ── Vnode ───────────────────────────────────────────────────────────────────

pub(crate) struct VnodeInner {
    pub inode: Inode,
    /// In-memory size: on-disk size plus any staged extension.
    pub node_size: u64,
    pub pending: PendingAllocations,
    /// Page buffer indexed by file block; serves reads of pending blocks
    /// and is the source of data writeback.
    pub content: ResizeableBuffer,
    pub cached_transaction: Option<crate::transaction::CachedBlockTransaction>,
    pub purged: bool,
}

/// An open file (or directory) with its in-memory inode.
pub struct VnodeMinfs {
    ino: InodeNumber,
    pub(crate) inner: Mutex<VnodeInner>,
}

impl VnodeMinfs {
    pub(crate) fn from_inode(ino: InodeNumber, inode: Inode) -> Arc<Self> {
        let node_size = inode.size;
        Arc::new(Self {
            ino,
            inner: Mutex::new(VnodeInner {
                inode,
                node_size,
                pending: PendingAllocations::default(),
                content: ResizeableBuffer::new(),
                cached_transaction: None,
                purged: false,
            }),
        })
    }

    #[must_use]
    pub fn ino(&self) -> InodeNumber {
        self.ino
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.inner.lock().inode.is_directory()
    }

    #[must_use]
    pub fn get_size(&self) -> u64 {
        self.inner.lock().node_size
    }

    /// Data blocks owned plus those pending first-time allocation.
    #[must_use]
    pub fn get_block_count(&self) -> u32 {
        let inner = self.inner.lock();
        inner.inode.block_count + inner.pending.new_pending()
    }

    #[must_use]
    pub fn get_attributes(&self) -> VnodeAttributes {
        let inner = self.inner.lock();
        VnodeAttributes {
            ino: self.ino.0,
            size: inner.node_size,
            block_count: inner.inode.block_count + inner.pending.new_pending(),
            link_count: inner.inode.link_count,
            create_time: inner.inode.create_time,
            modify_time: inner.inode.modify_time,
            is_directory: inner.inode.is_directory(),
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.lock();
        !inner.pending.is_empty() || inner.cached_transaction.is_some()
    }

    // ── Read ────────────────────────────────────────────────────────────

    /// Read up to `buf.len()` bytes at `offset`. Pending blocks are
    /// served from the page buffer; holes read as zeros.
    pub fn read(&self, fs: &Minfs, buf: &mut [u8], offset: u64) -> Result<usize> {
        let inner = self.inner.lock();
        let size = inner.node_size;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let bs = u64::from(MINFS_BLOCK_SIZE);
        let len = usize::try_from((buf.len() as u64).min(size - offset))
            .map_err(|_| MinfsError::InvalidArgs("read length overflows".to_owned()))?;
        let data_start = fs.data_start();

        let mut copied = 0usize;
        while copied < len {
            let pos = offset + copied as u64;
            let fb = (pos / bs) as u32;
            let block_off = (pos % bs) as usize;
            let chunk = (bs as usize - block_off).min(len - copied);
            let dst = &mut buf[copied..copied + chunk];
            if inner.pending.is_pending(fb) {
                dst.copy_from_slice(&inner.content.data(fb)[block_off..block_off + chunk]);
            } else {
                match lookup_file_block(&fs.bcache, data_start, &inner.inode, FileBlock(fb))? {
                    Some(block) => {
                        let raw = fs.bcache.read_block(block.absolute(data_start))?;
                        dst.copy_from_slice(&raw.as_slice()[block_off..block_off + chunk]);
                    }
                    None => dst.fill(0),
                }
            }
            copied += chunk;
        }
        Ok(len)
    }

    // ── Write ───────────────────────────────────────────────────────────

    /// Write `data` at `offset`, staging bytes in memory and flushing (or
    /// caching) a transaction that reserves every block the write may
    /// need.
    pub fn write(self: &Arc<Self>, fs: &Minfs, data: &[u8], offset: u64) -> Result<usize> {
        if fs.is_readonly() {
            return Err(MinfsError::ReadOnly);
        }
        let len = data.len() as u64;
        let end = offset.checked_add(len).ok_or(MinfsError::FileTooBig)?;
        if end > MINFS_MAX_FILE_SIZE {
            return Err(MinfsError::FileTooBig);
        }
        if data.is_empty() {
            return Ok(0);
        }
        trace!(
            target: "minfs::file",
            event = "write",
            ino = self.ino.0,
            len = data.len(),
            offset
        );

        let mut inner = self.inner.lock();
        if inner.purged {
            return Err(MinfsError::BadState(format!(
                "write to purged inode {}",
                self.ino
            )));
        }
        // If this file's pending blocks have crossed a limit, or the
        // filesystem is near-full, flush before proceeding.
        self.check_and_flush(&mut inner, fs, len, offset)?;

        let reserve_blocks = self.required_reservation(&inner, fs, offset, len)?;
        let mut txn = self.get_transaction(&mut inner, fs, reserve_blocks)?;
        self.write_internal(&mut inner, fs, data, offset)?;
        inner.inode.modify_time = current_time_nanos();
        txn.pin_vnode(Arc::clone(self));
        self.flush_transaction(&mut inner, fs, txn, false)?;
        Ok(data.len())
    }

    /// Write at the current end of file; returns `(end_offset, written)`.
    pub fn append(self: &Arc<Self>, fs: &Minfs, data: &[u8]) -> Result<(u64, usize)> {
        let offset = self.get_size();
        let written = self.write(fs, data, offset)?;
        Ok((self.get_size(), written))
    }

    /// Blocks to reserve, accounting for blocks already pending (their
    /// reservation is held by the cached transaction).
    fn required_reservation(
        &self,
        inner: &VnodeInner,
        fs: &Minfs,
        offset: u64,
        length: u64,
    ) -> Result<u32> {
        let uncached = required_block_count(offset, length)?;
        if !fs.dirty_cache_enabled() {
            return Ok(uncached);
        }
        let bs = u64::from(MINFS_BLOCK_SIZE);
        let start_fb = (offset / bs) as u32;
        let end_fb = (offset + length).div_ceil(bs) as u32;
        let already_pending =
            (start_fb..end_fb).filter(|&fb| inner.pending.is_pending(fb)).count() as u32;
        Ok(uncached.saturating_sub(already_pending))
    }

    /// Copy bytes into the page buffer and mark the touched file blocks
    /// pending. No device I/O is issued here; everything is deferred to
    /// writeback.
    fn write_internal(
        &self,
        inner: &mut VnodeInner,
        fs: &Minfs,
        data: &[u8],
        offset: u64,
    ) -> Result<()> {
        let bs = u64::from(MINFS_BLOCK_SIZE);
        let len = data.len() as u64;
        let start_fb = (offset / bs) as u32;
        let end_fb = ((offset + len - 1) / bs) as u32;
        let data_start = fs.data_start();
        inner.content.grow_to(end_fb + 1);

        let mut copied = 0usize;
        for fb in start_fb..=end_fb {
            let block_start = u64::from(fb) * bs;
            let from = offset.max(block_start);
            let to = (offset + len).min(block_start + bs);
            let chunk = (to - from) as usize;

            if !inner.pending.is_pending(fb) {
                let mapped =
                    lookup_file_block(&fs.bcache, data_start, &inner.inode, FileBlock(fb))?;
                // A partial overwrite of an allocated block must page the
                // old contents in before the copy-on-write swap rewrites
                // the whole block.
                if let Some(old) = mapped {
                    if chunk < bs as usize {
                        let raw = fs.bcache.read_block(old.absolute(data_start))?;
                        inner.content.data_mut(fb).copy_from_slice(raw.as_slice());
                    }
                }
                inner.pending.set_pending(fb, mapped.is_some());
                fs.add_dirty_bytes(bs, mapped.is_some());
            }

            let dst = inner.content.data_mut(fb);
            dst[(from - block_start) as usize..(to - block_start) as usize]
                .copy_from_slice(&data[copied..copied + chunk]);
            copied += chunk;
        }
        inner.node_size = inner.node_size.max(offset + len);
        Ok(())
    }

    // ── Transaction plumbing ────────────────────────────────────────────

    /// Returns a fresh transaction, or continues the cached one by
    /// extending its reservation. A failed extension force-flushes the
    /// cached writes and propagates the error.
    fn get_transaction<'f>(
        self: &Arc<Self>,
        inner: &mut VnodeInner,
        fs: &'f Minfs,
        reserve_blocks: u32,
    ) -> Result<Transaction<'f>> {
        if let Some(cached) = inner.cached_transaction.take() {
            match fs.continue_transaction(reserve_blocks, cached) {
                Ok(txn) => Ok(txn),
                Err((txn, err)) => {
                    warn!(
                        target: "minfs::file",
                        event = "reservation_extend_failed",
                        ino = self.ino.0,
                        %err
                    );
                    self.force_flush_transaction(inner, fs, txn)?;
                    Err(err)
                }
            }
        } else {
            fs.begin_transaction(0, reserve_blocks)
        }
    }

    /// Either commit now or keep the transaction open for later writes
    /// (dirty cache).
    fn flush_transaction(
        self: &Arc<Self>,
        inner: &mut VnodeInner,
        fs: &Minfs,
        txn: Transaction<'_>,
        force: bool,
    ) -> Result<()> {
        if fs.dirty_cache_enabled() && !force && txn.metadata_op_count() == 0 {
            inner.cached_transaction = Some(txn.into_cached());
            return Ok(());
        }
        self.force_flush_transaction(inner, fs, txn)
    }

    fn force_flush_transaction(
        self: &Arc<Self>,
        inner: &mut VnodeInner,
        fs: &Minfs,
        txn: Transaction<'_>,
    ) -> Result<()> {
        self.allocate_and_commit_data(inner, fs, txn)
    }

    /// Whether cached writes must be flushed before accepting this one.
    fn should_flush(
        &self,
        inner: &VnodeInner,
        fs: &Minfs,
        length: u64,
        offset: u64,
    ) -> Result<bool> {
        let required = required_block_count(offset, length)?;
        let max = fs.limits().max_data_blocks();
        if inner.pending.total() + required > max {
            return Ok(true);
        }
        if fs.free_data_blocks() < required {
            return Ok(true);
        }
        Ok(fs.dirty_bytes() + length >= DIRTY_BYTE_FLUSH_THRESHOLD)
    }

    fn check_and_flush(
        self: &Arc<Self>,
        inner: &mut VnodeInner,
        fs: &Minfs,
        length: u64,
        offset: u64,
    ) -> Result<()> {
        if self.should_flush(inner, fs, length, offset)? {
            self.flush_cached_writes_locked(inner, fs)?;
        }
        Ok(())
    }

    /// Flush all pending writes now.
    pub fn flush_cached_writes(self: &Arc<Self>, fs: &Minfs) -> Result<()> {
        let mut inner = self.inner.lock();
        self.flush_cached_writes_locked(&mut inner, fs)
    }

    fn flush_cached_writes_locked(
        self: &Arc<Self>,
        inner: &mut VnodeInner,
        fs: &Minfs,
    ) -> Result<()> {
        if inner.pending.is_empty() && inner.cached_transaction.is_none() {
            return Ok(());
        }
        let txn = self.get_transaction(inner, fs, 0)?;
        self.force_flush_transaction(inner, fs, txn)
    }

    /// Drop all pending writes and revert the in-memory size to the
    /// on-disk size. Used when an outer operation aborts before commit.
    pub fn cancel_pending_writeback(&self, fs: &Minfs) {
        let mut inner = self.inner.lock();
        let bs = u64::from(MINFS_BLOCK_SIZE);
        for (_, was_allocated) in inner.pending.drain() {
            fs.subtract_dirty_bytes(bs, was_allocated);
        }
        inner.node_size = inner.inode.size;
        let cached = inner.cached_transaction.take();
        drop(inner);
        if let Some(cached) = cached {
            fs.release_cached_transaction(cached);
        }
    }

    // ── Writeback ───────────────────────────────────────────────────────

    /// Drain the pending set: swap in fresh blocks (copy-on-write),
    /// enqueue the data writes, advance the on-disk size in chunks, then
    /// journal everything in the transaction.
    fn allocate_and_commit_data(
        self: &Arc<Self>,
        inner: &mut VnodeInner,
        fs: &Minfs,
        mut txn: Transaction<'_>,
    ) -> Result<()> {
        let bs = u64::from(MINFS_BLOCK_SIZE);
        let max_blocks = fs.limits().max_data_blocks();

        loop {
            let pending_total = inner.pending.total();
            if pending_total == 0 {
                if inner.inode.size != inner.node_size {
                    inner.inode.size = inner.node_size;
                }
                inner.pending.clear();
                break;
            }

            let (start, count) = inner.pending.next_range().expect("pending set is non-empty");
            let count = count.min(max_blocks);
            self.blocks_swap(inner, fs, &mut txn, start, count)?;

            // Only advance the on-disk size by the portion written so far.
            let last_byte = u64::from(start + count) * bs;
            if last_byte > inner.inode.size && last_byte < inner.node_size {
                inner.inode.size = last_byte;
            } else if inner.node_size <= last_byte {
                inner.inode.size = inner.node_size;
            }
            txn.pin_vnode(Arc::clone(self));
        }

        debug_assert!(inner.pending.is_empty());
        debug_assert_eq!(inner.inode.size, inner.node_size);
        inner.inode.seq_num = inner.inode.seq_num.wrapping_add(1);
        fs.inode_sync(&mut txn, self.ino, &inner.inode)?;
        txn.commit()
    }

    /// For `count` pending file blocks starting at `start`: swap in a
    /// fresh block for each (copy-on-write), rewrite the pointer tree,
    /// and enqueue the data writes.
    fn blocks_swap(
        &self,
        inner: &mut VnodeInner,
        fs: &Minfs,
        txn: &mut Transaction<'_>,
        start: u32,
        count: u32,
    ) -> Result<()> {
        let bs = u64::from(MINFS_BLOCK_SIZE);
        let data_start = fs.data_start();
        let VnodeInner {
            inode,
            pending,
            content,
            ..
        } = inner;

        let mut new_blocks: Vec<DataBlock> = Vec::with_capacity(count as usize);
        let mut newly_mapped = 0u32;
        {
            let mut it =
                VnodeIterator::new(inode, txn, &fs.bcache, data_start, FileBlock(start))?;
            for i in 0..count {
                let fb = start + i;
                debug_assert!(pending.is_pending(fb));
                let old = it.current()?;
                let new = it.txn_mut().swap_block(old)?;
                it.set_current(Some(new))?;
                if old.is_none() {
                    newly_mapped += 1;
                }
                let was_allocated = pending.clear_pending(fb).expect("block marked pending");
                debug_assert_eq!(was_allocated, old.is_some());
                fs.subtract_dirty_bytes(bs, old.is_some());
                new_blocks.push(new);
                if i + 1 < count {
                    it.advance()?;
                }
            }
            it.flush()?;
        }
        inode.block_count += newly_mapped;

        // Enqueue each data block separately; they may not be contiguous
        // on disk.
        for (i, new) in new_blocks.iter().enumerate() {
            let fb = start + i as u32;
            txn.enqueue_data(new.absolute(data_start), content.data(fb).to_vec());
        }
        Ok(())
    }

    // ── Truncate ────────────────────────────────────────────────────────

    /// Truncate to `length`, freeing blocks past the new end. Cached
    /// writes are flushed first, and the metadata reaches the journal
    /// before this returns even though data blocks are allocated lazily.
    pub fn truncate(self: &Arc<Self>, fs: &Minfs, length: u64) -> Result<()> {
        if fs.is_readonly() {
            return Err(MinfsError::ReadOnly);
        }
        if length > MINFS_MAX_FILE_SIZE {
            return Err(MinfsError::InvalidArgs(format!(
                "truncate length {length} exceeds maximum file size"
            )));
        }
        let mut inner = self.inner.lock();
        self.flush_cached_writes_locked(&mut inner, fs)?;

        // Copy-on-write of the boundary block may need one new block.
        let mut txn = fs.begin_transaction(0, 1)?;
        self.truncate_internal(&mut inner, fs, &mut txn, length)?;
        inner.inode.modify_time = current_time_nanos();
        inner.inode.seq_num = inner.inode.seq_num.wrapping_add(1);
        txn.pin_vnode(Arc::clone(self));
        fs.inode_sync(&mut txn, self.ino, &inner.inode)?;
        txn.commit()
    }

    fn truncate_internal(
        &self,
        inner: &mut VnodeInner,
        fs: &Minfs,
        txn: &mut Transaction<'_>,
        length: u64,
    ) -> Result<()> {
        let bs = u64::from(MINFS_BLOCK_SIZE);
        let old_size = inner.node_size;
        let data_start = fs.data_start();

        if length < old_size {
            let start_fb = length.div_ceil(bs) as u32;
            let end_fb = old_size.div_ceil(bs) as u32;
            if end_fb > start_fb {
                self.blocks_shrink(inner, fs, txn, start_fb, end_fb)?;
            }

            // Zero the tail of the boundary block via copy-on-write.
            if length % bs != 0 {
                let fb = (length / bs) as u32;
                if let Some(old) =
                    lookup_file_block(&fs.bcache, data_start, &inner.inode, FileBlock(fb))?
                {
                    let mut bytes = fs.bcache.read_block(old.absolute(data_start))?.into_inner();
                    bytes[(length % bs) as usize..].fill(0);
                    let new = txn.swap_block(Some(old))?;
                    {
                        let inode = &mut inner.inode;
                        let mut it =
                            VnodeIterator::new(inode, txn, &fs.bcache, data_start, FileBlock(fb))?;
                        it.set_current(Some(new))?;
                        it.flush()?;
                    }
                    txn.enqueue_data(new.absolute(data_start), bytes);
                }
            }

            // Clear stale staged bytes past the new end so a later write
            // that re-pends these blocks cannot resurrect old data.
            let cap = inner.content.capacity();
            let boundary_fb = (length / bs) as u32;
            if boundary_fb < cap {
                let off = (length % bs) as usize;
                inner.content.data_mut(boundary_fb)[off..].fill(0);
                if boundary_fb + 1 < cap {
                    inner.content.zero(boundary_fb + 1, cap - boundary_fb - 1)?;
                }
            }
        }

        inner.node_size = length;
        inner.inode.size = length;
        debug!(
            target: "minfs::file",
            event = "truncate",
            ino = self.ino.0,
            from = old_size,
            to = length
        );
        Ok(())
    }

    /// Free every allocated block in `[start_fb, end_fb)`, dropping
    /// now-empty indirect blocks on the way out.
    pub(crate) fn blocks_shrink(
        &self,
        inner: &mut VnodeInner,
        fs: &Minfs,
        txn: &mut Transaction<'_>,
        start_fb: u32,
        end_fb: u32,
    ) -> Result<()> {
        let data_start = fs.data_start();
        let VnodeInner { inode, pending, .. } = inner;
        let mut freed = 0u32;
        {
            let mut it =
                VnodeIterator::new(inode, txn, &fs.bcache, data_start, FileBlock(start_fb))?;
            for fb in start_fb..end_fb {
                debug_assert!(!pending.is_pending(fb));
                if let Some(old) = it.current()? {
                    it.set_current(None)?;
                    it.txn_mut().deallocate_block(old);
                    freed += 1;
                }
                if fb + 1 < end_fb {
                    it.advance()?;
                }
            }
            it.flush()?;
        }
        inode.block_count -= freed;
        Ok(())
    }

    // ── Sync ────────────────────────────────────────────────────────────

    /// Flush this vnode's cached writes and wait for everything prior to
    /// reach its final locations.
    pub fn sync(self: &Arc<Self>, fs: &Minfs) -> Result<()> {
        self.flush_cached_writes(fs)?;
        fs.sync()
    }
}
