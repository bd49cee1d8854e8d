#![forbid(unsafe_code)]
//! Inode table and block-pointer tree for MinFS.
//!
//! `InodeManager` keeps an in-memory copy of the on-disk inode table.
//! `map_file_block` turns a logical file block into an inode slot
//! descriptor, and `VnodeIterator` walks a run of file blocks while
//! lazily loading and writing back indirect and double-indirect blocks.
//! The iterator is a borrowed view over the inode and the transaction;
//! advancing does not allocate.
//!
//! Pointer slots hold [`DataBlock`] values relative to the data region;
//! zero is the reserved null block and marks a sparse hole. Indirect
//! blocks themselves are allocated from the data region too.

use minfs_block::{Bcache, Operation, OperationKind, ResizeableBuffer};
use minfs_error::{MinfsError, Result};
use minfs_types::{
    blocks_required_for_inodes, BlockNumber, DataBlock, FileBlock, Inode, InodeNumber,
    MINFS_BLOCK_SIZE, MINFS_DIRECT, MINFS_DIRECT_PER_INDIRECT, MINFS_INDIRECT,
    MINFS_INODES_PER_BLOCK, MINFS_INODE_SIZE, MINFS_MAX_FILE_BLOCK,
};
use tracing::trace;

// ── Pending work interface ──────────────────────────────────────────────────

/// The slice of a transaction the pointer tree and inode table need:
/// block allocation against the transaction's reservation, deferred
/// frees, and metadata staging with read-your-own-writes.
pub trait PendingWork {
    /// Allocate one block from the transaction's data-block reservation.
    fn allocate_block(&mut self) -> Result<DataBlock>;

    /// Schedule a data-region block to be freed when the transaction
    /// commits.
    fn deallocate_block(&mut self, block: DataBlock);

    /// Stage a metadata block write (journaled, then written in place).
    fn enqueue_metadata(&mut self, dev_block: BlockNumber, data: Vec<u8>);

    /// Contents previously staged for `dev_block` in this transaction,
    /// if any. Loads must prefer this over the device so a later
    /// iterator pass observes earlier staged updates.
    fn staged_metadata(&self, dev_block: BlockNumber) -> Option<Vec<u8>>;
}

// ── Inode table ─────────────────────────────────────────────────────────────

/// In-memory copy of the on-disk inode table.
#[derive(Debug)]
pub struct InodeManager {
    start_block: BlockNumber,
    inode_count: u32,
    table: ResizeableBuffer,
}

impl InodeManager {
    /// Read the whole inode table from the device.
    pub fn load_from(bcache: &Bcache, start_block: BlockNumber, inode_count: u32) -> Result<Self> {
        let blocks = blocks_required_for_inodes(u64::from(inode_count));
        let mut table = ResizeableBuffer::new();
        table.grow(blocks);
        bcache.run_operation(
            Operation {
                kind: OperationKind::Read,
                vmo_offset: 0,
                dev_offset: start_block,
                length: blocks,
            },
            &mut table,
        )?;
        Ok(Self {
            start_block,
            inode_count,
            table,
        })
    }

    #[must_use]
    pub fn inode_count(&self) -> u32 {
        self.inode_count
    }

    fn check_ino(&self, ino: InodeNumber) -> Result<()> {
        if ino.0 >= self.inode_count {
            return Err(MinfsError::InvalidArgs(format!(
                "inode {ino} out of range ({} max)",
                self.inode_count
            )));
        }
        Ok(())
    }

    /// Load one inode record from the cached table.
    pub fn load(&self, ino: InodeNumber) -> Result<Inode> {
        self.check_ino(ino)?;
        let rel_block = ino.0 / MINFS_INODES_PER_BLOCK;
        let offset = (ino.0 % MINFS_INODES_PER_BLOCK) as usize * MINFS_INODE_SIZE as usize;
        let block = self.table.data(rel_block);
        Inode::parse_from_bytes(&block[offset..offset + MINFS_INODE_SIZE as usize])
            .map_err(|err| MinfsError::BadState(format!("inode {ino}: {err}")))
    }

    /// Patch one inode record and stage the covering table block.
    pub fn update(
        &mut self,
        txn: &mut dyn PendingWork,
        ino: InodeNumber,
        inode: &Inode,
    ) -> Result<()> {
        self.check_ino(ino)?;
        let rel_block = ino.0 / MINFS_INODES_PER_BLOCK;
        let offset = (ino.0 % MINFS_INODES_PER_BLOCK) as usize * MINFS_INODE_SIZE as usize;
        let block = self.table.data_mut(rel_block);
        block[offset..offset + MINFS_INODE_SIZE as usize].copy_from_slice(&inode.to_bytes());
        txn.enqueue_metadata(
            BlockNumber(self.start_block.0 + rel_block),
            self.table.data(rel_block).to_vec(),
        );
        Ok(())
    }

    /// Extend the table for a grown inode region (sliced backend). The
    /// new table blocks are zero and must be persisted by the caller.
    pub fn grow(&mut self, new_inode_count: u32) {
        let blocks = blocks_required_for_inodes(u64::from(new_inode_count));
        self.table.grow_to(blocks);
        self.inode_count = new_inode_count;
    }
}

// ── Mapper ──────────────────────────────────────────────────────────────────

/// Where a file block's pointer lives within the inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSlot {
    /// `dnum[index]`.
    Direct { index: usize },
    /// `inum[index]`, word `offset` of that indirect block.
    Indirect { index: usize, offset: u32 },
    /// `dinum[index]`, word `indirect_offset` of the double-indirect
    /// block, word `direct_offset` of the child indirect block.
    DoubleIndirect {
        index: usize,
        indirect_offset: u32,
        direct_offset: u32,
    },
}

/// Map a logical file block to its inode slot.
pub fn map_file_block(file_block: FileBlock) -> Result<BlockSlot> {
    let fb = u64::from(file_block.0);
    if fb >= MINFS_MAX_FILE_BLOCK {
        return Err(MinfsError::FileTooBig);
    }
    let per_indirect = u64::from(MINFS_DIRECT_PER_INDIRECT);
    if fb < MINFS_DIRECT as u64 {
        return Ok(BlockSlot::Direct { index: fb as usize });
    }
    let fb = fb - MINFS_DIRECT as u64;
    if fb < MINFS_INDIRECT as u64 * per_indirect {
        return Ok(BlockSlot::Indirect {
            index: (fb / per_indirect) as usize,
            offset: (fb % per_indirect) as u32,
        });
    }
    let fb = fb - MINFS_INDIRECT as u64 * per_indirect;
    Ok(BlockSlot::DoubleIndirect {
        index: (fb / (per_indirect * per_indirect)) as usize,
        indirect_offset: ((fb / per_indirect) % per_indirect) as u32,
        direct_offset: (fb % per_indirect) as u32,
    })
}

/// Identity of the indirect window a slot reads through, used to decide
/// when an advance crosses a window boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowKey {
    None,
    Inum(usize),
    DindChild(u32),
}

fn window_key(slot: BlockSlot) -> WindowKey {
    match slot {
        BlockSlot::Direct { .. } => WindowKey::None,
        BlockSlot::Indirect { index, .. } => WindowKey::Inum(index),
        BlockSlot::DoubleIndirect {
            indirect_offset, ..
        } => WindowKey::DindChild(indirect_offset),
    }
}

fn read_ptr(data: &[u8], word: u32) -> u32 {
    minfs_types::read_le_u32(data, word as usize * 4).unwrap_or(0)
}

fn write_ptr(data: &mut [u8], word: u32, value: u32) {
    minfs_types::write_le_u32(data, word as usize * 4, value);
}

fn all_zero(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

// ── Read-only resolution ────────────────────────────────────────────────────

/// Resolve a file block to its data block without a transaction.
/// `None` means a sparse hole.
pub fn lookup_file_block(
    bcache: &Bcache,
    data_start: BlockNumber,
    inode: &Inode,
    file_block: FileBlock,
) -> Result<Option<DataBlock>> {
    let ptr = match map_file_block(file_block)? {
        BlockSlot::Direct { index } => inode.dnum[index],
        BlockSlot::Indirect { index, offset } => {
            let ind = inode.inum[index];
            if ind == 0 {
                return Ok(None);
            }
            let data = bcache.read_block(DataBlock(ind).absolute(data_start))?;
            read_ptr(data.as_slice(), offset)
        }
        BlockSlot::DoubleIndirect {
            index,
            indirect_offset,
            direct_offset,
        } => {
            let dind = inode.dinum[index];
            if dind == 0 {
                return Ok(None);
            }
            let dind_data = bcache.read_block(DataBlock(dind).absolute(data_start))?;
            let child = read_ptr(dind_data.as_slice(), indirect_offset);
            if child == 0 {
                return Ok(None);
            }
            let child_data = bcache.read_block(DataBlock(child).absolute(data_start))?;
            read_ptr(child_data.as_slice(), direct_offset)
        }
    };
    Ok(if ptr == 0 { None } else { Some(DataBlock(ptr)) })
}

// ── Iterator ────────────────────────────────────────────────────────────────

/// Where a cached indirect block's owning pointer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Inum(usize),
    DindWord(u32),
    Dinum(usize),
}

#[derive(Debug)]
struct IndirectCache {
    block: DataBlock,
    data: Vec<u8>,
    dirty: bool,
    owner: Owner,
}

/// Walks a contiguous range of file blocks, reading and rewriting leaf
/// pointers through cached indirect blocks.
///
/// Invariants:
/// - crossing an indirect-block boundary flushes the previous window or
///   proves it unchanged;
/// - an all-zero indirect or double-indirect block is freed on flush and
///   its owning pointer cleared.
pub struct VnodeIterator<'a, T: PendingWork> {
    inode: &'a mut Inode,
    txn: &'a mut T,
    bcache: &'a Bcache,
    data_start: BlockNumber,
    file_block: u32,
    window: Option<IndirectCache>,
    dind: Option<IndirectCache>,
}

impl<'a, T: PendingWork> VnodeIterator<'a, T> {
    pub fn new(
        inode: &'a mut Inode,
        txn: &'a mut T,
        bcache: &'a Bcache,
        data_start: BlockNumber,
        start: FileBlock,
    ) -> Result<Self> {
        // Validate the starting position eagerly.
        map_file_block(start)?;
        Ok(Self {
            inode,
            txn,
            bcache,
            data_start,
            file_block: start.0,
            window: None,
            dind: None,
        })
    }

    /// The file block the iterator currently addresses.
    #[must_use]
    pub fn file_block(&self) -> FileBlock {
        FileBlock(self.file_block)
    }

    /// Access the underlying transaction (for copy-on-write swaps made
    /// while walking).
    pub fn txn_mut(&mut self) -> &mut T {
        &mut *self.txn
    }

    fn load_block(&mut self, block: DataBlock) -> Result<Vec<u8>> {
        let dev_block = block.absolute(self.data_start);
        if let Some(staged) = self.txn.staged_metadata(dev_block) {
            return Ok(staged);
        }
        Ok(self.bcache.read_block(dev_block)?.into_inner())
    }

    /// Load the double-indirect block, allocating it when `for_write`.
    fn ensure_dind(&mut self, index: usize, for_write: bool) -> Result<bool> {
        if self.dind.is_some() {
            return Ok(true);
        }
        let ptr = self.inode.dinum[index];
        if ptr == 0 {
            if !for_write {
                return Ok(false);
            }
            let fresh = self.txn.allocate_block()?;
            self.inode.dinum[index] = fresh.0;
            self.dind = Some(IndirectCache {
                block: fresh,
                data: vec![0u8; MINFS_BLOCK_SIZE as usize],
                dirty: true,
                owner: Owner::Dinum(index),
            });
            return Ok(true);
        }
        let data = self.load_block(DataBlock(ptr))?;
        self.dind = Some(IndirectCache {
            block: DataBlock(ptr),
            data,
            dirty: false,
            owner: Owner::Dinum(index),
        });
        Ok(true)
    }

    /// Load the indirect window covering the current slot, allocating the
    /// chain when `for_write`. Returns false if the window does not exist
    /// and `for_write` is false.
    fn ensure_window(&mut self, for_write: bool) -> Result<bool> {
        if self.window.is_some() {
            return Ok(true);
        }
        match map_file_block(FileBlock(self.file_block))? {
            BlockSlot::Direct { .. } => Ok(true),
            BlockSlot::Indirect { index, .. } => {
                let ptr = self.inode.inum[index];
                if ptr == 0 {
                    if !for_write {
                        return Ok(false);
                    }
                    let fresh = self.txn.allocate_block()?;
                    self.inode.inum[index] = fresh.0;
                    self.window = Some(IndirectCache {
                        block: fresh,
                        data: vec![0u8; MINFS_BLOCK_SIZE as usize],
                        dirty: true,
                        owner: Owner::Inum(index),
                    });
                } else {
                    let data = self.load_block(DataBlock(ptr))?;
                    self.window = Some(IndirectCache {
                        block: DataBlock(ptr),
                        data,
                        dirty: false,
                        owner: Owner::Inum(index),
                    });
                }
                Ok(true)
            }
            BlockSlot::DoubleIndirect {
                index,
                indirect_offset,
                ..
            } => {
                if !self.ensure_dind(index, for_write)? {
                    return Ok(false);
                }
                let child = read_ptr(&self.dind.as_ref().expect("dind ensured").data, indirect_offset);
                if child == 0 {
                    if !for_write {
                        return Ok(false);
                    }
                    let fresh = self.txn.allocate_block()?;
                    let dind = self.dind.as_mut().expect("dind ensured");
                    write_ptr(&mut dind.data, indirect_offset, fresh.0);
                    dind.dirty = true;
                    self.window = Some(IndirectCache {
                        block: fresh,
                        data: vec![0u8; MINFS_BLOCK_SIZE as usize],
                        dirty: true,
                        owner: Owner::DindWord(indirect_offset),
                    });
                } else {
                    let data = self.load_block(DataBlock(child))?;
                    self.window = Some(IndirectCache {
                        block: DataBlock(child),
                        data,
                        dirty: false,
                        owner: Owner::DindWord(indirect_offset),
                    });
                }
                Ok(true)
            }
        }
    }

    /// Data block the current file block maps to (`None` = hole).
    pub fn current(&mut self) -> Result<Option<DataBlock>> {
        let slot = map_file_block(FileBlock(self.file_block))?;
        let ptr = match slot {
            BlockSlot::Direct { index } => self.inode.dnum[index],
            BlockSlot::Indirect { offset, .. } => {
                if !self.ensure_window(false)? {
                    return Ok(None);
                }
                read_ptr(&self.window.as_ref().expect("window ensured").data, offset)
            }
            BlockSlot::DoubleIndirect { direct_offset, .. } => {
                if !self.ensure_window(false)? {
                    return Ok(None);
                }
                read_ptr(
                    &self.window.as_ref().expect("window ensured").data,
                    direct_offset,
                )
            }
        };
        Ok(if ptr == 0 { None } else { Some(DataBlock(ptr)) })
    }

    /// Rewrite the current leaf pointer through the in-memory cache.
    ///
    /// Writing `None` clears the pointer (making the block a hole); a
    /// wholly absent window is left absent rather than allocated just to
    /// store a zero.
    pub fn set_current(&mut self, new: Option<DataBlock>) -> Result<()> {
        let slot = map_file_block(FileBlock(self.file_block))?;
        let value = new.map_or(0, |block| block.0);
        match slot {
            BlockSlot::Direct { index } => {
                self.inode.dnum[index] = value;
            }
            BlockSlot::Indirect { offset, .. } | BlockSlot::DoubleIndirect { direct_offset: offset, .. } => {
                if !self.ensure_window(new.is_some())? {
                    return Ok(());
                }
                let window = self.window.as_mut().expect("window ensured");
                if read_ptr(&window.data, offset) != value {
                    write_ptr(&mut window.data, offset, value);
                    window.dirty = true;
                }
            }
        }
        Ok(())
    }

    /// Move to the next file block, flushing the indirect window when the
    /// move crosses a window boundary.
    pub fn advance(&mut self) -> Result<()> {
        let old_key = window_key(map_file_block(FileBlock(self.file_block))?);
        let next = self.file_block + 1;
        if u64::from(next) >= MINFS_MAX_FILE_BLOCK {
            return Err(MinfsError::FileTooBig);
        }
        let new_key = window_key(map_file_block(FileBlock(next))?);
        if old_key != new_key {
            self.flush_window()?;
        }
        self.file_block = next;
        Ok(())
    }

    fn flush_cache(
        txn: &mut T,
        inode: &mut Inode,
        data_start: BlockNumber,
        dind: Option<&mut IndirectCache>,
        cache: IndirectCache,
    ) -> Result<()> {
        if !cache.dirty {
            return Ok(());
        }
        if all_zero(&cache.data) {
            // Empty leaves are dropped rather than persisted.
            trace!(
                target: "minfs::inode::tree",
                event = "drop_empty_indirect",
                block = cache.block.0
            );
            txn.deallocate_block(cache.block);
            match cache.owner {
                Owner::Inum(index) => inode.inum[index] = 0,
                Owner::Dinum(index) => inode.dinum[index] = 0,
                Owner::DindWord(word) => {
                    let dind = dind.expect("double-indirect child requires loaded parent");
                    write_ptr(&mut dind.data, word, 0);
                    dind.dirty = true;
                }
            }
            return Ok(());
        }
        txn.enqueue_metadata(cache.block.absolute(data_start), cache.data);
        Ok(())
    }

    fn flush_window(&mut self) -> Result<()> {
        if let Some(window) = self.window.take() {
            Self::flush_cache(
                self.txn,
                self.inode,
                self.data_start,
                self.dind.as_mut(),
                window,
            )?;
        }
        Ok(())
    }

    /// Write all dirty indirect blocks into the transaction's metadata
    /// list and drop any that became all-zero.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_window()?;
        if let Some(dind) = self.dind.take() {
            Self::flush_cache(self.txn, self.inode, self.data_start, None, dind)?;
        }
        Ok(())
    }
}
