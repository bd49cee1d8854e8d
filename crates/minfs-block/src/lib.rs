#![forbid(unsafe_code)]
//! Block I/O layer for MinFS.
//!
//! Provides the `ByteDevice` trait with file- and memory-backed
//! implementations, the `Bcache` typed block cache that translates
//! filesystem blocks to device offsets, and the `ResizeableBuffer` used
//! for batched I/O against contiguous block runs.

use minfs_error::{MinfsError, Result};
use minfs_types::{BlockNumber, MINFS_BLOCK_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, trace};

/// Device sector size. A filesystem block maps to a fixed run of
/// consecutive device blocks.
pub const DEVICE_BLOCK_SIZE: u32 = 512;
/// Device blocks per filesystem block.
pub const DEVICE_BLOCKS_PER_FS_BLOCK: u32 = MINFS_BLOCK_SIZE / DEVICE_BLOCK_SIZE;

// ── Byte devices ────────────────────────────────────────────────────────────

/// Byte-addressed device with pread/pwrite semantics.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed byte device.
///
/// `std::os::unix::fs::FileExt` positional I/O is thread-safe and does
/// not require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

const MEMORY_PAGE_SIZE: usize = MINFS_BLOCK_SIZE as usize;

/// Memory-backed byte device for formatting images and tests.
///
/// Pages are allocated on first write, so sliced-volume images whose
/// fixed region offsets sit far into the device stay cheap.
#[derive(Debug)]
pub struct MemoryByteDevice {
    pages: Mutex<HashMap<u64, Box<[u8; MEMORY_PAGE_SIZE]>>>,
    len: u64,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(len_bytes: u64) -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            len: len_bytes,
        }
    }

    /// Snapshot of the full device contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        let mut out = vec![0u8; usize::try_from(self.len).unwrap_or(0)];
        for (&page, data) in self.pages.lock().iter() {
            let start = page as usize * MEMORY_PAGE_SIZE;
            if start >= out.len() {
                continue;
            }
            let end = (start + MEMORY_PAGE_SIZE).min(out.len());
            out[start..end].copy_from_slice(&data[..end - start]);
        }
        out
    }

    /// Replace the full device contents (for crash-image tests).
    pub fn restore(&self, contents: &[u8]) {
        let mut pages = self.pages.lock();
        pages.clear();
        let limit = contents.len().min(usize::try_from(self.len).unwrap_or(0));
        let mut copied = 0usize;
        while copied < limit {
            let page = (copied / MEMORY_PAGE_SIZE) as u64;
            let page_off = copied % MEMORY_PAGE_SIZE;
            let span = (MEMORY_PAGE_SIZE - page_off).min(limit - copied);
            let data = pages
                .entry(page)
                .or_insert_with(|| Box::new([0u8; MEMORY_PAGE_SIZE]));
            data[page_off..page_off + span].copy_from_slice(&contents[copied..copied + span]);
            copied += span;
        }
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        let pages = self.pages.lock();
        let mut copied = 0usize;
        while copied < buf.len() {
            let pos = offset + copied as u64;
            let page = pos / MEMORY_PAGE_SIZE as u64;
            let page_off = (pos % MEMORY_PAGE_SIZE as u64) as usize;
            let span = (MEMORY_PAGE_SIZE - page_off).min(buf.len() - copied);
            match pages.get(&page) {
                Some(data) => {
                    buf[copied..copied + span].copy_from_slice(&data[page_off..page_off + span]);
                }
                None => buf[copied..copied + span].fill(0),
            }
            copied += span;
        }
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        let mut pages = self.pages.lock();
        let mut copied = 0usize;
        while copied < buf.len() {
            let pos = offset + copied as u64;
            let page = pos / MEMORY_PAGE_SIZE as u64;
            let page_off = (pos % MEMORY_PAGE_SIZE as u64) as usize;
            let span = (MEMORY_PAGE_SIZE - page_off).min(buf.len() - copied);
            let data = pages
                .entry(page)
                .or_insert_with(|| Box::new([0u8; MEMORY_PAGE_SIZE]));
            data[page_off..page_off + span].copy_from_slice(&buf[copied..copied + span]);
            copied += span;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let end = offset
        .checked_add(u64::try_from(len).map_err(|_| {
            MinfsError::InvalidArgs("transfer length overflows u64".to_owned())
        })?)
        .ok_or_else(|| MinfsError::InvalidArgs("transfer range overflows u64".to_owned()))?;
    if end > device_len {
        return Err(MinfsError::InvalidArgs(format!(
            "transfer out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

// ── Block buffer ────────────────────────────────────────────────────────────

/// Owned block buffer with cheap clones.
///
/// Invariant: length equals the filesystem block size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Arc<Vec<u8>>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    #[must_use]
    pub fn zeroed() -> Self {
        Self::new(vec![0u8; MINFS_BLOCK_SIZE as usize])
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn make_mut(&mut self) -> &mut Vec<u8> {
        Arc::make_mut(&mut self.bytes)
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        match Arc::try_unwrap(self.bytes) {
            Ok(bytes) => bytes,
            Err(shared) => shared.as_ref().clone(),
        }
    }
}

// ── Batched operations ──────────────────────────────────────────────────────

/// Kind of a batched block operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    Trim,
    Flush,
}

/// A batched operation against a [`ResizeableBuffer`].
///
/// `vmo_offset` indexes blocks within the buffer, `dev_offset` is the
/// target filesystem block, `length` counts blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub vmo_offset: u32,
    pub dev_offset: BlockNumber,
    pub length: u32,
}

// ── Resizeable buffer ───────────────────────────────────────────────────────

/// Contiguous block-granular memory buffer used for batched device I/O.
///
/// Invariant: `capacity()` equals the sum of grows minus shrinks since
/// creation.
#[derive(Debug)]
pub struct ResizeableBuffer {
    label: String,
    data: Vec<u8>,
    attached: bool,
}

impl Default for ResizeableBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResizeableBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            label: String::new(),
            data: Vec::new(),
            attached: false,
        }
    }

    /// Register the buffer with a device under `label` so batched
    /// operations can reference it.
    pub fn attach(&mut self, label: &str, _device: &dyn ByteDevice) -> Result<()> {
        if self.attached {
            return Err(MinfsError::BadState(format!(
                "buffer {:?} already attached",
                self.label
            )));
        }
        self.label = label.to_owned();
        self.attached = true;
        trace!(target: "minfs::block::buffer", event = "attach", label = %self.label);
        Ok(())
    }

    pub fn detach(&mut self, _device: &dyn ByteDevice) -> Result<()> {
        if !self.attached {
            return Err(MinfsError::BadState("buffer not attached".to_owned()));
        }
        trace!(target: "minfs::block::buffer", event = "detach", label = %self.label);
        self.attached = false;
        Ok(())
    }

    /// Capacity in blocks.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        u32::try_from(self.data.len() / MINFS_BLOCK_SIZE as usize).unwrap_or(u32::MAX)
    }

    /// Extend by `blocks`, preserving existing contents.
    pub fn grow(&mut self, blocks: u32) {
        let add = blocks as usize * MINFS_BLOCK_SIZE as usize;
        self.data.resize(self.data.len() + add, 0);
    }

    /// Truncate the last `blocks` blocks.
    pub fn shrink(&mut self, blocks: u32) -> Result<()> {
        if blocks > self.capacity() {
            return Err(MinfsError::InvalidArgs(format!(
                "shrink by {blocks} blocks exceeds capacity {}",
                self.capacity()
            )));
        }
        let cut = blocks as usize * MINFS_BLOCK_SIZE as usize;
        self.data.truncate(self.data.len() - cut);
        Ok(())
    }

    /// Ensure capacity is at least `blocks`.
    pub fn grow_to(&mut self, blocks: u32) {
        if blocks > self.capacity() {
            self.grow(blocks - self.capacity());
        }
    }

    /// Zero-fill `len` blocks starting at block `start`.
    pub fn zero(&mut self, start: u32, len: u32) -> Result<()> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| MinfsError::InvalidArgs("zero range overflows".to_owned()))?;
        if end > self.capacity() {
            return Err(MinfsError::InvalidArgs(format!(
                "zero range {start}+{len} exceeds capacity {}",
                self.capacity()
            )));
        }
        let from = start as usize * MINFS_BLOCK_SIZE as usize;
        let to = end as usize * MINFS_BLOCK_SIZE as usize;
        self.data[from..to].fill(0);
        Ok(())
    }

    /// Borrow one block's bytes.
    #[must_use]
    pub fn data(&self, block: u32) -> &[u8] {
        let start = block as usize * MINFS_BLOCK_SIZE as usize;
        &self.data[start..start + MINFS_BLOCK_SIZE as usize]
    }

    /// Mutably borrow one block's bytes.
    pub fn data_mut(&mut self, block: u32) -> &mut [u8] {
        let start = block as usize * MINFS_BLOCK_SIZE as usize;
        &mut self.data[start..start + MINFS_BLOCK_SIZE as usize]
    }
}

// ── Block cache ─────────────────────────────────────────────────────────────

/// Typed block cache over a byte device.
///
/// Owns the device handle for its lifetime and translates filesystem
/// block numbers to device offsets (a fixed ratio of
/// [`DEVICE_BLOCKS_PER_FS_BLOCK`] device blocks per filesystem block).
/// I/O is synchronous; device errors surface as `Io` and are never
/// retried here.
pub struct Bcache {
    device: Box<dyn ByteDevice>,
    max_blocks: u32,
}

impl Bcache {
    /// Create a cache over `device` addressing `max_blocks` filesystem
    /// blocks.
    pub fn create(device: Box<dyn ByteDevice>, max_blocks: u32) -> Result<Self> {
        let needed = u64::from(max_blocks) * u64::from(MINFS_BLOCK_SIZE);
        if needed > device.len_bytes() {
            return Err(MinfsError::InvalidArgs(format!(
                "device too small: {} blocks need {needed} bytes, have {}",
                max_blocks,
                device.len_bytes()
            )));
        }
        Ok(Self { device, max_blocks })
    }

    /// Number of addressable filesystem blocks.
    #[must_use]
    pub fn max_blocks(&self) -> u32 {
        self.max_blocks
    }

    /// Consume the cache, returning the device.
    #[must_use]
    pub fn into_device(self) -> Box<dyn ByteDevice> {
        self.device
    }

    #[must_use]
    pub fn device(&self) -> &dyn ByteDevice {
        self.device.as_ref()
    }

    fn check_block(&self, block: BlockNumber) -> Result<()> {
        if block.0 >= self.max_blocks {
            return Err(MinfsError::InvalidArgs(format!(
                "block {block} out of range ({} max)",
                self.max_blocks
            )));
        }
        Ok(())
    }

    /// Read one filesystem block.
    pub fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        self.check_block(block)?;
        let mut bytes = vec![0u8; MINFS_BLOCK_SIZE as usize];
        self.device
            .read_exact_at(block.byte_offset(), &mut bytes)
            .inspect_err(|err| {
                error!(target: "minfs::block::io", event = "read_failed", block = block.0, %err);
            })?;
        Ok(BlockBuf::new(bytes))
    }

    /// Write one filesystem block. `data.len()` must equal the block size.
    pub fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        self.check_block(block)?;
        if data.len() != MINFS_BLOCK_SIZE as usize {
            return Err(MinfsError::InvalidArgs(format!(
                "write length {} != block size {MINFS_BLOCK_SIZE}",
                data.len()
            )));
        }
        self.device
            .write_all_at(block.byte_offset(), data)
            .inspect_err(|err| {
                error!(target: "minfs::block::io", event = "write_failed", block = block.0, %err);
            })
    }

    /// Flush the device.
    pub fn sync(&self) -> Result<()> {
        self.device.sync()
    }

    /// Execute one batched operation against `buffer`.
    ///
    /// Reads and writes move whole blocks between the buffer and the
    /// device; `Trim` zeroes the device range; `Flush` ignores the range
    /// and syncs the device.
    pub fn run_operation(&self, op: Operation, buffer: &mut ResizeableBuffer) -> Result<()> {
        trace!(
            target: "minfs::block::io",
            event = "run_operation",
            kind = ?op.kind,
            vmo_offset = op.vmo_offset,
            dev_offset = op.dev_offset.0,
            length = op.length
        );
        match op.kind {
            OperationKind::Flush => return self.sync(),
            OperationKind::Read | OperationKind::Write | OperationKind::Trim => {}
        }
        for i in 0..op.length {
            let dev_block = BlockNumber(op.dev_offset.0 + i);
            self.check_block(dev_block)?;
            match op.kind {
                OperationKind::Read => {
                    let vmo_block = op.vmo_offset + i;
                    buffer.grow_to(vmo_block + 1);
                    self.device
                        .read_exact_at(dev_block.byte_offset(), buffer.data_mut(vmo_block))?;
                }
                OperationKind::Write => {
                    let vmo_block = op.vmo_offset + i;
                    self.device
                        .write_all_at(dev_block.byte_offset(), buffer.data(vmo_block))?;
                }
                OperationKind::Trim => {
                    let zeros = vec![0u8; MINFS_BLOCK_SIZE as usize];
                    self.device.write_all_at(dev_block.byte_offset(), &zeros)?;
                }
                OperationKind::Flush => unreachable!(),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Bcache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bcache")
            .field("max_blocks", &self.max_blocks)
            .finish_non_exhaustive()
    }
}
