//! Crash-consistency: replay after torn writes, and journal failures.
//!
//! A recording device captures every write the mounted filesystem
//! issues; replaying write prefixes onto a baseline image simulates a
//! crash at each point and every resulting image must mount into a
//! consistent filesystem.

use minfs_block::{Bcache, ByteDevice, MemoryByteDevice};
use minfs_core::{mkfs, mount, FormatOptions, MountOptions};
use minfs_error::MinfsError;
use minfs_types::{
    read_le_u32, Inode, Superblock, MINFS_BLOCK_BITS, MINFS_BLOCK_SIZE, MINFS_INODES_PER_BLOCK,
    MINFS_INODE_SIZE, SUPERBLOCK_START,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

const BS: usize = MINFS_BLOCK_SIZE as usize;
const DEVICE_BLOCKS: u32 = 512;

fn format_options() -> FormatOptions {
    FormatOptions {
        inode_count: 512,
        ..FormatOptions::default()
    }
}

// ── Recording device ────────────────────────────────────────────────────

struct RecorderState {
    bytes: Mutex<Vec<u8>>,
    log: Mutex<Vec<(u64, Vec<u8>)>>,
}

/// Byte device that applies writes and records them in order.
#[derive(Clone)]
struct RecordingDevice {
    state: Arc<RecorderState>,
    len: u64,
}

impl RecordingDevice {
    fn new(blocks: u32) -> Self {
        let len = u64::from(blocks) * BS as u64;
        Self {
            state: Arc::new(RecorderState {
                bytes: Mutex::new(vec![0u8; len as usize]),
                log: Mutex::new(Vec::new()),
            }),
            len,
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        self.state.bytes.lock().clone()
    }

    fn clear_log(&self) {
        self.state.log.lock().clear();
    }

    fn log(&self) -> Vec<(u64, Vec<u8>)> {
        self.state.log.lock().clone()
    }
}

impl ByteDevice for RecordingDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> minfs_error::Result<()> {
        let bytes = self.state.bytes.lock();
        let start = offset as usize;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> minfs_error::Result<()> {
        let mut bytes = self.state.bytes.lock();
        let start = offset as usize;
        bytes[start..start + buf.len()].copy_from_slice(buf);
        self.state.log.lock().push((offset, buf.to_vec()));
        Ok(())
    }

    fn sync(&self) -> minfs_error::Result<()> {
        Ok(())
    }
}

/// Rebuild the device image as of write `prefix_len`.
fn image_at(baseline: &[u8], log: &[(u64, Vec<u8>)], prefix_len: usize) -> Vec<u8> {
    let mut image = baseline.to_vec();
    for (offset, bytes) in &log[..prefix_len] {
        let start = *offset as usize;
        image[start..start + bytes.len()].copy_from_slice(bytes);
    }
    image
}

fn bcache_for_image(image: &[u8]) -> Bcache {
    let device = MemoryByteDevice::new(image.len() as u64);
    device.restore(image);
    Bcache::create(Box::new(device), (image.len() / BS) as u32).unwrap()
}

// ── Image-level consistency checks ──────────────────────────────────────

fn image_block(image: &[u8], n: u32) -> &[u8] {
    &image[n as usize * BS..(n as usize + 1) * BS]
}

fn bit_set(bitmap: &[u8], idx: u32) -> bool {
    bitmap[(idx / 8) as usize] >> (idx % 8) & 1 == 1
}

/// Walk one inode's pointer tree, claiming every referenced block in
/// `claimed` and returning the number of non-zero leaf pointers.
fn walk_inode(
    image: &[u8],
    info: &Superblock,
    inode: &Inode,
    claimed: &mut HashSet<u32>,
) -> u32 {
    let mut claim = |block: u32| {
        assert!(block != 0, "null block referenced");
        assert!(block < info.block_count, "block {block} out of range");
        assert!(
            bit_set(image_block(image, info.abm_block), block),
            "block {block} referenced but free in the bitmap"
        );
        assert!(claimed.insert(block), "block {block} referenced twice");
    };

    let mut leaves = 0u32;
    for &ptr in &inode.dnum {
        if ptr != 0 {
            claim(ptr);
            leaves += 1;
        }
    }
    let count_window = |window: u32, claim: &mut dyn FnMut(u32)| -> u32 {
        let data = image_block(image, info.dat_block + window);
        let mut leaves = 0u32;
        for word in 0..(BS / 4) as u32 {
            let ptr = read_le_u32(data, word as usize * 4).unwrap();
            if ptr != 0 {
                claim(ptr);
                leaves += 1;
            }
        }
        leaves
    };
    for &ptr in &inode.inum {
        if ptr != 0 {
            claim(ptr);
            leaves += count_window(ptr, &mut claim);
        }
    }
    for &ptr in &inode.dinum {
        if ptr != 0 {
            claim(ptr);
            let dind = image_block(image, info.dat_block + ptr);
            for word in 0..(BS / 4) as u32 {
                let child = read_le_u32(dind, word as usize * 4).unwrap();
                if child != 0 {
                    claim(child);
                    leaves += count_window(child, &mut claim);
                }
            }
        }
    }
    leaves
}

/// Assert the §8 invariants over a raw image: per-inode block counts,
/// no block aliasing, and bitmap popcounts matching the superblock.
fn check_image_invariants(image: &[u8]) {
    let info = Superblock::parse_from_bytes(image_block(image, SUPERBLOCK_START)).unwrap();
    info.validate_checksum().unwrap();

    let popcount_region = |start: u32, blocks: u32| -> u32 {
        (0..blocks)
            .map(|rel| {
                minfs_alloc::bitmap_count_allocated(
                    image_block(image, start + rel),
                    MINFS_BLOCK_BITS,
                )
            })
            .sum()
    };
    assert_eq!(
        popcount_region(info.ibm_block, info.inode_bitmap_blocks()),
        info.alloc_inode_count,
        "inode bitmap popcount mismatch"
    );
    assert_eq!(
        popcount_region(info.abm_block, info.block_bitmap_blocks()),
        info.alloc_block_count,
        "block bitmap popcount mismatch"
    );

    let mut claimed = HashSet::new();
    for ino in 0..info.inode_count {
        let table_block = image_block(image, info.ino_block + ino / MINFS_INODES_PER_BLOCK);
        let offset = (ino % MINFS_INODES_PER_BLOCK) as usize * MINFS_INODE_SIZE as usize;
        let inode =
            Inode::parse_from_bytes(&table_block[offset..offset + MINFS_INODE_SIZE as usize])
                .unwrap();
        if !inode.is_allocated() {
            continue;
        }
        assert!(
            bit_set(image_block(image, info.ibm_block), ino),
            "inode {ino} allocated but free in the bitmap"
        );
        let leaves = walk_inode(image, &info, &inode, &mut claimed);
        assert_eq!(
            leaves, inode.block_count,
            "inode {ino} block_count does not match its pointer tree"
        );
    }
}

// ── Scenario setup ──────────────────────────────────────────────────────

/// Format, write `old` into a fresh file, unmount cleanly, and mount
/// again. Returns the live filesystem, its device, and the file's inode.
/// The recorder's log is empty and a `device.snapshot()` taken now is a
/// quiescent baseline to splice crash prefixes onto.
fn seeded_fs(old: &[u8]) -> (minfs_core::Minfs, RecordingDevice, u32) {
    let device = RecordingDevice::new(DEVICE_BLOCKS);
    let bcache = Bcache::create(Box::new(device.clone()), DEVICE_BLOCKS).unwrap();
    mkfs(&format_options(), &bcache).unwrap();
    let fs = mount(bcache, MountOptions::default()).unwrap();
    let vn = fs.create_file().unwrap();
    vn.write(&fs, old, 0).unwrap();
    let ino = vn.ino().0;
    drop(vn);

    let bcache = fs.unmount().unwrap();
    let fs = mount(bcache, MountOptions::default()).unwrap();
    device.clear_log();
    (fs, device, ino)
}

fn read_file(fs: &minfs_core::Minfs, ino: u32, len: usize) -> Vec<u8> {
    let vn = fs.vnode_get(minfs_types::InodeNumber(ino)).unwrap();
    let mut buf = vec![0u8; len];
    let n = vn.read(fs, &mut buf, 0).unwrap();
    buf.truncate(n);
    buf
}

/// Index one past the journal commit block in the recorded write log:
/// the journal entry is the leading run of journal-region writes.
fn journal_entry_end(log: &[(u64, Vec<u8>)], info: &Superblock) -> usize {
    let journal_lo = u64::from(info.journal_start_block().0) * BS as u64;
    let journal_hi = u64::from(info.dat_block) * BS as u64;
    log.iter()
        .take_while(|(offset, _)| *offset >= journal_lo && *offset < journal_hi)
        .count()
}

// ── Tests ───────────────────────────────────────────────────────────────

#[test]
fn crash_before_commit_undoes_the_write() {
    let old = vec![0x11u8; 2 * BS];
    let (fs, device, ino) = seeded_fs(&old);
    let baseline = device.snapshot();

    // Overwrite with new content; the transaction commits synchronously.
    let vn = fs.vnode_get(minfs_types::InodeNumber(ino)).unwrap();
    vn.write(&fs, &vec![0x22u8; 4 * BS], 0).unwrap();
    let log = device.log();
    let info = fs.info();
    drop(vn);
    drop(fs);

    // Truncate device writes to everything before the commit block.
    let entry_end = journal_entry_end(&log, &info);
    assert!(entry_end >= 3, "expected header + payloads + commit");
    let torn = image_at(&baseline, &log, entry_end - 1);

    let fs = mount(bcache_for_image(&torn), MountOptions::default()).unwrap();
    // The write never happened.
    assert_eq!(read_file(&fs, ino, 4 * BS), old);
    drop(fs);
}

#[test]
fn every_write_prefix_mounts_consistently() {
    let old = vec![0x33u8; 2 * BS];
    let (fs, device, ino) = seeded_fs(&old);
    let baseline = device.snapshot();

    let vn = fs.vnode_get(minfs_types::InodeNumber(ino)).unwrap();
    let new = vec![0x44u8; 4 * BS];
    vn.write(&fs, &new, 0).unwrap();
    let log = device.log();
    let info = fs.info();
    drop(vn);
    drop(fs);

    let entry_end = journal_entry_end(&log, &info);
    for prefix in 0..=log.len() {
        let image = image_at(&baseline, &log, prefix);
        let fs = mount(bcache_for_image(&image), MountOptions::default()).unwrap();

        let content = read_file(&fs, ino, new.len());
        if prefix < entry_end {
            // Journal entry incomplete: the write must vanish entirely.
            assert_eq!(content, old, "prefix {prefix}: expected pre-crash contents");
        } else {
            // Metadata committed atomically; the new size is visible.
            assert_eq!(content.len(), new.len(), "prefix {prefix}: size must be new");
        }
        let bcache = fs.unmount().unwrap();
        let device = bcache.into_device();
        let mut settled = vec![0u8; image.len()];
        device.read_exact_at(0, &mut settled).unwrap();
        check_image_invariants(&settled);
    }
}

#[test]
fn full_log_replay_yields_the_new_contents() {
    let old = vec![0x55u8; BS];
    let (fs, device, ino) = seeded_fs(&old);
    let baseline = device.snapshot();

    let vn = fs.vnode_get(minfs_types::InodeNumber(ino)).unwrap();
    let new = vec![0x66u8; 3 * BS];
    vn.write(&fs, &new, 0).unwrap();
    let log = device.log();
    drop(vn);
    drop(fs);

    let image = image_at(&baseline, &log, log.len());
    let fs = mount(bcache_for_image(&image), MountOptions::default()).unwrap();
    assert_eq!(read_file(&fs, ino, new.len()), new);
    drop(fs);
}

#[test]
fn replay_is_idempotent_across_mounts() {
    let old = vec![0x77u8; 2 * BS];
    let (fs, device, ino) = seeded_fs(&old);
    let baseline = device.snapshot();

    let vn = fs.vnode_get(minfs_types::InodeNumber(ino)).unwrap();
    vn.write(&fs, &vec![0x88u8; 2 * BS], 0).unwrap();
    let log = device.log();
    let info = fs.info();
    drop(vn);
    drop(fs);

    // Crash right after the journal entry: replay must run on the next
    // two mounts with identical results.
    let entry_end = journal_entry_end(&log, &info);
    let image = image_at(&baseline, &log, entry_end);
    let fs = mount(bcache_for_image(&image), MountOptions::default()).unwrap();
    let first = read_file(&fs, ino, 2 * BS);
    let bcache = fs.unmount().unwrap();

    let fs = mount(bcache, MountOptions::default()).unwrap();
    assert_eq!(read_file(&fs, ino, 2 * BS), first);
    drop(fs);
}

// ── Journal failure poisons the mount ───────────────────────────────────

/// Device that starts failing writes after a fuse burns out.
#[derive(Clone)]
struct FusedDevice {
    state: Arc<RecorderState>,
    remaining_writes: Arc<Mutex<u32>>,
    len: u64,
}

impl FusedDevice {
    fn new(blocks: u32, fuse: u32) -> Self {
        let len = u64::from(blocks) * BS as u64;
        Self {
            state: Arc::new(RecorderState {
                bytes: Mutex::new(vec![0u8; len as usize]),
                log: Mutex::new(Vec::new()),
            }),
            remaining_writes: Arc::new(Mutex::new(fuse)),
            len,
        }
    }
}

impl ByteDevice for FusedDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> minfs_error::Result<()> {
        let bytes = self.state.bytes.lock();
        let start = offset as usize;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> minfs_error::Result<()> {
        {
            let mut remaining = self.remaining_writes.lock();
            if *remaining == 0 {
                return Err(MinfsError::Io(std::io::Error::other("device write failed")));
            }
            *remaining -= 1;
        }
        let mut bytes = self.state.bytes.lock();
        let start = offset as usize;
        bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> minfs_error::Result<()> {
        Ok(())
    }
}

#[test]
fn journal_write_failure_turns_the_mount_read_only() {
    let device = FusedDevice::new(DEVICE_BLOCKS, u32::MAX);
    let bcache = Bcache::create(Box::new(device.clone()), DEVICE_BLOCKS).unwrap();
    mkfs(&format_options(), &bcache).unwrap();
    let fs = mount(bcache, MountOptions::default()).unwrap();
    let vn = fs.create_file().unwrap();
    vn.write(&fs, &vec![0x99u8; BS], 0).unwrap();

    // Burn the fuse: the next journal write fails mid-commit.
    *device.remaining_writes.lock() = 0;
    assert!(matches!(
        vn.write(&fs, &vec![0xAAu8; BS], BS as u64),
        Err(MinfsError::Io(_))
    ));
    assert!(fs.is_readonly());

    // Subsequent mutations are refused outright.
    *device.remaining_writes.lock() = u32::MAX;
    assert!(matches!(
        vn.write(&fs, &vec![0xBBu8; BS], 2 * BS as u64),
        Err(MinfsError::ReadOnly)
    ));
    assert!(matches!(fs.create_file(), Err(MinfsError::ReadOnly)));
}
