#![forbid(unsafe_code)]
//! Write-ahead journal for MinFS.
//!
//! The journal occupies a fixed ring of blocks. Block 0 of the ring is
//! the journal info block (magic, start sequence, start offset); entries
//! follow in the remaining blocks as header / payload... / commit
//! triples, wrapping modulo the entry area. Replay is a pure scan that
//! yields verified entries in sequence order; applying them and resetting
//! the info block is a separate step.

use minfs_block::Bcache;
use minfs_error::{MinfsError, Result};
use minfs_types::{read_le_u32, read_le_u64, write_le_u32, write_le_u64, BlockNumber,
    MINFS_BLOCK_SIZE};
use tracing::{debug, info, trace, warn};

pub const JOURNAL_INFO_MAGIC: u64 = 0x4d49_4e46_4a4e_4c30;
pub const JOURNAL_ENTRY_MAGIC: u64 = 0x4d49_4e46_4a48_4452;
pub const JOURNAL_COMMIT_MAGIC: u64 = 0x4d49_4e46_4a43_4d54;

/// Target flag bit: the payload block is revoked and must not be
/// rewritten during replay.
pub const TARGET_FLAG_REVOKED: u32 = 0x0000_0001;

const ENTRY_HEADER_FIXED: usize = 24;
const TARGET_RECORD_SIZE: usize = 8;

/// Maximum payload blocks a single entry header can describe.
pub const MAX_ENTRY_PAYLOAD_BLOCKS: u32 =
    ((MINFS_BLOCK_SIZE as usize - ENTRY_HEADER_FIXED) / TARGET_RECORD_SIZE) as u32;

// ── On-disk records ─────────────────────────────────────────────────────────

/// The journal info block: where replay starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JournalInfo {
    pub start_seq: u64,
    /// Entry-area offset (0-based, info block excluded) of the oldest
    /// live entry.
    pub start_offset: u64,
}

impl JournalInfo {
    #[must_use]
    pub fn to_block(&self) -> Vec<u8> {
        let mut out = vec![0u8; MINFS_BLOCK_SIZE as usize];
        write_le_u64(&mut out, 0, JOURNAL_INFO_MAGIC);
        write_le_u64(&mut out, 8, self.start_seq);
        write_le_u64(&mut out, 16, self.start_offset);
        let checksum = crc32c::crc32c(&out[..24]);
        write_le_u32(&mut out, 24, checksum);
        out
    }

    pub fn parse_from_block(bytes: &[u8]) -> Result<Self> {
        let magic = read_le_u64(bytes, 0).unwrap_or(0);
        if magic != JOURNAL_INFO_MAGIC {
            return Err(MinfsError::BadState(format!(
                "journal info magic mismatch: {magic:#x}"
            )));
        }
        let stored = read_le_u32(bytes, 24).unwrap_or(0);
        let computed = crc32c::crc32c(&bytes[..24]);
        if stored != computed {
            return Err(MinfsError::BadState(format!(
                "journal info checksum mismatch: stored {stored:#x}, computed {computed:#x}"
            )));
        }
        Ok(Self {
            start_seq: read_le_u64(bytes, 8).unwrap_or(0),
            start_offset: read_le_u64(bytes, 16).unwrap_or(0),
        })
    }
}

/// One staged metadata write destined for the journal.
#[derive(Debug, Clone)]
pub struct JournalOp {
    /// Final (home) location of the block.
    pub target: BlockNumber,
    /// Block-sized payload.
    pub data: Vec<u8>,
    /// Revoked ops are journaled for sequencing but skipped on replay.
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryHeader {
    seq: u64,
    targets: Vec<(u32, u32)>,
}

impl EntryHeader {
    fn to_block(&self) -> Vec<u8> {
        let mut out = vec![0u8; MINFS_BLOCK_SIZE as usize];
        write_le_u64(&mut out, 0, JOURNAL_ENTRY_MAGIC);
        write_le_u64(&mut out, 8, self.seq);
        write_le_u64(&mut out, 16, self.targets.len() as u64);
        for (i, (target, flags)) in self.targets.iter().enumerate() {
            write_le_u32(&mut out, ENTRY_HEADER_FIXED + i * TARGET_RECORD_SIZE, *target);
            write_le_u32(
                &mut out,
                ENTRY_HEADER_FIXED + i * TARGET_RECORD_SIZE + 4,
                *flags,
            );
        }
        out
    }

    fn parse_from_block(bytes: &[u8]) -> Option<Self> {
        if read_le_u64(bytes, 0)? != JOURNAL_ENTRY_MAGIC {
            return None;
        }
        let seq = read_le_u64(bytes, 8)?;
        let payload_blocks = read_le_u64(bytes, 16)?;
        if payload_blocks > u64::from(MAX_ENTRY_PAYLOAD_BLOCKS) {
            return None;
        }
        let count = usize::try_from(payload_blocks).ok()?;
        let mut targets = Vec::with_capacity(count);
        for i in 0..count {
            let target = read_le_u32(bytes, ENTRY_HEADER_FIXED + i * TARGET_RECORD_SIZE)?;
            let flags = read_le_u32(bytes, ENTRY_HEADER_FIXED + i * TARGET_RECORD_SIZE + 4)?;
            targets.push((target, flags));
        }
        Some(Self { seq, targets })
    }
}

fn commit_block(seq: u64, checksum: u32) -> Vec<u8> {
    let mut out = vec![0u8; MINFS_BLOCK_SIZE as usize];
    write_le_u64(&mut out, 0, JOURNAL_COMMIT_MAGIC);
    write_le_u64(&mut out, 8, seq);
    write_le_u32(&mut out, 16, checksum);
    out
}

fn parse_commit_block(bytes: &[u8]) -> Option<(u64, u32)> {
    if read_le_u64(bytes, 0)? != JOURNAL_COMMIT_MAGIC {
        return None;
    }
    Some((read_le_u64(bytes, 8)?, read_le_u32(bytes, 16)?))
}

/// Checksum sealed by the commit block: crc32c over the header block
/// bytes followed by every payload block.
fn entry_checksum(header_block: &[u8], payloads: &[&[u8]]) -> u32 {
    let mut checksum = crc32c::crc32c(header_block);
    for payload in payloads {
        checksum = crc32c::crc32c_append(checksum, payload);
    }
    checksum
}

// ── Writer ──────────────────────────────────────────────────────────────────

/// Ring-buffered journal writer.
///
/// Entry offsets are modulo the entry area (`ring_blocks - 1`; the info
/// block is not part of the ring proper). The info block's start marker
/// only advances in [`Journal::retire`], after the corresponding
/// metadata has reached its final locations.
#[derive(Debug)]
pub struct Journal {
    start_block: BlockNumber,
    ring_blocks: u32,
    next_seq: u64,
    /// Entry-area offset where the next entry will be written.
    head: u64,
    /// Blocks currently occupied by un-retired entries.
    live_blocks: u64,
    info: JournalInfo,
}

impl Journal {
    /// Initialize an empty journal ring (mkfs).
    pub fn format(bcache: &Bcache, start_block: BlockNumber, ring_blocks: u32) -> Result<()> {
        if ring_blocks < 4 {
            return Err(MinfsError::InvalidArgs(format!(
                "journal ring of {ring_blocks} blocks cannot hold an entry"
            )));
        }
        let info = JournalInfo::default();
        bcache.write_block(start_block, &info.to_block())
    }

    /// Open a journal whose ring has already been replayed.
    pub fn open(bcache: &Bcache, start_block: BlockNumber, ring_blocks: u32) -> Result<Self> {
        if ring_blocks < 4 {
            return Err(MinfsError::BadState(format!(
                "journal ring of {ring_blocks} blocks is too small"
            )));
        }
        let raw = bcache.read_block(start_block)?;
        let info = JournalInfo::parse_from_block(raw.as_slice())?;
        debug!(
            target: "minfs::journal",
            event = "open",
            start_seq = info.start_seq,
            start_offset = info.start_offset
        );
        Ok(Self {
            start_block,
            ring_blocks,
            next_seq: info.start_seq,
            head: info.start_offset,
            live_blocks: 0,
            info,
        })
    }

    /// Blocks available for entries.
    #[must_use]
    pub fn entry_area_blocks(&self) -> u64 {
        u64::from(self.ring_blocks - 1)
    }

    #[must_use]
    pub fn free_blocks(&self) -> u64 {
        self.entry_area_blocks() - self.live_blocks
    }

    /// Whether every journaled entry has been retired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_blocks == 0
    }

    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Ring blocks an entry with `op_count` payload blocks consumes.
    #[must_use]
    pub fn blocks_needed(op_count: usize) -> u64 {
        op_count as u64 + 2
    }

    fn abs(&self, entry_offset: u64) -> BlockNumber {
        let wrapped = entry_offset % self.entry_area_blocks();
        BlockNumber(self.start_block.0 + 1 + u32::try_from(wrapped).unwrap_or(0))
    }

    /// Journal one entry: header, payloads, commit, then a device flush.
    ///
    /// Returns the sequence number assigned to the entry. The entry is
    /// durable when this returns; it is discarded from the ring only by
    /// [`Journal::retire`].
    pub fn append_entry(&mut self, bcache: &Bcache, ops: &[JournalOp]) -> Result<u64> {
        if ops.is_empty() {
            return Err(MinfsError::InvalidArgs(
                "journal entry must carry at least one op".to_owned(),
            ));
        }
        if ops.len() > MAX_ENTRY_PAYLOAD_BLOCKS as usize {
            return Err(MinfsError::InvalidArgs(format!(
                "{} ops exceed the {MAX_ENTRY_PAYLOAD_BLOCKS}-block entry limit",
                ops.len()
            )));
        }
        let needed = Self::blocks_needed(ops.len());
        if needed > self.free_blocks() {
            warn!(
                target: "minfs::journal",
                event = "ring_full",
                needed,
                free = self.free_blocks()
            );
            return Err(MinfsError::NoSpace);
        }

        let seq = self.next_seq;
        let header = EntryHeader {
            seq,
            targets: ops
                .iter()
                .map(|op| {
                    (
                        op.target.0,
                        if op.revoked { TARGET_FLAG_REVOKED } else { 0 },
                    )
                })
                .collect(),
        };
        let header_block = header.to_block();
        let payload_refs: Vec<&[u8]> = ops.iter().map(|op| op.data.as_slice()).collect();
        let checksum = entry_checksum(&header_block, &payload_refs);

        bcache.write_block(self.abs(self.head), &header_block)?;
        for (i, op) in ops.iter().enumerate() {
            bcache.write_block(self.abs(self.head + 1 + i as u64), &op.data)?;
        }
        bcache.write_block(
            self.abs(self.head + 1 + ops.len() as u64),
            &commit_block(seq, checksum),
        )?;
        bcache.sync()?;

        trace!(
            target: "minfs::journal",
            event = "entry_committed",
            seq,
            payload_blocks = ops.len(),
            head = self.head
        );
        self.head = (self.head + needed) % self.entry_area_blocks();
        self.live_blocks += needed;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Discard every journaled entry after its metadata has been written
    /// back, persisting the advanced start marker.
    pub fn retire(&mut self, bcache: &Bcache) -> Result<()> {
        if self.live_blocks == 0 {
            return Ok(());
        }
        self.info = JournalInfo {
            start_seq: self.next_seq,
            start_offset: self.head,
        };
        self.live_blocks = 0;
        bcache.write_block(self.start_block, &self.info.to_block())?;
        bcache.sync()
    }

    /// Barrier: flush the device and retire the ring.
    pub fn sync(&mut self, bcache: &Bcache) -> Result<()> {
        bcache.sync()?;
        self.retire(bcache)
    }
}

// ── Replay ──────────────────────────────────────────────────────────────────

/// One verified journal entry, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedEntry {
    pub seq: u64,
    /// `(final location, payload)` writes, revoked targets excluded.
    pub writes: Vec<(BlockNumber, Vec<u8>)>,
    pub revoked_targets: u64,
}

/// Counters from a journal scan or replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayStats {
    pub entries_verified: u64,
    pub blocks_replayed: u64,
    pub revoked_skipped: u64,
    /// Scan stopped on a header that did not verify (normal at the tail).
    pub stopped_on_bad_header: bool,
    /// Scan stopped on a commit mismatch (torn entry).
    pub stopped_on_bad_commit: bool,
}

/// Result of scanning the ring without mutating anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub info: JournalInfo,
    pub entries: Vec<ReplayedEntry>,
    pub stats: ReplayStats,
}

/// Scan the journal ring, returning verified entries in sequence order.
///
/// Purely functional over the device reader: verification stops at the
/// first entry whose header or commit fails to match the expected
/// sequence, or whose payload checksum does not verify.
pub fn scan_journal(
    bcache: &Bcache,
    start_block: BlockNumber,
    ring_blocks: u32,
) -> Result<ScanOutcome> {
    if ring_blocks < 4 {
        return Err(MinfsError::BadState(format!(
            "journal ring of {ring_blocks} blocks is too small"
        )));
    }
    let raw = bcache.read_block(start_block)?;
    let info = JournalInfo::parse_from_block(raw.as_slice())?;

    let entry_area = u64::from(ring_blocks - 1);
    let abs = |offset: u64| BlockNumber(start_block.0 + 1 + u32::try_from(offset % entry_area).unwrap_or(0));

    let mut entries = Vec::new();
    let mut stats = ReplayStats::default();
    let mut offset = info.start_offset % entry_area;
    let mut expected_seq = info.start_seq;
    let mut scanned = 0u64;

    loop {
        if scanned >= entry_area {
            break;
        }
        let header_raw = bcache.read_block(abs(offset))?;
        let Some(header) = EntryHeader::parse_from_block(header_raw.as_slice()) else {
            stats.stopped_on_bad_header = true;
            break;
        };
        if header.seq != expected_seq {
            stats.stopped_on_bad_header = true;
            break;
        }
        let payload_blocks = header.targets.len() as u64;
        if payload_blocks + 2 > entry_area - scanned {
            stats.stopped_on_bad_header = true;
            break;
        }

        let mut payloads = Vec::with_capacity(header.targets.len());
        for i in 0..payload_blocks {
            payloads.push(bcache.read_block(abs(offset + 1 + i))?.into_inner());
        }
        let commit_raw = bcache.read_block(abs(offset + 1 + payload_blocks))?;
        let Some((commit_seq, stored_checksum)) = parse_commit_block(commit_raw.as_slice()) else {
            stats.stopped_on_bad_commit = true;
            break;
        };
        let payload_refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        let computed = entry_checksum(header_raw.as_slice(), &payload_refs);
        if commit_seq != header.seq || stored_checksum != computed {
            stats.stopped_on_bad_commit = true;
            break;
        }

        let mut writes = Vec::with_capacity(payloads.len());
        let mut revoked = 0u64;
        for ((target, flags), payload) in header.targets.iter().zip(payloads) {
            if flags & TARGET_FLAG_REVOKED != 0 {
                revoked += 1;
                stats.revoked_skipped += 1;
                continue;
            }
            writes.push((BlockNumber(*target), payload));
        }
        stats.entries_verified += 1;
        stats.blocks_replayed += writes.len() as u64;
        entries.push(ReplayedEntry {
            seq: header.seq,
            writes,
            revoked_targets: revoked,
        });

        scanned += payload_blocks + 2;
        offset = (offset + payload_blocks + 2) % entry_area;
        expected_seq += 1;
    }

    Ok(ScanOutcome {
        info,
        entries,
        stats,
    })
}

/// Replay the journal: rewrite every verified entry's payload to its
/// final location, then reset the info block past the replayed entries.
pub fn replay_journal(
    bcache: &Bcache,
    start_block: BlockNumber,
    ring_blocks: u32,
) -> Result<ReplayStats> {
    let outcome = scan_journal(bcache, start_block, ring_blocks)?;
    let entry_area = u64::from(ring_blocks - 1);

    let mut next_offset = outcome.info.start_offset % entry_area;
    let mut next_seq = outcome.info.start_seq;
    for entry in &outcome.entries {
        for (target, payload) in &entry.writes {
            bcache.write_block(*target, payload)?;
        }
        next_offset =
            (next_offset + entry.writes.len() as u64 + entry.revoked_targets + 2) % entry_area;
        next_seq = entry.seq + 1;
    }

    if !outcome.entries.is_empty() {
        info!(
            target: "minfs::journal",
            event = "replayed",
            entries = outcome.stats.entries_verified,
            blocks = outcome.stats.blocks_replayed
        );
        let fresh = JournalInfo {
            start_seq: next_seq,
            start_offset: next_offset,
        };
        bcache.write_block(start_block, &fresh.to_block())?;
    }
    bcache.sync()?;
    Ok(outcome.stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minfs_block::MemoryByteDevice;

    const BS: usize = MINFS_BLOCK_SIZE as usize;
    const RING_START: BlockNumber = BlockNumber(2);
    const RING_BLOCKS: u32 = 10;

    fn test_bcache(blocks: u32) -> Bcache {
        let device = MemoryByteDevice::new(u64::from(blocks) * BS as u64);
        Bcache::create(Box::new(device), blocks).unwrap()
    }

    fn fresh_journal(bcache: &Bcache) -> Journal {
        Journal::format(bcache, RING_START, RING_BLOCKS).unwrap();
        Journal::open(bcache, RING_START, RING_BLOCKS).unwrap()
    }

    fn op(target: u32, fill: u8) -> JournalOp {
        JournalOp {
            target: BlockNumber(target),
            data: vec![fill; BS],
            revoked: false,
        }
    }

    #[test]
    fn info_block_roundtrip() {
        let info = JournalInfo {
            start_seq: 42,
            start_offset: 7,
        };
        let parsed = JournalInfo::parse_from_block(&info.to_block()).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn info_block_rejects_corruption() {
        let mut block = JournalInfo::default().to_block();
        block[8] ^= 0xFF;
        assert!(JournalInfo::parse_from_block(&block).is_err());
    }

    #[test]
    fn append_then_scan_roundtrip() {
        let bcache = test_bcache(32);
        let mut journal = fresh_journal(&bcache);

        let seq = journal
            .append_entry(&bcache, &[op(20, 0xAA), op(21, 0xBB)])
            .unwrap();
        assert_eq!(seq, 0);
        assert!(!journal.is_empty());

        let outcome = scan_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].seq, 0);
        assert_eq!(outcome.entries[0].writes.len(), 2);
        assert_eq!(outcome.entries[0].writes[0].0, BlockNumber(20));
        assert!(outcome.entries[0].writes[0].1.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn replay_applies_writes_and_resets_info() {
        let bcache = test_bcache(32);
        let mut journal = fresh_journal(&bcache);
        journal.append_entry(&bcache, &[op(20, 0x5A)]).unwrap();

        let stats = replay_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert_eq!(stats.entries_verified, 1);
        assert_eq!(stats.blocks_replayed, 1);
        assert!(bcache
            .read_block(BlockNumber(20))
            .unwrap()
            .as_slice()
            .iter()
            .all(|&b| b == 0x5A));

        // The info block now points past the entry; a second replay is a
        // no-op.
        let stats = replay_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert_eq!(stats.entries_verified, 0);
    }

    #[test]
    fn torn_entry_is_not_replayed() {
        let bcache = test_bcache(32);
        let journal = fresh_journal(&bcache);

        // Hand-write a header + payload without the commit block,
        // simulating a crash mid-entry.
        let header = EntryHeader {
            seq: journal.next_seq(),
            targets: vec![(20, 0)],
        };
        bcache
            .write_block(BlockNumber(RING_START.0 + 1), &header.to_block())
            .unwrap();
        bcache
            .write_block(BlockNumber(RING_START.0 + 2), &vec![0xEE; BS])
            .unwrap();

        let outcome = scan_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert!(outcome.entries.is_empty());
        assert!(outcome.stats.stopped_on_bad_commit);
        assert!(bcache
            .read_block(BlockNumber(20))
            .unwrap()
            .as_slice()
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn corrupt_payload_fails_commit_checksum() {
        let bcache = test_bcache(32);
        let mut journal = fresh_journal(&bcache);
        journal.append_entry(&bcache, &[op(20, 0x77)]).unwrap();

        // Flip one payload byte after commit.
        let payload_block = BlockNumber(RING_START.0 + 2);
        let mut bytes = bcache.read_block(payload_block).unwrap().into_inner();
        bytes[100] ^= 0x01;
        bcache.write_block(payload_block, &bytes).unwrap();

        let outcome = scan_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert!(outcome.entries.is_empty());
        assert!(outcome.stats.stopped_on_bad_commit);
    }

    #[test]
    fn sequence_gap_stops_scan() {
        let bcache = test_bcache(32);
        let mut journal = fresh_journal(&bcache);
        journal.append_entry(&bcache, &[op(20, 0x01)]).unwrap();
        journal.append_entry(&bcache, &[op(21, 0x02)]).unwrap();

        // Corrupt the second entry's header sequence.
        let second_header = BlockNumber(RING_START.0 + 1 + 3);
        let mut bytes = bcache.read_block(second_header).unwrap().into_inner();
        write_le_u64(&mut bytes, 8, 99);
        bcache.write_block(second_header, &bytes).unwrap();

        let outcome = scan_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.stats.stopped_on_bad_header);
    }

    #[test]
    fn revoked_target_is_skipped() {
        let bcache = test_bcache(32);
        let mut journal = fresh_journal(&bcache);
        let mut revoked = op(20, 0xDD);
        revoked.revoked = true;
        journal
            .append_entry(&bcache, &[revoked, op(21, 0xCC)])
            .unwrap();

        let stats = replay_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert_eq!(stats.revoked_skipped, 1);
        assert_eq!(stats.blocks_replayed, 1);
        assert!(bcache
            .read_block(BlockNumber(20))
            .unwrap()
            .as_slice()
            .iter()
            .all(|&b| b == 0));
        assert!(bcache
            .read_block(BlockNumber(21))
            .unwrap()
            .as_slice()
            .iter()
            .all(|&b| b == 0xCC));
    }

    #[test]
    fn retire_frees_the_ring() {
        let bcache = test_bcache(32);
        let mut journal = fresh_journal(&bcache);
        journal.append_entry(&bcache, &[op(20, 1)]).unwrap();
        assert_eq!(journal.free_blocks(), u64::from(RING_BLOCKS - 1) - 3);

        journal.retire(&bcache).unwrap();
        assert!(journal.is_empty());
        assert_eq!(journal.free_blocks(), u64::from(RING_BLOCKS - 1));

        // A reopened journal resumes from the retired position.
        let reopened = Journal::open(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert_eq!(reopened.next_seq(), 1);
        let outcome = scan_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert!(outcome.entries.is_empty());
    }

    #[test]
    fn entries_wrap_around_the_ring() {
        let bcache = test_bcache(32);
        let mut journal = fresh_journal(&bcache);

        // Entry area is 9 blocks; each 1-op entry takes 3. Fill, retire,
        // and keep going so the ring wraps.
        for round in 0..4u8 {
            journal.append_entry(&bcache, &[op(20, round)]).unwrap();
            journal.retire(&bcache).unwrap();
        }
        journal.append_entry(&bcache, &[op(25, 0x99)]).unwrap();

        let outcome = scan_journal(&bcache, RING_START, RING_BLOCKS).unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].seq, 4);
        assert_eq!(outcome.entries[0].writes[0].0, BlockNumber(25));
    }

    #[test]
    fn ring_full_fails_with_no_space() {
        let bcache = test_bcache(32);
        let mut journal = fresh_journal(&bcache);
        journal
            .append_entry(&bcache, &[op(20, 1), op(21, 2), op(22, 3)])
            .unwrap();
        // 5 of 9 entry blocks used; a 3-op entry needs 5 more, leaving
        // nothing for a further 1-op entry.
        journal
            .append_entry(&bcache, &[op(23, 4)])
            .unwrap();
        assert!(matches!(
            journal.append_entry(&bcache, &[op(24, 5)]),
            Err(MinfsError::NoSpace)
        ));
    }
}
