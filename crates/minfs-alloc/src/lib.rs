#![forbid(unsafe_code)]
//! Bitmap-backed allocation for MinFS.
//!
//! One `Allocator` instance manages the inode bitmap, another the
//! data-block bitmap. Both keep the bitmap cached in memory with a
//! reservation layer on top: `reserve` promises units without flipping
//! bits, `allocate`/`swap` consume a reservation, and freed indices from
//! copy-on-write swaps are withheld until the owning transaction commits
//! so an in-flight transaction can never recycle a block that live
//! metadata still references.

use minfs_error::{MinfsError, Result};
use minfs_types::{BlockNumber, MINFS_BLOCK_BITS, MINFS_BLOCK_SIZE};
use std::collections::BTreeSet;
use tracing::trace;

// ── Raw bitmap operations ───────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Count allocated (one) bits in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_allocated(bitmap: &[u8], count: u32) -> u32 {
    let full_bytes = (count / 8) as usize;
    let remainder = count % 8;
    let mut ones = 0u32;

    for &byte in bitmap.iter().take(full_bytes) {
        ones += byte.count_ones();
    }
    if remainder > 0 && full_bytes < bitmap.len() {
        let byte = bitmap[full_bytes];
        for bit in 0..remainder {
            if (byte >> bit) & 1 == 1 {
                ones += 1;
            }
        }
    }
    ones
}

/// Find the first free (zero) bit in the first `count` bits of `bitmap`,
/// scanning forward from `start` and wrapping around.
#[must_use]
pub fn bitmap_find_free(bitmap: &[u8], count: u32, start: u32) -> Option<u32> {
    let start = if start >= count { 0 } else { start };
    for idx in start..count {
        if !bitmap_get(bitmap, idx) {
            return Some(idx);
        }
    }
    (0..start).find(|&idx| !bitmap_get(bitmap, idx))
}

// ── Reservation ─────────────────────────────────────────────────────────────

/// A promise by the allocator that `reserved()` units are available.
///
/// Held by a transaction until allocated or released. Bits flipped on
/// behalf of a reservation are tracked so the whole unit of work can be
/// committed (free the swapped-out indices) or cancelled (roll the
/// swapped-in indices back) atomically.
#[derive(Debug, Default)]
pub struct Reservation {
    reserved: u32,
    swapped_in: Vec<u32>,
    swapped_out: Vec<u32>,
}

impl Reservation {
    /// Units still reserved and not yet allocated.
    #[must_use]
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reserved == 0 && self.swapped_in.is_empty() && self.swapped_out.is_empty()
    }

    /// Merge another reservation into this one (used when a cached
    /// transaction's reservation is extended).
    pub fn merge(&mut self, other: Reservation) {
        self.reserved += other.reserved;
        self.swapped_in.extend(other.swapped_in);
        self.swapped_out.extend(other.swapped_out);
    }
}

// ── Allocator ───────────────────────────────────────────────────────────────

/// Bitmap allocator with an in-memory reservation layer.
///
/// Zero bits are free. The cached free count always equals the popcount
/// of zero bits minus outstanding reservations.
#[derive(Debug)]
pub struct Allocator {
    bitmap: Vec<u8>,
    capacity: u32,
    free_count: u32,
    hint: u32,
    /// Device block where this bitmap's on-disk copy starts.
    bitmap_start: BlockNumber,
    /// Bitmap blocks (relative to `bitmap_start`) touched since the last
    /// metadata staging.
    dirty_blocks: BTreeSet<u32>,
}

impl Allocator {
    /// Wrap an on-disk bitmap image loaded at mount.
    #[must_use]
    pub fn from_bitmap(bitmap: Vec<u8>, capacity: u32, bitmap_start: BlockNumber) -> Self {
        let allocated = bitmap_count_allocated(&bitmap, capacity);
        Self {
            bitmap,
            capacity,
            free_count: capacity - allocated,
            hint: 0,
            bitmap_start,
            dirty_blocks: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Free units net of outstanding reservations.
    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    /// Allocated units as the on-disk bitmap sees them.
    #[must_use]
    pub fn allocated_count(&self) -> u32 {
        bitmap_count_allocated(&self.bitmap, self.capacity)
    }

    #[must_use]
    pub fn is_allocated(&self, idx: u32) -> bool {
        bitmap_get(&self.bitmap, idx)
    }

    /// Reserve `n` units. Decrements the free count without flipping any
    /// bits; fails with `NoSpace` if fewer than `n` units are free.
    pub fn reserve(&mut self, n: u32) -> Result<Reservation> {
        if self.free_count < n {
            trace!(
                target: "minfs::alloc",
                event = "reserve_failed",
                requested = n,
                free = self.free_count
            );
            return Err(MinfsError::NoSpace);
        }
        self.free_count -= n;
        Ok(Reservation {
            reserved: n,
            swapped_in: Vec::new(),
            swapped_out: Vec::new(),
        })
    }

    /// Extend an existing reservation by `n` units.
    pub fn extend(&mut self, res: &mut Reservation, n: u32) -> Result<()> {
        let extra = self.reserve(n)?;
        res.merge(extra);
        Ok(())
    }

    /// Flip one bit to allocated, drawing from `res`.
    ///
    /// First-fit scan starting at the hint keeps allocation order
    /// deterministic. Panics if the reservation is exhausted; callers
    /// must have reserved enough up front.
    pub fn allocate(&mut self, res: &mut Reservation) -> u32 {
        assert!(res.reserved > 0, "allocation without reservation");
        let idx = bitmap_find_free(&self.bitmap, self.capacity, self.hint)
            .expect("reserved units must be findable");
        bitmap_set(&mut self.bitmap, idx);
        self.mark_dirty(idx);
        self.hint = idx + 1;
        res.reserved -= 1;
        res.swapped_in.push(idx);
        idx
    }

    /// Copy-on-write swap: allocate a fresh unit and schedule `old` to be
    /// freed when the reservation commits. `None` (a sparse hole) makes
    /// this a plain allocation.
    pub fn swap(&mut self, res: &mut Reservation, old: Option<u32>) -> u32 {
        let new = self.allocate(res);
        if let Some(old) = old {
            assert!(
                bitmap_get(&self.bitmap, old),
                "swap of unallocated index {old}"
            );
            res.swapped_out.push(old);
        }
        new
    }

    /// Flip one bit back to free immediately.
    ///
    /// Marks the covering bitmap block dirty so the calling transaction
    /// stages it as metadata.
    pub fn free(&mut self, idx: u32) {
        assert!(bitmap_get(&self.bitmap, idx), "double free of index {idx}");
        bitmap_clear(&mut self.bitmap, idx);
        self.mark_dirty(idx);
        self.free_count += 1;
    }

    /// Commit a reservation: free every swapped-out index and return any
    /// unallocated remainder to the free count.
    pub fn commit(&mut self, res: &mut Reservation) {
        for old in std::mem::take(&mut res.swapped_out) {
            self.free(old);
        }
        res.swapped_in.clear();
        self.free_count += res.reserved;
        res.reserved = 0;
    }

    /// Cancel a reservation: roll back every bit it flipped and return
    /// the remainder to the free count. Swapped-out indices stay
    /// allocated (the old blocks are still live on disk).
    pub fn cancel(&mut self, res: &mut Reservation) {
        for idx in std::mem::take(&mut res.swapped_in) {
            bitmap_clear(&mut self.bitmap, idx);
            self.mark_dirty(idx);
            self.free_count += 1;
        }
        res.swapped_out.clear();
        self.free_count += res.reserved;
        res.reserved = 0;
    }

    /// Extend capacity (sliced-volume growth). New bits are free.
    pub fn grow(&mut self, new_capacity: u32) {
        assert!(new_capacity >= self.capacity);
        let new_bytes = (new_capacity as usize).div_ceil(8);
        if new_bytes > self.bitmap.len() {
            self.bitmap.resize(new_bytes, 0);
        }
        self.free_count += new_capacity - self.capacity;
        self.capacity = new_capacity;
    }

    fn mark_dirty(&mut self, idx: u32) {
        self.dirty_blocks.insert(idx / MINFS_BLOCK_BITS);
    }

    /// Drain the set of dirty bitmap blocks as `(device block, bytes)`
    /// pairs ready to stage as metadata writes.
    pub fn take_dirty_blocks(&mut self) -> Vec<(BlockNumber, Vec<u8>)> {
        let dirty = std::mem::take(&mut self.dirty_blocks);
        dirty
            .into_iter()
            .map(|rel| {
                (
                    BlockNumber(self.bitmap_start.0 + rel),
                    self.bitmap_block_bytes(rel),
                )
            })
            .collect()
    }

    /// One block-sized window of the bitmap, zero-padded past the end.
    #[must_use]
    pub fn bitmap_block_bytes(&self, rel_block: u32) -> Vec<u8> {
        let mut out = vec![0u8; MINFS_BLOCK_SIZE as usize];
        let start = rel_block as usize * MINFS_BLOCK_SIZE as usize;
        if start < self.bitmap.len() {
            let end = (start + MINFS_BLOCK_SIZE as usize).min(self.bitmap.len());
            out[..end - start].copy_from_slice(&self.bitmap[start..end]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_allocator(capacity: u32) -> Allocator {
        let bytes = vec![0u8; (capacity as usize).div_ceil(8)];
        Allocator::from_bitmap(bytes, capacity, BlockNumber(10))
    }

    #[test]
    fn bitmap_get_set_clear() {
        let mut bm = vec![0u8; 4];
        assert!(!bitmap_get(&bm, 0));
        bitmap_set(&mut bm, 0);
        assert!(bitmap_get(&bm, 0));
        bitmap_clear(&mut bm, 0);
        assert!(!bitmap_get(&bm, 0));

        bitmap_set(&mut bm, 7);
        assert_eq!(bm[0], 0x80);
        bitmap_set(&mut bm, 8);
        assert_eq!(bm[1], 0x01);
    }

    #[test]
    fn count_allocated_partial_byte() {
        let mut bm = vec![0u8; 2];
        bitmap_set(&mut bm, 0);
        bitmap_set(&mut bm, 5);
        bitmap_set(&mut bm, 9);
        assert_eq!(bitmap_count_allocated(&bm, 16), 3);
        assert_eq!(bitmap_count_allocated(&bm, 8), 2);
        assert_eq!(bitmap_count_allocated(&bm, 6), 2);
        assert_eq!(bitmap_count_allocated(&bm, 5), 1);
    }

    #[test]
    fn find_free_wraps_around() {
        let mut bm = vec![0u8; 2];
        bitmap_set(&mut bm, 14);
        bitmap_set(&mut bm, 15);
        assert_eq!(bitmap_find_free(&bm, 16, 14), Some(0));
        bitmap_set(&mut bm, 0);
        assert_eq!(bitmap_find_free(&bm, 16, 14), Some(1));
    }

    #[test]
    fn reserve_fails_with_no_space() {
        let mut alloc = empty_allocator(4);
        let res = alloc.reserve(4).unwrap();
        assert_eq!(alloc.free_count(), 0);
        assert!(matches!(alloc.reserve(1), Err(MinfsError::NoSpace)));
        let mut res = res;
        alloc.cancel(&mut res);
        assert_eq!(alloc.free_count(), 4);
    }

    #[test]
    fn allocation_is_first_fit_from_hint() {
        let mut alloc = empty_allocator(8);
        let mut res = alloc.reserve(3).unwrap();
        assert_eq!(alloc.allocate(&mut res), 0);
        assert_eq!(alloc.allocate(&mut res), 1);
        assert_eq!(alloc.allocate(&mut res), 2);
        alloc.commit(&mut res);

        alloc.free(1);
        // Hint is past 1, so the next allocation continues forward.
        let mut res = alloc.reserve(1).unwrap();
        assert_eq!(alloc.allocate(&mut res), 3);
        alloc.commit(&mut res);
    }

    #[test]
    #[should_panic(expected = "allocation without reservation")]
    fn allocate_without_reservation_panics() {
        let mut alloc = empty_allocator(4);
        let mut res = Reservation::default();
        alloc.allocate(&mut res);
    }

    #[test]
    fn swap_defers_free_until_commit() {
        let mut alloc = empty_allocator(4);
        let mut res = alloc.reserve(1).unwrap();
        let a = alloc.allocate(&mut res);
        alloc.commit(&mut res);
        assert_eq!(alloc.free_count(), 3);

        let mut res = alloc.reserve(1).unwrap();
        let b = alloc.swap(&mut res, Some(a));
        assert_ne!(a, b);
        // Old block still allocated until commit.
        assert!(alloc.is_allocated(a));
        assert!(alloc.is_allocated(b));
        alloc.commit(&mut res);
        assert!(!alloc.is_allocated(a));
        assert!(alloc.is_allocated(b));
        assert_eq!(alloc.free_count(), 3);
    }

    #[test]
    fn swap_of_hole_is_plain_allocate() {
        let mut alloc = empty_allocator(4);
        let mut res = alloc.reserve(1).unwrap();
        let idx = alloc.swap(&mut res, None);
        alloc.commit(&mut res);
        assert!(alloc.is_allocated(idx));
        assert_eq!(alloc.allocated_count(), 1);
    }

    #[test]
    fn cancel_rolls_back_swapped_in_bits() {
        let mut alloc = empty_allocator(8);
        let mut keep = alloc.reserve(1).unwrap();
        let live = alloc.allocate(&mut keep);
        alloc.commit(&mut keep);

        let mut res = alloc.reserve(3).unwrap();
        let fresh = alloc.swap(&mut res, Some(live));
        alloc.cancel(&mut res);

        // The fresh block is rolled back, the live one survives.
        assert!(!alloc.is_allocated(fresh));
        assert!(alloc.is_allocated(live));
        assert_eq!(alloc.free_count(), 7);
        assert_eq!(alloc.allocated_count(), 1);
    }

    #[test]
    fn dirty_blocks_cover_flipped_bits() {
        let mut alloc = empty_allocator(MINFS_BLOCK_BITS * 2);
        let mut res = alloc.reserve(1).unwrap();
        alloc.allocate(&mut res);
        alloc.commit(&mut res);
        alloc.free(0);

        let mut res = alloc.reserve(1).unwrap();
        alloc.allocate(&mut res);
        alloc.commit(&mut res);

        // All flipped bits live in the first bitmap block.
        let dirty = alloc.take_dirty_blocks();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].0, BlockNumber(10));
        assert_eq!(dirty[0].1.len(), MINFS_BLOCK_SIZE as usize);
        assert!(alloc.take_dirty_blocks().is_empty());
    }

    #[test]
    fn free_count_matches_popcount_invariant() {
        let mut alloc = empty_allocator(64);
        let mut res = alloc.reserve(10).unwrap();
        for _ in 0..10 {
            alloc.allocate(&mut res);
        }
        alloc.commit(&mut res);
        alloc.free(3);
        alloc.free(7);
        assert_eq!(alloc.allocated_count(), 8);
        assert_eq!(alloc.free_count(), 64 - 8);
        assert_eq!(
            alloc.free_count(),
            alloc.capacity() - bitmap_count_allocated(&alloc.bitmap_block_bytes(0), 64),
        );
    }

    #[test]
    fn grow_adds_free_capacity() {
        let mut alloc = empty_allocator(8);
        let mut res = alloc.reserve(8).unwrap();
        for _ in 0..8 {
            alloc.allocate(&mut res);
        }
        alloc.commit(&mut res);
        assert!(matches!(alloc.reserve(1), Err(MinfsError::NoSpace)));

        alloc.grow(16);
        assert_eq!(alloc.capacity(), 16);
        assert_eq!(alloc.free_count(), 8);
        let mut res = alloc.reserve(1).unwrap();
        assert_eq!(alloc.allocate(&mut res), 8);
        alloc.commit(&mut res);
    }
}
