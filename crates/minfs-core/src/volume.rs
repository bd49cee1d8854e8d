//! Raw vs sliced volume backends.
//!
//! The core never branches on the backend: region starts and on-demand
//! growth go through `VolumeManager`.

use minfs_block::Bcache;
use minfs_error::{MinfsError, Result};
use minfs_types::{
    BlockNumber, Superblock, FVM_BLOCK_DATA_BM_START, FVM_BLOCK_DATA_START, FVM_BLOCK_INODE_BM_START,
    FVM_BLOCK_INODE_START, FVM_SUPERBLOCK_BACKUP, MINFS_BLOCK_SIZE,
};
use tracing::info;

/// On-disk region identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionId {
    InodeBitmap,
    BlockBitmap,
    InodeTable,
    Integrity,
    Data,
}

/// Backend abstraction over region placement and growth.
pub trait VolumeManager: Send + Sync {
    fn region_start(&self, region: RegionId) -> BlockNumber;

    /// Data blocks currently backed by the volume.
    fn data_block_capacity(&self) -> u32;

    /// Extend the data region by `n` slices, returning the new data
    /// block capacity. Raw devices cannot grow.
    fn grow_slices(&mut self, n: u32) -> Result<u32>;

    /// Blocks per slice (0 on a raw device).
    fn blocks_per_slice(&self) -> u32;
}

/// Fixed-geometry backend: region starts come from the superblock and
/// the data region never grows.
#[derive(Debug)]
pub struct RawVolume {
    ibm_block: u32,
    abm_block: u32,
    ino_block: u32,
    integrity_start_block: u32,
    dat_block: u32,
    block_count: u32,
}

impl RawVolume {
    #[must_use]
    pub fn new(info: &Superblock) -> Self {
        Self {
            ibm_block: info.ibm_block,
            abm_block: info.abm_block,
            ino_block: info.ino_block,
            integrity_start_block: info.integrity_start_block,
            dat_block: info.dat_block,
            block_count: info.block_count,
        }
    }
}

impl VolumeManager for RawVolume {
    fn region_start(&self, region: RegionId) -> BlockNumber {
        BlockNumber(match region {
            RegionId::InodeBitmap => self.ibm_block,
            RegionId::BlockBitmap => self.abm_block,
            RegionId::InodeTable => self.ino_block,
            RegionId::Integrity => self.integrity_start_block,
            RegionId::Data => self.dat_block,
        })
    }

    fn data_block_capacity(&self) -> u32 {
        self.block_count
    }

    fn grow_slices(&mut self, _n: u32) -> Result<u32> {
        Err(MinfsError::NoSpace)
    }

    fn blocks_per_slice(&self) -> u32 {
        0
    }
}

/// Sliced backend: regions live at fixed offsets and the data region can
/// grow a slice at a time up to the device's capacity.
#[derive(Debug)]
pub struct SlicedVolume {
    blocks_per_slice: u32,
    dat_slices: u32,
    max_dat_slices: u32,
}

impl SlicedVolume {
    pub fn new(info: &Superblock, bcache: &Bcache) -> Result<Self> {
        if info.slice_size == 0 || info.slice_size % MINFS_BLOCK_SIZE != 0 {
            return Err(MinfsError::BadState(format!(
                "slice size {} is not a multiple of the block size",
                info.slice_size
            )));
        }
        let blocks_per_slice = info.slice_size / MINFS_BLOCK_SIZE;
        let device_data_blocks = bcache.max_blocks().saturating_sub(FVM_BLOCK_DATA_START);
        Ok(Self {
            blocks_per_slice,
            dat_slices: info.dat_slices,
            max_dat_slices: device_data_blocks / blocks_per_slice,
        })
    }
}

impl VolumeManager for SlicedVolume {
    fn region_start(&self, region: RegionId) -> BlockNumber {
        BlockNumber(match region {
            RegionId::InodeBitmap => FVM_BLOCK_INODE_BM_START,
            RegionId::BlockBitmap => FVM_BLOCK_DATA_BM_START,
            RegionId::InodeTable => FVM_BLOCK_INODE_START,
            RegionId::Integrity => FVM_SUPERBLOCK_BACKUP,
            RegionId::Data => FVM_BLOCK_DATA_START,
        })
    }

    fn data_block_capacity(&self) -> u32 {
        self.dat_slices * self.blocks_per_slice
    }

    fn grow_slices(&mut self, n: u32) -> Result<u32> {
        if self.dat_slices + n > self.max_dat_slices {
            return Err(MinfsError::NoSpace);
        }
        self.dat_slices += n;
        info!(
            target: "minfs::volume",
            event = "grew_data_slices",
            added = n,
            total = self.dat_slices
        );
        Ok(self.data_block_capacity())
    }

    fn blocks_per_slice(&self) -> u32 {
        self.blocks_per_slice
    }
}

/// Pick the backend matching the superblock's flags.
pub fn volume_for(info: &Superblock, bcache: &Bcache) -> Result<Box<dyn VolumeManager>> {
    if info.uses_fvm() {
        Ok(Box::new(SlicedVolume::new(info, bcache)?))
    } else {
        Ok(Box::new(RawVolume::new(info)))
    }
}
