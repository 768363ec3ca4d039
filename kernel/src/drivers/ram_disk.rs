use crate::block::block_core::{BlockOp, BlockSector, BLOCK_SECTOR_SIZE};
use crate::block::block_error::BlockError;
use alloc::{vec, vec::Vec};
use core::ops::Range;

/// A block device backed by kernel memory. Serves as the swap device when no
/// disk is attached.
pub struct RamDisk {
    data: Vec<u8>,
}

impl RamDisk {
    pub fn new(sectors: BlockSector) -> Self {
        Self {
            data: vec![0; sectors as usize * BLOCK_SECTOR_SIZE],
        }
    }

    fn sector_range(&self, sector: BlockSector, len: usize) -> Result<Range<usize>, BlockError> {
        if len != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        let start = sector as usize * BLOCK_SECTOR_SIZE;
        if start + BLOCK_SECTOR_SIZE > self.data.len() {
            return Err(BlockError::SectorOutOfBounds);
        }
        Ok(start..start + BLOCK_SECTOR_SIZE)
    }
}

impl BlockOp for RamDisk {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.sector_range(sector, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.sector_range(sector, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}
