pub mod page_replacement;

pub use page_replacement::{PageReplacementPolicy, SecondChance};

use crate::block::block_core::{Block, BlockSector, BlockType, BLOCK_SECTOR_SIZE};
use crate::mem::PageBuf;
use core::fmt;
use kidneyos_shared::{bit_array::Bitmap, mem::PAGE_FRAME_SIZE};

/// Sectors needed to hold one page.
pub const SECTORS_PER_SLOT: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

/// A page-sized slot on the swap device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }

    fn sector(self, i: usize) -> BlockSector {
        (self.0 * SECTORS_PER_SLOT + i) as BlockSector
    }
}

impl fmt::Debug for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SwapSlot({})", self.0)
    }
}

/// The swap device, carved into page-sized slots tracked by a bitmap.
///
/// A set bit means the slot holds a page that has not been read back yet.
pub struct SwapSpace {
    block: Block,
    bitmap: Bitmap,
}

impl SwapSpace {
    pub fn new(block: Block) -> Self {
        if block.get_type() != BlockType::Swap {
            kernel_fault!("{} is not a swap device", block);
        }

        let slots = block.get_size() as usize / SECTORS_PER_SLOT;
        if slots == 0 {
            kernel_fault!("swap device {} cannot hold a single page", block);
        }

        log::info!("swap: {} pages on {}", slots, block.get_name());
        Self {
            block,
            bitmap: Bitmap::new(slots),
        }
    }

    /// Writes `page` to the lowest free slot and returns it.
    pub fn write_out(&mut self, page: &PageBuf) -> SwapSlot {
        let Some(index) = self.bitmap.scan_and_flip(false) else {
            kernel_fault!("swap space exhausted ({} slots)", self.bitmap.len());
        };
        let slot = SwapSlot(index);

        for (i, sector) in page.chunks_exact(BLOCK_SECTOR_SIZE).enumerate() {
            if let Err(err) = self.block.write(slot.sector(i), sector) {
                kernel_fault!("swap write to slot {} failed: {}", index, err);
            }
        }

        log::debug!("swap: wrote slot {}", index);
        slot
    }

    /// Reads `slot` into `page` and frees the slot.
    pub fn read_in(&mut self, slot: SwapSlot, page: &mut PageBuf) {
        if !self.is_occupied(slot) {
            kernel_fault!("swap read from free slot {}", slot.index());
        }

        for (i, sector) in page.chunks_exact_mut(BLOCK_SECTOR_SIZE).enumerate() {
            if let Err(err) = self.block.read(slot.sector(i), sector) {
                kernel_fault!("swap read from slot {} failed: {}", slot.index(), err);
            }
        }

        self.bitmap.set(slot.index(), false);
        log::debug!("swap: read slot {}", slot.index());
    }

    /// Discards the contents of `slot` without reading them.
    pub fn free(&mut self, slot: SwapSlot) {
        if !self.is_occupied(slot) {
            kernel_fault!("double free of swap slot {}", slot.index());
        }
        self.bitmap.set(slot.index(), false);
    }

    pub fn is_occupied(&self, slot: SwapSlot) -> bool {
        slot.index() < self.bitmap.len() && self.bitmap.test(slot.index())
    }

    pub fn slot_count(&self) -> usize {
        self.bitmap.len()
    }

    pub fn used_slots(&self) -> usize {
        self.bitmap.count(true)
    }
}
