use crate::block::block_core::{Block, BlockOp, BlockSector, BlockType};
use crate::mem::frame_allocator::CoreMapAllocator;
use crate::mem::frame_table::FrameTable;
use crate::mem::PhysicalMemory;
use crate::swapping::SwapSpace;
use alloc::{boxed::Box, sync::Arc};
use kidneyos_shared::sizes::{KERNEL_POOL_FRAMES, SWAP_SECTORS, USER_POOL_FRAMES};
use once_cell::race::OnceBox;

/// Sizes of the memory pools and the swap device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmConfig {
    pub kernel_frames: usize,
    pub user_frames: usize,
    pub swap_sectors: BlockSector,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            kernel_frames: KERNEL_POOL_FRAMES,
            user_frames: USER_POOL_FRAMES,
            swap_sectors: SWAP_SECTORS,
        }
    }
}

impl VmConfig {
    /// Builds a frame table over fresh physical memory, swapping to a device
    /// driven by `swap_driver`.
    pub fn build(&self, swap_driver: Box<dyn BlockOp>) -> FrameTable {
        let memory = Arc::new(PhysicalMemory::new(self.kernel_frames + self.user_frames));
        let allocator = CoreMapAllocator::new(memory.clone(), self.kernel_frames);
        let swap = SwapSpace::new(Block::new(
            BlockType::Swap,
            "swap",
            self.swap_sectors,
            swap_driver,
        ));
        FrameTable::new(memory, Box::new(allocator), swap)
    }
}

static FRAME_TABLE: OnceBox<FrameTable> = OnceBox::new();

/// Sets up the system-wide frame table. Must be called exactly once.
pub fn vm_init(config: &VmConfig, swap_driver: Box<dyn BlockOp>) -> &'static FrameTable {
    if FRAME_TABLE.set(Box::new(config.build(swap_driver))).is_err() {
        kernel_fault!("vm_init called twice");
    }
    frame_table()
}

pub fn frame_table() -> &'static FrameTable {
    match FRAME_TABLE.get() {
        Some(frames) => frames,
        None => kernel_fault!("frame table used before vm_init"),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ram_disk::RamDisk;

    #[test]
    fn test_default_config() {
        let config = VmConfig::default();
        assert_eq!(config.kernel_frames, KERNEL_POOL_FRAMES);
        assert_eq!(config.swap_sectors, SWAP_SECTORS);
    }

    #[test]
    fn test_vm_init() {
        test::init_logging();
        let config = VmConfig {
            kernel_frames: 4,
            user_frames: 8,
            swap_sectors: 64,
        };
        let frames = vm_init(&config, Box::new(RamDisk::new(64)));
        assert!(core::ptr::eq(frames, frame_table()));
        assert_eq!(frames.free_user_pages(), 8);
        assert_eq!(frames.memory().len(), 12);
    }
}
