//! The raw physical page allocator.
//!
//! Hands out single page frames from a kernel pool and a user pool. Only the
//! frame table asks it for user pages.

use super::{PhysFrame, PhysicalMemory};
use alloc::{boxed::Box, sync::Arc, vec};
use bitbybit::bitfield;
use core::ops::Range;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    #[bit(1, rw)]
    is_kernel: bool,
}

#[bitfield(u8, default = 0)]
pub struct PallocFlags {
    // Take the page from the user pool rather than the kernel pool.
    #[bit(0, rw)]
    pub user: bool,
    // Zero the page before handing it out.
    #[bit(1, rw)]
    pub zero: bool,
}

pub trait PageAllocator: Send {
    /// Allocates one page, or returns `None` if the requested pool is empty.
    fn alloc_page(&mut self, flags: PallocFlags) -> Option<PhysFrame>;

    /// Returns a page obtained from `alloc_page` to its pool.
    fn free_page(&mut self, frame: PhysFrame);

    /// Number of unallocated pages left in the user or kernel pool.
    fn free_pages(&self, user: bool) -> usize;
}

/// Tracks every physical frame in a core map. The first `kernel_frames`
/// frames form the kernel pool and the rest the user pool; each pool is
/// searched next-fit from where its last allocation ended.
pub struct CoreMapAllocator {
    memory: Arc<PhysicalMemory>,
    core_map: Box<[CoreMapEntry]>,
    kernel_frames: usize,
    kernel_position: usize,
    user_position: usize,
}

impl CoreMapAllocator {
    pub fn new(memory: Arc<PhysicalMemory>, kernel_frames: usize) -> Self {
        assert!(
            kernel_frames <= memory.len(),
            "kernel pool of {kernel_frames} frames does not fit in {} frames",
            memory.len()
        );

        let mut core_map = vec![CoreMapEntry::DEFAULT; memory.len()].into_boxed_slice();
        for entry in core_map[..kernel_frames].iter_mut() {
            *entry = entry.with_is_kernel(true);
        }

        Self {
            memory,
            core_map,
            kernel_frames,
            kernel_position: 0,
            user_position: kernel_frames,
        }
    }

    fn pool(&self, user: bool) -> Range<usize> {
        if user {
            self.kernel_frames..self.core_map.len()
        } else {
            0..self.kernel_frames
        }
    }
}

/// Finds the first free frame in `pool` at or after `position`, wrapping
/// around to the start of the pool once.
fn next_fit(core_map: &[CoreMapEntry], pool: Range<usize>, position: usize) -> Option<usize> {
    let position = position.clamp(pool.start, pool.end);
    (position..pool.end)
        .chain(pool.start..position)
        .find(|&i| !core_map[i].allocated())
}

impl PageAllocator for CoreMapAllocator {
    fn alloc_page(&mut self, flags: PallocFlags) -> Option<PhysFrame> {
        let pool = self.pool(flags.user());
        let position = if flags.user() {
            self.user_position
        } else {
            self.kernel_position
        };

        let index = next_fit(&self.core_map, pool.clone(), position)?;
        self.core_map[index] = self.core_map[index].with_allocated(true);

        let next = if index + 1 == pool.end { pool.start } else { index + 1 };
        if flags.user() {
            self.user_position = next;
        } else {
            self.kernel_position = next;
        }

        let frame = PhysFrame::new(index);
        if flags.zero() {
            self.memory.frame(frame).fill(0);
        }
        Some(frame)
    }

    fn free_page(&mut self, frame: PhysFrame) {
        let Some(entry) = self.core_map.get(frame.number()).copied() else {
            kernel_fault!("freeing frame {} outside physical memory", frame.number());
        };
        if !entry.allocated() {
            kernel_fault!("double free of physical frame {}", frame.number());
        }
        self.core_map[frame.number()] = entry.with_allocated(false);
    }

    fn free_pages(&self, user: bool) -> usize {
        self.core_map[self.pool(user)]
            .iter()
            .filter(|entry| !entry.allocated())
            .count()
    }
}
