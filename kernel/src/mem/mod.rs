pub mod address_space;
pub mod fault;
pub mod frame_allocator;
pub mod frame_table;
pub mod spt;
pub mod user;

use alloc::{boxed::Box, vec::Vec};
use core::fmt;
use kidneyos_shared::mem::{page_round_down, PAGE_FRAME_SIZE};
use spin::{Mutex, MutexGuard};

pub type PageBuf = [u8; PAGE_FRAME_SIZE];

/// Number of a physical page frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFrame(usize);

impl PhysFrame {
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    pub const fn number(self) -> usize {
        self.0
    }
}

/// A page-aligned user virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPage(usize);

impl VirtPage {
    /// The page containing `addr`.
    pub const fn containing(addr: usize) -> Self {
        Self(page_round_down(addr))
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + PAGE_FRAME_SIZE)
    }

    /// Every page touched by the `len` bytes starting at `addr`.
    pub fn range(addr: usize, len: usize) -> impl Iterator<Item = VirtPage> {
        let first = page_round_down(addr);
        let pages = if len == 0 {
            0
        } else {
            (page_round_down(addr.saturating_add(len - 1)) - first) / PAGE_FRAME_SIZE + 1
        };
        (0..pages).map(move |i| VirtPage(first + i * PAGE_FRAME_SIZE))
    }
}

impl fmt::Debug for VirtPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtPage({:#X})", self.0)
    }
}

/// Physical memory as an arena of page buffers indexed by frame number.
///
/// Each frame has its own lock so a pinned frame can be filled (from a file,
/// say) without holding the frame table lock.
pub struct PhysicalMemory {
    frames: Box<[Mutex<Box<PageBuf>>]>,
}

impl PhysicalMemory {
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames)
                .map(|_| Mutex::new(Box::new([0; PAGE_FRAME_SIZE])))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Locks and returns the contents of `frame`.
    pub fn frame(&self, frame: PhysFrame) -> MutexGuard<'_, Box<PageBuf>> {
        match self.frames.get(frame.number()) {
            Some(buf) => buf.lock(),
            None => kernel_fault!("frame {} is outside physical memory", frame.number()),
        }
    }
}
