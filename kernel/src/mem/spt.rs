//! The supplemental page table: per-process records of where each user page's
//! contents live while it is not (or not yet) in memory.

use super::{PageBuf, PhysFrame, VirtPage};
use crate::fs::FileHandle;
use crate::swapping::SwapSlot;
use alloc::sync::Arc;
use core::fmt;
use hashbrown::HashMap;
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageStatus {
    ZeroFill,
    FileBacked,
    Resident,
    Swapped,
}

/// Where a file-backed page gets its bytes from.
#[derive(Clone)]
pub struct FileBacking {
    pub file: Arc<dyn FileHandle>,
    pub offset: u64,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

impl FileBacking {
    /// Fills `page` with `read_bytes` from the file followed by zeroes.
    /// Returns the number of bytes actually read if the file came up short.
    pub fn read_into(&self, page: &mut PageBuf) -> Result<(), usize> {
        let read = self.file.read_at(self.offset, &mut page[..self.read_bytes]);
        if read != self.read_bytes {
            return Err(read);
        }
        page[self.read_bytes..].fill(0);
        Ok(())
    }
}

impl fmt::Debug for FileBacking {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FileBacking")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub enum PageState {
    ZeroFill,
    FileBacked(FileBacking),
    Resident(PhysFrame),
    Swapped(SwapSlot),
}

#[derive(Clone, Debug)]
pub struct PageRecord {
    page: VirtPage,
    writable: bool,
    state: PageState,
}

impl PageRecord {
    pub fn new(page: VirtPage, writable: bool, state: PageState) -> Self {
        Self {
            page,
            writable,
            state,
        }
    }

    pub fn zero_fill(page: VirtPage, writable: bool) -> Self {
        Self::new(page, writable, PageState::ZeroFill)
    }

    pub fn file_backed(page: VirtPage, writable: bool, backing: FileBacking) -> Self {
        if backing.read_bytes + backing.zero_bytes != PAGE_FRAME_SIZE {
            kernel_fault!(
                "file-backed page {:?} covers {} + {} bytes",
                page,
                backing.read_bytes,
                backing.zero_bytes
            );
        }
        Self::new(page, writable, PageState::FileBacked(backing))
    }

    pub fn resident(page: VirtPage, frame: PhysFrame, writable: bool) -> Self {
        Self::new(page, writable, PageState::Resident(frame))
    }

    pub fn page(&self) -> VirtPage {
        self.page
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn status(&self) -> PageStatus {
        match self.state {
            PageState::ZeroFill => PageStatus::ZeroFill,
            PageState::FileBacked(_) => PageStatus::FileBacked,
            PageState::Resident(_) => PageStatus::Resident,
            PageState::Swapped(_) => PageStatus::Swapped,
        }
    }

    pub fn frame(&self) -> Option<PhysFrame> {
        match self.state {
            PageState::Resident(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn swap_slot(&self) -> Option<SwapSlot> {
        match self.state {
            PageState::Swapped(slot) => Some(slot),
            _ => None,
        }
    }
}

/// Receives the resources held by records as they are destroyed.
pub trait Reclaim {
    fn reclaim_frame(&mut self, page: VirtPage, frame: PhysFrame);
    fn reclaim_swap_slot(&mut self, slot: SwapSlot);
}

#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    pages: HashMap<VirtPage, PageRecord>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the record for the page containing `addr`.
    pub fn lookup(&self, addr: usize) -> Option<&PageRecord> {
        self.pages.get(&VirtPage::containing(addr))
    }

    pub fn create(&mut self, record: PageRecord) {
        if let PageState::Swapped(slot) = record.state {
            kernel_fault!("page {:?} created directly in {:?}", record.page, slot);
        }
        if self.pages.contains_key(&record.page) {
            kernel_fault!("page {:?} declared twice", record.page);
        }
        self.pages.insert(record.page, record);
    }

    /// Records that `page` was evicted to `slot`.
    pub fn mark_swapped(&mut self, page: VirtPage, slot: SwapSlot) {
        match self.pages.get_mut(&page) {
            Some(record) if record.frame().is_some() => record.state = PageState::Swapped(slot),
            Some(record) => kernel_fault!("evicting {:?} which is {:?}", page, record.status()),
            None => kernel_fault!("evicting unknown page {:?}", page),
        }
    }

    /// Records that `page` was brought into `frame` by a fault.
    pub fn mark_resident(&mut self, page: VirtPage, frame: PhysFrame) {
        match self.pages.get_mut(&page) {
            Some(record) if record.frame().is_none() => record.state = PageState::Resident(frame),
            Some(record) => kernel_fault!("{:?} is already resident in {:?}", page, record.frame()),
            None => kernel_fault!("resolving unknown page {:?}", page),
        }
    }

    /// Drops every record, handing resident frames and swap slots to `reclaim`.
    pub fn destroy_all(&mut self, reclaim: &mut dyn Reclaim) {
        for (page, record) in core::mem::take(&mut self.pages) {
            match record.state {
                PageState::Resident(frame) => reclaim.reclaim_frame(page, frame),
                PageState::Swapped(slot) => reclaim.reclaim_swap_slot(slot),
                PageState::ZeroFill | PageState::FileBacked(_) => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Records in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &PageRecord> {
        self.pages.values()
    }
}
