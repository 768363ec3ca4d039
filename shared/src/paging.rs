// https://wiki.osdev.org/Paging

// Frame numbers fit in the 20-bit field on the 32-bit platform we target.
#![allow(clippy::cast_possible_truncation)]

use crate::mem::PAGE_FRAME_SIZE;
use alloc::collections::BTreeMap;
use arbitrary_int::{u20, Number};
use bitbybit::bitfield;

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

/// A single-level page table for one user address space, keyed by virtual
/// page number.
///
/// Entries use the x86 layout so the accessed and dirty bits behave the way
/// the MMU would set them; `touch` is the software stand-in for a translated
/// access.
#[derive(Default)]
pub struct PageManager {
    entries: BTreeMap<usize, PageTableEntry>,
}

impl PageManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn present(&self, vaddr: usize) -> Option<PageTableEntry> {
        self.entries
            .get(&(vaddr / PAGE_FRAME_SIZE))
            .copied()
            .filter(|e| e.present())
    }

    fn update(&mut self, vaddr: usize, f: impl FnOnce(PageTableEntry) -> PageTableEntry) {
        if let Some(entry) = self.entries.get_mut(&(vaddr / PAGE_FRAME_SIZE)) {
            if entry.present() {
                *entry = f(*entry);
            }
        }
    }

    /// Maps the page containing `vaddr` to `frame`. Returns `false` without
    /// touching the table if the page is already present.
    #[must_use]
    pub fn map(&mut self, vaddr: usize, frame: usize, writable: bool) -> bool {
        if self.present(vaddr).is_some() {
            return false;
        }
        assert!(
            frame <= u20::MAX.value() as usize,
            "frame number {frame:#X} does not fit in a page table entry"
        );
        let entry = PageTableEntry::DEFAULT
            .with_present(true)
            .with_read_write(writable)
            .with_user_supervisor(true)
            .with_page_frame_address(u20::new(frame as u32));
        self.entries.insert(vaddr / PAGE_FRAME_SIZE, entry);
        true
    }

    /// Removes the mapping for the page containing `vaddr`, returning the
    /// frame it pointed at.
    pub fn unmap(&mut self, vaddr: usize) -> Option<usize> {
        let entry = self.present(vaddr)?;
        self.entries.remove(&(vaddr / PAGE_FRAME_SIZE));
        Some(entry.page_frame_address().value() as usize)
    }

    pub fn translate(&self, vaddr: usize) -> Option<usize> {
        self.present(vaddr)
            .map(|e| e.page_frame_address().value() as usize)
    }

    pub fn is_writable(&self, vaddr: usize) -> bool {
        self.present(vaddr).is_some_and(|e| e.read_write())
    }

    pub fn is_accessed(&self, vaddr: usize) -> bool {
        self.present(vaddr).is_some_and(|e| e.accessed())
    }

    pub fn set_accessed(&mut self, vaddr: usize, accessed: bool) {
        self.update(vaddr, |e| e.with_accessed(accessed));
    }

    pub fn is_dirty(&self, vaddr: usize) -> bool {
        self.present(vaddr).is_some_and(|e| e.dirty())
    }

    pub fn set_dirty(&mut self, vaddr: usize, dirty: bool) {
        self.update(vaddr, |e| e.with_dirty(dirty));
    }

    /// Records an access the way the MMU does: sets the accessed bit, and the
    /// dirty bit on writes. Returns `false` if the page is not present.
    pub fn touch(&mut self, vaddr: usize, write: bool) -> bool {
        if self.present(vaddr).is_none() {
            return false;
        }
        self.update(vaddr, |e| e.with_accessed(true).with_dirty(e.dirty() || write));
        true
    }

    pub fn mapped_pages(&self) -> usize {
        self.entries.values().filter(|e| e.present()).count()
    }
}
