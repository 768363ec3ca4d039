//! Page fault resolution.
//!
//! A fault on a page with a record is resolved by allocating a frame, filling
//! it from wherever the record says the contents live, and mapping it. A
//! fault on an address with no record is the process's fault, not the
//! kernel's, and comes back as a [`FaultError`].

use super::address_space::AddressSpace;
use super::frame_table::FrameTable;
use super::spt::{FileBacking, PageRecord, PageState};
use super::{PhysFrame, VirtPage};
use crate::swapping::SwapSlot;
use alloc::vec::Vec;
use core::error::Error;
use core::fmt::{Debug, Display, Formatter};
use kidneyos_shared::mem::{is_user_address, OFFSET, STACK_MAX_SIZE, STACK_SLACK};

/// Exit status of a process killed by a fault it caused.
pub const FAULT_EXIT_STATUS: i32 = -1;

/// A fault the process is to blame for.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// No page record covers the address.
    Unmapped { addr: usize },
    /// The backing file ended before the page was filled.
    ShortRead {
        page: usize,
        expected: usize,
        read: usize,
    },
    /// Write to a page mapped read-only.
    ReadOnly { addr: usize },
    /// User access to kernel memory.
    KernelAddress { addr: usize },
}

impl Debug for FaultError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            FaultError::Unmapped { addr } => write!(f, "Unmapped({addr:#X})"),
            FaultError::ShortRead {
                page,
                expected,
                read,
            } => write!(f, "ShortRead({page:#X}, {read}/{expected})"),
            FaultError::ReadOnly { addr } => write!(f, "ReadOnly({addr:#X})"),
            FaultError::KernelAddress { addr } => write!(f, "KernelAddress({addr:#X})"),
        }
    }
}

impl Display for FaultError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            FaultError::Unmapped { addr } => write!(f, "no page mapped at {addr:#X}"),
            FaultError::ShortRead {
                page,
                expected,
                read,
            } => write!(
                f,
                "executable ended early loading page {page:#X} ({read} of {expected} bytes)"
            ),
            FaultError::ReadOnly { addr } => write!(f, "write to read-only page at {addr:#X}"),
            FaultError::KernelAddress { addr } => {
                write!(f, "user access to kernel address {addr:#X}")
            }
        }
    }
}

impl Error for FaultError {}

enum Source {
    Zero,
    Swap(SwapSlot),
    File(FileBacking),
}

/// Brings the page containing `addr` into memory.
///
/// Resolving a page that is already resident succeeds without doing
/// anything, so two faults on the same page are harmless.
pub fn resolve(space: &AddressSpace, frames: &FrameTable, addr: usize) -> Result<(), FaultError> {
    if !is_user_address(addr) {
        return Err(FaultError::KernelAddress { addr });
    }
    let page = VirtPage::containing(addr);

    // Take what we need from the record and let go of the SPT: allocation
    // may evict one of our own pages, which locks it again.
    let (writable, source) = {
        let pages = space.pages().lock();
        let Some(record) = pages.lookup(addr) else {
            return Err(FaultError::Unmapped { addr });
        };
        let source = match record.state() {
            PageState::Resident(_) => return Ok(()),
            PageState::ZeroFill => Source::Zero,
            PageState::Swapped(slot) => Source::Swap(*slot),
            PageState::FileBacked(backing) => Source::File(backing.clone()),
        };
        (record.writable(), source)
    };

    let frame = frames.allocate(space.pid(), page, matches!(source, Source::Zero));
    match source {
        Source::Zero => {}
        Source::Swap(slot) => frames.swap_in(slot, frame),
        Source::File(backing) => {
            let result = backing.read_into(&mut frames.memory().frame(frame));
            if let Err(read) = result {
                frames.free(frame);
                return Err(FaultError::ShortRead {
                    page: page.addr(),
                    expected: backing.read_bytes,
                    read,
                });
            }
        }
    }

    install(space, page, frame, writable);
    frames.unpin(frame);
    log::trace!("vm: {} faulted in {:?} at {:?}", space.pid(), page, frame);
    Ok(())
}

/// Maps a freshly filled frame and marks its record resident. The frame
/// stays pinned until the record agrees it is resident.
fn install(space: &AddressSpace, page: VirtPage, frame: PhysFrame, writable: bool) {
    let mut pages = space.pages().lock();
    let mut page_manager = space.page_manager().lock();
    if !page_manager.set_mapping(page, frame, writable) {
        kernel_fault!("{:?} of {} is already mapped", page, space.pid());
    }
    page_manager.clear_dirty(page);
    pages.mark_resident(page, frame);
}

/// Whether a fault at `addr` with stack pointer `esp` looks like the stack
/// growing down.
pub fn is_stack_access(addr: usize, esp: usize) -> bool {
    addr < OFFSET && addr >= OFFSET - STACK_MAX_SIZE && addr.saturating_add(STACK_SLACK) >= esp
}

/// Like [`resolve`], but an unmapped address just below the stack pointer
/// gets a fresh zeroed stack page.
pub fn resolve_stack_access(
    space: &AddressSpace,
    frames: &FrameTable,
    addr: usize,
    esp: usize,
) -> Result<(), FaultError> {
    match resolve(space, frames, addr) {
        Err(FaultError::Unmapped { .. }) if is_stack_access(addr, esp) => {
            let page = VirtPage::containing(addr);
            space.pages().lock().create(PageRecord::zero_fill(page, true));
            log::debug!("vm: grew stack of {} to {:?}", space.pid(), page);
            resolve(space, frames, addr)
        }
        result => result,
    }
}

/// Entry point from the page fault trap. An `Err` carries the exit status
/// the faulting process is to be killed with.
pub fn page_fault_entry(
    space: &AddressSpace,
    frames: &FrameTable,
    addr: usize,
    esp: usize,
) -> Result<(), i32> {
    resolve_stack_access(space, frames, addr, esp).map_err(|err| {
        log::warn!("vm: killing process {}: {}", space.pid(), err);
        FAULT_EXIT_STATUS
    })
}

/// Faults in and pins every page touched by `len` bytes at `addr`, so the
/// kernel can copy to or from them without the frames being evicted.
///
/// On error nothing stays pinned.
pub fn pin_range(space: &AddressSpace, frames: &FrameTable, addr: usize, len: usize) -> Result<(), FaultError> {
    let mut pinned = Vec::new();
    for page in VirtPage::range(addr, len) {
        match pin_page(space, frames, page) {
            Ok(frame) => pinned.push(frame),
            Err(err) => {
                for frame in pinned {
                    frames.unpin(frame);
                }
                return Err(err);
            }
        }
    }
    log::trace!("vm: {} pinned {} pages at {:#X}", space.pid(), pinned.len(), addr);
    Ok(())
}

fn pin_page(space: &AddressSpace, frames: &FrameTable, page: VirtPage) -> Result<PhysFrame, FaultError> {
    loop {
        resolve(space, frames, page.addr())?;
        // Evicted again before we could pin it.
        if let Some(frame) = frames.pin_resident(space, page) {
            return Ok(frame);
        }
    }
}

/// Undoes [`pin_range`].
pub fn unpin_range(space: &AddressSpace, frames: &FrameTable, addr: usize, len: usize) {
    for page in VirtPage::range(addr, len) {
        let frame = space.pages().lock().lookup(page.addr()).and_then(PageRecord::frame);
        match frame {
            Some(frame) => frames.unpin(frame),
            None => kernel_fault!("unpinning {:?} of {}, which is not resident", page, space.pid()),
        }
    }
    log::trace!("vm: {} unpinned {:#X}+{}", space.pid(), addr, len);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RamFile;
    use crate::mem::spt::PageStatus;
    use crate::system::test::{address_space, frame_table};
    use crate::user_program::loader::{declare_file_backed, declare_zero_fill, setup_stack};
    use alloc::{sync::Arc, vec};
    use kidneyos_shared::mem::PAGE_FRAME_SIZE;
    use std::thread;

    fn page(n: usize) -> VirtPage {
        VirtPage::containing(n * PAGE_FRAME_SIZE)
    }

    fn read_page(space: &AddressSpace, frames: &FrameTable, page: VirtPage) -> Vec<u8> {
        let mut buf = vec![0xEE; PAGE_FRAME_SIZE];
        space.read_user(frames, page.addr(), &mut buf).unwrap();
        buf
    }

    /// Every resident record has a frame entry pointing back at it and vice
    /// versa.
    fn assert_bijection(frames: &FrameTable, spaces: &[&AddressSpace]) {
        let mut resident = 0;
        for space in spaces {
            for record in space.pages().lock().iter() {
                if let Some(frame) = record.frame() {
                    let entry = frames.entry(frame).unwrap();
                    assert_eq!((entry.owner, entry.page), (space.pid(), record.page()));
                    resident += 1;
                }
            }
        }
        assert_eq!(frames.resident_frames(), resident);
        for (frame, entry) in frames.entries() {
            let space = spaces.iter().find(|s| s.pid() == entry.owner).unwrap();
            let pages = space.pages().lock();
            assert_eq!(pages.lookup(entry.page.addr()).unwrap().frame(), Some(frame));
        }
    }

    #[test]
    fn test_zero_fill_reads_zero() {
        let frames = frame_table(2, 2);
        let space = address_space(1, &frames);
        declare_zero_fill(&space, page(4));

        resolve(&space, &frames, page(4).addr() + 17).unwrap();
        assert!(read_page(&space, &frames, page(4)).iter().all(|&b| b == 0));
        assert_bijection(&frames, &[&space]);
    }

    #[test]
    fn test_file_backed_page() {
        let frames = frame_table(2, 2);
        let space = address_space(1, &frames);
        let contents: Vec<u8> = (0..64).collect();
        let file = Arc::new(RamFile::new(contents.clone()));
        declare_file_backed(&space, page(1), false, file, 20, 10, PAGE_FRAME_SIZE - 10);

        resolve(&space, &frames, page(1).addr()).unwrap();
        let buf = read_page(&space, &frames, page(1));
        assert_eq!(&buf[..10], &contents[20..30]);
        assert!(buf[10..].iter().all(|&b| b == 0));

        let mapping = space.page_manager().lock().get_mapping(page(1)).unwrap();
        assert!(!mapping.writable);
        assert!(!space.page_manager().lock().is_dirty(page(1)));
    }

    #[test]
    fn test_short_read_frees_frame() {
        let frames = frame_table(2, 2);
        let space = address_space(1, &frames);
        let file = Arc::new(RamFile::new(vec![1; 100]));
        declare_file_backed(&space, page(1), true, file, 0, 200, PAGE_FRAME_SIZE - 200);

        assert_eq!(
            resolve(&space, &frames, page(1).addr()),
            Err(FaultError::ShortRead {
                page: page(1).addr(),
                expected: 200,
                read: 100
            })
        );
        assert_eq!(frames.resident_frames(), 0);
        assert_eq!(frames.free_user_pages(), 2);
        assert_eq!(
            space.pages().lock().lookup(page(1).addr()).unwrap().status(),
            PageStatus::FileBacked
        );
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let frames = frame_table(2, 2);
        let space = address_space(1, &frames);
        declare_zero_fill(&space, page(2));

        resolve(&space, &frames, page(2).addr()).unwrap();
        resolve(&space, &frames, page(2).addr() + 8).unwrap();
        assert_eq!(frames.resident_frames(), 1);
        assert_bijection(&frames, &[&space]);
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn test_install_over_existing_mapping_is_fatal() {
        let frames = frame_table(2, 2);
        let space = address_space(1, &frames);
        declare_zero_fill(&space, page(1));
        // A translation the page records know nothing about.
        assert!(space
            .page_manager()
            .lock()
            .set_mapping(page(1), PhysFrame::new(1), true));

        let _ = resolve(&space, &frames, page(1).addr());
    }

    #[test]
    fn test_unmapped_address() {
        let frames = frame_table(1, 1);
        let space = address_space(1, &frames);
        assert_eq!(
            resolve(&space, &frames, 0x1234),
            Err(FaultError::Unmapped { addr: 0x1234 })
        );
        assert_eq!(page_fault_entry(&space, &frames, 0x1234, OFFSET), Err(FAULT_EXIT_STATUS));
    }

    #[test]
    fn test_eviction_round_trip() {
        const N: usize = 3;
        let frames = frame_table(N, 8);
        let space = address_space(1, &frames);

        for i in 0..=N {
            declare_zero_fill(&space, page(i));
            let fill = vec![i as u8 + 1; PAGE_FRAME_SIZE];
            space.write_user(&frames, page(i).addr(), &fill).unwrap();
        }

        // The last page needed one eviction and nothing else.
        assert_eq!(frames.evictions(), 1);
        assert_eq!(frames.swap_slots_in_use(), 1);
        assert_bijection(&frames, &[&space]);

        let swapped: Vec<_> = space
            .pages()
            .lock()
            .iter()
            .filter(|r| r.status() == PageStatus::Swapped)
            .map(|r| r.page())
            .collect();
        assert_eq!(swapped.len(), 1);

        let victim = swapped[0];
        let expected = vec![(victim.addr() / PAGE_FRAME_SIZE) as u8 + 1; PAGE_FRAME_SIZE];
        assert_eq!(read_page(&space, &frames, victim), expected);
        assert_bijection(&frames, &[&space]);
        // Read-in freed the slot it came from; the page evicted to make room
        // took a slot of its own.
        assert_eq!(frames.swap_slots_in_use(), 1);
    }

    #[test]
    fn test_swapped_page_keeps_read_only() {
        let frames = frame_table(1, 4);
        let space = address_space(1, &frames);
        let file = Arc::new(RamFile::new(vec![9; PAGE_FRAME_SIZE]));
        declare_file_backed(&space, page(1), false, file, 0, PAGE_FRAME_SIZE, 0);
        declare_zero_fill(&space, page(2));

        resolve(&space, &frames, page(1).addr()).unwrap();
        resolve(&space, &frames, page(2).addr()).unwrap();
        resolve(&space, &frames, page(1).addr()).unwrap();

        assert_eq!(frames.evictions(), 2);
        assert!(!space.page_manager().lock().get_mapping(page(1)).unwrap().writable);
        assert_eq!(read_page(&space, &frames, page(1)), vec![9; PAGE_FRAME_SIZE]);
    }

    #[test]
    fn test_stack_growth() {
        let frames = frame_table(4, 4);
        let space = address_space(1, &frames);
        let esp = setup_stack(&space, &frames);
        assert_eq!(esp, OFFSET);

        // pusha just below the current stack page.
        let esp = OFFSET - PAGE_FRAME_SIZE;
        let addr = esp - 32;
        page_fault_entry(&space, &frames, addr, esp).unwrap();
        assert_eq!(
            space.pages().lock().lookup(addr).unwrap().status(),
            PageStatus::Resident
        );

        // Too far below esp is a bad pointer, not stack growth.
        let addr = esp - PAGE_FRAME_SIZE - 64;
        assert_eq!(
            resolve_stack_access(&space, &frames, addr, esp),
            Err(FaultError::Unmapped { addr })
        );
        assert!(!is_stack_access(OFFSET - STACK_MAX_SIZE - 1, 0));
        assert!(!is_stack_access(OFFSET, 0));
    }

    #[test]
    fn test_pin_range_rolls_back() {
        let frames = frame_table(4, 4);
        let space = address_space(1, &frames);
        declare_zero_fill(&space, page(1));

        // The second page has no record.
        let addr = page(2).addr() - 8;
        assert_eq!(
            pin_range(&space, &frames, addr, 16),
            Err(FaultError::Unmapped { addr: page(2).addr() })
        );
        assert!(frames.entries().iter().all(|(_, e)| !e.pinned));
    }

    #[test]
    fn test_pinned_buffer_survives_pressure() {
        let frames = Arc::new(frame_table(4, 16));
        let space = address_space(1, &frames);
        declare_zero_fill(&space, page(1));
        declare_zero_fill(&space, page(2));

        // A write buffer straddling two pages.
        let addr = page(2).addr() - 100;
        pin_range(&space, &frames, addr, 200).unwrap();
        let pinned: Vec<_> = frames.entries().into_iter().filter(|(_, e)| e.pinned).collect();
        assert_eq!(pinned.len(), 2);

        let other = {
            let frames = frames.clone();
            thread::spawn(move || {
                let space = address_space(2, &frames);
                for i in 0..16 {
                    declare_zero_fill(&space, page(i));
                    space.write_user(&frames, page(i).addr(), &[i as u8]).unwrap();
                }
                space
            })
            .join()
            .unwrap()
        };
        assert!(frames.evictions() > 0);
        for (frame, entry) in &pinned {
            assert_eq!(frames.entry(*frame), Some(*entry));
        }
        assert_bijection(&frames, &[&space, &other]);

        unpin_range(&space, &frames, addr, 200);
        let evictions = frames.evictions();
        for i in 16..24 {
            declare_zero_fill(&other, page(i));
            other.write_user(&frames, page(i).addr(), &[1]).unwrap();
        }
        assert!(frames.evictions() >= evictions + 8);
        assert!(space.pages().lock().iter().any(|r| r.status() == PageStatus::Swapped));
        assert_bijection(&frames, &[&space, &other]);
    }

    #[test]
    fn test_teardown_then_reuse() {
        let frames = frame_table(2, 4);
        let space = address_space(1, &frames);
        for i in 0..4 {
            declare_zero_fill(&space, page(i));
            space.write_user(&frames, page(i).addr(), &[7]).unwrap();
        }
        assert_eq!(frames.swap_slots_in_use(), 2);

        space.destroy(&frames);
        assert!(frames.entries().is_empty());
        assert_eq!(frames.swap_slots_in_use(), 0);
        assert_eq!(frames.free_user_pages(), 2);

        let evictions = frames.evictions();
        let fresh = address_space(2, &frames);
        for i in 0..2 {
            declare_zero_fill(&fresh, page(i));
            resolve(&fresh, &frames, page(i).addr()).unwrap();
        }
        assert_eq!(frames.evictions(), evictions);
        assert_bijection(&frames, &[&fresh]);
    }

    #[test]
    fn test_reused_pid_does_not_inherit_frames() {
        let frames = frame_table(2, 4);
        let old = address_space(1, &frames);
        declare_zero_fill(&old, page(1));
        old.write_user(&frames, page(1).addr(), &[0xAA; PAGE_FRAME_SIZE]).unwrap();
        // Exits without tearing down.
        drop(old);

        let new = address_space(1, &frames);
        assert_eq!(frames.resident_frames(), 0);
        assert_eq!(frames.free_user_pages(), 2);

        declare_zero_fill(&new, page(1));
        new.write_user(&frames, page(1).addr(), &[0x11; PAGE_FRAME_SIZE]).unwrap();
        for i in 7..10 {
            declare_zero_fill(&new, page(i));
            resolve(&new, &frames, page(i).addr()).unwrap();
            assert_bijection(&frames, &[&new]);
        }

        assert_eq!(read_page(&new, &frames, page(1)), vec![0x11; PAGE_FRAME_SIZE]);
        assert_bijection(&frames, &[&new]);
    }
}
