//! How the program loader declares a new process's pages.
//!
//! Nothing is read from the executable here. Each page gets a record saying
//! where its bytes come from, and the first access faults it in.

use crate::fs::FileHandle;
use crate::mem::address_space::AddressSpace;
use crate::mem::frame_table::FrameTable;
use crate::mem::spt::{FileBacking, PageRecord};
use crate::mem::{PhysFrame, VirtPage};
use alloc::sync::Arc;
use kidneyos_shared::mem::{page_offset, OFFSET, PAGE_FRAME_SIZE};

pub fn declare_file_backed(
    space: &AddressSpace,
    page: VirtPage,
    writable: bool,
    file: Arc<dyn FileHandle>,
    offset: u64,
    read_bytes: usize,
    zero_bytes: usize,
) {
    let backing = FileBacking {
        file,
        offset,
        read_bytes,
        zero_bytes,
    };
    space
        .pages()
        .lock()
        .create(PageRecord::file_backed(page, writable, backing));
}

pub fn declare_zero_fill(space: &AddressSpace, page: VirtPage) {
    space.pages().lock().create(PageRecord::zero_fill(page, true));
}

/// Declares `page` as already living in `frame`, which must have come from
/// `frames.allocate` and still be pinned. Maps the page and unpins the frame.
pub fn declare_resident(
    space: &AddressSpace,
    frames: &FrameTable,
    page: VirtPage,
    frame: PhysFrame,
    writable: bool,
) {
    {
        let mut pages = space.pages().lock();
        let mut page_manager = space.page_manager().lock();
        if !page_manager.set_mapping(page, frame, writable) {
            kernel_fault!("{:?} of {} is already mapped", page, space.pid());
        }
        pages.create(PageRecord::resident(page, frame, writable));
    }
    frames.unpin(frame);
}

/// Declares the pages of a loadable segment: `read_bytes` from `file` at
/// `offset` followed by `zero_bytes` of zeroes, starting at `upage`.
pub fn load_segment(
    space: &AddressSpace,
    file: Arc<dyn FileHandle>,
    offset: u64,
    upage: usize,
    read_bytes: usize,
    zero_bytes: usize,
    writable: bool,
) {
    if (read_bytes + zero_bytes) % PAGE_FRAME_SIZE != 0 {
        kernel_fault!("segment of {} + {} bytes is not whole pages", read_bytes, zero_bytes);
    }
    if page_offset(upage) != 0 || offset % PAGE_FRAME_SIZE as u64 != 0 {
        kernel_fault!("segment at {:#X} (file offset {:#X}) is not page aligned", upage, offset);
    }

    let pages = (read_bytes + zero_bytes) / PAGE_FRAME_SIZE;
    let mut read_left = read_bytes;
    let mut page = VirtPage::containing(upage);
    let mut offset = offset;

    for _ in 0..pages {
        let page_read_bytes = read_left.min(PAGE_FRAME_SIZE);
        declare_file_backed(
            space,
            page,
            writable,
            file.clone(),
            offset,
            page_read_bytes,
            PAGE_FRAME_SIZE - page_read_bytes,
        );

        read_left -= page_read_bytes;
        offset += page_read_bytes as u64;
        page = page.next();
    }
}

/// Gives a new process its first stack page, just below the kernel, and
/// returns the initial stack pointer.
pub fn setup_stack(space: &AddressSpace, frames: &FrameTable) -> usize {
    let page = VirtPage::containing(OFFSET - PAGE_FRAME_SIZE);
    let frame = frames.allocate(space.pid(), page, true);
    declare_resident(space, frames, page, frame, true);
    OFFSET
}
