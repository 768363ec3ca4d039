use super::fault::{self, FaultError};
use super::frame_table::FrameTable;
use super::spt::SupplementalPageTable;
use super::{PageBuf, VirtPage};
use crate::paging::PageMapper;
use alloc::{boxed::Box, sync::Arc};
use core::ops::Range;
use kidneyos_shared::mem::{is_user_address, page_offset, PAGE_FRAME_SIZE};
use spin::Mutex;

pub type Pid = u16;

/// The user half of one process's memory: its page records and the page
/// table the MMU walks.
///
/// Lock order is the SPT before the page manager, and the frame table before
/// both.
pub struct AddressSpace {
    pid: Pid,
    pages: Mutex<SupplementalPageTable>,
    page_manager: Mutex<Box<dyn PageMapper>>,
}

impl AddressSpace {
    /// Creates an empty address space and registers it with `frames`.
    pub fn new(pid: Pid, page_manager: Box<dyn PageMapper>, frames: &FrameTable) -> Arc<Self> {
        let space = Arc::new(Self {
            pid,
            pages: Mutex::new(SupplementalPageTable::new()),
            page_manager: Mutex::new(page_manager),
        });
        frames.register(&space);
        space
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn pages(&self) -> &Mutex<SupplementalPageTable> {
        &self.pages
    }

    pub fn page_manager(&self) -> &Mutex<Box<dyn PageMapper>> {
        &self.page_manager
    }

    /// Frees every frame and swap slot this process holds.
    pub fn destroy(&self, frames: &FrameTable) {
        frames.release_address_space(self);
    }

    /// Reads user memory at `addr` into `buf` the way a user instruction
    /// would, faulting pages in as needed.
    pub fn read_user(&self, frames: &FrameTable, addr: usize, buf: &mut [u8]) -> Result<(), FaultError> {
        self.access(frames, addr, buf.len(), false, |page, offset, range| {
            buf[range.clone()].copy_from_slice(&page[offset..offset + range.len()]);
        })
    }

    /// Writes `data` to user memory at `addr`, faulting pages in as needed.
    pub fn write_user(&self, frames: &FrameTable, addr: usize, data: &[u8]) -> Result<(), FaultError> {
        self.access(frames, addr, data.len(), true, |page, offset, range| {
            page[offset..offset + range.len()].copy_from_slice(&data[range]);
        })
    }

    /// Walks `len` bytes at `addr` a page at a time. `copy` gets the frame,
    /// the offset into it, and the matching range of the caller's buffer.
    fn access(
        &self,
        frames: &FrameTable,
        addr: usize,
        len: usize,
        write: bool,
        mut copy: impl FnMut(&mut PageBuf, usize, Range<usize>),
    ) -> Result<(), FaultError> {
        let mut done = 0;
        while done < len {
            let current = addr.wrapping_add(done);
            if current < addr || !is_user_address(current) {
                return Err(FaultError::KernelAddress { addr: current });
            }

            let page = VirtPage::containing(current);
            let offset = page_offset(current);
            let chunk = (PAGE_FRAME_SIZE - offset).min(len - done);

            let mut page_manager = self.page_manager.lock();
            let Some(mapping) = page_manager.get_mapping(page) else {
                drop(page_manager);
                fault::resolve(self, frames, current)?;
                continue;
            };
            if write && !mapping.writable {
                return Err(FaultError::ReadOnly { addr: current });
            }
            page_manager.record_access(page, write);

            let mut contents = frames.memory().frame(mapping.frame);
            copy(&mut **contents, offset, done..done + chunk);
            done += chunk;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::spt::PageRecord;
    use crate::system::test::{address_space, frame_table};

    #[test]
    fn test_write_then_read_across_pages() {
        let frames = frame_table(4, 4);
        let space = address_space(3, &frames);
        {
            let mut pages = space.pages().lock();
            pages.create(PageRecord::zero_fill(VirtPage::containing(0x1000), true));
            pages.create(PageRecord::zero_fill(VirtPage::containing(0x2000), true));
        }

        let data: Vec<u8> = (0..64).collect();
        space.write_user(&frames, 0x2000 - 32, &data).unwrap();
        assert_eq!(frames.resident_frames(), 2);

        let mut buf = [0; 64];
        space.read_user(&frames, 0x2000 - 32, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[..]);

        let page_manager = space.page_manager().lock();
        assert!(page_manager.is_dirty(VirtPage::containing(0x1000)));
        assert!(page_manager.is_accessed(VirtPage::containing(0x2000)));
    }

    #[test]
    fn test_read_only_and_unmapped() {
        let frames = frame_table(2, 4);
        let space = address_space(3, &frames);
        space
            .pages()
            .lock()
            .create(PageRecord::zero_fill(VirtPage::containing(0x5000), false));

        let mut buf = [0xFF; 4];
        space.read_user(&frames, 0x5000, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);

        assert_eq!(
            space.write_user(&frames, 0x5002, &[1]),
            Err(FaultError::ReadOnly { addr: 0x5002 })
        );
        assert_eq!(
            space.read_user(&frames, 0x9000, &mut buf),
            Err(FaultError::Unmapped { addr: 0x9000 })
        );
    }

    #[test]
    fn test_kernel_address_rejected() {
        let frames = frame_table(1, 1);
        let space = address_space(3, &frames);
        let mut buf = [0; 4];
        assert!(matches!(
            space.read_user(&frames, kidneyos_shared::mem::OFFSET, &mut buf),
            Err(FaultError::KernelAddress { .. })
        ));
    }
}
