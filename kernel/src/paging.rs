use crate::mem::{PhysFrame, VirtPage};
pub use kidneyos_shared::paging::PageManager;

/// A present translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub frame: PhysFrame,
    pub writable: bool,
}

/// The address-translation hardware of one address space.
pub trait PageMapper: Send {
    fn get_mapping(&self, page: VirtPage) -> Option<Mapping>;

    /// Maps `page` to `frame`. Returns `false` if `page` is already mapped.
    #[must_use]
    fn set_mapping(&mut self, page: VirtPage, frame: PhysFrame, writable: bool) -> bool;

    fn clear_mapping(&mut self, page: VirtPage);

    fn is_accessed(&self, page: VirtPage) -> bool;
    fn clear_accessed(&mut self, page: VirtPage);

    fn is_dirty(&self, page: VirtPage) -> bool;
    fn clear_dirty(&mut self, page: VirtPage);

    /// What the MMU does on each translated access: set the accessed bit, and
    /// the dirty bit for writes.
    fn record_access(&mut self, page: VirtPage, write: bool);
}

impl PageMapper for PageManager {
    fn get_mapping(&self, page: VirtPage) -> Option<Mapping> {
        self.translate(page.addr()).map(|frame| Mapping {
            frame: PhysFrame::new(frame),
            writable: self.is_writable(page.addr()),
        })
    }

    fn set_mapping(&mut self, page: VirtPage, frame: PhysFrame, writable: bool) -> bool {
        self.map(page.addr(), frame.number(), writable)
    }

    fn clear_mapping(&mut self, page: VirtPage) {
        self.unmap(page.addr());
    }

    fn is_accessed(&self, page: VirtPage) -> bool {
        PageManager::is_accessed(self, page.addr())
    }

    fn clear_accessed(&mut self, page: VirtPage) {
        self.set_accessed(page.addr(), false);
    }

    fn is_dirty(&self, page: VirtPage) -> bool {
        PageManager::is_dirty(self, page.addr())
    }

    fn clear_dirty(&mut self, page: VirtPage) {
        self.set_dirty(page.addr(), false);
    }

    fn record_access(&mut self, page: VirtPage, write: bool) {
        self.touch(page.addr(), write);
    }
}
