//! The system-wide table of user frames.
//!
//! Every physical frame handed to a user page has an entry recording which
//! page of which process it backs. Entries are indexed by frame number. When
//! the user pool runs dry, a victim is picked by the clock policy, written to
//! swap, and its frame handed straight to the new page.

use super::address_space::{AddressSpace, Pid};
use super::frame_allocator::{PageAllocator, PallocFlags};
use super::spt::Reclaim;
use super::{PhysFrame, PhysicalMemory, VirtPage};
use crate::paging::PageMapper;
use crate::swapping::{PageReplacementPolicy, SecondChance, SwapSlot, SwapSpace};
use alloc::{
    boxed::Box,
    collections::BTreeMap,
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
use spin::Mutex;

/// Which page a frame currently backs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameEntry {
    pub owner: Pid,
    pub page: VirtPage,
    pub pinned: bool,
}

/// A frame that no longer backs any page but still belongs to the user pool.
/// Either attach it to another page or release it.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct DetachedFrame(PhysFrame);

impl DetachedFrame {
    pub fn frame(&self) -> PhysFrame {
        self.0
    }
}

struct FrameTableInner {
    allocator: Box<dyn PageAllocator>,
    swap: SwapSpace,
    frames: Box<[Option<FrameEntry>]>,
    clock: SecondChance,
    spaces: BTreeMap<Pid, Weak<AddressSpace>>,
    evictions: usize,
}

pub struct FrameTable {
    memory: Arc<PhysicalMemory>,
    inner: Mutex<FrameTableInner>,
}

impl FrameTable {
    pub fn new(
        memory: Arc<PhysicalMemory>,
        allocator: Box<dyn PageAllocator>,
        swap: SwapSpace,
    ) -> Self {
        log::info!(
            "vm: {} user frames, {} swap slots",
            allocator.free_pages(true),
            swap.slot_count()
        );

        Self {
            inner: Mutex::new(FrameTableInner {
                allocator,
                swap,
                frames: vec![None; memory.len()].into_boxed_slice(),
                clock: SecondChance::new(),
                spaces: BTreeMap::new(),
                evictions: 0,
            }),
            memory,
        }
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Makes `space` reachable from its pid so its frames can be evicted.
    pub fn register(&self, space: &Arc<AddressSpace>) {
        let mut inner = self.inner.lock();
        let pid = space.pid();
        if inner.spaces.get(&pid).and_then(Weak::upgrade).is_some() {
            kernel_fault!("address space {} registered twice", pid);
        }

        // Frames still tagged with this pid belong to a process that went
        // away without tearing down. They must not be mistaken for the new
        // process's pages.
        let orphans: Vec<PhysFrame> = inner
            .frames
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_some_and(|entry| entry.owner == pid))
            .map(|(i, _)| PhysFrame::new(i))
            .collect();
        for &frame in &orphans {
            let detached = inner.detach(frame);
            inner.allocator.free_page(detached.0);
        }
        if !orphans.is_empty() {
            log::debug!("vm: reclaimed {} frames left by exited process {}", orphans.len(), pid);
        }

        inner.spaces.insert(pid, Arc::downgrade(space));
    }

    /// Gets a frame for `page` of process `owner`, evicting another page if
    /// the user pool is empty. The frame comes back pinned; unpin it once its
    /// contents are in place and it is mapped.
    pub fn allocate(&self, owner: Pid, page: VirtPage, zero: bool) -> PhysFrame {
        let mut inner = self.inner.lock();
        let flags = PallocFlags::DEFAULT.with_user(true).with_zero(zero);

        let detached = match inner.allocator.alloc_page(flags) {
            Some(frame) => DetachedFrame(frame),
            None => {
                let detached = inner.evict(&self.memory);
                if zero {
                    self.memory.frame(detached.frame()).fill(0);
                }
                detached
            }
        };

        inner.attach(detached, owner, page)
    }

    /// Reuses a detached frame for `page` of process `owner`. The frame comes
    /// back pinned.
    pub fn attach(&self, detached: DetachedFrame, owner: Pid, page: VirtPage) -> PhysFrame {
        self.inner.lock().attach(detached, owner, page)
    }

    /// Removes the entry for `frame` but keeps the physical page.
    pub fn detach(&self, frame: PhysFrame) -> DetachedFrame {
        self.inner.lock().detach(frame)
    }

    /// Returns a detached frame to the user pool.
    pub fn release(&self, detached: DetachedFrame) {
        self.inner.lock().allocator.free_page(detached.0);
    }

    /// Removes the entry for `frame` and returns it to the user pool.
    pub fn free(&self, frame: PhysFrame) {
        let mut inner = self.inner.lock();
        let detached = inner.detach(frame);
        inner.allocator.free_page(detached.0);
    }

    pub fn pin(&self, frame: PhysFrame) {
        self.inner.lock().entry_mut(frame).pinned = true;
    }

    pub fn unpin(&self, frame: PhysFrame) {
        self.inner.lock().entry_mut(frame).pinned = false;
    }

    /// Pins the frame holding `page` of `space`, if the page is resident.
    ///
    /// The residency check and the pin happen under the frame table lock,
    /// so the page cannot be evicted in between.
    pub fn pin_resident(&self, space: &AddressSpace, page: VirtPage) -> Option<PhysFrame> {
        let mut inner = self.inner.lock();
        let frame = space.pages().lock().lookup(page.addr())?.frame()?;

        let entry = inner.entry_mut(frame);
        if entry.owner != space.pid() || entry.page != page {
            kernel_fault!(
                "{:?} of {} is resident in {:?}, which backs {:?} of {}",
                page,
                space.pid(),
                frame,
                entry.page,
                entry.owner
            );
        }
        entry.pinned = true;
        Some(frame)
    }

    /// Reads `slot` into `frame` and frees the slot.
    pub fn swap_in(&self, slot: SwapSlot, frame: PhysFrame) {
        let mut inner = self.inner.lock();
        inner.swap.read_in(slot, &mut self.memory.frame(frame));
    }

    /// Tears down `space`: unmaps and frees its frames, frees its swap slots
    /// and drops every page record.
    pub fn release_address_space(&self, space: &AddressSpace) {
        let mut inner = self.inner.lock();
        inner.spaces.remove(&space.pid());

        let mut pages = space.pages().lock();
        let mut page_manager = space.page_manager().lock();
        let records = pages.len();

        let mut teardown = Teardown {
            owner: space.pid(),
            inner: &mut *inner,
            page_manager: &mut **page_manager,
            frames: 0,
            slots: 0,
        };
        pages.destroy_all(&mut teardown);

        log::debug!(
            "vm: released address space {} ({} pages, {} frames, {} swap slots)",
            space.pid(),
            records,
            teardown.frames,
            teardown.slots
        );
    }

    pub fn resident_frames(&self) -> usize {
        self.inner.lock().frames.iter().flatten().count()
    }

    pub fn evictions(&self) -> usize {
        self.inner.lock().evictions
    }

    pub fn entry(&self, frame: PhysFrame) -> Option<FrameEntry> {
        self.inner.lock().frames.get(frame.number()).copied().flatten()
    }

    pub fn entries(&self) -> Vec<(PhysFrame, FrameEntry)> {
        self.inner
            .lock()
            .frames
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.map(|entry| (PhysFrame::new(i), entry)))
            .collect()
    }

    pub fn free_user_pages(&self) -> usize {
        self.inner.lock().allocator.free_pages(true)
    }

    pub fn swap_slots_in_use(&self) -> usize {
        self.inner.lock().swap.used_slots()
    }
}

impl FrameTableInner {
    fn entry_mut(&mut self, frame: PhysFrame) -> &mut FrameEntry {
        match self.frames.get_mut(frame.number()) {
            Some(Some(entry)) => entry,
            _ => kernel_fault!("{:?} is not a user frame", frame),
        }
    }

    fn attach(&mut self, detached: DetachedFrame, owner: Pid, page: VirtPage) -> PhysFrame {
        let frame = detached.0;
        let Some(slot) = self.frames.get_mut(frame.number()) else {
            kernel_fault!("{:?} is outside physical memory", frame);
        };
        if let Some(entry) = &*slot {
            kernel_fault!("{:?} already backs {:?}", frame, entry.page);
        }
        *slot = Some(FrameEntry {
            owner,
            page,
            pinned: true,
        });
        frame
    }

    fn detach(&mut self, frame: PhysFrame) -> DetachedFrame {
        match self.frames.get_mut(frame.number()).and_then(Option::take) {
            Some(_) => DetachedFrame(frame),
            None => kernel_fault!("{:?} is not a user frame", frame),
        }
    }

    /// Picks a victim, writes it to swap if its owner is still alive, and
    /// returns its frame.
    fn evict(&mut self, memory: &PhysicalMemory) -> DetachedFrame {
        let spaces = &self.spaces;
        let victim = self.clock.select_victim(&self.frames, &mut |entry| {
            let Some(space) = spaces.get(&entry.owner).and_then(Weak::upgrade) else {
                return false;
            };
            let mut page_manager = space.page_manager().lock();
            let accessed = page_manager.is_accessed(entry.page);
            if accessed {
                page_manager.clear_accessed(entry.page);
            }
            accessed
        });
        let Some(index) = victim else {
            kernel_fault!("out of frames: every user frame is pinned");
        };

        let frame = PhysFrame::new(index);
        let Some(entry) = self.frames[index] else {
            kernel_fault!("clock chose empty {:?}", frame);
        };

        match self.spaces.get(&entry.owner).and_then(Weak::upgrade) {
            Some(space) => {
                let mut pages = space.pages().lock();
                let mut page_manager = space.page_manager().lock();
                page_manager.clear_mapping(entry.page);
                let slot = self.swap.write_out(&memory.frame(frame));
                pages.mark_swapped(entry.page, slot);
                log::debug!(
                    "vm: evicted {:?} of {} from {:?} to {:?}",
                    entry.page,
                    entry.owner,
                    frame,
                    slot
                );
            }
            None => log::debug!(
                "vm: reclaimed {:?} from exited process {}",
                frame,
                entry.owner
            ),
        }

        self.evictions += 1;
        self.detach(frame)
    }
}

/// Hands a dying address space's resources back to the frame table.
struct Teardown<'a> {
    owner: Pid,
    inner: &'a mut FrameTableInner,
    page_manager: &'a mut dyn PageMapper,
    frames: usize,
    slots: usize,
}

impl Reclaim for Teardown<'_> {
    fn reclaim_frame(&mut self, page: VirtPage, frame: PhysFrame) {
        let entry = *self.inner.entry_mut(frame);
        if entry.owner != self.owner || entry.page != page {
            kernel_fault!("{:?} of {} claims {:?}, which backs {:?}", page, self.owner, frame, entry);
        }
        self.page_manager.clear_mapping(page);
        let detached = self.inner.detach(frame);
        self.inner.allocator.free_page(detached.0);
        self.frames += 1;
    }

    fn reclaim_swap_slot(&mut self, slot: SwapSlot) {
        self.inner.swap.free(slot);
        self.slots += 1;
    }
}
