use crate::mem::frame_table::FrameEntry;

pub trait PageReplacementPolicy {
    /// Picks the index of a frame to evict.
    ///
    /// `accessed` reports whether the frame was referenced since it was last
    /// asked about, and clears that bit as a side effect. Pinned and empty
    /// slots are never chosen. Returns `None` if nothing is evictable.
    fn select_victim(
        &mut self,
        frames: &[Option<FrameEntry>],
        accessed: &mut dyn FnMut(&FrameEntry) -> bool,
    ) -> Option<usize>;
}

/// The clock algorithm. The hand survives across calls, so consecutive
/// evictions continue sweeping from where the previous one stopped.
#[derive(Debug, Default)]
pub struct SecondChance {
    hand: usize,
}

impl SecondChance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hand(&self) -> usize {
        self.hand
    }
}

impl PageReplacementPolicy for SecondChance {
    fn select_victim(
        &mut self,
        frames: &[Option<FrameEntry>],
        accessed: &mut dyn FnMut(&FrameEntry) -> bool,
    ) -> Option<usize> {
        if frames.is_empty() {
            return None;
        }

        // Two sweeps are enough: the first clears every accessed bit it
        // passes, so the second finds an unpinned frame if one exists.
        for _ in 0..2 * frames.len() {
            self.hand = (self.hand + 1) % frames.len();

            let Some(entry) = &frames[self.hand] else {
                continue;
            };
            if entry.pinned || accessed(entry) {
                continue;
            }
            return Some(self.hand);
        }

        None
    }
}
