use alloc::vec::Vec;

/// An opened file that user pages can be demand-loaded from. One handle is
/// shared by every page record that points into the same executable.
pub trait FileHandle: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at byte `offset` and returns how
    /// many were read. A short count means the file ended first.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;
}

/// A file held entirely in kernel memory.
pub struct RamFile {
    data: Vec<u8>,
}

impl RamFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl FileHandle for RamFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Ok(start) = usize::try_from(offset) else {
            return 0;
        };
        let Some(available) = self.data.get(start..) else {
            return 0;
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        n
    }
}
