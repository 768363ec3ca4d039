pub const KB: usize = 1024;
pub const MB: usize = KB * KB;

/// Sector size of every block device we drive (IDE, virtio, RAM disk).
pub const SECTOR_SIZE: u32 = 512;

/// Sectors on the swap partition in the default configuration.
pub const SWAP_SECTORS: u32 = 8192;

/// Frames reserved for the kernel pool in the default configuration.
pub const KERNEL_POOL_FRAMES: usize = 256;
/// Frames handed out to user pages in the default configuration.
pub const USER_POOL_FRAMES: usize = 1024;
