use super::address_space::AddressSpace;
use super::fault::{pin_range, unpin_range, FaultError};
use super::frame_table::FrameTable;
use alloc::{vec, vec::Vec};
use kidneyos_shared::mem::OFFSET;

fn check_user_range(pointer: usize, count: usize) -> Result<(), FaultError> {
    // Trying to touch kernel memory.
    match pointer.checked_add(count) {
        Some(range_end) if range_end <= OFFSET => Ok(()),
        _ => Err(FaultError::KernelAddress { addr: pointer }),
    }
}

/// Copies `count` bytes of user memory at `pointer` into a kernel buffer.
///
/// The pages are pinned for the duration of the copy, so this is safe to call
/// while other threads are evicting.
pub fn copy_from_user(
    space: &AddressSpace,
    frames: &FrameTable,
    pointer: usize,
    count: usize,
) -> Result<Vec<u8>, FaultError> {
    check_user_range(pointer, count)?;
    pin_range(space, frames, pointer, count)?;

    let mut bytes = vec![0; count];
    let result = space.read_user(frames, pointer, &mut bytes);
    unpin_range(space, frames, pointer, count);
    result.map(|()| bytes)
}

/// Copies `data` into user memory at `pointer`.
pub fn copy_to_user(
    space: &AddressSpace,
    frames: &FrameTable,
    pointer: usize,
    data: &[u8],
) -> Result<(), FaultError> {
    check_user_range(pointer, data.len())?;
    pin_range(space, frames, pointer, data.len())?;

    let result = space.write_user(frames, pointer, data);
    unpin_range(space, frames, pointer, data.len());
    result
}
