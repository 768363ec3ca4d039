use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address. User stacks
// start just below it and grow down.
pub const OFFSET: usize = 0x80000000;

/// How far a user stack may grow below `OFFSET`.
pub const STACK_MAX_SIZE: usize = 8 * MB;

/// How far below the stack pointer a fault may land and still be treated as a
/// stack access. `pusha` writes 32 bytes below esp before adjusting it.
pub const STACK_SLACK: usize = 32;

/// Rounds `addr` down to the start of its page.
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

/// Offset of `addr` within its page.
#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_user_address(addr: usize) -> bool {
    addr < OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_round_down() {
        assert_eq!(page_round_down(0), 0);
        assert_eq!(page_round_down(PAGE_FRAME_SIZE - 1), 0);
        assert_eq!(page_round_down(PAGE_FRAME_SIZE), PAGE_FRAME_SIZE);
        assert_eq!(page_round_down(0x0804_8123), 0x0804_8000);
        assert_eq!(page_offset(0x0804_8123), 0x123);
    }

    #[test]
    fn test_user_address_boundary() {
        assert!(is_user_address(OFFSET - 1));
        assert!(!is_user_address(OFFSET));
    }
}
