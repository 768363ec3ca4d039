#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
mod macros;

pub mod block;
pub mod drivers;
pub mod fs;
pub mod mem;
pub mod paging;
pub mod swapping;
pub mod system;
pub mod user_program;

extern crate alloc;
