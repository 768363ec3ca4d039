// Halts on a broken VM invariant. Kernel profiles abort on panic, so the
// message goes to the log first.
macro_rules! kernel_fault {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}
