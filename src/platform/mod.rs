//! Shipped [`Lock`](crate::sync::Lock) and [`Condition`](crate::sync::Condition)
//! implementations.
//!
//! - `std`: OS mutex/condvar backed, for a loop driven by a dedicated thread.
//! - `cortex-m` (on `target_arch = "arm"`): interrupt masking and `wfi`, for a
//!   foreground loop fed by interrupt handlers.

#[cfg(feature = "std")]
mod std;

#[cfg(feature = "std")]
pub use self::std::{
    StdCondition,
    StdLock,
};

#[cfg(all(target_arch = "arm", feature = "cortex-m"))]
mod cortex_m;

#[cfg(all(target_arch = "arm", feature = "cortex-m"))]
pub use self::cortex_m::{
    InterruptLock,
    WfiCondition,
};

/// Whether the caller runs in thread mode rather than in an exception
/// handler.
#[cfg(all(target_arch = "arm", feature = "cortex-m"))]
pub fn in_thread_mode() -> bool {
    const SCB_ICSR: *const u32 = 0xE000_ED04 as *const u32;
    // NOTE(unsafe) single-instruction load with no side effects
    unsafe { SCB_ICSR.read_volatile() as u8 == 0 }
}

#[cfg(not(all(target_arch = "arm", feature = "cortex-m")))]
pub fn in_thread_mode() -> bool {
    true
}
