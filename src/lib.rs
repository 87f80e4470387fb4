//! A fixed-capacity, allocation-free event loop for bare-metal and hosted
//! targets.
//!
//! Producers (threads or interrupt handlers) post closures; a single consumer
//! runs them in order. Closures are stored in place in a circular buffer of
//! [`Unit`]s sized at compile time, so posting never allocates and never
//! blocks waiting for room.
//!
//! ```no_run
//! # #[cfg(feature = "std")] {
//! use drogue_event_loop::{event_loop, platform::{StdCondition, StdLock}};
//!
//! event_loop!(LOOP: StdLock, StdCondition, 1024);
//!
//! LOOP.post(|| log::info!("hello from the loop"));
//! LOOP.post(|| LOOP.stop());
//! LOOP.run();
//! # }
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub extern crate heapless;

pub mod event_loop;
pub mod platform;
pub mod queue;
pub mod sync;

mod task;

pub use crate::{
    event_loop::{
        EventLoop,
        PostError,
    },
    queue::TaskQueue,
    sync::{
        Condition,
        Lock,
    },
    task::{
        footprint_of,
        units_for,
        Unit,
    },
};

/// Event loop for threaded deployments.
#[cfg(feature = "std")]
pub type StdEventLoop<const UNITS: usize> = EventLoop<platform::StdLock, platform::StdCondition, UNITS>;

/// Declares a `static` event loop from a byte budget.
///
/// The lock and condition types must provide a `const fn new()`.
///
/// ```no_run
/// # #[cfg(feature = "std")] {
/// use drogue_event_loop::{event_loop, platform::{StdCondition, StdLock}};
///
/// event_loop!(pub LOOP: StdLock, StdCondition, 512);
/// # }
/// ```
#[macro_export]
macro_rules! event_loop {
    ($(#[$attr:meta])* $vis:vis $name:ident: $lock:ty, $cond:ty, $bytes:expr) => {
        $(#[$attr])*
        $vis static $name: $crate::EventLoop<$lock, $cond, { $crate::units_for($bytes) }> =
            $crate::EventLoop::new(<$lock>::new(), <$cond>::new());
    };
}
