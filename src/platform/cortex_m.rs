use core::sync::atomic::{
    AtomicBool,
    Ordering,
};

use ::cortex_m::{
    asm,
    interrupt,
    register::primask,
};

use crate::sync::{
    Condition,
    Lock,
};

/// Masks interrupts (PRIMASK) while held. Single-core only.
///
/// Unlocking restores the mask state found when locking, so the lock can be
/// taken with interrupts already disabled.
pub struct InterruptLock {
    restore: AtomicBool,
    restore_irq: AtomicBool,
}

impl InterruptLock {
    pub const fn new() -> Self {
        Self {
            restore: AtomicBool::new(false),
            restore_irq: AtomicBool::new(false),
        }
    }
}

impl Default for InterruptLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock for InterruptLock {
    fn lock(&self) {
        let active = primask::read().is_active();
        interrupt::disable();
        self.restore.store(active, Ordering::Relaxed);
    }

    fn unlock(&self) {
        if self.restore.load(Ordering::Relaxed) {
            // SAFETY: interrupts were enabled when the lock was taken
            unsafe { interrupt::enable() }
        }
    }

    // A handler can be preempted by a higher priority one, so it masks too,
    // keeping its own restore state apart from thread mode's.
    fn lock_interrupt_ctx(&self) {
        let active = primask::read().is_active();
        interrupt::disable();
        self.restore_irq.store(active, Ordering::Relaxed);
    }

    fn unlock_interrupt_ctx(&self) {
        if self.restore_irq.load(Ordering::Relaxed) {
            // SAFETY: interrupts were enabled when the handler took the lock
            unsafe { interrupt::enable() }
        }
    }
}

/// Sleeps the core until the next interrupt.
///
/// `wait` runs `wfi` while interrupts are still masked: an interrupt that
/// becomes pending wakes the core without being serviced, and only runs once
/// the lock is released. Nothing raised in between can be missed.
pub struct WfiCondition {
    pending: AtomicBool,
}

impl WfiCondition {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }
}

impl Default for WfiCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition for WfiCondition {
    fn wait<L: Lock>(&self, lock: &L) {
        if !self.pending.load(Ordering::Relaxed) {
            asm::wfi();
        }
        self.pending.store(false, Ordering::Relaxed);
        lock.unlock();
        lock.lock();
    }

    fn notify(&self) {
        self.pending.store(true, Ordering::Relaxed);
    }
}
