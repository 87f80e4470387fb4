//! Locking and signalling capabilities consumed by the event loop.
//!
//! The loop never decides *how* mutual exclusion or sleeping happens. On a
//! bare-metal target the lock usually masks interrupts and the condition
//! sleeps the core until the next interrupt; on a hosted target they are
//! backed by OS primitives. See [`crate::platform`] for the shipped
//! implementations.

use core::marker::PhantomData;

/// Mutual exclusion over the loop's queue.
///
/// Unlike `std::sync::Mutex`, locking is not tied to a guard's lifetime so
/// that [`Condition::wait`] can release and reacquire it. Use [`LockGuard`]
/// for scoped locking.
pub trait Lock {
    /// Blocks (or masks interrupts) until exclusive access is held.
    fn lock(&self);

    /// Releases exclusive access previously taken with [`Lock::lock`].
    fn unlock(&self);

    /// Entry point for interrupt handlers. Must provide the same exclusion as
    /// [`Lock::lock`] without ever blocking on the interrupted context.
    fn lock_interrupt_ctx(&self) {
        self.lock()
    }

    /// Counterpart of [`Lock::lock_interrupt_ctx`].
    fn unlock_interrupt_ctx(&self) {
        self.unlock()
    }
}

/// Wait/notify signalling paired with a [`Lock`].
pub trait Condition {
    /// Called with `lock` held. Releases it, suspends until notified and
    /// reacquires it before returning.
    ///
    /// A [`Condition::notify`] that happened before this call must make it
    /// return promptly. Spurious returns are allowed.
    fn wait<L: Lock>(&self, lock: &L);

    /// Wakes the waiting context, or the next one to call `wait`.
    fn notify(&self);
}

/// Scoped hold of a [`Lock`].
///
/// Besides releasing on drop, the guard can be temporarily released with
/// [`LockGuard::unlock`] and taken again with [`LockGuard::relock`]. A panic
/// while released does not unlock twice.
pub struct LockGuard<'a, L: Lock> {
    lock: &'a L,
    held: bool,
    // lock ownership belongs to the context that took it
    _not_send: PhantomData<*const ()>,
}

impl<'a, L: Lock> LockGuard<'a, L> {
    pub fn new(lock: &'a L) -> Self {
        lock.lock();
        Self {
            lock,
            held: true,
            _not_send: PhantomData,
        }
    }

    pub fn unlock(&mut self) {
        debug_assert!(self.held);
        self.held = false;
        self.lock.unlock();
    }

    pub fn relock(&mut self) {
        debug_assert!(!self.held);
        self.lock.lock();
        self.held = true;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// The guarded lock, e.g. to hand to [`Condition::wait`].
    pub fn lock_ref(&self) -> &'a L {
        self.lock
    }
}

impl<'a, L: Lock> Drop for LockGuard<'a, L> {
    fn drop(&mut self) {
        if self.held {
            self.lock.unlock();
        }
    }
}

/// Scoped hold of a [`Lock`] through its interrupt-context entry point.
pub struct InterruptGuard<'a, L: Lock> {
    lock: &'a L,
    _not_send: PhantomData<*const ()>,
}

impl<'a, L: Lock> InterruptGuard<'a, L> {
    pub fn new(lock: &'a L) -> Self {
        lock.lock_interrupt_ctx();
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl<'a, L: Lock> Drop for InterruptGuard<'a, L> {
    fn drop(&mut self) {
        self.lock.unlock_interrupt_ctx();
    }
}
