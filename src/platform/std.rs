use parking_lot::{
    lock_api::RawMutex as _,
    Condvar,
    Mutex,
    RawMutex,
};

use crate::sync::{
    Condition,
    Lock,
};

/// Raw (guard-less) lock for threaded deployments.
///
/// Not reentrant. Interrupt-context entry is the same as a plain lock.
pub struct StdLock {
    raw: RawMutex,
}

impl StdLock {
    pub const fn new() -> Self {
        Self {
            raw: RawMutex::INIT,
        }
    }
}

impl Default for StdLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock for StdLock {
    fn lock(&self) {
        self.raw.lock();
    }

    fn unlock(&self) {
        debug_assert!(self.raw.is_locked(), "unlocking a lock that is not held");
        // SAFETY: `Lock` pairs every unlock with a lock taken by the same
        // context
        unsafe { self.raw.unlock() }
    }
}

/// Condition with a sticky notification.
///
/// A `notify` with nobody waiting is remembered and consumed by the next
/// `wait`.
pub struct StdCondition {
    pending: Mutex<bool>,
    signal: Condvar,
}

impl StdCondition {
    pub const fn new() -> Self {
        Self {
            pending: parking_lot::const_mutex(false),
            signal: Condvar::new(),
        }
    }
}

impl Default for StdCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition for StdCondition {
    fn wait<L: Lock>(&self, lock: &L) {
        // taken before `lock` is released so a notify in between is not missed
        let mut pending = self.pending.lock();
        lock.unlock();
        while !*pending {
            self.signal.wait(&mut pending);
        }
        *pending = false;
        drop(pending);
        lock.lock();
    }

    fn notify(&self) {
        *self.pending.lock() = true;
        self.signal.notify_all();
    }
}
