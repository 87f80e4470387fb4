//! Single-consumer event loop over a fixed-capacity task queue.
//!
//! Any number of producers [`post`](EventLoop::post) closures; exactly one
//! context calls [`run`](EventLoop::run), which executes them one at a time
//! in the order the lock admitted them. Posting never blocks waiting for
//! room: a full queue is reported to the producer instead.

use core::{
    fmt::{
        Debug,
        Display,
        Formatter,
    },
    ptr::NonNull,
    sync::atomic::{
        AtomicBool,
        Ordering,
    },
};

use heapless::String;

use crate::{
    platform,
    queue::TaskQueue,
    sync::{
        Condition,
        InterruptGuard,
        Lock,
        LockGuard,
    },
    task::Header,
};

/// Longest name, in bytes, an event loop keeps for its log records.
pub const NAME_CAPACITY: usize = 16;

const DEFAULT_NAME: &str = "event-loop";

/// Errors caused during `post`.
pub enum PostError<F> {
    /// Not enough free units in the queue. Carries the rejected task.
    QueueFull(F),
}

impl<F> PostError<F> {
    /// Recovers the task that could not be posted.
    pub fn into_inner(self) -> F {
        match self {
            PostError::QueueFull(task) => task,
        }
    }
}

impl<F> Debug for PostError<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            PostError::QueueFull(_) => f.write_str("QueueFull(..)"),
        }
    }
}

impl<F> Display for PostError<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            PostError::QueueFull(_) => f.write_str("event loop queue is full"),
        }
    }
}

#[cfg(feature = "std")]
impl<F> std::error::Error for PostError<F> {}

/// Event loop parameterized by its lock, its condition and its queue
/// capacity in [`Unit`](crate::Unit)s.
///
/// The lock and condition are fixed at construction; so is the capacity.
pub struct EventLoop<L, C, const UNITS: usize> {
    name: String<NAME_CAPACITY>,
    queue: TaskQueue<UNITS>,
    lock: L,
    cond: C,
    stopped: AtomicBool,
    running: AtomicBool,
}

// SAFETY: the queue is only touched with `lock` held, except for the record
// being executed, which belongs to the single consumer until it pops it.
unsafe impl<L, C, const UNITS: usize> Sync for EventLoop<L, C, UNITS>
    where L: Lock + Sync,
          C: Condition + Sync,
{}

impl<L, C, const UNITS: usize> EventLoop<L, C, UNITS>
    where L: Lock,
          C: Condition,
{
    pub const fn new(lock: L, cond: C) -> Self {
        Self {
            name: String::new(),
            queue: TaskQueue::new(),
            lock,
            cond,
            stopped: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Tags this loop's log records with `name`, cut to
    /// [`NAME_CAPACITY`] bytes.
    pub fn named(mut self, name: &str) -> Self {
        self.name.clear();
        for c in name.chars() {
            if self.name.push(c).is_err() {
                break;
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_NAME
        } else {
            self.name.as_str()
        }
    }

    pub fn lock(&self) -> &L {
        &self.lock
    }

    pub fn condition(&self) -> &C {
        &self.cond
    }

    /// Queue capacity in units.
    pub fn capacity(&self) -> usize {
        UNITS
    }

    /// Racy: only a hint when read outside the loop's own tasks.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Posts `task` for execution. Returns `false` if the queue is full.
    pub fn post<F>(&self, task: F) -> bool
        where
            F: FnOnce() + Send + 'static,
    {
        self.try_post(task).is_ok()
    }

    /// Like [`EventLoop::post`], but hands a rejected task back.
    pub fn try_post<F>(&self, task: F) -> Result<(), PostError<F>>
        where
            F: FnOnce() + Send + 'static,
    {
        let _guard = LockGuard::new(&self.lock);
        // SAFETY: the lock is held
        unsafe { self.try_post_no_lock(task) }
    }

    /// Posts `task` without taking the lock.
    ///
    /// # Safety
    ///
    /// The caller must hold [`EventLoop::lock`], typically through its
    /// interrupt-context entry point.
    pub unsafe fn post_no_lock<F>(&self, task: F) -> bool
        where
            F: FnOnce() + Send + 'static,
    {
        self.try_post_no_lock(task).is_ok()
    }

    /// Like [`EventLoop::post_no_lock`], but hands a rejected task back.
    ///
    /// # Safety
    ///
    /// Same as [`EventLoop::post_no_lock`].
    pub unsafe fn try_post_no_lock<F>(&self, task: F) -> Result<(), PostError<F>>
        where
            F: FnOnce() + Send + 'static,
    {
        let was_empty = self.queue.is_empty();
        match self.queue.push(task) {
            Ok(()) => {
                log::trace!("{}: posted, {}/{} units used", self.name(), self.queue.len(), UNITS);
                if was_empty {
                    self.cond.notify();
                }
                Ok(())
            }
            Err(task) => {
                log::warn!("{}: queue full, {} units free", self.name(), self.queue.free());
                Err(PostError::QueueFull(task))
            }
        }
    }

    /// Posts from an interrupt handler, through the lock's interrupt-context
    /// entry point.
    pub fn post_from_interrupt<F>(&self, task: F) -> bool
        where
            F: FnOnce() + Send + 'static,
    {
        let _guard = InterruptGuard::new(&self.lock);
        // SAFETY: the lock is held
        unsafe { self.post_no_lock(task) }
    }

    /// Executes posted tasks until [`EventLoop::stop`] is observed, then
    /// drains what was pending at that point and returns.
    ///
    /// Sleeps on the condition whenever the queue is empty. Must only be
    /// called from one context at a time.
    pub fn run(&self) {
        debug_assert!(platform::in_thread_mode(), "event loop run from an interrupt handler");
        log::debug!("{}: running", self.name());

        let mut guard = LockGuard::new(&self.lock);
        let _running = Running::enter(&self.running);
        loop {
            if self.stopped.load(Ordering::Relaxed) {
                self.drain(&mut guard);
                break;
            }
            match self.queue.front() {
                Some(header) => {
                    self.execute(&mut guard, header);
                }
                None => self.cond.wait(guard.lock_ref()),
            }
        }

        log::debug!("{}: stopped", self.name());
    }

    // Runs the units pending right now, not the ones they post.
    fn drain(&self, guard: &mut LockGuard<'_, L>) {
        let mut remaining = self.queue.len();
        log::debug!("{}: stop requested, draining {} units", self.name(), remaining);
        while remaining > 0 {
            let before = self.queue.len();
            let header = match self.queue.front() {
                Some(header) => header,
                None => break,
            };
            remaining -= before - self.queue.len();
            remaining -= self.execute(guard, header);
        }
    }

    // Called with the lock held, returns with it held.
    fn execute(&self, guard: &mut LockGuard<'_, L>, header: NonNull<Header>) -> usize {
        // SAFETY: `front` only yields records at the read cursor, which no
        // producer touches; the consumer owns it until popped
        unsafe {
            log::trace!("{}: executing {}-unit task", self.name(), Header::footprint_units(header));
            guard.unlock();
            let units = Header::execute(header);
            guard.relock();
            self.queue.pop_front(units);
            units
        }
    }

    /// Asks [`EventLoop::run`] to return. Tasks already pending when the
    /// request is noticed still run.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.cond.notify();
    }

    /// Whether [`EventLoop::run`] is active, including while it sleeps.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drops all pending tasks without running them and clears the stop
    /// request, so the loop can run again.
    ///
    /// Returns `false`, changing nothing, while [`EventLoop::run`] is active.
    /// Dropped tasks must not post from their destructors: the lock is held
    /// meanwhile.
    pub fn reset(&self) -> bool {
        let _guard = LockGuard::new(&self.lock);
        if self.running.load(Ordering::Acquire) {
            log::warn!("{}: reset refused while running", self.name());
            return false;
        }
        log::debug!("{}: reset, discarding {} units", self.name(), self.queue.len());
        self.stopped.store(false, Ordering::Relaxed);
        self.queue.clear();
        true
    }
}

// Marks `run` active; cleared on return and on unwind. Set with the lock
// held.
struct Running<'a>(&'a AtomicBool);

impl<'a> Running<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        let nested = flag.swap(true, Ordering::AcqRel);
        debug_assert!(!nested, "event loop run from two contexts");
        Running(flag)
    }
}

impl<'a> Drop for Running<'a> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<L, C, const UNITS: usize> Default for EventLoop<L, C, UNITS>
    where L: Lock + Default,
          C: Condition + Default,
{
    fn default() -> Self {
        Self::new(L::default(), C::default())
    }
}

impl<L, C, const UNITS: usize> Debug for EventLoop<L, C, UNITS> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "EventLoop@{:?}", self as *const Self)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::{EventLoop, PostError};
    use crate::platform::{StdCondition, StdLock};
    use crate::sync::{Condition, Lock};
    use crate::StdEventLoop;
    use simple_logger::SimpleLogger;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn init_logger() {
        let _ = SimpleLogger::new().with_level(log::LevelFilter::Debug).init();
    }

    fn bump(event_loop: Arc<StdEventLoop<16>>, counter: Arc<AtomicU32>) {
        if counter.fetch_add(1, Ordering::Relaxed) + 1 == 100 {
            event_loop.stop();
        } else {
            let next = event_loop.clone();
            assert!(event_loop.post(move || bump(next, counter)));
        }
    }

    #[test]
    fn self_reposting_task_counts_to_100() {
        init_logger();
        let event_loop = Arc::new(StdEventLoop::<16>::default().named("repost"));
        let counter = Arc::new(AtomicU32::new(0));

        let (l, c) = (event_loop.clone(), counter.clone());
        assert!(event_loop.post(move || bump(l, c)));
        event_loop.run();

        assert_eq!(100, counter.load(Ordering::Relaxed));
        assert!(event_loop.is_stopped());
    }

    #[test]
    fn two_producers_lose_no_increments() {
        init_logger();
        let event_loop = Arc::new(StdEventLoop::<32>::default());
        let counter = Arc::new(AtomicU32::new(0));

        let consumer = {
            let event_loop = event_loop.clone();
            thread::spawn(move || event_loop.run())
        };

        let producers: Vec<_> = (0..2)
            .map(|_| {
                let event_loop = event_loop.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let (l, c) = (event_loop.clone(), counter.clone());
                        let mut task = move || {
                            if c.fetch_add(1, Ordering::Relaxed) + 1 == 200 {
                                l.stop();
                            }
                        };
                        loop {
                            match event_loop.try_post(task) {
                                Ok(()) => break,
                                Err(e) => {
                                    task = e.into_inner();
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        consumer.join().unwrap();

        assert_eq!(200, counter.load(Ordering::Relaxed));
    }

    #[test]
    fn wrapping_tasks_run_once_in_order() {
        init_logger();
        static LOG: Mutex<heapless::Vec<u64, 128>> = Mutex::new(heapless::Vec::new());

        let event_loop = Arc::new(StdEventLoop::<10>::default());
        let consumer = {
            let event_loop = event_loop.clone();
            thread::spawn(move || event_loop.run())
        };

        let mut expected = heapless::Vec::<u64, 128>::new();
        for i in 0..60u64 {
            if i % 7 == 3 {
                let values = [i, 1000, 2000];
                let mut task = move || LOG.lock().unwrap().push(values.iter().sum()).unwrap();
                while let Err(e) = event_loop.try_post(task) {
                    task = e.into_inner();
                    thread::yield_now();
                }
                expected.push(i + 3000).unwrap();
            } else {
                while !event_loop.post(|| LOG.lock().unwrap().push(1).unwrap()) {
                    thread::yield_now();
                }
                expected.push(1).unwrap();
            }
        }
        event_loop.stop();
        consumer.join().unwrap();

        assert_eq!(&expected[..], &LOG.lock().unwrap()[..]);
    }

    #[test]
    fn post_fails_when_full_without_side_effects() {
        init_logger();
        static HITS: AtomicUsize = AtomicUsize::new(0);

        let event_loop = StdEventLoop::<8>::default();
        for _ in 0..8 {
            assert!(event_loop.post(|| {
                HITS.fetch_add(1, Ordering::Relaxed);
            }));
        }
        let rejected = event_loop.try_post(|| {
            HITS.fetch_add(100, Ordering::Relaxed);
        });
        assert!(matches!(rejected, Err(PostError::QueueFull(_))));
        assert!(!event_loop.post(|| {}));

        event_loop.stop();
        event_loop.run();
        assert_eq!(8, HITS.load(Ordering::Relaxed));
    }

    #[test]
    fn stop_from_task_drains_pending_then_reset_allows_rerun() {
        init_logger();
        static LOG: Mutex<heapless::Vec<u32, 16>> = Mutex::new(heapless::Vec::new());

        let event_loop = Arc::new(StdEventLoop::<32>::default());
        let late_ran = Arc::new(AtomicBool::new(false));

        let l = event_loop.clone();
        assert!(event_loop.post(move || {
            LOG.lock().unwrap().push(1).unwrap();
            l.stop();
        }));
        let (l, late) = (event_loop.clone(), late_ran.clone());
        assert!(event_loop.post(move || {
            LOG.lock().unwrap().push(2).unwrap();
            // posted after the stop was noticed: left for reset
            assert!(l.post(move || late.store(true, Ordering::Relaxed)));
        }));
        assert!(event_loop.post(|| LOG.lock().unwrap().push(3).unwrap()));

        event_loop.run();
        assert_eq!(&[1, 2, 3][..], &LOG.lock().unwrap()[..]);
        assert!(!late_ran.load(Ordering::Relaxed));

        assert!(event_loop.reset());
        assert!(!event_loop.is_stopped());
        assert_eq!(1, Arc::strong_count(&late_ran));

        let l = event_loop.clone();
        assert!(event_loop.post(move || {
            LOG.lock().unwrap().push(4).unwrap();
            l.stop();
        }));
        event_loop.run();
        assert_eq!(&[1, 2, 3, 4][..], &LOG.lock().unwrap()[..]);
        assert!(!late_ran.load(Ordering::Relaxed));
    }

    #[test]
    fn reset_is_refused_while_running() {
        init_logger();
        let event_loop = Arc::new(StdEventLoop::<16>::default());
        let refused = Arc::new(AtomicBool::new(false));
        let later = Arc::new(AtomicU32::new(0));

        let (l, r, c) = (event_loop.clone(), refused.clone(), later.clone());
        assert!(event_loop.post(move || {
            assert!(l.is_running());
            r.store(!l.reset(), Ordering::Relaxed);
            let inner = l.clone();
            assert!(l.post(move || {
                c.fetch_add(1, Ordering::Relaxed);
                inner.stop();
            }));
        }));
        let c = later.clone();
        assert!(event_loop.post(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }));

        event_loop.run();
        assert!(refused.load(Ordering::Relaxed));
        assert_eq!(2, later.load(Ordering::Relaxed));
        assert!(!event_loop.is_running());
        assert!(event_loop.reset());
    }

    #[test]
    fn run_wakes_for_work_posted_while_waiting() {
        init_logger();
        let event_loop = Arc::new(StdEventLoop::<16>::default());
        let counter = Arc::new(AtomicU32::new(0));

        let consumer = {
            let event_loop = event_loop.clone();
            thread::spawn(move || event_loop.run())
        };

        for _ in 0..10 {
            thread::sleep(std::time::Duration::from_millis(2));
            let c = counter.clone();
            assert!(event_loop.post(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }));
        }
        let l = event_loop.clone();
        assert!(event_loop.post(move || l.stop()));
        consumer.join().unwrap();

        assert_eq!(10, counter.load(Ordering::Relaxed));
    }

    #[test]
    fn post_from_interrupt_and_no_lock() {
        init_logger();
        static HITS: AtomicUsize = AtomicUsize::new(0);

        let event_loop = StdEventLoop::<8>::default();
        assert!(event_loop.post_from_interrupt(|| {
            HITS.fetch_add(1, Ordering::Relaxed);
        }));

        event_loop.lock().lock();
        // SAFETY: lock held just above
        let posted = unsafe {
            event_loop.post_no_lock(|| {
                HITS.fetch_add(10, Ordering::Relaxed);
            })
        };
        // what a driver does after posting on its own
        event_loop.condition().notify();
        event_loop.lock().unlock();
        assert!(posted);

        event_loop.stop();
        event_loop.run();
        assert_eq!(11, HITS.load(Ordering::Relaxed));
    }

    #[test]
    fn panicking_task_leaves_loop_usable() {
        init_logger();
        static HITS: AtomicUsize = AtomicUsize::new(0);

        let event_loop = StdEventLoop::<8>::default();
        assert!(event_loop.post(|| panic!("task failure")));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| event_loop.run()));
        assert!(outcome.is_err());
        assert!(!event_loop.is_running());

        assert!(event_loop.post(|| {
            HITS.fetch_add(1, Ordering::Relaxed);
        }));
        event_loop.stop();
        event_loop.run();
        assert_eq!(1, HITS.load(Ordering::Relaxed));
    }

    #[test]
    fn dropping_loop_drops_pending_tasks() {
        let payload = Arc::new(());
        {
            let event_loop = StdEventLoop::<8>::default();
            let held = payload.clone();
            assert!(event_loop.post(move || drop(held)));
            assert_eq!(2, Arc::strong_count(&payload));
        }
        assert_eq!(1, Arc::strong_count(&payload));
    }

    #[test]
    fn static_loop_from_byte_budget() {
        init_logger();
        crate::event_loop!(LOOP: StdLock, StdCondition, 256);
        static HITS: AtomicUsize = AtomicUsize::new(0);

        assert_eq!(256 / crate::Unit::SIZE, LOOP.capacity());
        for _ in 0..3 {
            assert!(LOOP.post(|| {
                HITS.fetch_add(1, Ordering::Relaxed);
            }));
        }
        assert!(LOOP.post(|| LOOP.stop()));
        LOOP.run();
        assert_eq!(3, HITS.load(Ordering::Relaxed));
    }

    #[test]
    fn names_are_truncated() {
        let unnamed: EventLoop<StdLock, StdCondition, 4> = EventLoop::new(StdLock::new(), StdCondition::new());
        assert_eq!("event-loop", unnamed.name());

        let named = unnamed.named("a-rather-long-loop-name");
        assert_eq!("a-rather-long-lo", named.name());
    }
}
