//! Fixed-capacity circular queue of variable-sized task records.
//!
//! Storage is an array of [`Unit`]s. A record of N units always occupies N
//! contiguous units; it is never split across the physical end of storage.
//!
//! Allocation rule for a record of N units:
//!
//! 1. If fewer than N units are free, fail.
//! 2. If the occupied units do not wrap and the free run before the physical
//!    end is non-empty but shorter than N, fill that run with 1-unit padding
//!    records and place the record at the physical start. This needs at least
//!    N free units before the read cursor, otherwise fail. An empty queue
//!    simply rewinds to the start instead of padding.
//! 3. Otherwise place the record at the write cursor.
//!
//! A failed reservation never touches the queue.

use core::{
    cell::{
        Cell,
        UnsafeCell,
    },
    fmt::{
        Debug,
        Formatter,
    },
    mem::MaybeUninit,
    ptr::NonNull,
};

use crate::task::{
    Header,
    Record,
    Unit,
};

/// Where a record of a given size would be placed.
///
/// Only valid until the queue is next modified.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    start: usize,
    padding: usize,
    units: usize,
    rewind: bool,
}

impl Reservation {
    /// Index of the first unit of the record.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Units of padding written in front of the record on publish.
    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn units(&self) -> usize {
        self.units
    }
}

pub struct TaskQueue<const UNITS: usize> {
    storage: UnsafeCell<MaybeUninit<[Unit; UNITS]>>,
    head: Cell<usize>,
    len: Cell<usize>,
}

impl<const UNITS: usize> TaskQueue<UNITS> {
    pub const fn new() -> Self {
        Self {
            storage: UnsafeCell::new(MaybeUninit::uninit()),
            head: Cell::new(0),
            len: Cell::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        UNITS
    }

    /// Occupied units, padding included.
    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn free(&self) -> usize {
        UNITS - self.len.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }

    /// Whether the occupied units form one span without crossing the
    /// physical end of storage.
    pub fn is_linearised(&self) -> bool {
        self.head.get() + self.len.get() <= UNITS
    }

    fn write_index(&self) -> usize {
        let end = self.head.get() + self.len.get();
        if end >= UNITS {
            end - UNITS
        } else {
            end
        }
    }

    fn slot(&self, index: usize) -> NonNull<Unit> {
        debug_assert!(index < UNITS);
        // SAFETY: in bounds of the storage array, which is never null
        unsafe { NonNull::new_unchecked((self.storage.get() as *mut Unit).add(index)) }
    }

    /// Plans the placement of a record of `units` units.
    pub fn try_reserve(&self, units: usize) -> Option<Reservation> {
        if units == 0 || units > self.free() {
            return None;
        }

        let head = self.head.get();
        let end = head + self.len.get();
        if end < UNITS {
            let tail = UNITS - end;
            if tail < units {
                if self.is_empty() {
                    return Some(Reservation { start: 0, padding: 0, units, rewind: true });
                }
                if head < units {
                    return None;
                }
                return Some(Reservation { start: 0, padding: tail, units, rewind: false });
            }
        }

        Some(Reservation {
            start: self.write_index(),
            padding: 0,
            units,
            rewind: false,
        })
    }

    /// First unit of the reserved span, to write the record into.
    pub fn reserved_slot(&self, reservation: &Reservation) -> NonNull<Unit> {
        self.slot(reservation.start)
    }

    /// Commits a reservation, padding included.
    ///
    /// # Safety
    ///
    /// `reservation` must come from the latest [`TaskQueue::try_reserve`] with
    /// no modification since, and a complete record of exactly
    /// `reservation.units()` units must have been written at
    /// [`TaskQueue::reserved_slot`].
    pub unsafe fn publish(&self, reservation: Reservation) {
        if reservation.rewind {
            self.head.set(0);
        }
        let write = self.write_index();
        for i in 0..reservation.padding {
            Header::write_padding(self.slot(write + i));
        }
        debug_assert_eq!(reservation.start, (write + reservation.padding) % UNITS);
        self.len.set(self.len.get() + reservation.padding + reservation.units);
    }

    /// Moves `task` into the queue, or hands it back if there is no room.
    pub fn push<F>(&self, task: F) -> Result<(), F>
        where
            F: FnOnce() + Send + 'static,
    {
        match self.try_reserve(Record::<F>::UNITS) {
            Some(reservation) => {
                // SAFETY: the reservation is fresh and spans Record::<F>::UNITS units
                unsafe {
                    Record::write(self.reserved_slot(&reservation), task);
                    self.publish(reservation);
                }
                Ok(())
            }
            None => Err(task),
        }
    }

    /// Oldest live record. Leading padding is released on the way.
    pub(crate) fn front(&self) -> Option<NonNull<Header>> {
        while !self.is_empty() {
            let header = self.slot(self.head.get()).cast::<Header>();
            // SAFETY: occupied units at the read cursor always start a record
            unsafe {
                if !Header::is_padding(header) {
                    return Some(header);
                }
                self.pop_front(1);
            }
        }
        None
    }

    /// Releases `units` units at the read cursor.
    ///
    /// # Safety
    ///
    /// `units` must be the footprint of the record at the read cursor, which
    /// must have been executed or discarded already.
    pub unsafe fn pop_front(&self, units: usize) {
        debug_assert!(units <= self.len.get());
        self.head.set((self.head.get() + units) % UNITS);
        self.len.set(self.len.get() - units);
    }

    /// Runs the oldest task and releases its units. Returns `false` if the
    /// queue held no task.
    pub fn execute_front(&self) -> bool {
        match self.front() {
            Some(header) => {
                // SAFETY: `front` only yields live records
                unsafe {
                    let units = Header::execute(header);
                    self.pop_front(units);
                }
                true
            }
            None => false,
        }
    }

    /// Drops every pending task without running it. Cursors stay where they
    /// are.
    pub fn clear(&self) {
        while !self.is_empty() {
            let header = self.slot(self.head.get()).cast::<Header>();
            // SAFETY: occupied units at the read cursor always start a record
            unsafe {
                let units = Header::discard(header);
                self.pop_front(units);
            }
        }
    }
}

impl<const UNITS: usize> Default for TaskQueue<UNITS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const UNITS: usize> Drop for TaskQueue<UNITS> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<const UNITS: usize> Debug for TaskQueue<UNITS> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("capacity", &UNITS)
            .field("head", &self.head.get())
            .field("len", &self.len.get())
            .finish()
    }
}
