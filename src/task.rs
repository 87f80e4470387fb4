//! Type-erased task records, written in place into queue storage.
//!
//! A record is a [`Header`] followed by the captured closure. The header holds
//! a reference to a per-closure-type [`TaskVTable`], in the same spirit as a
//! `RawWakerVTable`, so the queue can execute, discard and measure a record
//! without knowing its concrete type.

use core::{
    mem::{
        self,
        ManuallyDrop,
        MaybeUninit,
    },
    ptr::{
        self,
        NonNull,
    },
};

/// Allocation granule of the task queue.
///
/// Sized and aligned for one record [`Header`]. The alignment is fixed at 8
/// on every target so closures capturing `u64` still fit on 32-bit cores.
#[repr(C, align(8))]
#[derive(Copy, Clone)]
pub struct Unit(MaybeUninit<[u8; 8]>);

impl Unit {
    pub const SIZE: usize = mem::size_of::<Unit>();

    #[cfg(test)]
    pub(crate) const UNINIT: Unit = Unit(MaybeUninit::uninit());
}

const _: () = assert!(mem::size_of::<Header>() <= Unit::SIZE);
const _: () = assert!(mem::align_of::<Header>() <= mem::align_of::<Unit>());

/// Number of whole units that fit in a budget of `bytes` bytes.
pub const fn units_for(bytes: usize) -> usize {
    bytes / Unit::SIZE
}

const fn units_covering(bytes: usize) -> usize {
    (bytes + Unit::SIZE - 1) / Unit::SIZE
}

/// Number of units a task of type `F` occupies once posted.
pub const fn footprint_of<F>() -> usize {
    units_covering(mem::size_of::<Record<F>>())
}

pub(crate) struct TaskVTable {
    execute: unsafe fn(NonNull<Header>),
    discard: unsafe fn(NonNull<Header>),
    units: usize,
}

/// Skip record filling a short run before the physical end of storage.
static PADDING: TaskVTable = TaskVTable {
    execute: noop,
    discard: noop,
    units: 1,
};

unsafe fn noop(_: NonNull<Header>) {}

#[repr(C)]
pub(crate) struct Header {
    vtable: &'static TaskVTable,
}

impl Header {
    /// # Safety
    ///
    /// `slot` must be valid for writing one [`Unit`].
    pub(crate) unsafe fn write_padding(slot: NonNull<Unit>) {
        slot.cast::<Header>().as_ptr().write(Header { vtable: &PADDING });
    }

    /// # Safety
    ///
    /// `this` must point to a live record.
    pub(crate) unsafe fn is_padding(this: NonNull<Header>) -> bool {
        ptr::eq(this.as_ref().vtable, &PADDING)
    }

    /// Runs the record's closure, consuming it. Returns the number of units
    /// the record occupies, which the caller still has to release.
    ///
    /// # Safety
    ///
    /// `this` must point to a record. Once executed the record is spent:
    /// executing or discarding it again is a no-op, so a task that unwinds
    /// leaves nothing behind to run twice.
    pub(crate) unsafe fn execute(this: NonNull<Header>) -> usize {
        let vtable = this.as_ref().vtable;
        (vtable.execute)(this);
        vtable.units
    }

    /// Drops the record's closure without running it. Returns the footprint
    /// like [`Header::execute`].
    ///
    /// # Safety
    ///
    /// Same as [`Header::execute`].
    pub(crate) unsafe fn discard(this: NonNull<Header>) -> usize {
        let vtable = this.as_ref().vtable;
        (vtable.discard)(this);
        vtable.units
    }

    /// # Safety
    ///
    /// `this` must point to a record header, live or already executed.
    pub(crate) unsafe fn footprint_units(this: NonNull<Header>) -> usize {
        this.as_ref().vtable.units
    }
}

#[repr(C)]
pub(crate) struct Record<F> {
    header: Header,
    task: ManuallyDrop<F>,
}

impl<F> Record<F>
    where F: FnOnce()
{
    pub(crate) const UNITS: usize = footprint_of::<F>();

    const ALIGNED: () = assert!(
        mem::align_of::<Record<F>>() <= mem::align_of::<Unit>(),
        "task alignment exceeds the queue unit alignment"
    );

    const VTABLE: TaskVTable = TaskVTable {
        execute: Self::execute,
        discard: Self::discard,
        units: Self::UNITS,
    };

    // closure already moved out or dropped, only the footprint is left
    const SPENT: TaskVTable = TaskVTable {
        execute: noop,
        discard: noop,
        units: Self::UNITS,
    };

    /// Moves `task` into storage starting at `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writing [`Record::UNITS`] contiguous units.
    pub(crate) unsafe fn write(slot: NonNull<Unit>, task: F) {
        #[allow(clippy::let_unit_value)]
        let () = Self::ALIGNED;
        slot.cast::<Self>().as_ptr().write(Record {
            header: Header { vtable: &Self::VTABLE },
            task: ManuallyDrop::new(task),
        });
    }

    unsafe fn execute(header: NonNull<Header>) {
        let record = header.cast::<Self>().as_ptr();
        (*record).header.vtable = &Self::SPENT;
        let task = ManuallyDrop::take(&mut (*record).task);
        task();
    }

    unsafe fn discard(header: NonNull<Header>) {
        let record = header.cast::<Self>().as_ptr();
        (*record).header.vtable = &Self::SPENT;
        ManuallyDrop::drop(&mut (*record).task);
    }
}
