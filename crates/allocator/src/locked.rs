//! Firmware-global heap.
//!
//! [`HeapAllocator`] is not reentrant: a split or merge rewrites several
//! headers and must not be interleaved with another call. [`LockedHeap`]
//! makes that a hard precondition. Every call masks interrupts for its whole
//! duration and takes a spin lock; a call that finds the lock already held
//! (an interrupt handler entering the heap while the foreground is inside
//! it) fails with [`HeapError::Busy`] instead of spinning forever.
//!
//! ```
//! use allocator::{Arena, LockedHeap, NoMask};
//!
//! static HEAP: LockedHeap<&'static mut Arena<4096>, NoMask> = LockedHeap::new();
//!
//! let arena: &'static mut Arena<4096> = Box::leak(Box::new(Arena::new()));
//! HEAP.init(arena).unwrap();
//!
//! let line = HEAP.allocate(80).unwrap();
//! HEAP.release(line).unwrap();
//! ```

use core::{fmt, marker::PhantomData};

use snafu::{OptionExt as _, ensure};
use spin::Mutex;

use crate::{
    dump::HeapStats,
    error::{AlreadyInitializedSnafu, BusySnafu, HeapError, UninitializedSnafu},
    header_chain::{HeapAllocator, PayloadPtr},
};

/// Masks interrupts on the current hart while the returned guard lives.
pub trait InterruptMask {
    type Guard;

    fn mask() -> Self::Guard;
}

/// Mask for hosted builds and single-context firmware that never touches
/// the heap from an interrupt handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMask;

impl InterruptMask for NoMask {
    type Guard = ();

    fn mask() -> Self::Guard {}
}

/// A [`HeapAllocator`] shared by every execution context of the firmware.
pub struct LockedHeap<A, M = NoMask> {
    heap: Mutex<Option<HeapAllocator<A>>>,
    _mask: PhantomData<fn() -> M>,
}

impl<A, M> Default for LockedHeap<A, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, M> fmt::Debug for LockedHeap<A, M>
where
    A: AsRef<[u8]>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("LockedHeap");
        match self.heap.try_lock() {
            Some(heap) => d.field("heap", &*heap),
            None => d.field("heap", &"<locked>"),
        };
        d.finish()
    }
}

impl<A, M> LockedHeap<A, M> {
    /// Creates an uninitialized heap, suitable for a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heap: Mutex::new(None),
            _mask: PhantomData,
        }
    }
}

impl<A, M> LockedHeap<A, M>
where
    A: AsRef<[u8]> + AsMut<[u8]>,
    M: InterruptMask,
{
    /// Installs the arena. Must be called exactly once before any other
    /// operation.
    pub fn init(&self, arena: A) -> Result<(), HeapError> {
        self.with_slot(|slot| {
            ensure!(slot.is_none(), AlreadyInitializedSnafu);
            *slot = Some(HeapAllocator::new(arena)?);
            Ok(())
        })
    }

    /// See [`HeapAllocator::allocate`].
    pub fn allocate(&self, nbytes: usize) -> Result<Option<PayloadPtr>, HeapError> {
        self.with_heap(|heap| heap.allocate(nbytes))
    }

    /// See [`HeapAllocator::release`].
    pub fn release(&self, ptr: Option<PayloadPtr>) -> Result<(), HeapError> {
        self.with_heap(|heap| heap.release(ptr))
    }

    /// See [`HeapAllocator::resize`].
    pub fn resize(
        &self,
        ptr: Option<PayloadPtr>,
        new_size: usize,
    ) -> Result<Option<PayloadPtr>, HeapError> {
        self.with_heap(|heap| heap.resize(ptr, new_size))
    }

    /// See [`HeapAllocator::duplicate`].
    pub fn duplicate(&self, src: &[u8]) -> Result<PayloadPtr, HeapError> {
        self.with_heap(|heap| heap.duplicate(src))
    }

    /// Runs `f` on the payload of a live allocation.
    ///
    /// The heap stays locked while `f` runs, so `f` must not call back into
    /// this heap.
    pub fn with_payload_mut<F, R>(&self, ptr: PayloadPtr, f: F) -> Result<R, HeapError>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        self.with_heap(|heap| Ok(f(heap.payload_mut(ptr)?)))
    }

    pub fn stats(&self) -> Result<HeapStats, HeapError> {
        self.with_heap(|heap| Ok(heap.stats()))
    }

    /// Writes a heap dump to `out`, typically the console.
    pub fn dump<W>(&self, out: &mut W) -> Result<(), HeapError>
    where
        W: fmt::Write + ?Sized,
    {
        self.with_heap(|heap| heap.try_dump(out))
    }

    fn with_heap<F, R>(&self, f: F) -> Result<R, HeapError>
    where
        F: FnOnce(&mut HeapAllocator<A>) -> Result<R, HeapError>,
    {
        self.with_slot(|slot| f(slot.as_mut().context(UninitializedSnafu)?))
    }

    fn with_slot<F, R>(&self, f: F) -> Result<R, HeapError>
    where
        F: FnOnce(&mut Option<HeapAllocator<A>>) -> Result<R, HeapError>,
    {
        // The lock guard is dropped before interrupts are unmasked.
        let _masked = M::mask();
        let mut slot = self.heap.try_lock().context(BusySnafu)?;
        f(&mut slot)
    }
}
