use core::fmt;

use crate::header::ALIGNMENT;

/// Heap size set aside by the firmware (16 MiB).
pub const DEFAULT_HEAP_SIZE: usize = 0x100_0000;

/// Fixed-capacity, 8-byte aligned backing storage for a heap.
///
/// `Arena` can be placed in a `static` and handed to the heap by mutable
/// reference, which keeps its address stable for the lifetime of the
/// firmware.
///
/// ```
/// use allocator::{Arena, HeapAllocator};
///
/// let mut arena = Arena::<256>::new();
/// let heap = HeapAllocator::new(&mut arena).unwrap();
/// assert_eq!(heap.capacity(), 256);
/// ```
#[repr(C, align(8))]
pub struct Arena<const N: usize>([u8; N]);

const _: () = assert!(align_of::<Arena<0>>() == ALIGNMENT);

impl<const N: usize> Arena<N> {
    /// Creates a zero-filled arena.
    #[must_use]
    pub const fn new() -> Self {
        Self([0; N])
    }

    /// Capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for Arena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for Arena<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("addr", &self.0.as_ptr())
            .field("capacity", &N)
            .finish()
    }
}

impl<const N: usize> AsRef<[u8]> for Arena<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> AsMut<[u8]> for Arena<N> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}
