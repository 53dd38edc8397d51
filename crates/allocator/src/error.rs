use core::fmt;

use derive_more::IsVariant;
use snafu::{Location, Snafu};

/// Errors reported by the heap.
///
/// Nothing here is fatal: the heap is left in a consistent state after every
/// error and the caller decides how to degrade.
#[derive(Debug, Snafu, IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum HeapError {
    #[snafu(display("out of memory: no free block can hold {size} bytes"))]
    OutOfMemory {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid pointer: no live allocation at offset {offset:#x}"))]
    InvalidPointer {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "cannot shrink block at offset {offset:#x}: remainder of {remainder} bytes cannot hold a header"
    ))]
    ShrinkRemainderTooSmall {
        offset: usize,
        remainder: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena of {capacity} bytes cannot hold a single header"))]
    ArenaTooSmall {
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena of {capacity} bytes exceeds the header size field"))]
    ArenaTooLarge {
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena at {addr:#x} with {capacity} bytes is not 8-byte aligned"))]
    ArenaMisaligned {
        addr: usize,
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("corrupt header chain at offset {offset:#x}: {reason}"))]
    CorruptChain {
        offset: usize,
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to write heap dump"))]
    Dump {
        #[snafu(source)]
        source: fmt::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("heap used before initialization"))]
    Uninitialized {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("heap already initialized"))]
    AlreadyInitialized {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("heap is busy: allocator re-entered while a call is in progress"))]
    Busy {
        #[snafu(implicit)]
        location: Location,
    },
}
