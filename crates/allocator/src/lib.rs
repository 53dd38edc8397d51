//! Dynamic memory for the firmware.
//!
//! The firmware runs without an operating system, so every subsystem that
//! needs dynamic memory (line-editing buffers, duplicated shell tokens,
//! queues) allocates from one fixed arena managed by this crate. The crate is
//! `no_std` and does not depend on `alloc`.
//!
//! # Overview
//!
//! - [`Arena`]: 8-byte aligned backing storage of a fixed capacity.
//! - [`HeapAllocator`]: first-fit allocator over a header chain embedded in
//!   the arena, with block splitting and forward coalescing.
//! - [`LockedHeap`]: the firmware-global form, which masks interrupts and
//!   locks for every call.
//!
//! Allocations are identified by [`PayloadPtr`], the payload offset from the
//! arena base. `None` stands in for the null pointer: zero-byte requests
//! return it, and releasing it is a no-op.
//!
//! # Usage Example
//!
//! ```rust
//! use allocator::{Arena, BlockStatus, HeapAllocator, HEADER_SIZE};
//!
//! let mut arena = Arena::<1024>::new();
//! let mut heap = HeapAllocator::new(&mut arena).unwrap();
//!
//! // Requests are rounded up to a multiple of 8.
//! let line = heap.allocate(10).unwrap().unwrap();
//! assert_eq!(line.offset(), HEADER_SIZE);
//! assert_eq!(heap.payload_size(line).unwrap(), 16);
//!
//! heap.payload_mut(line).unwrap()[..5].copy_from_slice(b"hello");
//!
//! // Growing into the free space that follows keeps the pointer.
//! let line = heap.resize(Some(line), 64).unwrap().unwrap();
//! assert_eq!(&heap.payload(line).unwrap()[..5], b"hello");
//!
//! heap.release(Some(line)).unwrap();
//! assert!(heap.blocks().all(|block| block.status == BlockStatus::Free));
//! ```
//!
//! # Errors
//!
//! Operations return [`HeapError`]. Exhaustion is
//! [`OutOfMemory`](HeapError::OutOfMemory); a pointer that does not name a
//! live allocation (including a double free) is
//! [`InvalidPointer`](HeapError::InvalidPointer) and leaves the heap
//! untouched. No error is fatal.
//!
//! # Logging
//!
//! The crate logs through the [`log`] facade: `info` when an arena is
//! installed, `warn` for rejected pointers and exhaustion, `trace` for every
//! operation. The firmware decides where records go.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use self::{
    arena::{Arena, DEFAULT_HEAP_SIZE},
    dump::{BlockInfo, Blocks, HeapStats},
    error::HeapError,
    header::{ALIGNMENT, BlockStatus, HEADER_SIZE},
    header_chain::{HeapAllocator, PayloadPtr},
    locked::{InterruptMask, LockedHeap, NoMask},
};

mod arena;
mod dump;
mod error;
mod header;
mod header_chain;
mod locked;
