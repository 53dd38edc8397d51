//! Header-chain allocator.
//!
//! The heap is a single fixed-capacity arena tiled by blocks. Each block is
//! an inline header followed by its payload, and the next block starts right
//! after the payload. There is no free list and no
//! external index: the chain is found by walking the headers from offset 0.
//!
//! # Algorithm
//!
//! - **Allocation**: first-fit. The chain is walked from the arena base and
//!   the first free block large enough is taken. If the leftover can hold a
//!   header, the block is split and the tail becomes a new free block.
//! - **Release**: the block is marked free and merged with the free blocks
//!   that follow it.
//! - **Resize**: shrinking splits the tail off in place, growing absorbs a
//!   free successor in place when it is large enough, and otherwise the data
//!   moves to a fresh block.
//! - **Coalescing**: always forward. A header absorbs the free headers after
//!   it and never moves backward. Releasing a block whose predecessor is
//!   already free runs the predecessor's merge, which retires the released
//!   header.
//!
//! # Invariants
//!
//! After every operation the blocks tile the arena exactly, no two adjacent
//! blocks are both free, and every payload size and payload offset is a
//! multiple of [`ALIGNMENT`].
//!
//! # Performance Characteristics
//!
//! Every operation is O(n) in the number of blocks on the chain. Pointer
//! validation walks the chain, so release and resize cost one walk even when
//! no merge happens.

use core::{cmp::Ordering, fmt, num::NonZeroUsize};

use snafu::{OptionExt as _, ensure};

use crate::{
    dump::BlockInfo,
    error::{
        ArenaMisalignedSnafu, ArenaTooLargeSnafu, ArenaTooSmallSnafu, HeapError,
        InvalidPointerSnafu, OutOfMemorySnafu, ShrinkRemainderTooSmallSnafu,
    },
    header::{ALIGNMENT, HEADER_SIZE, Header, round_up},
};

/// Handle to a live allocation.
///
/// A `PayloadPtr` is the byte offset of a payload from the arena base. It is
/// never zero because every payload follows its header, so `Option<PayloadPtr>`
/// is the same size as `usize` and `None` plays the role of a null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayloadPtr(NonZeroUsize);

impl PayloadPtr {
    /// Creates a handle from a payload offset.
    ///
    /// Returns `None` for offset zero. The handle is only checked against the
    /// chain when it is passed to the heap.
    #[must_use]
    pub const fn from_offset(offset: usize) -> Option<Self> {
        match NonZeroUsize::new(offset) {
            Some(offset) => Some(Self(offset)),
            None => None,
        }
    }

    /// Returns the payload offset from the arena base.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for PayloadPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.offset())
    }
}

/// A live block found by walking the chain, with its chain predecessor.
#[derive(Debug, Clone, Copy)]
struct Located {
    block: BlockInfo,
    prev: Option<BlockInfo>,
}

/// Fixed-arena allocator over an in-place header chain.
///
/// The allocator owns its backing storage `A`, which is any byte buffer with
/// a stable 8-byte aligned address, typically `&'static mut Arena<N>`.
///
/// # Thread Safety
///
/// All mutating operations take `&mut self`. Sharing one heap between the
/// foreground and interrupt handlers requires
/// [`LockedHeap`](crate::LockedHeap).
pub struct HeapAllocator<A> {
    arena: A,
}

impl<A> fmt::Debug for HeapAllocator<A>
where
    A: AsRef<[u8]>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocator")
            .field("capacity", &self.capacity())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<A> HeapAllocator<A>
where
    A: AsRef<[u8]>,
{
    /// Capacity of the arena in bytes, headers included.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes().len()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.arena.as_ref()
    }

    /// Returns the payload of a live allocation.
    ///
    /// The slice covers the usable payload, which may be longer than the
    /// size originally requested.
    pub fn payload(&self, ptr: PayloadPtr) -> Result<&[u8], HeapError> {
        let Located { block, .. } = self.locate(ptr)?;
        Ok(&self.bytes()[block.payload_range()])
    }

    /// Returns the usable size of a live allocation.
    pub fn payload_size(&self, ptr: PayloadPtr) -> Result<usize, HeapError> {
        Ok(self.locate(ptr)?.block.payload_size)
    }

    /// Finds the in-use block whose payload starts at `ptr`.
    fn locate(&self, ptr: PayloadPtr) -> Result<Located, HeapError> {
        let offset = ptr.offset();
        let result = offset
            .checked_sub(HEADER_SIZE)
            .context(InvalidPointerSnafu { offset })
            .and_then(|header_offset| {
                let mut prev = None;
                for block in self.blocks() {
                    if block.offset == header_offset {
                        ensure!(block.status.is_in_use(), InvalidPointerSnafu { offset });
                        return Ok(Located { block, prev });
                    }
                    if block.offset > header_offset {
                        break;
                    }
                    prev = Some(block);
                }
                InvalidPointerSnafu { offset }.fail()
            });
        if let Err(err) = &result {
            log::warn!("heap: {err}");
        }
        result
    }
}

impl<A> HeapAllocator<A>
where
    A: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Takes ownership of `arena` and installs a single free block spanning
    /// all of it.
    ///
    /// The arena must be 8-byte aligned, a multiple of 8 bytes long, large
    /// enough for one header, and small enough for the 32-bit size field.
    pub fn new(mut arena: A) -> Result<Self, HeapError> {
        let bytes = arena.as_mut();
        let capacity = bytes.len();
        let addr = bytes.as_ptr().addr();
        ensure!(capacity >= HEADER_SIZE, ArenaTooSmallSnafu { capacity });
        ensure!(
            addr.is_multiple_of(ALIGNMENT) && capacity.is_multiple_of(ALIGNMENT),
            ArenaMisalignedSnafu { addr, capacity }
        );
        ensure!(
            u32::try_from(capacity - HEADER_SIZE).is_ok(),
            ArenaTooLargeSnafu { capacity }
        );

        Header::free(capacity - HEADER_SIZE).write(bytes, 0);
        log::info!("heap: arena at {addr:#x}, {capacity} bytes");

        Ok(Self { arena })
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.arena.as_mut()
    }

    /// Returns the payload of a live allocation for writing.
    pub fn payload_mut(&mut self, ptr: PayloadPtr) -> Result<&mut [u8], HeapError> {
        let Located { block, .. } = self.locate(ptr)?;
        Ok(&mut self.bytes_mut()[block.payload_range()])
    }

    /// Allocates at least `nbytes` bytes.
    ///
    /// A zero-byte request is a no-op and returns `Ok(None)`. Otherwise the
    /// request is rounded up to a multiple of 8 and served first-fit.
    pub fn allocate(&mut self, nbytes: usize) -> Result<Option<PayloadPtr>, HeapError> {
        if nbytes == 0 {
            return Ok(None);
        }
        let size = round_up(nbytes).context(OutOfMemorySnafu { size: nbytes })?;

        let Some(block) = self
            .blocks()
            .find(|block| block.status.is_free() && block.payload_size >= size)
        else {
            log::warn!("heap: allocate({nbytes}) failed, no free block of {size} bytes");
            return OutOfMemorySnafu { size }.fail();
        };
        ensure!(
            block.payload_offset() + size <= self.capacity(),
            OutOfMemorySnafu { size }
        );

        let remainder = block.payload_size - size;
        if remainder < HEADER_SIZE {
            self.write_header(block.offset, Header::in_use(block.payload_size));
        } else {
            self.write_header(block.offset, Header::in_use(size));
            self.insert_free(block.payload_offset() + size, remainder - HEADER_SIZE);
        }

        let ptr = block.payload_ptr();
        log::trace!("heap: allocate({nbytes}) -> {ptr}");
        self.debug_verify();
        Ok(Some(ptr))
    }

    /// Releases a live allocation.
    ///
    /// `None` is a no-op. A pointer that does not name a live allocation,
    /// including one that was already released, is rejected with
    /// [`HeapError::InvalidPointer`] and the heap is left untouched.
    pub fn release(&mut self, ptr: Option<PayloadPtr>) -> Result<(), HeapError> {
        let Some(ptr) = ptr else {
            return Ok(());
        };
        let located = self.locate(ptr)?;
        self.free_block(located);

        log::trace!("heap: release({ptr})");
        self.debug_verify();
        Ok(())
    }

    /// Changes the size of a live allocation.
    ///
    /// - `None` returns `Ok(None)` without allocating.
    /// - A new size of zero releases the allocation and returns `Ok(None)`.
    /// - Shrinking and growing into a free successor keep the same pointer.
    /// - Otherwise the payload moves to a new block. If that allocation fails
    ///   the original block is left intact and the error is returned.
    pub fn resize(
        &mut self,
        ptr: Option<PayloadPtr>,
        new_size: usize,
    ) -> Result<Option<PayloadPtr>, HeapError> {
        let Some(ptr) = ptr else {
            log::trace!("heap: resize of null pointer ignored");
            return Ok(None);
        };
        if new_size == 0 {
            self.release(Some(ptr))?;
            return Ok(None);
        }

        let located = self.locate(ptr)?;
        let size = round_up(new_size).context(OutOfMemorySnafu { size: new_size })?;
        let old_size = located.block.payload_size;

        let new_ptr = match size.cmp(&old_size) {
            Ordering::Equal => ptr,
            Ordering::Less => {
                self.shrink(located.block, size)?;
                ptr
            }
            Ordering::Greater if self.grow_in_place(located.block, size) => ptr,
            Ordering::Greater => self.relocate(ptr, old_size, size)?,
        };

        log::trace!("heap: resize({ptr}, {new_size}) -> {new_ptr}");
        self.debug_verify();
        Ok(Some(new_ptr))
    }

    /// Copies `src` into a new allocation followed by a NUL terminator.
    pub fn duplicate(&mut self, src: &[u8]) -> Result<PayloadPtr, HeapError> {
        let len = src.len();
        let size = len.checked_add(1).context(OutOfMemorySnafu { size: len })?;
        let Some(ptr) = self.allocate(size)? else {
            return OutOfMemorySnafu { size }.fail();
        };

        let dst = &mut self.bytes_mut()[ptr.offset()..][..size];
        dst[..len].copy_from_slice(src);
        dst[len] = 0;
        Ok(ptr)
    }

    fn write_header(&mut self, offset: usize, header: Header) {
        header.write(self.bytes_mut(), offset);
    }

    /// Writes a free header at `offset` and merges its free successors.
    fn insert_free(&mut self, offset: usize, payload_size: usize) {
        self.write_header(offset, Header::free(payload_size));
        self.coalesce(offset);
    }

    /// Merges the free block at `offset` with every contiguous free block
    /// after it.
    fn coalesce(&mut self, offset: usize) {
        let capacity = self.capacity();
        let mut block = self.block_at(offset);
        debug_assert!(block.status.is_free());

        let mut merged = 0;
        while block.end() < capacity {
            let next = self.block_at(block.end());
            if !next.status.is_free() {
                break;
            }
            block.payload_size += next.block_size();
            merged += 1;
        }

        if merged > 0 {
            self.write_header(offset, Header::free(block.payload_size));
            log::trace!(
                "heap: merged {merged} block(s) into {offset:#x}, payload {}",
                block.payload_size
            );
        }
    }

    fn free_block(&mut self, Located { block, prev }: Located) {
        self.write_header(block.offset, Header::free(block.payload_size));
        let head = match prev {
            Some(prev) if prev.status.is_free() => prev.offset,
            _ => block.offset,
        };
        self.coalesce(head);
    }

    fn shrink(&mut self, block: BlockInfo, size: usize) -> Result<(), HeapError> {
        let remainder = block.payload_size - size;
        ensure!(
            remainder >= HEADER_SIZE,
            ShrinkRemainderTooSmallSnafu {
                offset: block.payload_offset(),
                remainder,
            }
        );

        self.write_header(block.offset, Header::in_use(size));
        self.insert_free(block.payload_offset() + size, remainder - HEADER_SIZE);
        Ok(())
    }

    /// Grows `block` by absorbing its free successor, if that is enough.
    fn grow_in_place(&mut self, block: BlockInfo, size: usize) -> bool {
        if block.end() >= self.capacity() {
            return false;
        }
        let next = self.block_at(block.end());
        if !next.status.is_free() {
            return false;
        }
        let available = block.payload_size + next.block_size();
        if available < size {
            return false;
        }

        let remainder = available - size;
        if remainder < HEADER_SIZE {
            self.write_header(block.offset, Header::in_use(available));
        } else {
            self.write_header(block.offset, Header::in_use(size));
            self.insert_free(block.payload_offset() + size, remainder - HEADER_SIZE);
        }
        true
    }

    /// Moves the payload at `ptr` to a new block of `size` bytes.
    fn relocate(
        &mut self,
        ptr: PayloadPtr,
        old_size: usize,
        size: usize,
    ) -> Result<PayloadPtr, HeapError> {
        let new_ptr = match self.allocate(size) {
            Ok(Some(new_ptr)) => new_ptr,
            Ok(None) => return OutOfMemorySnafu { size }.fail(),
            Err(err) => {
                log::warn!("heap: resize({ptr}) kept the original block: {err}");
                return Err(err);
            }
        };

        let src = ptr.offset();
        self.bytes_mut()
            .copy_within(src..src + old_size.min(size), new_ptr.offset());
        // The walk is redone because the allocation may have split the
        // predecessor of the old block.
        self.release(Some(ptr))?;
        Ok(new_ptr)
    }

    #[track_caller]
    fn debug_verify(&self) {
        if cfg!(debug_assertions) {
            if let Err(err) = self.verify() {
                panic!("heap: {err}");
            }
        }
    }
}

impl<A> HeapAllocator<A>
where
    A: AsRef<[u8]>,
{
    /// Decodes the block at `offset`, which must lie on the chain.
    fn block_at(&self, offset: usize) -> BlockInfo {
        let Some(header) = Header::read(self.bytes(), offset) else {
            panic!("heap: corrupt header at offset {offset:#x}");
        };
        BlockInfo::new(offset, header)
    }
}
