//! Read-only views of the header chain: block iteration, heap dumps,
//! statistics and consistency checks.

use core::{fmt, iter::FusedIterator, ops::Range};

use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    error::{CorruptChainSnafu, DumpSnafu, HeapError},
    header::{ALIGNMENT, BlockStatus, HEADER_SIZE, Header},
    header_chain::{HeapAllocator, PayloadPtr},
};

/// One header of the chain, as reported by [`HeapAllocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the header from the arena base.
    pub offset: usize,
    /// Usable payload bytes following the header.
    pub payload_size: usize,
    pub status: BlockStatus,
}

impl BlockInfo {
    pub(crate) const fn new(offset: usize, header: Header) -> Self {
        Self {
            offset,
            payload_size: header.payload_size,
            status: header.status,
        }
    }

    /// Offset of the first payload byte.
    #[must_use]
    pub const fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// Offset of the next header, one past the last payload byte.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.payload_offset() + self.payload_size
    }

    /// Bytes covered by the block, header included.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        HEADER_SIZE + self.payload_size
    }

    #[must_use]
    pub fn payload_range(&self) -> Range<usize> {
        self.payload_offset()..self.end()
    }

    /// Handle for the payload of this block.
    #[must_use]
    pub fn payload_ptr(&self) -> PayloadPtr {
        let Some(ptr) = PayloadPtr::from_offset(self.payload_offset()) else {
            unreachable!("payload offsets include the header");
        };
        ptr
    }
}

/// Iterator over the header chain in address order.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    arena: &'a [u8],
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.arena.len() {
            return None;
        }
        let Some(header) = Header::read(self.arena, self.offset) else {
            // Stop on a corrupt header; `verify` reports it.
            self.offset = self.arena.len();
            return None;
        };
        let block = BlockInfo::new(self.offset, header);
        self.offset = block.end();
        Some(block)
    }
}

impl FusedIterator for Blocks<'_> {}

/// Occupancy summary of a heap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Arena capacity, headers included.
    pub capacity: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    /// Payload bytes held by free blocks.
    pub free_bytes: usize,
    /// Payload bytes held by live allocations.
    pub used_bytes: usize,
    /// Largest single request that can currently be served.
    pub largest_free: usize,
}

impl<A> HeapAllocator<A>
where
    A: AsRef<[u8]>,
{
    /// Walks the header chain from the arena base.
    ///
    /// The walk does not mutate the heap and can be repeated any number of
    /// times.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            arena: self.bytes(),
            offset: 0,
        }
    }

    /// Writes one line per header to `out`.
    ///
    /// ```text
    /// Starting heap dump:
    /// 0: header at 0x0, payload of 16, status in use
    /// 1: header at 0x18, payload of 96, status free
    /// ```
    pub fn dump<W>(&self, out: &mut W) -> fmt::Result
    where
        W: fmt::Write + ?Sized,
    {
        writeln!(out, "Starting heap dump:")?;
        for (index, block) in self.blocks().enumerate() {
            writeln!(
                out,
                "{index}: header at {:#x}, payload of {}, status {}",
                block.offset, block.payload_size, block.status
            )?;
        }
        Ok(())
    }

    /// Like [`dump`](Self::dump), reporting a failing sink as [`HeapError`].
    pub fn try_dump<W>(&self, out: &mut W) -> Result<(), HeapError>
    where
        W: fmt::Write + ?Sized,
    {
        self.dump(out).context(DumpSnafu)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                capacity: self.capacity(),
                ..HeapStats::default()
            },
            |mut stats, block| {
                stats.blocks += 1;
                match block.status {
                    BlockStatus::Free => {
                        stats.free_blocks += 1;
                        stats.free_bytes += block.payload_size;
                        stats.largest_free = stats.largest_free.max(block.payload_size);
                    }
                    BlockStatus::InUse => stats.used_bytes += block.payload_size,
                }
                stats
            },
        )
    }

    /// Checks the structural invariants of the chain.
    ///
    /// The blocks must tile the arena exactly, every payload size must be a
    /// multiple of 8, and no two adjacent blocks may both be free.
    pub fn verify(&self) -> Result<(), HeapError> {
        let arena = self.bytes();
        let mut offset = 0;
        let mut prev_free = false;
        while offset < arena.len() {
            let header = Header::read(arena, offset).context(CorruptChainSnafu {
                offset,
                reason: "unreadable header",
            })?;
            ensure!(
                header.payload_size.is_multiple_of(ALIGNMENT),
                CorruptChainSnafu {
                    offset,
                    reason: "unaligned payload size",
                }
            );
            let free = header.status.is_free();
            ensure!(
                !(prev_free && free),
                CorruptChainSnafu {
                    offset,
                    reason: "adjacent free blocks",
                }
            );
            prev_free = free;
            offset += header.block_size();
        }
        ensure!(
            offset == arena.len(),
            CorruptChainSnafu {
                offset,
                reason: "chain overruns the arena",
            }
        );
        Ok(())
    }
}
