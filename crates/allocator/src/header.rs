//! Inline block headers.
//!
//! Every block in the arena starts with an 8-byte header followed by its
//! payload. Headers are stored as plain-old-data and accessed through
//! [`DataView`], so the chain is never reinterpreted through raw pointers.
//!
//! ```text
//! Block Layout:
//! ┌────────────────────────────────────┬──────────────────────────────┐
//! │ Header (8 bytes)                   │ Payload (payload_size bytes) │
//! │ ┌───────────────────┬────────────┐ │                              │
//! │ │ payload_size: u32 │ status: u32│ │                              │
//! │ └───────────────────┴────────────┘ │                              │
//! └────────────────────────────────────┴──────────────────────────────┘
//! ```

use dataview::{DataView, Pod};
use derive_more::{Display, IsVariant};
use platform_cast::CastFrom as _;

/// Size of the header preceding every payload.
pub const HEADER_SIZE: usize = size_of::<RawHeader>();

/// Granularity of payload sizes and alignment of payload offsets.
pub const ALIGNMENT: usize = 8;

const _: () = assert!(HEADER_SIZE == 8);
const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

const STATUS_FREE: u32 = 0;
const STATUS_IN_USE: u32 = 1;

/// Allocation state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IsVariant)]
pub enum BlockStatus {
    #[display("free")]
    Free,
    #[display("in use")]
    InUse,
}

impl BlockStatus {
    const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            STATUS_FREE => Some(Self::Free),
            STATUS_IN_USE => Some(Self::InUse),
            _ => None,
        }
    }

    const fn to_raw(self) -> u32 {
        match self {
            Self::Free => STATUS_FREE,
            Self::InUse => STATUS_IN_USE,
        }
    }
}

/// On-arena representation of a header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod)]
struct RawHeader {
    payload_size: u32,
    status: u32,
}

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) payload_size: usize,
    pub(crate) status: BlockStatus,
}

impl Header {
    pub(crate) const fn free(payload_size: usize) -> Self {
        Self {
            payload_size,
            status: BlockStatus::Free,
        }
    }

    pub(crate) const fn in_use(payload_size: usize) -> Self {
        Self {
            payload_size,
            status: BlockStatus::InUse,
        }
    }

    /// Bytes covered by the block, header included.
    pub(crate) const fn block_size(self) -> usize {
        HEADER_SIZE + self.payload_size
    }

    /// Decodes the header stored at `offset`.
    ///
    /// Returns `None` if the header does not fit in `arena` or its status
    /// word is not a known value.
    pub(crate) fn read(arena: &[u8], offset: usize) -> Option<Self> {
        let raw = DataView::from(arena).try_read::<RawHeader>(offset)?;
        Some(Self {
            payload_size: usize::cast_from(raw.payload_size),
            status: BlockStatus::from_raw(raw.status)?,
        })
    }

    /// Encodes the header at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the header does not fit in `arena` or the payload size does
    /// not fit the on-arena `u32` field. Arenas are bounded at
    /// initialization, so neither can happen for offsets on the chain.
    pub(crate) fn write(self, arena: &mut [u8], offset: usize) {
        let payload_size =
            u32::try_from(self.payload_size).expect("payload size is bounded by the arena");
        let raw = RawHeader {
            payload_size,
            status: self.status.to_raw(),
        };
        DataView::from_mut(arena).write(offset, &raw);
    }
}

/// Rounds a request up to the payload granularity.
pub(crate) const fn round_up(nbytes: usize) -> Option<usize> {
    nbytes.checked_next_multiple_of(ALIGNMENT)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip_through_arena() {
        let mut arena = [0_u8; 32];
        Header::in_use(24).write(&mut arena, 8);

        assert_eq!(Header::read(&arena, 8), Some(Header::in_use(24)));
        assert_eq!(Header::read(&arena, 0), Some(Header::free(0)));
    }

    #[test]
    fn test_header_out_of_bounds() {
        let arena = [0_u8; 16];
        assert_eq!(Header::read(&arena, 12), None);
        assert_eq!(Header::read(&arena, 16), None);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let mut arena = [0_u8; 8];
        arena[4] = 7;
        assert_eq!(Header::read(&arena, 0), None);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(1), Some(8));
        assert_eq!(round_up(8), Some(8));
        assert_eq!(round_up(10), Some(16));
        assert_eq!(round_up(100), Some(104));
        assert_eq!(round_up(usize::MAX), None);
    }

    #[test]
    fn test_block_size_includes_header() {
        assert_eq!(Header::free(0).block_size(), HEADER_SIZE);
        assert_eq!(Header::in_use(16).block_size(), 16 + HEADER_SIZE);
    }
}
