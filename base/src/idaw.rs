//! Indirect data addressing.
//!
//! A format-1 IDAW is a fullword holding a 31-bit address, and each
//! IDAW after the first in a list must address the start of a 2K
//! block.  A format-2 IDAW is a doubleword holding a 64-bit address;
//! the ORB selects whether the blocks are 2K or 4K.
//!
//! A MIDAW is a quadword:
//!
//! | Reserved   | Flags   | Count    | Data address |
//! | ---------- | ------- | -------- | ------------ |
//! | bytes 0-4  | byte 5  | bytes 6-7| bytes 8-15   |
//!
//! Unlike an IDAW, a MIDAW carries its own count and so can describe
//! any range which does not cross a 4K boundary.
use crate::decode::{be16, be64};

/// The page mask for 2K IDAW blocks.
pub const IDAW_2K_PAGE_MASK: u64 = 0x7FF;

/// The page mask for 4K IDAW blocks (and MIDAWs).
pub const IDAW_4K_PAGE_MASK: u64 = 0xFFF;

/// This is the last MIDAW for the CCW.
pub const MIDAW_LAST: u8 = 0x80;
/// Suppress transfer of data into storage for this MIDAW.
pub const MIDAW_SKIP: u8 = 0x40;
/// Data-transfer interruption.
pub const MIDAW_DTI: u8 = 0x20;
/// Reserved flag bits, which must be zero.
pub const MIDAW_RESV: u8 = 0x1F;

/// Size of a MIDAW in storage.
pub const MIDAW_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdawFormat {
    Format1,
    Format2,
}

impl IdawFormat {
    /// The size (and required alignment) of one IDAW.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            IdawFormat::Format1 => 4,
            IdawFormat::Format2 => 8,
        }
    }
}

/// Compute how many bytes can be transferred using an IDAW holding
/// `address` before the data crosses a block boundary.
///
/// For a forward transfer this is the distance from `address` up to
/// the next boundary.  For a backward transfer (Read Backward) the
/// address designates the last byte, and the data runs down to the
/// start of its block.
#[must_use]
pub fn idaw_length(address: u64, page_mask: u64, backward: bool) -> u64 {
    if backward {
        (address & page_mask) + 1
    } else {
        (address | page_mask) + 1 - address
    }
}

/// An IDAW after the first in a list must address a block boundary:
/// the first byte of a block going forward, the last byte going
/// backward.
#[must_use]
pub fn is_idaw_boundary(address: u64, page_mask: u64, backward: bool) -> bool {
    if backward {
        address & page_mask == page_mask
    } else {
        address & page_mask == 0
    }
}

/// A decoded Modified Indirect Data Address Word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Midaw {
    /// The 40 reserved bits at the start of the MIDAW.
    pub reserved: u64,
    pub flags: u8,
    pub count: u16,
    pub address: u64,
}

impl Midaw {
    #[must_use]
    pub fn decode(bytes: &[u8; 16]) -> Midaw {
        let first = be64(&bytes[0..8]);
        Midaw {
            reserved: first >> 24,
            flags: bytes[5],
            count: be16(&bytes[6..8]),
            address: be64(&bytes[8..16]),
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let first: u64 = (self.reserved << 24) | (u64::from(self.flags) << 16) | u64::from(self.count);
        out[0..8].copy_from_slice(&first.to_be_bytes());
        out[8..16].copy_from_slice(&self.address.to_be_bytes());
        out
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flags & MIDAW_LAST != 0
    }

    #[must_use]
    pub fn is_skip(&self) -> bool {
        self.flags & MIDAW_SKIP != 0
    }
}

#[test]
fn test_idaw_length_forward() {
    assert_eq!(idaw_length(0x1000, IDAW_2K_PAGE_MASK, false), 0x800);
    assert_eq!(idaw_length(0x1234, IDAW_2K_PAGE_MASK, false), 0x1800 - 0x1234);
    assert_eq!(idaw_length(0x1234, IDAW_4K_PAGE_MASK, false), 0x2000 - 0x1234);
    assert_eq!(idaw_length(0x17FF, IDAW_2K_PAGE_MASK, false), 1);
}

#[test]
fn test_idaw_length_backward() {
    assert_eq!(idaw_length(0x17FF, IDAW_2K_PAGE_MASK, true), 0x800);
    assert_eq!(idaw_length(0x1234, IDAW_2K_PAGE_MASK, true), 0x235);
    assert_eq!(idaw_length(0x1000, IDAW_4K_PAGE_MASK, true), 1);
}

#[test]
fn test_idaw_boundary() {
    assert!(is_idaw_boundary(0x1800, IDAW_2K_PAGE_MASK, false));
    assert!(!is_idaw_boundary(0x1801, IDAW_2K_PAGE_MASK, false));
    assert!(!is_idaw_boundary(0x1800, IDAW_4K_PAGE_MASK, false));
    assert!(is_idaw_boundary(0x17FF, IDAW_2K_PAGE_MASK, true));
    assert!(!is_idaw_boundary(0x1800, IDAW_2K_PAGE_MASK, true));
}

#[test]
fn test_midaw_layout() {
    let bytes: [u8; 16] = [
        0, 0, 0, 0, 0, 0xC0, 0x01, 0x00, 0, 0, 0, 0, 0, 0x01, 0x20, 0x00,
    ];
    let midaw = Midaw::decode(&bytes);
    assert_eq!(midaw.reserved, 0);
    assert!(midaw.is_last());
    assert!(midaw.is_skip());
    assert_eq!(midaw.count, 0x100);
    assert_eq!(midaw.address, 0x12000);
    assert_eq!(midaw.encode(), bytes);
}
