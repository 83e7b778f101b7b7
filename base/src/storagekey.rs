//! Storage keys.
//!
//! Each 4K frame of main storage has a storage key:
//!
//! | Access-control bits | Fetch protection | Reference | Change | (unused) |
//! | ------------------- | ---------------- | --------- | ------ | -------- |
//! | 0xF0                | 0x08             | 0x04      | 0x02   | 0x01     |

/// Access-control bits.
pub const STORKEY_KEY: u8 = 0xF0;
/// Fetch protection.
pub const STORKEY_FETCH: u8 = 0x08;
/// Reference bit.
pub const STORKEY_REF: u8 = 0x04;
/// Change bit.
pub const STORKEY_CHANGE: u8 = 0x02;

pub const FRAME_SHIFT: u32 = 12;
pub const FRAME_SIZE: u64 = 1 << FRAME_SHIFT;
pub const FRAME_MASK: u64 = FRAME_SIZE - 1;

/// Decide whether an access with key `access_key` to a frame whose
/// storage key is `storage_key` is prohibited.
///
/// Key zero matches every frame.  Otherwise a mismatched key causes
/// protection if the frame is fetch protected, or if the access
/// stores into the frame.
#[must_use]
pub fn is_protected(access_key: u8, storage_key: u8, stores: bool) -> bool {
    access_key != 0
        && (storage_key & STORKEY_KEY) != (access_key & STORKEY_KEY)
        && (stores || storage_key & STORKEY_FETCH != 0)
}

#[test]
fn test_protection() {
    // Key zero is the master key.
    assert!(!is_protected(0x00, 0x38, true));
    // Matching keys.
    assert!(!is_protected(0x30, 0x38, true));
    // Mismatch, not fetch protected: fetch allowed, store prohibited.
    assert!(!is_protected(0x20, 0x30, false));
    assert!(is_protected(0x20, 0x30, true));
    // Mismatch, fetch protected.
    assert!(is_protected(0x20, 0x38, false));
}
