//! The Operation Request Block, the operand of Start Subchannel.
//!
//! | Interruption parameter | Flags (key, S, C, M, Y) | Flags (F, P, I, A, U, B, H, T) | LPM   | Flags (L, D, X) | CCW address |
//! | ---------------------- | ----------------------- | ------------------------------ | ----- | --------------- | ----------- |
//! | bytes 0-3              | byte 4                  | byte 5                         | 6     | 7               | bytes 8-11  |
use crate::ccw::{Caw, CcwFormat};
use crate::decode::{be32, check_len, DecodeError};
use crate::idaw::{IdawFormat, IDAW_2K_PAGE_MASK, IDAW_4K_PAGE_MASK};

/// Subchannel protection key.
pub const ORB4_KEY: u8 = 0xF0;
/// Suspend control.
pub const ORB4_S: u8 = 0x08;
/// Streaming-mode control.
pub const ORB4_C: u8 = 0x04;
/// Modification control.
pub const ORB4_M: u8 = 0x02;
/// Synchronization control.
pub const ORB4_Y: u8 = 0x01;

/// Format-1 CCWs.
pub const ORB5_F: u8 = 0x80;
/// Prefetch control.
pub const ORB5_P: u8 = 0x40;
/// Initial-status-interruption control.
pub const ORB5_I: u8 = 0x20;
/// Address-limit-checking control.
pub const ORB5_A: u8 = 0x10;
/// Suppress-suspended-interruption control.
pub const ORB5_U: u8 = 0x08;
/// Channel-program type.
pub const ORB5_B: u8 = 0x04;
/// Format-2 IDAWs.
pub const ORB5_H: u8 = 0x02;
/// 2K format-2 IDAWs.
pub const ORB5_T: u8 = 0x01;

/// Incorrect-length-suppression mode.
pub const ORB7_L: u8 = 0x80;
/// MIDAW control.
pub const ORB7_D: u8 = 0x40;
/// ORB extension.
pub const ORB7_X: u8 = 0x01;

/// Size of the basic ORB.
pub const ORB_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Orb {
    pub intparm: u32,
    pub flag4: u8,
    pub flag5: u8,
    pub lpm: u8,
    pub flag7: u8,
    pub ccw_address: u32,
}

impl Orb {
    /// Decode an ORB from its storage image.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 12 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Orb, DecodeError> {
        check_len("ORB", bytes, ORB_SIZE)?;
        Ok(Orb {
            intparm: be32(&bytes[0..4]),
            flag4: bytes[4],
            flag5: bytes[5],
            lpm: bytes[6],
            flag7: bytes[7],
            ccw_address: be32(&bytes[8..12]),
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; ORB_SIZE] {
        let mut out = [0u8; ORB_SIZE];
        out[0..4].copy_from_slice(&self.intparm.to_be_bytes());
        out[4] = self.flag4;
        out[5] = self.flag5;
        out[6] = self.lpm;
        out[7] = self.flag7;
        out[8..12].copy_from_slice(&self.ccw_address.to_be_bytes());
        out
    }

    /// S/370 SIO takes its key and channel program address from the
    /// CAW.  Format-0 CCWs are always used.
    #[must_use]
    pub fn from_caw(caw: Caw) -> Orb {
        Orb {
            intparm: 0,
            flag4: caw.key & ORB4_KEY,
            flag5: 0,
            lpm: 0xFF,
            flag7: 0,
            ccw_address: caw.ccw_address,
        }
    }

    #[must_use]
    pub fn key(&self) -> u8 {
        self.flag4 & ORB4_KEY
    }

    #[must_use]
    pub fn suspend_control(&self) -> bool {
        self.flag4 & ORB4_S != 0
    }

    #[must_use]
    pub fn ccw_format(&self) -> CcwFormat {
        if self.flag5 & ORB5_F != 0 {
            CcwFormat::Format1
        } else {
            CcwFormat::Format0
        }
    }

    #[must_use]
    pub fn idaw_format(&self) -> IdawFormat {
        if self.flag5 & ORB5_H != 0 {
            IdawFormat::Format2
        } else {
            IdawFormat::Format1
        }
    }

    /// Format-1 IDAWs always address 2K blocks; format-2 IDAWs
    /// address 4K blocks unless the ORB asks for 2K.
    #[must_use]
    pub fn idaw_page_mask(&self) -> u64 {
        match self.idaw_format() {
            IdawFormat::Format1 => IDAW_2K_PAGE_MASK,
            IdawFormat::Format2 if self.flag5 & ORB5_T != 0 => IDAW_2K_PAGE_MASK,
            IdawFormat::Format2 => IDAW_4K_PAGE_MASK,
        }
    }

    #[must_use]
    pub fn address_limit_checking(&self) -> bool {
        self.flag5 & ORB5_A != 0
    }

    #[must_use]
    pub fn suppress_suspended_interruption(&self) -> bool {
        self.flag5 & ORB5_U != 0
    }

    #[must_use]
    pub fn incorrect_length_suppression(&self) -> bool {
        self.flag7 & ORB7_L != 0
    }

    #[must_use]
    pub fn midaw_enabled(&self) -> bool {
        self.flag7 & ORB7_D != 0
    }
}

#[test]
fn test_orb_fields() {
    let image = [
        0xDE, 0xAD, 0xBE, 0xEF, 0x38, 0x82, 0xFF, 0x40, 0x00, 0x00, 0x10, 0x00,
    ];
    let orb = Orb::decode(&image).expect("test ORB should decode");
    assert_eq!(orb.intparm, 0xDEAD_BEEF);
    assert_eq!(orb.key(), 0x30);
    assert!(orb.suspend_control());
    assert_eq!(orb.ccw_format(), CcwFormat::Format1);
    assert_eq!(orb.idaw_format(), IdawFormat::Format2);
    assert_eq!(orb.idaw_page_mask(), IDAW_4K_PAGE_MASK);
    assert!(orb.midaw_enabled());
    assert!(!orb.incorrect_length_suppression());
    assert_eq!(orb.ccw_address, 0x1000);
    assert_eq!(orb.encode(), image);
}

#[test]
fn test_short_orb() {
    assert!(Orb::decode(&[0u8; 8]).is_err());
}

#[test]
fn test_orb_from_caw() {
    let orb = Orb::from_caw(Caw::from(0x2000_0400_u32));
    assert_eq!(orb.key(), 0x20);
    assert_eq!(orb.ccw_format(), CcwFormat::Format0);
    assert_eq!(orb.ccw_address, 0x400);
}
