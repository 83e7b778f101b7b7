//! Channel Command Words and the Channel Address Word.
//!
//! ## Format-0 CCW
//!
//! | Command code | Data address | Flags | (zero) | Count |
//! | ------------ | ------------ | ----- | ------ | ----- |
//! | byte 0       | bytes 1-3    | 4     | 5      | 6-7   |
//!
//! ## Format-1 CCW
//!
//! | Command code | Flags | Count | Data address |
//! | ------------ | ----- | ----- | ------------ |
//! | byte 0       | 1     | 2-3   | 4-7          |
//!
//! In both formats the flag bits are:
//!
//! | CD   | CC   | SLI  | SKIP | PCI  | IDA  | S    | MIDAW |
//! | ---- | ---- | ---- | ---- | ---- | ---- | ---- | ----- |
//! | 0x80 | 0x40 | 0x20 | 0x10 | 0x08 | 0x04 | 0x02 | 0x01  |
use std::fmt::{self, Display, Formatter};

#[cfg(test)]
use test_strategy::Arbitrary;

/// Chain data.
pub const CCW_FLAGS_CD: u8 = 0x80;
/// Chain command.
pub const CCW_FLAGS_CC: u8 = 0x40;
/// Suppress incorrect length.
pub const CCW_FLAGS_SLI: u8 = 0x20;
/// Suppress transfer of data into storage.
pub const CCW_FLAGS_SKIP: u8 = 0x10;
/// Program-controlled interruption.
pub const CCW_FLAGS_PCI: u8 = 0x08;
/// The data address designates a list of IDAWs.
pub const CCW_FLAGS_IDA: u8 = 0x04;
/// Suspend the channel program before executing this CCW.
pub const CCW_FLAGS_SUSP: u8 = 0x02;
/// The data address designates a list of MIDAWs.
pub const CCW_FLAGS_MIDAW: u8 = 0x01;

/// Size of a CCW in storage, in either format.
pub const CCW_SIZE: u32 = 8;

/// The command code of the no-operation control command.
pub const CCW_NOP: u8 = 0x03;

/// Which CCW layout is in effect for a channel program.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CcwFormat {
    Format0,
    Format1,
}

impl CcwFormat {
    /// The highest data address a CCW in this format can express.
    #[must_use]
    pub fn address_mask(&self) -> u32 {
        match self {
            CcwFormat::Format0 => 0x00FF_FFFF,
            CcwFormat::Format1 => 0x7FFF_FFFF,
        }
    }
}

/// The kind of operation a command code denotes.  The kind
/// determines the direction of data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    Write,
    Read,
    ReadBackward,
    Control,
    Sense,
    TransferInChannel,
    Invalid,
}

impl CommandClass {
    #[must_use]
    pub fn of(code: u8) -> CommandClass {
        match code & 0x0F {
            0x00 => CommandClass::Invalid,
            0x04 => CommandClass::Sense,
            0x08 => CommandClass::TransferInChannel,
            0x0C => CommandClass::ReadBackward,
            _ => match code & 0x03 {
                0x01 => CommandClass::Write,
                0x02 => CommandClass::Read,
                _ => CommandClass::Control,
            },
        }
    }

    /// True when data moves from the device into main storage.
    #[must_use]
    pub fn stores_into_storage(&self) -> bool {
        matches!(
            self,
            CommandClass::Read | CommandClass::ReadBackward | CommandClass::Sense
        )
    }

    /// True when data moves from main storage to the device.
    #[must_use]
    pub fn fetches_from_storage(&self) -> bool {
        matches!(self, CommandClass::Write | CommandClass::Control)
    }
}

#[must_use]
pub fn is_ccw_tic(code: u8) -> bool {
    CommandClass::of(code) == CommandClass::TransferInChannel
}

/// A decoded Channel Command Word.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ccw {
    pub opcode: u8,
    pub flags: u8,
    pub count: u16,
    pub address: u32,
}

impl Ccw {
    #[must_use]
    pub fn decode(format: CcwFormat, bytes: &[u8; 8]) -> Ccw {
        match format {
            CcwFormat::Format0 => Ccw {
                opcode: bytes[0],
                address: u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]),
                flags: bytes[4],
                count: u16::from_be_bytes([bytes[6], bytes[7]]),
            },
            CcwFormat::Format1 => Ccw {
                opcode: bytes[0],
                flags: bytes[1],
                count: u16::from_be_bytes([bytes[2], bytes[3]]),
                address: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            },
        }
    }

    /// Produce the storage image of this CCW.  Bits of the data
    /// address which cannot be represented in a format-0 CCW are
    /// discarded.
    #[must_use]
    pub fn encode(&self, format: CcwFormat) -> [u8; 8] {
        let count = self.count.to_be_bytes();
        let addr = self.address.to_be_bytes();
        match format {
            CcwFormat::Format0 => [
                self.opcode,
                addr[1],
                addr[2],
                addr[3],
                self.flags,
                0,
                count[0],
                count[1],
            ],
            CcwFormat::Format1 => [
                self.opcode,
                self.flags,
                count[0],
                count[1],
                addr[0],
                addr[1],
                addr[2],
                addr[3],
            ],
        }
    }

    #[must_use]
    pub fn class(&self) -> CommandClass {
        CommandClass::of(self.opcode)
    }

    #[must_use]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

impl Display for Ccw {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{:02X}{:02X}{:04X} {:08X}",
            self.opcode, self.flags, self.count, self.address
        )
    }
}

/// The S/370 Channel Address Word, fetched by SIO from location 72.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caw {
    pub key: u8,
    pub ccw_address: u32,
}

impl From<u32> for Caw {
    fn from(word: u32) -> Caw {
        Caw {
            key: ((word >> 24) as u8) & 0xF0,
            ccw_address: word & 0x00FF_FFFF,
        }
    }
}

impl From<Caw> for u32 {
    fn from(caw: Caw) -> u32 {
        (u32::from(caw.key & 0xF0) << 24) | (caw.ccw_address & 0x00FF_FFFF)
    }
}

#[test]
fn test_command_class() {
    assert_eq!(CommandClass::of(0x01), CommandClass::Write);
    assert_eq!(CommandClass::of(0x02), CommandClass::Read);
    assert_eq!(CommandClass::of(0x03), CommandClass::Control);
    assert_eq!(CommandClass::of(0x04), CommandClass::Sense);
    assert_eq!(CommandClass::of(0x08), CommandClass::TransferInChannel);
    assert_eq!(CommandClass::of(0x18), CommandClass::TransferInChannel);
    assert_eq!(CommandClass::of(0x0C), CommandClass::ReadBackward);
    assert_eq!(CommandClass::of(0x10), CommandClass::Invalid);
    assert_eq!(CommandClass::of(0xE4), CommandClass::Sense);
    assert!(CommandClass::Sense.stores_into_storage());
    assert!(CommandClass::Control.fetches_from_storage());
    assert!(!CommandClass::TransferInChannel.fetches_from_storage());
}

#[test]
fn test_format0_layout() {
    let bytes = [0x02, 0x01, 0x23, 0x45, 0x60, 0x00, 0x00, 0x50];
    let ccw = Ccw::decode(CcwFormat::Format0, &bytes);
    assert_eq!(
        ccw,
        Ccw {
            opcode: 0x02,
            flags: CCW_FLAGS_CC | CCW_FLAGS_SLI,
            count: 0x50,
            address: 0x012345,
        }
    );
    assert_eq!(ccw.encode(CcwFormat::Format0), bytes);
}

#[test]
fn test_format1_layout() {
    let bytes = [0x01, 0x84, 0x10, 0x00, 0x7F, 0x00, 0x10, 0x00];
    let ccw = Ccw::decode(CcwFormat::Format1, &bytes);
    assert_eq!(ccw.opcode, 0x01);
    assert!(ccw.has_flag(CCW_FLAGS_CD));
    assert!(ccw.has_flag(CCW_FLAGS_IDA));
    assert_eq!(ccw.count, 0x1000);
    assert_eq!(ccw.address, 0x7F00_1000);
}

#[test]
fn test_caw() {
    let caw = Caw::from(0x3000_1000_u32);
    assert_eq!(caw.key, 0x30);
    assert_eq!(caw.ccw_address, 0x1000);
    assert_eq!(u32::from(caw), 0x3000_1000);
}
