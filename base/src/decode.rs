use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Signals that a byte image is too short to hold the architected
/// structure being decoded from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub what: &'static str,
    pub expected: usize,
    pub actual: usize,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{} needs {} bytes but only {} were supplied",
            self.what, self.expected, self.actual
        )
    }
}

impl Error for DecodeError {}

pub(crate) fn check_len(what: &'static str, bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        Err(DecodeError {
            what,
            expected,
            actual: bytes.len(),
        })
    } else {
        Ok(())
    }
}

pub(crate) fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

pub(crate) fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub(crate) fn be64(bytes: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[0..8]);
    u64::from_be_bytes(b)
}
