//! Errors reported by the channel subsystem.
//!
//! Only host-level problems (a thread which cannot be created, a
//! device number used twice) are errors in the Rust sense.  The
//! architected failures of a channel program become channel status
//! bits in the status word stored for the program.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::*;

use super::storage::AccessFailure;

/// A channel-program check detected while fetching CCWs, IDAWs or
/// MIDAWs, or while transferring data.  Any of these ends the
/// channel program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelCheck {
    /// Malformed CCW, IDAW or MIDAW, or an invalid address.
    Program,
    /// A storage-key mismatch, or an address outside the limit set
    /// by address-limit checking.
    Protection,
    /// A data error in storage.
    ChannelData,
    /// The channel cannot continue the program, for example because
    /// data-chained write data has outgrown the device buffer.
    ChannelControl,
}

impl ChannelCheck {
    /// The channel status bit which reports this check.
    #[must_use]
    pub fn channel_status(&self) -> u8 {
        match self {
            ChannelCheck::Program => CSW_PROGC,
            ChannelCheck::Protection => CSW_PROTC,
            ChannelCheck::ChannelData => CSW_CDC,
            ChannelCheck::ChannelControl => CSW_CCC,
        }
    }
}

impl Display for ChannelCheck {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            ChannelCheck::Program => "channel program check",
            ChannelCheck::Protection => "channel protection check",
            ChannelCheck::ChannelData => "channel data check",
            ChannelCheck::ChannelControl => "channel control check",
        })
    }
}

impl Error for ChannelCheck {}

impl From<AccessFailure> for ChannelCheck {
    fn from(failure: AccessFailure) -> ChannelCheck {
        match failure {
            AccessFailure::Addressing(_) => ChannelCheck::Program,
            AccessFailure::Protection(_) => ChannelCheck::Protection,
        }
    }
}

/// Signals that a subchannel instruction issued by a guest running
/// under interpretive execution must be intercepted and handled by
/// the host, instead of completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intercept {
    Instruction { subchan: u16 },
}

impl Display for Intercept {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Intercept::Instruction { subchan } => {
                write!(f, "instruction intercept for subchannel {subchan:04X}")
            }
        }
    }
}

impl Error for Intercept {}

#[derive(Debug)]
pub enum SchedulerError {
    /// The host would not give us another thread.
    ThreadCreation(std::io::Error),
    /// The scheduler is no longer accepting work.
    ShuttingDown,
}

impl Display for SchedulerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            SchedulerError::ThreadCreation(e) => write!(f, "unable to create I/O worker thread: {e}"),
            SchedulerError::ShuttingDown => f.write_str("I/O scheduler is shutting down"),
        }
    }
}

impl Error for SchedulerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SchedulerError::ThreadCreation(e) => Some(e),
            SchedulerError::ShuttingDown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    DuplicateDevice(u16),
    UnknownDevice(u16),
    /// The device handler refused the configuration arguments.
    HandlerInit { devnum: u16, message: String },
    /// Every subchannel number has been used.
    SubchannelsExhausted,
}

impl Display for AttachError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            AttachError::DuplicateDevice(devnum) => {
                write!(f, "device {devnum:04X} already exists")
            }
            AttachError::UnknownDevice(devnum) => write!(f, "device {devnum:04X} does not exist"),
            AttachError::HandlerInit { devnum, message } => {
                write!(f, "initialization of device {devnum:04X} failed: {message}")
            }
            AttachError::SubchannelsExhausted => f.write_str("no subchannel numbers remain"),
        }
    }
}

impl Error for AttachError {}

#[test]
fn test_channel_status_bits() {
    assert_eq!(ChannelCheck::Program.channel_status(), 0x20);
    assert_eq!(ChannelCheck::Protection.channel_status(), 0x10);
    assert_eq!(ChannelCheck::ChannelData.channel_status(), 0x08);
    assert_eq!(ChannelCheck::ChannelControl.channel_status(), 0x04);
    assert_eq!(
        ChannelCheck::from(AccessFailure::Addressing(0x10_0000)),
        ChannelCheck::Program
    );
}
