//! Architecture modes, and the optional facilities which alter the
//! behaviour of the channel subsystem.
//!
//! The three architectures share one implementation of the channel
//! subsystem.  Where they differ (which status word is stored, which
//! CCW flags are meaningful, how large an address a format-2 IDAW may
//! hold) the code consults an [`Architecture`] value rather than
//! being compiled once per architecture.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// The architecture the emulated machine is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ArchMode {
    /// System/370: channels, SIO/TIO/HIO and the 8-byte CSW.
    S370,
    /// ESA/390: the channel subsystem, SSCH/TSCH and the SCSW.
    Esa390,
    /// z/Architecture: as ESA/390 but with 64-bit addressing.
    ZArch,
}

impl ArchMode {
    #[must_use]
    pub const fn all_modes() -> [ArchMode; 3] {
        [ArchMode::S370, ArchMode::Esa390, ArchMode::ZArch]
    }

    /// True for the architectures in which I/O is performed through
    /// subchannels rather than S/370 channels.
    #[must_use]
    pub fn has_channel_subsystem(&self) -> bool {
        !matches!(self, ArchMode::S370)
    }

    /// The highest data address a format-2 IDAW may contain.
    #[must_use]
    pub fn format2_idaw_limit(&self) -> u64 {
        match self {
            ArchMode::ZArch => u64::MAX,
            ArchMode::S370 | ArchMode::Esa390 => 0x7FFF_FFFF,
        }
    }
}

impl Display for ArchMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            ArchMode::S370 => "S/370",
            ArchMode::Esa390 => "ESA/390",
            ArchMode::ZArch => "z/Arch",
        })
    }
}

#[derive(Debug)]
pub struct UnknownArchName(String);

impl Display for UnknownArchName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "unknown architecture name '{}'", self.0)
    }
}

impl Error for UnknownArchName {}

impl TryFrom<&str> for ArchMode {
    type Error = UnknownArchName;
    fn try_from(s: &str) -> Result<ArchMode, UnknownArchName> {
        match s.to_ascii_lowercase().as_str() {
            "s370" | "s/370" => Ok(ArchMode::S370),
            "esa390" | "esa/390" => Ok(ArchMode::Esa390),
            "z" | "zarch" | "z/arch" | "esame" => Ok(ArchMode::ZArch),
            _ => Err(UnknownArchName(s.to_owned())),
        }
    }
}

/// Optional facilities of the channel subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Facilities {
    /// Modified indirect data addressing.
    pub midaw: bool,
    /// Incorrect-length-indication suppression (ORB L bit).
    pub incorrect_length_suppression: bool,
    /// Address-limit checking (ORB A bit, PMCW limit mode).
    pub address_limit_checking: bool,
    /// Interpretive-execution I/O assist.  When enabled, subchannel
    /// instructions issued by a guest whose zone does not own the
    /// subchannel are intercepted.
    pub io_assist: bool,
}

impl Facilities {
    /// The facilities installed by default in each architecture.
    #[must_use]
    pub fn standard(mode: ArchMode) -> Facilities {
        match mode {
            ArchMode::S370 => Facilities {
                midaw: false,
                incorrect_length_suppression: false,
                address_limit_checking: false,
                io_assist: false,
            },
            ArchMode::Esa390 => Facilities {
                midaw: false,
                incorrect_length_suppression: true,
                address_limit_checking: true,
                io_assist: false,
            },
            ArchMode::ZArch => Facilities {
                midaw: true,
                incorrect_length_suppression: true,
                address_limit_checking: true,
                io_assist: false,
            },
        }
    }
}

/// Describes the machine the channel subsystem is part of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Architecture {
    pub mode: ArchMode,
    pub facilities: Facilities,
}

impl Architecture {
    #[must_use]
    pub fn new(mode: ArchMode) -> Architecture {
        Architecture {
            mode,
            facilities: Facilities::standard(mode),
        }
    }

    /// S/370 stores a CSW; the other architectures store an SCSW.
    #[must_use]
    pub fn uses_csw(&self) -> bool {
        !self.mode.has_channel_subsystem()
    }

    /// Suspend and resume exist only in the channel subsystem.
    #[must_use]
    pub fn suspend_available(&self) -> bool {
        self.mode.has_channel_subsystem()
    }

    #[must_use]
    pub fn midaw_available(&self) -> bool {
        self.mode.has_channel_subsystem() && self.facilities.midaw
    }
}

#[test]
fn test_arch_name_round_trip() {
    for mode in ArchMode::all_modes() {
        let name = mode.to_string();
        match ArchMode::try_from(name.as_str()) {
            Ok(m) => assert_eq!(m, mode),
            Err(e) => panic!("unable to round-trip arch mode {mode:?}: {e}"),
        }
    }
    assert!(ArchMode::try_from("pdp-11").is_err());
}

#[test]
fn test_midaw_needs_channel_subsystem() {
    let mut arch = Architecture::new(ArchMode::S370);
    arch.facilities.midaw = true;
    assert!(!arch.midaw_available());
    assert!(Architecture::new(ArchMode::ZArch).midaw_available());
    assert!(!Architecture::new(ArchMode::Esa390).midaw_available());
}
