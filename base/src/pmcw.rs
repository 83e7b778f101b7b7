//! The Path Management Control Word and the Subchannel Information
//! Block which contains it.
//!
//! | Interruption parameter | Flags (Q, ISC, A) | Flags (E, LM, MM, D, T, V) | Device number | LPM | PNOM | LPUM | PIM | MBI   | POM | PAM | CHPIDs | Zone | Flags | Flags | Flags (I, S) |
//! | ---------------------- | ----------------- | -------------------------- | ------------- | --- | ---- | ---- | --- | ----- | --- | --- | ------ | ---- | ----- | ----- | ------------ |
//! | bytes 0-3              | 4                 | 5                          | 6-7           | 8   | 9    | 10   | 11  | 12-13 | 14  | 15  | 16-23  | 24   | 25    | 26    | 27           |
use serde::Serialize;

use crate::decode::{be16, be32, check_len, DecodeError};
use crate::status::{Scsw, SCSW_SIZE};

/// QDIO active.
pub const PMCW4_Q: u8 = 0x80;
/// Interruption subclass.
pub const PMCW4_ISC: u8 = 0x38;
/// Concurrent sense.
pub const PMCW4_A: u8 = 0x01;

/// Enabled.
pub const PMCW5_E: u8 = 0x80;
/// Limit mode.
pub const PMCW5_LM: u8 = 0x60;
pub const PMCW5_LM_NONE: u8 = 0x00;
pub const PMCW5_LM_LOW: u8 = 0x20;
pub const PMCW5_LM_HIGH: u8 = 0x40;
/// Measurement mode.
pub const PMCW5_MM: u8 = 0x18;
/// Multipath mode.
pub const PMCW5_D: u8 = 0x04;
/// Timing facility.
pub const PMCW5_T: u8 = 0x02;
/// Device number valid.
pub const PMCW5_V: u8 = 0x01;

/// Interruption interlock control (I/O assist).
pub const PMCW27_I: u8 = 0x80;
/// Concurrent-sense facility.
pub const PMCW27_S: u8 = 0x01;

/// Size of the PMCW.
pub const PMCW_SIZE: usize = 28;

/// Size of the SCHIB (PMCW, SCSW and model-dependent area).
pub const SCHIB_SIZE: usize = 52;

/// How the subchannel's data addresses are compared with the
/// address-limit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimitMode {
    None,
    /// Addresses must be at or above the limit.
    Low,
    /// Addresses must be below the limit.
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Pmcw {
    pub intparm: u32,
    pub flag4: u8,
    pub flag5: u8,
    pub devnum: u16,
    pub lpm: u8,
    pub pnom: u8,
    pub lpum: u8,
    pub pim: u8,
    pub mbi: u16,
    pub pom: u8,
    pub pam: u8,
    pub chpid: [u8; 8],
    pub zone: u8,
    pub flag25: u8,
    pub flag26: u8,
    pub flag27: u8,
}

impl Pmcw {
    /// The PMCW of a newly configured device: valid, not enabled,
    /// reached through a single channel path.
    #[must_use]
    pub fn for_device(devnum: u16) -> Pmcw {
        let mut chpid = [0u8; 8];
        chpid[0] = (devnum >> 8) as u8;
        Pmcw {
            devnum,
            flag5: PMCW5_V,
            lpm: 0x80,
            pim: 0x80,
            pom: 0xFF,
            pam: 0x80,
            chpid,
            ..Pmcw::default()
        }
    }

    /// Decode a PMCW from its storage image.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 28 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Pmcw, DecodeError> {
        check_len("PMCW", bytes, PMCW_SIZE)?;
        let mut chpid = [0u8; 8];
        chpid.copy_from_slice(&bytes[16..24]);
        Ok(Pmcw {
            intparm: be32(&bytes[0..4]),
            flag4: bytes[4],
            flag5: bytes[5],
            devnum: be16(&bytes[6..8]),
            lpm: bytes[8],
            pnom: bytes[9],
            lpum: bytes[10],
            pim: bytes[11],
            mbi: be16(&bytes[12..14]),
            pom: bytes[14],
            pam: bytes[15],
            chpid,
            zone: bytes[24],
            flag25: bytes[25],
            flag26: bytes[26],
            flag27: bytes[27],
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; PMCW_SIZE] {
        let mut out = [0u8; PMCW_SIZE];
        out[0..4].copy_from_slice(&self.intparm.to_be_bytes());
        out[4] = self.flag4;
        out[5] = self.flag5;
        out[6..8].copy_from_slice(&self.devnum.to_be_bytes());
        out[8] = self.lpm;
        out[9] = self.pnom;
        out[10] = self.lpum;
        out[11] = self.pim;
        out[12..14].copy_from_slice(&self.mbi.to_be_bytes());
        out[14] = self.pom;
        out[15] = self.pam;
        out[16..24].copy_from_slice(&self.chpid);
        out[24] = self.zone;
        out[25] = self.flag25;
        out[26] = self.flag26;
        out[27] = self.flag27;
        out
    }

    /// The interruption subclass, 0-7.
    #[must_use]
    pub fn isc(&self) -> u8 {
        (self.flag4 & PMCW4_ISC) >> 3
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.flag5 & PMCW5_V != 0
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.flag5 & PMCW5_E != 0
    }

    #[must_use]
    pub fn limit_mode(&self) -> LimitMode {
        match self.flag5 & PMCW5_LM {
            PMCW5_LM_LOW => LimitMode::Low,
            PMCW5_LM_HIGH => LimitMode::High,
            _ => LimitMode::None,
        }
    }

    #[must_use]
    pub fn interruption_interlock(&self) -> bool {
        self.flag27 & PMCW27_I != 0
    }
}

/// The Subchannel Information Block stored by STSCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Schib {
    pub pmcw: Pmcw,
    pub scsw: Scsw,
    pub model: [u8; 12],
}

impl Schib {
    #[must_use]
    pub fn encode(&self) -> [u8; SCHIB_SIZE] {
        let mut out = [0u8; SCHIB_SIZE];
        out[0..PMCW_SIZE].copy_from_slice(&self.pmcw.encode());
        out[PMCW_SIZE..PMCW_SIZE + SCSW_SIZE].copy_from_slice(&self.scsw.encode());
        out[PMCW_SIZE + SCSW_SIZE..].copy_from_slice(&self.model);
        out
    }
}

#[test]
fn test_pmcw_isc_and_flags() {
    let mut pmcw = Pmcw::for_device(0x0180);
    assert!(pmcw.is_valid());
    assert!(!pmcw.is_enabled());
    assert_eq!(pmcw.chpid[0], 0x01);
    pmcw.flag4 = 0x28;
    pmcw.flag5 |= PMCW5_E | PMCW5_LM_HIGH;
    assert_eq!(pmcw.isc(), 5);
    assert!(pmcw.is_enabled());
    assert_eq!(pmcw.limit_mode(), LimitMode::High);
    let image = pmcw.encode();
    assert_eq!(&image[6..8], &[0x01, 0x80]);
    assert_eq!(Pmcw::decode(&image).expect("PMCW image should decode"), pmcw);
}

#[test]
fn test_schib_layout() {
    let schib = Schib {
        pmcw: Pmcw::for_device(0x000A),
        scsw: Scsw::default(),
        model: [0u8; 12],
    };
    let image = schib.encode();
    assert_eq!(image.len(), SCHIB_SIZE);
    assert_eq!(image[5], PMCW5_V);
}
