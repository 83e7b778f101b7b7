//! Status words: the S/370 Channel Status Word, the Subchannel
//! Status Word, and the Interruption Response Block.
//!
//! ## SCSW
//!
//! | Flags (key, S, L, CC) | Flags (F, P, I, A, U, Z, E, N) | Flags (Q, FC, AC) | Flags (AC, SC) | CCW address | Unit status | Channel status | Count |
//! | --------------------- | ------------------------------ | ----------------- | -------------- | ----------- | ----------- | -------------- | ----- |
//! | byte 0                | 1                              | 2                 | 3              | bytes 4-7   | 8           | 9              | 10-11 |
//!
//! ## CSW
//!
//! | Key    | CCW address | Unit status | Channel status | Count |
//! | ------ | ----------- | ----------- | -------------- | ----- |
//! | byte 0 | bytes 1-3   | 4           | 5              | 6-7   |
use serde::Serialize;

use crate::arch::Architecture;
use crate::decode::{be16, be32, check_len, DecodeError};

/// Attention.
pub const CSW_ATTN: u8 = 0x80;
/// Status modifier.
pub const CSW_SM: u8 = 0x40;
/// Control unit end.
pub const CSW_CUE: u8 = 0x20;
/// Busy.
pub const CSW_BUSY: u8 = 0x10;
/// Channel end.
pub const CSW_CE: u8 = 0x08;
/// Device end.
pub const CSW_DE: u8 = 0x04;
/// Unit check.
pub const CSW_UC: u8 = 0x02;
/// Unit exception.
pub const CSW_UX: u8 = 0x01;

/// Program-controlled interruption.
pub const CSW_PCI: u8 = 0x80;
/// Incorrect length.
pub const CSW_IL: u8 = 0x40;
/// Program check.
pub const CSW_PROGC: u8 = 0x20;
/// Protection check.
pub const CSW_PROTC: u8 = 0x10;
/// Channel data check.
pub const CSW_CDC: u8 = 0x08;
/// Channel control check.
pub const CSW_CCC: u8 = 0x04;
/// Interface control check.
pub const CSW_ICC: u8 = 0x02;
/// Chaining check.
pub const CSW_CHC: u8 = 0x01;

/// Channel status bits which terminate a channel program.
pub const CHANNEL_CHECKS: u8 = CSW_PROGC | CSW_PROTC | CSW_CDC | CSW_CCC | CSW_ICC | CSW_CHC;

pub const SCSW0_KEY: u8 = 0xF0;
/// Suspend control.
pub const SCSW0_S: u8 = 0x08;
/// Extended status word format.
pub const SCSW0_L: u8 = 0x04;
/// Deferred condition code.
pub const SCSW0_CC: u8 = 0x03;

pub const SCSW1_F: u8 = 0x80;
pub const SCSW1_P: u8 = 0x40;
pub const SCSW1_I: u8 = 0x20;
pub const SCSW1_A: u8 = 0x10;
pub const SCSW1_U: u8 = 0x08;
/// Zero condition code.
pub const SCSW1_Z: u8 = 0x04;
/// Extended control.
pub const SCSW1_E: u8 = 0x02;
/// Path not operational.
pub const SCSW1_N: u8 = 0x01;

pub const SCSW2_Q: u8 = 0x80;
/// Function control.
pub const SCSW2_FC: u8 = 0x70;
pub const SCSW2_FC_START: u8 = 0x40;
pub const SCSW2_FC_HALT: u8 = 0x20;
pub const SCSW2_FC_CLEAR: u8 = 0x10;
/// Activity control, part held in flag byte 2.
pub const SCSW2_AC: u8 = 0x0F;
pub const SCSW2_AC_RESUM: u8 = 0x08;
pub const SCSW2_AC_START: u8 = 0x04;
pub const SCSW2_AC_HALT: u8 = 0x02;
pub const SCSW2_AC_CLEAR: u8 = 0x01;

/// Activity control, part held in flag byte 3.
pub const SCSW3_AC: u8 = 0xE0;
pub const SCSW3_AC_SCHAC: u8 = 0x80;
pub const SCSW3_AC_DEVAC: u8 = 0x40;
pub const SCSW3_AC_SUSP: u8 = 0x20;
/// Status control.
pub const SCSW3_SC: u8 = 0x1F;
pub const SCSW3_SC_ALERT: u8 = 0x10;
pub const SCSW3_SC_INTER: u8 = 0x08;
pub const SCSW3_SC_PRI: u8 = 0x04;
pub const SCSW3_SC_SEC: u8 = 0x02;
pub const SCSW3_SC_PEND: u8 = 0x01;

/// Concurrent sense: the ECW holds sense data.
pub const ERW0_S: u8 = 0x01;

pub const SCSW_SIZE: usize = 12;
pub const CSW_SIZE: usize = 8;
pub const IRB_SIZE: usize = 64;
pub const ESW_SIZE: usize = 20;
pub const ECW_SIZE: usize = 32;

/// The accessors which the S/370 and channel-subsystem status words
/// have in common.  Code which only needs these fields can be
/// written once for both layouts.
pub trait StatusAccess {
    fn unit_status(&self) -> u8;
    fn channel_status(&self) -> u8;
    fn residual_count(&self) -> u16;
    /// Address of the CCW following the last one executed.
    fn ccw_address(&self) -> u32;
    fn set_unit_status(&mut self, unitstat: u8);
    fn set_channel_status(&mut self, chanstat: u8);
    fn set_residual_count(&mut self, count: u16);
    fn set_ccw_address(&mut self, addr: u32);
}

/// Subchannel Status Word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Scsw {
    pub flag0: u8,
    pub flag1: u8,
    pub flag2: u8,
    pub flag3: u8,
    pub ccw_address: u32,
    pub unitstat: u8,
    pub chanstat: u8,
    pub count: u16,
}

impl Scsw {
    /// Decode an SCSW from its storage image.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 12 bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Scsw, DecodeError> {
        check_len("SCSW", bytes, SCSW_SIZE)?;
        Ok(Scsw {
            flag0: bytes[0],
            flag1: bytes[1],
            flag2: bytes[2],
            flag3: bytes[3],
            ccw_address: be32(&bytes[4..8]),
            unitstat: bytes[8],
            chanstat: bytes[9],
            count: be16(&bytes[10..12]),
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; SCSW_SIZE] {
        let mut out = [0u8; SCSW_SIZE];
        out[0] = self.flag0;
        out[1] = self.flag1;
        out[2] = self.flag2;
        out[3] = self.flag3;
        out[4..8].copy_from_slice(&self.ccw_address.to_be_bytes());
        out[8] = self.unitstat;
        out[9] = self.chanstat;
        out[10..12].copy_from_slice(&self.count.to_be_bytes());
        out
    }

    #[must_use]
    pub fn function_control(&self) -> u8 {
        self.flag2 & SCSW2_FC
    }

    #[must_use]
    pub fn status_control(&self) -> u8 {
        self.flag3 & SCSW3_SC
    }

    #[must_use]
    pub fn is_status_pending(&self) -> bool {
        self.flag3 & SCSW3_SC_PEND != 0
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.flag3 & SCSW3_AC_SUSP != 0
    }

    #[must_use]
    pub fn key(&self) -> u8 {
        self.flag0 & SCSW0_KEY
    }
}

impl StatusAccess for Scsw {
    fn unit_status(&self) -> u8 {
        self.unitstat
    }
    fn channel_status(&self) -> u8 {
        self.chanstat
    }
    fn residual_count(&self) -> u16 {
        self.count
    }
    fn ccw_address(&self) -> u32 {
        self.ccw_address
    }
    fn set_unit_status(&mut self, unitstat: u8) {
        self.unitstat = unitstat;
    }
    fn set_channel_status(&mut self, chanstat: u8) {
        self.chanstat = chanstat;
    }
    fn set_residual_count(&mut self, count: u16) {
        self.count = count;
    }
    fn set_ccw_address(&mut self, addr: u32) {
        self.ccw_address = addr;
    }
}

/// The S/370 Channel Status Word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Csw {
    pub key: u8,
    pub ccw_address: u32,
    pub unitstat: u8,
    pub chanstat: u8,
    pub count: u16,
}

impl Csw {
    #[must_use]
    pub fn from_scsw(scsw: &Scsw) -> Csw {
        Csw {
            key: scsw.key(),
            ccw_address: scsw.ccw_address & 0x00FF_FFFF,
            unitstat: scsw.unitstat,
            chanstat: scsw.chanstat,
            count: scsw.count,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; CSW_SIZE] {
        let addr = self.ccw_address.to_be_bytes();
        let count = self.count.to_be_bytes();
        [
            self.key & 0xF0,
            addr[1],
            addr[2],
            addr[3],
            self.unitstat,
            self.chanstat,
            count[0],
            count[1],
        ]
    }
}

impl StatusAccess for Csw {
    fn unit_status(&self) -> u8 {
        self.unitstat
    }
    fn channel_status(&self) -> u8 {
        self.chanstat
    }
    fn residual_count(&self) -> u16 {
        self.count
    }
    fn ccw_address(&self) -> u32 {
        self.ccw_address
    }
    fn set_unit_status(&mut self, unitstat: u8) {
        self.unitstat = unitstat;
    }
    fn set_channel_status(&mut self, chanstat: u8) {
        self.chanstat = chanstat;
    }
    fn set_residual_count(&mut self, count: u16) {
        self.count = count;
    }
    fn set_ccw_address(&mut self, addr: u32) {
        self.ccw_address = addr & 0x00FF_FFFF;
    }
}

/// The status word which is made visible to the program, in the
/// layout of the architecture in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusWord {
    Legacy(Csw),
    Structured(Scsw),
}

impl StatusWord {
    #[must_use]
    pub fn for_arch(arch: &Architecture, scsw: &Scsw) -> StatusWord {
        if arch.uses_csw() {
            StatusWord::Legacy(Csw::from_scsw(scsw))
        } else {
            StatusWord::Structured(*scsw)
        }
    }

    /// The storage image: 8 bytes for a CSW, 12 for an SCSW.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            StatusWord::Legacy(csw) => csw.encode().to_vec(),
            StatusWord::Structured(scsw) => scsw.encode().to_vec(),
        }
    }

    fn inner(&self) -> &dyn StatusAccess {
        match self {
            StatusWord::Legacy(csw) => csw,
            StatusWord::Structured(scsw) => scsw,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn StatusAccess {
        match self {
            StatusWord::Legacy(csw) => csw,
            StatusWord::Structured(scsw) => scsw,
        }
    }
}

impl StatusAccess for StatusWord {
    fn unit_status(&self) -> u8 {
        self.inner().unit_status()
    }
    fn channel_status(&self) -> u8 {
        self.inner().channel_status()
    }
    fn residual_count(&self) -> u16 {
        self.inner().residual_count()
    }
    fn ccw_address(&self) -> u32 {
        self.inner().ccw_address()
    }
    fn set_unit_status(&mut self, unitstat: u8) {
        self.inner_mut().set_unit_status(unitstat);
    }
    fn set_channel_status(&mut self, chanstat: u8) {
        self.inner_mut().set_channel_status(chanstat);
    }
    fn set_residual_count(&mut self, count: u16) {
        self.inner_mut().set_residual_count(count);
    }
    fn set_ccw_address(&mut self, addr: u32) {
        self.inner_mut().set_ccw_address(addr);
    }
}

/// Interruption Response Block, stored by TSCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Irb {
    pub scsw: Scsw,
    pub esw: [u8; ESW_SIZE],
    pub ecw: [u8; ECW_SIZE],
}

impl Irb {
    #[must_use]
    pub fn new(scsw: Scsw) -> Irb {
        Irb {
            scsw,
            esw: [0u8; ESW_SIZE],
            ecw: [0u8; ECW_SIZE],
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; IRB_SIZE] {
        let mut out = [0u8; IRB_SIZE];
        out[0..SCSW_SIZE].copy_from_slice(&self.scsw.encode());
        out[SCSW_SIZE..SCSW_SIZE + ESW_SIZE].copy_from_slice(&self.esw);
        out[SCSW_SIZE + ESW_SIZE..].copy_from_slice(&self.ecw);
        out
    }
}

#[test]
fn test_scsw_layout() {
    let scsw = Scsw {
        flag0: 0x30,
        flag1: SCSW1_F,
        flag2: SCSW2_FC_START,
        flag3: SCSW3_SC_PRI | SCSW3_SC_SEC | SCSW3_SC_PEND,
        ccw_address: 0x0000_1010,
        unitstat: CSW_CE | CSW_DE,
        chanstat: 0,
        count: 3,
    };
    let image = scsw.encode();
    assert_eq!(
        image,
        [0x30, 0x80, 0x40, 0x07, 0x00, 0x00, 0x10, 0x10, 0x0C, 0x00, 0x00, 0x03]
    );
    assert_eq!(Scsw::decode(&image).expect("SCSW image should decode"), scsw);
    assert!(scsw.is_status_pending());
    assert!(!scsw.is_suspended());
}

#[test]
fn test_csw_from_scsw() {
    let scsw = Scsw {
        flag0: 0x50,
        ccw_address: 0x0F12_3456,
        unitstat: CSW_CE | CSW_DE | CSW_UC,
        chanstat: CSW_IL,
        count: 0x10,
        ..Scsw::default()
    };
    let csw = Csw::from_scsw(&scsw);
    assert_eq!(
        csw.encode(),
        [0x50, 0x12, 0x34, 0x56, 0x0E, 0x40, 0x00, 0x10]
    );
}

#[test]
fn test_status_word_accessors() {
    use crate::arch::ArchMode;
    let scsw = Scsw {
        ccw_address: 0x0100_0008,
        unitstat: CSW_CE,
        ..Scsw::default()
    };
    let mut legacy = StatusWord::for_arch(&Architecture::new(ArchMode::S370), &scsw);
    let structured = StatusWord::for_arch(&Architecture::new(ArchMode::ZArch), &scsw);
    assert_eq!(legacy.ccw_address(), 0x0000_0008);
    assert_eq!(structured.ccw_address(), 0x0100_0008);
    assert_eq!(legacy.encode().len(), CSW_SIZE);
    assert_eq!(structured.encode().len(), SCSW_SIZE);
    legacy.set_unit_status(CSW_CE | CSW_DE);
    assert_eq!(legacy.unit_status(), CSW_CE | CSW_DE);
}
