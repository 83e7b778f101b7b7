//! The subchannel instructions: the channel subsystem's side of
//! SSCH, HSCH, CSCH, RSCH, XSCH, TSCH, STSCH and MSCH, and of the
//! S/370 instructions SIO, TIO, HIO and TCH.  Also device attention
//! and the resets.
//!
//! Each instruction completes its bookkeeping under the device lock
//! and returns a condition code.  Work which may block (running a
//! channel program, calling a device handler) is done after the lock
//! has been released.
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use parking_lot::MutexGuard;
use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use super::chain::{execute_ccw_chain, ChainOutcome, ExecutionMode};
use super::config::SyncIoPolicy;
use super::device::{Device, IoActive, SubchannelState};
use super::error::Intercept;
use super::fetch::fetch_ccw;
use super::interrupt::{
    clear_ordinary_status, clear_presented_status, CpuIoState, InterruptKind, IoInterruptQueue,
};
use super::scheduler::{IoScheduler, JobRunner};
use super::system::ChannelSubsystem;

/// The condition code set by an I/O instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Cc {
    Zero,
    One,
    Two,
    Three,
}

impl From<Cc> for u8 {
    fn from(cc: Cc) -> u8 {
        match cc {
            Cc::Zero => 0,
            Cc::One => 1,
            Cc::Two => 2,
            Cc::Three => 3,
        }
    }
}

impl Display for Cc {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "cc{}", u8::from(*self))
    }
}

const ALL_KINDS: [InterruptKind; 3] = [
    InterruptKind::Pci,
    InterruptKind::Ordinary,
    InterruptKind::Attention,
];

/// Finish a halt: the subchannel becomes status pending with
/// channel end and device end.
pub(crate) fn complete_halt(scsw: &mut Scsw) {
    scsw.flag2 &= !SCSW2_AC;
    scsw.flag3 = SCSW3_SC_PRI | SCSW3_SC_SEC | SCSW3_SC_PEND;
    scsw.unitstat = CSW_CE | CSW_DE;
    scsw.chanstat = 0;
    scsw.count = 0;
}

/// Perform the clear function on a subchannel.  The PCI and
/// attention slots are emptied; the caller queues the ordinary
/// interrupt which reports the clear.
pub(crate) fn perform_clear(
    ioq: &IoInterruptQueue,
    dev: &Device,
    st: &mut SubchannelState,
) {
    st.pmcw.pnom = 0;
    st.pmcw.lpum = 0;
    st.scsw = Scsw {
        flag2: SCSW2_FC_CLEAR,
        flag3: SCSW3_SC_PEND,
        ..Scsw::default()
    };
    st.pciscsw = Scsw::default();
    st.attnscsw = Scsw::default();
    ioq.dequeue(dev, st, InterruptKind::Pci);
    ioq.dequeue(dev, st, InterruptKind::Attention);
}

impl ChannelSubsystem {
    /// Under interpretive execution, decide whether the instruction
    /// can be completed for the guest or must be intercepted.
    fn check_intercept(
        &self,
        cpu: &CpuIoState,
        dev: &Device,
        st: &SubchannelState,
    ) -> Result<(), Intercept> {
        let Some(sie) = cpu.sie else {
            return Ok(());
        };
        if !self.config.arch.facilities.io_assist
            || sie.zone != st.pmcw.zone
            || !st.pmcw.interruption_interlock()
        {
            event!(
                Level::DEBUG,
                "intercepting I/O instruction for subchannel {:04X}",
                dev.subchan()
            );
            return Err(Intercept::Instruction {
                subchan: dev.subchan(),
            });
        }
        Ok(())
    }

    fn runner(self: &Arc<Self>) -> Arc<dyn JobRunner> {
        Arc::clone(self) as Arc<dyn JobRunner>
    }

    /// Start Subchannel.
    ///
    /// # Errors
    ///
    /// Returns an intercept when the issuing CPU is a guest whose
    /// instruction must be handled by the host.
    pub fn start_subchan(
        self: &Arc<Self>,
        cpu: &CpuIoState,
        dev: &Arc<Device>,
        orb: &Orb,
    ) -> Result<Cc, Intercept> {
        let st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        let cc = self.start_locked(dev, st, orb);
        event!(Level::DEBUG, "SSCH {:04X}: {cc}", dev.devnum());
        Ok(cc)
    }

    /// S/370 Start I/O, using the channel address word.  When status
    /// is pending the CSW is stored instead, with cc1.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn start_io(
        self: &Arc<Self>,
        cpu: &CpuIoState,
        dev: &Arc<Device>,
        caw: Caw,
    ) -> Result<(Cc, Option<Csw>), Intercept> {
        let mut st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        if st.any_status_pending() {
            let csw = self.take_pending_csw(dev, &mut st);
            drop(st);
            self.intlock.update_io_pending(&self.ioq);
            return Ok((Cc::One, csw));
        }
        let cc = self.start_locked(dev, st, &Orb::from_caw(caw));
        event!(Level::DEBUG, "SIO {:04X}: {cc}", dev.devnum());
        Ok((cc, None))
    }

    fn start_locked(
        self: &Arc<Self>,
        dev: &Arc<Device>,
        mut st: MutexGuard<'_, SubchannelState>,
        orb: &Orb,
    ) -> Cc {
        let arch = self.arch();
        if !st.is_operational(&arch) {
            return Cc::Three;
        }
        if st.any_status_pending() {
            return Cc::One;
        }
        if st.busy || st.startpending || st.suspended {
            return Cc::Two;
        }
        let mut flag0 = orb.key();
        if orb.suspend_control() && arch.suspend_available() {
            flag0 |= SCSW0_S;
        }
        st.orb = *orb;
        st.pmcw.intparm = orb.intparm;
        st.scsw = Scsw {
            flag0,
            flag1: orb.flag5 & (SCSW1_F | SCSW1_P | SCSW1_I | SCSW1_A | SCSW1_U),
            flag2: SCSW2_FC_START | SCSW2_AC_START,
            flag3: 0,
            ccw_address: orb.ccw_address,
            ..Scsw::default()
        };
        st.pciscsw = Scsw::default();
        st.attnscsw = Scsw::default();
        st.busy = true;
        st.startpending = true;
        st.resume_point = None;
        // The CPU must not wait behind a program left over from a
        // reset, so that case always goes to a worker.
        let sync_capable = st.sync_io && !st.in_flight;
        drop(st);

        if sync_capable && self.sync_permitted(dev, orb) {
            if execute_ccw_chain(self, dev, ExecutionMode::Synchronous) == ChainOutcome::Escaped {
                self.submit_escaped(dev);
            }
            return Cc::Zero;
        }
        match self.scheduler.submit(self.runner(), dev) {
            Ok(()) => Cc::Zero,
            Err(e) => {
                event!(Level::WARN, "start of device {:04X} refused: {e}", dev.devnum());
                let mut st = dev.lock();
                st.busy = false;
                st.startpending = false;
                st.scsw.flag2 &= !(SCSW2_FC_START | SCSW2_AC_START);
                Cc::Two
            }
        }
    }

    fn sync_permitted(&self, dev: &Device, orb: &Orb) -> bool {
        match self.config.sync_io {
            SyncIoPolicy::Never => false,
            SyncIoPolicy::Always => true,
            SyncIoPolicy::ShortPrograms => {
                match fetch_ccw(&self.storage, orb.key(), orb.ccw_format(), orb.ccw_address) {
                    Ok(ccw) => match ccw.class() {
                        CommandClass::Sense | CommandClass::TransferInChannel => true,
                        CommandClass::Control => dev.handler().is_immediate(ccw.opcode),
                        _ => false,
                    },
                    Err(_) => true,
                }
            }
        }
    }

    /// A synchronous channel program needs a worker thread after all.
    /// If none can be had, the program ends with a channel control
    /// check.
    fn submit_escaped(self: &Arc<Self>, dev: &Arc<Device>) {
        let Err(e) = self.scheduler.submit(self.runner(), dev) else {
            return;
        };
        event!(
            Level::ERROR,
            "unable to continue channel program for device {:04X}: {e}",
            dev.devnum()
        );
        let arch = self.arch();
        let mut st = dev.lock();
        st.resume_point = None;
        st.busy = false;
        st.startpending = false;
        st.scsw.flag2 &= !SCSW2_AC;
        st.scsw.flag3 = SCSW3_SC_PRI | SCSW3_SC_SEC | SCSW3_SC_ALERT | SCSW3_SC_PEND;
        st.scsw.chanstat = CSW_CCC;
        dev.release(&mut st);
        self.ioq.queue(&arch, dev, &mut st, InterruptKind::Ordinary);
        drop(st);
        self.intlock.update_io_pending(&self.ioq);
    }

    /// Store the highest-priority pending status as a CSW, clearing it
    /// from the subchannel.
    fn take_pending_csw(&self, dev: &Device, st: &mut SubchannelState) -> Option<Csw> {
        let kind = ALL_KINDS
            .into_iter()
            .find(|kind| kind.slot(st).is_status_pending())?;
        let csw = Csw::from_scsw(kind.slot(st));
        clear_presented_status(st, kind);
        self.ioq.dequeue(dev, st, kind);
        Some(csw)
    }

    /// Halt Subchannel.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn halt_subchan(&self, cpu: &CpuIoState, dev: &Arc<Device>) -> Result<Cc, Intercept> {
        let st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        let cc = if !st.is_operational(&self.arch()) {
            Cc::Three
        } else if st.scsw.is_status_pending() && st.scsw.flag3 & SCSW3_SC_INTER == 0 {
            Cc::One
        } else if st.scsw.flag2 & (SCSW2_FC_HALT | SCSW2_FC_CLEAR) != 0 {
            Cc::Two
        } else {
            self.halt_locked(dev, st);
            Cc::Zero
        };
        event!(Level::DEBUG, "HSCH {:04X}: {cc}", dev.devnum());
        Ok(cc)
    }

    /// S/370 Halt I/O.  Pending status is stored as a CSW with cc1.
    /// A working device is signalled to halt; its interruption
    /// follows.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn halt_io(
        &self,
        cpu: &CpuIoState,
        dev: &Arc<Device>,
    ) -> Result<(Cc, Option<Csw>), Intercept> {
        let mut st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        if st.any_status_pending() {
            let csw = self.take_pending_csw(dev, &mut st);
            drop(st);
            self.intlock.update_io_pending(&self.ioq);
            return Ok((Cc::One, csw));
        }
        if st.busy || st.startpending {
            self.halt_locked(dev, st);
        }
        Ok((Cc::Zero, None))
    }

    fn halt_locked(&self, dev: &Arc<Device>, mut st: MutexGuard<'_, SubchannelState>) {
        let arch = self.arch();
        if st.busy || st.startpending || st.suspended {
            st.scsw.flag2 |= SCSW2_FC_HALT | SCSW2_AC_HALT;
            if st.startpending && self.scheduler.cancel(dev) {
                // Never started.
                complete_halt(&mut st.scsw);
                st.busy = false;
                st.startpending = false;
                self.ioq.queue(&arch, dev, &mut st, InterruptKind::Ordinary);
                drop(st);
                self.intlock.update_io_pending(&self.ioq);
            } else if st.suspended {
                dev.resume_cond.notify_all();
            } else {
                drop(st);
                dev.handler().halt(dev);
            }
        } else {
            st.scsw.flag2 |= SCSW2_FC_HALT;
            complete_halt(&mut st.scsw);
            self.ioq.queue(&arch, dev, &mut st, InterruptKind::Ordinary);
            drop(st);
            self.intlock.update_io_pending(&self.ioq);
        }
    }

    /// Clear Subchannel.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn clear_subchan(&self, cpu: &CpuIoState, dev: &Arc<Device>) -> Result<Cc, Intercept> {
        let arch = self.arch();
        let mut st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        if !st.is_operational(&arch) {
            return Ok(Cc::Three);
        }
        if st.busy || st.startpending || st.suspended {
            let never_started = st.startpending && self.scheduler.cancel(dev);
            if never_started {
                st.busy = false;
                st.startpending = false;
            } else {
                st.scsw.flag2 =
                    (st.scsw.flag2 & !(SCSW2_FC | SCSW2_AC)) | SCSW2_FC_CLEAR | SCSW2_AC_CLEAR;
                if st.suspended {
                    dev.resume_cond.notify_all();
                } else {
                    drop(st);
                    dev.handler().halt(dev);
                }
                event!(Level::DEBUG, "CSCH {:04X}: clear signalled", dev.devnum());
                return Ok(Cc::Zero);
            }
        }
        perform_clear(&self.ioq, dev, &mut st);
        self.ioq.queue(&arch, dev, &mut st, InterruptKind::Ordinary);
        drop(st);
        self.intlock.update_io_pending(&self.ioq);
        event!(Level::DEBUG, "CSCH {:04X}: cleared", dev.devnum());
        Ok(Cc::Zero)
    }

    /// Resume Subchannel.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn resume_subchan(&self, cpu: &CpuIoState, dev: &Arc<Device>) -> Result<Cc, Intercept> {
        let mut st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        let cc = if !st.is_operational(&self.arch()) {
            Cc::Three
        } else if st.scsw.is_status_pending() {
            Cc::One
        } else if st.scsw.function_control() != SCSW2_FC_START
            || st.scsw.flag2 & SCSW2_AC_RESUM != 0
            || st.scsw.flag0 & SCSW0_S == 0
        {
            Cc::Two
        } else {
            st.scsw.flag2 |= SCSW2_AC_RESUM;
            if st.suspended {
                dev.resume_cond.notify_all();
            }
            Cc::Zero
        };
        event!(Level::DEBUG, "RSCH {:04X}: {cc}", dev.devnum());
        Ok(cc)
    }

    /// Cancel Subchannel: withdraw a start which no thread has begun
    /// to execute.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn cancel_subchan(&self, cpu: &CpuIoState, dev: &Arc<Device>) -> Result<Cc, Intercept> {
        let mut st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        let cc = if !st.is_operational(&self.arch()) {
            Cc::Three
        } else if st.any_status_pending() {
            Cc::One
        } else if st.startpending && st.resume_point.is_none() && self.scheduler.cancel(dev) {
            st.busy = false;
            st.startpending = false;
            st.scsw.flag2 &= !(SCSW2_FC | SCSW2_AC);
            st.scsw.flag3 &= !SCSW3_AC;
            Cc::Zero
        } else {
            Cc::Two
        };
        event!(Level::DEBUG, "XSCH {:04X}: {cc}", dev.devnum());
        Ok(cc)
    }

    /// Test Subchannel.  With cc0 the IRB holds the status which was
    /// pending, and that status has been cleared; with cc1 nothing
    /// was pending and the IRB holds the current SCSW.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn test_subchan(
        &self,
        cpu: &CpuIoState,
        dev: &Arc<Device>,
    ) -> Result<(Cc, Irb), Intercept> {
        let mut st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        if self.arch().mode.has_channel_subsystem() && !st.pmcw.is_valid() {
            return Ok((Cc::Three, Irb::new(Scsw::default())));
        }
        let (cc, irb) = if st.pciscsw.is_status_pending() {
            let irb = Irb::new(st.pciscsw);
            st.pciscsw = Scsw::default();
            self.ioq.dequeue(dev, &mut st, InterruptKind::Pci);
            (Cc::Zero, irb)
        } else if st.scsw.is_status_pending() {
            let mut irb = Irb::new(st.scsw);
            irb.esw[1] = st.pmcw.lpum;
            if st.scsw.unitstat & CSW_UC != 0 && st.numsense > 0 {
                irb.ecw = st.sense;
                irb.esw[4] |= ERW0_S;
                irb.scsw.flag0 |= SCSW0_L;
            }
            clear_ordinary_status(&mut st.scsw);
            self.ioq.dequeue(dev, &mut st, InterruptKind::Ordinary);
            (Cc::Zero, irb)
        } else if st.attnscsw.is_status_pending() {
            let irb = Irb::new(st.attnscsw);
            st.attnscsw = Scsw::default();
            self.ioq.dequeue(dev, &mut st, InterruptKind::Attention);
            (Cc::Zero, irb)
        } else {
            (Cc::One, Irb::new(st.scsw))
        };
        drop(st);
        self.intlock.update_io_pending(&self.ioq);
        event!(Level::DEBUG, "TSCH {:04X}: {cc}", dev.devnum());
        Ok((cc, irb))
    }

    /// S/370 Test I/O.  Pending status is stored as a CSW and
    /// cleared.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn test_io(
        &self,
        cpu: &CpuIoState,
        dev: &Arc<Device>,
    ) -> Result<(Cc, Option<Csw>), Intercept> {
        let mut st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        if st.busy {
            return Ok((Cc::Two, None));
        }
        let Some(csw) = self.take_pending_csw(dev, &mut st) else {
            return Ok((Cc::Zero, None));
        };
        drop(st);
        self.intlock.update_io_pending(&self.ioq);
        Ok((Cc::One, Some(csw)))
    }

    /// S/370 Test Channel.
    #[must_use]
    pub fn test_channel(&self, channel: u8) -> Cc {
        if !self
            .devices
            .all()
            .iter()
            .any(|dev| dev.channel() == channel)
        {
            Cc::Three
        } else if self.ioq.has_channel(channel) {
            Cc::One
        } else {
            Cc::Zero
        }
    }

    /// Store Subchannel.
    #[must_use]
    pub fn store_subchan(&self, dev: &Device) -> Schib {
        let st = dev.lock();
        Schib {
            pmcw: st.pmcw,
            scsw: st.scsw,
            model: [0; 12],
        }
    }

    /// Modify Subchannel: replace the program-modifiable fields of the
    /// PMCW with those of `pmcw`.
    ///
    /// # Errors
    ///
    /// See [`ChannelSubsystem::start_subchan`].
    pub fn modify_subchan(
        &self,
        cpu: &CpuIoState,
        dev: &Arc<Device>,
        pmcw: &Pmcw,
    ) -> Result<Cc, Intercept> {
        let mut st = dev.lock();
        self.check_intercept(cpu, dev, &st)?;
        let cc = if !st.pmcw.is_valid() {
            Cc::Three
        } else if st.any_status_pending() {
            Cc::One
        } else if st.busy || st.startpending || st.suspended {
            Cc::Two
        } else {
            let settable = PMCW5_E | PMCW5_LM | PMCW5_MM | PMCW5_D | PMCW5_T;
            st.pmcw.intparm = pmcw.intparm;
            st.pmcw.flag4 = (st.pmcw.flag4 & !(PMCW4_ISC | PMCW4_A)) | (pmcw.flag4 & (PMCW4_ISC | PMCW4_A));
            st.pmcw.flag5 = (st.pmcw.flag5 & !settable) | (pmcw.flag5 & settable);
            st.pmcw.lpm = pmcw.lpm;
            st.pmcw.mbi = pmcw.mbi;
            st.pmcw.zone = pmcw.zone;
            st.pmcw.flag27 = pmcw.flag27 & (PMCW27_I | PMCW27_S);
            Cc::Zero
        };
        event!(Level::DEBUG, "MSCH {:04X}: {cc}", dev.devnum());
        Ok(cc)
    }

    /// Enable a subchannel for I/O with interruption subclass `isc`.
    /// This is what an operating system's first Modify Subchannel
    /// for a device normally does.
    #[must_use]
    pub fn enable_subchan(&self, dev: &Arc<Device>, isc: u8) -> Cc {
        let mut pmcw = self.store_subchan(dev).pmcw;
        pmcw.flag4 = (pmcw.flag4 & !PMCW4_ISC) | ((isc << 3) & PMCW4_ISC);
        pmcw.flag5 |= PMCW5_E;
        self.modify_subchan(&CpuIoState::default(), dev, &pmcw)
            .unwrap_or(Cc::Three)
    }

    /// Present unsolicited status from a device.  A suspended channel
    /// program is resumed and then ends with alert status.
    pub fn device_attention(&self, dev: &Arc<Device>, unitstat: u8) -> Cc {
        let arch = self.arch();
        let mut st = dev.lock();
        if !st.is_operational(&arch) {
            return Cc::Three;
        }
        if st.busy || st.suspended || st.any_status_pending() {
            if !st.suspended {
                return Cc::One;
            }
            // The channel program makes the status pending when it
            // wakes up and sees the alert.
            st.scsw.unitstat |= unitstat;
            st.scsw.flag3 |= SCSW3_SC_ALERT;
            st.scsw.flag2 |= SCSW2_AC_RESUM;
            dev.resume_cond.notify_all();
            event!(
                Level::DEBUG,
                "attention resumes suspended device {:04X}",
                dev.devnum()
            );
            return Cc::Zero;
        }
        st.attnscsw = Scsw {
            flag3: SCSW3_SC_ALERT | SCSW3_SC_PEND,
            unitstat,
            ..Scsw::default()
        };
        self.ioq.queue(&arch, dev, &mut st, InterruptKind::Attention);
        drop(st);
        dev.handler().attention(dev);
        self.intlock.update_io_pending(&self.ioq);
        Cc::Zero
    }

    /// Return a device to its initial state, abandoning any channel
    /// program and discarding all of its status.
    pub fn device_reset(&self, dev: &Arc<Device>) {
        let mut st = dev.lock();
        for kind in ALL_KINDS {
            self.ioq.dequeue(dev, &mut st, kind);
        }
        if st.startpending {
            self.scheduler.cancel(dev);
        }
        st.busy = false;
        st.startpending = false;
        st.suspended = false;
        st.reserved = false;
        st.resume_point = None;
        st.scsw = Scsw::default();
        st.pciscsw = Scsw::default();
        st.attnscsw = Scsw::default();
        st.pmcw.intparm = 0;
        st.pmcw.flag4 &= !(PMCW4_ISC | PMCW4_A);
        st.pmcw.flag5 &= PMCW5_V;
        st.pmcw.pnom = 0;
        st.pmcw.lpum = 0;
        st.pmcw.mbi = 0;
        st.pmcw.flag27 = 0;
        st.sense = [0; ECW_SIZE];
        st.numsense = 0;
        if st.ioactive == IoActive::Local {
            st.ioactive = IoActive::None;
        }
        st.reset_generation += 1;
        dev.resume_cond.notify_all();
        dev.available_cond.notify_all();
        drop(st);
        self.intlock.update_io_pending(&self.ioq);
        event!(Level::DEBUG, "device {:04X} reset", dev.devnum());
    }

    /// I/O system reset: reset every device.
    pub fn io_reset(&self) {
        for dev in self.devices.all() {
            self.device_reset(&dev);
        }
        event!(Level::INFO, "I/O system reset");
    }

    /// Reset every device reached through channel path `chpid` (the
    /// channel number in S/370 mode).
    pub fn channel_reset(&self, chpid: u8) {
        for dev in self.devices.all() {
            if dev.status().pmcw.chpid[0] == chpid {
                self.device_reset(&dev);
            }
        }
        event!(Level::INFO, "channel {chpid:02X} reset");
    }
}

