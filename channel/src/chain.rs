//! The CCW chain interpreter.
//!
//! A channel program runs on exactly one thread at a time: either the
//! CPU thread which started it (synchronous I/O) or an I/O worker
//! thread.  The device lock is taken only briefly, between CCWs and
//! around status updates; device handlers run without it.
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{event, span, Level};

use base::prelude::*;

use super::device::{CcwExecution, Device, SubchannelState};
use super::error::ChannelCheck;
use super::fetch::{fetch_ccw, AccessControl};
use super::interrupt::InterruptKind;
use super::subchannel::{complete_halt, perform_clear};
use super::system::ChannelSubsystem;
use super::transfer::{copy_iobuf, DataArea};


/// Unit status with which a device asks for the current CCW to be
/// executed again.
const COMMAND_RETRY: u8 = CSW_CE | CSW_DE | CSW_UC | CSW_SM;

/// The largest amount of data-chained write data which is collected
/// for a device that wants it in one piece.
pub(crate) const MAX_MERGED_WRITE: u32 = 0x1_0000;

/// How far a channel program has got.  This is everything needed to
/// continue the program on another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChainCursor {
    /// The next CCW to fetch.
    pub(crate) ccwaddr: u32,
    /// How the next CCW is reached: `CCW_FLAGS_CD`, `CCW_FLAGS_CC`
    /// or zero.
    chained: u8,
    /// The command in effect; during data chaining this is the
    /// command of the first CCW of the data chain.
    command: u8,
    prev_opcode: u8,
    sequence: u32,
    after_tic: bool,
    /// Bytes of data-chained write data collected so far.
    merged: u32,
    /// Do not raise the PCI of the next CCW again.
    skip_pci: bool,
}

impl ChainCursor {
    pub(crate) fn start(ccwaddr: u32) -> ChainCursor {
        ChainCursor {
            ccwaddr,
            chained: 0,
            command: 0,
            prev_opcode: 0,
            sequence: 0,
            after_tic: false,
            merged: 0,
            skip_pci: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionMode {
    /// On the thread of the CPU which issued the start.
    Synchronous,
    Asynchronous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChainOutcome {
    /// Final status has been stored and an interrupt queued.
    Completed,
    /// The program must be continued by a worker thread.
    Escaped,
    /// A reset overtook the program; nothing was stored.
    Abandoned,
}

enum Step {
    Next,
    End,
    Exit(ChainOutcome),
}

struct ChainRun<'a> {
    sys: &'a ChannelSubsystem,
    dev: &'a Arc<Device>,
    arch: Architecture,
    mode: ExecutionMode,
    orb: Orb,
    access: AccessControl,
    generation: u64,
    cursor: ChainCursor,
    /// Where the current merged write sequence began.
    merge_origin: Option<ChainCursor>,
    iobuf: Vec<u8>,
    chanstat: u8,
    unitstat: u8,
    residual: u32,
}

/// Run (or continue) the channel program of `dev`.
pub(crate) fn execute_ccw_chain(
    sys: &ChannelSubsystem,
    dev: &Arc<Device>,
    mode: ExecutionMode,
) -> ChainOutcome {
    let devnum = format!("{:04X}", dev.devnum());
    let span = span!(Level::ERROR, "chain", devnum = %devnum);
    let _enter = span.enter();
    let arch = sys.arch();
    let (run, fresh) = {
        let mut st = dev.lock();
        // A program abandoned by a reset may still be inside the
        // device handler.
        while st.in_flight {
            dev.available_cond.wait(&mut st);
        }
        if !st.busy {
            // Reset (or cleared) before we got here.
            st.resume_point = None;
            return ChainOutcome::Abandoned;
        }
        let resumed = st.resume_point.take();
        st.in_flight = true;
        st.startpending = false;
        st.scsw.flag2 &= !SCSW2_AC_START;
        st.scsw.flag3 |= SCSW3_AC_SCHAC | SCSW3_AC_DEVAC;
        dev.acquire(&mut st);
        let run = ChainRun {
            sys,
            dev,
            arch,
            mode,
            orb: st.orb,
            access: AccessControl::new(&arch, &st.orb, &st.pmcw, sys.address_limit()),
            generation: st.reset_generation,
            cursor: resumed.unwrap_or_else(|| ChainCursor::start(st.orb.ccw_address)),
            merge_origin: None,
            iobuf: Vec::new(),
            chanstat: 0,
            unitstat: 0,
            residual: 0,
        };
        (run, resumed.is_none())
    };
    event!(
        Level::DEBUG,
        "{} channel program at {:08X} ({:?})",
        if fresh { "starting" } else { "continuing" },
        run.cursor.ccwaddr,
        mode
    );
    if fresh {
        dev.handler().start(dev);
    }
    let outcome = run.run();
    dev.land();
    outcome
}

impl<'a> ChainRun<'a> {
    fn run(mut self) -> ChainOutcome {
        loop {
            match self.step() {
                Step::Next => (),
                Step::End => return self.finish(),
                Step::Exit(outcome) => return outcome,
            }
        }
    }

    fn format1(&self) -> bool {
        self.orb.ccw_format() == CcwFormat::Format1
    }

    fn step(&mut self) -> Step {
        if let Some(outcome) = self.check_requests() {
            return Step::Exit(outcome);
        }
        let ccwaddr = self.cursor.ccwaddr;
        let ccw = match fetch_ccw(
            &self.sys.storage,
            self.access.key,
            self.orb.ccw_format(),
            ccwaddr,
        ) {
            Ok(ccw) => ccw,
            Err(check) => return self.channel_check(check),
        };
        let checkpoint = self.cursor;
        self.cursor.ccwaddr = ccwaddr.wrapping_add(CCW_SIZE);

        if is_ccw_tic(ccw.opcode) {
            if self.cursor.after_tic
                || (self.format1() && (ccw.flags != 0 || ccw.count != 0))
                || ccw.address & !self.orb.ccw_format().address_mask() != 0
            {
                return self.channel_check(ChannelCheck::Program);
            }
            self.cursor.after_tic = true;
            self.cursor.ccwaddr = ccw.address;
            return Step::Next;
        }
        self.cursor.after_tic = false;

        let data_chained = self.cursor.chained & CCW_FLAGS_CD != 0;
        if !data_chained {
            if ccw.class() == CommandClass::Invalid {
                return self.channel_check(ChannelCheck::Program);
            }
            self.cursor.prev_opcode = self.cursor.command;
            self.cursor.command = ccw.opcode;
        }
        if ccw.address & !self.orb.ccw_format().address_mask() != 0 {
            return self.channel_check(ChannelCheck::Program);
        }
        if ccw.has_flag(CCW_FLAGS_MIDAW)
            && (!self.arch.midaw_available()
                || !self.format1()
                || !self.orb.midaw_enabled()
                || ccw.flags & (CCW_FLAGS_SKIP | CCW_FLAGS_IDA) != 0)
        {
            return self.channel_check(ChannelCheck::Program);
        }

        if ccw.has_flag(CCW_FLAGS_SUSP) && self.arch.suspend_available() {
            if let Some(step) = self.suspend(checkpoint) {
                return step;
            }
        }

        if ccw.has_flag(CCW_FLAGS_PCI) && !self.cursor.skip_pci {
            self.raise_pci();
        }
        self.cursor.skip_pci = false;

        let count = u32::from(ccw.count);
        if count == 0 && (!self.format1() || ccw.has_flag(CCW_FLAGS_CD) || data_chained) {
            return self.channel_check(ChannelCheck::Program);
        }

        self.transfer_and_execute(&ccw, checkpoint)
    }

    /// Move write data, drive the device, move read data, and decide
    /// how the chain continues.
    fn transfer_and_execute(&mut self, ccw: &Ccw, checkpoint: ChainCursor) -> Step {
        let dev = self.dev;
        let command = self.cursor.command;
        let class = CommandClass::of(command);
        let count = u32::from(ccw.count);
        let immediate = class == CommandClass::Control && dev.handler().is_immediate(command);
        let merging =
            class == CommandClass::Write && dev.handler().merges_data_chained_writes(command);
        let area = DataArea {
            class,
            flags: ccw.flags,
            address: ccw.address,
            count,
            idaw_format: self.orb.idaw_format(),
            page_mask: self.orb.idaw_page_mask(),
        };

        let offset = if merging {
            if self.merge_origin.is_none() {
                self.merge_origin = Some(checkpoint);
            }
            self.cursor.merged
        } else {
            0
        };
        let Some(total) = offset
            .checked_add(count)
            .filter(|total| *total <= MAX_MERGED_WRITE)
        else {
            event!(
                Level::WARN,
                "data-chained write data exceeds {MAX_MERGED_WRITE} bytes"
            );
            self.residual = count;
            self.merge_origin = None;
            self.cursor.merged = 0;
            return self.channel_check(ChannelCheck::ChannelControl);
        };
        let (start, end) = (offset as usize, total as usize);
        if self.iobuf.len() < end {
            self.iobuf.resize(end, 0);
        }
        if class.fetches_from_storage() && !immediate {
            if let Err(check) = copy_iobuf(
                &self.sys.storage,
                &self.arch,
                &self.access,
                &area,
                &mut self.iobuf[start..end],
            ) {
                self.residual = count;
                return self.channel_check(check);
            }
        } else {
            self.iobuf[start..end].fill(0);
        }

        if merging {
            self.cursor.merged = total;
            if ccw.has_flag(CCW_FLAGS_CD) {
                self.cursor.chained = CCW_FLAGS_CD;
                return Step::Next;
            }
        }

        let chained = match self.merge_origin {
            Some(origin) => origin.chained,
            None => self.cursor.chained,
        };
        let exec = CcwExecution {
            opcode: command,
            flags: ccw.flags,
            chained,
            count: total,
            prev_opcode: self.cursor.prev_opcode,
            sequence: self.cursor.sequence,
        };
        let result = dev.handler().execute(dev, &exec, &mut self.iobuf[..end]);

        // Held until read data is in storage, so that a reset cannot
        // come between the check and the store.
        let st = dev.lock();
        if st.reset_generation != self.generation {
            event!(
                Level::DEBUG,
                "channel program abandoned by reset during command {command:02X}"
            );
            return Step::Exit(ChainOutcome::Abandoned);
        }
        if result.retry_async && self.mode == ExecutionMode::Synchronous {
            drop(st);
            let mut resume = self.merge_origin.unwrap_or(checkpoint);
            resume.skip_pci = true;
            return self.escape(resume);
        }
        if result.unitstat == COMMAND_RETRY {
            event!(
                Level::DEBUG,
                "device requests command retry of {:02X}",
                command
            );
            let mut again = self.merge_origin.take().unwrap_or(checkpoint);
            again.skip_pci = true;
            self.cursor = again;
            return Step::Next;
        }

        let residual = result.residual.min(total);
        self.unitstat = result.unitstat;
        self.residual = residual;
        self.merge_origin = None;
        self.cursor.merged = 0;

        if class.stores_into_storage() && !ccw.has_flag(CCW_FLAGS_SKIP) {
            let moved = (total - residual) as usize;
            let buf = if class == CommandClass::ReadBackward {
                &mut self.iobuf[end - moved..end]
            } else {
                &mut self.iobuf[..moved]
            };
            if let Err(check) =
                copy_iobuf(&self.sys.storage, &self.arch, &self.access, &area, buf)
            {
                return self.channel_check(check);
            }
        }
        drop(st);

        let data_chaining = ccw.has_flag(CCW_FLAGS_CD);
        if residual != 0 || (result.more && !data_chaining) {
            let suppressed = (ccw.has_flag(CCW_FLAGS_SLI) && !data_chaining)
                || (self.arch.facilities.incorrect_length_suppression
                    && self.orb.incorrect_length_suppression()
                    && !self.format1()
                    && immediate);
            if !suppressed {
                self.chanstat |= CSW_IL;
            }
        }
        self.cursor.sequence += 1;

        if self.chanstat & (CHANNEL_CHECKS | CSW_IL) != 0 {
            return Step::End;
        }
        let unusual = self.unitstat & !(CSW_CE | CSW_DE | CSW_SM | CSW_CUE) != 0;
        if data_chaining && !unusual {
            self.cursor.chained = CCW_FLAGS_CD;
            return Step::Next;
        }
        if ccw.has_flag(CCW_FLAGS_CC)
            && !unusual
            && self.unitstat & (CSW_CE | CSW_DE) == CSW_CE | CSW_DE
        {
            if self.unitstat & CSW_SM != 0 {
                self.cursor.ccwaddr = self.cursor.ccwaddr.wrapping_add(CCW_SIZE);
            }
            self.cursor.chained = CCW_FLAGS_CC;
            return Step::Next;
        }
        Step::End
    }

    fn channel_check(&mut self, check: ChannelCheck) -> Step {
        event!(
            Level::WARN,
            "{check} in channel program, CCW address {:08X}",
            self.cursor.ccwaddr
        );
        self.chanstat |= check.channel_status();
        Step::End
    }

    /// Look for halt, clear and attention requests made while the
    /// previous CCW was executing.
    fn check_requests(&mut self) -> Option<ChainOutcome> {
        let dev = self.dev;
        let mut st = dev.lock();
        if st.reset_generation != self.generation {
            return Some(ChainOutcome::Abandoned);
        }
        if st.scsw.flag3 & SCSW3_SC_ALERT != 0 {
            event!(Level::DEBUG, "channel program ended by attention");
            st.scsw.flag2 &= !SCSW2_AC;
            st.scsw.flag3 &= !(SCSW3_AC_SCHAC | SCSW3_AC_DEVAC | SCSW3_AC_SUSP);
            st.scsw.flag3 |= SCSW3_SC_PEND;
            st.scsw.ccw_address = self.cursor.ccwaddr;
            return Some(self.end_with(st));
        }
        if st.scsw.flag2 & SCSW2_AC_CLEAR != 0 {
            event!(Level::DEBUG, "channel program ended by clear");
            perform_clear(&self.sys.ioq, dev, &mut st);
            return Some(self.end_with(st));
        }
        if st.scsw.flag2 & SCSW2_AC_HALT != 0 {
            event!(Level::DEBUG, "channel program ended by halt");
            complete_halt(&mut st.scsw);
            st.scsw.ccw_address = self.cursor.ccwaddr;
            return Some(self.end_with(st));
        }
        None
    }

    fn raise_pci(&mut self) {
        let dev = self.dev;
        let mut st = dev.lock();
        st.pciscsw = Scsw {
            flag0: st.scsw.flag0,
            flag1: st.scsw.flag1,
            flag2: SCSW2_FC_START,
            flag3: SCSW3_AC_SCHAC | SCSW3_AC_DEVAC | SCSW3_SC_INTER | SCSW3_SC_PEND,
            ccw_address: self.cursor.ccwaddr,
            unitstat: 0,
            chanstat: CSW_PCI,
            count: 0,
        };
        self.sys
            .ioq
            .queue(&self.arch, dev, &mut st, InterruptKind::Pci);
        drop(st);
        self.sys.intlock.update_io_pending(&self.sys.ioq);
    }

    /// Hand the rest of the program to a worker thread.
    fn escape(&mut self, resume: ChainCursor) -> Step {
        let dev = self.dev;
        let mut st = dev.lock();
        st.resume_point = Some(resume);
        dev.release(&mut st);
        event!(
            Level::DEBUG,
            "moving channel program to a worker thread at {:08X}",
            resume.ccwaddr
        );
        Step::Exit(ChainOutcome::Escaped)
    }

    /// Deal with a CCW whose suspend flag is set.  `None` means the
    /// CCW should be executed (a resume was already pending).
    fn suspend(&mut self, checkpoint: ChainCursor) -> Option<Step> {
        if !self.orb.suspend_control() || self.cursor.chained & CCW_FLAGS_CD != 0 {
            return Some(self.channel_check(ChannelCheck::Program));
        }
        if self.mode == ExecutionMode::Synchronous {
            return Some(self.escape(checkpoint));
        }
        let dev = self.dev;
        let sys = self.sys;
        let mut st = dev.lock();
        if st.scsw.flag2 & SCSW2_AC_RESUM != 0 {
            st.scsw.flag2 &= !SCSW2_AC_RESUM;
            return None;
        }
        let quiet = self.orb.suppress_suspended_interruption();
        st.scsw.ccw_address = self.cursor.ccwaddr;
        st.scsw.unitstat = 0;
        st.scsw.chanstat = 0;
        st.scsw.flag3 = if quiet {
            SCSW3_AC_SUSP
        } else {
            SCSW3_AC_SUSP | SCSW3_SC_INTER | SCSW3_SC_PEND
        };
        st.busy = false;
        st.suspended = true;
        dev.release(&mut st);
        if !quiet {
            sys.ioq.queue(&self.arch, dev, &mut st, InterruptKind::Ordinary);
        }
        drop(st);
        sys.intlock.update_io_pending(&sys.ioq);
        event!(
            Level::DEBUG,
            "channel program suspended at {:08X}",
            checkpoint.ccwaddr
        );
        dev.handler().suspend(dev);

        let mut st = dev.lock();
        while st.reset_generation == self.generation
            && st.scsw.flag2 & (SCSW2_AC_RESUM | SCSW2_AC_HALT | SCSW2_AC_CLEAR) == 0
            && st.scsw.flag3 & SCSW3_SC_ALERT == 0
        {
            dev.resume_cond.wait(&mut st);
        }
        if st.reset_generation != self.generation {
            event!(Level::DEBUG, "suspended channel program abandoned by reset");
            return Some(Step::Exit(ChainOutcome::Abandoned));
        }
        st.suspended = false;
        st.busy = true;
        st.scsw.flag2 &= !SCSW2_AC_RESUM;
        st.scsw.flag3 &= !SCSW3_AC_SUSP;
        st.scsw.flag3 |= SCSW3_AC_SCHAC | SCSW3_AC_DEVAC;
        dev.acquire(&mut st);
        drop(st);
        event!(Level::DEBUG, "channel program resumed");
        dev.handler().resume(dev);
        // Refetch the suspending CCW, as the first CCW of a new chain.
        self.cursor = ChainCursor::start(checkpoint.ccwaddr);
        Some(Step::Next)
    }

    /// Store the final status of a program which ran to its end.
    fn finish(self) -> ChainOutcome {
        let dev = self.dev;
        let mut st = dev.lock();
        if st.reset_generation != self.generation {
            return ChainOutcome::Abandoned;
        }
        if st.scsw.flag2 & SCSW2_AC_CLEAR != 0 {
            perform_clear(&self.sys.ioq, dev, &mut st);
            return self.end_with(st);
        }
        st.scsw.flag2 &= !SCSW2_AC;
        st.scsw.flag3 &= !(SCSW3_AC_SCHAC | SCSW3_AC_DEVAC | SCSW3_AC_SUSP);
        st.scsw.flag3 |= SCSW3_SC_PRI | SCSW3_SC_SEC | SCSW3_SC_PEND;
        if self.chanstat != 0 || self.unitstat & !CSW_SM != CSW_CE | CSW_DE {
            st.scsw.flag3 |= SCSW3_SC_ALERT;
        }
        st.scsw.ccw_address = self.cursor.ccwaddr;
        st.scsw.unitstat = self.unitstat;
        st.scsw.chanstat = self.chanstat;
        st.scsw.count = u16::try_from(self.residual).unwrap_or(u16::MAX);
        event!(
            Level::DEBUG,
            "channel program ended at {:08X}: unit status {:02X}, channel status {:02X}, residual {}",
            self.cursor.ccwaddr,
            self.unitstat,
            self.chanstat,
            self.residual
        );
        self.end_with(st)
    }

    /// The program is over and its status is in the SCSW: give the
    /// device back and queue the interrupt.
    fn end_with(&self, mut st: MutexGuard<'_, SubchannelState>) -> ChainOutcome {
        let dev = self.dev;
        st.busy = false;
        st.startpending = false;
        st.suspended = false;
        st.resume_point = None;
        dev.release(&mut st);
        self.sys
            .ioq
            .queue(&self.arch, dev, &mut st, InterruptKind::Ordinary);
        drop(st);
        dev.handler().end(dev);
        self.sys.intlock.update_io_pending(&self.sys.ioq);
        ChainOutcome::Completed
    }
}
