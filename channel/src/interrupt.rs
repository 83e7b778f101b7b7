//! The I/O interrupt queue and its presentation to CPUs.
//!
//! Each device can have up to three interrupts queued at once, one
//! per status slot.  The queue is kept in priority order (interruption
//! subclass, or channel number in S/370 mode) and is FIFO among
//! entries of equal priority.
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use super::device::{Device, SubchannelState};
use super::system::ChannelSubsystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InterruptKind {
    /// Program-controlled interruption, raised mid-program.
    Pci,
    Ordinary,
    /// Unsolicited attention status from the device.
    Attention,
}

impl InterruptKind {
    pub(crate) fn queued_flag(self, st: &mut SubchannelState) -> &mut bool {
        match self {
            InterruptKind::Pci => &mut st.pcipending,
            InterruptKind::Ordinary => &mut st.pending,
            InterruptKind::Attention => &mut st.attnpending,
        }
    }

    pub(crate) fn slot(self, st: &mut SubchannelState) -> &mut Scsw {
        match self {
            InterruptKind::Pci => &mut st.pciscsw,
            InterruptKind::Ordinary => &mut st.scsw,
            InterruptKind::Attention => &mut st.attnscsw,
        }
    }
}

/// Interpretive-execution state of a CPU running a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SieState {
    pub zone: u8,
}

/// The parts of a CPU's state which govern I/O instructions and I/O
/// interruptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuIoState {
    pub cpu: usize,
    /// S/370 extended-control mode.  Ignored in the other modes.
    pub ec_mode: bool,
    /// The PSW system mask.
    pub sysmask: u8,
    pub cr2: u32,
    pub cr6: u32,
    pub sie: Option<SieState>,
}

const PSW_IO_MASK: u8 = 0x02;

impl CpuIoState {
    /// A CPU open to I/O interruptions from every channel and every
    /// interruption subclass.
    #[must_use]
    pub fn enabled(cpu: usize) -> CpuIoState {
        CpuIoState {
            cpu,
            ec_mode: true,
            sysmask: 0xFF,
            cr2: 0xFFFF_FFFF,
            cr6: 0xFF00_0000,
            sie: None,
        }
    }

    /// Whether this CPU would take an interrupt of queue priority
    /// `priority` (a channel number in S/370 mode, otherwise an
    /// interruption subclass).
    #[must_use]
    pub fn is_enabled_for(&self, arch: &Architecture, priority: u8) -> bool {
        if arch.uses_csw() {
            let channel = u32::from(priority);
            if !self.ec_mode && channel < 6 {
                self.sysmask & (0x80 >> channel) != 0
            } else {
                self.sysmask & PSW_IO_MASK != 0
                    && channel < 32
                    && self.cr2 & (0x8000_0000 >> channel) != 0
            }
        } else {
            self.sysmask & PSW_IO_MASK != 0
                && priority < 8
                && self.cr6 & (0x8000_0000 >> priority) != 0
        }
    }
}

struct QueueEntry {
    device: Arc<Device>,
    kind: InterruptKind,
    priority: u8,
}

#[derive(Default)]
pub struct IoInterruptQueue {
    entries: Mutex<Vec<QueueEntry>>,
}

impl std::fmt::Debug for IoInterruptQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_struct("IoInterruptQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl IoInterruptQueue {
    /// Put an interrupt of kind `kind` for `dev` on the queue.  The
    /// caller holds the device lock (whose guarded state is `st`).
    /// Queueing a kind which is already queued does nothing.
    pub(crate) fn queue(
        &self,
        arch: &Architecture,
        dev: &Arc<Device>,
        st: &mut SubchannelState,
        kind: InterruptKind,
    ) {
        let flag = kind.queued_flag(st);
        if *flag {
            return;
        }
        *flag = true;
        let priority = if arch.uses_csw() {
            dev.channel()
        } else {
            st.pmcw.isc()
        };
        let mut entries = self.entries.lock();
        let pos = entries
            .iter()
            .position(|e| e.priority > priority)
            .unwrap_or(entries.len());
        entries.insert(
            pos,
            QueueEntry {
                device: Arc::clone(dev),
                kind,
                priority,
            },
        );
        event!(
            Level::DEBUG,
            "queued {kind:?} interrupt for device {:04X} at priority {priority}",
            dev.devnum()
        );
    }

    /// Take an interrupt off the queue, if it is there.  The caller
    /// holds the device lock.
    pub(crate) fn dequeue(&self, dev: &Device, st: &mut SubchannelState, kind: InterruptKind) {
        let flag = kind.queued_flag(st);
        if !*flag {
            return;
        }
        *flag = false;
        self.entries
            .lock()
            .retain(|e| !(e.kind == kind && std::ptr::eq(Arc::as_ptr(&e.device), dev)));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn has_channel(&self, channel: u8) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.device.channel() == channel)
    }

    fn first_enabled(
        &self,
        arch: &Architecture,
        cpu: &CpuIoState,
    ) -> Option<(Arc<Device>, InterruptKind)> {
        self.entries
            .lock()
            .iter()
            .find(|e| cpu.is_enabled_for(arch, e.priority))
            .map(|e| (Arc::clone(&e.device), e.kind))
    }
}

/// An interrupt handed to a CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresentedInterrupt {
    pub kind: InterruptKind,
    pub devnum: u16,
    pub subchan: u16,
    /// The I/O interruption code: subsystem identification word in
    /// ESA/390 and z/Architecture, device address in S/370.
    pub ioid: u32,
    pub intparm: u32,
    /// In S/370 mode this is the CSW which the interrupt stores.  In
    /// the other modes it is a copy of the SCSW, which stays pending
    /// until the program issues Test Subchannel.
    pub status: StatusWord,
}

/// The CPU-side summary of I/O interrupt state, and the place where
/// CPUs in the wait state sleep.
#[derive(Debug, Default)]
pub struct InterruptLock {
    state: Mutex<CpuSignals>,
    wakeup: Condvar,
}

#[derive(Debug, Default)]
struct CpuSignals {
    io_pending: bool,
    waiting: u32,
}

impl InterruptLock {
    /// Recompute the aggregate I/O-pending indication from the queue,
    /// waking any waiting CPU when it is set.  Never call this with a
    /// device lock held.
    pub(crate) fn update_io_pending(&self, ioq: &IoInterruptQueue) {
        let mut signals = self.state.lock();
        signals.io_pending = !ioq.is_empty();
        if signals.io_pending && signals.waiting > 0 {
            self.wakeup.notify_all();
        }
    }

    pub(crate) fn wake_waiting_cpus(&self) {
        let signals = self.state.lock();
        if signals.waiting > 0 {
            self.wakeup.notify_all();
        }
    }

    #[must_use]
    pub fn io_pending(&self) -> bool {
        self.state.lock().io_pending
    }

    /// Block, as a CPU in the wait state does, until an I/O interrupt
    /// is pending or `timeout` has passed.  Returns whether one is
    /// pending.
    pub fn wait_for_io(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signals = self.state.lock();
        signals.waiting += 1;
        while !signals.io_pending {
            if self.wakeup.wait_until(&mut signals, deadline).timed_out() {
                break;
            }
        }
        signals.waiting -= 1;
        signals.io_pending
    }
}

/// Reset the status which a presented S/370 interrupt has stored in
/// the CSW, as Test Subchannel does in the other modes.
pub(crate) fn clear_presented_status(st: &mut SubchannelState, kind: InterruptKind) {
    match kind {
        InterruptKind::Pci | InterruptKind::Attention => *kind.slot(st) = Scsw::default(),
        InterruptKind::Ordinary => clear_ordinary_status(&mut st.scsw),
    }
}

/// Clear pending status from the ordinary SCSW.  Intermediate status
/// alone (a suspension, for example) leaves the rest of the SCSW as
/// it was; otherwise the function ends.
pub(crate) fn clear_ordinary_status(scsw: &mut Scsw) {
    if scsw.status_control() == SCSW3_SC_INTER | SCSW3_SC_PEND {
        scsw.flag3 &= !SCSW3_SC;
    } else {
        scsw.flag0 &= !SCSW0_CC;
        scsw.flag1 &= !SCSW1_N;
        scsw.flag2 &= !(SCSW2_FC | SCSW2_AC);
        scsw.flag3 &= !(SCSW3_AC | SCSW3_SC);
    }
}

impl ChannelSubsystem {
    /// Select the highest-priority queued interrupt which `cpu` is
    /// enabled for, dequeue it, and return what the CPU must store.
    /// When nothing is enabled, other waiting CPUs are woken in case
    /// one of them can take it.
    pub fn present_io_interrupt(&self, cpu: &CpuIoState) -> Option<PresentedInterrupt> {
        let arch = self.arch();
        loop {
            let Some((dev, kind)) = self.ioq.first_enabled(&arch, cpu) else {
                if !self.ioq.is_empty() {
                    self.intlock.wake_waiting_cpus();
                }
                return None;
            };
            let mut st = dev.lock();
            if !*kind.queued_flag(&mut st) {
                // Somebody else took it between the scan and the lock.
                continue;
            }
            if !kind.slot(&mut st).is_status_pending() || !st.is_operational(&arch) {
                event!(
                    Level::DEBUG,
                    "discarding stale {kind:?} interrupt for device {:04X}",
                    dev.devnum()
                );
                self.ioq.dequeue(&dev, &mut st, kind);
                drop(st);
                self.intlock.update_io_pending(&self.ioq);
                continue;
            }
            let scsw = *kind.slot(&mut st);
            let presented = if arch.uses_csw() {
                clear_presented_status(&mut st, kind);
                PresentedInterrupt {
                    kind,
                    devnum: dev.devnum(),
                    subchan: dev.subchan(),
                    ioid: u32::from(dev.devnum()),
                    intparm: 0,
                    status: StatusWord::Legacy(Csw::from_scsw(&scsw)),
                }
            } else {
                PresentedInterrupt {
                    kind,
                    devnum: dev.devnum(),
                    subchan: dev.subchan(),
                    ioid: 0x0001_0000 | u32::from(dev.subchan()),
                    intparm: st.pmcw.intparm,
                    status: StatusWord::Structured(scsw),
                }
            };
            self.ioq.dequeue(&dev, &mut st, kind);
            drop(st);
            self.intlock.update_io_pending(&self.ioq);
            event!(
                Level::DEBUG,
                "CPU {} takes {kind:?} interrupt from device {:04X}",
                cpu.cpu,
                presented.devnum
            );
            return Some(presented);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CcwExecution, CcwResult, DeviceHandler, DeviceRegistry};

    struct Idle;

    impl DeviceHandler for Idle {
        fn type_name(&self) -> &str {
            "idle"
        }

        fn execute(&self, _device: &Device, ccw: &CcwExecution, _iobuf: &mut [u8]) -> CcwResult {
            CcwResult::complete(CSW_CE | CSW_DE, ccw.count)
        }
    }

    fn device_with_isc(registry: &DeviceRegistry, devnum: u16, isc: u8) -> Arc<Device> {
        let dev = registry.attach(devnum, Arc::new(Idle), &[]).unwrap();
        {
            let mut st = dev.lock();
            st.pmcw.flag4 = (isc << 3) & PMCW4_ISC;
            st.pmcw.flag5 |= PMCW5_E;
        }
        dev
    }

    #[test]
    fn test_queue_priority_order() {
        let arch = Architecture::new(ArchMode::ZArch);
        let registry = DeviceRegistry::default();
        let ioq = IoInterruptQueue::default();
        let low = device_with_isc(&registry, 0x0100, 5);
        let high = device_with_isc(&registry, 0x0200, 2);
        let high2 = device_with_isc(&registry, 0x0300, 2);
        for dev in [&low, &high, &high2] {
            let mut st = dev.lock();
            ioq.queue(&arch, dev, &mut st, InterruptKind::Ordinary);
        }
        // Queueing again must not create a second entry.
        ioq.queue(&arch, &low, &mut low.lock(), InterruptKind::Ordinary);
        assert_eq!(ioq.len(), 3);

        let cpu = CpuIoState::enabled(0);
        let (first, _) = ioq.first_enabled(&arch, &cpu).unwrap();
        assert_eq!(first.devnum(), 0x0200);

        ioq.dequeue(&high, &mut high.lock(), InterruptKind::Ordinary);
        let (next, _) = ioq.first_enabled(&arch, &cpu).unwrap();
        assert_eq!(next.devnum(), 0x0300);
        assert!(!high.lock().pending);

        // Only subclass 5 enabled.
        let masked = CpuIoState {
            cr6: 0x0400_0000,
            ..cpu
        };
        let (only, _) = ioq.first_enabled(&arch, &masked).unwrap();
        assert_eq!(only.devnum(), 0x0100);
    }

    #[test]
    fn test_s370_channel_masks() {
        let arch = Architecture::new(ArchMode::S370);
        let bc = CpuIoState {
            ec_mode: false,
            sysmask: 0x40,
            ..CpuIoState::default()
        };
        assert!(!bc.is_enabled_for(&arch, 0));
        assert!(bc.is_enabled_for(&arch, 1));
        // Channels 6 and up use the I/O mask and control register 2.
        let bc_high = CpuIoState {
            sysmask: PSW_IO_MASK,
            cr2: 0x0200_0000,
            ..bc
        };
        assert!(bc_high.is_enabled_for(&arch, 6));
        assert!(!bc_high.is_enabled_for(&arch, 7));
        let ec = CpuIoState {
            ec_mode: true,
            sysmask: PSW_IO_MASK,
            cr2: 0x8000_0000,
            ..CpuIoState::default()
        };
        assert!(ec.is_enabled_for(&arch, 0));
        assert!(!ec.is_enabled_for(&arch, 1));
    }

    #[test]
    fn test_clear_ordinary_status() {
        let mut suspended = Scsw {
            flag2: SCSW2_FC_START,
            flag3: SCSW3_AC_SUSP | SCSW3_SC_INTER | SCSW3_SC_PEND,
            ..Scsw::default()
        };
        clear_ordinary_status(&mut suspended);
        assert_eq!(suspended.flag2, SCSW2_FC_START);
        assert_eq!(suspended.flag3, SCSW3_AC_SUSP);

        let mut ended = Scsw {
            flag2: SCSW2_FC_START,
            flag3: SCSW3_SC_PRI | SCSW3_SC_SEC | SCSW3_SC_PEND,
            unitstat: CSW_CE | CSW_DE,
            ..Scsw::default()
        };
        clear_ordinary_status(&mut ended);
        assert_eq!(ended.flag2, 0);
        assert_eq!(ended.flag3, 0);
        assert_eq!(ended.unitstat, CSW_CE | CSW_DE);
    }

    #[test]
    fn test_wait_for_io_times_out() {
        let lock = InterruptLock::default();
        assert!(!lock.wait_for_io(Duration::from_millis(10)));
        let ioq = IoInterruptQueue::default();
        lock.update_io_pending(&ioq);
        assert!(!lock.io_pending());
    }
}
