//! Devices, their subchannels, and the interface to device handlers.
//!
//! Each configured device owns one subchannel.  All of the
//! subchannel's architected state (PMCW, ORB, the three status
//! slots) and the bookkeeping flags which the channel subsystem uses
//! to serialize work on it live in a [`SubchannelState`] behind the
//! device lock.
//!
//! Lock ordering: the device lock may be held while taking the
//! interrupt queue lock or the work queue lock, never the other way
//! round.  The CPU interrupt lock is never taken while the device
//! lock is held.
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use super::chain::ChainCursor;
use super::error::AttachError;

/// What the channel subsystem tells a device handler about the CCW
/// it is asking the device to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcwExecution {
    /// The command code.  During data chaining this is the command
    /// of the CCW which started the data chain.
    pub opcode: u8,
    pub flags: u8,
    /// `CCW_FLAGS_CD` or `CCW_FLAGS_CC` when this CCW was reached by
    /// chaining, otherwise zero.
    pub chained: u8,
    /// Size of the data area.  The I/O buffer is exactly this long.
    pub count: u32,
    /// The command code of the previous command in a command chain.
    pub prev_opcode: u8,
    /// Position of this CCW within the chain, counting from zero.
    pub sequence: u32,
}

/// What the device handler reports back for one CCW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CcwResult {
    /// The device has more data than the count allowed for.
    pub more: bool,
    pub unitstat: u8,
    /// Bytes of the count which were not transferred.
    pub residual: u32,
    /// The handler would block; when the channel program is being
    /// run on the CPU's own thread it should be moved to a worker
    /// thread and this CCW re-executed there.
    pub retry_async: bool,
}

impl CcwResult {
    /// A CCW which completed with `unitstat`, leaving `residual`
    /// bytes of the count unused.
    #[must_use]
    pub fn complete(unitstat: u8, residual: u32) -> CcwResult {
        CcwResult {
            unitstat,
            residual,
            ..CcwResult::default()
        }
    }
}

/// The device-specific side of a device.  Methods take `&self`
/// because the handler is shared between the thread running a
/// channel program and CPU threads issuing halt or attention
/// requests; handlers keep their mutable state behind their own
/// locks.
///
/// None of these methods is called with the device lock held, so
/// handlers may call back into the [`Device`].
pub trait DeviceHandler: Send + Sync {
    fn type_name(&self) -> &str;

    /// Called once when the device is attached.
    ///
    /// # Errors
    ///
    /// A message explaining why the arguments were rejected.
    fn init(&self, _device: &Device, _args: &[String]) -> Result<(), String> {
        Ok(())
    }

    /// Execute one CCW.  For commands which send data to the device
    /// `iobuf` holds that data; for commands which read data from the
    /// device the handler fills it.  Read Backward data belongs at
    /// the end of the buffer.
    fn execute(&self, device: &Device, ccw: &CcwExecution, iobuf: &mut [u8]) -> CcwResult;

    /// A channel program is starting.
    fn start(&self, _device: &Device) {}
    /// A channel program has ended.
    fn end(&self, _device: &Device) {}
    fn suspend(&self, _device: &Device) {}
    fn resume(&self, _device: &Device) {}
    /// Abandon whatever the device is doing; a halt or clear is in
    /// progress.
    fn halt(&self, _device: &Device) {}
    /// The device is being detached.
    fn close(&self, _device: &Device) {}
    /// The device has presented unsolicited attention status.
    fn attention(&self, _device: &Device) {}

    /// Commands for which the device never transfers data.
    fn is_immediate(&self, opcode: u8) -> bool {
        opcode == CCW_NOP
    }

    /// For write commands which return true, the data of a whole
    /// data chain is collected before the handler sees it, as a
    /// single CCW.
    fn merges_data_chained_writes(&self, _opcode: u8) -> bool {
        false
    }
}

/// Which side of a shared device currently owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IoActive {
    None,
    Local,
    /// Another system sharing the device holds it.
    Remote,
}

/// Everything about a subchannel which is protected by the device
/// lock.
#[derive(Debug)]
pub(crate) struct SubchannelState {
    pub(crate) pmcw: Pmcw,
    pub(crate) orb: Orb,
    pub(crate) scsw: Scsw,
    pub(crate) pciscsw: Scsw,
    pub(crate) attnscsw: Scsw,
    /// Queue membership of the three interrupt kinds.  These say
    /// whether an entry is on the interrupt queue; whether status is
    /// pending is recorded in the SCSWs.
    pub(crate) pending: bool,
    pub(crate) pcipending: bool,
    pub(crate) attnpending: bool,
    pub(crate) busy: bool,
    /// A thread is running (or holding suspended) a channel program
    /// of this device.  Unlike `busy`, a reset leaves this alone: it
    /// is cleared only when that thread lets go of the program.
    pub(crate) in_flight: bool,
    pub(crate) startpending: bool,
    pub(crate) suspended: bool,
    pub(crate) reserved: bool,
    pub(crate) ioactive: IoActive,
    pub(crate) iowaiters: u32,
    pub(crate) sense: [u8; ECW_SIZE],
    pub(crate) numsense: usize,
    pub(crate) sync_io: bool,
    pub(crate) io_priority: u8,
    /// Where an escaped synchronous channel program picks up again.
    pub(crate) resume_point: Option<ChainCursor>,
    /// Bumped by every reset; a channel program started under an
    /// older value has been abandoned.
    pub(crate) reset_generation: u64,
}

impl SubchannelState {
    fn new(devnum: u16) -> SubchannelState {
        SubchannelState {
            pmcw: Pmcw::for_device(devnum),
            orb: Orb::default(),
            scsw: Scsw::default(),
            pciscsw: Scsw::default(),
            attnscsw: Scsw::default(),
            pending: false,
            pcipending: false,
            attnpending: false,
            busy: false,
            in_flight: false,
            startpending: false,
            suspended: false,
            reserved: false,
            ioactive: IoActive::None,
            iowaiters: 0,
            sense: [0; ECW_SIZE],
            numsense: 0,
            sync_io: false,
            io_priority: 0,
            resume_point: None,
            reset_generation: 0,
        }
    }

    /// True if any of the three status slots holds pending status.
    pub(crate) fn any_status_pending(&self) -> bool {
        self.scsw.is_status_pending()
            || self.pciscsw.is_status_pending()
            || self.attnscsw.is_status_pending()
    }

    pub(crate) fn is_operational(&self, arch: &Architecture) -> bool {
        !arch.mode.has_channel_subsystem() || (self.pmcw.is_valid() && self.pmcw.is_enabled())
    }
}

/// A snapshot of a device's subchannel, for display and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub devnum: u16,
    pub subchan: u16,
    pub pmcw: Pmcw,
    pub scsw: Scsw,
    pub pciscsw: Scsw,
    pub attnscsw: Scsw,
    pub busy: bool,
    pub startpending: bool,
    pub suspended: bool,
    pub reserved: bool,
    pub ioactive: IoActive,
    pub interrupt_queued: bool,
}

pub struct Device {
    devnum: u16,
    subchan: u16,
    handler: Arc<dyn DeviceHandler>,
    state: Mutex<SubchannelState>,
    /// Signalled when a suspended channel program should look at its
    /// subchannel again (resume, halt, clear, attention, reset).
    pub(crate) resume_cond: Condvar,
    /// Signalled when a shared device is released, and when a thread
    /// stops running a channel program of the device.
    pub(crate) available_cond: Condvar,
}

impl Debug for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Device")
            .field("devnum", &format_args!("{:04X}", self.devnum))
            .field("subchan", &format_args!("{:04X}", self.subchan))
            .field("type", &self.handler.type_name())
            .finish_non_exhaustive()
    }
}

impl Device {
    fn new(devnum: u16, subchan: u16, handler: Arc<dyn DeviceHandler>) -> Device {
        Device {
            devnum,
            subchan,
            handler,
            state: Mutex::new(SubchannelState::new(devnum)),
            resume_cond: Condvar::new(),
            available_cond: Condvar::new(),
        }
    }

    #[must_use]
    pub fn devnum(&self) -> u16 {
        self.devnum
    }

    #[must_use]
    pub fn subchan(&self) -> u16 {
        self.subchan
    }

    /// The S/370 channel number of the device.
    #[must_use]
    pub fn channel(&self) -> u8 {
        (self.devnum >> 8) as u8
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn DeviceHandler> {
        &self.handler
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SubchannelState> {
        self.state.lock()
    }

    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        let st = self.lock();
        DeviceStatus {
            devnum: self.devnum,
            subchan: self.subchan,
            pmcw: st.pmcw,
            scsw: st.scsw,
            pciscsw: st.pciscsw,
            attnscsw: st.attnscsw,
            busy: st.busy,
            startpending: st.startpending,
            suspended: st.suspended,
            reserved: st.reserved,
            ioactive: st.ioactive,
            interrupt_queued: st.pending || st.pcipending || st.attnpending,
        }
    }

    /// Record sense data, to be presented in the IRB of a unit check
    /// or read by a Sense command.
    pub fn set_sense(&self, sense: &[u8]) {
        let mut st = self.lock();
        let n = sense.len().min(ECW_SIZE);
        st.sense = [0; ECW_SIZE];
        st.sense[..n].copy_from_slice(&sense[..n]);
        st.numsense = n;
    }

    #[must_use]
    pub fn sense(&self) -> Vec<u8> {
        let st = self.lock();
        st.sense[..st.numsense].to_vec()
    }

    /// Allow channel programs for this device to run on the thread
    /// which issued the start, subject to the subsystem's policy.
    pub fn set_sync_io(&self, enabled: bool) {
        self.lock().sync_io = enabled;
    }

    /// Work queue priority; lower values are served first.
    pub fn set_io_priority(&self, priority: u8) {
        self.lock().io_priority = priority;
    }

    pub(crate) fn io_priority(&self) -> u8 {
        self.lock().io_priority
    }

    pub fn set_reserved(&self, reserved: bool) {
        self.lock().reserved = reserved;
    }

    /// Record that another system has acquired (or released) this
    /// shared device.  Local channel programs wait while it is held.
    pub fn set_remote_active(&self, active: bool) {
        let mut st = self.lock();
        match (active, st.ioactive) {
            (true, IoActive::None) => st.ioactive = IoActive::Remote,
            (false, IoActive::Remote) => {
                st.ioactive = IoActive::None;
                if st.iowaiters > 0 {
                    self.available_cond.notify_all();
                }
            }
            _ => (),
        }
    }

    /// Wait until no other system holds the device, then take it for
    /// the local system.
    pub(crate) fn acquire(&self, st: &mut MutexGuard<'_, SubchannelState>) {
        while st.ioactive == IoActive::Remote {
            st.iowaiters += 1;
            self.available_cond.wait(st);
            st.iowaiters -= 1;
        }
        st.ioactive = IoActive::Local;
    }

    /// The thread running this device's channel program has
    /// finished with it (ended, abandoned, or handed on).
    pub(crate) fn land(&self) {
        let mut st = self.lock();
        st.in_flight = false;
        self.available_cond.notify_all();
    }

    pub(crate) fn release(&self, st: &mut SubchannelState) {
        if st.ioactive == IoActive::Local {
            st.ioactive = IoActive::None;
        }
        if st.iowaiters > 0 {
            self.available_cond.notify_all();
        }
    }
}

/// The configured devices, indexed both ways.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_subchan: BTreeMap<u16, Arc<Device>>,
    by_devnum: BTreeMap<u16, u16>,
    next_subchan: u32,
}

impl DeviceRegistry {
    /// Configure a device, giving it the next unused subchannel
    /// number.
    ///
    /// # Errors
    ///
    /// Fails if `devnum` is in use, if subchannel numbers have run
    /// out, or if the handler rejects `args`.
    pub fn attach(
        &self,
        devnum: u16,
        handler: Arc<dyn DeviceHandler>,
        args: &[String],
    ) -> Result<Arc<Device>, AttachError> {
        let device = {
            let mut inner = self.inner.write();
            if inner.by_devnum.contains_key(&devnum) {
                return Err(AttachError::DuplicateDevice(devnum));
            }
            let subchan =
                u16::try_from(inner.next_subchan).map_err(|_| AttachError::SubchannelsExhausted)?;
            inner.next_subchan += 1;
            let device = Arc::new(Device::new(devnum, subchan, handler));
            inner.by_subchan.insert(subchan, Arc::clone(&device));
            inner.by_devnum.insert(devnum, subchan);
            device
        };
        if let Err(message) = device.handler.init(&device, args) {
            self.remove(devnum);
            return Err(AttachError::HandlerInit { devnum, message });
        }
        event!(
            Level::INFO,
            "attached {} device {:04X} as subchannel {:04X}",
            device.handler.type_name(),
            devnum,
            device.subchan
        );
        Ok(device)
    }

    /// Remove a device from the configuration.  Anyone still holding
    /// a reference to it sees an invalid subchannel.
    ///
    /// # Errors
    ///
    /// Fails if no device has number `devnum`.
    pub fn detach(&self, devnum: u16) -> Result<Arc<Device>, AttachError> {
        let device = self
            .remove(devnum)
            .ok_or(AttachError::UnknownDevice(devnum))?;
        device.lock().pmcw.flag5 &= !(PMCW5_V | PMCW5_E);
        device.handler.close(&device);
        event!(Level::INFO, "detached device {devnum:04X}");
        Ok(device)
    }

    fn remove(&self, devnum: u16) -> Option<Arc<Device>> {
        let mut inner = self.inner.write();
        let subchan = inner.by_devnum.remove(&devnum)?;
        inner.by_subchan.remove(&subchan)
    }

    #[must_use]
    pub fn find_by_devnum(&self, devnum: u16) -> Option<Arc<Device>> {
        let inner = self.inner.read();
        inner
            .by_devnum
            .get(&devnum)
            .and_then(|subchan| inner.by_subchan.get(subchan))
            .cloned()
    }

    #[must_use]
    pub fn find_by_subchan(&self, subchan: u16) -> Option<Arc<Device>> {
        self.inner.read().by_subchan.get(&subchan).cloned()
    }

    /// All configured devices, in subchannel order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Device>> {
        self.inner.read().by_subchan.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl DeviceHandler for Inert {
        fn type_name(&self) -> &str {
            "inert"
        }

        fn init(&self, _device: &Device, args: &[String]) -> Result<(), String> {
            match args.first() {
                Some(arg) if arg == "bad" => Err("bad argument".to_string()),
                _ => Ok(()),
            }
        }

        fn execute(&self, _device: &Device, ccw: &CcwExecution, _iobuf: &mut [u8]) -> CcwResult {
            CcwResult::complete(CSW_CE | CSW_DE, ccw.count)
        }
    }

    #[test]
    fn test_subchannels_are_sequential() {
        let registry = DeviceRegistry::default();
        let a = registry.attach(0x0190, Arc::new(Inert), &[]).unwrap();
        let b = registry.attach(0x0191, Arc::new(Inert), &[]).unwrap();
        assert_eq!(a.subchan(), 0);
        assert_eq!(b.subchan(), 1);
        registry.detach(0x0190).unwrap();
        let c = registry.attach(0x0190, Arc::new(Inert), &[]).unwrap();
        assert_eq!(c.subchan(), 2);
        assert_eq!(registry.find_by_subchan(2).unwrap().devnum(), 0x0190);
        assert!(registry.find_by_subchan(0).is_none());
    }

    #[test]
    fn test_attach_failures() {
        let registry = DeviceRegistry::default();
        registry.attach(0x0A00, Arc::new(Inert), &[]).unwrap();
        assert_eq!(
            registry.attach(0x0A00, Arc::new(Inert), &[]).unwrap_err(),
            AttachError::DuplicateDevice(0x0A00)
        );
        assert!(matches!(
            registry.attach(0x0A01, Arc::new(Inert), &["bad".to_string()]),
            Err(AttachError::HandlerInit { devnum: 0x0A01, .. })
        ));
        assert!(registry.find_by_devnum(0x0A01).is_none());
        assert_eq!(
            registry.detach(0x0A02).unwrap_err(),
            AttachError::UnknownDevice(0x0A02)
        );
    }

    #[test]
    fn test_detached_device_is_invalid() {
        let registry = DeviceRegistry::default();
        let dev = registry.attach(0x0300, Arc::new(Inert), &[]).unwrap();
        assert!(dev.status().pmcw.is_valid());
        registry.detach(0x0300).unwrap();
        assert!(!dev.status().pmcw.is_valid());
    }

    #[test]
    fn test_sense_is_truncated() {
        let registry = DeviceRegistry::default();
        let dev = registry.attach(0x0300, Arc::new(Inert), &[]).unwrap();
        dev.set_sense(&[0x80; 40]);
        assert_eq!(dev.sense().len(), ECW_SIZE);
        dev.set_sense(&[0x40]);
        assert_eq!(dev.sense(), vec![0x40]);
    }
}
