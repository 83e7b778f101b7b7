//! Devices and helpers shared by the channel subsystem integration
//! tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use base::prelude::*;
use channel::{
    Cc, CcwExecution, CcwResult, ChannelConfig, ChannelSubsystem, CpuIoState, Device,
    DeviceHandler, MainStorage,
};

/// Opcode of a control command which [`RecordingHandler`] holds at
/// its gate.
pub const GATED: u8 = 0x07;

/// Opcode of a read command which [`RecordingHandler`] holds at its
/// gate, then answers with [`GATED_READ_DATA`].
pub const GATED_READ: u8 = 0x06;
pub const GATED_READ_DATA: u8 = 0xEE;

#[derive(Debug, Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// Holds device threads until the test lets them go.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    pub fn pass(&self) {
        let mut state = self.state.lock();
        state.entered += 1;
        self.cond.notify_all();
        while !state.open {
            self.cond.wait(&mut state);
        }
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.cond.notify_all();
    }

    pub fn wait_entered(&self, n: usize) {
        let deadline = Instant::now() + TIMEOUT;
        let mut state = self.state.lock();
        while state.entered < n {
            assert!(
                !self.cond.wait_until(&mut state, deadline).timed_out(),
                "device was never entered"
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub ccw: CcwExecution,
    pub thread: Option<String>,
}

#[derive(Debug, Default)]
pub struct Hooks {
    pub start: AtomicUsize,
    pub end: AtomicUsize,
    pub suspend: AtomicUsize,
    pub resume: AtomicUsize,
    pub halt: AtomicUsize,
    pub attention: AtomicUsize,
}

/// A device which completes every CCW normally, logging what it was
/// asked to do, and which checks that it is never driven by two
/// threads at once.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<Call>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pub gate: Gate,
    pub hooks: Hooks,
    /// Ask for the first CCW to be re-driven on a worker thread.
    pub defer_first: AtomicBool,
}

impl RecordingHandler {
    pub fn new() -> Arc<RecordingHandler> {
        Arc::new(RecordingHandler::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl DeviceHandler for RecordingHandler {
    fn type_name(&self) -> &str {
        "recorder"
    }

    fn execute(&self, _device: &Device, ccw: &CcwExecution, iobuf: &mut [u8]) -> CcwResult {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(Call {
            ccw: *ccw,
            thread: thread::current().name().map(str::to_owned),
        });
        let result = if self.defer_first.swap(false, Ordering::SeqCst) {
            CcwResult {
                retry_async: true,
                ..CcwResult::default()
            }
        } else {
            if ccw.opcode == GATED || ccw.opcode == GATED_READ {
                self.gate.pass();
            }
            if ccw.opcode == GATED_READ {
                iobuf.fill(GATED_READ_DATA);
            }
            // Leave time for anything else to barge in.
            thread::yield_now();
            CcwResult::complete(CSW_CE | CSW_DE, 0)
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn start(&self, _device: &Device) {
        self.hooks.start.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self, _device: &Device) {
        self.hooks.end.fetch_add(1, Ordering::SeqCst);
    }

    fn suspend(&self, _device: &Device) {
        self.hooks.suspend.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self, _device: &Device) {
        self.hooks.resume.fetch_add(1, Ordering::SeqCst);
    }

    fn halt(&self, _device: &Device) {
        self.hooks.halt.fetch_add(1, Ordering::SeqCst);
        self.gate.open();
    }

    fn attention(&self, _device: &Device) {
        self.hooks.attention.fetch_add(1, Ordering::SeqCst);
    }
}

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Poll until `cond` holds, failing the test if it never does.
pub fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

pub fn subsystem(config: ChannelConfig) -> Arc<ChannelSubsystem> {
    ChannelSubsystem::new(config, Arc::new(MainStorage::new(0x10000)))
}

/// Attach a recording device and enable its subchannel.
pub fn attach(sys: &ChannelSubsystem, devnum: u16) -> (Arc<Device>, Arc<RecordingHandler>) {
    let handler = RecordingHandler::new();
    let dev = sys
        .attach_device(devnum, handler.clone(), &[])
        .expect("attach should succeed");
    if sys.arch().mode.has_channel_subsystem() {
        assert_eq!(sys.enable_subchan(&dev, 3), Cc::Zero);
    }
    (dev, handler)
}

pub fn put_ccws(sys: &ChannelSubsystem, addr: u32, format: CcwFormat, ccws: &[Ccw]) {
    for (i, ccw) in ccws.iter().enumerate() {
        sys.storage()
            .write(u64::from(addr) + 8 * i as u64, &ccw.encode(format))
            .expect("CCW address should be inside storage");
    }
}

pub fn ccw(opcode: u8, flags: u8, count: u16, address: u32) -> Ccw {
    Ccw {
        opcode,
        flags,
        count,
        address,
    }
}

pub fn orb(ccw_address: u32) -> Orb {
    Orb {
        intparm: 0x1234_5678,
        flag5: ORB5_F,
        lpm: 0xFF,
        ccw_address,
        ..Orb::default()
    }
}

pub fn cpu() -> CpuIoState {
    CpuIoState::enabled(0)
}

/// Wait for the subchannel to become status pending and return its
/// status, as a CPU looping on Test Subchannel would.
pub fn wait_for_status(sys: &ChannelSubsystem, dev: &Arc<Device>) -> Irb {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let (cc, irb) = sys.test_subchan(&cpu(), dev).expect("no intercept");
        if cc == Cc::Zero {
            return irb;
        }
        assert!(Instant::now() < deadline, "no status from {dev:?}");
        sys.wait_for_io_interrupt(Duration::from_millis(5));
    }
}

/// Wait until every worker thread has gone idle.
pub fn wait_for_quiet_workers(sys: &ChannelSubsystem) {
    eventually("idle workers", || {
        let stats = sys.scheduler_stats();
        stats.queued == 0 && stats.idle == stats.threads
    });
}
