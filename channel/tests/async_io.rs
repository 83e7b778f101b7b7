//! Channel programs run by the I/O worker threads, and the subchannel
//! instructions which race with them.
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base::prelude::*;
use channel::{Cc, ChannelConfig, InterruptKind, SyncIoPolicy};

mod common;
use common::*;

fn zarch() -> ChannelConfig {
    ChannelConfig::new(ArchMode::ZArch)
}

const ENDED: u8 = SCSW3_SC_PRI | SCSW3_SC_SEC | SCSW3_SC_PEND;

#[test]
fn test_worker_runs_program_and_interrupts() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(
        &sys,
        0x100,
        CcwFormat::Format1,
        &[ccw(0x03, CCW_FLAGS_CC, 1, 0), ccw(0x03, 0, 1, 0)],
    );
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    eventually("I/O interrupt", || {
        sys.wait_for_io_interrupt(Duration::from_millis(5))
    });
    let taken = sys.present_io_interrupt(&cpu()).expect("interrupt pending");
    assert_eq!(taken.kind, InterruptKind::Ordinary);
    assert_eq!(taken.intparm, 0x1234_5678);
    match taken.status {
        StatusWord::Structured(scsw) => assert_eq!(scsw.flag3, ENDED),
        StatusWord::Legacy(csw) => panic!("unexpected CSW {csw:?}"),
    }
    let irb = wait_for_status(&sys, &dev);
    assert_eq!(irb.scsw.unitstat, CSW_CE | CSW_DE);
    assert_eq!(irb.scsw.ccw_address, 0x110);
    assert_eq!(handler.calls().len(), 2);
    assert_eq!(handler.hooks.start.load(Ordering::SeqCst), 1);
    assert_eq!(handler.hooks.end.load(Ordering::SeqCst), 1);
    assert!(handler.calls()[0]
        .thread
        .as_deref()
        .is_some_and(|name| name.starts_with("io-worker")));
    sys.shutdown();
}

#[test]
fn test_one_ccw_at_a_time_per_device() {
    let mut config = zarch();
    config.max_worker_threads = 3;
    let sys = subsystem(config);
    let devices: Vec<_> = (0..6).map(|i| attach(&sys, 0x0300 + i)).collect();
    let chain: Vec<_> = (0..7)
        .map(|_| ccw(0x03, CCW_FLAGS_CC, 1, 0))
        .chain([ccw(0x03, 0, 1, 0)])
        .collect();
    put_ccws(&sys, 0x100, CcwFormat::Format1, &chain);
    for _ in 0..5 {
        for (dev, _) in &devices {
            assert_eq!(sys.start_subchan(&cpu(), dev, &orb(0x100)), Ok(Cc::Zero));
            // A second start is refused while the first is in progress
            // or its status is pending.
            let again = sys.start_subchan(&cpu(), dev, &orb(0x100));
            assert!(matches!(again, Ok(Cc::One | Cc::Two)), "got {again:?}");
        }
        for (dev, _) in &devices {
            assert_eq!(wait_for_status(&sys, dev).scsw.flag3, ENDED);
        }
    }
    for (_, handler) in &devices {
        assert_eq!(handler.calls().len(), 40);
        assert_eq!(handler.max_active(), 1);
    }
    assert!(sys.scheduler_stats().high_water <= 3);
    sys.shutdown();
}

#[test]
fn test_suspend_and_resume() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(
        &sys,
        0x100,
        CcwFormat::Format1,
        &[
            ccw(0x03, CCW_FLAGS_CC, 1, 0),
            ccw(0x03, CCW_FLAGS_SUSP, 1, 0),
        ],
    );
    let suspendable = Orb {
        flag4: ORB4_S,
        ..orb(0x100)
    };
    assert_eq!(sys.start_subchan(&cpu(), &dev, &suspendable), Ok(Cc::Zero));

    let irb = wait_for_status(&sys, &dev);
    assert_eq!(
        irb.scsw.flag3,
        SCSW3_AC_SUSP | SCSW3_SC_INTER | SCSW3_SC_PEND
    );
    assert_eq!(irb.scsw.ccw_address, 0x110);
    assert!(dev.status().suspended);
    assert_eq!(handler.calls().len(), 1);
    assert_eq!(handler.hooks.suspend.load(Ordering::SeqCst), 1);
    // Suspended is neither idle nor free for another start.
    assert_eq!(sys.start_subchan(&cpu(), &dev, &suspendable), Ok(Cc::Two));

    put_ccws(&sys, 0x108, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);
    assert_eq!(sys.resume_subchan(&cpu(), &dev), Ok(Cc::Zero));
    let irb = wait_for_status(&sys, &dev);
    assert_eq!(irb.scsw.flag3, ENDED);
    assert_eq!(irb.scsw.ccw_address, 0x110);

    let calls = handler.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].ccw.sequence, 0);
    assert_eq!(calls[1].ccw.chained, 0);
    assert_eq!(handler.hooks.resume.load(Ordering::SeqCst), 1);
    assert_eq!(handler.hooks.start.load(Ordering::SeqCst), 1);
    sys.shutdown();
}

#[test]
fn test_quiet_suspend() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(0x03, CCW_FLAGS_SUSP, 1, 0)]);
    let quiet = Orb {
        flag4: ORB4_S,
        flag5: ORB5_F | ORB5_U,
        ..orb(0x100)
    };
    assert_eq!(sys.start_subchan(&cpu(), &dev, &quiet), Ok(Cc::Zero));
    eventually("suspension", || dev.status().suspended);
    assert!(!sys.io_pending());
    assert_eq!(sys.test_subchan(&cpu(), &dev).unwrap().0, Cc::One);
    assert_eq!(sys.store_subchan(&dev).scsw.flag3, SCSW3_AC_SUSP);

    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);
    assert_eq!(sys.resume_subchan(&cpu(), &dev), Ok(Cc::Zero));
    assert_eq!(wait_for_status(&sys, &dev).scsw.flag3, ENDED);
    assert_eq!(handler.calls().len(), 1);
    sys.shutdown();
}

#[test]
fn test_halt_running_program() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(
        &sys,
        0x100,
        CcwFormat::Format1,
        &[ccw(GATED, CCW_FLAGS_CC, 1, 0), ccw(0x03, 0, 1, 0)],
    );
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    handler.gate.wait_entered(1);
    assert_eq!(sys.halt_subchan(&cpu(), &dev), Ok(Cc::Zero));
    // Either the halt is still in progress or it has finished.
    let again = sys.halt_subchan(&cpu(), &dev);
    assert!(matches!(again, Ok(Cc::One | Cc::Two)), "got {again:?}");

    let irb = wait_for_status(&sys, &dev);
    assert_eq!(irb.scsw.flag2 & SCSW2_FC, SCSW2_FC_START | SCSW2_FC_HALT);
    assert_eq!(irb.scsw.flag3, ENDED);
    assert_eq!(irb.scsw.unitstat, CSW_CE | CSW_DE);
    assert_eq!(handler.calls().len(), 1);
    assert_eq!(handler.hooks.halt.load(Ordering::SeqCst), 1);
    sys.shutdown();
}

#[test]
fn test_clear_running_program() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(
        &sys,
        0x100,
        CcwFormat::Format1,
        &[ccw(GATED, CCW_FLAGS_CC, 1, 0), ccw(0x03, 0, 1, 0)],
    );
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    handler.gate.wait_entered(1);
    assert_eq!(sys.clear_subchan(&cpu(), &dev), Ok(Cc::Zero));

    let irb = wait_for_status(&sys, &dev);
    assert_eq!(irb.scsw.function_control(), SCSW2_FC_CLEAR);
    assert_eq!(irb.scsw.flag3, SCSW3_SC_PEND);
    assert_eq!(handler.calls().len(), 1);
    assert!(!dev.status().busy);
    sys.shutdown();
}

#[test]
fn test_cancel_start_nobody_has_picked_up() {
    let mut config = zarch();
    config.max_worker_threads = 1;
    let sys = subsystem(config);
    let (first, first_handler) = attach(&sys, 0x0190);
    let (second, second_handler) = attach(&sys, 0x0191);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(GATED, 0, 1, 0)]);
    put_ccws(&sys, 0x200, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);

    assert_eq!(sys.start_subchan(&cpu(), &first, &orb(0x100)), Ok(Cc::Zero));
    first_handler.gate.wait_entered(1);
    // The only worker is busy, so this start waits in the queue.
    assert_eq!(sys.start_subchan(&cpu(), &second, &orb(0x200)), Ok(Cc::Zero));
    assert!(second.status().startpending);
    assert_eq!(sys.cancel_subchan(&cpu(), &second), Ok(Cc::Zero));
    assert!(!second.status().busy);
    assert_eq!(sys.store_subchan(&second).scsw.flag2, 0);
    // The running program cannot be withdrawn.
    assert_eq!(sys.cancel_subchan(&cpu(), &first), Ok(Cc::Two));

    first_handler.gate.open();
    assert_eq!(wait_for_status(&sys, &first).scsw.flag3, ENDED);
    wait_for_quiet_workers(&sys);
    assert_eq!(sys.test_subchan(&cpu(), &second).unwrap().0, Cc::One);
    assert!(second_handler.calls().is_empty());

    // The subchannel is usable again.
    assert_eq!(sys.start_subchan(&cpu(), &second, &orb(0x200)), Ok(Cc::Zero));
    assert_eq!(wait_for_status(&sys, &second).scsw.flag3, ENDED);
    sys.shutdown();
}

#[test]
fn test_cancel_after_program_ended() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    eventually("status pending", || dev.status().scsw.is_status_pending());
    assert_eq!(sys.cancel_subchan(&cpu(), &dev), Ok(Cc::One));
    // The status is still there for Test Subchannel.
    let irb = wait_for_status(&sys, &dev);
    assert_eq!(irb.scsw.flag3, ENDED);
    assert_eq!(irb.scsw.unitstat, CSW_CE | CSW_DE);
    assert_eq!(handler.calls().len(), 1);
    sys.shutdown();
}

#[test]
fn test_halt_start_nobody_has_picked_up() {
    let mut config = zarch();
    config.max_worker_threads = 1;
    let sys = subsystem(config);
    let (first, first_handler) = attach(&sys, 0x0190);
    let (second, second_handler) = attach(&sys, 0x0191);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(GATED, 0, 1, 0)]);
    put_ccws(&sys, 0x200, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);

    assert_eq!(sys.start_subchan(&cpu(), &first, &orb(0x100)), Ok(Cc::Zero));
    first_handler.gate.wait_entered(1);
    assert_eq!(sys.start_subchan(&cpu(), &second, &orb(0x200)), Ok(Cc::Zero));
    assert_eq!(sys.halt_subchan(&cpu(), &second), Ok(Cc::Zero));
    let irb = wait_for_status(&sys, &second);
    assert_ne!(irb.scsw.flag2 & SCSW2_FC_HALT, 0);
    assert!(second_handler.calls().is_empty());

    first_handler.gate.open();
    assert_eq!(wait_for_status(&sys, &first).scsw.flag3, ENDED);
    sys.shutdown();
}

#[test]
fn test_attention() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    assert_eq!(sys.device_attention(&dev, CSW_ATTN), Cc::Zero);
    assert_eq!(handler.hooks.attention.load(Ordering::SeqCst), 1);
    let taken = sys.present_io_interrupt(&cpu()).expect("attention interrupt");
    assert_eq!(taken.kind, InterruptKind::Attention);
    let irb = wait_for_status(&sys, &dev);
    assert_eq!(irb.scsw.unitstat, CSW_ATTN);
    assert_eq!(irb.scsw.flag3, SCSW3_SC_ALERT | SCSW3_SC_PEND);

    // A busy device cannot present attention.
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(GATED, 0, 1, 0)]);
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    handler.gate.wait_entered(1);
    assert_eq!(sys.device_attention(&dev, CSW_ATTN), Cc::One);
    handler.gate.open();
    assert_eq!(wait_for_status(&sys, &dev).scsw.flag3, ENDED);
    sys.shutdown();
}

#[test]
fn test_attention_ends_suspended_program() {
    let sys = subsystem(zarch());
    let (dev, _handler) = attach(&sys, 0x0190);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(0x03, CCW_FLAGS_SUSP, 1, 0)]);
    let quiet = Orb {
        flag4: ORB4_S,
        flag5: ORB5_F | ORB5_U,
        ..orb(0x100)
    };
    assert_eq!(sys.start_subchan(&cpu(), &dev, &quiet), Ok(Cc::Zero));
    eventually("suspension", || dev.status().suspended);
    assert_eq!(sys.device_attention(&dev, CSW_ATTN), Cc::Zero);
    let irb = wait_for_status(&sys, &dev);
    assert_eq!(irb.scsw.unitstat & CSW_ATTN, CSW_ATTN);
    assert_ne!(irb.scsw.flag3 & SCSW3_SC_ALERT, 0);
    wait_for_quiet_workers(&sys);
    assert!(!dev.status().busy);
    assert!(!dev.status().suspended);
    sys.shutdown();
}

#[test]
fn test_reset_abandons_running_program() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(
        &sys,
        0x100,
        CcwFormat::Format1,
        &[ccw(GATED, CCW_FLAGS_CC, 1, 0), ccw(0x03, 0, 1, 0)],
    );
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    handler.gate.wait_entered(1);
    sys.io_reset();
    handler.gate.open();
    wait_for_quiet_workers(&sys);

    assert_eq!(handler.calls().len(), 1);
    assert_eq!(handler.hooks.end.load(Ordering::SeqCst), 0);
    assert!(!sys.io_pending());
    let status = dev.status();
    assert!(!status.busy);
    assert_eq!(status.scsw, Scsw::default());
    // Reset leaves the subchannel disabled.
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Three));
    sys.shutdown();
}

#[test]
fn test_program_started_after_reset_waits_for_abandoned_one() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(GATED_READ, 0, 4, 0x800)]);
    put_ccws(&sys, 0x200, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    handler.gate.wait_entered(1);

    sys.device_reset(&dev);
    assert_eq!(sys.enable_subchan(&dev, 3), Cc::Zero);
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x200)), Ok(Cc::Zero));
    // The old program is still inside the device.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(handler.calls().len(), 1);

    handler.gate.open();
    let irb = wait_for_status(&sys, &dev);
    assert_eq!(irb.scsw.flag3, ENDED);
    assert_eq!(irb.scsw.ccw_address, 0x208);
    let calls = handler.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].ccw.opcode, 0x03);
    assert_eq!(handler.max_active(), 1);
    // The abandoned read stored nothing.
    let mut data = [0; 4];
    sys.storage().read(0x800, &mut data).unwrap();
    assert_eq!(data, [0; 4]);
    sys.shutdown();
}

#[test]
fn test_synchronous_start_after_reset_goes_to_worker() {
    let mut config = zarch();
    config.sync_io = SyncIoPolicy::Always;
    let sys = subsystem(config);
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(GATED, 0, 1, 0)]);
    put_ccws(&sys, 0x200, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    handler.gate.wait_entered(1);

    sys.device_reset(&dev);
    assert_eq!(sys.enable_subchan(&dev, 3), Cc::Zero);
    dev.set_sync_io(true);
    // Returns at once, though the device still holds the old program.
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x200)), Ok(Cc::Zero));
    handler.gate.open();
    assert_eq!(wait_for_status(&sys, &dev).scsw.flag3, ENDED);
    assert_eq!(handler.max_active(), 1);
    assert!(handler.calls()[1]
        .thread
        .as_deref()
        .is_some_and(|name| name.starts_with("io-worker")));
    sys.shutdown();
}

#[test]
fn test_synchronous_program_escapes_to_worker() {
    let mut config = zarch();
    config.sync_io = SyncIoPolicy::Always;
    let sys = subsystem(config);
    let (dev, handler) = attach(&sys, 0x0190);
    dev.set_sync_io(true);
    handler.defer_first.store(true, Ordering::SeqCst);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    assert_eq!(wait_for_status(&sys, &dev).scsw.flag3, ENDED);

    let calls = handler.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].thread, thread::current().name().map(str::to_owned));
    assert!(calls[1]
        .thread
        .as_deref()
        .is_some_and(|name| name.starts_with("io-worker")));
    assert_eq!(calls[0].ccw, calls[1].ccw);
    sys.shutdown();
}

#[test]
fn test_synchronous_program_stays_on_cpu_thread() {
    let mut config = zarch();
    config.sync_io = SyncIoPolicy::ShortPrograms;
    let sys = subsystem(config);
    let (dev, handler) = attach(&sys, 0x0190);
    dev.set_sync_io(true);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);
    put_ccws(&sys, 0x200, CcwFormat::Format1, &[ccw(0x02, CCW_FLAGS_SLI, 1, 0x1000)]);
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    // A single immediate command finishes before the start returns.
    assert!(dev.status().scsw.is_status_pending());
    assert_eq!(sys.scheduler_stats().high_water, 0);
    wait_for_status(&sys, &dev);

    // Reads are not short.
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x200)), Ok(Cc::Zero));
    wait_for_status(&sys, &dev);
    assert_eq!(sys.scheduler_stats().high_water, 1);
    assert_eq!(handler.calls().len(), 2);
    sys.shutdown();
}

#[test]
fn test_no_start_after_shutdown() {
    let sys = subsystem(zarch());
    let (dev, handler) = attach(&sys, 0x0190);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(0x03, 0, 1, 0)]);
    sys.shutdown();
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Two));
    assert!(!dev.status().busy);
    assert!(handler.calls().is_empty());
}

#[test]
fn test_address_limit() {
    let sys = subsystem(zarch());
    let (dev, _handler) = attach(&sys, 0x0190);
    let mut pmcw = sys.store_subchan(&dev).pmcw;
    pmcw.flag5 |= PMCW5_LM_LOW;
    assert_eq!(sys.modify_subchan(&cpu(), &dev, &pmcw), Ok(Cc::Zero));
    sys.set_address_limit(0x3000);
    put_ccws(&sys, 0x100, CcwFormat::Format1, &[ccw(0x02, CCW_FLAGS_SLI, 4, 0x2000)]);
    put_ccws(&sys, 0x200, CcwFormat::Format1, &[ccw(0x02, CCW_FLAGS_SLI, 4, 0x4000)]);
    let limited = |addr| Orb {
        flag5: ORB5_F | ORB5_A,
        ..orb(addr)
    };

    assert_eq!(sys.start_subchan(&cpu(), &dev, &limited(0x100)), Ok(Cc::Zero));
    assert_eq!(wait_for_status(&sys, &dev).scsw.chanstat, CSW_PROTC);
    assert_eq!(sys.start_subchan(&cpu(), &dev, &limited(0x200)), Ok(Cc::Zero));
    assert_eq!(wait_for_status(&sys, &dev).scsw.chanstat, 0);
    // Without the ORB bit the limit is not checked.
    assert_eq!(sys.start_subchan(&cpu(), &dev, &orb(0x100)), Ok(Cc::Zero));
    assert_eq!(wait_for_status(&sys, &dev).scsw.chanstat, 0);
    sys.shutdown();
}

#[test]
fn test_s370_halt_io_and_test_channel() {
    let sys = subsystem(ChannelConfig::new(ArchMode::S370));
    let (dev, handler) = attach(&sys, 0x0190);
    assert_eq!(sys.halt_io(&cpu(), &dev), Ok((Cc::Zero, None)));

    put_ccws(&sys, 0x100, CcwFormat::Format0, &[ccw(GATED, 0, 1, 0)]);
    let caw = Caw {
        key: 0,
        ccw_address: 0x100,
    };
    assert_eq!(sys.start_io(&cpu(), &dev, caw), Ok((Cc::Zero, None)));
    handler.gate.wait_entered(1);
    assert_eq!(sys.test_io(&cpu(), &dev), Ok((Cc::Two, None)));
    assert_eq!(sys.halt_io(&cpu(), &dev), Ok((Cc::Zero, None)));
    eventually("interrupt", || sys.test_channel(dev.channel()) == Cc::One);

    let (cc, csw) = sys.halt_io(&cpu(), &dev).unwrap();
    assert_eq!(cc, Cc::One);
    assert_eq!(csw.map(|csw| csw.unitstat), Some(CSW_CE | CSW_DE));
    assert_eq!(sys.test_channel(dev.channel()), Cc::Zero);
    sys.shutdown();
}

#[test]
fn test_detach() {
    let sys = subsystem(zarch());
    let (dev, _handler) = attach(&sys, 0x0190);
    assert!(sys.attach_device(0x0190, Arc::new(Nothing), &[]).is_err());
    assert_eq!(
        sys.find_device_by_subchan(dev.subchan()).map(|d| d.devnum()),
        Some(0x0190)
    );
    sys.detach_device(0x0190).unwrap();
    assert!(sys.find_device_by_devnum(0x0190).is_none());
    assert!(sys.detach_device(0x0190).is_err());
}

struct Nothing;

impl channel::DeviceHandler for Nothing {
    fn type_name(&self) -> &str {
        "nothing"
    }

    fn execute(
        &self,
        _device: &channel::Device,
        _ccw: &channel::CcwExecution,
        _iobuf: &mut [u8],
    ) -> channel::CcwResult {
        channel::CcwResult::complete(CSW_CE | CSW_DE | CSW_UC, 0)
    }
}
