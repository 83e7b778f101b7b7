use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use channel::{
    AccessFailure, AttachError, Cc, ChannelConfig, ChannelSubsystem, CpuIoState, DeviceStatus,
    InterruptKind, MainStorage, SchedulerStats, SyncIoPolicy,
};

mod loopback;
mod program;

use loopback::LoopbackDevice;
use program::{ChannelProgram, ProgramError};

/// Run a channel program against a loopback device.
#[derive(Parser, Debug)]
#[command(about = "Run an S/370, ESA/390 or z/Architecture channel program")]
struct Options {
    /// File containing the channel program
    program: PathBuf,

    /// Architecture mode: s370, esa390 or zarch
    #[arg(long, default_value = "zarch", value_parser = parse_arch)]
    arch: ArchMode,

    /// Device number (hex) of the loopback device
    #[arg(long, default_value = "0E00", value_parser = parse_hex16)]
    devnum: u16,

    /// Address (hex) at which the CCWs are placed
    #[arg(long, default_value = "1000", value_parser = parse_hex32)]
    origin: u32,

    /// Use format-0 CCWs (S/370 always does)
    #[arg(long)]
    format0: bool,

    /// Storage protection key (hex, 0-F) for the channel program
    #[arg(long, default_value = "0", value_parser = parse_hex8)]
    key: u8,

    /// Main storage size in KiB
    #[arg(long, default_value_t = 1024)]
    storage_kib: u64,

    /// Most I/O worker threads (0: no limit, negative: one thread
    /// per request)
    #[arg(long, default_value_t = 8, allow_negative_numbers = true)]
    max_threads: i32,

    /// Milliseconds an idle worker waits for work (0: forever)
    #[arg(long, default_value_t = 5000)]
    idle_timeout_ms: u64,

    /// When channel programs run on the CPU thread: never, short or
    /// always
    #[arg(long, default_value = "never", value_parser = parse_sync_io)]
    sync_io: SyncIoPolicy,

    /// Address limit (hex) for programs using address-limit checking
    #[arg(long, default_value = "0", value_parser = parse_hex64)]
    address_limit: u64,

    #[arg(long)]
    no_midaw: bool,

    /// Disable the incorrect-length-indication suppression facility
    #[arg(long)]
    no_ils: bool,

    #[arg(long)]
    no_address_limit_checking: bool,

    /// Give up waiting for the final interruption after this many
    /// milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Print the results as JSON
    #[arg(long)]
    json: bool,
}

fn strip_hex_prefix(s: &str) -> &str {
    s.trim_start_matches("0x").trim_start_matches("0X")
}

fn parse_hex8(s: &str) -> Result<u8, std::num::ParseIntError> {
    u8::from_str_radix(strip_hex_prefix(s), 16)
}

fn parse_hex16(s: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(strip_hex_prefix(s), 16)
}

fn parse_hex32(s: &str) -> Result<u32, std::num::ParseIntError> {
    u32::from_str_radix(strip_hex_prefix(s), 16)
}

fn parse_hex64(s: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(strip_hex_prefix(s), 16)
}

fn parse_arch(s: &str) -> Result<ArchMode, UnknownArchName> {
    ArchMode::try_from(s)
}

fn parse_sync_io(s: &str) -> Result<SyncIoPolicy, String> {
    match s.to_ascii_lowercase().as_str() {
        "never" => Ok(SyncIoPolicy::Never),
        "short" => Ok(SyncIoPolicy::ShortPrograms),
        "always" => Ok(SyncIoPolicy::Always),
        _ => Err(format!("'{s}' is not one of never, short, always")),
    }
}

#[derive(Debug)]
enum ConfigError {
    StorageSize(u64),
    Key(u8),
    ProgramFile {
        path: PathBuf,
        error: std::io::Error,
    },
    Program(ProgramError),
    ProgramDoesNotFit(AccessFailure),
    Device(AttachError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ConfigError::StorageSize(kib) => {
                write!(f, "storage size {kib}K is not a positive multiple of 4K")
            }
            ConfigError::Key(key) => write!(f, "storage key {key:X} is not in the range 0-F"),
            ConfigError::ProgramFile { path, error } => {
                write!(f, "cannot read {}: {error}", path.display())
            }
            ConfigError::Program(e) => write!(f, "bad channel program: {e}"),
            ConfigError::ProgramDoesNotFit(e) => {
                write!(f, "channel program does not fit in storage: {e}")
            }
            ConfigError::Device(e) => write!(f, "cannot attach loopback device: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::ProgramFile { error, .. } => Some(error),
            ConfigError::Program(e) => Some(e),
            ConfigError::ProgramDoesNotFit(e) => Some(e),
            ConfigError::Device(e) => Some(e),
            ConfigError::StorageSize(_) | ConfigError::Key(_) => None,
        }
    }
}

#[derive(Debug)]
struct NoInterrupt(Duration);

impl Display for NoInterrupt {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "the channel program did not finish within {}ms",
            self.0.as_millis()
        )
    }
}

impl Error for NoInterrupt {}

impl Options {
    fn channel_config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::new(self.arch);
        if self.no_midaw {
            config.arch.facilities.midaw = false;
        }
        if self.no_ils {
            config.arch.facilities.incorrect_length_suppression = false;
        }
        if self.no_address_limit_checking {
            config.arch.facilities.address_limit_checking = false;
        }
        config.max_worker_threads = self.max_threads;
        config.worker_idle_timeout =
            (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms));
        config.sync_io = self.sync_io;
        config.address_limit = self.address_limit;
        config
    }

    fn ccw_format(&self) -> CcwFormat {
        if self.format0 || !self.arch.has_channel_subsystem() {
            CcwFormat::Format0
        } else {
            CcwFormat::Format1
        }
    }
}

#[derive(Debug, Serialize)]
struct InterruptReport {
    kind: InterruptKind,
    ioid: u32,
    intparm: u32,
    status: StatusWord,
    /// What Test Subchannel stored, outside S/370 mode.
    irb: Option<Irb>,
}

#[derive(Debug, Serialize)]
struct Report {
    arch: ArchMode,
    devnum: u16,
    start_cc: Cc,
    /// Status stored by Start I/O when it found status pending.
    start_csw: Option<Csw>,
    interrupts: Vec<InterruptReport>,
    device: DeviceStatus,
    scheduler: SchedulerStats,
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        writeln!(
            f,
            "{} device {:04X}: start {}",
            self.arch, self.devnum, self.start_cc
        )?;
        for interrupt in &self.interrupts {
            write!(f, "{:?} interruption: ", interrupt.kind)?;
            match interrupt.status {
                StatusWord::Legacy(csw) => writeln!(
                    f,
                    "CSW key={:X} ccw={:06X} unit={:02X} channel={:02X} count={}",
                    csw.key >> 4,
                    csw.ccw_address,
                    csw.unitstat,
                    csw.chanstat,
                    csw.count
                )?,
                StatusWord::Structured(scsw) => writeln!(
                    f,
                    "SCSW flags={:02X}{:02X}{:02X}{:02X} ccw={:08X} unit={:02X} channel={:02X} count={}",
                    scsw.flag0,
                    scsw.flag1,
                    scsw.flag2,
                    scsw.flag3,
                    scsw.ccw_address,
                    scsw.unitstat,
                    scsw.chanstat,
                    scsw.count
                )?,
            }
            if let Some(irb) = &interrupt.irb {
                if irb.scsw.flag0 & SCSW0_L != 0 {
                    writeln!(f, "  sense {:02X?}", &irb.ecw[..8])?;
                }
            }
        }
        write!(
            f,
            "worker threads: {} (at most {} at once)",
            self.scheduler.threads, self.scheduler.high_water
        )
    }
}

/// True for the interruption which ends the channel program.
fn is_final(kind: InterruptKind, status: &StatusWord) -> bool {
    match (kind, status) {
        (InterruptKind::Ordinary, StatusWord::Legacy(_)) => true,
        (InterruptKind::Ordinary, StatusWord::Structured(scsw)) => {
            scsw.flag3 & (SCSW3_SC_PRI | SCSW3_SC_ALERT) != 0
                || scsw.function_control() & SCSW2_FC_CLEAR != 0
        }
        _ => false,
    }
}

fn run_program(options: &Options) -> Result<Report, Box<dyn Error>> {
    if options.storage_kib == 0 || options.storage_kib % 4 != 0 {
        return Err(Box::new(ConfigError::StorageSize(options.storage_kib)));
    }
    if options.key > 0x0F {
        return Err(Box::new(ConfigError::Key(options.key)));
    }
    let text =
        std::fs::read_to_string(&options.program).map_err(|error| ConfigError::ProgramFile {
            path: options.program.clone(),
            error,
        })?;
    let program = ChannelProgram::parse(&text).map_err(ConfigError::Program)?;

    let config = options.channel_config();
    event!(Level::DEBUG, "channel configuration: {config:?}");
    let storage = Arc::new(MainStorage::new(options.storage_kib * 1024));
    let sys = ChannelSubsystem::new(config, Arc::clone(&storage));
    let dev = sys
        .attach_device(options.devnum, Arc::new(LoopbackDevice::default()), &[])
        .map_err(ConfigError::Device)?;
    dev.set_sync_io(true);
    let format = options.ccw_format();
    program
        .load(&storage, options.origin, format)
        .map_err(ConfigError::ProgramDoesNotFit)?;
    event!(
        Level::INFO,
        "loaded {} CCWs at {:08X}",
        program.ccws.len(),
        options.origin
    );

    let cpu = CpuIoState::enabled(0);
    let key = options.key << 4;
    let (start_cc, start_csw) = if options.arch.has_channel_subsystem() {
        if sys.enable_subchan(&dev, 0) != Cc::Zero {
            event!(Level::WARN, "unable to enable subchannel {:04X}", dev.subchan());
        }
        let orb = Orb {
            intparm: u32::from(options.devnum),
            flag4: key,
            flag5: if format == CcwFormat::Format1 { ORB5_F } else { 0 },
            lpm: 0xFF,
            flag7: 0,
            ccw_address: options.origin,
        };
        (sys.start_subchan(&cpu, &dev, &orb)?, None)
    } else {
        let caw = Caw {
            key,
            ccw_address: options.origin,
        };
        sys.start_io(&cpu, &dev, caw)?
    };
    event!(Level::INFO, "start of device {:04X}: {start_cc}", options.devnum);

    let mut interrupts = Vec::new();
    if start_cc == Cc::Zero {
        let timeout = Duration::from_millis(options.timeout_ms);
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                sys.shutdown();
                return Err(Box::new(NoInterrupt(timeout)));
            }
            if !sys.wait_for_io_interrupt(remaining.min(Duration::from_millis(100))) {
                continue;
            }
            let Some(taken) = sys.present_io_interrupt(&cpu) else {
                continue;
            };
            let irb = if options.arch.has_channel_subsystem() {
                Some(sys.test_subchan(&cpu, &dev)?.1)
            } else {
                None
            };
            let done = is_final(taken.kind, &taken.status);
            interrupts.push(InterruptReport {
                kind: taken.kind,
                ioid: taken.ioid,
                intparm: taken.intparm,
                status: taken.status,
                irb,
            });
            if done {
                break;
            }
        }
    }
    let report = Report {
        arch: options.arch,
        devnum: options.devnum,
        start_cc,
        start_csw,
        interrupts,
        device: dev.status(),
        scheduler: sys.scheduler_stats(),
    };
    sys.shutdown();
    Ok(report)
}

fn run_cli() -> Result<(), Box<dyn Error>> {
    let options = Options::parse();

    // RUST_LOG selects which trace messages get printed; see the
    // tracing-subscriber EnvFilter documentation.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let report = run_program(&options)?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn main() {
    match run_cli() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
