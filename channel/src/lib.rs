//! The channel subsystem of an S/370, ESA/390 or z/Architecture
//! system.
//!
//! A [`ChannelSubsystem`] owns main storage, the configured devices
//! and their subchannels, the I/O interrupt queue and the worker
//! threads which run channel programs.  CPU emulation calls the
//! subchannel instruction methods (`start_subchan`, `test_subchan`
//! and so on) and [`ChannelSubsystem::present_io_interrupt`]; device
//! emulation plugs in through [`DeviceHandler`].
mod chain;
mod config;
mod device;
mod error;
mod fetch;
mod interrupt;
mod scheduler;
mod storage;
mod subchannel;
mod system;
mod transfer;

pub use config::{ChannelConfig, SyncIoPolicy};
pub use device::{
    CcwExecution, CcwResult, Device, DeviceHandler, DeviceRegistry, DeviceStatus, IoActive,
};
pub use error::{AttachError, ChannelCheck, Intercept, SchedulerError};
pub use interrupt::{
    CpuIoState, InterruptKind, InterruptLock, IoInterruptQueue, PresentedInterrupt, SieState,
};
pub use scheduler::{IoScheduler, JobRunner, SchedulerStats, WorkQueueScheduler};
pub use storage::{AccessFailure, MainStorage};
pub use subchannel::Cc;
pub use system::ChannelSubsystem;
