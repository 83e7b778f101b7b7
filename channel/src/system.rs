//! The channel subsystem as a whole: configuration, main storage,
//! the configured devices, the interrupt queue and the scheduler.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::config::ChannelConfig;
use super::device::{Device, DeviceHandler, DeviceRegistry};
use super::error::AttachError;
use super::interrupt::{InterruptLock, IoInterruptQueue};
use super::scheduler::{IoScheduler, SchedulerStats, WorkQueueScheduler};
use super::storage::MainStorage;

#[derive(Debug)]
pub struct ChannelSubsystem {
    pub(crate) config: ChannelConfig,
    address_limit: AtomicU64,
    pub(crate) storage: Arc<MainStorage>,
    pub(crate) devices: DeviceRegistry,
    pub(crate) ioq: IoInterruptQueue,
    pub(crate) intlock: InterruptLock,
    pub(crate) scheduler: WorkQueueScheduler,
}

impl ChannelSubsystem {
    #[must_use]
    pub fn new(config: ChannelConfig, storage: Arc<MainStorage>) -> Arc<ChannelSubsystem> {
        event!(
            Level::INFO,
            "channel subsystem for {} with {:#X} bytes of storage",
            config.arch.mode,
            storage.size()
        );
        Arc::new(ChannelSubsystem {
            address_limit: AtomicU64::new(config.address_limit),
            scheduler: WorkQueueScheduler::new(
                config.max_worker_threads,
                config.worker_idle_timeout,
            ),
            config,
            storage,
            devices: DeviceRegistry::default(),
            ioq: IoInterruptQueue::default(),
            intlock: InterruptLock::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    #[must_use]
    pub fn arch(&self) -> Architecture {
        self.config.arch
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<MainStorage> {
        &self.storage
    }

    #[must_use]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    #[must_use]
    pub fn address_limit(&self) -> u64 {
        self.address_limit.load(Ordering::Relaxed)
    }

    /// Set Address Limit.
    pub fn set_address_limit(&self, limit: u64) {
        self.address_limit.store(limit, Ordering::Relaxed);
    }

    /// Configure a device.
    ///
    /// # Errors
    ///
    /// See [`DeviceRegistry::attach`].
    pub fn attach_device(
        &self,
        devnum: u16,
        handler: Arc<dyn DeviceHandler>,
        args: &[String],
    ) -> Result<Arc<Device>, AttachError> {
        self.devices.attach(devnum, handler, args)
    }

    /// Remove a device from the configuration, abandoning whatever it
    /// was doing.
    ///
    /// # Errors
    ///
    /// Fails if no device has number `devnum`.
    pub fn detach_device(&self, devnum: u16) -> Result<(), AttachError> {
        let dev = self
            .devices
            .find_by_devnum(devnum)
            .ok_or(AttachError::UnknownDevice(devnum))?;
        self.device_reset(&dev);
        self.devices.detach(devnum)?;
        Ok(())
    }

    #[must_use]
    pub fn find_device_by_devnum(&self, devnum: u16) -> Option<Arc<Device>> {
        self.devices.find_by_devnum(devnum)
    }

    #[must_use]
    pub fn find_device_by_subchan(&self, subchan: u16) -> Option<Arc<Device>> {
        self.devices.find_by_subchan(subchan)
    }

    /// Whether any I/O interrupt is queued.
    #[must_use]
    pub fn io_pending(&self) -> bool {
        self.intlock.io_pending()
    }

    /// Wait, as a CPU in the wait state, for an I/O interrupt to
    /// become pending.
    pub fn wait_for_io_interrupt(&self, timeout: Duration) -> bool {
        self.intlock.wait_for_io(timeout)
    }

    #[must_use]
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn set_max_worker_threads(&self, max_threads: i32) {
        self.scheduler.set_max_threads(max_threads);
    }

    /// Stop the I/O worker threads.  Channel programs already running
    /// carry on to their end; no new ones can be started
    /// asynchronously.
    pub fn shutdown(&self) {
        event!(Level::INFO, "channel subsystem shutting down");
        self.scheduler.shutdown();
    }
}
