//! Tunables of the channel subsystem.
use std::time::Duration;

use serde::Serialize;

use base::prelude::*;

/// Decides when Start Subchannel may run a channel program on the
/// issuing CPU's thread instead of handing it to a worker thread.
/// Devices must also opt in (see [`crate::Device::set_sync_io`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncIoPolicy {
    Never,
    /// Only when the first CCW moves no data through a device: a
    /// TIC, a sense, or an immediate control command.
    ShortPrograms,
    Always,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelConfig {
    pub arch: Architecture,
    /// Upper bound on I/O worker threads.  Zero means no bound; a
    /// negative value means that every request gets a fresh thread
    /// which exits when the request completes.
    pub max_worker_threads: i32,
    /// How long an idle worker thread waits for work before exiting.
    /// `None` keeps idle workers forever.
    pub worker_idle_timeout: Option<Duration>,
    pub sync_io: SyncIoPolicy,
    /// The address-limit value compared against data addresses when
    /// the ORB requests address-limit checking.
    pub address_limit: u64,
}

impl ChannelConfig {
    #[must_use]
    pub fn new(mode: ArchMode) -> ChannelConfig {
        ChannelConfig {
            arch: Architecture::new(mode),
            max_worker_threads: 8,
            worker_idle_timeout: Some(Duration::from_secs(5)),
            sync_io: SyncIoPolicy::Never,
            address_limit: 0,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> ChannelConfig {
        ChannelConfig::new(ArchMode::ZArch)
    }
}
