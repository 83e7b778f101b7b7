//! Asynchronous execution of channel programs.
//!
//! Started subchannels wait in a priority queue keyed by subchannel
//! number, so that a subchannel is queued at most once and a start
//! can be withdrawn (by Cancel, Halt or Clear) until a worker thread
//! picks it up.  Worker threads are created on demand, up to the
//! configured limit, and exit after sitting idle for the configured
//! time.
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{event, Level};

use base::collections::pq::KeyedMinQueue;

use super::chain::{execute_ccw_chain, ExecutionMode};
use super::device::Device;
use super::error::SchedulerError;
use super::system::ChannelSubsystem;

/// Something which can run the channel program of a device to
/// completion (or suspension) on the current thread.
pub trait JobRunner: Send + Sync {
    fn run(&self, dev: &Arc<Device>);
}

impl JobRunner for ChannelSubsystem {
    fn run(&self, dev: &Arc<Device>) {
        execute_ccw_chain(self, dev, ExecutionMode::Asynchronous);
    }
}

/// Hands started subchannels to threads which execute them.
pub trait IoScheduler: Send + Sync {
    /// Arrange for `runner` to run `dev`'s channel program.
    ///
    /// # Errors
    ///
    /// Fails when no thread is available to run the program.
    fn submit(&self, runner: Arc<dyn JobRunner>, dev: &Arc<Device>) -> Result<(), SchedulerError>;

    /// Withdraw a submitted device which no thread has picked up yet.
    /// Returns false if it was not waiting.
    fn cancel(&self, dev: &Device) -> bool;

    /// Stop accepting work and let idle threads exit.
    fn shutdown(&self);

    fn stats(&self) -> SchedulerStats;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SchedulerStats {
    pub threads: usize,
    pub idle: usize,
    /// The most worker threads which have existed at once.
    pub high_water: usize,
    pub queued: usize,
}

struct Job {
    dev: Arc<Device>,
    runner: Arc<dyn JobRunner>,
}

#[derive(Default)]
struct WorkQueueState {
    queue: KeyedMinQueue<u16, (u8, u64)>,
    jobs: HashMap<u16, Job>,
    next_ticket: u64,
    threads: usize,
    /// Waiting workers which no submitted job has yet claimed.
    idle: usize,
    /// Waiting workers which have been claimed but have not yet woken.
    wakeups: usize,
    high_water: usize,
    max_threads: i32,
    shutdown: bool,
}

impl WorkQueueState {
    fn take_next(&mut self) -> Option<Job> {
        let (subchan, _) = self.queue.pop()?;
        self.jobs.remove(&subchan)
    }

    fn over_limit(&self) -> bool {
        self.max_threads > 0 && self.threads > self.max_threads as usize
    }
}

struct Shared {
    state: Mutex<WorkQueueState>,
    work_available: Condvar,
    idle_timeout: Option<Duration>,
}

/// The thread-pool scheduler.
pub struct WorkQueueScheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkQueueScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.debug_struct("WorkQueueScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

impl WorkQueueScheduler {
    #[must_use]
    pub fn new(max_threads: i32, idle_timeout: Option<Duration>) -> WorkQueueScheduler {
        WorkQueueScheduler {
            shared: Arc::new(Shared {
                state: Mutex::new(WorkQueueState {
                    max_threads,
                    ..WorkQueueState::default()
                }),
                work_available: Condvar::new(),
                idle_timeout,
            }),
        }
    }

    /// Change the thread limit.  Surplus idle threads exit.
    pub fn set_max_threads(&self, max_threads: i32) {
        self.shared.state.lock().max_threads = max_threads;
        self.shared.work_available.notify_all();
    }

    fn spawn(&self, state: &mut WorkQueueState, one_shot: bool) -> Result<(), SchedulerError> {
        let shared = Arc::clone(&self.shared);
        let number = state.threads;
        thread::Builder::new()
            .name(format!("io-worker-{number}"))
            .spawn(move || worker(&shared, one_shot))
            .map_err(SchedulerError::ThreadCreation)?;
        state.threads += 1;
        state.high_water = state.high_water.max(state.threads);
        event!(
            Level::DEBUG,
            "created I/O worker thread ({} running)",
            state.threads
        );
        Ok(())
    }
}

fn worker(shared: &Shared, one_shot: bool) {
    let mut state = shared.state.lock();
    loop {
        if let Some(job) = state.take_next() {
            drop(state);
            job.runner.run(&job.dev);
            state = shared.state.lock();
            if one_shot {
                break;
            }
            continue;
        }
        if one_shot || state.shutdown || state.over_limit() {
            break;
        }
        state.idle += 1;
        let timed_out = match shared.idle_timeout {
            Some(timeout) => shared
                .work_available
                .wait_for(&mut state, timeout)
                .timed_out(),
            None => {
                shared.work_available.wait(&mut state);
                false
            }
        };
        if state.wakeups > 0 {
            state.wakeups -= 1;
            continue;
        }
        state.idle -= 1;
        if timed_out && state.queue.is_empty() {
            break;
        }
    }
    state.threads -= 1;
    event!(
        Level::DEBUG,
        "I/O worker thread exits ({} remain)",
        state.threads
    );
}

impl IoScheduler for WorkQueueScheduler {
    fn submit(&self, runner: Arc<dyn JobRunner>, dev: &Arc<Device>) -> Result<(), SchedulerError> {
        let priority = dev.io_priority();
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(SchedulerError::ShuttingDown);
        }
        let subchan = dev.subchan();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push(subchan, (priority, ticket));
        state.jobs.insert(
            subchan,
            Job {
                dev: Arc::clone(dev),
                runner,
            },
        );

        let result = if state.max_threads < 0 {
            self.spawn(&mut state, true)
        } else if state.idle > 0 {
            // Claim the waiting worker, so that the next submission
            // does not count on it too.
            state.idle -= 1;
            state.wakeups += 1;
            self.shared.work_available.notify_one();
            Ok(())
        } else if state.max_threads == 0 || state.threads < state.max_threads as usize {
            match self.spawn(&mut state, false) {
                // Somebody already running will get to it.
                Err(e) if state.threads > 0 => {
                    event!(Level::WARN, "{e}; request stays queued");
                    Ok(())
                }
                other => other,
            }
        } else {
            Ok(())
        };
        if result.is_err() {
            state.queue.remove(&subchan);
            state.jobs.remove(&subchan);
        }
        result
    }

    fn cancel(&self, dev: &Device) -> bool {
        let mut state = self.shared.state.lock();
        let subchan = dev.subchan();
        if state.queue.remove(&subchan).is_some() {
            state.jobs.remove(&subchan);
            true
        } else {
            false
        }
    }

    fn shutdown(&self) {
        self.shared.state.lock().shutdown = true;
        self.shared.work_available.notify_all();
    }

    fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        SchedulerStats {
            threads: state.threads,
            idle: state.idle,
            high_water: state.high_water,
            queued: state.queue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    use base::prelude::*;

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

    /// Records which devices ran, and can be held up until released.
    struct Gate {
        ran: AtomicUsize,
        done: Mutex<mpsc::Sender<u16>>,
        hold: Mutex<bool>,
        release: Condvar,
    }

    impl Gate {
        fn new(done: mpsc::Sender<u16>, hold: bool) -> Arc<Gate> {
            Arc::new(Gate {
                ran: AtomicUsize::new(0),
                done: Mutex::new(done),
                hold: Mutex::new(hold),
                release: Condvar::new(),
            })
        }

        fn open(&self) {
            *self.hold.lock() = false;
            self.release.notify_all();
        }
    }

    impl JobRunner for Gate {
        fn run(&self, dev: &Arc<Device>) {
            let mut hold = self.hold.lock();
            while *hold {
                self.release.wait(&mut hold);
            }
            drop(hold);
            self.ran.fetch_add(1, Ordering::SeqCst);
            self.done.lock().send(dev.devnum()).unwrap();
        }
    }

    fn devices(n: u16) -> Vec<Arc<Device>> {
        let registry = DeviceRegistry::default();
        (0..n)
            .map(|i| registry.attach(0x0100 + i, Arc::new(Idle), &[]).unwrap())
            .collect()
    }

    fn wait_until(what: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !what() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_jobs_run() {
        let (tx, rx) = mpsc::channel();
        let gate = Gate::new(tx, false);
        let scheduler = WorkQueueScheduler::new(2, Some(Duration::from_millis(50)));
        let devs = devices(4);
        for dev in &devs {
            scheduler.submit(gate.clone(), dev).unwrap();
        }
        let mut seen: Vec<u16> = (0..4).map(|_| rx.recv().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0x0100, 0x0101, 0x0102, 0x0103]);
        assert!(scheduler.stats().high_water <= 2);
        // Idle workers time out.
        wait_until(|| scheduler.stats().threads == 0);
    }

    #[test]
    fn test_cancel_before_pickup() {
        let (tx, rx) = mpsc::channel();
        let gate = Gate::new(tx, true);
        let scheduler = WorkQueueScheduler::new(1, None);
        let devs = devices(2);
        scheduler.submit(gate.clone(), &devs[0]).unwrap();
        // The single worker is now held up by the first job, so the
        // second stays in the queue.
        wait_until(|| scheduler.stats().queued == 0);
        scheduler.submit(gate.clone(), &devs[1]).unwrap();
        assert_eq!(scheduler.stats().queued, 1);
        assert!(scheduler.cancel(&devs[1]));
        assert!(!scheduler.cancel(&devs[1]));
        gate.open();
        assert_eq!(rx.recv().unwrap(), 0x0100);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(gate.ran.load(Ordering::SeqCst), 1);
        scheduler.shutdown();
        wait_until(|| scheduler.stats().threads == 0);
    }

    #[test]
    fn test_idle_worker_serves_one_submission() {
        let (tx, rx) = mpsc::channel();
        let quick = Gate::new(tx.clone(), false);
        let held = Gate::new(tx, true);
        let scheduler = WorkQueueScheduler::new(2, None);
        let devs = devices(3);
        scheduler.submit(quick, &devs[0]).unwrap();
        assert_eq!(rx.recv().unwrap(), 0x0100);
        wait_until(|| scheduler.stats().idle == 1);

        scheduler.submit(held.clone(), &devs[1]).unwrap();
        scheduler.submit(held.clone(), &devs[2]).unwrap();
        // The idle worker went to the first of these, so the second
        // got a thread of its own.
        assert_eq!(scheduler.stats().threads, 2);
        assert_eq!(scheduler.stats().idle, 0);
        held.open();
        let mut seen = vec![rx.recv().unwrap(), rx.recv().unwrap()];
        seen.sort_unstable();
        assert_eq!(seen, vec![0x0101, 0x0102]);
        wait_until(|| scheduler.stats().idle == 2);
        scheduler.shutdown();
        wait_until(|| scheduler.stats().threads == 0);
    }

    #[test]
    fn test_one_shot_threads() {
        let (tx, rx) = mpsc::channel();
        let gate = Gate::new(tx, false);
        let scheduler = WorkQueueScheduler::new(-1, None);
        for dev in &devices(3) {
            scheduler.submit(gate.clone(), dev).unwrap();
        }
        for _ in 0..3 {
            rx.recv().unwrap();
        }
        wait_until(|| scheduler.stats().threads == 0);
        assert_eq!(scheduler.stats().idle, 0);
    }

    #[test]
    fn test_shutdown_refuses_work() {
        let scheduler = WorkQueueScheduler::new(1, None);
        scheduler.shutdown();
        let (tx, _rx) = mpsc::channel();
        let gate = Gate::new(tx, false);
        assert!(matches!(
            scheduler.submit(gate, &devices(1)[0]),
            Err(SchedulerError::ShuttingDown)
        ));
    }
}
