//! Background maintenance for the resident disk set.
//!
//! One long-lived OS thread rotates preallocation and optimistic IO fairly
//! across disks and drains buffered writes every cycle. Maintenance shares
//! nothing with the foreground path except the table's lock: each cycle works
//! off a shallow snapshot of the mapping, so slow disk IO never blocks
//! reads/writes, and a disk failure is logged and skipped rather than
//! stopping the loop.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::config::SchedulerConfig;
use crate::disk::{Disk, RegionId};
use crate::error::{MaintenanceOutcome, StoreResult};
use crate::table::RegionDiskTable;

/// Time source for the scheduler's rate limits; injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The wall-clock-backed default.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Round-robin rotation over regions with O(1) membership checks.
///
/// A region appears at most once; `admit` of a present member is a no-op, so
/// each cycle's re-admission of the table snapshot only appends newcomers at
/// the tail.
struct RotationQueue {
    order: VecDeque<RegionId>,
    members: HashSet<RegionId>,
}

impl RotationQueue {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    fn admit(&mut self, region: RegionId) {
        if self.members.insert(region) {
            self.order.push_back(region);
        }
    }

    fn pop(&mut self) -> Option<RegionId> {
        let region = self.order.pop_front()?;
        self.members.remove(&region);
        Some(region)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// The per-cycle logic, separated from the thread so tests can drive cycles
/// deterministically against an injected clock.
pub(crate) struct SchedulerCore {
    table: Arc<RegionDiskTable>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    preallocation: RotationQueue,
    optimistic: RotationQueue,
    last_preallocation: Option<Instant>,
    last_optimistic_io: Option<Instant>,
}

impl SchedulerCore {
    pub(crate) fn new(
        table: Arc<RegionDiskTable>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table,
            config,
            clock,
            preallocation: RotationQueue::new(),
            optimistic: RotationQueue::new(),
            last_preallocation: None,
            last_optimistic_io: None,
        }
    }

    /// Run one maintenance cycle. Returns whether any pass made progress;
    /// an idle cycle tells the loop to sleep before the next one.
    pub(crate) fn cycle(&mut self) -> bool {
        let disks = self.table.snapshot();

        for region in disks.keys() {
            self.preallocation.admit(*region);
            self.optimistic.admit(*region);
        }

        let mut busy = false;

        let now = self.clock.now();
        if is_due(self.last_preallocation, now, self.config.preallocation_interval) {
            busy |= rotation_pass(&mut self.preallocation, &disks, "preallocation", |disk| {
                disk.preallocate()
            });
            self.last_preallocation = Some(now);
        }

        let now = self.clock.now();
        if is_due(self.last_optimistic_io, now, self.config.optimistic_io_interval) {
            busy |= rotation_pass(&mut self.optimistic, &disks, "optimistic-io", |disk| {
                disk.optimistic_io()
            });
            self.last_optimistic_io = Some(now);
        }

        busy |= self.flush_pass(&disks);
        busy
    }

    /// Unthrottled per-cycle flush: buffered writes must drain promptly to
    /// bound memory use and crash exposure. A buffer-full report gets an
    /// immediate mandatory-IO remediation on the same disk.
    fn flush_pass(&self, disks: &BTreeMap<RegionId, Arc<dyn Disk>>) -> bool {
        let mut busy = false;

        for (region, disk) in disks {
            match disk.flush(self.config.flush_budget) {
                Ok(MaintenanceOutcome::Progress) => busy = true,
                Ok(MaintenanceOutcome::DidNothing) => {}
                Ok(MaintenanceOutcome::DataFull) | Ok(MaintenanceOutcome::SearchFull) => {
                    match disk.mandatory_io() {
                        Ok(MaintenanceOutcome::Progress) | Ok(MaintenanceOutcome::DidNothing) => {}
                        Ok(outcome) => {
                            error!(%region, %outcome, "mandatory IO left the buffer full")
                        }
                        Err(err) => error!(%region, error = %err, "mandatory IO failed"),
                    }
                }
                Err(err) => error!(%region, error = %err, "disk flush failed"),
            }
        }

        busy
    }
}

fn is_due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        None => true,
        Some(at) => now.duration_since(at) >= interval,
    }
}

/// One rate-limited pass over a rotation queue.
///
/// Pops from the head, re-enqueues at the tail while the region still has a
/// disk, and invokes `op`. The pass ends early once a disk reports progress;
/// no-progress moves on to the next region, and failures are logged and
/// skipped. Visits each queued region at most once.
fn rotation_pass<F>(
    queue: &mut RotationQueue,
    disks: &BTreeMap<RegionId, Arc<dyn Disk>>,
    pass: &'static str,
    op: F,
) -> bool
where
    F: Fn(&dyn Disk) -> StoreResult<MaintenanceOutcome>,
{
    let mut remaining = queue.len();

    while remaining > 0 {
        remaining -= 1;
        let Some(region) = queue.pop() else {
            break;
        };
        let Some(disk) = disks.get(&region) else {
            // No disk anymore; the region stays out of the rotation until a
            // later snapshot re-admits it.
            continue;
        };
        queue.admit(region);

        match op(disk.as_ref()) {
            Ok(MaintenanceOutcome::Progress) => return true,
            Ok(MaintenanceOutcome::DidNothing) => {}
            Ok(outcome) => warn!(%region, pass, %outcome, "maintenance reported an unexpected outcome"),
            Err(err) => warn!(%region, pass, error = %err, "maintenance failed"),
        }
    }

    false
}

/// Owner of the maintenance thread.
///
/// Started at construction; stopped by a shutdown flag checked at the top of
/// every cycle and at the sleep boundary, then joined. The idle sleep waits
/// on the shutdown channel, so a shutdown issued mid-sleep wakes the thread
/// immediately; in-flight disk IO is allowed to complete.
pub struct MaintenanceScheduler {
    stop: Arc<AtomicBool>,
    wake: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    pub fn start(
        table: Arc<RegionDiskTable>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (wake, sleeper) = bounded::<()>(1);
        let flag = Arc::clone(&stop);
        let mut core = SchedulerCore::new(table, config, clock);

        let thread = thread::Builder::new()
            .name("shardstore-maintenance".into())
            .spawn(move || {
                debug!("maintenance thread started");

                while !flag.load(Ordering::Acquire) {
                    let busy = core.cycle();

                    if !busy {
                        match sleeper.recv_timeout(core.config.idle_sleep) {
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                            Err(RecvTimeoutError::Timeout) => {}
                        }
                    }
                }

                debug!("maintenance thread exiting");
            })?;

        Ok(Self {
            stop,
            wake,
            thread: Some(thread),
        })
    }

    /// Signal the thread and wait for it to exit. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.wake.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
