//! Scripted fakes shared by the crate's tests: an in-memory disk with
//! per-operation outcome scripts and call counters, a builder-style
//! configuration snapshot, a manually advanced clock, and log segments that
//! track syncs and drops.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::chain::LogSegment;
use crate::disk::{
    Disk, DiskFactory, DiskSnapshot, EntityId, InstanceId, PlacementHasher, RegionId,
    RollingSnapshot, SnapshotFilter, SubspaceId, TransferId,
};
use crate::error::{MaintenanceOutcome, StoreError, StoreResult};
use crate::maintenance::Clock;
use crate::reconcile::Configuration;

/// Clock whose time only moves when a test says so.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Instant::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[derive(Clone, Copy)]
enum Step {
    Outcome(MaintenanceOutcome),
    Fail,
}

/// Outcome script for one maintenance operation of a [`FakeDisk`]: queued
/// steps play in order, then the default repeats forever.
pub struct Script {
    steps: VecDeque<Step>,
    default: Step,
}

impl Script {
    /// Every call reports `outcome`.
    pub fn always(outcome: MaintenanceOutcome) -> Self {
        Self {
            steps: VecDeque::new(),
            default: Step::Outcome(outcome),
        }
    }

    /// The first call reports `outcome`, the rest did-nothing.
    pub fn once(outcome: MaintenanceOutcome) -> Self {
        let mut script = Self::default();
        script.steps.push_back(Step::Outcome(outcome));
        script
    }

    /// Every call fails with an injected disk error.
    pub fn failing() -> Self {
        Self {
            steps: VecDeque::new(),
            default: Step::Fail,
        }
    }

    fn next(&mut self) -> StoreResult<MaintenanceOutcome> {
        let step = self.steps.pop_front().unwrap_or(self.default);
        match step {
            Step::Outcome(outcome) => Ok(outcome),
            Step::Fail => Err(StoreError::Disk("injected failure".into())),
        }
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::always(MaintenanceOutcome::DidNothing)
    }
}

/// In-memory stand-in for the external storage engine.
pub struct FakeDisk {
    data: Mutex<BTreeMap<Vec<u8>, (Vec<Vec<u8>>, u64)>>,
    preallocate: Mutex<Script>,
    optimistic: Mutex<Script>,
    mandatory: Mutex<Script>,
    flush: Mutex<Script>,
    preallocate_calls: AtomicUsize,
    optimistic_calls: AtomicUsize,
    mandatory_calls: AtomicUsize,
    flush_calls: AtomicUsize,
    drop_calls: AtomicUsize,
}

impl FakeDisk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(BTreeMap::new()),
            preallocate: Mutex::new(Script::default()),
            optimistic: Mutex::new(Script::default()),
            mandatory: Mutex::new(Script::default()),
            flush: Mutex::new(Script::default()),
            preallocate_calls: AtomicUsize::new(0),
            optimistic_calls: AtomicUsize::new(0),
            mandatory_calls: AtomicUsize::new(0),
            flush_calls: AtomicUsize::new(0),
            drop_calls: AtomicUsize::new(0),
        })
    }

    pub fn script_preallocate(&self, script: Script) {
        *self.preallocate.lock() = script;
    }

    pub fn script_optimistic(&self, script: Script) {
        *self.optimistic.lock() = script;
    }

    pub fn script_mandatory(&self, script: Script) {
        *self.mandatory.lock() = script;
    }

    pub fn script_flush(&self, script: Script) {
        *self.flush.lock() = script;
    }

    pub fn preallocate_calls(&self) -> usize {
        self.preallocate_calls.load(Ordering::SeqCst)
    }

    pub fn optimistic_calls(&self) -> usize {
        self.optimistic_calls.load(Ordering::SeqCst)
    }

    pub fn mandatory_calls(&self) -> usize {
        self.mandatory_calls.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }

    pub fn drop_calls(&self) -> usize {
        self.drop_calls.load(Ordering::SeqCst)
    }
}

impl Disk for FakeDisk {
    fn get(&self, key: &[u8]) -> StoreResult<(Vec<Vec<u8>>, u64)> {
        self.data
            .lock()
            .get(key)
            .cloned()
            .ok_or(StoreError::KeyNotFound)
    }

    fn put(&self, key: &[u8], value: Vec<Vec<u8>>, version: u64) -> StoreResult<()> {
        self.data.lock().insert(key.to_vec(), (value, version));
        Ok(())
    }

    fn del(&self, key: &[u8]) -> StoreResult<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn make_snapshot(&self, _filter: SnapshotFilter) -> StoreResult<Box<dyn DiskSnapshot>> {
        // The fake ignores placement filters.
        let entries = self
            .data
            .lock()
            .iter()
            .map(|(k, (v, ver))| (k.clone(), v.clone(), *ver))
            .collect();
        Ok(Box::new(FakeSnapshot { entries, pos: 0 }))
    }

    fn make_rolling_snapshot(&self) -> StoreResult<Box<dyn RollingSnapshot>> {
        let remaining = self.data.lock().len();
        Ok(Box::new(FakeRollingSnapshot { remaining }))
    }

    fn preallocate(&self) -> StoreResult<MaintenanceOutcome> {
        self.preallocate_calls.fetch_add(1, Ordering::SeqCst);
        self.preallocate.lock().next()
    }

    fn optimistic_io(&self) -> StoreResult<MaintenanceOutcome> {
        self.optimistic_calls.fetch_add(1, Ordering::SeqCst);
        self.optimistic.lock().next()
    }

    fn mandatory_io(&self) -> StoreResult<MaintenanceOutcome> {
        self.mandatory_calls.fetch_add(1, Ordering::SeqCst);
        self.mandatory.lock().next()
    }

    fn flush(&self, _budget: usize) -> StoreResult<MaintenanceOutcome> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        self.flush.lock().next()
    }

    fn drop_storage(&self) -> StoreResult<()> {
        self.drop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct FakeSnapshot {
    entries: Vec<(Vec<u8>, Vec<Vec<u8>>, u64)>,
    pos: usize,
}

impl DiskSnapshot for FakeSnapshot {
    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &[Vec<u8>] {
        &self.entries[self.pos].1
    }

    fn version(&self) -> u64 {
        self.entries[self.pos].2
    }
}

#[derive(Debug)]
struct FakeRollingSnapshot {
    remaining: usize,
}

impl RollingSnapshot for FakeRollingSnapshot {
    fn valid(&self) -> bool {
        self.remaining > 0
    }

    fn advance(&mut self) {
        self.remaining -= 1;
    }
}

/// Placement function that reads the key's leading bytes.
pub struct IdentityHasher;

impl PlacementHasher for IdentityHasher {
    fn placement(&self, key: &[u8]) -> u64 {
        let mut bytes = [0u8; 8];
        let n = key.len().min(8);
        bytes[..n].copy_from_slice(&key[..n]);
        u64::from_le_bytes(bytes)
    }
}

/// Factory that mints [`FakeDisk`]s and remembers what it created.
pub struct FakeDiskFactory {
    created: Mutex<Vec<(PathBuf, u16, Arc<FakeDisk>)>>,
    registered: Mutex<BTreeMap<RegionId, Arc<FakeDisk>>>,
}

impl FakeDiskFactory {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            registered: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of disks created through the [`DiskFactory`] seam.
    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn created_disks(&self) -> Vec<Arc<FakeDisk>> {
        self.created
            .lock()
            .iter()
            .map(|(_, _, disk)| Arc::clone(disk))
            .collect()
    }

    pub fn created_paths(&self) -> Vec<PathBuf> {
        self.created
            .lock()
            .iter()
            .map(|(path, _, _)| path.clone())
            .collect()
    }

    /// Mint a disk outside the factory seam, tracked under `region` so tests
    /// can assert on it after inserting it into a table themselves.
    pub fn register(&self, region: RegionId) -> Arc<FakeDisk> {
        let disk = FakeDisk::new();
        self.registered.lock().insert(region, Arc::clone(&disk));
        disk
    }

    pub fn disk(&self, region: RegionId) -> Option<Arc<FakeDisk>> {
        self.registered.lock().get(&region).cloned()
    }
}

impl Default for FakeDiskFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskFactory for FakeDiskFactory {
    fn create(
        &self,
        path: &Path,
        _hasher: Arc<dyn PlacementHasher>,
        column_count: u16,
    ) -> StoreResult<Arc<dyn Disk>> {
        let disk = FakeDisk::new();
        self.created
            .lock()
            .push((path.to_path_buf(), column_count, Arc::clone(&disk)));
        Ok(disk)
    }
}

/// Builder-style configuration snapshot.
#[derive(Default)]
pub struct FakeConfiguration {
    regions: BTreeMap<RegionId, u16>,
    entities: BTreeMap<EntityId, InstanceId>,
    transfers: Vec<(TransferId, InstanceId, RegionId)>,
}

impl FakeConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: RegionId, column_count: u16) -> Self {
        self.regions.insert(region, column_count);
        self
    }

    pub fn assign(mut self, entity: EntityId, owner: InstanceId) -> Self {
        self.entities.insert(entity, owner);
        self
    }

    pub fn transfer(mut self, id: TransferId, to: InstanceId, region: RegionId) -> Self {
        self.transfers.push((id, to, region));
        self
    }
}

impl Configuration for FakeConfiguration {
    fn regions(&self) -> BTreeMap<RegionId, u16> {
        self.regions.clone()
    }

    fn entity_mapping(&self) -> &BTreeMap<EntityId, InstanceId> {
        &self.entities
    }

    fn transfers_to(&self, instance: InstanceId) -> BTreeMap<TransferId, RegionId> {
        self.transfers
            .iter()
            .filter(|(_, to, _)| *to == instance)
            .map(|(id, _, region)| (*id, *region))
            .collect()
    }

    fn disk_hasher(&self, _subspace: SubspaceId) -> Arc<dyn PlacementHasher> {
        Arc::new(IdentityHasher)
    }
}

/// Log segment that tracks dirtiness, syncs, and drops.
pub struct FakeSegment {
    lower_bound: u64,
    dirty: AtomicBool,
    drops: Option<Arc<AtomicUsize>>,
}

impl FakeSegment {
    pub fn named(lower_bound: u64) -> Arc<Self> {
        Arc::new(Self {
            lower_bound,
            dirty: AtomicBool::new(false),
            drops: None,
        })
    }

    /// Segment that bumps `drops` when its last reference goes away.
    pub fn counting(drops: Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            lower_bound: 0,
            dirty: AtomicBool::new(false),
            drops: Some(drops),
        })
    }

    pub fn lower_bound(&self) -> u64 {
        self.lower_bound
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

impl LogSegment for FakeSegment {
    fn sync(&self) -> io::Result<bool> {
        Ok(self.dirty.swap(false, Ordering::SeqCst))
    }
}

impl Drop for FakeSegment {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}
