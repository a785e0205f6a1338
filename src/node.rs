//! Externally visible storage surface of the node.
//!
//! `StorageNode` wires the region-disk table, the reconciliation engine, and
//! the maintenance scheduler together and forwards region-addressed requests
//! to the resident disk. The foreground path shares nothing with background
//! maintenance beyond the table's lock.

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::disk::{
    Disk, DiskFactory, DiskSnapshot, InstanceId, RegionId, RollingSnapshot, SnapshotFilter,
};
use crate::error::{MaintenanceOutcome, StoreError, StoreResult};
use crate::maintenance::{Clock, MaintenanceScheduler, SystemClock};
use crate::reconcile::{Configuration, ReconciliationEngine};
use crate::table::RegionDiskTable;

pub struct StorageNode {
    table: Arc<RegionDiskTable>,
    engine: ReconciliationEngine,
    scheduler: MaintenanceScheduler,
    trickle_budget: usize,
}

impl StorageNode {
    /// Construct the node and start its maintenance thread.
    pub fn new(config: StoreConfig, factory: Arc<dyn DiskFactory>) -> StoreResult<Self> {
        Self::with_clock(config, factory, Arc::new(SystemClock))
    }

    /// Like [`StorageNode::new`] with an injected time source for the
    /// scheduler's rate limits.
    pub fn with_clock(
        config: StoreConfig,
        factory: Arc<dyn DiskFactory>,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let table = Arc::new(RegionDiskTable::new());
        let engine =
            ReconciliationEngine::new(Arc::clone(&table), factory, config.base_dir.clone());
        let scheduler = MaintenanceScheduler::start(Arc::clone(&table), config.scheduler, clock)?;

        Ok(Self {
            table,
            engine,
            scheduler,
            trickle_budget: config.trickle_budget,
        })
    }

    /// The region-disk mapping. Exposed for inspection; lifecycle mutation
    /// goes through the reconciliation operations.
    pub fn table(&self) -> &RegionDiskTable {
        &self.table
    }

    /// Apply the create side of a configuration transition. Must run before
    /// [`StorageNode::cleanup`] for the same transition.
    pub fn prepare(&self, config: &dyn Configuration, us: InstanceId) {
        self.engine.prepare(config, us);
    }

    /// Migration-bookkeeping hook between prepare and cleanup.
    pub fn reconfigure(&self, config: &dyn Configuration, us: InstanceId) {
        self.engine.reconfigure(config, us);
    }

    /// Apply the drop side of a configuration transition.
    pub fn cleanup(&self, config: &dyn Configuration, us: InstanceId) {
        self.engine.cleanup(config, us);
    }

    /// Stop background maintenance and join its thread. Idempotent; also
    /// performed on drop for nodes that were never shut down explicitly.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }

    pub fn get(&self, region: RegionId, key: &[u8]) -> StoreResult<(Vec<Vec<u8>>, u64)> {
        self.disk(region)?.get(key)
    }

    pub fn put(
        &self,
        region: RegionId,
        key: &[u8],
        value: Vec<Vec<u8>>,
        version: u64,
    ) -> StoreResult<()> {
        self.disk(region)?.put(key, value, version)
    }

    pub fn del(&self, region: RegionId, key: &[u8]) -> StoreResult<()> {
        self.disk(region)?.del(key)
    }

    /// Point-in-time snapshot over everything resident in `region`.
    pub fn make_snapshot(&self, region: RegionId) -> StoreResult<Box<dyn DiskSnapshot>> {
        self.disk(region)?.make_snapshot(SnapshotFilter::Everything)
    }

    /// Snapshot that keeps following writes made after its creation.
    pub fn make_rolling_snapshot(&self, region: RegionId) -> StoreResult<Box<dyn RollingSnapshot>> {
        self.disk(region)?.make_rolling_snapshot()
    }

    /// Caller-driven bounded flush of `region`'s buffered writes.
    pub fn trickle(&self, region: RegionId) -> StoreResult<MaintenanceOutcome> {
        self.disk(region)?.flush(self.trickle_budget)
    }

    fn disk(&self, region: RegionId) -> StoreResult<Arc<dyn Disk>> {
        self.table
            .get(region)
            .ok_or(StoreError::MissingDisk(region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{EntityId, TransferId};
    use crate::test_support::{FakeConfiguration, FakeDiskFactory};
    use tempfile::TempDir;

    fn region(mask: u64) -> RegionId {
        RegionId::new(1, 0, 0, mask)
    }

    fn node_with_factory() -> (StorageNode, Arc<FakeDiskFactory>, TempDir) {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(FakeDiskFactory::new());
        let node = StorageNode::new(
            StoreConfig::new(dir.path()),
            factory.clone() as Arc<dyn DiskFactory>,
        )
        .unwrap();
        (node, factory, dir)
    }

    #[test]
    fn reconciliation_end_to_end() {
        let us = InstanceId::new(1);
        let (mut node, _factory, _dir) = node_with_factory();

        let both = FakeConfiguration::new()
            .with_region(region(1), 2)
            .with_region(region(2), 2)
            .assign(EntityId::new(region(1), 0), us)
            .transfer(TransferId(1), us, region(2));
        node.prepare(&both, us);
        node.reconfigure(&both, us);
        node.cleanup(&both, us);
        assert_eq!(node.table().len(), 2);

        // Next transition: the transfer completed elsewhere, region 2 leaves.
        let only_first = FakeConfiguration::new()
            .with_region(region(1), 2)
            .assign(EntityId::new(region(1), 0), us);
        node.prepare(&only_first, us);
        node.reconfigure(&only_first, us);
        node.cleanup(&only_first, us);

        let snap = node.table().snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap.contains_key(&region(1)));

        let err = node.get(region(2), b"k").unwrap_err();
        assert!(err.is_missing_disk());

        node.shutdown();
    }

    #[test]
    fn foreground_requests_forward_to_the_resident_disk() {
        let us = InstanceId::new(1);
        let (mut node, _factory, _dir) = node_with_factory();
        let config = FakeConfiguration::new()
            .with_region(region(1), 2)
            .assign(EntityId::new(region(1), 0), us);
        node.prepare(&config, us);

        node.put(region(1), b"k", vec![b"a".to_vec(), b"b".to_vec()], 7)
            .unwrap();
        let (value, version) = node.get(region(1), b"k").unwrap();
        assert_eq!(value, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(version, 7);

        node.del(region(1), b"k").unwrap();
        assert!(matches!(
            node.get(region(1), b"k"),
            Err(StoreError::KeyNotFound)
        ));

        node.shutdown();
    }

    #[test]
    fn region_addressed_calls_report_missing_disks() {
        let (mut node, _factory, _dir) = node_with_factory();
        let missing = region(9);

        assert!(node.get(missing, b"k").unwrap_err().is_missing_disk());
        assert!(node
            .put(missing, b"k", vec![], 0)
            .unwrap_err()
            .is_missing_disk());
        assert!(node.del(missing, b"k").unwrap_err().is_missing_disk());
        assert!(node.make_snapshot(missing).unwrap_err().is_missing_disk());
        assert!(node
            .make_rolling_snapshot(missing)
            .unwrap_err()
            .is_missing_disk());
        assert!(node.trickle(missing).unwrap_err().is_missing_disk());

        node.shutdown();
    }

    #[test]
    fn snapshots_and_trickle_reach_the_disk() {
        let us = InstanceId::new(1);
        let (mut node, factory, _dir) = node_with_factory();
        let config = FakeConfiguration::new()
            .with_region(region(1), 2)
            .assign(EntityId::new(region(1), 0), us);
        node.prepare(&config, us);

        node.put(region(1), b"a", vec![b"1".to_vec()], 1).unwrap();
        node.put(region(1), b"b", vec![b"2".to_vec()], 2).unwrap();

        let mut snapshot = node.make_snapshot(region(1)).unwrap();
        let mut seen = Vec::new();
        while snapshot.valid() {
            seen.push((snapshot.key().to_vec(), snapshot.version()));
            snapshot.advance();
        }
        assert_eq!(seen, vec![(b"a".to_vec(), 1), (b"b".to_vec(), 2)]);

        assert_eq!(
            node.trickle(region(1)).unwrap(),
            MaintenanceOutcome::DidNothing
        );
        let disk = factory.created_disks().pop().unwrap();
        assert!(disk.flush_calls() >= 1);

        node.shutdown();
    }

    #[test]
    fn dropping_an_unshutdown_node_joins_the_scheduler() {
        let (node, _factory, _dir) = node_with_factory();
        drop(node);
    }
}
