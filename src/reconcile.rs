//! Reconciliation of the resident disk set against cluster configuration.
//!
//! Each configuration transition delivers `prepare`, then `reconfigure`, then
//! `cleanup`, in that order, on the delivering thread. `prepare` runs before
//! `cleanup` so a hand-off target gains its disk before cleanup can consider
//! the old holder's disk unreferenced. Both operations are idempotent:
//! repeated delivery of the same snapshot creates and drops at most once per
//! region.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::disk::{
    DiskFactory, EntityId, InstanceId, PlacementHasher, RegionId, SubspaceId, TransferId,
};
use crate::error::StoreResult;
use crate::table::RegionDiskTable;

/// Read-only view of one cluster-wide configuration snapshot.
pub trait Configuration {
    /// Every region in the configuration, with its column count.
    fn regions(&self) -> BTreeMap<RegionId, u16>;
    /// Ordered mapping from entity to the instance that owns it.
    fn entity_mapping(&self) -> &BTreeMap<EntityId, InstanceId>;
    /// In-flight transfers destined for `instance`.
    fn transfers_to(&self, instance: InstanceId) -> BTreeMap<TransferId, RegionId>;
    /// Placement function for disks in `subspace`.
    fn disk_hasher(&self, subspace: SubspaceId) -> Arc<dyn PlacementHasher>;
}

/// Turns a configuration snapshot into create/drop operations against the
/// [`RegionDiskTable`].
pub struct ReconciliationEngine {
    table: Arc<RegionDiskTable>,
    factory: Arc<dyn DiskFactory>,
    base_dir: PathBuf,
}

impl ReconciliationEngine {
    pub fn new(
        table: Arc<RegionDiskTable>,
        factory: Arc<dyn DiskFactory>,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            table,
            factory,
            base_dir,
        }
    }

    /// Create disks for every region this instance owns or is receiving a
    /// transfer for, skipping regions that already have one.
    ///
    /// A region named by the entity or transfer mapping but absent from the
    /// region-size table is a configuration inconsistency: logged as an error
    /// and skipped, never fatal.
    pub fn prepare(&self, config: &dyn Configuration, us: InstanceId) {
        let sizes = config.regions();

        let mut needed = BTreeSet::new();
        for (entity, owner) in config.entity_mapping() {
            if !entity.region.is_unassigned() && *owner == us {
                needed.insert(entity.region);
            }
        }
        for region in config.transfers_to(us).into_values() {
            needed.insert(region);
        }

        for region in needed {
            if self.table.contains(region) {
                continue;
            }
            let Some(&columns) = sizes.get(&region) else {
                error!(%region, "configuration names an owned region with no size entry");
                continue;
            };
            if let Err(err) = self.create_disk(config, region, columns) {
                error!(%region, error = %err, "failed to create disk");
            }
        }
    }

    /// Hook between `prepare` and `cleanup` for migration bookkeeping.
    /// Currently nothing to do.
    pub fn reconfigure(&self, _config: &dyn Configuration, _us: InstanceId) {}

    /// Drop every resident disk whose region this instance neither owns an
    /// entity in nor is receiving a transfer for.
    ///
    /// Ownership is tested across the region's full entity range, whichever
    /// role the entity plays.
    pub fn cleanup(&self, config: &dyn Configuration, us: InstanceId) {
        let resident = self.table.snapshot();
        let transfers = config.transfers_to(us);
        let mapping = config.entity_mapping();

        for region in resident.into_keys() {
            let owned = mapping
                .range(EntityId::lowest(region)..=EntityId::highest(region))
                .any(|(_, owner)| *owner == us);
            let inbound = transfers.values().any(|r| *r == region);

            if !owned && !inbound {
                self.drop_disk(region);
            }
        }
    }

    fn create_disk(
        &self,
        config: &dyn Configuration,
        region: RegionId,
        columns: u16,
    ) -> StoreResult<()> {
        info!(%region, columns, "creating disk");
        let hasher = config.disk_hasher(region.subspace_id());
        let path = region.storage_path(&self.base_dir);
        // Disk creation blocks on physical IO; the table lock is only taken
        // for the insert itself.
        let disk = self.factory.create(&path, hasher, columns)?;
        self.table.insert(region, disk);
        Ok(())
    }

    fn drop_disk(&self, region: RegionId) {
        let Some(disk) = self.table.remove(region) else {
            return;
        };
        info!(%region, "dropping disk");
        // On-disk release happens outside the table lock; holders that raced
        // the removal keep the handle alive until they finish.
        if let Err(err) = disk.drop_storage() {
            error!(%region, error = %err, "failed to release dropped disk's storage");
        }
    }
}
