//! Concurrent region-to-disk mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::disk::{Disk, RegionId};

/// Read-mostly map from [`RegionId`] to its resident disk handle, and the
/// authoritative owner of disk lifecycle.
///
/// Reads take the shared lock; create/drop mutate under the exclusive lock,
/// held only for the map update itself. Removal never destroys a handle out
/// from under other holders: handles are `Arc`-shared and destruction is
/// reference-count-driven.
pub struct RegionDiskTable {
    disks: RwLock<BTreeMap<RegionId, Arc<dyn Disk>>>,
}

impl RegionDiskTable {
    pub fn new() -> Self {
        Self {
            disks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Look up the disk resident for `region`, if any.
    pub fn get(&self, region: RegionId) -> Option<Arc<dyn Disk>> {
        self.disks.read().get(&region).cloned()
    }

    pub fn contains(&self, region: RegionId) -> bool {
        self.disks.read().contains_key(&region)
    }

    /// Install `disk` for `region`, returning the handle it displaced.
    pub fn insert(&self, region: RegionId, disk: Arc<dyn Disk>) -> Option<Arc<dyn Disk>> {
        self.disks.write().insert(region, disk)
    }

    /// Remove `region`'s handle from the table. The handle itself stays alive
    /// until every holder releases it.
    pub fn remove(&self, region: RegionId) -> Option<Arc<dyn Disk>> {
        self.disks.write().remove(&region)
    }

    /// Consistent shallow copy of the mapping: handles are shared, not
    /// duplicated. Callers iterate the copy without holding the table's lock
    /// across slow disk operations.
    pub fn snapshot(&self) -> BTreeMap<RegionId, Arc<dyn Disk>> {
        self.disks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.disks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.read().is_empty()
    }
}

impl Default for RegionDiskTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeDisk;

    fn region(mask: u64) -> RegionId {
        RegionId::new(1, 0, 0, mask)
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let table = RegionDiskTable::new();
        assert!(table.get(region(1)).is_none());

        let disk: Arc<dyn Disk> = FakeDisk::new();
        assert!(table.insert(region(1), disk.clone()).is_none());
        assert!(table.contains(region(1)));
        assert_eq!(table.len(), 1);

        let fetched = table.get(region(1)).unwrap();
        assert!(Arc::ptr_eq(&fetched, &disk));

        assert!(table.remove(region(1)).is_some());
        assert!(table.remove(region(1)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let table = RegionDiskTable::new();
        table.insert(region(1), FakeDisk::new());
        table.insert(region(2), FakeDisk::new());

        let snap = table.snapshot();
        table.remove(region(1));
        table.insert(region(3), FakeDisk::new());

        assert_eq!(snap.len(), 2);
        assert!(snap.contains_key(&region(1)));
        assert!(!snap.contains_key(&region(3)));
    }

    #[test]
    fn removed_handle_survives_for_existing_holders() {
        let table = RegionDiskTable::new();
        table.insert(region(1), FakeDisk::new());

        let held = table.get(region(1)).unwrap();
        table.remove(region(1));
        // The holder's reference is still usable.
        assert!(held.flush(10).is_ok());
    }
}
