//! The seam to the external storage-engine primitive.
//!
//! The storage-management layer never implements a disk itself: it creates,
//! addresses, and retires per-region storage instances through the traits in
//! this module. Identifiers (`RegionId`, `EntityId`, `InstanceId`) mirror the
//! cluster configuration's vocabulary and are the keys everything else in the
//! crate is organized around.

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MaintenanceOutcome, StoreResult};

/// Space number reserved for entities that are not assigned to any region.
///
/// Entities in this space never cause a disk to be created.
pub const UNASSIGNED_SPACE: u32 = u32::MAX - 1;

/// Identifier of one partition of the key space.
///
/// Totally ordered (field order: space, subspace, prefix, mask) so that the
/// entity mapping can be range-scanned per region.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RegionId {
    pub space: u32,
    pub subspace: u16,
    pub prefix: u8,
    pub mask: u64,
}

impl RegionId {
    pub fn new(space: u32, subspace: u16, prefix: u8, mask: u64) -> Self {
        Self {
            space,
            subspace,
            prefix,
            mask,
        }
    }

    /// True when the region sits in the reserved unassigned space.
    pub fn is_unassigned(&self) -> bool {
        self.space == UNASSIGNED_SPACE
    }

    /// The subspace this region partitions.
    pub fn subspace_id(&self) -> SubspaceId {
        SubspaceId {
            space: self.space,
            subspace: self.subspace,
        }
    }

    /// Deterministic location of this region's on-disk state beneath `base`.
    ///
    /// The mask renders as fixed-width hex so paths sort the same way the
    /// identifiers do.
    pub fn storage_path(&self, base: &Path) -> PathBuf {
        base.join(format!("region-{self}"))
    }
}

impl Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{:016x}",
            self.space, self.subspace, self.prefix, self.mask
        )
    }
}

/// One subspace of a space; the granularity at which placement functions are
/// assigned by the configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SubspaceId {
    pub space: u32,
    pub subspace: u16,
}

/// A (region, role) tuple mapping one class of requests onto an owning
/// instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityId {
    pub region: RegionId,
    pub number: u8,
}

impl EntityId {
    pub fn new(region: RegionId, number: u8) -> Self {
        Self { region, number }
    }

    /// First entity of `region`'s full role range.
    pub fn lowest(region: RegionId) -> Self {
        Self { region, number: 0 }
    }

    /// Last entity of `region`'s full role range.
    pub fn highest(region: RegionId) -> Self {
        Self {
            region,
            number: u8::MAX,
        }
    }
}

/// Identity of one node in the cluster, compared for equality against the
/// configuration's entity and transfer mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Identifier of one in-flight region transfer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TransferId(pub u16);

/// Key-placement predicate narrowing a snapshot to part of the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotFilter {
    /// Every key on the disk.
    #[default]
    Everything,
    /// Keys whose placement matches `value` on the bits selected by `mask`.
    Placement { mask: u64, value: u64 },
}

/// Placement function assigned per subspace by the configuration; decides
/// where a key lands inside a disk's structures.
pub trait PlacementHasher: Send + Sync {
    fn placement(&self, key: &[u8]) -> u64;
}

/// Point-in-time iterator over a disk's contents.
pub trait DiskSnapshot: Send + std::fmt::Debug {
    fn valid(&self) -> bool;
    fn advance(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[Vec<u8>];
    fn version(&self) -> u64;
}

/// Snapshot that additionally follows writes made after its creation, in
/// order, until the caller stops advancing it.
pub trait RollingSnapshot: Send + std::fmt::Debug {
    fn valid(&self) -> bool;
    fn advance(&mut self);
}

/// One per-region storage instance.
///
/// Handles are shared (`Arc`): a reference taken before the region is dropped
/// from the table remains valid until its holder releases it, and the
/// instance is destroyed exactly once when the last reference goes away.
pub trait Disk: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<(Vec<Vec<u8>>, u64)>;
    fn put(&self, key: &[u8], value: Vec<Vec<u8>>, version: u64) -> StoreResult<()>;
    fn del(&self, key: &[u8]) -> StoreResult<()>;

    fn make_snapshot(&self, filter: SnapshotFilter) -> StoreResult<Box<dyn DiskSnapshot>>;
    fn make_rolling_snapshot(&self) -> StoreResult<Box<dyn RollingSnapshot>>;

    /// Reserve on-disk space and structures ahead of need.
    fn preallocate(&self) -> StoreResult<MaintenanceOutcome>;
    /// Speculative background IO performed while the disk is otherwise idle.
    fn optimistic_io(&self) -> StoreResult<MaintenanceOutcome>;
    /// IO that must happen before buffered writes can drain again.
    fn mandatory_io(&self) -> StoreResult<MaintenanceOutcome>;
    /// Drain up to `budget` buffered writes to the disk's structures.
    fn flush(&self, budget: usize) -> StoreResult<MaintenanceOutcome>;

    /// Release the instance's on-disk resources. The in-memory handle stays
    /// usable for holders that raced the drop; only the backing state goes.
    fn drop_storage(&self) -> StoreResult<()>;
}

/// Factory for disk instances; the storage engine's constructor seam.
pub trait DiskFactory: Send + Sync {
    fn create(
        &self,
        path: &Path,
        hasher: Arc<dyn PlacementHasher>,
        column_count: u16,
    ) -> StoreResult<Arc<dyn Disk>>;
}
