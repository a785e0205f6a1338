//! Storage management for a distributed key-value node.
//!
//! The crate owns the mapping from logical partitions ("regions") to physical
//! on-disk storage instances, reconciles that mapping against cluster-wide
//! configuration snapshots as membership and partitioning change, and runs a
//! background scheduler that keeps every disk's structures healthy without
//! blocking foreground reads and writes. It also provides the append-only
//! log's segment chain: an immutable, reference-counted, copy-on-write index
//! over log segments that lets a writer roll to a new segment while readers
//! retain consistent lock-free access to the chain as it existed when they
//! captured it.
//!
//! # Architecture
//!
//! - [`table::RegionDiskTable`]: concurrent, read-mostly region-to-disk map
//!   and authoritative owner of disk lifecycle.
//! - [`reconcile::ReconciliationEngine`]: turns a configuration snapshot into
//!   create/drop operations against the table (`prepare`, then `reconfigure`,
//!   then `cleanup`, idempotently).
//! - [`maintenance::MaintenanceScheduler`]: one background thread fairly
//!   rotating preallocation and optimistic IO across disks, rate-limited and
//!   failure-tolerant, with an unthrottled flush pass every cycle.
//! - [`chain::SegmentChain`] / [`chain::ChainHandle`]: the copy-on-write
//!   segment index and its atomically swapped current-version pointer.
//! - [`node::StorageNode`]: the externally visible facade, forwarding
//!   region-addressed requests through the table to the resident disk.
//!
//! The storage engine primitive itself, the cluster coordinator, and the
//! request-dispatch layer are external collaborators, consumed through the
//! traits in [`disk`] and [`reconcile`].

pub mod chain;
pub mod config;
pub mod disk;
pub mod error;
pub mod maintenance;
pub mod node;
pub mod reconcile;
pub mod table;
pub mod test_support;

pub use chain::{ChainHandle, LogSegment, SegmentChain};
pub use config::{SchedulerConfig, StoreConfig};
pub use disk::{
    Disk, DiskFactory, DiskSnapshot, EntityId, InstanceId, PlacementHasher, RegionId,
    RollingSnapshot, SnapshotFilter, SubspaceId, TransferId, UNASSIGNED_SPACE,
};
pub use error::{MaintenanceOutcome, StoreError, StoreResult};
pub use maintenance::{Clock, MaintenanceScheduler, SystemClock};
pub use node::StorageNode;
pub use reconcile::{Configuration, ReconciliationEngine};
pub use table::RegionDiskTable;
