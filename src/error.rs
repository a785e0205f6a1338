use std::fmt::{Display, Formatter};
use std::io;

use crate::disk::RegionId;

/// Outcome vocabulary shared by the disk maintenance operations
/// (`preallocate`, `optimistic_io`, `mandatory_io`, `flush`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceOutcome {
    /// The operation did useful work.
    Progress,
    /// Nothing needed doing.
    DidNothing,
    /// The data region of the write buffer is full; mandatory IO is required
    /// before more writes can drain.
    DataFull,
    /// The search structures of the write buffer are full; mandatory IO is
    /// required before more writes can drain.
    SearchFull,
}

impl MaintenanceOutcome {
    /// True for either of the buffer-full sub-kinds.
    pub fn is_buffer_full(self) -> bool {
        matches!(self, Self::DataFull | Self::SearchFull)
    }
}

impl Display for MaintenanceOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MaintenanceOutcome::Progress => write!(f, "progress"),
            MaintenanceOutcome::DidNothing => write!(f, "did-nothing"),
            MaintenanceOutcome::DataFull => write!(f, "data-full"),
            MaintenanceOutcome::SearchFull => write!(f, "search-full"),
        }
    }
}

/// A specialized error type for storage-management operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// No disk is resident for the addressed region. An ordinary negative
    /// result for requests that raced a reconfiguration, not a fault.
    #[error("no disk resident for region {0}")]
    MissingDisk(RegionId),
    /// The key does not exist on the addressed disk.
    #[error("key not found")]
    KeyNotFound,
    /// Configuration value was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The storage engine reported a failure it could not classify further.
    #[error("disk error: {0}")]
    Disk(String),
}

impl StoreError {
    /// True when the error is the routine missing-disk negative result.
    pub fn is_missing_disk(&self) -> bool {
        matches!(self, StoreError::MissingDisk(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::RegionId;

    #[test]
    fn buffer_full_covers_both_sub_kinds() {
        assert!(MaintenanceOutcome::DataFull.is_buffer_full());
        assert!(MaintenanceOutcome::SearchFull.is_buffer_full());
        assert!(!MaintenanceOutcome::Progress.is_buffer_full());
        assert!(!MaintenanceOutcome::DidNothing.is_buffer_full());
    }

    #[test]
    fn missing_disk_formats_the_region() {
        let region = RegionId::new(7, 1, 2, 0xff00);
        let err = StoreError::MissingDisk(region);
        assert!(err.is_missing_disk());
        assert!(err.to_string().contains("7-1-2-000000000000ff00"));
    }
}
