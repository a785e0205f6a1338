use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default spacing between preallocation passes.
///
/// Preallocation is deliberately slow-drip work; one attempt per second keeps
/// disks ahead of demand without amplifying background IO.
const DEFAULT_PREALLOCATION_INTERVAL: Duration = Duration::from_secs(1);

/// Default spacing between optimistic-IO passes.
const DEFAULT_OPTIMISTIC_IO_INTERVAL: Duration = Duration::from_secs(1);

/// Default sleep when a full maintenance cycle made no progress.
///
/// Also bounds shutdown latency: the scheduler re-checks its shutdown signal
/// at least this often.
const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Default per-disk budget for the scheduler's flush pass.
const DEFAULT_FLUSH_BUDGET: usize = 10_000;

/// Default budget for a caller-driven `trickle` flush.
const DEFAULT_TRICKLE_BUDGET: usize = 1_000;

/// Tunables for the background maintenance scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum time between preallocation passes.
    pub preallocation_interval: Duration,
    /// Minimum time between optimistic-IO passes. Tracked independently of
    /// preallocation.
    pub optimistic_io_interval: Duration,
    /// How long to sleep after an idle cycle.
    pub idle_sleep: Duration,
    /// Budget handed to each disk's flush during the per-cycle flush pass.
    /// The flush pass itself is never throttled; buffered writes must drain
    /// promptly to bound memory use and crash exposure.
    pub flush_budget: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            preallocation_interval: DEFAULT_PREALLOCATION_INTERVAL,
            optimistic_io_interval: DEFAULT_OPTIMISTIC_IO_INTERVAL,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            flush_budget: DEFAULT_FLUSH_BUDGET,
        }
    }
}

/// Top-level options for constructing a [`StorageNode`](crate::node::StorageNode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory beneath which every region's state lives.
    pub base_dir: PathBuf,
    /// Background maintenance tunables.
    pub scheduler: SchedulerConfig,
    /// Budget for caller-driven `trickle` flushes.
    pub trickle_budget: usize,
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            scheduler: SchedulerConfig::default(),
            trickle_budget: DEFAULT_TRICKLE_BUDGET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_cadence() {
        let cfg = StoreConfig::new("/tmp/shardstore");
        assert_eq!(cfg.scheduler.preallocation_interval, Duration::from_secs(1));
        assert_eq!(cfg.scheduler.optimistic_io_interval, Duration::from_secs(1));
        assert_eq!(cfg.scheduler.idle_sleep, Duration::from_millis(100));
        assert_eq!(cfg.scheduler.flush_budget, 10_000);
        assert_eq!(cfg.trickle_budget, 1_000);
    }
}
