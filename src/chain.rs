//! Copy-on-write index over an append-only log's segments.
//!
//! A [`SegmentChain`] is immutable once published: `add` builds a new chain
//! value sharing every prior segment reference, and [`ChainHandle`] swaps the
//! log's current-version pointer atomically. Readers capture a chain once and
//! then traverse it lock-free; the captured version stays frozen and correct
//! no matter how many appends or retirements happen after the capture,
//! because segments are retained by reference count for as long as any holder
//! exists. Old versions cost transient memory only: writers retire their
//! reference on publish and readers are short-lived.

use std::io;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// One physical unit of the append-only log, provided by the log primitive.
pub trait LogSegment: Send + Sync {
    /// Force the segment's contents durable. Returns whether anything was
    /// actually written.
    fn sync(&self) -> io::Result<bool>;
}

/// Ordered, immutable sequence of `(lower_bound, segment)` pairs.
///
/// Lower bounds strictly increase by index; index 0 is the oldest live
/// segment. Indexed accessors panic out of range: callers are expected to
/// resolve an index through [`SegmentChain::locate`] first, so an out-of-range
/// index is a programming error, not a runtime condition.
pub struct SegmentChain {
    entries: Vec<(u64, Arc<dyn LogSegment>)>,
}

impl SegmentChain {
    /// An empty chain.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a new chain holding every existing entry plus `(lower_bound,
    /// segment)` at the tail. The receiver is unmodified and remains valid
    /// for existing holders; unchanged segment references are shared, not
    /// copied.
    ///
    /// # Panics
    ///
    /// Panics if `lower_bound` does not exceed the current tail's bound.
    pub fn add(&self, lower_bound: u64, segment: Arc<dyn LogSegment>) -> Arc<SegmentChain> {
        if let Some((tail, _)) = self.entries.last() {
            assert!(
                lower_bound > *tail,
                "segment lower bound {lower_bound} must exceed tail bound {tail}"
            );
        }
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend(self.entries.iter().cloned());
        entries.push((lower_bound, segment));
        Arc::new(SegmentChain { entries })
    }

    /// Starting log offset of the segment at `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`.
    pub fn get_lower_bound(&self, i: usize) -> u64 {
        self.entries[i].0
    }

    /// Segment handle at `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`.
    pub fn get_segment(&self, i: usize) -> &Arc<dyn LogSegment> {
        &self.entries[i].1
    }

    /// Index of the segment whose range covers `offset`, or `None` when the
    /// offset precedes the oldest live segment (or the chain is empty).
    pub fn locate(&self, offset: u64) -> Option<usize> {
        let idx = self.entries.partition_point(|(lb, _)| *lb <= offset);
        idx.checked_sub(1)
    }

    /// Force durability of the segment at `i`. By convention every segment at
    /// an index below `i` is already at least as durable, so syncing the tail
    /// makes the whole chain durable. Returns whether anything was written.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`.
    pub fn sync(&self, i: usize) -> io::Result<bool> {
        self.entries[i].1.sync()
    }
}

/// The log's current-chain pointer.
///
/// Publication is a single atomic pointer swap: a reader loading the handle
/// sees either the whole old chain or the whole new one, never a partial
/// update. There is no in-place edit; the writer publishes a new version and
/// the old one is retired once its last holder releases it.
pub struct ChainHandle {
    current: ArcSwap<SegmentChain>,
}

impl ChainHandle {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from(SegmentChain::new()),
        }
    }

    /// Capture the current version. The returned chain is frozen: later
    /// appends publish new versions without disturbing it.
    pub fn current(&self) -> Arc<SegmentChain> {
        self.current.load_full()
    }

    /// Publish `chain` as the current version.
    pub fn publish(&self, chain: Arc<SegmentChain>) {
        self.current.store(chain);
    }

    /// Roll the log onto a new tail segment: build the successor version and
    /// publish it. Intended for the single log writer; concurrent appenders
    /// must serialize externally.
    pub fn append(&self, lower_bound: u64, segment: Arc<dyn LogSegment>) -> Arc<SegmentChain> {
        let next = self.current.load().add(lower_bound, segment);
        self.current.store(Arc::clone(&next));
        next
    }
}

impl Default for ChainHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSegment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain_of(bounds: &[u64]) -> Arc<SegmentChain> {
        let mut chain = SegmentChain::new();
        for &b in bounds {
            chain = chain.add(b, FakeSegment::named(b));
        }
        chain
    }

    #[test]
    fn bounds_strictly_increase_across_repeated_adds() {
        let chain = chain_of(&[0, 10, 25, 300]);
        assert_eq!(chain.len(), 4);
        for i in 0..chain.len() - 1 {
            assert!(chain.get_lower_bound(i) < chain.get_lower_bound(i + 1));
        }
    }

    #[test]
    #[should_panic(expected = "must exceed tail bound")]
    fn non_monotonic_add_is_rejected() {
        let chain = chain_of(&[0, 10]);
        let _ = chain.add(10, FakeSegment::named(10));
    }

    #[test]
    fn adding_leaves_the_prior_version_untouched() {
        let c1 = chain_of(&[0, 100]);
        let seen: Vec<(u64, *const dyn LogSegment)> = (0..c1.len())
            .map(|i| (c1.get_lower_bound(i), Arc::as_ptr(c1.get_segment(i))))
            .collect();

        let c2 = c1.add(200, FakeSegment::named(200));
        assert_eq!(c2.len(), 3);
        assert_eq!(c1.len(), 2);
        for (i, (bound, ptr)) in seen.iter().enumerate() {
            assert_eq!(c1.get_lower_bound(i), *bound);
            assert_eq!(Arc::as_ptr(c1.get_segment(i)), *ptr);
            // Shared, not duplicated.
            assert_eq!(Arc::as_ptr(c2.get_segment(i)), *ptr);
        }

        drop(c2);
        assert_eq!(c1.len(), 2);
        assert_eq!(c1.get_lower_bound(1), 100);
    }

    #[test]
    fn segments_survive_while_any_chain_reference_remains() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = ChainHandle::new();
        handle.append(0, FakeSegment::counting(Arc::clone(&drops)));
        handle.append(50, FakeSegment::counting(Arc::clone(&drops)));

        let reader = handle.current();
        // Writer moves on: the retained version is no longer current.
        handle.publish(SegmentChain::new());
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.get_lower_bound(1), 50);

        drop(reader);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn locate_resolves_offsets_to_covering_segments() {
        let chain = chain_of(&[10, 20, 40]);
        assert_eq!(chain.locate(0), None);
        assert_eq!(chain.locate(10), Some(0));
        assert_eq!(chain.locate(19), Some(0));
        assert_eq!(chain.locate(20), Some(1));
        assert_eq!(chain.locate(39), Some(1));
        assert_eq!(chain.locate(40), Some(2));
        assert_eq!(chain.locate(u64::MAX), Some(2));
        assert_eq!(SegmentChain::new().locate(0), None);
    }

    #[test]
    fn sync_reports_whether_anything_changed() {
        let seg = FakeSegment::named(0);
        let chain = SegmentChain::new().add(0, seg.clone());
        seg.mark_dirty();
        assert!(chain.sync(0).unwrap());
        // Already durable.
        assert!(!chain.sync(0).unwrap());
    }

    #[test]
    fn handle_swaps_whole_versions() {
        let handle = ChainHandle::new();
        assert!(handle.current().is_empty());
        let c1 = handle.append(0, FakeSegment::named(0));
        let c2 = handle.append(5, FakeSegment::named(5));
        assert_eq!(c1.len(), 1);
        assert_eq!(handle.current().len(), 2);
        assert!(Arc::ptr_eq(&handle.current(), &c2));
    }

    #[test]
    #[should_panic]
    fn out_of_range_index_fails_fast() {
        let chain = chain_of(&[0]);
        let _ = chain.get_lower_bound(1);
    }
}
