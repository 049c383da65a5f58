//! Per-partition tracking of which offsets may be committed.
//!
//! Committing an offset acknowledges everything before it on the partition,
//! but workers finish messages out of order. The tracker releases an offset
//! only once every earlier fetched offset on its partition has been stored.
//! A failed offset is never released, so nothing after it is acknowledged
//! and the feed redelivers from it on the next start.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Running,
    Stored,
    Failed,
}

#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, BTreeMap<i64, Progress>>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fetched offset. Must happen before it can finish.
    pub fn start(&mut self, partition: i32, offset: i64) {
        self.partitions
            .entry(partition)
            .or_default()
            .insert(offset, Progress::Running);
    }

    /// Mark an offset stored. Returns the highest offset that may now be
    /// committed on the partition, if that moved.
    pub fn stored(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let offsets = self.partitions.get_mut(&partition)?;
        if let Some(progress) = offsets.get_mut(&offset) {
            *progress = Progress::Stored;
        }

        let mut released = None;
        while let Some(entry) = offsets.first_entry() {
            if *entry.get() != Progress::Stored {
                break;
            }
            released = Some(entry.remove_entry().0);
        }
        released
    }

    /// Mark an offset failed. It holds back every later offset.
    pub fn failed(&mut self, partition: i32, offset: i64) {
        if let Some(progress) = self
            .partitions
            .get_mut(&partition)
            .and_then(|offsets| offsets.get_mut(&offset))
        {
            *progress = Progress::Failed;
        }
    }

    /// Offsets fetched but not yet released, across all partitions.
    pub fn held(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_in_order() {
        let mut tracker = OffsetTracker::new();
        for offset in 0..3 {
            tracker.start(0, offset);
        }

        assert_eq!(tracker.stored(0, 0), Some(0));
        assert_eq!(tracker.stored(0, 1), Some(1));
        assert_eq!(tracker.stored(0, 2), Some(2));
        assert_eq!(tracker.held(), 0);
    }

    #[test]
    fn slow_lower_offset_holds_back_later_ones() {
        let mut tracker = OffsetTracker::new();
        for offset in 10..13 {
            tracker.start(0, offset);
        }

        assert_eq!(tracker.stored(0, 12), None);
        assert_eq!(tracker.stored(0, 11), None);
        assert_eq!(tracker.held(), 3);
        assert_eq!(tracker.stored(0, 10), Some(12));
        assert_eq!(tracker.held(), 0);
    }

    #[test]
    fn failed_offset_is_never_released() {
        let mut tracker = OffsetTracker::new();
        for offset in 0..3 {
            tracker.start(0, offset);
        }

        assert_eq!(tracker.stored(0, 0), Some(0));
        tracker.failed(0, 1);
        assert_eq!(tracker.stored(0, 2), None);
        assert_eq!(tracker.held(), 2);
    }

    #[test]
    fn partitions_are_independent() {
        let mut tracker = OffsetTracker::new();
        tracker.start(0, 5);
        tracker.start(1, 5);
        tracker.start(1, 6);

        tracker.failed(0, 5);
        assert_eq!(tracker.stored(1, 6), None);
        assert_eq!(tracker.stored(1, 5), Some(6));
        assert_eq!(tracker.stored(3, 1), None);
    }
}
