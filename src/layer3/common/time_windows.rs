// Time Window Container - rolling (timestamp, item) buffer
// Age-based pruning plus a hard capacity so a burst cannot grow it unbounded

use std::collections::VecDeque;

pub struct TimeWindow<T> {
    duration_ms: i64,
    max_capacity: usize,
    data: VecDeque<(i64, T)>,
}

impl<T> TimeWindow<T> {
    pub fn new(duration_ms: i64, max_capacity: usize) -> Self {
        Self {
            duration_ms,
            max_capacity,
            data: VecDeque::with_capacity(max_capacity.min(1024)),
        }
    }

    /// Insert keeping timestamp order; drops the oldest item when full
    pub fn add(&mut self, timestamp: i64, item: T) {
        if self.data.len() >= self.max_capacity {
            self.data.pop_front();
        }

        let pos = self.data.partition_point(|(ts, _)| *ts <= timestamp);
        self.data.insert(pos, (timestamp, item));
    }

    /// Remove items older than duration_ms before current_time
    pub fn prune(&mut self, current_time: i64) {
        let cutoff = current_time - self.duration_ms;

        while let Some((ts, _)) = self.data.front() {
            if *ts < cutoff {
                self.data.pop_front();
            } else {
                break;
            }
        }
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &(i64, T)> + Clone + '_ {
        self.data.iter()
    }

    /// Number of items currently held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Age limit used by `prune`
    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Oldest item
    pub fn first(&self) -> Option<&(i64, T)> {
        self.data.front()
    }

    /// Newest item
    pub fn last(&self) -> Option<&(i64, T)> {
        self.data.back()
    }
}
