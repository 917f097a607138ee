// Window Store - one quote-pressure accumulator per (strike, type) key
// EMPTY -> ACCUMULATING -> (bucket rollover | forced flush | eviction) -> EMITTED/EMPTY
//
// Each key also remembers the last bucket it emitted so a late snapshot can
// never reopen a closed window. Tracked keys are capped; the least recently
// touched key is evicted when a new key arrives at capacity. An evicted key's
// watermark is retired rather than lost, and retired watermarks that overflow
// the cap fold into a store-wide floor.

use std::collections::HashMap;
use tracing::debug;

use crate::core::types::{OptionType, QuoteSnapshot, SkipReason, StrikeKey};

/// Running synthetic volume for one open window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAccumulator {
    pub bucket: i64,
    pub window_start: i64,
    pub symbol: String,
    pub strike: f64,
    pub option_type: OptionType,
    pub last_bid_size: u64,
    pub last_ask_size: u64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub update_count: u32,
    pub active_updates: u32,     // updates that moved at least one side up
    pub peak_bid_size: u64,
    pub last_pressure_ratio: f64,
}

impl WindowAccumulator {
    /// Open a window on its first snapshot. The seed contributes no volume.
    pub fn seed(snapshot: &QuoteSnapshot, bucket: i64, window_ms: i64) -> Self {
        Self {
            bucket,
            window_start: bucket * window_ms,
            symbol: snapshot.symbol.clone(),
            strike: snapshot.strike,
            option_type: snapshot.option_type,
            last_bid_size: snapshot.bid_size,
            last_ask_size: snapshot.ask_size,
            bid_volume: 0.0,
            ask_volume: 0.0,
            update_count: 1,
            active_updates: 0,
            peak_bid_size: snapshot.bid_size,
            last_pressure_ratio: snapshot.pressure_ratio(),
        }
    }

    /// Size increases become synthetic volume; decreases are clamped to zero
    pub fn accumulate(&mut self, snapshot: &QuoteSnapshot, volume_multiplier: f64) {
        let delta_bid = snapshot.bid_size.saturating_sub(self.last_bid_size) as f64 * volume_multiplier;
        let delta_ask = snapshot.ask_size.saturating_sub(self.last_ask_size) as f64 * volume_multiplier;

        self.bid_volume += delta_bid;
        self.ask_volume += delta_ask;
        self.update_count += 1;
        if delta_bid > 0.0 || delta_ask > 0.0 {
            self.active_updates += 1;
        }

        self.last_bid_size = snapshot.bid_size;
        self.last_ask_size = snapshot.ask_size;
        self.peak_bid_size = self.peak_bid_size.max(snapshot.bid_size);
        self.last_pressure_ratio = snapshot.pressure_ratio();

        if snapshot.symbol != self.symbol && !snapshot.symbol.is_empty() {
            self.symbol = snapshot.symbol.clone();
        }
    }
}

#[derive(Debug, Clone, Default)]
struct KeySlot {
    accumulator: Option<WindowAccumulator>,
    last_emitted_bucket: Option<i64>,
    last_touched: u64,
}

impl KeySlot {
    fn take_for_emit(&mut self) -> Option<WindowAccumulator> {
        let acc = self.accumulator.take()?;
        self.last_emitted_bucket = Some(acc.bucket);
        Some(acc)
    }
}

/// What one snapshot did to the store
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Window closed by bucket rollover on this key
    pub closed: Option<WindowAccumulator>,
    /// Open window of a different key pushed out by the capacity bound
    pub evicted: Option<WindowAccumulator>,
}

pub struct WindowStore {
    slots: HashMap<StrikeKey, KeySlot>,
    retired: HashMap<StrikeKey, i64>,   // last emitted bucket of evicted keys
    retired_floor: Option<i64>,         // highest bucket dropped from `retired`
    window_ms: i64,
    max_keys: usize,
    tick: u64,
    evictions: u64,
}

impl WindowStore {
    pub fn new(window_ms: i64, max_keys: usize) -> Self {
        Self {
            slots: HashMap::new(),
            retired: HashMap::new(),
            retired_floor: None,
            window_ms,
            max_keys: max_keys.max(1),
            tick: 0,
            evictions: 0,
        }
    }

    /// Bucket index of a timestamp, flooring toward negative infinity
    pub fn bucket_of(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.window_ms)
    }

    /// Route one snapshot into its key's window
    pub fn apply(&mut self, snapshot: &QuoteSnapshot, volume_multiplier: f64) -> Result<ApplyOutcome, SkipReason> {
        let key = snapshot.key();
        let bucket = self.bucket_of(snapshot.timestamp);
        let mut outcome = ApplyOutcome::default();

        if !self.slots.contains_key(&key) {
            let watermark = self.retired_watermark(&key);
            if let Some(last) = watermark {
                if bucket <= last {
                    return Err(SkipReason::LateSnapshot { bucket, current: last });
                }
            }
            self.retired.remove(&key);
            outcome.evicted = self.make_room();
            self.slots.insert(
                key,
                KeySlot {
                    last_emitted_bucket: watermark,
                    ..KeySlot::default()
                },
            );
        }

        self.tick += 1;
        let tick = self.tick;
        let window_ms = self.window_ms;
        let Some(slot) = self.slots.get_mut(&key) else {
            return Ok(outcome);
        };

        let current = slot.accumulator.as_ref().map(|acc| acc.bucket);
        match current {
            Some(current) if bucket == current => {
                if let Some(acc) = slot.accumulator.as_mut() {
                    acc.accumulate(snapshot, volume_multiplier);
                }
            }
            Some(current) if bucket < current => {
                return Err(SkipReason::LateSnapshot { bucket, current });
            }
            Some(_) => {
                outcome.closed = slot.take_for_emit();
                slot.accumulator = Some(WindowAccumulator::seed(snapshot, bucket, window_ms));
            }
            None => {
                if let Some(last) = slot.last_emitted_bucket {
                    if bucket <= last {
                        return Err(SkipReason::LateSnapshot { bucket, current: last });
                    }
                }
                slot.accumulator = Some(WindowAccumulator::seed(snapshot, bucket, window_ms));
            }
        }

        slot.last_touched = tick;
        Ok(outcome)
    }

    /// Evict the coldest key if at capacity. Keys with no open window go first.
    fn make_room(&mut self) -> Option<WindowAccumulator> {
        if self.slots.len() < self.max_keys {
            return None;
        }

        let victim = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| (slot.accumulator.is_some(), slot.last_touched))
            .map(|(key, _)| *key)?;

        self.evictions += 1;
        let mut slot = self.slots.remove(&victim)?;
        let evicted = slot.take_for_emit();
        if let Some(last) = slot.last_emitted_bucket {
            self.retire(victim, last);
        }
        debug!(key = %victim, had_open_window = evicted.is_some(), "Evicted cold strike key");
        evicted
    }

    /// Remember an evicted key's watermark. Past the cap, the oldest retired
    /// watermark is dropped and raises the floor every untracked key must clear.
    fn retire(&mut self, key: StrikeKey, last_emitted_bucket: i64) {
        self.retired.insert(key, last_emitted_bucket);
        if self.retired.len() <= self.max_keys {
            return;
        }

        let oldest = self
            .retired
            .iter()
            .min_by_key(|(k, bucket)| (**bucket, **k))
            .map(|(k, bucket)| (*k, *bucket));
        if let Some((k, bucket)) = oldest {
            self.retired.remove(&k);
            self.retired_floor = self.retired_floor.max(Some(bucket));
        }
    }

    /// Last bucket an untracked key may already have emitted
    fn retired_watermark(&self, key: &StrikeKey) -> Option<i64> {
        self.retired.get(key).copied().max(self.retired_floor)
    }

    /// Take every open window, oldest window first
    pub fn drain_open(&mut self) -> Vec<WindowAccumulator> {
        self.drain_where(|_| true)
    }

    /// Take open windows matching `pred`, oldest window first
    pub fn drain_where<F>(&mut self, mut pred: F) -> Vec<WindowAccumulator>
    where
        F: FnMut(&WindowAccumulator) -> bool,
    {
        let mut drained: Vec<WindowAccumulator> = self
            .slots
            .values_mut()
            .filter(|slot| slot.accumulator.as_ref().is_some_and(&mut pred))
            .filter_map(KeySlot::take_for_emit)
            .collect();
        drained.sort_by(|a, b| {
            a.window_start
                .cmp(&b.window_start)
                .then_with(|| StrikeKey::new(a.strike, a.option_type).cmp(&StrikeKey::new(b.strike, b.option_type)))
        });
        drained
    }

    /// Keys with an accumulator still open
    pub fn open_windows(&self) -> usize {
        self.slots.values().filter(|s| s.accumulator.is_some()).count()
    }

    /// Keys holding a slot, open window or not
    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn get(&self, key: &StrikeKey) -> Option<&WindowAccumulator> {
        self.slots.get(key).and_then(|s| s.accumulator.as_ref())
    }

    /// Forget everything, including emitted-bucket watermarks
    pub fn clear(&mut self) {
        self.slots.clear();
        self.retired.clear();
        self.retired_floor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: i64 = 300_000;

    fn quote(ts: i64, strike: f64, bid: u64, ask: u64) -> QuoteSnapshot {
        QuoteSnapshot {
            timestamp: ts,
            symbol: format!("NQM5 C{}", strike),
            strike,
            option_type: OptionType::Call,
            bid_size: bid,
            ask_size: ask,
            bid_price: 41.5,
            ask_price: 42.5,
        }
    }

    #[test]
    fn test_deltas_clamped_at_zero() {
        let mut store = WindowStore::new(WINDOW, 10);
        store.apply(&quote(0, 21900.0, 30, 30), 10.0).unwrap();
        store.apply(&quote(1_000, 21900.0, 60, 25), 10.0).unwrap();
        store.apply(&quote(2_000, 21900.0, 10, 20), 10.0).unwrap();

        let acc = store.get(&StrikeKey::new(21900.0, OptionType::Call)).unwrap();
        assert_eq!(acc.bid_volume, 300.0);
        assert_eq!(acc.ask_volume, 0.0);
        assert_eq!(acc.update_count, 3);
        assert_eq!(acc.active_updates, 1);
        assert_eq!(acc.peak_bid_size, 60);
    }

    #[test]
    fn test_rollover_closes_previous_window() {
        let mut store = WindowStore::new(WINDOW, 10);
        store.apply(&quote(0, 21900.0, 30, 30), 10.0).unwrap();
        store.apply(&quote(1_000, 21900.0, 40, 30), 10.0).unwrap();

        let outcome = store.apply(&quote(WINDOW + 5, 21900.0, 40, 30), 10.0).unwrap();
        let closed = outcome.closed.unwrap();
        assert_eq!(closed.bucket, 0);
        assert_eq!(closed.bid_volume, 100.0);

        let fresh = store.get(&StrikeKey::new(21900.0, OptionType::Call)).unwrap();
        assert_eq!(fresh.bucket, 1);
        assert_eq!(fresh.window_start, WINDOW);
        assert_eq!(fresh.bid_volume, 0.0);
    }

    #[test]
    fn test_late_snapshot_rejected() {
        let mut store = WindowStore::new(WINDOW, 10);
        store.apply(&quote(WINDOW, 21900.0, 30, 30), 10.0).unwrap();
        let late = store.apply(&quote(10, 21900.0, 90, 30), 10.0);
        assert!(matches!(late, Err(SkipReason::LateSnapshot { bucket: 0, current: 1 })));

        // a drained bucket cannot be reopened either
        assert_eq!(store.drain_open().len(), 1);
        let reopened = store.apply(&quote(WINDOW + 10, 21900.0, 30, 30), 10.0);
        assert!(reopened.is_err());
        assert!(store.apply(&quote(2 * WINDOW, 21900.0, 30, 30), 10.0).is_ok());
    }

    #[test]
    fn test_capacity_evicts_coldest_key() {
        let mut store = WindowStore::new(WINDOW, 2);
        store.apply(&quote(0, 21800.0, 30, 30), 10.0).unwrap();
        store.apply(&quote(1, 21900.0, 30, 30), 10.0).unwrap();
        store.apply(&quote(2, 21900.0, 40, 30), 10.0).unwrap();

        let outcome = store.apply(&quote(3, 22000.0, 30, 30), 10.0).unwrap();
        let evicted = outcome.evicted.unwrap();
        assert_eq!(evicted.strike, 21800.0);
        assert_eq!(store.tracked_keys(), 2);
        assert_eq!(store.evictions(), 1);
    }

    #[test]
    fn test_evicted_key_cannot_reopen_emitted_bucket() {
        let mut store = WindowStore::new(WINDOW, 2);
        store.apply(&quote(0, 21800.0, 30, 30), 10.0).unwrap();
        store.apply(&quote(1, 21900.0, 30, 30), 10.0).unwrap();
        let evicted = store.apply(&quote(2, 22000.0, 30, 30), 10.0).unwrap().evicted.unwrap();
        assert_eq!((evicted.strike, evicted.bucket), (21800.0, 0));

        // back in the bucket it already emitted
        let again = store.apply(&quote(3, 21800.0, 40, 30), 10.0);
        assert!(matches!(again, Err(SkipReason::LateSnapshot { bucket: 0, current: 0 })));
        assert!(store.get(&StrikeKey::new(21800.0, OptionType::Call)).is_none());

        // the next bucket is fine and keeps the watermark
        store.apply(&quote(WINDOW, 21800.0, 40, 30), 10.0).unwrap();
        let acc = store.get(&StrikeKey::new(21800.0, OptionType::Call)).unwrap();
        assert_eq!(acc.bucket, 1);
    }

    #[test]
    fn test_evicted_key_rejects_older_bucket() {
        let mut store = WindowStore::new(WINDOW, 1);
        store.apply(&quote(5 * WINDOW, 21800.0, 30, 30), 10.0).unwrap();
        let evicted = store.apply(&quote(5 * WINDOW + 1, 21900.0, 30, 30), 10.0).unwrap().evicted;
        assert_eq!(evicted.unwrap().bucket, 5);

        let late = store.apply(&quote(WINDOW, 21800.0, 30, 30), 10.0);
        assert!(matches!(late, Err(SkipReason::LateSnapshot { bucket: 1, current: 5 })));
        // rejected before taking a slot, so nothing else was evicted
        assert_eq!(store.evictions(), 1);
        assert!(store.get(&StrikeKey::new(21900.0, OptionType::Call)).is_some());
    }

    #[test]
    fn test_retired_overflow_raises_floor() {
        let mut store = WindowStore::new(WINDOW, 1);
        // each new strike evicts the previous one; only one watermark is kept by key
        for (i, strike) in [21800.0, 21900.0, 22000.0].into_iter().enumerate() {
            store.apply(&quote(i as i64 * WINDOW, strike, 30, 30), 10.0).unwrap();
        }

        // 21800 (bucket 0) fell out of the retired map into the floor
        assert!(store.apply(&quote(0, 21800.0, 30, 30), 10.0).is_err());
        assert!(store.apply(&quote(10, 23000.0, 30, 30), 10.0).is_err());
        assert!(store.apply(&quote(WINDOW + 10, 21900.0, 30, 30), 10.0).is_err());
        assert!(store.apply(&quote(3 * WINDOW, 21800.0, 30, 30), 10.0).is_ok());

        store.clear();
        assert!(store.apply(&quote(0, 21800.0, 30, 30), 10.0).is_ok());
    }

    #[test]
    fn test_drain_where_is_partial() {
        let mut store = WindowStore::new(WINDOW, 10);
        store.apply(&quote(0, 21800.0, 30, 30), 10.0).unwrap();
        store.apply(&quote(WINDOW, 21900.0, 30, 30), 10.0).unwrap();

        let stale = store.drain_where(|acc| acc.window_start < WINDOW);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].strike, 21800.0);
        assert_eq!(store.open_windows(), 1);
    }
}
