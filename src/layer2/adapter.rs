// Quote Pressure Adapter - snapshots in, closed PressureMetrics out
// Driven synchronously by whoever delivers snapshots; no internal I/O.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::config::{ConfigError, PressureConfig};
use crate::core::types::{PressureMetrics, QuoteSnapshot, SkipReason};
use crate::layer2::confidence::ConfidenceScorer;
use crate::layer2::window_store::{WindowAccumulator, WindowStore};

/// One adapter shared by several ingestion threads
pub type SharedPressureAdapter = Arc<Mutex<QuotePressureAdapter>>;

#[derive(Debug, Clone, Default)]
pub struct AdapterStats {
    pub snapshots_processed: u64,
    pub snapshots_skipped: u64,
    pub windows_emitted: u64,
    pub windows_evicted: u64,
    pub open_windows: usize,
    pub tracked_keys: usize,
}

pub struct QuotePressureAdapter {
    config: PressureConfig,
    window_ms: i64,
    store: WindowStore,
    scorer: ConfidenceScorer,
    evicted: Vec<PressureMetrics>,

    snapshots_processed: u64,
    snapshots_skipped: u64,
    windows_emitted: u64,
    windows_evicted: u64,
}

impl QuotePressureAdapter {
    pub fn new(config: PressureConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let window_ms = config.window_duration_ms();

        info!(
            window_minutes = config.window_minutes,
            volume_multiplier = config.volume_multiplier,
            max_tracked_keys = config.max_tracked_keys,
            "Quote pressure adapter initialized"
        );

        Ok(Self {
            store: WindowStore::new(window_ms, config.max_tracked_keys),
            scorer: ConfidenceScorer::from_config(&config),
            window_ms,
            config,
            evicted: Vec::new(),
            snapshots_processed: 0,
            snapshots_skipped: 0,
            windows_emitted: 0,
            windows_evicted: 0,
        })
    }

    pub fn shared(self) -> SharedPressureAdapter {
        Arc::new(Mutex::new(self))
    }

    /// Feed one snapshot. Returns the window it closed, if any.
    pub fn add_quote_snapshot(&mut self, snapshot: QuoteSnapshot) -> Option<PressureMetrics> {
        match self.try_add_quote_snapshot(snapshot) {
            Ok(closed) => closed,
            Err(reason) => {
                debug!(reason = %reason, code = reason.code(), "Snapshot skipped");
                None
            }
        }
    }

    /// Like `add_quote_snapshot` but reports why a snapshot was dropped
    pub fn try_add_quote_snapshot(&mut self, snapshot: QuoteSnapshot) -> Result<Option<PressureMetrics>, SkipReason> {
        if !snapshot.strike.is_finite() || snapshot.strike <= 0.0 {
            self.snapshots_skipped += 1;
            return Err(SkipReason::MissingField("strike"));
        }

        let outcome = match self.store.apply(&snapshot, self.config.volume_multiplier) {
            Ok(outcome) => outcome,
            Err(reason) => {
                self.snapshots_skipped += 1;
                return Err(reason);
            }
        };
        self.snapshots_processed += 1;

        if let Some(acc) = outcome.evicted {
            self.windows_evicted += 1;
            let metrics = self.close(acc);
            self.evicted.push(metrics);
        }

        Ok(outcome.closed.map(|acc| self.close(acc)))
    }

    /// Flush every open window regardless of age. Drains evicted windows too.
    pub fn force_complete_all_windows(&mut self) -> Vec<PressureMetrics> {
        let mut emitted = std::mem::take(&mut self.evicted);
        let open = self.store.drain_open();
        emitted.extend(open.into_iter().map(|acc| self.close(acc)));

        if !emitted.is_empty() {
            info!(windows = emitted.len(), "Forced completion of all open windows");
        }
        emitted
    }

    /// Flush windows that started at least `stale_after_windows` durations before `now_ms`
    pub fn flush_stale(&mut self, now_ms: i64) -> Vec<PressureMetrics> {
        let max_age = (self.config.stale_after_windows * self.window_ms as f64) as i64;
        let stale = self.store.drain_where(|acc| now_ms - acc.window_start >= max_age);
        let emitted: Vec<PressureMetrics> = stale.into_iter().map(|acc| self.close(acc)).collect();

        if !emitted.is_empty() {
            debug!(windows = emitted.len(), now_ms, "Flushed stale windows");
        }
        emitted
    }

    /// Windows closed early by the key cap since the last call
    pub fn take_evicted(&mut self) -> Vec<PressureMetrics> {
        std::mem::take(&mut self.evicted)
    }

    /// Drop all state, watermarks included (session teardown)
    pub fn reset(&mut self) {
        self.store.clear();
        self.evicted.clear();
    }

    fn close(&mut self, acc: WindowAccumulator) -> PressureMetrics {
        self.windows_emitted += 1;
        let metrics = self.scorer.finalize(acc, self.window_ms);
        debug!(
            strike = metrics.strike,
            option_type = %metrics.option_type,
            window = metrics.time_window,
            side = %metrics.dominant_side,
            bid_volume = metrics.bid_volume,
            ask_volume = metrics.ask_volume,
            confidence = metrics.confidence,
            "Window closed"
        );
        metrics
    }

    pub fn config(&self) -> &PressureConfig {
        &self.config
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn open_windows(&self) -> usize {
        self.store.open_windows()
    }

    pub fn get_stats(&self) -> AdapterStats {
        AdapterStats {
            snapshots_processed: self.snapshots_processed,
            snapshots_skipped: self.snapshots_skipped,
            windows_emitted: self.windows_emitted,
            windows_evicted: self.windows_evicted,
            open_windows: self.store.open_windows(),
            tracked_keys: self.store.tracked_keys(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{OptionType, Side};

    const WINDOW: i64 = 300_000;

    fn quote(ts: i64, strike: f64, option_type: OptionType, bid: u64, ask: u64) -> QuoteSnapshot {
        QuoteSnapshot {
            timestamp: ts,
            symbol: format!("NQM5 {}{}", if option_type == OptionType::Call { "C" } else { "P" }, strike),
            strike,
            option_type,
            bid_size: bid,
            ask_size: ask,
            bid_price: 35.0,
            ask_price: 36.0,
        }
    }

    fn adapter() -> QuotePressureAdapter {
        QuotePressureAdapter::new(PressureConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_non_positive_window() {
        let config = PressureConfig { window_minutes: 0, ..Default::default() };
        assert!(matches!(QuotePressureAdapter::new(config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_building_bid_is_buy_pressure() {
        let mut adapter = adapter();
        assert!(adapter.add_quote_snapshot(quote(0, 21900.0, OptionType::Call, 30, 30)).is_none());
        assert!(adapter.add_quote_snapshot(quote(60_000, 21900.0, OptionType::Call, 60, 25)).is_none());
        assert!(adapter.add_quote_snapshot(quote(120_000, 21900.0, OptionType::Call, 85, 20)).is_none());

        let metrics = adapter.force_complete_all_windows();
        assert_eq!(metrics.len(), 1);
        let m = &metrics[0];
        assert_eq!(m.dominant_side, Side::Buy);
        assert_eq!(m.bid_volume, 550.0);
        assert_eq!(m.ask_volume, 0.0);
        assert!(m.pressure_ratio > 2.0);
        assert!(m.confidence > 0.5 && m.confidence <= 1.0);
        assert!(m.is_significant(50, 2.0));
    }

    #[test]
    fn test_rollover_emits_on_next_bucket() {
        let mut adapter = adapter();
        adapter.add_quote_snapshot(quote(0, 21800.0, OptionType::Put, 10, 10));
        adapter.add_quote_snapshot(quote(1_000, 21800.0, OptionType::Put, 10, 40));

        let closed = adapter.add_quote_snapshot(quote(WINDOW, 21800.0, OptionType::Put, 10, 40)).unwrap();
        assert_eq!(closed.time_window, 0);
        assert_eq!(closed.dominant_side, Side::Sell);
        assert_eq!(closed.ask_volume, 300.0);
        assert_eq!(adapter.open_windows(), 1);
    }

    #[test]
    fn test_force_complete_drains_once() {
        let mut adapter = adapter();
        adapter.add_quote_snapshot(quote(0, 21800.0, OptionType::Put, 10, 10));
        adapter.add_quote_snapshot(quote(0, 21900.0, OptionType::Call, 10, 10));

        assert_eq!(adapter.force_complete_all_windows().len(), 2);
        assert!(adapter.force_complete_all_windows().is_empty());
        assert_eq!(adapter.open_windows(), 0);
    }

    #[test]
    fn test_static_quotes_low_confidence() {
        let mut adapter = adapter();
        for i in 0..10 {
            adapter.add_quote_snapshot(quote(i * 1_000, 22000.0, OptionType::Call, 40, 40));
        }
        let metrics = adapter.force_complete_all_windows();
        assert_eq!(metrics[0].total_volume(), 0.0);
        assert!(metrics[0].confidence <= 0.1);
    }

    #[test]
    fn test_volumes_never_negative() {
        let mut adapter = adapter();
        // deterministic pseudo-random walk over sizes, including zeros
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut emitted = Vec::new();
        for i in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let bid = seed % 120;
            let ask = (seed >> 16) % 120;
            let strike = 21700.0 + ((seed >> 32) % 5) as f64 * 50.0;
            if let Some(m) = adapter.add_quote_snapshot(quote(i * 7_000, strike, OptionType::Call, bid, ask)) {
                emitted.push(m);
            }
        }
        emitted.extend(adapter.force_complete_all_windows());

        assert!(!emitted.is_empty());
        for m in &emitted {
            assert!(m.bid_volume >= 0.0 && m.ask_volume >= 0.0);
            assert!((0.0..=1.0).contains(&m.confidence));
        }
    }

    #[test]
    fn test_windows_strictly_increasing_per_key() {
        let mut adapter = adapter();
        let mut seen = Vec::new();
        for ts in [0, 10_000, WINDOW + 1, 5_000, 2 * WINDOW, 2 * WINDOW + 9, 4 * WINDOW] {
            if let Some(m) = adapter.add_quote_snapshot(quote(ts, 21900.0, OptionType::Call, 20, 20)) {
                seen.push(m.time_window);
            }
        }
        seen.extend(adapter.force_complete_all_windows().iter().map(|m| m.time_window));
        assert_eq!(seen, vec![0, WINDOW, 2 * WINDOW, 4 * WINDOW]);
        assert_eq!(adapter.get_stats().snapshots_skipped, 1);
    }

    #[test]
    fn test_flush_stale_leaves_fresh_windows() {
        let mut adapter = adapter();
        adapter.add_quote_snapshot(quote(0, 21800.0, OptionType::Put, 10, 10));
        adapter.add_quote_snapshot(quote(2 * WINDOW, 21900.0, OptionType::Call, 10, 10));

        let stale = adapter.flush_stale(2 * WINDOW + 1);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].strike, 21800.0);
        assert_eq!(adapter.open_windows(), 1);
        assert!(adapter.flush_stale(2 * WINDOW + 1).is_empty());
    }

    #[test]
    fn test_eviction_surfaces_metrics() {
        let config = PressureConfig { max_tracked_keys: 1, ..Default::default() };
        let mut adapter = QuotePressureAdapter::new(config).unwrap();
        adapter.add_quote_snapshot(quote(0, 21800.0, OptionType::Put, 10, 10));
        adapter.add_quote_snapshot(quote(1, 21900.0, OptionType::Call, 10, 10));

        let evicted = adapter.take_evicted();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].strike, 21800.0);
        assert_eq!(adapter.get_stats().windows_evicted, 1);
        assert_eq!(adapter.get_stats().tracked_keys, 1);
    }

    #[test]
    fn test_returning_evicted_key_keeps_window_order() {
        let config = PressureConfig { max_tracked_keys: 1, ..Default::default() };
        let mut adapter = QuotePressureAdapter::new(config).unwrap();
        let mut emitted = Vec::new();

        let feed = [
            quote(5 * WINDOW, 21800.0, OptionType::Call, 10, 10),
            quote(5 * WINDOW + 1, 21900.0, OptionType::Call, 10, 10),
            quote(WINDOW, 21800.0, OptionType::Call, 40, 10),     // older than its emitted window
            quote(5 * WINDOW + 2, 21800.0, OptionType::Call, 40, 10), // same emitted bucket
            quote(6 * WINDOW, 21800.0, OptionType::Call, 40, 10),
        ];
        for snap in feed {
            emitted.extend(adapter.add_quote_snapshot(snap));
            emitted.extend(adapter.take_evicted());
        }
        emitted.extend(adapter.force_complete_all_windows());

        let order: Vec<i64> = emitted
            .iter()
            .filter(|m| m.strike == 21800.0)
            .map(|m| m.time_window)
            .collect();
        assert_eq!(order, vec![5 * WINDOW, 6 * WINDOW]);
        assert_eq!(adapter.get_stats().snapshots_skipped, 2);
    }
}
