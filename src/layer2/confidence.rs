// Confidence Scorer - turns a closing window into PressureMetrics
// Confidence grows with log volume, is damped by quote inactivity,
// and static windows never score above the floor.

use crate::core::config::PressureConfig;
use crate::core::types::{PressureMetrics, Side};
use crate::layer2::window_store::WindowAccumulator;

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    saturation_volume: f64,
    near_zero_volume: f64,
    floor: f64,
}

impl ConfidenceScorer {
    pub fn new(saturation_volume: f64, near_zero_volume: f64, floor: f64) -> Self {
        Self {
            saturation_volume: saturation_volume.max(1.0),
            near_zero_volume: near_zero_volume.max(0.0),
            floor: floor.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &PressureConfig) -> Self {
        Self::new(config.saturation_volume, config.near_zero_volume, config.confidence_floor)
    }

    /// Confidence in [0, 1]
    pub fn score(&self, acc: &WindowAccumulator) -> f64 {
        let total = (acc.bid_volume + acc.ask_volume).max(0.0);
        if !total.is_finite() {
            return 1.0;
        }

        let magnitude = ((1.0 + total).ln() / (1.0 + self.saturation_volume).ln()).min(1.0);

        // the seed snapshot can never produce a delta
        let possible = acc.update_count.saturating_sub(1);
        let activity = if possible == 0 {
            0.0
        } else {
            acc.active_updates as f64 / possible as f64
        };
        let stability = 0.5 + 0.5 * activity;

        let mut confidence = magnitude * stability;
        if total < self.near_zero_volume {
            confidence = confidence.min(self.floor);
        }
        confidence.clamp(0.0, 1.0)
    }

    /// BUY if more bid volume, SELL if less; ties follow the last quote's lean
    pub fn dominant_side(acc: &WindowAccumulator) -> Side {
        if acc.bid_volume > acc.ask_volume {
            Side::Buy
        } else if acc.bid_volume < acc.ask_volume {
            Side::Sell
        } else if acc.last_pressure_ratio > 1.0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn finalize(&self, acc: WindowAccumulator, window_ms: i64) -> PressureMetrics {
        let confidence = self.score(&acc);
        let dominant_side = Self::dominant_side(&acc);
        PressureMetrics {
            time_window: acc.window_start,
            window_end: acc.window_start + window_ms,
            pressure_ratio: acc.bid_volume / acc.ask_volume.max(1.0),
            dominant_side,
            confidence,
            bid_volume: acc.bid_volume,
            ask_volume: acc.ask_volume,
            update_count: acc.update_count,
            peak_bid_size: acc.peak_bid_size,
            symbol: acc.symbol,
            strike: acc.strike,
            option_type: acc.option_type,
        }
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::from_config(&PressureConfig::default())
    }
}
