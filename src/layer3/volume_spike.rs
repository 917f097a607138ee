// Volume Spike Analyzer - volume/open-interest anomalies in a chain snapshot
// Stateless: every call sees only the chain it is given

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::core::config::SpikeThresholds;
use crate::core::types::{
    ConfidenceTier, Direction, InstitutionalSignal, NetPositioning, OptionType, SkipReason,
};
use crate::layer1::symbols::parse_option_symbol;

/// One strike row of an options-chain snapshot. Vendors leave fields out, so
/// everything the analyzer checks is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStrike {
    pub strike: Option<f64>,
    pub option_type: Option<OptionType>,
    pub symbol: Option<String>,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
    pub last_price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl ChainStrike {
    /// Strike and type, falling back to the option symbol for whichever is absent
    fn contract(&self) -> Result<(f64, OptionType), SkipReason> {
        if let Some(strike) = self.strike {
            if !strike.is_finite() || strike <= 0.0 {
                return Err(SkipReason::MissingField("strike"));
            }
        }
        if let (Some(strike), Some(option_type)) = (self.strike, self.option_type) {
            return Ok((strike, option_type));
        }

        let symbol = match &self.symbol {
            Some(s) => s,
            None if self.strike.is_none() => return Err(SkipReason::MissingField("strike")),
            None => return Err(SkipReason::MissingField("option_type")),
        };

        match parse_option_symbol(symbol) {
            Ok((strike, option_type)) => Ok((
                self.strike.unwrap_or(strike),
                self.option_type.unwrap_or(option_type),
            )),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Chain entry symbol unparseable");
                Err(SkipReason::MalformedSymbol(symbol.clone()))
            }
        }
    }

    /// Last trade price, else bid/ask mid
    fn option_price(&self) -> Option<f64> {
        match self.last_price {
            Some(p) if p.is_finite() && p > 0.0 => Some(p),
            _ => match (self.bid, self.ask) {
                (Some(bid), Some(ask)) if bid.is_finite() && ask.is_finite() && bid + ask > 0.0 => {
                    Some((bid + ask) / 2.0)
                }
                _ => None,
            },
        }
    }
}

/// Concrete levels for acting on one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub strike: f64,
    pub option_type: OptionType,
    pub direction: Direction,
    pub confidence: ConfidenceTier,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_multiplier: f64,
    pub risk_reward: f64,
    pub dollar_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub total_signals: usize,
    pub call_dollar_volume: f64,
    pub put_dollar_volume: f64,
    pub total_dollar_volume: f64,
    pub call_share: f64,
    pub net_positioning: NetPositioning,
    pub tier_counts: BTreeMap<ConfidenceTier, usize>,
    pub top_strikes: Vec<InstitutionalSignal>,
}

// Risk:reward is reported as a nominal label, not derived from the levels
const NOMINAL_RISK_REWARD: f64 = 2.0;

/// Tier rank, then dollar size desc, then strike asc, then CALL before PUT
pub fn signal_order(a: &InstitutionalSignal, b: &InstitutionalSignal) -> Ordering {
    a.confidence
        .rank()
        .cmp(&b.confidence.rank())
        .then_with(|| b.dollar_size.total_cmp(&a.dollar_size))
        .then_with(|| a.strike.total_cmp(&b.strike))
        .then_with(|| a.option_type.cmp(&b.option_type))
}

pub struct VolumeSpikeAnalyzer {
    thresholds: SpikeThresholds,
}

impl VolumeSpikeAnalyzer {
    pub fn new(thresholds: SpikeThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in force for every scan
    pub fn thresholds(&self) -> &SpikeThresholds {
        &self.thresholds
    }

    /// Tier from the vol/OI cut points. Below the HIGH cut the ratio alone
    /// would give MODERATE; a notional of at least `high_tier_dollar_size`
    /// lifts it to HIGH (a 12x, $1.008M call is HIGH, not MODERATE).
    fn tier(&self, vol_oi_ratio: f64, dollar_size: f64) -> ConfidenceTier {
        let t = &self.thresholds;
        if vol_oi_ratio >= t.extreme_ratio {
            ConfidenceTier::Extreme
        } else if vol_oi_ratio >= t.very_high_ratio {
            ConfidenceTier::VeryHigh
        } else if vol_oi_ratio >= t.high_ratio || dollar_size >= t.high_tier_dollar_size {
            ConfidenceTier::High
        } else {
            ConfidenceTier::Moderate
        }
    }

    /// Full evaluation of one chain row, with the reason when it yields nothing
    pub fn evaluate_strike(
        &self,
        entry: &ChainStrike,
        current_price: f64,
    ) -> Result<InstitutionalSignal, SkipReason> {
        let t = &self.thresholds;

        let volume = entry.volume.ok_or(SkipReason::MissingField("volume"))?;
        let open_interest = entry.open_interest.ok_or(SkipReason::MissingField("open_interest"))?;
        let (strike, option_type) = entry.contract()?;

        if open_interest == 0 {
            return Err(SkipReason::ZeroDenominator("open_interest"));
        }
        if volume == 0 {
            return Err(SkipReason::BelowThreshold {
                metric: "volume",
                value: 0.0,
                threshold: t.min_volume as f64,
            });
        }

        let vol_oi_ratio = volume as f64 / open_interest as f64;
        if vol_oi_ratio < t.min_vol_oi_ratio {
            return Err(SkipReason::BelowThreshold {
                metric: "vol_oi_ratio",
                value: vol_oi_ratio,
                threshold: t.min_vol_oi_ratio,
            });
        }
        if volume < t.min_volume {
            return Err(SkipReason::BelowThreshold {
                metric: "volume",
                value: volume as f64,
                threshold: t.min_volume as f64,
            });
        }

        let option_price = entry.option_price().ok_or(SkipReason::MissingField("option_price"))?;
        let dollar_size = volume as f64 * option_price * t.contract_multiplier;
        if dollar_size < t.min_dollar_size {
            return Err(SkipReason::BelowThreshold {
                metric: "dollar_size",
                value: dollar_size,
                threshold: t.min_dollar_size,
            });
        }

        let confidence = self.tier(vol_oi_ratio, dollar_size);
        debug!(
            strike,
            option_type = %option_type,
            vol_oi_ratio,
            dollar_size,
            tier = %confidence,
            distance = strike - current_price,
            "Volume spike"
        );

        Ok(InstitutionalSignal {
            strike,
            option_type,
            volume,
            open_interest,
            vol_oi_ratio,
            option_price,
            dollar_size,
            direction: Direction::for_option(option_type),
            target_price: strike,
            confidence,
            timestamp: entry.timestamp,
            expiration_date: entry.expiration_date.clone(),
        })
    }

    /// `evaluate_strike` with the skip reason logged and dropped
    pub fn analyze_strike(&self, entry: &ChainStrike, current_price: f64) -> Option<InstitutionalSignal> {
        match self.evaluate_strike(entry, current_price) {
            Ok(signal) => Some(signal),
            Err(reason) => {
                debug!(reason = reason.code(), detail = %reason, "Chain entry skipped");
                None
            }
        }
    }

    /// Every qualifying strike in the chain, strongest first
    pub fn find_institutional_flow(&self, chain: &[ChainStrike], current_price: f64) -> Vec<InstitutionalSignal> {
        let mut signals: Vec<InstitutionalSignal> = chain
            .iter()
            .filter_map(|entry| self.analyze_strike(entry, current_price))
            .collect();
        signals.sort_by(signal_order);
        signals
    }

    /// Stop at half the distance to target on the losing side, target as take-profit
    pub fn generate_trade_plan(&self, signal: &InstitutionalSignal, current_price: f64) -> TradePlan {
        let half_distance = (signal.target_price - current_price).abs() / 2.0;
        let stop_loss = match signal.direction {
            Direction::Long => current_price - half_distance,
            Direction::Short => current_price + half_distance,
        };

        TradePlan {
            strike: signal.strike,
            option_type: signal.option_type,
            direction: signal.direction,
            confidence: signal.confidence,
            entry_price: current_price,
            stop_loss,
            take_profit: signal.target_price,
            position_multiplier: signal.confidence.position_multiplier(),
            risk_reward: NOMINAL_RISK_REWARD,
            dollar_size: signal.dollar_size,
        }
    }

    /// Call/put dollar split, net positioning and the largest strikes
    pub fn summarize_institutional_activity(&self, signals: &[InstitutionalSignal]) -> ActivitySummary {
        let mut call_dollar_volume = 0.0;
        let mut put_dollar_volume = 0.0;
        let mut tier_counts = BTreeMap::new();

        for s in signals {
            match s.option_type {
                OptionType::Call => call_dollar_volume += s.dollar_size,
                OptionType::Put => put_dollar_volume += s.dollar_size,
            }
            *tier_counts.entry(s.confidence).or_insert(0) += 1;
        }

        let total_dollar_volume = call_dollar_volume + put_dollar_volume;
        let (call_share, net_positioning) = if signals.is_empty() || total_dollar_volume <= 0.0 {
            (0.0, NetPositioning::Neutral)
        } else {
            let share = call_dollar_volume / total_dollar_volume;
            let positioning = if share > self.thresholds.bullish_call_share {
                NetPositioning::Bullish
            } else if share < self.thresholds.bearish_call_share {
                NetPositioning::Bearish
            } else {
                NetPositioning::Mixed
            };
            (share, positioning)
        };

        let mut top_strikes = signals.to_vec();
        top_strikes.sort_by(|a, b| {
            b.dollar_size
                .total_cmp(&a.dollar_size)
                .then_with(|| a.strike.total_cmp(&b.strike))
                .then_with(|| a.option_type.cmp(&b.option_type))
        });
        top_strikes.truncate(self.thresholds.top_strikes);

        ActivitySummary {
            total_signals: signals.len(),
            call_dollar_volume,
            put_dollar_volume,
            total_dollar_volume,
            call_share,
            net_positioning,
            tier_counts,
            top_strikes,
        }
    }
}

impl Default for VolumeSpikeAnalyzer {
    fn default() -> Self {
        Self::new(SpikeThresholds::default())
    }
}

/// Signals whose target lies within `max_distance_percent` of the current price
pub fn filter_actionable_signals(
    signals: &[InstitutionalSignal],
    current_price: f64,
    max_distance_percent: f64,
) -> Vec<InstitutionalSignal> {
    if !(current_price.is_finite() && current_price > 0.0) {
        return Vec::new();
    }

    signals
        .iter()
        .filter(|s| (s.target_price - current_price).abs() / current_price * 100.0 <= max_distance_percent)
        .cloned()
        .collect()
}
