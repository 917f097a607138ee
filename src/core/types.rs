// Core Type Definitions for Institutional Flow
// Quote snapshots in, pressure metrics and institutional signals out

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Call,
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "CALL"),
            OptionType::Put => write!(f, "PUT"),
        }
    }
}

impl std::str::FromStr for OptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Ok(OptionType::Call),
            "P" | "PUT" => Ok(OptionType::Put),
            _ => Err(format!("Invalid OptionType: '{}'. Expected 'CALL' or 'PUT'", s)),
        }
    }
}

/// Dominant side of a closed quote-pressure window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Trade direction implied by an institutional footprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn for_option(option_type: OptionType) -> Self {
        match option_type {
            OptionType::Call => Direction::Long,
            OptionType::Put => Direction::Short,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Confidence tier of a volume-spike signal. Declaration order is rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    Extreme,
    VeryHigh,
    High,
    Moderate,
}

impl ConfidenceTier {
    /// 0 for EXTREME, 3 for MODERATE
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn position_multiplier(&self) -> f64 {
        match self {
            ConfidenceTier::Extreme => 3.0,
            ConfidenceTier::VeryHigh => 2.0,
            ConfidenceTier::High => 1.5,
            ConfidenceTier::Moderate => 1.0,
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceTier::Extreme => write!(f, "EXTREME"),
            ConfidenceTier::VeryHigh => write!(f, "VERY_HIGH"),
            ConfidenceTier::High => write!(f, "HIGH"),
            ConfidenceTier::Moderate => write!(f, "MODERATE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetPositioning {
    Bullish,
    Bearish,
    Mixed,
    Neutral,
}

impl fmt::Display for NetPositioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetPositioning::Bullish => write!(f, "BULLISH"),
            NetPositioning::Bearish => write!(f, "BEARISH"),
            NetPositioning::Mixed => write!(f, "MIXED"),
            NetPositioning::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

// ============================================================================
// Strike Key
// ============================================================================

/// Map key for a (strike, option type) pair.
/// Strikes are stored in hundredths so the key is hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrikeKey {
    strike_cents: i64,
    pub option_type: OptionType,
}

impl StrikeKey {
    pub fn new(strike: f64, option_type: OptionType) -> Self {
        Self {
            strike_cents: (strike * 100.0).round() as i64,
            option_type,
        }
    }

    pub fn strike(&self) -> f64 {
        self.strike_cents as f64 / 100.0
    }
}

impl fmt::Display for StrikeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.strike(), self.option_type)
    }
}

// ============================================================================
// Quote Snapshot
// ============================================================================

/// Top-of-book quote for one option instrument, already symbol-resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub timestamp: i64, // milliseconds
    pub symbol: String,
    pub strike: f64,
    pub option_type: OptionType,
    pub bid_size: u64,
    pub ask_size: u64,
    pub bid_price: f64,
    pub ask_price: f64,
}

impl QuoteSnapshot {
    /// bid_size / ask_size. An empty ask is an extreme buy (+inf),
    /// an empty bid an extreme sell (0), both empty is neutral (1).
    pub fn pressure_ratio(&self) -> f64 {
        match (self.bid_size, self.ask_size) {
            (0, 0) => 1.0,
            (_, 0) => f64::INFINITY,
            (bid, ask) => bid as f64 / ask as f64,
        }
    }

    pub fn key(&self) -> StrikeKey {
        StrikeKey::new(self.strike, self.option_type)
    }

    pub fn mid_price(&self) -> f64 {
        (self.bid_price + self.ask_price) / 2.0
    }
}

impl fmt::Display for QuoteSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quote({} {}{} bid={}@{:.2} ask={}@{:.2} t={})",
            self.symbol, self.strike, self.option_type,
            self.bid_size, self.bid_price, self.ask_size, self.ask_price, self.timestamp
        )
    }
}

// ============================================================================
// Pressure Metrics
// ============================================================================

/// One closed quote-pressure window for a (strike, type) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureMetrics {
    pub time_window: i64, // window start, milliseconds
    pub window_end: i64,
    pub symbol: String,
    pub strike: f64,
    pub option_type: OptionType,
    pub bid_volume: f64,
    pub ask_volume: f64,
    pub pressure_ratio: f64,
    pub dominant_side: Side,
    pub confidence: f64,
    pub update_count: u32,
    pub peak_bid_size: u64,
}

impl PressureMetrics {
    pub fn total_volume(&self) -> f64 {
        self.bid_volume + self.ask_volume
    }

    pub fn key(&self) -> StrikeKey {
        StrikeKey::new(self.strike, self.option_type)
    }

    /// Resting bid was large enough and the window leaned hard to one side
    pub fn is_significant(&self, min_bid_size: u64, min_pressure_ratio: f64) -> bool {
        if self.peak_bid_size < min_bid_size {
            return false;
        }
        match self.dominant_side {
            Side::Buy => self.pressure_ratio >= min_pressure_ratio,
            Side::Sell => {
                let inverse = self.ask_volume / self.bid_volume.max(1.0);
                inverse >= min_pressure_ratio
            }
        }
    }
}

impl fmt::Display for PressureMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pressure({}{} {} bid_vol={:.0} ask_vol={:.0} ratio={:.2} conf={:.2})",
            self.strike, self.option_type, self.dominant_side,
            self.bid_volume, self.ask_volume, self.pressure_ratio, self.confidence
        )
    }
}

// ============================================================================
// Institutional Signal
// ============================================================================

/// Volume/open-interest footprint at one strike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionalSignal {
    pub strike: f64,
    pub option_type: OptionType,
    pub volume: u64,
    pub open_interest: u64,
    pub vol_oi_ratio: f64,
    pub option_price: f64,
    pub dollar_size: f64,
    pub direction: Direction,
    pub target_price: f64,
    pub confidence: ConfidenceTier,
    pub timestamp: i64,
    pub expiration_date: Option<String>,
}

impl fmt::Display for InstitutionalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal({}{} {} {:.1}x ${:.0} {} -> {})",
            self.strike, self.option_type, self.confidence,
            self.vol_oi_ratio, self.dollar_size, self.direction, self.target_price
        )
    }
}

// ============================================================================
// Coordination Signal
// ============================================================================

/// One strike's share of a coordinated move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeContribution {
    pub strike: f64,
    pub option_type: OptionType,
    pub volume: f64,
    pub volume_share: f64,
    pub confidence: f64,
}

/// Same-side pressure at several strikes inside one correlation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationSignal {
    pub side: Side,
    pub contributions: Vec<StrikeContribution>,
    pub strike_count: usize,
    pub total_volume: f64,
    pub max_individual_confidence: f64,
    pub composite_confidence: f64,
    pub window_start: i64,
    pub window_end: i64,
}

impl fmt::Display for CoordinationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Coordination({} strikes={} vol={:.0} conf={:.2} max={:.2})",
            self.side, self.strike_count, self.total_volume,
            self.composite_confidence, self.max_individual_confidence
        )
    }
}

// ============================================================================
// Skip Reasons
// ============================================================================

/// Why a single record produced nothing. Per-record, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingField(&'static str),
    MalformedSymbol(String),
    ZeroDenominator(&'static str),
    BelowThreshold { metric: &'static str, value: f64, threshold: f64 },
    ResolutionGap(u32),
    LateSnapshot { bucket: i64, current: i64 },
}

impl SkipReason {
    /// Stable short code for counters and logs
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::MissingField(_) => "missing_field",
            SkipReason::MalformedSymbol(_) => "malformed_symbol",
            SkipReason::ZeroDenominator(_) => "zero_denominator",
            SkipReason::BelowThreshold { .. } => "below_threshold",
            SkipReason::ResolutionGap(_) => "resolution_gap",
            SkipReason::LateSnapshot { .. } => "late_snapshot",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingField(field) => write!(f, "missing field '{}'", field),
            SkipReason::MalformedSymbol(symbol) => write!(f, "malformed symbol '{}'", symbol),
            SkipReason::ZeroDenominator(field) => write!(f, "{} is zero", field),
            SkipReason::BelowThreshold { metric, value, threshold } => {
                write!(f, "{} {} below threshold {}", metric, value, threshold)
            }
            SkipReason::ResolutionGap(id) => write!(f, "instrument {} has no resolved symbol", id),
            SkipReason::LateSnapshot { bucket, current } => {
                write!(f, "snapshot bucket {} behind window {}", bucket, current)
            }
        }
    }
}
