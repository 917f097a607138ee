// Feed Records - everything the ingestion layer can hand us
// One tagged union, matched exhaustively downstream

use serde::{Deserialize, Serialize};

use crate::core::types::{OptionType, QuoteSnapshot, Side};

/// Top-of-book update keyed by vendor instrument id (symbol not yet resolved)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub instrument_id: u32,
    pub timestamp: i64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_size: u64,
    pub ask_size: u64,
}

impl QuoteRecord {
    pub fn into_snapshot(self, symbol: String, strike: f64, option_type: OptionType) -> QuoteSnapshot {
        QuoteSnapshot {
            timestamp: self.timestamp,
            symbol,
            strike,
            option_type,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub instrument_id: u32,
    pub timestamp: i64,
    pub price: f64,
    pub size: u64,
    #[serde(default)]
    pub aggressor: Option<Side>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMappingRecord {
    pub instrument_id: u32,
    pub symbol: String,
    #[serde(default)]
    pub trading_day: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessageRecord {
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedRecord {
    Trade(TradeRecord),
    Quote(QuoteRecord),
    SymbolMapping(SymbolMappingRecord),
    SystemMessage(SystemMessageRecord),
}

impl FeedRecord {
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            FeedRecord::Trade(t) => Some(t.timestamp),
            FeedRecord::Quote(q) => Some(q.timestamp),
            FeedRecord::SymbolMapping(_) => None,
            FeedRecord::SystemMessage(m) => Some(m.timestamp),
        }
    }
}
