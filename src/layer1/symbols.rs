// Symbol Resolution - instrument id -> option symbol -> (strike, type)
// The id map is batch-loaded once per trading day and owned by one resolver instance

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::types::OptionType;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SymbolError {
    #[error("Malformed option symbol: '{0}'")]
    Malformed(String),
}

/// Parse an option symbol into (strike, option type).
///
/// Accepts the spaced vendor form `NQM5 C21900` and the compact form
/// `NQM5C21900`; the strike is the number after the last C/P marker.
pub fn parse_option_symbol(symbol: &str) -> Result<(f64, OptionType), SymbolError> {
    let malformed = || SymbolError::Malformed(symbol.to_string());
    let token = symbol.split_whitespace().last().ok_or_else(malformed)?;

    for (idx, ch) in token.char_indices().rev() {
        let option_type = match ch {
            'C' | 'c' => OptionType::Call,
            'P' | 'p' => OptionType::Put,
            _ => continue,
        };
        let rest = &token[idx + ch.len_utf8()..];
        if rest.is_empty() {
            continue;
        }
        if let Ok(strike) = rest.parse::<f64>() {
            if strike.is_finite() && strike > 0.0 {
                return Ok((strike, option_type));
            }
        }
        break;
    }

    Err(malformed())
}

#[derive(Debug, Default)]
struct ResolverState {
    trading_day: Option<String>,
    symbols: HashMap<u32, String>,
}

/// Thread-safe instrument id -> symbol cache
#[derive(Debug, Default)]
pub struct SymbolResolver {
    state: RwLock<ResolverState>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `trading_day`, dropping yesterday's mappings.
    /// Returns true if the cache was reset.
    pub fn begin_trading_day(&self, trading_day: &str) -> bool {
        let mut state = self.state.write();
        if state.trading_day.as_deref() == Some(trading_day) {
            return false;
        }
        let dropped = state.symbols.len();
        state.symbols.clear();
        state.trading_day = Some(trading_day.to_string());
        info!(trading_day, dropped, "Symbol cache rolled to new trading day");
        true
    }

    /// Replace the day's mappings in one batch
    pub fn load_batch<I>(&self, trading_day: &str, mappings: I) -> usize
    where
        I: IntoIterator<Item = (u32, String)>,
    {
        self.begin_trading_day(trading_day);
        let mut state = self.state.write();
        let before = state.symbols.len();
        state.symbols.extend(mappings);
        let added = state.symbols.len() - before;
        debug!(trading_day, added, "Symbol batch loaded");
        added
    }

    /// Record one mapping. A mapping for a different day rolls the cache first.
    pub fn insert(&self, instrument_id: u32, symbol: String, trading_day: Option<&str>) {
        if let Some(day) = trading_day {
            self.begin_trading_day(day);
        }
        self.state.write().symbols.insert(instrument_id, symbol);
    }

    pub fn resolve(&self, instrument_id: u32) -> Option<String> {
        self.state.read().symbols.get(&instrument_id).cloned()
    }

    pub fn trading_day(&self) -> Option<String> {
        self.state.read().trading_day.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
