// Layer 1 - Ingestion glue
// Feed record shapes, symbol resolution, historical replay.
// Vendor network clients live outside this crate and produce these shapes.

pub mod records;
pub mod symbols;
pub mod replay;

pub use records::{FeedRecord, QuoteRecord, TradeRecord, SymbolMappingRecord, SystemMessageRecord};
pub use symbols::{parse_option_symbol, SymbolError, SymbolResolver};
pub use replay::{read_ndjson, load_quote_snapshots, load_feed_records, ReplayBatch, ReplayError};
