// Historical Replay - newline-delimited JSON into the live record shapes
// Bad lines are skipped and counted, never fatal

use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::types::QuoteSnapshot;
use crate::layer1::records::FeedRecord;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ReplayBatch<T> {
    pub records: Vec<T>,
    pub skipped_lines: usize,
}

/// Parse every non-blank line of `reader` as a `T`
pub fn read_ndjson<T, R>(reader: R) -> Result<ReplayBatch<T>, ReplayError>
where
    T: DeserializeOwned,
    R: BufRead,
{
    let mut records = Vec::new();
    let mut skipped_lines = 0;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped_lines += 1;
                warn!(line = line_no + 1, error = %e, "Skipping malformed replay line");
            }
        }
    }

    Ok(ReplayBatch { records, skipped_lines })
}

/// Load stored quote snapshots, ordered by timestamp
pub fn load_quote_snapshots(path: &Path) -> Result<ReplayBatch<QuoteSnapshot>, ReplayError> {
    let file = File::open(path)?;
    let mut batch: ReplayBatch<QuoteSnapshot> = read_ndjson(BufReader::new(file))?;
    batch.records.sort_by_key(|s| s.timestamp);
    info!(
        path = %path.display(),
        snapshots = batch.records.len(),
        skipped = batch.skipped_lines,
        "Quote replay loaded"
    );
    Ok(batch)
}

/// Load a stored raw feed (mappings, quotes, trades, system messages) in file order
pub fn load_feed_records(path: &Path) -> Result<ReplayBatch<FeedRecord>, ReplayError> {
    let file = File::open(path)?;
    let batch: ReplayBatch<FeedRecord> = read_ndjson(BufReader::new(file))?;
    info!(
        path = %path.display(),
        records = batch.records.len(),
        skipped = batch.skipped_lines,
        "Feed replay loaded"
    );
    Ok(batch)
}
