// Signal Audit Log - append-only newline-delimited JSON of institutional signals

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::core::types::InstitutionalSignal;

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("Audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit log serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    written: Mutex<u64>,
}

impl AuditLog {
    /// Open for append, creating the file and its directory if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditLogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "Signal audit log opened");

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            written: Mutex::new(0),
        })
    }

    /// One JSON line per signal, flushed before returning
    pub fn append(&self, signal: &InstitutionalSignal) -> Result<(), AuditLogError> {
        let line = serde_json::to_string(signal)?;

        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        *self.written.lock() += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        *self.written.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ConfidenceTier, Direction, OptionType};

    fn signal(strike: f64) -> InstitutionalSignal {
        InstitutionalSignal {
            strike,
            option_type: OptionType::Put,
            volume: 2750,
            open_interest: 50,
            vol_oi_ratio: 55.0,
            option_price: 35.5,
            dollar_size: 1_952_500.0,
            direction: Direction::Short,
            target_price: strike,
            confidence: ConfidenceTier::Extreme,
            timestamp: 1_700_000_000_000,
            expiration_date: Some("2025-06-20".to_string()),
        }
    }

    #[test]
    fn test_append_writes_json_lines() {
        let dir = std::env::temp_dir().join(format!("ifd-audit-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("signals.jsonl");

        let log = AuditLog::open(&path).unwrap();
        log.append(&signal(21840.0)).unwrap();
        log.append(&signal(21800.0)).unwrap();
        assert_eq!(log.records_written(), 2);

        // reopening appends rather than truncating
        drop(log);
        let log = AuditLog::open(&path).unwrap();
        log.append(&signal(21750.0)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let parsed: Vec<InstitutionalSignal> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], signal(21840.0));
        assert_eq!(parsed[2].strike, 21750.0);
        assert!(contents.contains("\"confidence\":\"EXTREME\""));

        let _ = fs::remove_dir_all(dir);
    }
}
