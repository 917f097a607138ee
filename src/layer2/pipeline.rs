// Flow Pipeline - feed records and chain snapshots to published signals
// Quotes: resolver -> adapter -> coordination -> bus
// Chains: analyzer -> audit log -> bus

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::config::{ConfigError, ConfigManager, FlowConfig};
use crate::core::logger::setup_logging;
use crate::core::events::{SignalBus, SignalEvent};
use crate::core::types::{InstitutionalSignal, PressureMetrics, QuoteSnapshot, SkipReason};
use crate::layer1::records::FeedRecord;
use crate::layer1::symbols::{parse_option_symbol, SymbolResolver};
use crate::layer2::adapter::{QuotePressureAdapter, SharedPressureAdapter};
use crate::layer2::reaper::IdleWindowReaper;
use crate::layer3::audit_log::{AuditLog, AuditLogError};
use crate::layer3::coordination::MultiStrikeCoordinationDetector;
use crate::layer3::volume_spike::{signal_order, ChainStrike, VolumeSpikeAnalyzer};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    AuditLog(#[from] AuditLogError),
}

/// Pipeline statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub records_seen: u64,
    pub quotes_applied: u64,
    pub trades_seen: u64,
    pub mappings_loaded: u64,
    pub system_messages: u64,
    pub windows_published: u64,
    pub coordination_signals: u64,
    pub chain_entries_scanned: u64,
    pub institutional_signals: u64,
    pub audit_failures: u64,
    pub skipped: BTreeMap<&'static str, u64>,
}

impl PipelineStats {
    pub fn total_skipped(&self) -> u64 {
        self.skipped.values().sum()
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline(records={}, quotes={}, windows={}, coordination={}, institutional={}, skipped={})",
            self.records_seen,
            self.quotes_applied,
            self.windows_published,
            self.coordination_signals,
            self.institutional_signals,
            self.total_skipped()
        )
    }
}

pub struct FlowPipeline {
    config: FlowConfig,

    // Components
    resolver: SymbolResolver,
    adapter: SharedPressureAdapter,
    coordination: Mutex<MultiStrikeCoordinationDetector>,
    analyzer: VolumeSpikeAnalyzer,
    audit_log: Option<AuditLog>,
    bus: Arc<SignalBus>,

    stats: Mutex<PipelineStats>,
}

impl FlowPipeline {
    pub fn new(config: FlowConfig) -> Result<Self, ConfigError> {
        let bus = Arc::new(SignalBus::new(config.monitoring.bus_history));
        Self::with_bus(config, bus)
    }

    /// Publish onto an existing bus
    pub fn with_bus(config: FlowConfig, bus: Arc<SignalBus>) -> Result<Self, ConfigError> {
        config.validate()?;
        let adapter = QuotePressureAdapter::new(config.pressure.clone())?.shared();

        info!(
            window_minutes = config.pressure.window_minutes,
            min_strikes = config.coordination.min_strikes,
            min_vol_oi_ratio = config.spike.min_vol_oi_ratio,
            "Flow pipeline created"
        );

        Ok(Self {
            resolver: SymbolResolver::new(),
            adapter,
            coordination: Mutex::new(MultiStrikeCoordinationDetector::new(config.coordination.clone())),
            analyzer: VolumeSpikeAnalyzer::new(config.spike.clone()),
            audit_log: None,
            bus,
            stats: Mutex::new(PipelineStats::default()),
            config,
        })
    }

    /// Full service setup: logging, audit log and pipeline from one config source
    pub fn from_config_manager(manager: &ConfigManager) -> Result<Self, PipelineError> {
        let config = manager.snapshot();
        setup_logging(Some(&config.monitoring.log_level), Some(config.monitoring.json_logs));

        let audit_log = AuditLog::open(&config.monitoring.audit_log_path)?;
        Ok(Self::new(config)?.with_audit_log(audit_log))
    }

    /// Append every institutional signal to `log`
    pub fn with_audit_log(mut self, log: AuditLog) -> Self {
        self.audit_log = Some(log);
        self
    }

    fn skip(&self, reason: &SkipReason) {
        debug!(code = reason.code(), detail = %reason, "Record skipped");
        *self.stats.lock().skipped.entry(reason.code()).or_insert(0) += 1;
    }

    /// Route one feed record. Per-record failures are counted and returned, never fatal.
    pub fn handle_record(&self, record: FeedRecord) -> Result<Option<PressureMetrics>, SkipReason> {
        self.stats.lock().records_seen += 1;

        match record {
            FeedRecord::Quote(quote) => {
                let symbol = match self.resolver.resolve(quote.instrument_id) {
                    Some(symbol) => symbol,
                    None => {
                        let reason = SkipReason::ResolutionGap(quote.instrument_id);
                        self.skip(&reason);
                        return Err(reason);
                    }
                };

                let (strike, option_type) = match parse_option_symbol(&symbol) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(instrument_id = quote.instrument_id, error = %e, "Skipping quote");
                        let reason = SkipReason::MalformedSymbol(symbol);
                        self.skip(&reason);
                        return Err(reason);
                    }
                };

                self.handle_snapshot(quote.into_snapshot(symbol, strike, option_type))
            }
            FeedRecord::Trade(trade) => {
                // Pressure is measured from resting size; trades only count
                debug!(instrument_id = trade.instrument_id, size = trade.size, "Trade");
                self.stats.lock().trades_seen += 1;
                Ok(None)
            }
            FeedRecord::SymbolMapping(mapping) => {
                self.resolver.insert(mapping.instrument_id, mapping.symbol, mapping.trading_day.as_deref());
                self.stats.lock().mappings_loaded += 1;
                Ok(None)
            }
            FeedRecord::SystemMessage(msg) => {
                info!(timestamp = msg.timestamp, message = %msg.message, "Feed system message");
                self.stats.lock().system_messages += 1;
                Ok(None)
            }
        }
    }

    /// Feed an already-resolved snapshot. Returns the window it closed, if any.
    pub fn handle_snapshot(&self, snapshot: QuoteSnapshot) -> Result<Option<PressureMetrics>, SkipReason> {
        let (closed, evicted) = {
            let mut adapter = self.adapter.lock();
            let closed = adapter.try_add_quote_snapshot(snapshot);
            (closed, adapter.take_evicted())
        };

        for metrics in evicted {
            self.process_closed(metrics);
        }

        match closed {
            Ok(closed) => {
                self.stats.lock().quotes_applied += 1;
                if let Some(metrics) = &closed {
                    self.process_closed(metrics.clone());
                }
                Ok(closed)
            }
            Err(reason) => {
                self.skip(&reason);
                Err(reason)
            }
        }
    }

    /// Publish a closed window and run it through coordination
    pub fn process_closed(&self, metrics: PressureMetrics) {
        let pressure = &self.config.pressure;
        let significant = metrics.is_significant(pressure.min_bid_size, pressure.min_pressure_ratio);
        let coordination = self.coordination.lock().observe(metrics.clone());

        self.bus.publish(SignalEvent::pressure(metrics, significant));
        let mut stats = self.stats.lock();
        stats.windows_published += 1;

        if let Some(signal) = coordination {
            stats.coordination_signals += 1;
            drop(stats);
            self.bus.publish(SignalEvent::coordination(signal));
        }
    }

    /// Scan one chain snapshot; signals come back strongest first
    pub fn scan_chain(&self, chain: &[ChainStrike], current_price: f64) -> Vec<InstitutionalSignal> {
        let mut signals = Vec::new();
        for entry in chain {
            match self.analyzer.evaluate_strike(entry, current_price) {
                Ok(signal) => signals.push(signal),
                Err(reason) => self.skip(&reason),
            }
        }
        signals.sort_by(signal_order);

        let mut audit_failures = 0;
        for signal in &signals {
            if let Some(log) = &self.audit_log {
                if let Err(e) = log.append(signal) {
                    warn!(error = %e, strike = signal.strike, "Failed to write audit record");
                    audit_failures += 1;
                }
            }
            self.bus.publish(SignalEvent::institutional(signal.clone()));
        }

        {
            let mut stats = self.stats.lock();
            stats.chain_entries_scanned += chain.len() as u64;
            stats.institutional_signals += signals.len() as u64;
            stats.audit_failures += audit_failures;
        }

        if !signals.is_empty() {
            info!(entries = chain.len(), signals = signals.len(), current_price, "Chain scan complete");
        }
        signals
    }

    /// Reaper bound to this pipeline's adapter and configured interval
    pub fn reaper(&self) -> IdleWindowReaper {
        IdleWindowReaper::new(
            self.adapter.clone(),
            Duration::from_secs(self.config.pressure.reaper_interval_secs),
        )
    }

    /// Process reaped windows until the reaper's channel closes
    pub async fn consume_reaped(&self, rx: &mut mpsc::UnboundedReceiver<PressureMetrics>) -> usize {
        let mut processed = 0;
        while let Some(metrics) = rx.recv().await {
            self.process_closed(metrics);
            processed += 1;
        }
        processed
    }

    /// Flush and publish every open window (end of session)
    pub fn shutdown(&self) -> Vec<PressureMetrics> {
        let remaining = self.adapter.lock().force_complete_all_windows();
        for metrics in &remaining {
            self.process_closed(metrics.clone());
        }
        info!(windows = remaining.len(), stats = %self.stats(), "Flow pipeline shut down");
        remaining
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    pub fn adapter(&self) -> SharedPressureAdapter {
        self.adapter.clone()
    }

    pub fn analyzer(&self) -> &VolumeSpikeAnalyzer {
        &self.analyzer
    }

    pub fn bus(&self) -> Arc<SignalBus> {
        self.bus.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::SignalPayload;
    use crate::core::types::OptionType;
    use crate::layer1::records::{QuoteRecord, SymbolMappingRecord, SystemMessageRecord, TradeRecord};

    const WINDOW: i64 = 300_000;

    fn pipeline() -> FlowPipeline {
        FlowPipeline::new(FlowConfig::default()).unwrap()
    }

    fn mapping(id: u32, symbol: &str) -> FeedRecord {
        FeedRecord::SymbolMapping(SymbolMappingRecord {
            instrument_id: id,
            symbol: symbol.to_string(),
            trading_day: Some("2025-06-02".to_string()),
        })
    }

    fn quote(id: u32, ts: i64, bid: u64, ask: u64) -> FeedRecord {
        FeedRecord::Quote(QuoteRecord {
            instrument_id: id,
            timestamp: ts,
            bid_price: 41.5,
            ask_price: 42.5,
            bid_size: bid,
            ask_size: ask,
        })
    }

    #[test]
    fn test_unresolved_and_malformed_quotes_are_counted() {
        let p = pipeline();
        assert_eq!(p.handle_record(quote(9, 0, 10, 10)), Err(SkipReason::ResolutionGap(9)));

        p.handle_record(mapping(9, "NQM5 ???")).unwrap();
        assert!(matches!(p.handle_record(quote(9, 0, 10, 10)), Err(SkipReason::MalformedSymbol(_))));

        let stats = p.stats();
        assert_eq!(stats.skipped.get("resolution_gap"), Some(&1));
        assert_eq!(stats.skipped.get("malformed_symbol"), Some(&1));
        assert_eq!(stats.records_seen, 3);
    }

    #[test]
    fn test_quote_rollover_publishes_window() {
        let p = pipeline();
        let mut rx = p.bus().subscribe();

        p.handle_record(mapping(1, "NQM5 C21900")).unwrap();
        p.handle_record(FeedRecord::SystemMessage(SystemMessageRecord {
            timestamp: 0,
            message: "Subscription request 1 succeeded".to_string(),
        }))
        .unwrap();
        p.handle_record(FeedRecord::Trade(TradeRecord {
            instrument_id: 1,
            timestamp: 5,
            price: 42.0,
            size: 3,
            aggressor: None,
        }))
        .unwrap();

        for (ts, bid, ask) in [(0, 30, 30), (60_000, 60, 25), (120_000, 85, 20)] {
            assert!(p.handle_record(quote(1, ts, bid, ask)).unwrap().is_none());
        }
        let closed = p.handle_record(quote(1, WINDOW, 30, 30)).unwrap().unwrap();
        assert_eq!(closed.option_type, OptionType::Call);
        assert_eq!(closed.bid_volume, 550.0);

        let event = rx.try_recv().unwrap();
        match event.payload {
            SignalPayload::Pressure(m) => assert_eq!(m.strike, 21900.0),
            other => panic!("unexpected payload {:?}", other),
        }

        let stats = p.stats();
        assert_eq!(stats.trades_seen, 1);
        assert_eq!(stats.system_messages, 1);
        assert_eq!(stats.windows_published, 1);
    }

    #[test]
    fn test_scan_chain_publishes_sorted_signals() {
        let p = pipeline();
        let chain = vec![
            ChainStrike {
                strike: Some(21900.0),
                option_type: Some(OptionType::Call),
                volume: Some(1200),
                open_interest: Some(100),
                last_price: Some(42.0),
                ..Default::default()
            },
            ChainStrike {
                symbol: Some("NQM5 P21840".to_string()),
                volume: Some(2750),
                open_interest: Some(50),
                last_price: Some(35.5),
                ..Default::default()
            },
            ChainStrike {
                strike: Some(22000.0),
                option_type: Some(OptionType::Call),
                volume: None,
                open_interest: Some(100),
                ..Default::default()
            },
        ];

        let signals = p.scan_chain(&chain, 21870.0);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].strike, 21840.0);
        assert_eq!(p.bus().get_recent_events(Some("institutional"), None).len(), 2);
        assert_eq!(p.stats().skipped.get("missing_field"), Some(&1));
    }

    #[test]
    fn test_from_config_manager_opens_audit_log() {
        let dir = std::env::temp_dir().join(format!("ifd-pipeline-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("flow.json");
        let audit_path = dir.join("signals.jsonl");
        let body = serde_json::json!({
            "monitoring": { "audit_log_path": audit_path.to_string_lossy(), "json_logs": false }
        });
        std::fs::write(&config_path, body.to_string()).unwrap();

        let manager = ConfigManager::new(config_path.to_str()).unwrap();

        let p = FlowPipeline::from_config_manager(&manager).unwrap();
        let signals = p.scan_chain(
            &[ChainStrike {
                strike: Some(21840.0),
                option_type: Some(OptionType::Put),
                volume: Some(2750),
                open_interest: Some(50),
                last_price: Some(35.5),
                ..Default::default()
            }],
            21870.0,
        );
        assert_eq!(signals.len(), 1);
        assert_eq!(std::fs::read_to_string(&audit_path).unwrap().lines().count(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_shutdown_drains_open_windows() {
        let p = pipeline();
        p.handle_record(mapping(1, "NQM5 C21900")).unwrap();
        p.handle_record(mapping(2, "NQM5 P21800")).unwrap();
        p.handle_record(quote(1, 0, 30, 30)).unwrap();
        p.handle_record(quote(2, 10, 30, 30)).unwrap();

        assert_eq!(p.shutdown().len(), 2);
        assert!(p.shutdown().is_empty());
        assert_eq!(p.stats().windows_published, 2);
    }
}
