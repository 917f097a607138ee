// Configuration Management for Institutional Flow
// Plain numeric knobs - no secrets

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    pub window_minutes: i64,
    pub volume_multiplier: f64,      // Synthetic volume per contract of size change
    pub min_bid_size: u64,
    pub min_pressure_ratio: f64,

    // Window store bounds
    pub max_tracked_keys: usize,     // LRU cap on (strike, type) keys
    pub stale_after_windows: f64,    // Reaper flushes windows older than this many durations
    pub reaper_interval_secs: u64,

    // Confidence scoring
    pub saturation_volume: f64,      // Total volume that scores 1.0
    pub near_zero_volume: f64,       // Below this the window counts as static
    pub confidence_floor: f64,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            volume_multiplier: 10.0,
            min_bid_size: 50,
            min_pressure_ratio: 2.0,
            max_tracked_keys: 2000,
            stale_after_windows: 2.0,
            reaper_interval_secs: 30,
            saturation_volume: 1000.0,
            near_zero_volume: 10.0,
            confidence_floor: 0.1,
        }
    }
}

impl PressureConfig {
    pub fn window_duration_ms(&self) -> i64 {
        self.window_minutes * 60_000
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_minutes <= 0 {
            return Err(ConfigError::Validation(format!(
                "window_minutes must be positive, got {}", self.window_minutes
            )));
        }
        if !(self.volume_multiplier > 0.0) {
            return Err(ConfigError::Validation(format!(
                "volume_multiplier must be positive, got {}", self.volume_multiplier
            )));
        }
        if self.max_tracked_keys == 0 {
            return Err(ConfigError::Validation("max_tracked_keys must be at least 1".to_string()));
        }
        if !(self.stale_after_windows > 0.0) {
            return Err(ConfigError::Validation(format!(
                "stale_after_windows must be positive, got {}", self.stale_after_windows
            )));
        }
        if !(self.saturation_volume > 0.0) {
            return Err(ConfigError::Validation("saturation_volume must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(ConfigError::Validation("confidence_floor must be within [0, 1]".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub min_strikes: usize,
    pub correlation_window_secs: i64,
    pub min_strike_volume: f64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            min_strikes: 3,
            correlation_window_secs: 60,
            min_strike_volume: 100.0,
        }
    }
}

impl CoordinationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_strikes < 2 {
            return Err(ConfigError::Validation(format!(
                "min_strikes must be at least 2, got {}", self.min_strikes
            )));
        }
        if self.correlation_window_secs <= 0 {
            return Err(ConfigError::Validation("correlation_window_secs must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeThresholds {
    pub min_vol_oi_ratio: f64,
    pub min_volume: u64,
    pub min_dollar_size: f64,
    pub contract_multiplier: f64,

    // Tier cut points (vol/OI)
    pub extreme_ratio: f64,
    pub very_high_ratio: f64,
    pub high_ratio: f64,
    pub high_tier_dollar_size: f64,  // Notional that lifts MODERATE to HIGH

    // Trade plan / summary
    pub max_distance_percent: f64,
    pub bullish_call_share: f64,
    pub bearish_call_share: f64,
    pub top_strikes: usize,
}

impl Default for SpikeThresholds {
    fn default() -> Self {
        Self {
            min_vol_oi_ratio: 10.0,
            min_volume: 500,
            min_dollar_size: 100_000.0,
            contract_multiplier: 20.0,
            extreme_ratio: 50.0,
            very_high_ratio: 30.0,
            high_ratio: 20.0,
            high_tier_dollar_size: 1_000_000.0,
            max_distance_percent: 2.0,
            bullish_call_share: 0.65,
            bearish_call_share: 0.35,
            top_strikes: 5,
        }
    }
}

impl SpikeThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.contract_multiplier > 0.0) {
            return Err(ConfigError::Validation("contract_multiplier must be positive".to_string()));
        }
        if !(self.extreme_ratio >= self.very_high_ratio && self.very_high_ratio >= self.high_ratio) {
            return Err(ConfigError::Validation(
                "tier ratios must satisfy extreme >= very_high >= high".to_string(),
            ));
        }
        if self.bearish_call_share > self.bullish_call_share {
            return Err(ConfigError::Validation(
                "bearish_call_share must not exceed bullish_call_share".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub audit_log_path: String,
    pub bus_history: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: true,
            audit_log_path: "logs/institutional_signals.jsonl".to_string(),
            bus_history: 10_000,
        }
    }
}

/// All sections in one value, for handing to the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub pressure: PressureConfig,
    pub coordination: CoordinationConfig,
    pub spike: SpikeThresholds,
    pub monitoring: MonitoringConfig,
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pressure.validate()?;
        self.coordination.validate()?;
        self.spike.validate()?;
        Ok(())
    }
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    pressure: Arc<RwLock<PressureConfig>>,
    coordination: Arc<RwLock<CoordinationConfig>>,
    spike: Arc<RwLock<SpikeThresholds>>,
    monitoring: Arc<RwLock<MonitoringConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self {
            pressure: Arc::new(RwLock::new(PressureConfig::default())),
            coordination: Arc::new(RwLock::new(CoordinationConfig::default())),
            spike: Arc::new(RwLock::new(SpikeThresholds::default())),
            monitoring: Arc::new(RwLock::new(MonitoringConfig::default())),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();
        manager.validate()?;

        info!("Configuration initialized");
        Ok(manager)
    }

    /// Load configuration sections from a JSON file
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        if let Some(data) = config_data.get("pressure") {
            *self.pressure.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("coordination") {
            *self.coordination.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("spike") {
            *self.spike.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("monitoring") {
            *self.monitoring.write() = serde_json::from_value(data.clone())?;
        }

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Override knobs from IFD_* environment variables
    pub fn load_from_env(&mut self) {
        if let Some(v) = env_parse::<i64>("IFD_WINDOW_MINUTES") {
            self.pressure.write().window_minutes = v;
        }
        if let Some(v) = env_parse::<f64>("IFD_VOLUME_MULTIPLIER") {
            self.pressure.write().volume_multiplier = v;
        }
        if let Some(v) = env_parse::<u64>("IFD_MIN_BID_SIZE") {
            self.pressure.write().min_bid_size = v;
        }
        if let Some(v) = env_parse::<f64>("IFD_MIN_PRESSURE_RATIO") {
            self.pressure.write().min_pressure_ratio = v;
        }
        if let Some(v) = env_parse::<usize>("IFD_COORDINATION_MIN_STRIKES") {
            self.coordination.write().min_strikes = v;
        }
        if let Ok(level) = std::env::var("IFD_LOG_LEVEL") {
            self.monitoring.write().log_level = level;
        }
        if let Ok(path) = std::env::var("IFD_AUDIT_LOG") {
            self.monitoring.write().audit_log_path = path;
        }
    }

    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        let mut config_map = HashMap::new();
        config_map.insert("pressure", serde_json::to_value(&*self.pressure.read())?);
        config_map.insert("coordination", serde_json::to_value(&*self.coordination.read())?);
        config_map.insert("spike", serde_json::to_value(&*self.spike.read())?);
        config_map.insert("monitoring", serde_json::to_value(&*self.monitoring.read())?);

        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&config_map)?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    /// Construction-time problems are fatal
    pub fn validate(&self) -> Result<(), ConfigError> {
        let result = self.snapshot().validate();
        if let Err(e) = &result {
            warn!(error = %e, "Config validation error");
        }
        result
    }

    pub fn snapshot(&self) -> FlowConfig {
        FlowConfig {
            pressure: self.pressure(),
            coordination: self.coordination(),
            spike: self.spike(),
            monitoring: self.monitoring(),
        }
    }

    pub fn pressure(&self) -> PressureConfig {
        self.pressure.read().clone()
    }

    pub fn coordination(&self) -> CoordinationConfig {
        self.coordination.read().clone()
    }

    pub fn spike(&self) -> SpikeThresholds {
        self.spike.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.read().clone()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparsable env override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let pressure = PressureConfig::default();
        assert_eq!(pressure.window_minutes, 5);
        assert_eq!(pressure.volume_multiplier, 10.0);
        assert_eq!(pressure.min_bid_size, 50);
        assert_eq!(pressure.window_duration_ms(), 300_000);

        let spike = SpikeThresholds::default();
        assert_eq!(spike.min_vol_oi_ratio, 10.0);
        assert_eq!(spike.min_volume, 500);
        assert_eq!(spike.min_dollar_size, 100_000.0);

        assert_eq!(CoordinationConfig::default().min_strikes, 3);
        assert!(FlowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_non_positive_window_rejected() {
        let mut pressure = PressureConfig::default();
        pressure.window_minutes = 0;
        assert!(matches!(pressure.validate(), Err(ConfigError::Validation(_))));
        pressure.window_minutes = -5;
        assert!(pressure.validate().is_err());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let pressure: PressureConfig = serde_json::from_str(r#"{"window_minutes": 15}"#).unwrap();
        assert_eq!(pressure.window_minutes, 15);
        assert_eq!(pressure.min_bid_size, 50);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!("ifd_config_{}.json", uuid::Uuid::new_v4()));
        let path_str = path.to_string_lossy().to_string();

        let manager = ConfigManager::new(None).unwrap();
        manager.pressure.write().window_minutes = 10;
        manager.save_to_file(&path_str).unwrap();

        let reloaded = ConfigManager::new(Some(&path_str)).unwrap();
        assert_eq!(reloaded.pressure().window_minutes, 10);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        let manager = ConfigManager::new(Some("/nonexistent/ifd_config.json")).unwrap();
        assert_eq!(manager.spike().contract_multiplier, 20.0);
    }
}
