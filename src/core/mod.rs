// Core Module - Foundational types, config, logging, signal bus

pub mod types;
pub mod config;
pub mod logger;
pub mod events;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    PressureConfig, CoordinationConfig, SpikeThresholds, MonitoringConfig, FlowConfig,
    ConfigManager, ConfigError,
};
pub use logger::setup_logging;
pub use events::{EventPriority, SignalBus, SignalBusStatsSnapshot, SignalEvent, SignalPayload};
