// Layer 3 - Signal Detection
// Consumes closed pressure windows and chain snapshots, produces signals

// Common utilities
pub mod common;

// Same-side pressure across strikes
pub mod coordination;

// Volume/OI anomalies in chain snapshots
pub mod volume_spike;

pub mod audit_log;

pub use coordination::{detect_coordination, MultiStrikeCoordinationDetector};
pub use volume_spike::{
    filter_actionable_signals, signal_order, ActivitySummary, ChainStrike, TradePlan,
    VolumeSpikeAnalyzer,
};
pub use audit_log::{AuditLog, AuditLogError};
