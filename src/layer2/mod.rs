// Layer 2 - Quote-pressure windowing
// Snapshots -> keyed windows -> scored PressureMetrics, plus the pipeline that drives it

pub mod window_store;
pub mod confidence;
pub mod adapter;
pub mod reaper;
pub mod pipeline;

// Re-export commonly used items
pub use window_store::{WindowAccumulator, WindowStore, ApplyOutcome};
pub use confidence::ConfidenceScorer;
pub use adapter::{QuotePressureAdapter, SharedPressureAdapter, AdapterStats};
pub use reaper::{IdleWindowReaper, ReaperHandle, ReaperStats, Clock, system_clock};
pub use pipeline::{FlowPipeline, PipelineError, PipelineStats};
