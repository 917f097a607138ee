// Signal Bus for Institutional Flow
// Instance-owned pub/sub over tokio broadcast; the IFD consumer's input surface

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::broadcast;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::core::types::{ConfidenceTier, CoordinationSignal, InstitutionalSignal, PressureMetrics};

// ============================================================================
// Event Priority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum EventPriority {
    Critical = 1,  // Extreme footprints
    High = 2,      // Multi-strike coordination, very high footprints
    Medium = 3,    // Significant pressure windows, other footprints
    Low = 4,       // Routine window closes
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Signal Event
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SignalPayload {
    Pressure(PressureMetrics),
    Coordination(CoordinationSignal),
    Institutional(InstitutionalSignal),
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Pressure(_) => "pressure",
            SignalPayload::Coordination(_) => "coordination",
            SignalPayload::Institutional(_) => "institutional",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    pub event_id: String,
    pub timestamp: i64,
    pub source: String,
    pub priority: EventPriority,
    pub payload: SignalPayload,
}

impl SignalEvent {
    pub fn new(timestamp: i64, source: &str, priority: EventPriority, payload: SignalPayload) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp,
            source: source.to_string(),
            priority,
            payload,
        }
    }

    pub fn pressure(metrics: PressureMetrics, significant: bool) -> Self {
        let priority = if significant { EventPriority::Medium } else { EventPriority::Low };
        Self::new(metrics.window_end, "quote_pressure", priority, SignalPayload::Pressure(metrics))
    }

    pub fn coordination(signal: CoordinationSignal) -> Self {
        Self::new(signal.window_end, "coordination", EventPriority::High, SignalPayload::Coordination(signal))
    }

    pub fn institutional(signal: InstitutionalSignal) -> Self {
        let priority = match signal.confidence {
            ConfidenceTier::Extreme => EventPriority::Critical,
            ConfidenceTier::VeryHigh => EventPriority::High,
            ConfidenceTier::High | ConfidenceTier::Moderate => EventPriority::Medium,
        };
        Self::new(signal.timestamp, "volume_spike", priority, SignalPayload::Institutional(signal))
    }
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignalEvent(kind={}, source={}, priority={:?}, id={})",
            self.payload.kind(),
            self.source,
            self.priority,
            &self.event_id[..8]
        )
    }
}

// ============================================================================
// Signal Bus
// ============================================================================

pub struct SignalBus {
    tx: broadcast::Sender<SignalEvent>,
    history: RwLock<VecDeque<SignalEvent>>,
    max_history: usize,
    stats: RwLock<SignalBusStats>,
}

#[derive(Debug, Clone, Default)]
struct SignalBusStats {
    total_published: u64,
    total_delivered: u64,
    undelivered: u64,
}

impl SignalBus {
    pub fn new(max_history: usize) -> Self {
        let (tx, _rx) = broadcast::channel(10000);

        Self {
            tx,
            history: RwLock::new(VecDeque::with_capacity(max_history.min(10000))),
            max_history,
            stats: RwLock::new(SignalBusStats::default()),
        }
    }

    /// Publish to every live receiver and record in history
    pub fn publish(&self, event: SignalEvent) {
        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let delivered = self.tx.send(event).unwrap_or(0);

        let mut stats = self.stats.write();
        stats.total_published += 1;
        stats.total_delivered += delivered as u64;
        if delivered == 0 {
            stats.undelivered += 1;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.tx.subscribe()
    }

    /// Most recent first, optionally filtered by payload kind
    pub fn get_recent_events(&self, kind: Option<&str>, limit: Option<usize>) -> Vec<SignalEvent> {
        let history = self.history.read();
        let limit = limit.unwrap_or(100);

        history
            .iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.payload.kind() == k))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> SignalBusStatsSnapshot {
        let stats = self.stats.read();
        SignalBusStatsSnapshot {
            total_published: stats.total_published,
            total_delivered: stats.total_delivered,
            undelivered: stats.undelivered,
            subscriber_count: self.tx.receiver_count(),
            history_size: self.history.read().len(),
        }
    }

    pub fn clear_history(&self) {
        self.history.write().clear();
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(10000)
    }
}

#[derive(Debug, Clone)]
pub struct SignalBusStatsSnapshot {
    pub total_published: u64,
    pub total_delivered: u64,
    pub undelivered: u64,
    pub subscriber_count: usize,
    pub history_size: usize,
}
