// Idle Window Reaper - closes windows on strikes that stopped quoting
// Runs on its own tokio task, off the ingestion path; completed metrics
// leave over an mpsc channel. Shutdown force-flushes everything still open.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::core::types::PressureMetrics;
use crate::layer2::adapter::SharedPressureAdapter;

/// Source of "now" in epoch milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    })
}

#[derive(Debug, Clone, Default)]
pub struct ReaperStats {
    pub sweeps: u64,
    pub windows_reaped: u64,
    pub windows_flushed_on_shutdown: u64,
    pub send_failures: u64,
}

pub struct IdleWindowReaper {
    adapter: SharedPressureAdapter,
    interval: Duration,
    clock: Clock,
}

impl IdleWindowReaper {
    pub fn new(adapter: SharedPressureAdapter, interval: Duration) -> Self {
        Self {
            adapter,
            interval,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// One sweep: stale windows plus anything the key cap pushed out
    pub fn sweep(&self) -> Vec<PressureMetrics> {
        let now = (self.clock)();
        let mut adapter = self.adapter.lock();
        let mut reaped = adapter.take_evicted();
        reaped.extend(adapter.flush_stale(now));
        reaped
    }

    /// Start the periodic task. Must be called inside a tokio runtime.
    pub fn spawn(self, tx: mpsc::UnboundedSender<PressureMetrics>) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut stats = ReaperStats::default();
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_ms = self.interval.as_millis() as u64, "Idle window reaper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        stats.sweeps += 1;
                        let reaped = self.sweep();
                        if !reaped.is_empty() {
                            debug!(windows = reaped.len(), "Reaper closed idle windows");
                        }
                        stats.windows_reaped += reaped.len() as u64;
                        stats.send_failures += forward(&tx, reaped);
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }

            let remaining = self.adapter.lock().force_complete_all_windows();
            stats.windows_flushed_on_shutdown = remaining.len() as u64;
            stats.send_failures += forward(&tx, remaining);

            info!(
                sweeps = stats.sweeps,
                reaped = stats.windows_reaped,
                flushed = stats.windows_flushed_on_shutdown,
                "Idle window reaper stopped"
            );
            stats
        });

        ReaperHandle { shutdown_tx, join }
    }
}

fn forward(tx: &mpsc::UnboundedSender<PressureMetrics>, metrics: Vec<PressureMetrics>) -> u64 {
    let mut failures = 0;
    for m in metrics {
        if tx.send(m).is_err() {
            failures += 1;
        }
    }
    if failures > 0 {
        warn!(failures, "Reaper output channel closed, metrics dropped");
    }
    failures
}

pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<ReaperStats>,
}

impl ReaperHandle {
    /// Signal shutdown and wait for the final flush
    pub async fn shutdown(self) -> ReaperStats {
        let _ = self.shutdown_tx.send(true);
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Reaper task failed");
                ReaperStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PressureConfig;
    use crate::core::types::{OptionType, QuoteSnapshot};
    use crate::layer2::adapter::QuotePressureAdapter;

    const WINDOW: i64 = 300_000;

    fn quote(ts: i64, strike: f64) -> QuoteSnapshot {
        QuoteSnapshot {
            timestamp: ts,
            symbol: format!("NQM5 C{}", strike),
            strike,
            option_type: OptionType::Call,
            bid_size: 30,
            ask_size: 30,
            bid_price: 41.0,
            ask_price: 42.0,
        }
    }

    fn shared() -> SharedPressureAdapter {
        QuotePressureAdapter::new(PressureConfig::default()).unwrap().shared()
    }

    #[test]
    fn test_sweep_uses_clock() {
        let adapter = shared();
        adapter.lock().add_quote_snapshot(quote(0, 21800.0));
        adapter.lock().add_quote_snapshot(quote(3 * WINDOW, 21900.0));

        let reaper = IdleWindowReaper::new(adapter.clone(), Duration::from_secs(30))
            .with_clock(Arc::new(|| 3 * WINDOW + 1));
        let reaped = reaper.sweep();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].strike, 21800.0);
        assert_eq!(adapter.lock().open_windows(), 1);
    }

    #[tokio::test]
    async fn test_reaper_sends_idle_windows_and_flushes_on_shutdown() {
        let adapter = shared();
        adapter.lock().add_quote_snapshot(quote(0, 21800.0));
        adapter.lock().add_quote_snapshot(quote(10 * WINDOW, 21900.0));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = IdleWindowReaper::new(adapter.clone(), Duration::from_millis(10))
            .with_clock(Arc::new(|| 10 * WINDOW + 1))
            .spawn(tx);

        // first tick fires immediately
        let idle = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(idle.strike, 21800.0);

        let stats = handle.shutdown().await;
        assert_eq!(stats.windows_reaped, 1);
        assert_eq!(stats.windows_flushed_on_shutdown, 1);

        let flushed = rx.recv().await.unwrap();
        assert_eq!(flushed.strike, 21900.0);
        assert!(rx.recv().await.is_none());
        assert_eq!(adapter.lock().open_windows(), 0);
    }
}
