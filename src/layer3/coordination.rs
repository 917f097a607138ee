// Multi-Strike Coordination Detector
// Same-side pressure at N+ distinct strikes inside one correlation window.
// Pure fold over already-emitted PressureMetrics; no I/O.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::core::config::CoordinationConfig;
use crate::core::types::{CoordinationSignal, PressureMetrics, Side, StrikeContribution};
use crate::layer3::common::time_windows::TimeWindow;

/// Composite confidence for a set of same-side metrics.
///
/// Starts from the strongest single strike and closes part of the remaining
/// gap to 1.0 by the volume-weighted mean confidence of the group, so it is
/// strictly above the max whenever that max is below 1 and any member has
/// positive confidence.
fn composite_confidence(members: &[&PressureMetrics]) -> (f64, f64) {
    let max_c = members.iter().map(|m| m.confidence).fold(0.0_f64, f64::max);
    let total: f64 = members.iter().map(|m| m.total_volume()).sum();

    let weighted = if total > 0.0 {
        members.iter().map(|m| m.total_volume() / total * m.confidence).sum::<f64>()
    } else {
        members.iter().map(|m| m.confidence).sum::<f64>() / members.len().max(1) as f64
    };

    let composite = (max_c + (1.0 - max_c) * weighted).clamp(0.0, 1.0);
    (composite, max_c)
}

/// Strongest qualifying window per distinct strike for one side
fn side_members<'a, I>(metrics: I, side: Side, min_volume: f64) -> Vec<&'a PressureMetrics>
where
    I: IntoIterator<Item = &'a PressureMetrics>,
{
    let mut by_strike: BTreeMap<i64, &PressureMetrics> = BTreeMap::new();
    for m in metrics {
        if m.dominant_side != side || m.total_volume() < min_volume {
            continue;
        }
        let strike_key = (m.strike * 100.0).round() as i64;
        by_strike
            .entry(strike_key)
            .and_modify(|best| {
                if m.total_volume() > best.total_volume() {
                    *best = m;
                }
            })
            .or_insert(m);
    }
    by_strike.into_values().collect()
}

/// Look for coordinated positioning in a set of closed windows
pub fn detect_coordination<'a, I>(metrics: I, min_strikes: usize, min_volume: f64) -> Option<CoordinationSignal>
where
    I: IntoIterator<Item = &'a PressureMetrics> + Clone,
{
    let candidates: Vec<(Side, Vec<&PressureMetrics>)> = [Side::Buy, Side::Sell]
        .into_iter()
        .map(|side| (side, side_members(metrics.clone(), side, min_volume)))
        .filter(|(_, members)| members.len() >= min_strikes.max(1))
        .collect();

    let (side, members) = candidates.into_iter().fold(None, |best: Option<(Side, Vec<&PressureMetrics>)>, cand| {
        match best {
            Some(b) if volume_of(&b.1) >= volume_of(&cand.1) => Some(b),
            _ => Some(cand),
        }
    })?;

    let total_volume = volume_of(&members);
    let (composite, max_c) = composite_confidence(&members);

    let contributions = members
        .iter()
        .map(|m| StrikeContribution {
            strike: m.strike,
            option_type: m.option_type,
            volume: m.total_volume(),
            volume_share: if total_volume > 0.0 { m.total_volume() / total_volume } else { 0.0 },
            confidence: m.confidence,
        })
        .collect();

    Some(CoordinationSignal {
        side,
        strike_count: members.len(),
        total_volume,
        max_individual_confidence: max_c,
        composite_confidence: composite,
        window_start: members.iter().map(|m| m.time_window).min().unwrap_or(0),
        window_end: members.iter().map(|m| m.window_end).max().unwrap_or(0),
        contributions,
    })
}

/// Summed synthetic volume of a member set
fn volume_of(members: &[&PressureMetrics]) -> f64 {
    members.iter().map(|m| m.total_volume()).sum()
}

/// Rolling detector fed one closed window at a time
pub struct MultiStrikeCoordinationDetector {
    config: CoordinationConfig,
    window: TimeWindow<PressureMetrics>,
    last_fired: HashMap<Side, i64>,

    metrics_observed: u64,
    signals_emitted: u64,
    signals_suppressed: u64,
}

impl MultiStrikeCoordinationDetector {
    /// Rolling window spans `correlation_window_secs`
    pub fn new(config: CoordinationConfig) -> Self {
        let window_ms = config.correlation_window_secs * 1000;
        Self {
            window: TimeWindow::new(window_ms, 4096),
            config,
            last_fired: HashMap::new(),
            metrics_observed: 0,
            signals_emitted: 0,
            signals_suppressed: 0,
        }
    }

    /// Stateless check over an arbitrary batch, using this detector's thresholds
    pub fn detect(&self, metrics: &[PressureMetrics]) -> Option<CoordinationSignal> {
        detect_coordination(metrics.iter(), self.config.min_strikes, self.config.min_strike_volume)
    }

    /// Add a closed window and check the current correlation window.
    /// A side that already fired is quiet for one correlation window.
    pub fn observe(&mut self, metrics: PressureMetrics) -> Option<CoordinationSignal> {
        self.metrics_observed += 1;
        let closed_at = metrics.window_end;
        self.window.add(closed_at, metrics);

        let latest = self.window.last().map(|(ts, _)| *ts).unwrap_or(closed_at);
        self.window.prune(latest);

        let signal = detect_coordination(
            self.window.iter().map(|(_, m)| m),
            self.config.min_strikes,
            self.config.min_strike_volume,
        )?;

        if let Some(&last) = self.last_fired.get(&signal.side) {
            if signal.window_end - last < self.window.duration_ms() {
                self.signals_suppressed += 1;
                debug!(side = %signal.side, strikes = signal.strike_count, "Coordination already reported");
                return None;
            }
        }

        self.last_fired.insert(signal.side, signal.window_end);
        self.signals_emitted += 1;
        info!(
            side = %signal.side,
            strikes = signal.strike_count,
            total_volume = signal.total_volume,
            composite = signal.composite_confidence,
            max_individual = signal.max_individual_confidence,
            "Multi-strike coordination detected"
        );
        Some(signal)
    }

    /// Closed windows fed to `observe`
    pub fn metrics_observed(&self) -> u64 {
        self.metrics_observed
    }

    /// Coordination signals returned by `observe`
    pub fn signals_emitted(&self) -> u64 {
        self.signals_emitted
    }

    /// Detections held back by the per-side debounce
    pub fn signals_suppressed(&self) -> u64 {
        self.signals_suppressed
    }
}
