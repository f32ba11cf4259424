//! Vision fallback gate.
//!
//! Decides whether a primary OCR result is weak enough to justify the
//! vision model, and protects that model with a circuit breaker. The gate
//! also watches the fallback rate over a sliding window and tightens its
//! own thresholds when the rate climbs, since every fallback call costs
//! money.
//!
//! Process-wide singleton state: construct one gate per process, share it
//! behind `Arc`, and use [`VisionGate::reset`] between test scenarios.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::VisionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Baseline thresholds per image resolution. Larger captures should OCR
/// well, so they must clear a higher bar before the fallback is considered.
pub fn resolution_band(width: u32, height: u32) -> (&'static str, f64, u32) {
    let pixels = width as u64 * height as u64;
    if pixels <= 921_600 {
        ("low", 0.55, 8)
    } else if pixels <= 2_073_600 {
        ("hd", 0.62, 10)
    } else if pixels <= 3_686_400 {
        ("fullhd", 0.68, 12)
    } else {
        ("4k", 0.72, 15)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdAdjustment {
    pub at: chrono::DateTime<chrono::Utc>,
    pub old_confidence: f64,
    pub new_confidence: f64,
    pub old_lines: u32,
    pub new_lines: u32,
}

/// Introspection snapshot exposed over the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub fallback_rate: f64,
    pub total_requests: u64,
    pub fallback_requests: u64,
    pub current_min_confidence: f64,
    pub current_min_lines: u32,
    pub adjustments: usize,
}

struct GateState {
    circuit: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    // (sample time, used_fallback); pruned lazily against the window.
    history: Vec<(Instant, bool)>,
    total_requests: u64,
    fallback_requests: u64,
    confidence_bump: f64,
    lines_bump: u32,
    adjustments: Vec<ThresholdAdjustment>,
}

impl GateState {
    fn fresh() -> Self {
        Self {
            circuit: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            history: Vec::new(),
            total_requests: 0,
            fallback_requests: 0,
            confidence_bump: 0.0,
            lines_bump: 0,
            adjustments: Vec::new(),
        }
    }

    fn prune(&mut self, window: Duration, now: Instant) {
        self.history
            .retain(|(at, _)| now.duration_since(*at) <= window);
    }

    fn fallback_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let used = self.history.iter().filter(|(_, f)| *f).count();
        used as f64 / self.history.len() as f64
    }
}

pub struct VisionGate {
    config: VisionConfig,
    state: Mutex<GateState>,
}

impl VisionGate {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GateState::fresh()),
        }
    }

    /// Decide whether the fallback runs for an OCR result of the given
    /// quality on an image of the given size.
    pub fn should_use_fallback(
        &self,
        mean_confidence: f64,
        quantity_lines: u32,
        width: u32,
        height: u32,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }

        let now = Instant::now();
        let mut state = self.lock();

        if state.circuit == CircuitState::Open {
            let recovered = state
                .opened_at
                .map(|at| now.duration_since(at) >= Duration::from_secs(self.config.recovery_timeout_secs))
                .unwrap_or(false);
            if recovered {
                tracing::info!("vision circuit entering half-open");
                state.circuit = CircuitState::HalfOpen;
            } else {
                return false;
            }
        }

        state.prune(Duration::from_secs(self.config.monitoring_window_secs), now);
        if state.fallback_rate() > self.config.max_fallback_rate {
            self.tighten(&mut state);
            return false;
        }

        let (band, base_conf, base_lines) = resolution_band(width, height);
        let min_conf = (base_conf + state.confidence_bump).min(0.95);
        let min_lines = (base_lines + state.lines_bump).min(20);
        let wanted = mean_confidence < min_conf || quantity_lines < min_lines;
        if wanted {
            tracing::debug!(
                band,
                mean_confidence,
                quantity_lines,
                min_conf,
                min_lines,
                "vision fallback gate opened for request"
            );
        }
        wanted
    }

    /// Record one pipeline request and whether it used the fallback. Feeds
    /// the sliding-window rate.
    pub fn record_request(&self, used_fallback: bool) {
        let now = Instant::now();
        let mut state = self.lock();
        state.history.push((now, used_fallback));
        state.total_requests += 1;
        if used_fallback {
            state.fallback_requests += 1;
        }
        state.prune(Duration::from_secs(self.config.monitoring_window_secs), now);
    }

    /// A vision call succeeded.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.circuit == CircuitState::HalfOpen {
            tracing::info!("vision circuit closing after successful probe");
            state.circuit = CircuitState::Closed;
        }
        state.failure_count = 0;
    }

    /// A vision call failed.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.failure_count += 1;
        state.last_failure_at = Some(now);

        if state.circuit == CircuitState::HalfOpen {
            tracing::warn!("vision circuit reopening after half-open failure");
            state.circuit = CircuitState::Open;
            state.opened_at = Some(now);
        } else if state.circuit == CircuitState::Closed
            && state.failure_count >= self.config.failure_threshold
        {
            tracing::warn!(
                failures = state.failure_count,
                "vision circuit opening"
            );
            state.circuit = CircuitState::Open;
            state.opened_at = Some(now);
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.lock().circuit
    }

    pub fn fallback_rate(&self) -> f64 {
        let now = Instant::now();
        let mut state = self.lock();
        state.prune(Duration::from_secs(self.config.monitoring_window_secs), now);
        state.fallback_rate()
    }

    pub fn status(&self) -> GateStatus {
        let now = Instant::now();
        let mut state = self.lock();
        state.prune(Duration::from_secs(self.config.monitoring_window_secs), now);
        GateStatus {
            state: state.circuit,
            failure_count: state.failure_count,
            fallback_rate: state.fallback_rate(),
            total_requests: state.total_requests,
            fallback_requests: state.fallback_requests,
            current_min_confidence: (self.config.min_confidence + state.confidence_bump).min(0.95),
            current_min_lines: (self.config.min_lines + state.lines_bump).min(20),
            adjustments: state.adjustments.len(),
        }
    }

    /// Return to the initial state, keeping configuration.
    pub fn reset(&self) {
        *self.lock() = GateState::fresh();
        tracing::info!("vision gate reset");
    }

    fn tighten(&self, state: &mut GateState) {
        let old_conf = (self.config.min_confidence + state.confidence_bump).min(0.95);
        let old_lines = (self.config.min_lines + state.lines_bump).min(20);
        state.confidence_bump += 0.05;
        state.lines_bump += 2;
        let new_conf = (self.config.min_confidence + state.confidence_bump).min(0.95);
        let new_lines = (self.config.min_lines + state.lines_bump).min(20);
        state.adjustments.push(ThresholdAdjustment {
            at: chrono::Utc::now(),
            old_confidence: old_conf,
            new_confidence: new_conf,
            old_lines,
            new_lines,
        });
        tracing::warn!(
            old_conf,
            new_conf,
            old_lines,
            new_lines,
            "fallback rate over ceiling, thresholds tightened"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
