//! Per-phase performance aggregates
//!
//! Running count/sum/min/max per named pipeline phase, mutated under
//! one lock on every completed call. Recording can be switched off at
//! runtime; snapshots flatten to string-keyed floats so callers can
//! serialize them directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Pipeline phase names used by the orchestrator
pub const PHASE_PREPROCESSING: &str = "preprocessing";
pub const PHASE_INFERENCE: &str = "inference";
pub const PHASE_POSTPROCESSING: &str = "postprocessing";

#[derive(Debug, Clone, Copy)]
struct PhaseAggregate {
    count: u64,
    sum_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl PhaseAggregate {
    fn record(&mut self, ms: f64) {
        self.count += 1;
        self.sum_ms += ms;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
    }
}

impl Default for PhaseAggregate {
    fn default() -> Self {
        Self {
            count: 0,
            sum_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
        }
    }
}

/// Thread-safe performance statistics aggregator
pub struct PerformanceStats {
    phases: Mutex<HashMap<String, PhaseAggregate>>,
    enabled: AtomicBool,
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phases: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Record one completed phase; no-op while monitoring is disabled
    pub fn record(&self, phase: &str, elapsed: Duration) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut phases = self.phases.lock().unwrap();
        phases.entry(phase.to_string()).or_default().record(ms);
    }

    /// Toggle recording; existing aggregates are kept
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Flattened snapshot: `{phase}_{count,avg_ms,min_ms,max_ms}`
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, f64> {
        let phases = self.phases.lock().unwrap();
        let mut out = HashMap::with_capacity(phases.len() * 4);
        for (phase, agg) in phases.iter() {
            out.insert(format!("{phase}_count"), agg.count as f64);
            let avg = if agg.count > 0 {
                agg.sum_ms / agg.count as f64
            } else {
                0.0
            };
            out.insert(format!("{phase}_avg_ms"), avg);
            let min = if agg.count > 0 { agg.min_ms } else { 0.0 };
            out.insert(format!("{phase}_min_ms"), min);
            out.insert(format!("{phase}_max_ms"), agg.max_ms);
        }
        out
    }

    /// Clear all aggregates atomically
    pub fn reset(&self) {
        self.phases.lock().unwrap().clear();
    }
}
