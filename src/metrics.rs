//! Engine Metrics
//!
//! Process-wide aggregate counters: per-mode totals plus running latency
//! and cost sums. The only mutable shared state in the core; every update
//! is an atomic increment so concurrent request completions never race.

use crate::router::ProcessingMode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Micro-euro fixed point used so cost can live in an atomic counter.
const COST_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Default)]
struct ModeStats {
    count: AtomicU64,
    total_time_us: AtomicU64,
    total_cost_micro: AtomicU64,
}

impl ModeStats {
    fn record(&self, elapsed: Duration, cost: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.total_cost_micro
            .fetch_add((cost.max(0.0) * COST_SCALE) as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ModeSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let time_us = self.total_time_us.load(Ordering::Relaxed);
        let cost_micro = self.total_cost_micro.load(Ordering::Relaxed);
        ModeSnapshot {
            count,
            avg_time_ms: if count == 0 {
                0.0
            } else {
                time_us as f64 / count as f64 / 1000.0
            },
            avg_cost: if count == 0 {
                0.0
            } else {
                cost_micro as f64 / count as f64 / COST_SCALE
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct EngineMetrics {
    semantic: ModeStats,
    search: ModeStats,
    legacy: ModeStats,
    failed: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, mode: ProcessingMode, elapsed: Duration, cost: f64) {
        match mode {
            ProcessingMode::SemanticTemplate => self.semantic.record(elapsed, cost),
            ProcessingMode::StructuredSearch => self.search.record(elapsed, cost),
            ProcessingMode::Legacy => self.legacy.record(elapsed, cost),
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            semantic: self.semantic.snapshot(),
            search: self.search.snapshot(),
            legacy: self.legacy.snapshot(),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeSnapshot {
    pub count: u64,
    pub avg_time_ms: f64,
    pub avg_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub semantic: ModeSnapshot,
    pub search: ModeSnapshot,
    pub legacy: ModeSnapshot,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zeroed_at_startup() {
        let snap = EngineMetrics::new().snapshot();
        assert_eq!(snap.semantic.count, 0);
        assert_eq!(snap.legacy.count, 0);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.semantic.avg_time_ms, 0.0);
    }

    #[test]
    fn records_per_mode() {
        let metrics = EngineMetrics::new();
        metrics.record(
            ProcessingMode::SemanticTemplate,
            Duration::from_millis(10),
            0.0001,
        );
        metrics.record(ProcessingMode::Legacy, Duration::from_millis(400), 0.02);
        let snap = metrics.snapshot();
        assert_eq!(snap.semantic.count, 1);
        assert_eq!(snap.legacy.count, 1);
        assert!(snap.legacy.avg_time_ms > snap.semantic.avg_time_ms);
        assert!((snap.legacy.avg_cost - 0.02).abs() < 1e-9);
    }

    #[test]
    fn concurrent_increments_do_not_lose_updates() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    m.record(
                        ProcessingMode::StructuredSearch,
                        Duration::from_micros(5),
                        0.0002,
                    );
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().search.count, 8000);
    }
}
