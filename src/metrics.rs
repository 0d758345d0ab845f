// ═══════════════════════════════════════════════════════════════
// METRICS COLLECTOR - Keeping score of a race that lasts a second
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters for every race: who won, who failed, how often the
// stopwatch beat both of them, and how many losers we walked away from
// mid-request. Lock-free, because the fetchers report from their own tasks
// and nobody should wait on a mutex to say "I lost".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::models::Backend;

/// The metrics snapshot - what gets serialized into the exit log line
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub races_started: u64,
    pub viacep_wins: u64,
    pub brasilapi_wins: u64,
    pub viacep_failures: u64,
    pub brasilapi_failures: u64,
    pub timeouts: u64,
    pub losers_abandoned: u64,
    pub uptime_millis: u64,
}

/// Thread-safe atomic race counters
pub struct RaceMetrics {
    races_started: AtomicU64,
    viacep_wins: AtomicU64,
    brasilapi_wins: AtomicU64,
    viacep_failures: AtomicU64,
    brasilapi_failures: AtomicU64,
    timeouts: AtomicU64,
    losers_abandoned: AtomicU64,
    start_time: Instant,
}

impl RaceMetrics {
    pub fn new() -> Self {
        Self {
            races_started: AtomicU64::new(0),
            viacep_wins: AtomicU64::new(0),
            brasilapi_wins: AtomicU64::new(0),
            viacep_failures: AtomicU64::new(0),
            brasilapi_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            losers_abandoned: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_races(&self) {
        self.races_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_wins(&self, backend: Backend) {
        match backend {
            Backend::ViaCep => self.viacep_wins.fetch_add(1, Ordering::Relaxed),
            Backend::BrasilApi => self.brasilapi_wins.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn increment_failures(&self, backend: Backend) {
        match backend {
            Backend::ViaCep => self.viacep_failures.fetch_add(1, Ordering::Relaxed),
            Backend::BrasilApi => self.brasilapi_failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_abandoned(&self, losers: u64) {
        self.losers_abandoned.fetch_add(losers, Ordering::Relaxed);
    }

    /// Take a snapshot of all metrics (lock-free reads)
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            races_started: self.races_started.load(Ordering::Relaxed),
            viacep_wins: self.viacep_wins.load(Ordering::Relaxed),
            brasilapi_wins: self.brasilapi_wins.load(Ordering::Relaxed),
            viacep_failures: self.viacep_failures.load(Ordering::Relaxed),
            brasilapi_failures: self.brasilapi_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            losers_abandoned: self.losers_abandoned.load(Ordering::Relaxed),
            uptime_millis: u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Default for RaceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
