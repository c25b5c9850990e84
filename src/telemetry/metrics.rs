//! Execution counters for a dispatch loop.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// One hour in nanoseconds, 3 significant figures.
const HISTOGRAM_MAX_NS: u64 = 3_600_000_000_000;

/// Runtime metrics collector
#[derive(Debug)]
pub struct Metrics {
    tasks_submitted: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_panicked: AtomicU64,
    tasks_discarded: AtomicU64,
    tasks_slow: AtomicU64,
    cron_ticks: AtomicU64,

    // None if the histogram could not be allocated; durations are then
    // only counted.
    durations: Option<RwLock<Histogram<u64>>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        let durations = Histogram::new_with_max(HISTOGRAM_MAX_NS, 3)
            .map(RwLock::new)
            .ok();

        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_executed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            tasks_discarded: AtomicU64::new(0),
            tasks_slow: AtomicU64::new(0),
            cron_ticks: AtomicU64::new(0),
            durations,
            start_time: Instant::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished task and how long it ran.
    pub fn record_task_execution(&self, duration: Duration) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);

        if let Some(durations) = &self.durations {
            if let Some(mut hist) = durations.try_write() {
                let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
                let _ = hist.record(ns.min(HISTOGRAM_MAX_NS));
            }
        }
    }

    pub fn record_task_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record tasks that were accepted but dropped unrun at shutdown.
    pub fn record_discarded(&self, n: u64) {
        self.tasks_discarded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_slow_task(&self) {
        self.tasks_slow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cron_tick(&self) {
        self.cron_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg, p99, max) = match &self.durations {
            Some(durations) => {
                let hist = durations.read();
                if hist.is_empty() {
                    (0, 0, 0)
                } else {
                    (
                        hist.mean() as u64,
                        hist.value_at_quantile(0.99),
                        hist.max(),
                    )
                }
            }
            None => (0, 0, 0),
        };

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_discarded: self.tasks_discarded.load(Ordering::Relaxed),
            tasks_slow: self.tasks_slow.load(Ordering::Relaxed),
            cron_ticks: self.cron_ticks.load(Ordering::Relaxed),
            avg_duration_ns: avg,
            p99_duration_ns: p99,
            max_duration_ns: max,
        }
    }

    pub fn reset(&self) {
        self.tasks_submitted.store(0, Ordering::Relaxed);
        self.tasks_executed.store(0, Ordering::Relaxed);
        self.tasks_panicked.store(0, Ordering::Relaxed);
        self.tasks_discarded.store(0, Ordering::Relaxed);
        self.tasks_slow.store(0, Ordering::Relaxed);
        self.cron_ticks.store(0, Ordering::Relaxed);

        if let Some(durations) = &self.durations {
            durations.write().reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub tasks_submitted: u64,
    pub tasks_executed: u64,
    pub tasks_panicked: u64,
    pub tasks_discarded: u64,
    pub tasks_slow: u64,
    pub cron_ticks: u64,
    pub avg_duration_ns: u64,
    pub p99_duration_ns: u64,
    pub max_duration_ns: u64,
}

impl MetricsSnapshot {
    /// Tasks submitted but not yet finished one way or another.
    /// Approximate while the loop is live.
    pub fn backlog(&self) -> u64 {
        self.tasks_submitted.saturating_sub(
            self.tasks_executed + self.tasks_panicked + self.tasks_discarded,
        )
    }

    pub fn tasks_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.tasks_executed as f64 / seconds
    }
}
