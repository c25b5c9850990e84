//! Rolling latency average for a single owner (usually a session).

use parking_lot::Mutex;
use std::time::Duration;

const WINDOW: usize = 4;

#[derive(Debug, Default)]
struct Window {
    samples: [u64; WINDOW],
    count: u64,
}

/// Average over the last four reported latencies.
#[derive(Debug, Default)]
pub struct LatencySampler {
    inner: Mutex<Window>,
}

impl LatencySampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a latency sample, overwriting the oldest once the ring is full.
    pub fn add_sample(&self, value: u64) {
        let mut window = self.inner.lock();
        let slot = (window.count % WINDOW as u64) as usize;
        window.samples[slot] = value;
        window.count += 1;
    }

    pub fn add_duration(&self, latency: Duration) {
        self.add_sample(u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Mean of the four most recent samples, `None` until four were recorded.
    pub fn average(&self) -> Option<u64> {
        let window = self.inner.lock();
        if window.count < WINDOW as u64 {
            return None;
        }
        let sum: u128 = window.samples.iter().map(|&s| u128::from(s)).sum();
        Some((sum / WINDOW as u128) as u64)
    }

    pub fn sample_count(&self) -> u64 {
        self.inner.lock().count
    }
}
