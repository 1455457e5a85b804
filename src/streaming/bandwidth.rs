//! Trailing-window throughput measurement.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bytes-per-second over a trailing window.
///
/// Purely observational: the rate is reported on the status endpoint and
/// never used to throttle.
#[derive(Debug)]
pub struct BandwidthMeter {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl BandwidthMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    pub fn record_at(&self, now: Instant, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut samples = self.samples.lock();
        samples.push_back((now, bytes));
        Self::prune(&mut samples, now, self.window);
    }

    /// Current rate in bytes per second.
    pub fn rate(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    /// Rate at `now`: bytes in the window divided by the time they span,
    /// at least one second.
    pub fn rate_at(&self, now: Instant) -> f64 {
        let mut samples = self.samples.lock();
        Self::prune(&mut samples, now, self.window);

        let Some(&(oldest, _)) = samples.front() else {
            return 0.0;
        };
        let total: u64 = samples.iter().map(|(_, bytes)| bytes).sum();
        let span = now.saturating_duration_since(oldest).max(Duration::from_secs(1));
        total as f64 / span.as_secs_f64()
    }

    fn prune(samples: &mut VecDeque<(Instant, u64)>, now: Instant, window: Duration) {
        while let Some(&(at, _)) = samples.front() {
            if now.saturating_duration_since(at) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}
