use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::lock;

/// Default sliding window for speed calculation.
pub const DEFAULT_SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Default number of retained samples.
pub const DEFAULT_MAX_SAMPLES: usize = 100;

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl SpeedCalculator {
    /// Creates a calculator keeping at most `max_samples` samples no older
    /// than `window_size`.
    pub fn new(window_size: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.max(2),
                window_size,
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = lock(&self.inner);
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = lock(&self.inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        // The first sample marks the window start; its bytes were sent before it.
        let total_bytes: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(remaining_bytes as f64 / speed).ok()
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        lock(&self.inner).samples.clear();
    }

    #[cfg(test)]
    fn sample_count(&self) -> usize {
        lock(&self.inner).samples.len()
    }
}
