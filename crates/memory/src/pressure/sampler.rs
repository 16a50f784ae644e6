//! Sliding window of usage samples.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One `(timestamp, used, total)` snapshot of global usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureSample {
    /// When the snapshot was taken.
    pub at: Instant,
    /// Bytes in allocated blocks across every pool.
    pub used: u64,
    /// Capacity across every pool.
    pub total: u64,
}

impl PressureSample {
    /// Snapshot at `at`.
    pub fn new(at: Instant, used: u64, total: u64) -> Self {
        Self { at, used, total }
    }

    /// `used / total`, or `0` for an empty registry.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64
        }
    }

    /// `total - used`.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }
}

/// Samples no older than `window` relative to the newest one.
#[derive(Debug, Clone)]
pub struct PressureSampler {
    samples: VecDeque<PressureSample>,
    window: Duration,
}

impl PressureSampler {
    /// Create an empty sampler keeping `window` worth of history.
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Append a sample and drop everything that fell out of the window.
    pub fn record(&mut self, sample: PressureSample) {
        self.samples.push_back(sample);
        while let Some(oldest) = self.samples.front() {
            if sample.at.saturating_duration_since(oldest.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Samples, oldest first.
    pub fn samples(&self) -> &VecDeque<PressureSample> {
        &self.samples
    }

    /// Newest sample.
    pub fn latest(&self) -> Option<&PressureSample> {
        self.samples.back()
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_drops_old_samples() {
        let t0 = Instant::now();
        let mut s = PressureSampler::new(Duration::from_secs(10));
        for i in 0..=20 {
            s.record(PressureSample::new(t0 + Duration::from_secs(i), i * 10, 1000));
        }
        assert_eq!(s.len(), 11);
        assert_eq!(s.samples().front().unwrap().used, 100);
        assert_eq!(s.latest().unwrap().used, 200);
    }

    #[test]
    fn ratio_of_empty_registry_is_zero() {
        let s = PressureSample::new(Instant::now(), 0, 0);
        assert_eq!(s.ratio(), 0.0);
        assert_eq!(s.remaining(), 0);
    }
}
