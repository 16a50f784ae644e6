//! Linear trend fitting over the sample window.
//!
//! Ordinary least squares of usage ratio against sample index. Slope is
//! converted to bytes per second with the newest total capacity and the
//! mean spacing between samples; confidence is R² clamped to `[0, 1]`.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::sampler::PressureSample;

/// Minimum number of samples before any trend is fitted.
pub const MIN_TREND_SAMPLES: usize = 3;

/// Confidence a trend must exceed to be reported.
pub const REPORT_CONFIDENCE: f64 = 0.7;

/// Sustained duration a trend must reach to be reported.
pub const REPORT_SUSTAINED: Duration = Duration::from_secs(5);

/// Rate at which even a stable trend is worth reporting (1 MiB/s).
pub const REPORT_RATE: f64 = 1024.0 * 1024.0;

/// Confidence a trend must exceed before exhaustion is projected.
pub const EXHAUSTION_CONFIDENCE: f64 = 0.8;

/// Direction of a fitted trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TrendDirection {
    /// Usage is growing.
    Increasing,
    /// Usage is shrinking.
    Decreasing,
    /// Slope inside the dead band.
    Stable,
}

impl TrendDirection {
    /// Whether a single step `delta` (in ratio units) agrees with this
    /// direction within `dead_band`.
    fn agrees(self, delta: f64, dead_band: f64) -> bool {
        match self {
            Self::Increasing => delta > -dead_band,
            Self::Decreasing => delta < dead_band,
            Self::Stable => delta.abs() < dead_band,
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increasing => f.write_str("increasing"),
            Self::Decreasing => f.write_str("decreasing"),
            Self::Stable => f.write_str("stable"),
        }
    }
}

/// A fitted usage trend.
#[derive(Debug, Clone, PartialEq)]
pub struct Trend {
    /// Direction of the fitted slope.
    pub direction: TrendDirection,
    /// Signed rate of change in bytes per second.
    pub rate: f64,
    /// R² of the fit, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Time covered by the newest run of samples agreeing with `direction`.
    pub sustained: Duration,
    /// Samples the trend was fitted on, oldest first.
    pub window: Vec<PressureSample>,
}

impl Trend {
    /// Whether the trend is strong enough to surface to listeners.
    pub fn should_report(&self) -> bool {
        self.confidence > REPORT_CONFIDENCE
            && self.sustained >= REPORT_SUSTAINED
            && (self.rate.abs() >= REPORT_RATE || self.direction != TrendDirection::Stable)
    }

    /// Projected time until `remaining` bytes are consumed.
    ///
    /// Only projected for confident increasing trends.
    pub fn time_to_exhaustion(&self, remaining: u64) -> Option<Duration> {
        if self.direction != TrendDirection::Increasing
            || self.confidence <= EXHAUSTION_CONFIDENCE
            || self.rate <= 0.0
        {
            return None;
        }
        Duration::try_from_secs_f64(remaining as f64 / self.rate).ok()
    }
}

/// Fits [`Trend`]s.
#[derive(Debug, Clone, Copy)]
pub struct TrendAnalyzer {
    dead_band: f64,
    sampling_interval: Duration,
}

impl TrendAnalyzer {
    /// `dead_band` is in ratio-per-sample units; `sampling_interval` is the
    /// spacing assumed when samples share a timestamp.
    pub fn new(dead_band: f64, sampling_interval: Duration) -> Self {
        Self {
            dead_band,
            sampling_interval,
        }
    }

    /// Fit a trend, or `None` with fewer than [`MIN_TREND_SAMPLES`]
    /// samples.
    pub fn analyze(&self, samples: &VecDeque<PressureSample>) -> Option<Trend> {
        let n = samples.len();
        if n < MIN_TREND_SAMPLES {
            return None;
        }
        let (first, last) = (samples.front()?, samples.back()?);

        let ys: Vec<f64> = samples.iter().map(PressureSample::ratio).collect();
        let nf = n as f64;
        let mean_x = (nf - 1.0) / 2.0;
        let mean_y = ys.iter().sum::<f64>() / nf;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (i, y) in ys.iter().enumerate() {
            let dx = i as f64 - mean_x;
            sxx += dx * dx;
            sxy += dx * (y - mean_y);
        }
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;

        let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
        let ss_res: f64 = ys
            .iter()
            .enumerate()
            .map(|(i, y)| (y - (intercept + slope * i as f64)).powi(2))
            .sum();
        let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
        let confidence = r_squared.clamp(0.0, 1.0);

        let direction = if slope.abs() < self.dead_band {
            TrendDirection::Stable
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let span = last.at.saturating_duration_since(first.at);
        let mut spacing = span.as_secs_f64() / (nf - 1.0);
        if spacing <= 0.0 {
            spacing = self.sampling_interval.as_secs_f64().max(f64::EPSILON);
        }
        let rate = slope * last.total as f64 / spacing;

        let mut run_start = n - 1;
        while run_start > 0 {
            let delta = ys[run_start] - ys[run_start - 1];
            if !direction.agrees(delta, self.dead_band) {
                break;
            }
            run_start -= 1;
        }
        let sustained = last.at.saturating_duration_since(samples[run_start].at);

        Some(Trend {
            direction,
            rate,
            confidence,
            sustained,
            window: samples.iter().copied().collect(),
        })
    }
}
