//! Memory pressure monitoring.
//!
//! Each tick feeds one [`PressureSample`] through the pipeline:
//!
//! 1. [`PressureSampler`] appends it to the sliding window.
//! 2. [`TrendAnalyzer`] fits a line over the window.
//! 3. [`SeverityMachine`] classifies the usage ratio and decides whether an
//!    alert is due.
//! 4. [`RemediationPlanner`] attaches ranked recommendations to the alert.
//!
//! [`PressureMonitor`] owns all four. It never touches pools itself:
//! executing recommendations is left to the caller.

mod alert;
mod remediation;
mod sampler;
mod severity;
mod trend;

pub use alert::{Alert, AlertHistory};
pub use remediation::{
    EstimatedImpact, Priority, Recommendation, RecommendationKind, RemediationAction,
    RemediationPlanner,
};
pub use sampler::{PressureSample, PressureSampler};
pub use severity::{AlertCooldowns, Severity, SeverityMachine, SeverityThresholds, SeverityUpdate};
pub use trend::{
    EXHAUSTION_CONFIDENCE, MIN_TREND_SAMPLES, REPORT_CONFIDENCE, REPORT_RATE, REPORT_SUSTAINED,
    Trend, TrendAnalyzer, TrendDirection,
};

use std::time::Duration;

use crate::config::MonitorConfig;

/// Everything one tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// The sample fed in.
    pub sample: PressureSample,
    /// Severity transition.
    pub update: SeverityUpdate,
    /// Fitted trend, if the window held enough samples.
    pub trend: Option<Trend>,
    /// Projected time to exhaustion, set only when it falls under the
    /// configured horizon.
    pub exhaustion_warning: Option<Duration>,
    /// Alert raised on this tick.
    pub alert: Option<Alert>,
}

impl TickOutcome {
    /// The fitted trend, if it passes the reporting filter.
    pub fn reportable_trend(&self) -> Option<&Trend> {
        self.trend.as_ref().filter(|t| t.should_report())
    }
}

/// Sampler, analyzer, state machine and planner for one manager.
#[derive(Debug, Clone)]
pub struct PressureMonitor {
    config: MonitorConfig,
    sampler: PressureSampler,
    analyzer: TrendAnalyzer,
    machine: SeverityMachine,
    planner: RemediationPlanner,
    history: AlertHistory,
    alerts_raised: u64,
}

impl PressureMonitor {
    /// Create a monitor at `Normal` with an empty window.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            sampler: PressureSampler::new(config.trend_window),
            analyzer: TrendAnalyzer::new(config.dead_band, config.sampling_interval),
            machine: SeverityMachine::new(),
            planner: RemediationPlanner::new(config.emergency),
            history: AlertHistory::new(config.alert_history_limit, config.alert_history_max_age),
            alerts_raised: 0,
            config,
        }
    }

    /// Run one tick.
    ///
    /// Severity only ever changes here.
    pub fn tick(&mut self, sample: PressureSample) -> TickOutcome {
        self.sampler.record(sample);
        let trend = self.analyzer.analyze(self.sampler.samples());

        let update = self.machine.update(
            sample.ratio(),
            sample.at,
            &self.config.thresholds,
            &self.config.cooldowns,
        );

        let time_to_exhaustion = trend
            .as_ref()
            .and_then(|t| t.time_to_exhaustion(sample.remaining()));
        let exhaustion_warning = time_to_exhaustion.filter(|eta| *eta < self.config.exhaustion_horizon);

        let alert = update.alert_due.then(|| Alert {
            severity: update.to,
            at: sample.at,
            snapshot: sample,
            trend: trend.clone(),
            time_to_exhaustion,
            recommendations: self.planner.plan(update.to, &sample),
            executed: Vec::new(),
        });
        if let Some(alert) = &alert {
            self.alerts_raised += 1;
            self.history.push(alert.clone());
        } else {
            self.history.prune(sample.at);
        }

        TickOutcome {
            sample,
            update,
            trend,
            exhaustion_warning,
            alert,
        }
    }

    /// Record which actions auto-response ran for the latest alert.
    pub(crate) fn record_auto_response(&mut self, executed: &[RemediationAction]) {
        if let Some(alert) = self.history.latest_mut() {
            alert.executed = executed.to_vec();
        }
    }

    /// Current severity.
    pub fn severity(&self) -> Severity {
        self.machine.current()
    }

    /// Whether the sticky emergency flag is set.
    pub fn in_emergency(&self) -> bool {
        self.machine.in_emergency()
    }

    /// Newest sample.
    pub fn latest_sample(&self) -> Option<&PressureSample> {
        self.sampler.latest()
    }

    /// Alert history.
    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    /// Alerts raised since construction or the last [`reset`](Self::reset),
    /// including pruned ones.
    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised
    }

    /// Monitor settings.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Back to `Normal` with an empty window and history and a zero alert
    /// count.
    pub fn reset(&mut self) {
        self.sampler.clear();
        self.machine.reset();
        self.history.clear();
        self.alerts_raised = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn scenario_b_severity_sequence() {
        let mut monitor = PressureMonitor::new(MonitorConfig::default());
        let t0 = Instant::now();
        let mut severities = Vec::new();
        let mut alerts = Vec::new();
        for (i, used) in [50, 65, 80, 96].into_iter().enumerate() {
            let outcome = monitor.tick(PressureSample::new(
                t0 + Duration::from_secs(i as u64),
                used,
                100,
            ));
            severities.push(outcome.update.to);
            if let Some(alert) = outcome.alert {
                alerts.push(alert.severity);
            }
            if used == 96 {
                assert!(outcome.update.emergency_entered);
            }
        }
        assert_eq!(
            severities,
            vec![
                Severity::Normal,
                Severity::Moderate,
                Severity::High,
                Severity::Critical
            ]
        );
        assert_eq!(
            alerts,
            vec![Severity::Moderate, Severity::High, Severity::Critical]
        );
        assert!(monitor.in_emergency());
        assert_eq!(monitor.history().len(), 3);
    }

    #[test]
    fn exhaustion_warning_under_horizon() {
        let mut monitor = PressureMonitor::new(MonitorConfig::default());
        let t0 = Instant::now();
        let mut last = None;
        for i in 0..6u64 {
            last = Some(monitor.tick(PressureSample::new(
                t0 + Duration::from_secs(i),
                400 + i * 100,
                2000,
            )));
        }
        let outcome = last.unwrap();
        // 1100 remaining at 100 bytes/s.
        let eta = outcome.exhaustion_warning.unwrap();
        assert!((eta.as_secs_f64() - 11.0).abs() < 0.01);
    }
}
