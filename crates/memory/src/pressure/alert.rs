//! Alerts and the bounded alert history.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::remediation::{Recommendation, RemediationAction};
use super::sampler::PressureSample;
use super::severity::Severity;
use super::trend::Trend;

/// A cooldown-gated notification that usage reached a severity level.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Level the alert was raised at.
    pub severity: Severity,
    /// When it was raised.
    pub at: Instant,
    /// Usage at that tick.
    pub snapshot: PressureSample,
    /// Trend at that tick, if one could be fitted.
    pub trend: Option<Trend>,
    /// Projected time until capacity runs out.
    pub time_to_exhaustion: Option<Duration>,
    /// Ranked remediation steps, highest priority first.
    pub recommendations: Vec<Recommendation>,
    /// Actions auto-response ran successfully for this alert.
    pub executed: Vec<RemediationAction>,
}

impl Alert {
    /// Whether auto-response acted on this alert.
    pub fn auto_response_taken(&self) -> bool {
        !self.executed.is_empty()
    }
}

/// Alerts pruned by count and by age.
#[derive(Debug, Clone)]
pub struct AlertHistory {
    alerts: VecDeque<Alert>,
    limit: usize,
    max_age: Duration,
}

impl AlertHistory {
    /// Keep at most `limit` alerts, none older than `max_age`.
    pub fn new(limit: usize, max_age: Duration) -> Self {
        Self {
            alerts: VecDeque::with_capacity(limit.min(256)),
            limit,
            max_age,
        }
    }

    /// Append an alert and prune.
    pub fn push(&mut self, alert: Alert) {
        let now = alert.at;
        self.alerts.push_back(alert);
        self.prune(now);
    }

    /// Drop alerts beyond the count limit or older than `max_age`.
    pub fn prune(&mut self, now: Instant) {
        while self.alerts.len() > self.limit {
            self.alerts.pop_front();
        }
        while self
            .alerts
            .front()
            .is_some_and(|a| now.saturating_duration_since(a.at) > self.max_age)
        {
            self.alerts.pop_front();
        }
    }

    /// Most recent alert.
    pub fn latest(&self) -> Option<&Alert> {
        self.alerts.back()
    }

    /// Mutable access to the most recent alert.
    pub(crate) fn latest_mut(&mut self) -> Option<&mut Alert> {
        self.alerts.back_mut()
    }

    /// Alerts, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    /// Number of alerts held.
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Owned copy of the history, oldest first.
    pub fn to_vec(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    /// Drop every alert.
    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(at: Instant) -> Alert {
        Alert {
            severity: Severity::High,
            at,
            snapshot: PressureSample::new(at, 80, 100),
            trend: None,
            time_to_exhaustion: None,
            recommendations: Vec::new(),
            executed: Vec::new(),
        }
    }

    #[test]
    fn pruned_by_count() {
        let t0 = Instant::now();
        let mut h = AlertHistory::new(3, Duration::from_secs(3600));
        for i in 0..5 {
            h.push(alert(t0 + Duration::from_secs(i)));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.iter().next().unwrap().at, t0 + Duration::from_secs(2));
    }

    #[test]
    fn pruned_by_age() {
        let t0 = Instant::now();
        let mut h = AlertHistory::new(100, Duration::from_secs(60));
        h.push(alert(t0));
        h.push(alert(t0 + Duration::from_secs(30)));
        h.push(alert(t0 + Duration::from_secs(90)));
        assert_eq!(h.len(), 2);
        assert!(!h.latest().unwrap().auto_response_taken());
    }
}
