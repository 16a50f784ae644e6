//! Severity levels and the pressure state machine.

use std::fmt;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Discrete pressure level derived from the global usage ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Severity {
    /// Comfortable headroom.
    #[default]
    Normal,
    /// Usage is climbing; opportunistic cleanup.
    Moderate,
    /// Defragment and compress.
    High,
    /// Reclaim aggressively, degrade quality.
    Critical,
    /// Last resort before the host runs out.
    Emergency,
}

impl Severity {
    /// All levels, least severe first.
    pub const ALL: [Self; 5] = [
        Self::Normal,
        Self::Moderate,
        Self::High,
        Self::Critical,
        Self::Emergency,
    ];

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SeverityThresholds
// ---------------------------------------------------------------------------

/// Usage-ratio boundaries between severity levels.
///
/// A ratio exactly on a boundary belongs to the more severe level.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SeverityThresholds {
    /// Lower bound of `Moderate`. Default: 0.60
    pub moderate: f64,
    /// Lower bound of `High`. Default: 0.75
    pub high: f64,
    /// Lower bound of `Critical`. Default: 0.90
    pub critical: f64,
    /// Lower bound of `Emergency`. Default: 0.98
    pub emergency: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.60,
            high: 0.75,
            critical: 0.90,
            emergency: 0.98,
        }
    }
}

impl SeverityThresholds {
    /// Map a usage ratio to a level.
    pub fn classify(&self, ratio: f64) -> Severity {
        if ratio >= self.emergency {
            Severity::Emergency
        } else if ratio >= self.critical {
            Severity::Critical
        } else if ratio >= self.high {
            Severity::High
        } else if ratio >= self.moderate {
            Severity::Moderate
        } else {
            Severity::Normal
        }
    }

    /// Validate that every boundary is in `(0, 1]` and they strictly
    /// increase.
    pub fn validate(&self) -> MemoryResult<()> {
        let ordered = [self.moderate, self.high, self.critical, self.emergency];
        if ordered.iter().any(|t| t.is_nan() || *t <= 0.0 || *t > 1.0) {
            return Err(MemoryError::invalid_config(
                "severity thresholds must be in (0.0, 1.0]",
            ));
        }
        if ordered.windows(2).any(|w| w[0] >= w[1]) {
            return Err(MemoryError::invalid_config(
                "severity thresholds must strictly increase from moderate to emergency",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AlertCooldowns
// ---------------------------------------------------------------------------

/// Minimum spacing between two alerts of the same level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlertCooldowns {
    /// Default: 5 min
    pub moderate: Duration,
    /// Default: 2 min
    pub high: Duration,
    /// Default: 30s
    pub critical: Duration,
    /// Default: 1s
    pub emergency: Duration,
}

impl Default for AlertCooldowns {
    fn default() -> Self {
        Self {
            moderate: Duration::from_secs(5 * 60),
            high: Duration::from_secs(2 * 60),
            critical: Duration::from_secs(30),
            emergency: Duration::from_secs(1),
        }
    }
}

impl AlertCooldowns {
    /// Cooldown for `severity`; `None` for `Normal`, which never alerts.
    pub fn for_severity(&self, severity: Severity) -> Option<Duration> {
        match severity {
            Severity::Normal => None,
            Severity::Moderate => Some(self.moderate),
            Severity::High => Some(self.high),
            Severity::Critical => Some(self.critical),
            Severity::Emergency => Some(self.emergency),
        }
    }

    /// Cooldowns must not grow with severity.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.moderate < self.high || self.high < self.critical || self.critical < self.emergency
        {
            return Err(MemoryError::invalid_config(
                "alert cooldowns must not increase with severity",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SeverityMachine
// ---------------------------------------------------------------------------

/// What one tick did to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityUpdate {
    /// Level before the tick.
    pub from: Severity,
    /// Level after the tick.
    pub to: Severity,
    /// The sticky emergency flag was raised on this tick.
    pub emergency_entered: bool,
    /// The sticky emergency flag was cleared on this tick.
    pub emergency_cleared: bool,
    /// More than the cooldown for `to` has passed since its last alert, so
    /// an alert should be raised.
    pub alert_due: bool,
}

impl SeverityUpdate {
    /// Whether the level changed.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// Whether this was a downward transition.
    pub fn resolved(&self) -> bool {
        self.to < self.from
    }
}

/// Severity state with hysteresis and per-level alert cooldowns.
///
/// The emergency flag is raised on reaching `Critical` or above and only
/// cleared once severity falls back to `High` or below.
#[derive(Debug, Clone, Default)]
pub struct SeverityMachine {
    current: Severity,
    emergency: bool,
    last_alert: [Option<Instant>; 5],
}

impl SeverityMachine {
    /// A machine at `Normal` with no alert history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level.
    pub fn current(&self) -> Severity {
        self.current
    }

    /// Whether the sticky emergency flag is set.
    pub fn in_emergency(&self) -> bool {
        self.emergency
    }

    /// When an alert was last raised at `severity`.
    pub fn last_alert(&self, severity: Severity) -> Option<Instant> {
        self.last_alert[severity.index()]
    }

    /// Advance one tick with the latest usage ratio.
    ///
    /// When `alert_due` is reported the alert time is recorded, so the
    /// caller must raise exactly one alert for it.
    pub fn update(
        &mut self,
        ratio: f64,
        now: Instant,
        thresholds: &SeverityThresholds,
        cooldowns: &AlertCooldowns,
    ) -> SeverityUpdate {
        let from = self.current;
        let to = thresholds.classify(ratio);
        self.current = to;

        let mut emergency_entered = false;
        let mut emergency_cleared = false;
        if to >= Severity::Critical && !self.emergency {
            self.emergency = true;
            emergency_entered = true;
        } else if to <= Severity::High && self.emergency {
            self.emergency = false;
            emergency_cleared = true;
        }

        let alert_due = match cooldowns.for_severity(to) {
            None => false,
            Some(cooldown) => match self.last_alert[to.index()] {
                None => true,
                Some(last) => now.saturating_duration_since(last) > cooldown,
            },
        };
        if alert_due {
            self.last_alert[to.index()] = Some(now);
        }

        SeverityUpdate {
            from,
            to,
            emergency_entered,
            emergency_cleared,
            alert_due,
        }
    }

    /// Forget all state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
