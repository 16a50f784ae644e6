//! Recommendations and the remediation planner.
//!
//! Recommendations are cumulative by severity: each level adds its own
//! actions to those of every level below it. The final list is ordered
//! from `Critical` priority down to `Low`.

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::sampler::PressureSample;
use super::severity::Severity;
use crate::config::EmergencyActions;

/// When a recommendation should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RecommendationKind {
    /// Act now.
    Immediate,
    /// Act before pressure rises further.
    Preventive,
    /// Opportunistic housekeeping.
    Optimization,
}

/// Ordering key of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Priority {
    /// Housekeeping.
    Low,
    /// Worth doing soon.
    Medium,
    /// Do before anything optional.
    High,
    /// Do first.
    Critical,
}

/// An executable remediation step.
///
/// Actions are plain data; the [`MemoryManager`](crate::MemoryManager)
/// runs them against its own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RemediationAction {
    /// Run the cleanup pass of every consumer's retention policy.
    CleanupInactive,
    /// Coalesce every pool above its fragmentation threshold.
    DefragmentPools,
    /// Compress every eligible idle block.
    CompressInactive,
    /// Free idle low- and normal-priority blocks regardless of policy.
    AggressiveCleanup,
    /// Ask the host to render at reduced quality.
    ReduceQuality,
    /// Free every non-persistent block below `High` priority.
    EmergencyCleanup,
    /// Ask the host to suspend consumers holding only low-priority blocks.
    SuspendLowPriority,
}

impl RemediationAction {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CleanupInactive => "cleanup_inactive",
            Self::DefragmentPools => "defragment_pools",
            Self::CompressInactive => "compress_inactive",
            Self::AggressiveCleanup => "aggressive_cleanup",
            Self::ReduceQuality => "reduce_quality",
            Self::EmergencyCleanup => "emergency_cleanup",
            Self::SuspendLowPriority => "suspend_low_priority",
        }
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rough expected effect of an action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatedImpact {
    /// Bytes the action is expected to free.
    pub bytes_freed: u64,
    /// Relative cost to rendering performance in `[0, 1]`.
    pub performance_cost: f64,
    /// Expected wall time. An estimate, not a deadline.
    pub duration: Duration,
}

/// One ranked remediation step.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    /// Urgency class.
    pub kind: RecommendationKind,
    /// Ordering key.
    pub priority: Priority,
    /// The action to run.
    pub action: RemediationAction,
    /// Expected effect.
    pub impact: EstimatedImpact,
    /// Whether auto-response may run it without a human.
    pub auto_executable: bool,
}

/// Builds recommendation lists for a severity level.
#[derive(Debug, Clone, Copy)]
pub struct RemediationPlanner {
    emergency: EmergencyActions,
}

fn fraction(bytes: u64, f: f64) -> u64 {
    (bytes as f64 * f) as u64
}

impl RemediationPlanner {
    /// Planner honouring the per-action emergency toggles.
    pub fn new(emergency: EmergencyActions) -> Self {
        Self { emergency }
    }

    /// Recommendations for `severity`, highest priority first.
    pub fn plan(&self, severity: Severity, snapshot: &PressureSample) -> Vec<Recommendation> {
        let used = snapshot.used;
        let mut plan = Vec::new();
        let mut push = |kind, priority, action, freed: f64, cost, millis, auto| {
            plan.push(Recommendation {
                kind,
                priority,
                action,
                impact: EstimatedImpact {
                    bytes_freed: fraction(used, freed),
                    performance_cost: cost,
                    duration: Duration::from_millis(millis),
                },
                auto_executable: auto,
            });
        };

        if severity >= Severity::Moderate {
            push(
                RecommendationKind::Optimization,
                Priority::Low,
                RemediationAction::CleanupInactive,
                0.10,
                0.05,
                50,
                true,
            );
        }
        if severity >= Severity::High {
            push(
                RecommendationKind::Preventive,
                Priority::Medium,
                RemediationAction::DefragmentPools,
                0.05,
                0.10,
                100,
                true,
            );
            let urgent = severity >= Severity::Critical && self.emergency.emergency_compression;
            push(
                if urgent {
                    RecommendationKind::Immediate
                } else {
                    RecommendationKind::Preventive
                },
                if urgent { Priority::High } else { Priority::Medium },
                RemediationAction::CompressInactive,
                0.20,
                0.20,
                200,
                true,
            );
        }
        if severity >= Severity::Critical {
            push(
                RecommendationKind::Immediate,
                Priority::High,
                RemediationAction::AggressiveCleanup,
                0.30,
                0.30,
                100,
                self.emergency.aggressive_cleanup,
            );
            push(
                RecommendationKind::Immediate,
                Priority::High,
                RemediationAction::ReduceQuality,
                0.25,
                0.50,
                500,
                self.emergency.force_reduced_quality,
            );
        }
        if severity >= Severity::Emergency {
            push(
                RecommendationKind::Immediate,
                Priority::Critical,
                RemediationAction::EmergencyCleanup,
                0.50,
                0.60,
                100,
                self.emergency.aggressive_cleanup,
            );
            push(
                RecommendationKind::Immediate,
                Priority::Critical,
                RemediationAction::SuspendLowPriority,
                0.20,
                0.80,
                50,
                self.emergency.suspend_low_priority,
            );
        }

        plan.sort_by(|a, b| b.priority.cmp(&a.priority));
        plan
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn actions(plan: &[Recommendation]) -> Vec<RemediationAction> {
        plan.iter().map(|r| r.action).collect()
    }

    fn snapshot() -> PressureSample {
        PressureSample::new(Instant::now(), 900, 1000)
    }

    #[test]
    fn normal_has_no_recommendations() {
        let planner = RemediationPlanner::new(EmergencyActions::default());
        assert!(planner.plan(Severity::Normal, &snapshot()).is_empty());
    }

    #[test]
    fn recommendations_are_cumulative_and_sorted() {
        let planner = RemediationPlanner::new(EmergencyActions::default());
        let plan = planner.plan(Severity::Emergency, &snapshot());
        assert_eq!(plan.len(), 7);
        assert!(plan.windows(2).all(|w| w[0].priority >= w[1].priority));
        assert_eq!(plan[0].action, RemediationAction::EmergencyCleanup);
        assert_eq!(plan.last().unwrap().action, RemediationAction::CleanupInactive);

        let high = actions(&planner.plan(Severity::High, &snapshot()));
        assert_eq!(
            high,
            vec![
                RemediationAction::DefragmentPools,
                RemediationAction::CompressInactive,
                RemediationAction::CleanupInactive,
            ]
        );
    }

    #[test]
    fn emergency_toggles_gate_auto_execution() {
        let toggles = EmergencyActions {
            aggressive_cleanup: false,
            suspend_low_priority: false,
            force_reduced_quality: false,
            emergency_compression: false,
        };
        let plan = RemediationPlanner::new(toggles).plan(Severity::Emergency, &snapshot());
        for rec in &plan {
            let gated = matches!(
                rec.action,
                RemediationAction::AggressiveCleanup
                    | RemediationAction::EmergencyCleanup
                    | RemediationAction::ReduceQuality
                    | RemediationAction::SuspendLowPriority
            );
            assert_eq!(rec.auto_executable, !gated, "{}", rec.action);
        }
        let compress = plan
            .iter()
            .find(|r| r.action == RemediationAction::CompressInactive)
            .unwrap();
        assert_eq!(compress.priority, Priority::Medium);
    }
}
