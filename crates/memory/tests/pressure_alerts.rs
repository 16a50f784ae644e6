//! Severity classification, alert cooldowns and auto-response.

use std::sync::Arc;
use std::time::Duration;

use lumen_memory::pressure::SeverityThresholds;
use lumen_memory::prelude::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio::sync::broadcast;

fn manager(config: MemoryConfig) -> (MemoryManager, Arc<ManualClock>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let clock = Arc::new(ManualClock::new());
    let manager = MemoryManager::with_clock(config, clock.clone()).unwrap();
    (manager, clock)
}

fn drain(rx: &mut broadcast::Receiver<MemoryEvent>) -> Vec<MemoryEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn alerts(events: &[MemoryEvent]) -> Vec<Severity> {
    events
        .iter()
        .filter_map(|e| match e {
            MemoryEvent::Alert(alert) => Some(alert.severity),
            _ => None,
        })
        .collect()
}

#[rstest]
#[case(0.0, Severity::Normal)]
#[case(0.59, Severity::Normal)]
#[case(0.60, Severity::Moderate)]
#[case(0.74, Severity::Moderate)]
#[case(0.75, Severity::High)]
#[case(0.89, Severity::High)]
#[case(0.90, Severity::Critical)]
#[case(0.97, Severity::Critical)]
#[case(0.98, Severity::Emergency)]
#[case(1.0, Severity::Emergency)]
fn thresholds_are_inclusive(#[case] ratio: f64, #[case] expected: Severity) {
    assert_eq!(SeverityThresholds::default().classify(ratio), expected);
}

#[rstest]
#[case(Duration::from_secs(60), false)]
#[case(Duration::from_secs(119), false)]
#[case(Duration::from_secs(120), false)]
#[case(Duration::from_secs(121), true)]
fn high_alert_respects_cooldown(#[case] wait: Duration, #[case] repeats: bool) {
    let (m, clock) = manager(MemoryConfig::single_pool(PoolCategory::Texture, 100));
    let mut rx = m.subscribe();
    assert!(
        m.allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 80))
            .is_success()
    );

    m.sample().unwrap();
    assert_eq!(alerts(&drain(&mut rx)), vec![Severity::High]);

    clock.advance(wait);
    m.sample().unwrap();
    let expected = if repeats { vec![Severity::High] } else { vec![] };
    assert_eq!(alerts(&drain(&mut rx)), expected);
    assert_eq!(m.severity(), Severity::High);
}

#[test]
fn normal_never_alerts() {
    let (m, clock) = manager(MemoryConfig::single_pool(PoolCategory::Texture, 100));
    let mut rx = m.subscribe();
    for _ in 0..5 {
        m.sample().unwrap();
        clock.advance(Duration::from_secs(600));
    }
    assert!(alerts(&drain(&mut rx)).is_empty());
    assert!(m.alert_history().is_empty());
}

#[test]
fn alert_carries_ranked_recommendations() {
    let (m, _) = manager(MemoryConfig::single_pool(PoolCategory::Texture, 100));
    assert!(
        m.allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 92))
            .is_success()
    );
    let alert = m.sample().unwrap().unwrap().alert.unwrap();

    assert_eq!(alert.severity, Severity::Critical);
    let actions: Vec<RemediationAction> =
        alert.recommendations.iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![
            RemediationAction::CompressInactive,
            RemediationAction::AggressiveCleanup,
            RemediationAction::ReduceQuality,
            RemediationAction::DefragmentPools,
            RemediationAction::CleanupInactive,
        ]
    );
    // Auto-response is off in the testing preset.
    assert!(!alert.auto_response_taken());
}

// ---------------------------------------------------------------------------
// Auto-response
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingController {
    reduced: Mutex<Vec<ConsumerId>>,
    suspended: Mutex<Vec<ConsumerId>>,
}

impl ConsumerController for RecordingController {
    fn reduce_quality(&self, consumer: &ConsumerId) -> MemoryResult<()> {
        self.reduced.lock().push(consumer.clone());
        Ok(())
    }

    fn suspend(&self, consumer: &ConsumerId) -> MemoryResult<()> {
        self.suspended.lock().push(consumer.clone());
        Ok(())
    }
}

fn auto_config() -> MemoryConfig {
    MemoryConfig::single_pool(PoolCategory::Texture, 100).with_auto_response(true)
}

fn auto_response(events: &[MemoryEvent]) -> (Vec<RemediationAction>, Vec<RemediationAction>, u64) {
    events
        .iter()
        .find_map(|e| match e {
            MemoryEvent::AutoResponse {
                executed,
                failed,
                bytes_freed,
                ..
            } => Some((executed.clone(), failed.clone(), *bytes_freed)),
            _ => None,
        })
        .unwrap()
}

#[test]
fn auto_response_skips_failed_actions() {
    let (m, clock) = manager(auto_config());
    let mut rx = m.subscribe();
    assert!(
        m.allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 96))
            .is_success()
    );
    clock.advance(Duration::from_secs(31));

    let alert = m.sample().unwrap().unwrap().alert.unwrap();
    let events = drain(&mut rx);
    let (executed, failed, bytes_freed) = auto_response(&events);

    // No controller: quality reduction fails, everything else runs.
    assert_eq!(failed, vec![RemediationAction::ReduceQuality]);
    assert_eq!(
        executed,
        vec![
            RemediationAction::CompressInactive,
            RemediationAction::AggressiveCleanup,
            RemediationAction::DefragmentPools,
            RemediationAction::CleanupInactive,
        ]
    );
    // 39 bytes released by compression, the remaining 57 by aggressive cleanup.
    assert_eq!(bytes_freed, 96);
    assert_eq!(m.usage(), (0, 100));

    assert_eq!(alert.executed, executed);
    assert_eq!(m.alert_history().last().unwrap().executed, executed);

    // AutoResponse is published before the alert it belongs to.
    let auto_at = events
        .iter()
        .position(|e| matches!(e, MemoryEvent::AutoResponse { .. }))
        .unwrap();
    let alert_at = events
        .iter()
        .position(|e| matches!(e, MemoryEvent::Alert(_)))
        .unwrap();
    assert!(auto_at < alert_at);
    m.verify().unwrap();
}

#[test]
fn auto_response_uses_the_controller() {
    let controller = Arc::new(RecordingController::default());
    let clock = Arc::new(ManualClock::new());
    let m = MemoryManager::with_clock(auto_config(), clock)
        .unwrap()
        .with_controller(controller.clone());
    let mut rx = m.subscribe();

    assert!(
        m.allocate(
            AllocationRequest::new("thumbs", PoolCategory::Texture, 40)
                .with_priority(AllocationPriority::Low)
                .persistent()
        )
        .is_success()
    );
    assert!(
        m.allocate(
            AllocationRequest::new("viewport-1", PoolCategory::Texture, 59)
                .with_priority(AllocationPriority::High)
        )
        .is_success()
    );

    // 99%: emergency.
    let alert = m.sample().unwrap().unwrap().alert.unwrap();
    assert_eq!(alert.severity, Severity::Emergency);

    let (executed, failed, _) = auto_response(&drain(&mut rx));
    assert!(failed.is_empty());
    assert!(executed.contains(&RemediationAction::ReduceQuality));
    assert!(executed.contains(&RemediationAction::SuspendLowPriority));
    assert!(executed.contains(&RemediationAction::EmergencyCleanup));

    assert_eq!(
        *controller.reduced.lock(),
        vec![ConsumerId::from("thumbs"), ConsumerId::from("viewport-1")]
    );
    assert_eq!(*controller.suspended.lock(), vec![ConsumerId::from("thumbs")]);
    // Persistent and high-priority blocks survive emergency cleanup.
    assert_eq!(m.usage().0, 99);
}

#[test]
fn disabled_emergency_actions_are_not_auto_run() {
    let mut config = auto_config();
    config.monitor.emergency.aggressive_cleanup = false;
    config.monitor.emergency.force_reduced_quality = false;
    let (m, clock) = manager(config);
    let mut rx = m.subscribe();
    assert!(
        m.allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 92))
            .is_success()
    );
    clock.advance(Duration::from_secs(31));

    let alert = m.sample().unwrap().unwrap().alert.unwrap();
    let aggressive = alert
        .recommendations
        .iter()
        .find(|r| r.action == RemediationAction::AggressiveCleanup)
        .unwrap();
    assert!(!aggressive.auto_executable);

    let (executed, failed, _) = auto_response(&drain(&mut rx));
    assert!(failed.is_empty());
    assert!(!executed.contains(&RemediationAction::AggressiveCleanup));
    assert!(!executed.contains(&RemediationAction::ReduceQuality));
    // Compression still ran: 92 -> 55.
    assert_eq!(m.usage().0, 55);
}

#[test]
fn compress_inactive_fails_when_compression_is_off() {
    let mut config = MemoryConfig::testing();
    config.compression.enabled = false;
    let (m, _) = manager(config);
    let err = m.execute(RemediationAction::CompressInactive).unwrap_err();
    assert_eq!(err.code(), "MEM:REMEDIATION:FAILED");
}
