//! Background driver timing on a paused tokio clock.

#![cfg(feature = "driver")]

use std::sync::Arc;
use std::time::Duration;

use lumen_memory::config::LeakDetectionConfig;
use lumen_memory::prelude::*;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Advance the paused clock in small steps so spawned tasks get to run
/// between timer firings.
async fn advance_stepwise(total: Duration, step: Duration) {
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        tokio::time::advance(step).await;
        tokio::task::yield_now().await;
        elapsed += step;
    }
}

fn drain(rx: &mut broadcast::Receiver<MemoryEvent>) -> Vec<MemoryEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn manager(config: MemoryConfig) -> (Arc<MemoryManager>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let manager = MemoryManager::with_clock(config, clock.clone()).unwrap();
    (Arc::new(manager), clock)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn driver_samples_and_scans_for_leaks() {
    let config = MemoryConfig::single_pool(PoolCategory::Texture, 100)
        .with_leak_detection(LeakDetectionConfig::default());
    let (manager, clock) = manager(config);
    assert!(
        manager
            .allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 80))
            .is_success()
    );
    clock.advance(Duration::from_secs(60 * 60));
    let mut rx = manager.subscribe();

    let driver = MonitorDriver::new(Arc::clone(&manager), CancellationToken::new());
    let handle = driver.start();
    advance_stepwise(Duration::from_secs(3), Duration::from_millis(250)).await;
    driver.shutdown();
    handle.await.unwrap();

    let events = drain(&mut rx);
    let alerts = events
        .iter()
        .filter(|e| matches!(e, MemoryEvent::Alert(a) if a.severity == Severity::High))
        .count();
    let leaks = events
        .iter()
        .filter(|e| matches!(e, MemoryEvent::LeakSuspected(r) if r.bytes == 80))
        .count();

    // The injected clock is frozen, so the High cooldown never elapses.
    assert_eq!(alerts, 1);
    // Leak scans run every 60s; only the immediate first one fits.
    assert_eq!(leaks, 1);
    assert_eq!(manager.severity(), Severity::High);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn leak_timer_is_off_when_disabled() {
    let (manager, clock) = manager(MemoryConfig::testing());
    assert!(
        manager
            .allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 10))
            .is_success()
    );
    clock.advance(Duration::from_secs(60 * 60));
    let mut rx = manager.subscribe();

    let driver = MonitorDriver::new(Arc::clone(&manager), CancellationToken::new());
    let handle = driver.start();
    advance_stepwise(Duration::from_secs(120), Duration::from_secs(1)).await;
    driver.shutdown();
    handle.await.unwrap();

    assert!(
        !drain(&mut rx)
            .iter()
            .any(|e| matches!(e, MemoryEvent::LeakSuspected(_)))
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn shutdown_stops_sampling() {
    let (manager, _) = manager(MemoryConfig::single_pool(PoolCategory::Texture, 100));
    let token = CancellationToken::new();
    let driver = MonitorDriver::new(Arc::clone(&manager), token.clone());
    let handle = driver.start();

    advance_stepwise(Duration::from_secs(2), Duration::from_millis(500)).await;
    token.cancel();
    handle.await.unwrap();
    assert!(driver.is_cancelled());

    assert!(
        manager
            .allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 80))
            .is_success()
    );
    advance_stepwise(Duration::from_secs(5), Duration::from_millis(500)).await;
    // No cycle ran after cancellation.
    assert_eq!(manager.severity(), Severity::Normal);
}
