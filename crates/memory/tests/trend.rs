//! Trend detection and exhaustion projection through sampling cycles.

use std::sync::Arc;
use std::time::Duration;

use lumen_memory::prelude::*;
use lumen_memory::pressure::{REPORT_CONFIDENCE, Trend};

fn manager(config: MemoryConfig) -> (MemoryManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let manager = MemoryManager::with_clock(config, clock.clone()).unwrap();
    (manager, clock)
}

fn trends(rx: &mut tokio::sync::broadcast::Receiver<MemoryEvent>) -> Vec<Trend> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            MemoryEvent::TrendDetected(trend) => Some(trend),
            _ => None,
        })
        .collect()
}

#[test]
fn steady_growth_is_reported_once_sustained() {
    let (m, clock) = manager(MemoryConfig::single_pool(PoolCategory::Texture, 1000));
    let mut rx = m.subscribe();

    let mut first_report = None;
    for tick in 0..8 {
        assert!(
            m.allocate(AllocationRequest::new("slideshow", PoolCategory::Texture, 40))
                .is_success()
        );
        let outcome = m.sample().unwrap().unwrap();
        if tick < 2 {
            assert!(outcome.trend.is_none());
        }
        if first_report.is_none() && !trends(&mut rx).is_empty() {
            first_report = Some(tick);
        }
        clock.advance(Duration::from_secs(1));
    }

    // Six samples one second apart cover the 5s sustain requirement.
    assert_eq!(first_report, Some(5));

    let outcome = m.sample().unwrap().unwrap();
    let trend = outcome.trend.unwrap();
    assert_eq!(trend.direction, TrendDirection::Increasing);
    assert!(trend.confidence > REPORT_CONFIDENCE);
    assert!(trend.rate > 0.0);
}

#[test]
fn growth_projects_exhaustion() {
    let (m, clock) = manager(MemoryConfig::single_pool(PoolCategory::Texture, 1000));
    let mut rx = m.subscribe();

    for _ in 0..5 {
        assert!(
            m.allocate(AllocationRequest::new("slideshow", PoolCategory::Texture, 100))
                .is_success()
        );
        m.sample().unwrap();
        clock.advance(Duration::from_secs(1));
    }

    let warning = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            MemoryEvent::ExhaustionWarning {
                time_to_exhaustion,
                snapshot,
            } => Some((time_to_exhaustion, snapshot)),
            _ => None,
        })
        .last()
        .unwrap();
    // 500 bytes left at 100 bytes/s.
    assert_eq!(warning.1.used, 500);
    assert!((warning.0.as_secs_f64() - 5.0).abs() < 0.01);
}

#[test]
fn flat_usage_is_never_reported() {
    let (m, clock) = manager(MemoryConfig::single_pool(PoolCategory::Texture, 1000));
    assert!(
        m.allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 300))
            .is_success()
    );
    let mut rx = m.subscribe();

    let mut last = None;
    for _ in 0..10 {
        last = m.sample().unwrap();
        clock.advance(Duration::from_secs(1));
    }

    assert!(trends(&mut rx).is_empty());
    let trend = last.unwrap().trend.unwrap();
    assert_eq!(trend.direction, TrendDirection::Stable);
    assert!(trend.confidence.abs() < f64::EPSILON);
    assert!(trend.time_to_exhaustion(700).is_none());
}

#[test]
fn shrinking_usage_is_decreasing() {
    let (m, clock) = manager(MemoryConfig::single_pool(PoolCategory::Texture, 1000));
    let blocks: Vec<BlockId> = (0..6)
        .filter_map(|_| {
            m.allocate(AllocationRequest::new("viewport-1", PoolCategory::Texture, 100))
                .allocation()
                .map(|a| a.block)
        })
        .collect();

    let mut last = None;
    for block in blocks {
        last = m.sample().unwrap();
        assert!(m.free(block));
        clock.advance(Duration::from_secs(1));
    }

    let trend = last.unwrap().trend.unwrap();
    assert_eq!(trend.direction, TrendDirection::Decreasing);
    assert!(trend.rate < 0.0);
    assert!(trend.time_to_exhaustion(1000).is_none());
}
