//! Retention, compression and leak heuristics.
//!
//! Everything here works on an already-borrowed [`PoolRegistry`]. Persistent
//! blocks are exempt from every pass that frees memory and from leak
//! flagging.

use std::time::{Duration, Instant};

use crate::config::{CompressionConfig, LeakDetectionConfig};
use crate::consumer::{ConsumerId, RetentionPolicy};
use crate::error::{MemoryError, MemoryResult};
use crate::pool::{AllocationPriority, Block, BlockId, PoolRegistry};

/// Bytes reclaimed by each pass of one optimization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationReport {
    /// Bytes released by compression.
    pub compressed: u64,
    /// Bytes freed by the cleanup pass.
    pub cleaned: u64,
    /// Bytes freed by the retention pass.
    pub expired: u64,
}

impl OptimizationReport {
    /// Sum of all passes.
    pub fn total(&self) -> u64 {
        self.compressed + self.cleaned + self.expired
    }
}

/// Blocks of one consumer that look leaked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakReport {
    /// Owning consumer.
    pub consumer: ConsumerId,
    /// Suspicious blocks.
    pub blocks: Vec<BlockId>,
    /// Their summed size.
    pub bytes: u64,
}

fn policy_of(registry: &PoolRegistry, id: &ConsumerId) -> MemoryResult<RetentionPolicy> {
    registry
        .consumer(id)
        .map(|p| p.policy.clone())
        .ok_or_else(|| MemoryError::unknown_consumer(id.as_str()))
}

fn free_matching(
    registry: &mut PoolRegistry,
    id: &ConsumerId,
    now: Instant,
    mut matches: impl FnMut(&Block) -> bool,
) -> u64 {
    let doomed: Vec<BlockId> = registry
        .blocks_of(id)
        .iter()
        .filter(|b| !b.persistent && matches(b))
        .map(|b| b.id)
        .collect();
    doomed
        .into_iter()
        .filter_map(|b| registry.free(b, now))
        .map(|b| b.size)
        .sum()
}

// ---------------------------------------------------------------------------
// Per-consumer passes
// ---------------------------------------------------------------------------

/// Shrink every compressible block idle past the inactivity threshold.
fn compression_pass(
    registry: &mut PoolRegistry,
    id: &ConsumerId,
    policy: &RetentionPolicy,
    compression: &CompressionConfig,
    now: Instant,
) -> u64 {
    if !compression.enabled || !policy.compression_enabled {
        return 0;
    }
    let eligible: Vec<BlockId> = registry
        .blocks_of(id)
        .iter()
        .filter(|b| {
            b.compressible
                && !b.persistent
                && !b.is_compressed()
                && b.idle_for(now) > compression.inactivity_threshold
        })
        .map(|b| b.id)
        .collect();
    eligible
        .into_iter()
        .filter_map(|b| registry.compress(b, compression.ratio, now))
        .sum()
}

/// Free rarely touched blocks idle past `max_unused_time`.
fn cleanup_pass(
    registry: &mut PoolRegistry,
    id: &ConsumerId,
    policy: &RetentionPolicy,
    now: Instant,
) -> u64 {
    if !policy.auto_cleanup {
        return 0;
    }
    let floor = registry.cleanup_access_floor();
    free_matching(registry, id, now, |b| {
        b.idle_for(now) > policy.max_unused_time && b.access_count < floor
    })
}

/// Free blocks older than `max_age`.
fn retention_pass(
    registry: &mut PoolRegistry,
    id: &ConsumerId,
    policy: &RetentionPolicy,
    now: Instant,
) -> u64 {
    free_matching(registry, id, now, |b| b.age(now) > policy.max_age)
}

/// Run compression, cleanup and retention for one consumer, in that order.
pub(crate) fn optimize_consumer(
    registry: &mut PoolRegistry,
    id: &ConsumerId,
    compression: &CompressionConfig,
    now: Instant,
) -> MemoryResult<OptimizationReport> {
    let policy = policy_of(registry, id)?;
    let report = OptimizationReport {
        compressed: compression_pass(registry, id, &policy, compression, now),
        cleaned: cleanup_pass(registry, id, &policy, now),
        expired: retention_pass(registry, id, &policy, now),
    };
    registry.mark_optimized(id, now);

    tracing::debug!(
        consumer = %id,
        compressed = report.compressed,
        cleaned = report.cleaned,
        expired = report.expired,
        "optimized consumer"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Registry-wide remediation
// ---------------------------------------------------------------------------

/// Cleanup pass for every consumer.
pub(crate) fn cleanup_inactive(registry: &mut PoolRegistry, now: Instant) -> u64 {
    let mut freed = 0;
    for id in registry.consumer_ids() {
        if let Ok(policy) = policy_of(registry, &id) {
            freed += cleanup_pass(registry, &id, &policy, now);
        }
    }
    freed
}

/// Compression pass for every consumer.
pub(crate) fn compress_inactive(
    registry: &mut PoolRegistry,
    compression: &CompressionConfig,
    now: Instant,
) -> u64 {
    let mut released = 0;
    for id in registry.consumer_ids() {
        if let Ok(policy) = policy_of(registry, &id) {
            released += compression_pass(registry, &id, &policy, compression, now);
        }
    }
    released
}

/// Free every idle block at `Normal` priority or below, ignoring policies.
pub(crate) fn aggressive_cleanup(
    registry: &mut PoolRegistry,
    idle_threshold: Duration,
    now: Instant,
) -> u64 {
    let mut freed = 0;
    for id in registry.consumer_ids() {
        freed += free_matching(registry, &id, now, |b| {
            b.priority <= AllocationPriority::Normal && b.idle_for(now) >= idle_threshold
        });
    }
    freed
}

/// Free every block below `High` priority, idle or not.
pub(crate) fn emergency_cleanup(registry: &mut PoolRegistry, now: Instant) -> u64 {
    let mut freed = 0;
    for id in registry.consumer_ids() {
        freed += free_matching(registry, &id, now, |b| b.priority < AllocationPriority::High);
    }
    freed
}

/// Consumers holding at least one block, all of them at `Low` priority.
pub(crate) fn low_priority_consumers(registry: &PoolRegistry) -> Vec<ConsumerId> {
    registry
        .consumer_ids()
        .into_iter()
        .filter(|id| {
            let blocks = registry.blocks_of(id);
            !blocks.is_empty()
                && blocks
                    .iter()
                    .all(|b| b.priority == AllocationPriority::Low)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Leak detection
// ---------------------------------------------------------------------------

/// Whether `block` looks leaked: touched exactly once, old, and idle.
pub fn is_suspicious(block: &Block, config: &LeakDetectionConfig, now: Instant) -> bool {
    !block.persistent
        && block.access_count == 1
        && block.age(now) > config.age_threshold
        && block.idle_for(now) > config.idle_threshold
}

/// Suspicious blocks grouped per consumer. Nothing is freed.
pub(crate) fn detect_leaks(
    registry: &PoolRegistry,
    config: &LeakDetectionConfig,
    now: Instant,
) -> Vec<LeakReport> {
    registry
        .consumers()
        .filter_map(|profile| {
            let suspicious: Vec<Block> = registry
                .blocks_of(&profile.id)
                .into_iter()
                .filter(|b| is_suspicious(b, config, now))
                .collect();
            if suspicious.is_empty() {
                return None;
            }
            Some(LeakReport {
                consumer: profile.id.clone(),
                bytes: suspicious.iter().map(|b| b.size).sum(),
                blocks: suspicious.into_iter().map(|b| b.id).collect(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::pool::{AllocationRequest, PoolCategory};

    const MIN: Duration = Duration::from_secs(60);

    fn setup() -> (PoolRegistry, Instant) {
        let now = Instant::now();
        (PoolRegistry::new(&MemoryConfig::testing(), now), now)
    }

    fn alloc(r: &mut PoolRegistry, req: AllocationRequest, now: Instant) -> BlockId {
        r.allocate(&req, now).allocation().unwrap().block
    }

    fn viewport() -> ConsumerId {
        ConsumerId::from("viewport")
    }

    fn texture(size: u64) -> AllocationRequest {
        AllocationRequest::new("viewport", PoolCategory::Texture, size)
    }

    #[test]
    fn passes_run_in_order_and_sum() {
        let (mut r, t0) = setup();
        let compression = CompressionConfig::default();
        let old = alloc(&mut r, texture(100), t0);
        let later = t0 + 6 * MIN;
        let fresh = alloc(&mut r, texture(200), later);

        // `old` is idle past 5 min with one access: compressed to 60 bytes,
        // then freed by cleanup. `fresh` is too recent for either.
        let report = optimize_consumer(&mut r, &viewport(), &compression, later).unwrap();
        assert_eq!(report.compressed, 40);
        assert_eq!(report.cleaned, 60);
        assert_eq!(report.expired, 0);
        assert_eq!(report.total(), 100);
        assert!(r.block(old).is_none());
        assert!(r.block(fresh).is_some());
        assert!(r.consumer(&viewport()).unwrap().last_optimized.is_some());
        r.verify().unwrap();
    }

    #[test]
    fn frequently_touched_blocks_survive_cleanup() {
        let (mut r, t0) = setup();
        let b = alloc(&mut r, texture(100).with_compressible(false), t0);
        for _ in 0..3 {
            assert!(r.touch(b, t0));
        }
        let later = t0 + 10 * MIN;
        let report =
            optimize_consumer(&mut r, &viewport(), &CompressionConfig::default(), later).unwrap();
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn retention_frees_old_blocks() {
        let (mut r, t0) = setup();
        let b = alloc(&mut r, texture(100).with_compressible(false), t0);
        let later = t0 + 31 * MIN;
        for _ in 0..5 {
            r.touch(b, later);
        }
        let report =
            optimize_consumer(&mut r, &viewport(), &CompressionConfig::default(), later).unwrap();
        assert_eq!(report.expired, 100);
    }

    #[test]
    fn persistent_blocks_are_exempt() {
        let (mut r, t0) = setup();
        alloc(&mut r, texture(100).persistent(), t0);
        let later = t0 + 60 * MIN;
        let report =
            optimize_consumer(&mut r, &viewport(), &CompressionConfig::default(), later).unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(aggressive_cleanup(&mut r, Duration::ZERO, later), 0);
        assert_eq!(emergency_cleanup(&mut r, later), 0);
    }

    #[test]
    fn unknown_consumer() {
        let (mut r, t0) = setup();
        let err = optimize_consumer(
            &mut r,
            &ConsumerId::from("ghost"),
            &CompressionConfig::default(),
            t0,
        )
        .unwrap_err();
        assert_eq!(err.code(), "MEM:CONSUMER:UNKNOWN");
    }

    #[test]
    fn emergency_cleanup_spares_high_priority() {
        let (mut r, t0) = setup();
        alloc(&mut r, texture(100), t0);
        let keep = alloc(
            &mut r,
            texture(100).with_priority(AllocationPriority::High),
            t0,
        );
        assert_eq!(emergency_cleanup(&mut r, t0), 100);
        assert!(r.block(keep).is_some());
    }

    #[test]
    fn leak_detection_flags_without_freeing() {
        let (mut r, t0) = setup();
        let leaked = alloc(&mut r, texture(100), t0);
        let touched = alloc(&mut r, texture(50), t0);
        r.touch(touched, t0);

        let config = LeakDetectionConfig::default();
        let later = t0 + 31 * MIN;
        let reports = detect_leaks(&r, &config, later);
        assert_eq!(
            reports,
            vec![LeakReport {
                consumer: viewport(),
                blocks: vec![leaked],
                bytes: 100,
            }]
        );
        assert!(r.block(leaked).is_some());
    }

    #[test]
    fn low_priority_consumer_selection() {
        let (mut r, t0) = setup();
        alloc(
            &mut r,
            AllocationRequest::new("thumbs", PoolCategory::Cache, 10)
                .with_priority(AllocationPriority::Low),
            t0,
        );
        alloc(&mut r, texture(10), t0);
        assert_eq!(low_priority_consumers(&r), vec![ConsumerId::from("thumbs")]);
    }
}
