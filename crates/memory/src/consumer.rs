//! Consumers (display surfaces) and their retention policies.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};
use crate::pool::{BlockId, PoolId};

// ---------------------------------------------------------------------------
// ConsumerId
// ---------------------------------------------------------------------------

/// Identity of a consumer holding allocations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ConsumerId(String);

impl ConsumerId {
    /// Create an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConsumerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ConsumerId> for ConsumerId {
    fn from(id: &ConsumerId) -> Self {
        id.clone()
    }
}

// ---------------------------------------------------------------------------
// RetentionPolicy
// ---------------------------------------------------------------------------

/// Per-consumer rules for reclaiming idle blocks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetentionPolicy {
    /// Blocks older than this are freed by the retention pass.
    pub max_age: Duration,
    /// Blocks idle longer than this (and rarely touched) are freed by the
    /// cleanup pass.
    pub max_unused_time: Duration,
    /// Allow the compression pass to shrink this consumer's blocks.
    pub compression_enabled: bool,
    /// Allow the cleanup pass to free this consumer's blocks.
    pub auto_cleanup: bool,
    /// Priority levels added to every block this consumer allocates.
    pub priority_boost: u8,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(30 * 60),
            max_unused_time: Duration::from_secs(5 * 60),
            compression_enabled: true,
            auto_cleanup: true,
            priority_boost: 0,
        }
    }
}

impl RetentionPolicy {
    /// Policy for surfaces that must stay resident: no cleanup, no
    /// compression, one priority level up.
    #[must_use]
    pub fn pinned() -> Self {
        Self {
            max_age: Duration::MAX,
            max_unused_time: Duration::MAX,
            compression_enabled: false,
            auto_cleanup: false,
            priority_boost: 1,
        }
    }

    /// Validate the policy.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.max_age.is_zero() {
            return Err(MemoryError::invalid_config(
                "retention max_age must be greater than zero",
            ));
        }
        if self.max_unused_time.is_zero() {
            return Err(MemoryError::invalid_config(
                "retention max_unused_time must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConsumerProfile
// ---------------------------------------------------------------------------

/// Book-keeping for one consumer.
#[derive(Debug, Clone)]
pub struct ConsumerProfile {
    /// Consumer identity.
    pub id: ConsumerId,
    /// Bytes currently held.
    pub allocated_bytes: u64,
    /// Advisory ceiling on `allocated_bytes`.
    pub soft_cap: Option<u64>,
    /// Blocks currently held, in allocation order.
    pub blocks: Vec<BlockId>,
    /// Pools this consumer has allocated from.
    pub pools: BTreeSet<PoolId>,
    /// Retention policy.
    pub policy: RetentionPolicy,
    /// Running ratio of compressed size to original size; `1.0` until
    /// something has been compressed.
    pub compression_ratio: f64,
    /// Last time an optimization pass ran for this consumer.
    pub last_optimized: Option<Instant>,
    /// When the profile was created.
    pub created_at: Instant,
    compressed_original: u64,
    compressed_current: u64,
}

impl ConsumerProfile {
    pub(crate) fn new(
        id: ConsumerId,
        policy: RetentionPolicy,
        soft_cap: Option<u64>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            allocated_bytes: 0,
            soft_cap,
            blocks: Vec::new(),
            pools: BTreeSet::new(),
            policy,
            compression_ratio: 1.0,
            last_optimized: None,
            created_at: now,
            compressed_original: 0,
            compressed_current: 0,
        }
    }

    /// Whether the consumer currently exceeds its soft cap.
    #[must_use]
    pub fn over_soft_cap(&self) -> bool {
        self.soft_cap.is_some_and(|cap| self.allocated_bytes > cap)
    }

    pub(crate) fn record_allocation(&mut self, block: BlockId, pool: PoolId, size: u64) {
        self.blocks.push(block);
        self.pools.insert(pool);
        self.allocated_bytes += size;
    }

    pub(crate) fn record_release(&mut self, block: BlockId, size: u64) {
        self.blocks.retain(|b| *b != block);
        self.allocated_bytes = self.allocated_bytes.saturating_sub(size);
    }

    pub(crate) fn record_compression(&mut self, original: u64, compressed: u64) {
        self.allocated_bytes = self
            .allocated_bytes
            .saturating_sub(original.saturating_sub(compressed));
        self.compressed_original += original;
        self.compressed_current += compressed;
        if self.compressed_original > 0 {
            self.compression_ratio =
                self.compressed_current as f64 / self.compressed_original as f64;
        }
    }
}

// ---------------------------------------------------------------------------
// ConsumerController
// ---------------------------------------------------------------------------

/// Host-side hooks for remediations the allocator cannot perform itself.
///
/// Quality reduction and suspension need the rendering layer. Without a
/// controller those remediation actions fail with
/// [`MemoryError::ControllerUnavailable`].
pub trait ConsumerController: Send + Sync {
    /// Ask a consumer to render at reduced quality.
    fn reduce_quality(&self, consumer: &ConsumerId) -> MemoryResult<()>;

    /// Ask a consumer to suspend until pressure drops.
    fn suspend(&self, consumer: &ConsumerId) -> MemoryResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ConsumerProfile {
        ConsumerProfile::new(
            ConsumerId::from("viewport-1"),
            RetentionPolicy::default(),
            Some(1000),
            Instant::now(),
        )
    }

    #[test]
    fn allocation_and_release_keep_totals() {
        let mut p = profile();
        p.record_allocation(BlockId(1), PoolId(0), 600);
        p.record_allocation(BlockId(2), PoolId(1), 500);
        assert_eq!(p.allocated_bytes, 1100);
        assert!(p.over_soft_cap());
        assert_eq!(p.pools.len(), 2);

        p.record_release(BlockId(1), 600);
        assert_eq!(p.allocated_bytes, 500);
        assert_eq!(p.blocks, vec![BlockId(2)]);
        assert!(!p.over_soft_cap());
    }

    #[test]
    fn compression_ratio_is_running() {
        let mut p = profile();
        p.record_allocation(BlockId(1), PoolId(0), 100);
        p.record_allocation(BlockId(2), PoolId(0), 300);

        p.record_compression(100, 60);
        assert!((p.compression_ratio - 0.6).abs() < 1e-9);
        p.record_compression(300, 90);
        assert!((p.compression_ratio - 150.0 / 400.0).abs() < 1e-9);
        assert_eq!(p.allocated_bytes, 150);
    }

    #[test]
    fn pinned_policy_is_valid() {
        RetentionPolicy::pinned().validate().unwrap();
        let bad = RetentionPolicy {
            max_age: Duration::ZERO,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
