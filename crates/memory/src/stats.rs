//! Point-in-time statistics snapshots.

use std::time::Instant;

use crate::consumer::{ConsumerId, ConsumerProfile};
use crate::pool::{MemoryPool, PoolCategory, PoolId};
use crate::pressure::Severity;

/// Snapshot of one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStats {
    /// Pool identity.
    pub id: PoolId,
    /// Category served.
    pub category: PoolCategory,
    /// Total bytes.
    pub capacity: u64,
    /// Bytes in allocated blocks.
    pub used: u64,
    /// Bytes in free blocks.
    pub free: u64,
    /// Number of allocated blocks.
    pub allocated_blocks: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Size of the largest free block.
    pub largest_free_block: u64,
    /// Fragmentation ratio.
    pub fragmentation: f64,
    /// Lifetime successful allocations.
    pub allocations: u64,
    /// Lifetime frees.
    pub frees: u64,
    /// Lifetime allocation failures routed here.
    pub failures: u64,
    /// Lifetime defragmentation runs.
    pub defragmentations: u64,
    /// Lifetime compressed blocks.
    pub compressions: u64,
    /// Highest `used` seen.
    pub peak_used: u64,
}

impl PoolStats {
    pub(crate) fn of(pool: &MemoryPool) -> Self {
        let counters = pool.counters();
        Self {
            id: pool.id(),
            category: pool.category(),
            capacity: pool.capacity(),
            used: pool.used(),
            free: pool.free_bytes(),
            allocated_blocks: pool.allocated_count(),
            free_blocks: pool.free_blocks().len(),
            largest_free_block: pool.largest_free_block(),
            fragmentation: pool.fragmentation(),
            allocations: counters.allocations,
            frees: counters.frees,
            failures: counters.failures,
            defragmentations: counters.defragmentations,
            compressions: counters.compressions,
            peak_used: counters.peak_used,
        }
    }

    /// `used / capacity`.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.used as f64 / self.capacity as f64
        }
    }
}

/// Snapshot of one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerStats {
    /// Consumer identity.
    pub id: ConsumerId,
    /// Bytes held.
    pub allocated: u64,
    /// Blocks held.
    pub blocks: usize,
    /// Pools allocated from.
    pub pools: Vec<PoolId>,
    /// Running compression ratio.
    pub compression_ratio: f64,
    /// Advisory ceiling.
    pub soft_cap: Option<u64>,
    /// Whether `allocated` exceeds `soft_cap`.
    pub over_soft_cap: bool,
    /// Last optimization run.
    pub last_optimized: Option<Instant>,
}

impl ConsumerStats {
    pub(crate) fn of(profile: &ConsumerProfile) -> Self {
        Self {
            id: profile.id.clone(),
            allocated: profile.allocated_bytes,
            blocks: profile.blocks.len(),
            pools: profile.pools.iter().copied().collect(),
            compression_ratio: profile.compression_ratio,
            soft_cap: profile.soft_cap,
            over_soft_cap: profile.over_soft_cap(),
            last_optimized: profile.last_optimized,
        }
    }
}

/// Totals across every pool and the monitor state.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStats {
    /// Capacity across every pool.
    pub capacity: u64,
    /// Bytes in allocated blocks.
    pub used: u64,
    /// `used / capacity`.
    pub ratio: f64,
    /// Current severity.
    pub severity: Severity,
    /// Whether the sticky emergency flag is set.
    pub emergency: bool,
    /// Alerts raised since construction.
    pub alerts_raised: u64,
    /// Number of consumers with a profile.
    pub consumers: usize,
    /// Lifetime successful allocations across pools.
    pub allocations: u64,
    /// Lifetime frees across pools.
    pub frees: u64,
    /// Lifetime failed allocation requests.
    pub failed_requests: u64,
}

/// Result of [`statistics`](crate::MemoryManager::statistics).
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStatistics {
    /// Per pool, in table order.
    pub pools: Vec<PoolStats>,
    /// Per consumer, ordered by id.
    pub consumers: Vec<ConsumerStats>,
    /// Totals.
    pub global: GlobalStats,
}

impl MemoryStatistics {
    /// Stats of one consumer.
    pub fn consumer(&self, id: &ConsumerId) -> Option<&ConsumerStats> {
        self.consumers.iter().find(|c| &c.id == id)
    }

    /// Stats of every pool of `category`.
    pub fn pools_of(&self, category: PoolCategory) -> impl Iterator<Item = &PoolStats> {
        self.pools.iter().filter(move |p| p.category == category)
    }
}
