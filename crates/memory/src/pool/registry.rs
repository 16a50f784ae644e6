//! Pool table, allocation routing and consumer books.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use super::allocator::{MemoryPool, Placement, PlacementStrategy};
use super::block::{Block, BlockId, BlockIds, PoolCategory, PoolId};
use super::request::{
    Allocation, AllocationFailure, AllocationRequest, AllocationResult, FailureReason, Suggestion,
};
use crate::config::{DefragmentationConfig, MemoryConfig, PoolSelection, RetentionConfig};
use crate::consumer::{ConsumerId, ConsumerProfile, RetentionPolicy};
use crate::error::{MemoryError, MemoryResult};

/// Every pool of a manager plus the consumer side of the books.
///
/// Consumer profiles are created lazily on a consumer's first allocation
/// (or explicitly through [`register_consumer`](Self::register_consumer))
/// and only removed by [`dispose`](Self::dispose).
#[derive(Debug, Clone)]
pub struct PoolRegistry {
    pools: Vec<MemoryPool>,
    consumers: BTreeMap<ConsumerId, ConsumerProfile>,
    block_index: HashMap<BlockId, PoolId>,
    placement: PlacementStrategy,
    selection: PoolSelection,
    defragmentation: DefragmentationConfig,
    retention: RetentionConfig,
}

impl PoolRegistry {
    /// Build the pool table from `config`.
    pub fn new(config: &MemoryConfig, now: Instant) -> Self {
        let ids = BlockIds::default();
        let pools = config
            .pools
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                MemoryPool::new(
                    PoolId(index as u32),
                    spec.category,
                    spec.capacity,
                    spec.defrag_threshold.unwrap_or(config.defragmentation.threshold),
                    ids.clone(),
                    now,
                )
            })
            .collect();

        Self {
            pools,
            consumers: BTreeMap::new(),
            block_index: HashMap::new(),
            placement: config.placement,
            selection: config.pool_selection,
            defragmentation: config.defragmentation,
            retention: config.retention.clone(),
        }
    }

    // -- allocation ---------------------------------------------------------

    /// Place `request` in a pool of its category.
    ///
    /// Candidate pools are those with enough headroom, ordered by the
    /// configured [`PoolSelection`]. Each is tried in turn; a pool with no
    /// fitting free block is defragmented once (when enabled) and retried
    /// before moving on.
    pub fn allocate(&mut self, request: &AllocationRequest, now: Instant) -> AllocationResult {
        if let Err(detail) = request.validate() {
            return AllocationResult::Failed(AllocationFailure {
                reason: FailureReason::InvalidRequest,
                requested: request.size,
                category: request.category,
                suggestions: Vec::new(),
                detail,
            });
        }

        let size = request.size;
        let alignment = request.effective_alignment();
        let could_ever_fit = self
            .pools
            .iter()
            .any(|p| p.category() == request.category && p.capacity() >= size);
        if !could_ever_fit {
            return self.failure(
                request,
                FailureReason::NoSuitablePool,
                format!("no {} pool can hold {size} bytes", request.category),
            );
        }

        for index in self.candidates(request.category, size) {
            let pool = &mut self.pools[index];
            let mut slot = pool.find_free(size, alignment, self.placement);
            if slot.is_none() && self.defragmentation.enabled {
                pool.defragment();
                slot = pool.find_free(size, alignment, self.placement);
            }
            let Some(slot) = slot else {
                pool.record_failure();
                continue;
            };

            let profile = self.consumers.entry(request.consumer.clone()).or_insert_with(|| {
                ConsumerProfile::new(
                    request.consumer.clone(),
                    self.retention.default_policy.clone(),
                    self.retention.default_soft_cap,
                    now,
                )
            });
            let placement = Placement {
                size,
                alignment,
                owner: request.consumer.clone(),
                resource_id: request.resource_id.clone(),
                priority: request.priority.boosted(profile.policy.priority_boost),
                persistent: request.persistent,
                compressible: request.compressible,
            };
            let block = pool.carve(slot, placement, now);
            profile.record_allocation(block.id, block.pool, block.size);
            self.block_index.insert(block.id, block.pool);

            tracing::debug!(
                consumer = %request.consumer,
                block = %block.id,
                pool = %block.pool,
                offset = block.offset,
                size = block.size,
                "allocated block"
            );
            return AllocationResult::Allocated(Allocation {
                block: block.id,
                pool: block.pool,
                category: request.category,
                offset: block.offset,
                size: block.size,
            });
        }

        self.failure(
            request,
            FailureReason::InsufficientBlock,
            format!(
                "no free {} block of {size} bytes (largest: {})",
                request.category,
                self.largest_free(request.category)
            ),
        )
    }

    /// Indices of pools of `category` with at least `size` bytes of
    /// headroom, in selection order.
    fn candidates(&self, category: PoolCategory, size: u64) -> Vec<usize> {
        let mut candidates: Vec<usize> = self
            .pools
            .iter()
            .enumerate()
            .filter(|(_, p)| p.category() == category && p.headroom() >= size)
            .map(|(i, _)| i)
            .collect();

        match self.selection {
            PoolSelection::LeastFragmented => candidates.sort_by(|a, b| {
                self.pools[*a]
                    .fragmentation()
                    .total_cmp(&self.pools[*b].fragmentation())
                    .then(a.cmp(b))
            }),
            PoolSelection::LargestCapacity => candidates.sort_by(|a, b| {
                self.pools[*b]
                    .capacity()
                    .cmp(&self.pools[*a].capacity())
                    .then(a.cmp(b))
            }),
        }
        candidates
    }

    fn largest_free(&self, category: PoolCategory) -> u64 {
        self.pools
            .iter()
            .filter(|p| p.category() == category)
            .map(MemoryPool::largest_free_block)
            .max()
            .unwrap_or(0)
    }

    fn failure(
        &self,
        request: &AllocationRequest,
        reason: FailureReason,
        detail: String,
    ) -> AllocationResult {
        let mut suggestions = Vec::new();

        let fits_here = self.largest_free(request.category);
        if fits_here > 0 && fits_here < request.size {
            suggestions.push(Suggestion::ReduceSize { size: fits_here });
        }
        for category in PoolCategory::ALL {
            if category == request.category {
                continue;
            }
            let available = self.largest_free(category);
            if available >= request.size {
                suggestions.push(Suggestion::UseCategory {
                    category,
                    available,
                });
            }
        }

        tracing::debug!(
            consumer = %request.consumer,
            category = %request.category,
            size = request.size,
            %reason,
            suggestions = suggestions.len(),
            "allocation failed"
        );
        AllocationResult::Failed(AllocationFailure {
            reason,
            requested: request.size,
            category: request.category,
            suggestions,
            detail,
        })
    }

    // -- block operations ---------------------------------------------------

    /// Return a block to its pool.
    ///
    /// Yields the block as it was before release, or `None` for an unknown
    /// id (no side effects).
    pub fn free(&mut self, id: BlockId, now: Instant) -> Option<Block> {
        let pool = *self.block_index.get(&id)?;
        let block = self.pools.get_mut(pool.index())?.release(id, now)?;
        self.block_index.remove(&id);

        if let Some(owner) = &block.owner {
            if let Some(profile) = self.consumers.get_mut(owner) {
                profile.record_release(id, block.size);
            }
        }
        tracing::debug!(block = %id, pool = %pool, size = block.size, "freed block");
        Some(block)
    }

    /// Record an access. `false` for an unknown id.
    pub fn touch(&mut self, id: BlockId, now: Instant) -> bool {
        let Some(pool) = self.block_index.get(&id) else {
            return false;
        };
        self.pools
            .get_mut(pool.index())
            .is_some_and(|p| p.touch(id, now))
    }

    /// Shrink a block to `ratio` of its size.
    ///
    /// Returns the bytes released, or `None` when the block is unknown or
    /// already compressed.
    pub(crate) fn compress(&mut self, id: BlockId, ratio: f64, now: Instant) -> Option<u64> {
        let pool_id = *self.block_index.get(&id)?;
        let pool = self.pools.get_mut(pool_id.index())?;
        let block = pool.block(id)?;
        let original = block.size;
        let owner = block.owner.clone();

        let target = ((original as f64 * ratio).floor() as u64).max(1);
        let released = pool.shrink(id, target, now)?;

        if let Some(profile) = owner.and_then(|o| self.consumers.get_mut(&o)) {
            profile.record_compression(original, original - released);
        }
        tracing::trace!(block = %id, original, compressed = original - released, "compressed block");
        Some(released)
    }

    /// Defragment every pool whose fragmentation reached its threshold.
    ///
    /// Returns the summed reclaimed-bytes estimate.
    pub fn defragment_all(&mut self) -> u64 {
        self.pools
            .iter_mut()
            .filter(|p| p.needs_defragmentation())
            .map(MemoryPool::defragment)
            .sum()
    }

    // -- consumers ----------------------------------------------------------

    /// Create a consumer profile, or update the policy and soft cap of an
    /// existing one.
    pub fn register_consumer(
        &mut self,
        id: ConsumerId,
        policy: RetentionPolicy,
        soft_cap: Option<u64>,
        now: Instant,
    ) -> MemoryResult<()> {
        policy.validate()?;
        match self.consumers.get_mut(&id) {
            Some(profile) => {
                profile.policy = policy;
                profile.soft_cap = soft_cap;
            }
            None => {
                self.consumers
                    .insert(id.clone(), ConsumerProfile::new(id, policy, soft_cap, now));
            }
        }
        Ok(())
    }

    /// Replace a consumer's retention policy.
    pub fn set_retention_policy(
        &mut self,
        id: &ConsumerId,
        policy: RetentionPolicy,
    ) -> MemoryResult<()> {
        policy.validate()?;
        let profile = self
            .consumers
            .get_mut(id)
            .ok_or_else(|| MemoryError::unknown_consumer(id.as_str()))?;
        profile.policy = policy;
        Ok(())
    }

    /// Free every block a consumer holds; the profile is kept.
    pub fn release_consumer(&mut self, id: &ConsumerId, now: Instant) -> MemoryResult<u64> {
        let blocks = self
            .consumers
            .get(id)
            .map(|p| p.blocks.clone())
            .ok_or_else(|| MemoryError::unknown_consumer(id.as_str()))?;

        Ok(blocks
            .into_iter()
            .filter_map(|block| self.free(block, now))
            .map(|block| block.size)
            .sum())
    }

    /// Mark a consumer as optimized at `now`.
    pub(crate) fn mark_optimized(&mut self, id: &ConsumerId, now: Instant) {
        if let Some(profile) = self.consumers.get_mut(id) {
            profile.last_optimized = Some(now);
        }
    }

    /// Drop every block and every consumer profile.
    pub fn dispose(&mut self, now: Instant) {
        for pool in &mut self.pools {
            pool.reset(now);
        }
        self.consumers.clear();
        self.block_index.clear();
    }

    // -- queries ------------------------------------------------------------

    /// All pools, in table order.
    pub fn pools(&self) -> &[MemoryPool] {
        &self.pools
    }

    /// A pool by id.
    pub fn pool(&self, id: PoolId) -> Option<&MemoryPool> {
        self.pools.get(id.index())
    }

    /// An allocated block by id.
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        let pool = self.block_index.get(&id)?;
        self.pools.get(pool.index())?.block(id)
    }

    /// Blocks a consumer currently holds, in allocation order.
    pub fn blocks_of(&self, id: &ConsumerId) -> Vec<Block> {
        self.consumers
            .get(id)
            .map(|profile| {
                profile
                    .blocks
                    .iter()
                    .filter_map(|b| self.block(*b).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every consumer profile, ordered by id.
    pub fn consumers(&self) -> impl Iterator<Item = &ConsumerProfile> {
        self.consumers.values()
    }

    /// A consumer profile by id.
    pub fn consumer(&self, id: &ConsumerId) -> Option<&ConsumerProfile> {
        self.consumers.get(id)
    }

    /// Ids of every consumer.
    pub fn consumer_ids(&self) -> Vec<ConsumerId> {
        self.consumers.keys().cloned().collect()
    }

    /// Bytes in allocated blocks across every pool.
    pub fn used(&self) -> u64 {
        self.pools.iter().map(MemoryPool::used).sum()
    }

    /// Capacity across every pool.
    pub fn total(&self) -> u64 {
        self.pools.iter().map(MemoryPool::capacity).sum()
    }

    /// Access count below which the cleanup pass may free a block.
    pub fn cleanup_access_floor(&self) -> u64 {
        self.retention.cleanup_access_floor
    }

    /// Check every pool's invariants and that each allocated block has
    /// exactly one owning consumer that lists it.
    pub fn verify(&self) -> MemoryResult<()> {
        for pool in &self.pools {
            pool.verify()?;
            for block in pool.allocated_blocks() {
                let Some(owner) = &block.owner else {
                    return Err(MemoryError::invalid_state(format!(
                        "{} has no owner",
                        block.id
                    )));
                };
                let listed = self
                    .consumers
                    .get(owner)
                    .is_some_and(|p| p.blocks.contains(&block.id));
                if !listed {
                    return Err(MemoryError::invalid_state(format!(
                        "{} is not listed by {owner}",
                        block.id
                    )));
                }
            }
        }
        for profile in self.consumers.values() {
            let held: u64 = profile
                .blocks
                .iter()
                .filter_map(|b| self.block(*b))
                .map(|b| b.size)
                .sum();
            if held != profile.allocated_bytes {
                return Err(MemoryError::invalid_state(format!(
                    "{} holds {held} bytes but records {}",
                    profile.id, profile.allocated_bytes
                )));
            }
        }
        Ok(())
    }
}
