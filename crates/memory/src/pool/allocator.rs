//! Block allocator for a single fixed-capacity pool.
//!
//! A pool is a byte range `[0, capacity)` partitioned into allocated and
//! free blocks. At every observable point:
//!
//! - `sum(allocated sizes) + sum(free sizes) == capacity`
//! - no two blocks overlap
//! - the free set is sorted by offset
//!
//! The pool knows nothing about consumers beyond the owner id it stamps on
//! allocated blocks; the [`PoolRegistry`](super::PoolRegistry) keeps the
//! consumer side of the books.

use std::collections::BTreeMap;
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::block::{Block, BlockId, BlockIds, PoolCategory, PoolId};
use super::request::AllocationPriority;
use crate::consumer::ConsumerId;
use crate::error::{MemoryError, MemoryResult};

/// Each free block beyond the first adds this much to the fragmentation
/// ratio.
pub const FRAGMENTATION_STEP: f64 = 0.1;

/// Heuristic fragmentation score for a pool with `free_blocks` free blocks.
///
/// This is a bounded, monotone function of the free-block *count*, not a
/// measure of physically wasted space: `0` for zero or one free block,
/// growing by [`FRAGMENTATION_STEP`] per extra block and capped at `1`.
#[must_use]
pub fn fragmentation_ratio(free_blocks: usize) -> f64 {
    (free_blocks.saturating_sub(1) as f64 * FRAGMENTATION_STEP).min(1.0)
}

// ---------------------------------------------------------------------------
// PlacementStrategy
// ---------------------------------------------------------------------------

/// How a free block is chosen inside a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PlacementStrategy {
    /// Lowest offset that fits.
    FirstFit,
    /// Smallest block that fits.
    #[default]
    BestFit,
    /// Largest block.
    WorstFit,
}

// ---------------------------------------------------------------------------
// Placement parameters
// ---------------------------------------------------------------------------

/// Everything the pool needs to stamp on a new allocated block.
#[derive(Debug, Clone)]
pub(crate) struct Placement {
    pub size: u64,
    pub alignment: u64,
    pub owner: ConsumerId,
    pub resource_id: Option<String>,
    pub priority: AllocationPriority,
    pub persistent: bool,
    pub compressible: bool,
}

/// Lifetime counters of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    /// Successful carves.
    pub allocations: u64,
    /// Blocks returned to the free set.
    pub frees: u64,
    /// Requests routed here that found no fitting block.
    pub failures: u64,
    /// Explicit defragmentation runs.
    pub defragmentations: u64,
    /// Blocks shrunk by compression.
    pub compressions: u64,
    /// Highest `used` observed.
    pub peak_used: u64,
}

// ---------------------------------------------------------------------------
// MemoryPool
// ---------------------------------------------------------------------------

/// A fixed-capacity pool of one resource category.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    id: PoolId,
    category: PoolCategory,
    capacity: u64,
    used: u64,
    allocated: BTreeMap<BlockId, Block>,
    free: Vec<Block>,
    fragmentation: f64,
    defrag_threshold: f64,
    ids: BlockIds,
    counters: PoolCounters,
}

fn align_up(offset: u64, alignment: u64) -> Option<u64> {
    let mask = alignment - 1;
    offset.checked_add(mask).map(|v| v & !mask)
}

/// Aligned start of `size` bytes inside `block`, if they fit.
fn fit_start(block: &Block, size: u64, alignment: u64) -> Option<u64> {
    let start = align_up(block.offset, alignment)?;
    let end = start.checked_add(size)?;
    (end <= block.end()).then_some(start)
}

impl MemoryPool {
    /// Create an empty pool: one free block spanning the whole capacity.
    pub(crate) fn new(
        id: PoolId,
        category: PoolCategory,
        capacity: u64,
        defrag_threshold: f64,
        ids: BlockIds,
        now: Instant,
    ) -> Self {
        let whole = Block::free(ids.next(), id, 0, capacity, now);
        Self {
            id,
            category,
            capacity,
            used: 0,
            allocated: BTreeMap::new(),
            free: vec![whole],
            fragmentation: 0.0,
            defrag_threshold,
            ids,
            counters: PoolCounters::default(),
        }
    }

    /// Pool identity.
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Resource category.
    pub fn category(&self) -> PoolCategory {
        self.category
    }

    /// Total bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes in allocated blocks.
    pub fn used(&self) -> u64 {
        self.used
    }

    /// `capacity - used`.
    pub fn headroom(&self) -> u64 {
        self.capacity - self.used
    }

    /// Current fragmentation ratio (see [`fragmentation_ratio`]).
    pub fn fragmentation(&self) -> f64 {
        self.fragmentation
    }

    /// Fragmentation at or above which `defragment_all` visits this pool.
    pub fn defrag_threshold(&self) -> f64 {
        self.defrag_threshold
    }

    /// Whether fragmentation has reached the threshold.
    pub fn needs_defragmentation(&self) -> bool {
        self.fragmentation >= self.defrag_threshold && self.free.len() > 1
    }

    /// Lifetime counters.
    pub fn counters(&self) -> PoolCounters {
        self.counters
    }

    /// Free blocks, sorted by offset.
    pub fn free_blocks(&self) -> &[Block] {
        &self.free
    }

    /// Allocated blocks, ordered by id.
    pub fn allocated_blocks(&self) -> impl Iterator<Item = &Block> {
        self.allocated.values()
    }

    /// Number of allocated blocks.
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    /// An allocated block by id.
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.allocated.get(&id)
    }

    /// Size of the largest free block.
    pub fn largest_free_block(&self) -> u64 {
        self.free.iter().map(|b| b.size).max().unwrap_or(0)
    }

    /// Sum of free block sizes.
    pub fn free_bytes(&self) -> u64 {
        self.free.iter().map(|b| b.size).sum()
    }

    /// Index into the free set of the block `strategy` picks for `size`
    /// bytes at `alignment`.
    pub(crate) fn find_free(
        &self,
        size: u64,
        alignment: u64,
        strategy: PlacementStrategy,
    ) -> Option<usize> {
        let mut candidates = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, block)| fit_start(block, size, alignment).is_some());

        match strategy {
            // The free set is offset-sorted, so the first fit is the lowest.
            PlacementStrategy::FirstFit => candidates.next().map(|(i, _)| i),
            PlacementStrategy::BestFit => candidates
                .min_by_key(|(_, block)| (block.size, block.offset))
                .map(|(i, _)| i),
            PlacementStrategy::WorstFit => candidates
                .min_by_key(|(_, block)| (std::cmp::Reverse(block.size), block.offset))
                .map(|(i, _)| i),
        }
    }

    /// Carve `placement.size` bytes out of the free block at `index`.
    ///
    /// The aligned prefix becomes an allocated block; a leading alignment
    /// gap and any trailing remainder stay free under fresh ids.
    pub(crate) fn carve(&mut self, index: usize, placement: Placement, now: Instant) -> Block {
        let source = self.free.remove(index);
        // `find_free` only hands out indices that fit.
        let start = fit_start(&source, placement.size, placement.alignment).unwrap_or(source.offset);
        let end = start + placement.size;

        let mut pieces = Vec::with_capacity(2);
        if start > source.offset {
            pieces.push(Block::free(
                self.ids.next(),
                self.id,
                source.offset,
                start - source.offset,
                now,
            ));
        }
        if end < source.end() {
            pieces.push(Block::free(
                self.ids.next(),
                self.id,
                end,
                source.end() - end,
                now,
            ));
        }
        for piece in pieces {
            self.insert_free(piece);
        }

        let block = Block {
            id: self.ids.next(),
            pool: self.id,
            offset: start,
            size: placement.size,
            allocated: true,
            owner: Some(placement.owner),
            resource_id: placement.resource_id,
            allocated_at: now,
            last_accessed: now,
            access_count: 1,
            priority: placement.priority,
            persistent: placement.persistent,
            compressible: placement.compressible,
            original_size: None,
        };

        tracing::trace!(
            pool = %self.id,
            block = %block.id,
            offset = block.offset,
            size = block.size,
            "carved block"
        );

        self.used += block.size;
        self.counters.allocations += 1;
        self.counters.peak_used = self.counters.peak_used.max(self.used);
        self.allocated.insert(block.id, block.clone());
        self.refresh_fragmentation();
        block
    }

    pub(crate) fn record_failure(&mut self) {
        self.counters.failures += 1;
    }

    /// Return an allocated block to the free set and coalesce.
    ///
    /// Yields the block as it was just before release, or `None` if the id
    /// is not allocated here.
    pub(crate) fn release(&mut self, id: BlockId, now: Instant) -> Option<Block> {
        let mut block = self.allocated.remove(&id)?;
        let snapshot = block.clone();

        block.release(now);
        self.used -= block.size;
        self.counters.frees += 1;
        self.insert_free(block);
        self.coalesce();
        Some(snapshot)
    }

    /// Record an access to an allocated block.
    pub(crate) fn touch(&mut self, id: BlockId, now: Instant) -> bool {
        match self.allocated.get_mut(&id) {
            Some(block) => {
                block.access_count += 1;
                block.last_accessed = now;
                true
            }
            None => false,
        }
    }

    /// Shrink an allocated block in place to `new_size` bytes.
    ///
    /// The released tail becomes free space and is coalesced. Returns the
    /// number of bytes released, or `None` if the block is unknown, already
    /// compressed, or `new_size` would not shrink it.
    pub(crate) fn shrink(&mut self, id: BlockId, new_size: u64, now: Instant) -> Option<u64> {
        let block = self.allocated.get_mut(&id)?;
        if block.is_compressed() || new_size == 0 || new_size >= block.size {
            return None;
        }

        let delta = block.size - new_size;
        block.original_size = Some(block.size);
        block.size = new_size;
        let tail = Block::free(self.ids.next(), self.id, block.end(), delta, now);

        self.used -= delta;
        self.counters.compressions += 1;
        self.insert_free(tail);
        self.coalesce();
        Some(delta)
    }

    /// Merge adjacent free blocks until a full pass makes no merge.
    ///
    /// Returns the number of merges performed. Each merged range is issued
    /// a fresh id.
    pub(crate) fn coalesce(&mut self) -> usize {
        self.free.sort_by_key(|b| b.offset);

        let mut merges = 0;
        loop {
            let mut merged = false;
            let mut i = 0;
            while i + 1 < self.free.len() {
                if self.free[i].end() == self.free[i + 1].offset {
                    let next = self.free.remove(i + 1);
                    let first = &mut self.free[i];
                    first.size += next.size;
                    first.id = self.ids.next();
                    merges += 1;
                    merged = true;
                } else {
                    i += 1;
                }
            }
            if !merged {
                break;
            }
        }

        if merges > 0 {
            tracing::trace!(pool = %self.id, merges, free_blocks = self.free.len(), "coalesced");
        }
        self.refresh_fragmentation();
        merges
    }

    /// Coalesce on demand and report the estimated bytes reclaimed:
    /// `(fragmentation_before - fragmentation_after) * capacity`.
    pub(crate) fn defragment(&mut self) -> u64 {
        let before = self.fragmentation;
        self.coalesce();
        let after = self.fragmentation;
        self.counters.defragmentations += 1;

        let reclaimed = ((before - after).max(0.0) * self.capacity as f64).round() as u64;
        tracing::debug!(pool = %self.id, before, after, reclaimed, "defragmented pool");
        reclaimed
    }

    /// Drop every block and start over with one free block.
    pub(crate) fn reset(&mut self, now: Instant) {
        self.allocated.clear();
        self.free = vec![Block::free(self.ids.next(), self.id, 0, self.capacity, now)];
        self.used = 0;
        self.refresh_fragmentation();
    }

    fn insert_free(&mut self, block: Block) {
        let at = self.free.partition_point(|b| b.offset < block.offset);
        self.free.insert(at, block);
    }

    fn refresh_fragmentation(&mut self) {
        self.fragmentation = fragmentation_ratio(self.free.len());
    }

    /// Check the capacity and non-overlap invariants.
    ///
    /// Fails with [`MemoryError::InvalidState`] describing the first
    /// violation found.
    pub fn verify(&self) -> MemoryResult<()> {
        let allocated: u64 = self.allocated.values().map(|b| b.size).sum();
        let free: u64 = self.free_bytes();
        if allocated + free != self.capacity {
            return Err(MemoryError::invalid_state(format!(
                "{}: allocated {allocated} + free {free} != capacity {}",
                self.id, self.capacity
            )));
        }
        if allocated != self.used {
            return Err(MemoryError::invalid_state(format!(
                "{}: used {} != allocated {allocated}",
                self.id, self.used
            )));
        }

        let mut all: Vec<&Block> = self.allocated.values().chain(self.free.iter()).collect();
        all.sort_by_key(|b| b.offset);
        for pair in all.windows(2) {
            if pair[0].overlaps(pair[1]) {
                return Err(MemoryError::invalid_state(format!(
                    "{}: {} [{}, {}) overlaps {} [{}, {})",
                    self.id,
                    pair[0].id,
                    pair[0].offset,
                    pair[0].end(),
                    pair[1].id,
                    pair[1].offset,
                    pair[1].end()
                )));
            }
        }
        if self.free.windows(2).any(|w| w[0].offset > w[1].offset) {
            return Err(MemoryError::invalid_state(format!(
                "{}: free set is not sorted by offset",
                self.id
            )));
        }
        Ok(())
    }
}
