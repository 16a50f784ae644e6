//! Blocks, identities and resource categories.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::request::AllocationPriority;
use crate::consumer::ConsumerId;

// ---------------------------------------------------------------------------
// PoolCategory
// ---------------------------------------------------------------------------

/// Resource category a pool is dedicated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PoolCategory {
    /// Decoded image surfaces uploaded for display.
    Texture,
    /// Vertex, index and uniform buffers.
    Buffer,
    /// Derived data kept around for reuse (thumbnails, pyramids).
    Cache,
    /// Short-lived working memory.
    Scratch,
}

impl PoolCategory {
    /// All categories, in declaration order.
    pub const ALL: [Self; 4] = [Self::Texture, Self::Buffer, Self::Cache, Self::Scratch];

    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Texture => "texture",
            Self::Buffer => "buffer",
            Self::Cache => "cache",
            Self::Scratch => "scratch",
        }
    }
}

impl fmt::Display for PoolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Identity of a pool inside one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub(crate) u32);

impl PoolId {
    /// Raw index of the pool in the registry's pool table.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// Identity of a block.
///
/// Ids are handed out from a monotonic counter and never reused for a
/// different byte range: splitting or merging free space always mints a
/// fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u64);

impl BlockId {
    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block-{}", self.0)
    }
}

/// Shared monotonic block id source for every pool in a registry.
#[derive(Debug, Clone, Default)]
pub struct BlockIds(Arc<AtomicU64>);

impl BlockIds {
    /// Mint the next id.
    pub fn next(&self) -> BlockId {
        BlockId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A contiguous byte range `[offset, offset + size)` inside one pool.
#[derive(Debug, Clone)]
pub struct Block {
    /// Block identity.
    pub id: BlockId,
    /// Owning pool.
    pub pool: PoolId,
    /// Start of the range within the pool.
    pub offset: u64,
    /// Length of the range.
    pub size: u64,
    /// Whether the range is currently owned by a consumer.
    pub allocated: bool,
    /// Owning consumer, set while allocated.
    pub owner: Option<ConsumerId>,
    /// Caller-supplied resource identifier, set while allocated.
    pub resource_id: Option<String>,
    /// When the range was handed out (or released, for free blocks).
    pub allocated_at: Instant,
    /// Last time the owner touched the block.
    pub last_accessed: Instant,
    /// Number of recorded accesses; allocation counts as the first.
    pub access_count: u64,
    /// Effective priority (request priority plus the owner's boost).
    pub priority: AllocationPriority,
    /// Exempt from retention, cleanup and leak heuristics.
    pub persistent: bool,
    /// Eligible for the compression pass.
    pub compressible: bool,
    /// Size before compression, once the block has been compressed.
    pub original_size: Option<u64>,
}

impl Block {
    /// A free range.
    pub(crate) fn free(id: BlockId, pool: PoolId, offset: u64, size: u64, now: Instant) -> Self {
        Self {
            id,
            pool,
            offset,
            size,
            allocated: false,
            owner: None,
            resource_id: None,
            allocated_at: now,
            last_accessed: now,
            access_count: 0,
            priority: AllocationPriority::Normal,
            persistent: false,
            compressible: false,
            original_size: None,
        }
    }

    /// One past the last byte of the range.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Whether `[offset, end)` intersects `other`'s range.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Whether the block has already been compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.original_size.is_some()
    }

    /// Time since the last access.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_accessed)
    }

    /// Time since allocation.
    #[must_use]
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.allocated_at)
    }

    /// Reset ownership fields when the range returns to the free set.
    pub(crate) fn release(&mut self, now: Instant) {
        self.allocated = false;
        self.owner = None;
        self.resource_id = None;
        self.access_count = 0;
        self.priority = AllocationPriority::Normal;
        self.persistent = false;
        self.compressible = false;
        self.original_size = None;
        self.allocated_at = now;
        self.last_accessed = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ids_are_monotonic_and_shared() {
        let ids = BlockIds::default();
        let clone = ids.clone();
        let a = ids.next();
        let b = clone.next();
        let c = ids.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn overlap_is_half_open() {
        let now = Instant::now();
        let ids = BlockIds::default();
        let a = Block::free(ids.next(), PoolId(0), 0, 100, now);
        let b = Block::free(ids.next(), PoolId(0), 100, 50, now);
        let c = Block::free(ids.next(), PoolId(0), 99, 2, now);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }
}
