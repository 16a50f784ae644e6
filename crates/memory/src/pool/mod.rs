//! Pools, blocks and allocation routing.
//!
//! [`MemoryPool`] carves and merges byte ranges inside one fixed-capacity
//! pool and knows nothing about consumers. [`PoolRegistry`] owns every pool,
//! routes [`AllocationRequest`]s to them and keeps per-consumer books.

mod allocator;
mod block;
mod registry;
mod request;

pub use allocator::{
    FRAGMENTATION_STEP, MemoryPool, PlacementStrategy, PoolCounters, fragmentation_ratio,
};
pub use block::{Block, BlockId, BlockIds, PoolCategory, PoolId};
pub use registry::PoolRegistry;
pub use request::{
    Allocation, AllocationFailure, AllocationPriority, AllocationRequest, AllocationResult,
    FailureReason, Suggestion,
};
