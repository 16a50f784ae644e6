//! Allocation requests and their structured outcomes.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::block::{BlockId, PoolCategory, PoolId};
use crate::consumer::ConsumerId;

// ---------------------------------------------------------------------------
// AllocationPriority
// ---------------------------------------------------------------------------

/// Priority attached to a block; drives suspension and eviction order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AllocationPriority {
    /// Background or speculative surfaces.
    Low,
    /// Regular surfaces.
    #[default]
    Normal,
    /// Surfaces the user is looking at.
    High,
    /// Must never be reclaimed automatically.
    Critical,
}

impl AllocationPriority {
    /// Raise the priority by `steps` levels, saturating at `Critical`.
    #[must_use]
    pub fn boosted(self, steps: u8) -> Self {
        let level = (self as u8).saturating_add(steps).min(Self::Critical as u8);
        match level {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            _ => Self::Critical,
        }
    }
}

// ---------------------------------------------------------------------------
// AllocationRequest
// ---------------------------------------------------------------------------

/// A request to carve `size` bytes from a pool of `category`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Requested size in bytes.
    pub size: u64,
    /// Pool category to allocate from.
    pub category: PoolCategory,
    /// Consumer that will own the block.
    pub consumer: ConsumerId,
    /// Requested priority (before the consumer's boost).
    pub priority: AllocationPriority,
    /// Required offset alignment, a power of two.
    pub alignment: Option<u64>,
    /// Exempt the block from retention and cleanup.
    pub persistent: bool,
    /// Allow the compression pass to shrink the block.
    pub compressible: bool,
    /// Caller-side resource the block backs.
    pub resource_id: Option<String>,
}

impl AllocationRequest {
    /// A normal-priority, non-persistent, compressible request.
    pub fn new(consumer: impl Into<ConsumerId>, category: PoolCategory, size: u64) -> Self {
        Self {
            size,
            category,
            consumer: consumer.into(),
            priority: AllocationPriority::Normal,
            alignment: None,
            persistent: false,
            compressible: true,
            resource_id: None,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: AllocationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Require the block offset to be a multiple of `alignment`.
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Mark the block persistent.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Set whether the block may be compressed.
    pub fn with_compressible(mut self, compressible: bool) -> Self {
        self.compressible = compressible;
        self
    }

    /// Attach a resource identifier.
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Effective alignment; `1` when unspecified.
    pub(crate) fn effective_alignment(&self) -> u64 {
        self.alignment.unwrap_or(1)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.size == 0 {
            return Err("size must be greater than zero".to_string());
        }
        if let Some(alignment) = self.alignment {
            if !alignment.is_power_of_two() {
                return Err(format!("alignment {alignment} is not a power of two"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A successfully placed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// The new block.
    pub block: BlockId,
    /// Pool it was carved from.
    pub pool: PoolId,
    /// Category of that pool.
    pub category: PoolCategory,
    /// Offset within the pool.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
}

/// Why a request could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No pool of the category could ever hold the request.
    NoSuitablePool,
    /// A pool could hold it, but no single free block is large enough,
    /// even after one defragmentation attempt.
    InsufficientBlock,
    /// The request itself is malformed (zero size, bad alignment).
    InvalidRequest,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuitablePool => write!(f, "no suitable pool"),
            Self::InsufficientBlock => write!(f, "insufficient block"),
            Self::InvalidRequest => write!(f, "invalid request"),
        }
    }
}

/// An alternative the caller may retry with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suggestion {
    /// Retry with a smaller size.
    ReduceSize {
        /// Size that would currently fit.
        size: u64,
    },
    /// Retry in another category that has room.
    UseCategory {
        /// The other category.
        category: PoolCategory,
        /// Largest free block it currently has.
        available: u64,
    },
}

/// Structured allocation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationFailure {
    /// Failure class.
    pub reason: FailureReason,
    /// Requested size.
    pub requested: u64,
    /// Requested category.
    pub category: PoolCategory,
    /// Alternatives, possibly empty.
    pub suggestions: Vec<Suggestion>,
    /// Human-readable detail.
    pub detail: String,
}

/// Outcome of [`allocate`](crate::MemoryManager::allocate).
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "an allocation result reports whether the block exists"]
pub enum AllocationResult {
    /// The block was placed.
    Allocated(Allocation),
    /// The request could not be placed.
    Failed(AllocationFailure),
}

impl AllocationResult {
    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Allocated(_))
    }

    /// The placed block, if any.
    pub fn allocation(&self) -> Option<&Allocation> {
        match self {
            Self::Allocated(allocation) => Some(allocation),
            Self::Failed(_) => None,
        }
    }

    /// The failure, if any.
    pub fn failure(&self) -> Option<&AllocationFailure> {
        match self {
            Self::Allocated(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_boost_saturates() {
        assert_eq!(AllocationPriority::Low.boosted(0), AllocationPriority::Low);
        assert_eq!(AllocationPriority::Low.boosted(2), AllocationPriority::High);
        assert_eq!(
            AllocationPriority::High.boosted(200),
            AllocationPriority::Critical
        );
    }

    #[test]
    fn request_validation() {
        let ok = AllocationRequest::new("s", PoolCategory::Texture, 64).with_alignment(16);
        assert!(ok.validate().is_ok());

        let zero = AllocationRequest::new("s", PoolCategory::Texture, 0);
        assert!(zero.validate().is_err());

        let bad_align = AllocationRequest::new("s", PoolCategory::Texture, 64).with_alignment(24);
        assert!(bad_align.validate().is_err());
    }
}
