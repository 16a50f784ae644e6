//! # lumen-memory
//!
//! Pool allocator and memory pressure monitor for the Lumen image viewer.
//!
//! The viewer keeps many large, short-lived image surfaces ("consumers")
//! resident at once. This crate gives them:
//! - fixed-capacity pools per resource category with first/best/worst-fit
//!   placement, coalescing and on-demand defragmentation
//! - per-consumer retention policies, heuristic compression and leak
//!   detection
//! - a pressure monitor that fits a trend over recent usage, classifies
//!   severity with hysteresis, raises cooldown-gated alerts and can run
//!   ranked remediations automatically
//!
//! ## Quick Start
//!
//! ```rust
//! use lumen_memory::prelude::*;
//!
//! let manager = MemoryManager::new(MemoryConfig::viewer())?;
//!
//! let request = AllocationRequest::new("viewport-1", PoolCategory::Texture, 4 << 20)
//!     .with_alignment(256);
//! match manager.allocate(request) {
//!     AllocationResult::Allocated(block) => {
//!         manager.touch(block.block);
//!         manager.free(block.block);
//!     }
//!     AllocationResult::Failed(failure) => {
//!         eprintln!("{}: {:?}", failure.reason, failure.suggestions);
//!     }
//! }
//!
//! // One pressure-sampling cycle; normally driven by `MonitorDriver`.
//! let outcome = manager.sample()?;
//! assert!(outcome.is_some());
//! # Ok::<(), lumen_memory::MemoryError>(())
//! ```
//!
//! ## Features
//!
//! - `serde` (default): `Serialize`/`Deserialize` for the configuration tree
//! - `driver` (default): [`MonitorDriver`], the tokio timer loop

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rust_2018_idioms)]

// Error types
pub mod error;

pub mod clock;
pub mod config;
pub mod consumer;
#[cfg(feature = "driver")]
#[cfg_attr(docsrs, doc(cfg(feature = "driver")))]
pub mod driver;
pub mod events;
pub mod manager;
pub mod pool;
pub mod pressure;
pub mod retention;
pub mod stats;

pub use crate::config::MemoryConfig;
#[cfg(feature = "driver")]
pub use crate::driver::MonitorDriver;
pub use crate::error::{MemoryError, MemoryResult};
pub use crate::manager::MemoryManager;

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{MemoryConfig, PoolSelection, PoolSpec};
    pub use crate::consumer::{ConsumerController, ConsumerId, RetentionPolicy};
    #[cfg(feature = "driver")]
    pub use crate::driver::MonitorDriver;
    pub use crate::error::{MemoryError, MemoryResult};
    pub use crate::events::MemoryEvent;
    pub use crate::manager::MemoryManager;
    pub use crate::pool::{
        AllocationPriority, AllocationRequest, AllocationResult, BlockId, FailureReason,
        PlacementStrategy, PoolCategory, Suggestion,
    };
    pub use crate::pressure::{Alert, RemediationAction, Severity, TrendDirection};
    pub use crate::retention::LeakReport;
    pub use crate::stats::MemoryStatistics;
}
