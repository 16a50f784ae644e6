//! Standalone error types for lumen-memory
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Allocation failures are deliberately *not* represented here: a request
//! that cannot be placed returns a structured
//! [`AllocationFailure`](crate::pool::AllocationFailure) carrying
//! alternative suggestions. `MemoryError` covers misconfiguration, lookups
//! of unknown identities and remediation steps that could not run.

use thiserror::Error;

// ============================================================================
// Main Error Types
// ============================================================================

/// Memory management errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    // --- Configuration Errors ---
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // --- Lookup Errors ---
    #[error("Unknown block: {block_id}")]
    UnknownBlock { block_id: u64 },

    #[error("Unknown consumer: {consumer}")]
    UnknownConsumer { consumer: String },

    // --- Remediation Errors ---
    #[error("No consumer controller installed for action '{action}'")]
    ControllerUnavailable { action: &'static str },

    #[error("Consumer controller failed for '{consumer}': {reason}")]
    ControllerFailed { consumer: String, reason: String },

    #[error("Remediation action '{action}' failed: {reason}")]
    ActionFailed { action: &'static str, reason: String },

    // --- System Errors ---
    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },
}

impl MemoryError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ControllerFailed { .. } | Self::ActionFailed { .. }
        )
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
            Self::UnknownBlock { .. } => "MEM:POOL:UNKNOWN_BLOCK",
            Self::UnknownConsumer { .. } => "MEM:CONSUMER:UNKNOWN",
            Self::ControllerUnavailable { .. } => "MEM:REMEDIATION:NO_CONTROLLER",
            Self::ControllerFailed { .. } => "MEM:REMEDIATION:CONTROLLER",
            Self::ActionFailed { .. } => "MEM:REMEDIATION:FAILED",
            Self::InvalidState { .. } => "MEM:SYSTEM:STATE",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create invalid config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create unknown block error
    pub fn unknown_block(block_id: u64) -> Self {
        Self::UnknownBlock { block_id }
    }

    /// Create unknown consumer error
    pub fn unknown_consumer(consumer: impl Into<String>) -> Self {
        Self::UnknownConsumer {
            consumer: consumer.into(),
        }
    }

    /// Create controller unavailable error
    pub fn controller_unavailable(action: &'static str) -> Self {
        Self::ControllerUnavailable { action }
    }

    /// Create controller failed error
    pub fn controller_failed(consumer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ControllerFailed {
            consumer: consumer.into(),
            reason: reason.into(),
        }
    }

    /// Create action failed error
    pub fn action_failed(action: &'static str, reason: impl Into<String>) -> Self {
        Self::ActionFailed {
            action,
            reason: reason.into(),
        }
    }

    /// Create invalid state error
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for memory operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

// ============================================================================
// Tests
// ============================================================================
