//! State-change notifications.
//!
//! Provides [`MemoryEvent`] and an [`EventBus`] backed by
//! `tokio::sync::broadcast`. Emission is synchronous, so a receiver
//! subscribed before an operation can `try_recv` its events as soon as the
//! operation returns.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::consumer::ConsumerId;
use crate::pool::AllocationFailure;
use crate::pressure::{Alert, PressureSample, RemediationAction, Severity, Trend};
use crate::retention::LeakReport;

// ---------------------------------------------------------------------------
// MemoryEvent
// ---------------------------------------------------------------------------

/// Events emitted by a [`MemoryManager`](crate::MemoryManager).
#[derive(Debug, Clone)]
pub enum MemoryEvent {
    /// An allocation request could not be placed.
    AllocationFailed {
        /// Requesting consumer.
        consumer: ConsumerId,
        /// The structured failure returned to the caller.
        failure: AllocationFailure,
    },
    /// An allocation pushed a consumer past its soft cap. The allocation
    /// itself succeeded.
    SoftCapExceeded {
        /// The consumer.
        consumer: ConsumerId,
        /// Bytes it now holds.
        allocated: u64,
        /// Its soft cap.
        soft_cap: u64,
    },
    /// Severity changed on a sampling tick.
    SeverityChanged {
        /// Previous level.
        from: Severity,
        /// New level.
        to: Severity,
    },
    /// Severity dropped on a sampling tick.
    PressureResolved {
        /// Previous level.
        from: Severity,
        /// New level.
        to: Severity,
    },
    /// The sticky emergency flag was raised.
    EmergencyEntered {
        /// Level that raised it.
        severity: Severity,
    },
    /// The sticky emergency flag was cleared.
    EmergencyCleared,
    /// A cooldown-gated alert.
    Alert(Alert),
    /// A confident, sustained usage trend.
    TrendDetected(Trend),
    /// Usage is projected to exhaust capacity within the horizon.
    ExhaustionWarning {
        /// Projected time to exhaustion.
        time_to_exhaustion: Duration,
        /// Sample the projection was made from.
        snapshot: PressureSample,
    },
    /// Auto-response ran the recommendations of an alert.
    AutoResponse {
        /// Level of the alert.
        severity: Severity,
        /// Actions that succeeded, in execution order.
        executed: Vec<RemediationAction>,
        /// Actions that failed and were skipped.
        failed: Vec<RemediationAction>,
        /// Bytes reclaimed by the successful actions.
        bytes_freed: u64,
    },
    /// Leak detection found suspicious blocks for a consumer.
    LeakSuspected(LeakReport),
    /// An optimization run finished for a consumer.
    ConsumerOptimized {
        /// The consumer.
        consumer: ConsumerId,
        /// Bytes reclaimed.
        bytes_freed: u64,
    },
    /// Every block of a consumer was freed.
    ConsumerReleased {
        /// The consumer.
        consumer: ConsumerId,
        /// Bytes freed.
        bytes_freed: u64,
    },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus.
///
/// Emission is fire-and-forget: if no subscribers are listening the event is
/// dropped, and a subscriber that falls more than `buffer_size` events
/// behind receives `Lagged` and skips ahead.
pub struct EventBus {
    sender: broadcast::Sender<MemoryEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers. Never blocks.
    pub fn emit(&self, event: MemoryEvent) {
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
