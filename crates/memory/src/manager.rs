//! The memory manager: one explicit context object per subsystem instance.
//!
//! [`MemoryManager`] owns the pool registry and the pressure monitor behind
//! a single allocator-wide lock, an [`EventBus`] for state-change
//! notifications, and the injected [`Clock`]. Every operation takes `&self`
//! and completes synchronously.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::config::MemoryConfig;
use crate::consumer::{ConsumerController, ConsumerId, RetentionPolicy};
use crate::error::{MemoryError, MemoryResult};
use crate::events::{EventBus, MemoryEvent};
use crate::pool::{AllocationRequest, AllocationResult, Block, BlockId, PoolRegistry};
use crate::pressure::{
    Alert, PressureMonitor, PressureSample, RemediationAction, Severity, TickOutcome,
};
use crate::retention::{self, LeakReport};
use crate::stats::{ConsumerStats, GlobalStats, MemoryStatistics, PoolStats};

// ---------------------------------------------------------------------------
// Sampling guard
// ---------------------------------------------------------------------------

/// Holds the "sampling in progress" flag for the lifetime of one cycle.
struct SamplingGuard<'a>(&'a AtomicBool);

impl<'a> SamplingGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SamplingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// MemoryManager
// ---------------------------------------------------------------------------

struct State {
    registry: PoolRegistry,
    monitor: PressureMonitor,
    failed_requests: u64,
}

/// Pool allocator plus pressure monitor.
///
/// # Examples
///
/// ```
/// use lumen_memory::prelude::*;
///
/// let manager = MemoryManager::new(MemoryConfig::single_pool(PoolCategory::Texture, 1000))?;
/// let request = AllocationRequest::new("viewport-1", PoolCategory::Texture, 300);
/// let block = manager.allocate(request).allocation().map(|a| a.block);
/// assert!(block.is_some_and(|b| manager.free(b)));
/// # Ok::<(), lumen_memory::MemoryError>(())
/// ```
pub struct MemoryManager {
    config: MemoryConfig,
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    sampling: AtomicBool,
    controller: Option<Arc<dyn ConsumerController>>,
}

impl MemoryManager {
    /// Create a manager on the system clock.
    pub fn new(config: MemoryConfig) -> MemoryResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager on an injected clock.
    pub fn with_clock(config: MemoryConfig, clock: Arc<dyn Clock>) -> MemoryResult<Self> {
        config.validate()?;
        let now = clock.now();
        let state = State {
            registry: PoolRegistry::new(&config, now),
            monitor: PressureMonitor::new(config.monitor.clone()),
            failed_requests: 0,
        };
        tracing::debug!(
            pools = config.pools.len(),
            placement = ?config.placement,
            "memory manager created"
        );
        Ok(Self {
            config,
            state: Mutex::new(state),
            clock,
            events: EventBus::default(),
            sampling: AtomicBool::new(false),
            controller: None,
        })
    }

    /// Install the host hooks used by quality reduction and suspension.
    pub fn with_controller(mut self, controller: Arc<dyn ConsumerController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Configuration the manager was built with.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Subscribe to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.events.subscribe()
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    // -- allocation ---------------------------------------------------------

    /// Place a block. Never blocks on memory becoming available.
    pub fn allocate(&self, request: AllocationRequest) -> AllocationResult {
        let now = self.now();
        let mut state = self.state.lock();

        let was_over = state
            .registry
            .consumer(&request.consumer)
            .is_some_and(|p| p.over_soft_cap());
        let result = state.registry.allocate(&request, now);

        match &result {
            AllocationResult::Allocated(_) => {
                let crossed = state
                    .registry
                    .consumer(&request.consumer)
                    .filter(|p| !was_over && p.over_soft_cap())
                    .and_then(|p| p.soft_cap.map(|cap| (p.allocated_bytes, cap)));
                if let Some((allocated, soft_cap)) = crossed {
                    tracing::warn!(
                        consumer = %request.consumer,
                        allocated,
                        soft_cap,
                        "consumer exceeded its soft cap"
                    );
                    self.events.emit(MemoryEvent::SoftCapExceeded {
                        consumer: request.consumer.clone(),
                        allocated,
                        soft_cap,
                    });
                }
            }
            AllocationResult::Failed(failure) => {
                state.failed_requests += 1;
                self.events.emit(MemoryEvent::AllocationFailed {
                    consumer: request.consumer.clone(),
                    failure: failure.clone(),
                });
            }
        }
        result
    }

    /// Return a block to its pool. `false` for an unknown id.
    pub fn free(&self, block: BlockId) -> bool {
        let now = self.now();
        let freed = self.state.lock().registry.free(block, now).is_some();
        if !freed {
            tracing::warn!(block = %block, "free of unknown block ignored");
        }
        freed
    }

    /// Record an access to a block. `false` for an unknown id.
    pub fn touch(&self, block: BlockId) -> bool {
        let now = self.now();
        self.state.lock().registry.touch(block, now)
    }

    /// Copy of an allocated block.
    pub fn block(&self, block: BlockId) -> Option<Block> {
        self.state.lock().registry.block(block).cloned()
    }

    // -- reclamation --------------------------------------------------------

    /// Run the compression, cleanup and retention passes for one consumer.
    ///
    /// Returns the bytes reclaimed across all three passes.
    pub fn optimize_consumer(&self, consumer: &ConsumerId) -> MemoryResult<u64> {
        let now = self.now();
        let report = {
            let mut state = self.state.lock();
            retention::optimize_consumer(
                &mut state.registry,
                consumer,
                &self.config.compression,
                now,
            )?
        };
        self.events.emit(MemoryEvent::ConsumerOptimized {
            consumer: consumer.clone(),
            bytes_freed: report.total(),
        });
        Ok(report.total())
    }

    /// Defragment every pool at or above its fragmentation threshold.
    ///
    /// Returns the reclaimed-bytes estimate.
    pub fn defragment_all(&self) -> u64 {
        let reclaimed = self.state.lock().registry.defragment_all();
        tracing::debug!(reclaimed, "defragmented pools");
        reclaimed
    }

    /// Flag blocks that look leaked. Nothing is freed.
    pub fn detect_leaks(&self) -> Vec<LeakReport> {
        let now = self.now();
        let reports = retention::detect_leaks(
            &self.state.lock().registry,
            &self.config.leak_detection,
            now,
        );
        for report in &reports {
            tracing::warn!(
                consumer = %report.consumer,
                blocks = report.blocks.len(),
                bytes = report.bytes,
                "suspected leak"
            );
            self.events.emit(MemoryEvent::LeakSuspected(report.clone()));
        }
        reports
    }

    /// Run one remediation action now.
    ///
    /// Returns the bytes it reclaimed (`0` for actions delegated to the
    /// consumer controller).
    pub fn execute(&self, action: RemediationAction) -> MemoryResult<u64> {
        let now = self.now();
        match action {
            RemediationAction::ReduceQuality => {
                let controller = self.controller(action)?;
                let targets: Vec<ConsumerId> = {
                    let state = self.state.lock();
                    state
                        .registry
                        .consumers()
                        .filter(|p| !p.blocks.is_empty())
                        .map(|p| p.id.clone())
                        .collect()
                };
                self.delegate(action, &targets, |c| controller.reduce_quality(c))
            }
            RemediationAction::SuspendLowPriority => {
                let controller = self.controller(action)?;
                let targets = retention::low_priority_consumers(&self.state.lock().registry);
                self.delegate(action, &targets, |c| controller.suspend(c))
            }
            _ => {
                let mut state = self.state.lock();
                let registry = &mut state.registry;
                let freed = match action {
                    RemediationAction::CleanupInactive => retention::cleanup_inactive(registry, now),
                    RemediationAction::DefragmentPools => registry.defragment_all(),
                    RemediationAction::CompressInactive => {
                        if !self.config.compression.enabled {
                            return Err(MemoryError::action_failed(
                                action.as_str(),
                                "compression is disabled",
                            ));
                        }
                        retention::compress_inactive(registry, &self.config.compression, now)
                    }
                    RemediationAction::AggressiveCleanup => retention::aggressive_cleanup(
                        registry,
                        self.config.compression.inactivity_threshold,
                        now,
                    ),
                    RemediationAction::EmergencyCleanup => {
                        retention::emergency_cleanup(registry, now)
                    }
                    RemediationAction::ReduceQuality | RemediationAction::SuspendLowPriority => 0,
                };
                tracing::debug!(action = %action, freed, "remediation executed");
                Ok(freed)
            }
        }
    }

    fn controller(&self, action: RemediationAction) -> MemoryResult<Arc<dyn ConsumerController>> {
        self.controller
            .clone()
            .ok_or_else(|| MemoryError::controller_unavailable(action.as_str()))
    }

    /// Call the controller for every target without holding the lock, so
    /// the host may call back into the manager. The first failure is
    /// reported after every target has been tried.
    fn delegate(
        &self,
        action: RemediationAction,
        targets: &[ConsumerId],
        call: impl Fn(&ConsumerId) -> MemoryResult<()>,
    ) -> MemoryResult<u64> {
        let mut first_error = None;
        for consumer in targets {
            if let Err(error) = call(consumer) {
                tracing::warn!(action = %action, consumer = %consumer, %error, "controller call failed");
                first_error.get_or_insert(error);
            }
        }
        tracing::debug!(action = %action, consumers = targets.len(), "remediation delegated");
        first_error.map_or(Ok(0), Err)
    }

    // -- pressure monitoring ------------------------------------------------

    /// Run one pressure-sampling cycle.
    ///
    /// Returns `Ok(None)` without doing anything if another cycle is
    /// already in progress.
    pub fn sample(&self) -> MemoryResult<Option<TickOutcome>> {
        let Some(_guard) = SamplingGuard::try_acquire(&self.sampling) else {
            tracing::trace!("sampling cycle already active, skipping");
            return Ok(None);
        };

        let now = self.now();
        let mut outcome = {
            let mut state = self.state.lock();
            let (used, total) = (state.registry.used(), state.registry.total());
            if used > total {
                return Err(MemoryError::invalid_state(format!(
                    "used {used} exceeds capacity {total}"
                )));
            }
            state.monitor.tick(PressureSample::new(now, used, total))
        };

        self.publish_transition(&outcome);

        if let Some(alert) = outcome.alert.as_mut() {
            if self.config.monitor.auto_response {
                self.auto_respond(alert);
            }
            tracing::info!(
                severity = %alert.severity,
                ratio = alert.snapshot.ratio(),
                recommendations = alert.recommendations.len(),
                "memory pressure alert"
            );
            self.events.emit(MemoryEvent::Alert(alert.clone()));
        }

        Ok(Some(outcome))
    }

    fn publish_transition(&self, outcome: &TickOutcome) {
        let update = outcome.update;
        if update.changed() {
            tracing::info!(from = %update.from, to = %update.to, "memory pressure changed");
            self.events.emit(MemoryEvent::SeverityChanged {
                from: update.from,
                to: update.to,
            });
            if update.resolved() {
                self.events.emit(MemoryEvent::PressureResolved {
                    from: update.from,
                    to: update.to,
                });
            }
        }
        if update.emergency_entered {
            tracing::warn!(severity = %update.to, "memory emergency entered");
            self.events
                .emit(MemoryEvent::EmergencyEntered { severity: update.to });
        }
        if update.emergency_cleared {
            tracing::info!(severity = %update.to, "memory emergency cleared");
            self.events.emit(MemoryEvent::EmergencyCleared);
        }
        if let Some(trend) = outcome.reportable_trend() {
            tracing::debug!(
                direction = %trend.direction,
                rate = trend.rate,
                confidence = trend.confidence,
                "memory trend detected"
            );
            self.events.emit(MemoryEvent::TrendDetected(trend.clone()));
        }
        if let Some(eta) = outcome.exhaustion_warning {
            tracing::warn!(
                seconds = eta.as_secs_f64(),
                used = outcome.sample.used,
                total = outcome.sample.total,
                "memory exhaustion projected"
            );
            self.events.emit(MemoryEvent::ExhaustionWarning {
                time_to_exhaustion: eta,
                snapshot: outcome.sample,
            });
        }
    }

    /// Run every auto-executable recommendation of `alert` in priority
    /// order. Failures are logged and skipped.
    fn auto_respond(&self, alert: &mut Alert) {
        let mut executed = Vec::new();
        let mut failed = Vec::new();
        let mut bytes_freed = 0;

        for rec in alert.recommendations.iter().filter(|r| r.auto_executable) {
            match self.execute(rec.action) {
                Ok(freed) => {
                    bytes_freed += freed;
                    executed.push(rec.action);
                }
                Err(error) => {
                    tracing::warn!(action = %rec.action, %error, "remediation failed, skipping");
                    failed.push(rec.action);
                }
            }
        }

        if executed.is_empty() && failed.is_empty() {
            return;
        }
        self.state.lock().monitor.record_auto_response(&executed);
        alert.executed.clone_from(&executed);

        tracing::info!(
            severity = %alert.severity,
            executed = executed.len(),
            failed = failed.len(),
            bytes_freed,
            "auto-response complete"
        );
        self.events.emit(MemoryEvent::AutoResponse {
            severity: alert.severity,
            executed,
            failed,
            bytes_freed,
        });
    }

    /// Current severity.
    pub fn severity(&self) -> Severity {
        self.state.lock().monitor.severity()
    }

    /// Whether the sticky emergency flag is set.
    pub fn in_emergency(&self) -> bool {
        self.state.lock().monitor.in_emergency()
    }

    /// Copy of the alert history, oldest first.
    pub fn alert_history(&self) -> Vec<Alert> {
        self.state.lock().monitor.history().to_vec()
    }

    /// `(used, total)` across every pool.
    pub fn usage(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.registry.used(), state.registry.total())
    }

    // -- consumers ----------------------------------------------------------

    /// Create or update a consumer profile.
    pub fn register_consumer(
        &self,
        consumer: impl Into<ConsumerId>,
        policy: RetentionPolicy,
        soft_cap: Option<u64>,
    ) -> MemoryResult<()> {
        let now = self.now();
        self.state
            .lock()
            .registry
            .register_consumer(consumer.into(), policy, soft_cap, now)
    }

    /// Replace a consumer's retention policy.
    pub fn set_retention_policy(
        &self,
        consumer: &ConsumerId,
        policy: RetentionPolicy,
    ) -> MemoryResult<()> {
        self.state
            .lock()
            .registry
            .set_retention_policy(consumer, policy)
    }

    /// Free every block of a consumer. The profile is kept.
    pub fn release_consumer(&self, consumer: &ConsumerId) -> MemoryResult<u64> {
        let now = self.now();
        let freed = self.state.lock().registry.release_consumer(consumer, now)?;
        tracing::debug!(consumer = %consumer, freed, "released consumer");
        self.events.emit(MemoryEvent::ConsumerReleased {
            consumer: consumer.clone(),
            bytes_freed: freed,
        });
        Ok(freed)
    }

    /// Subsystem teardown: drop every block, profile, sample and alert, and
    /// zero the failure and alert counters.
    pub fn dispose(&self) {
        let now = self.now();
        let mut state = self.state.lock();
        state.registry.dispose(now);
        state.monitor.reset();
        state.failed_requests = 0;
        tracing::debug!("memory manager disposed");
    }

    // -- inspection ---------------------------------------------------------

    /// Snapshot of every pool, consumer and the global totals.
    pub fn statistics(&self) -> MemoryStatistics {
        let state = self.state.lock();
        let registry = &state.registry;
        let monitor = &state.monitor;

        let pools: Vec<PoolStats> = registry.pools().iter().map(PoolStats::of).collect();
        let consumers: Vec<ConsumerStats> = registry.consumers().map(ConsumerStats::of).collect();
        let (used, capacity) = (registry.used(), registry.total());

        let global = GlobalStats {
            capacity,
            used,
            ratio: PressureSample::new(self.now(), used, capacity).ratio(),
            severity: monitor.severity(),
            emergency: monitor.in_emergency(),
            alerts_raised: monitor.alerts_raised(),
            consumers: consumers.len(),
            allocations: pools.iter().map(|p| p.allocations).sum(),
            frees: pools.iter().map(|p| p.frees).sum(),
            failed_requests: state.failed_requests,
        };
        MemoryStatistics {
            pools,
            consumers,
            global,
        }
    }

    /// Check the pool and ownership invariants.
    pub fn verify(&self) -> MemoryResult<()> {
        self.state.lock().registry.verify()
    }
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("pools", &self.config.pools.len())
            .field("sampling", &self.sampling.load(Ordering::Relaxed))
            .field("controller", &self.controller.is_some())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
