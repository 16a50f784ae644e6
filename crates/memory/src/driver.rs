//! Periodic timers for a [`MemoryManager`].
//!
//! [`MonitorDriver`] spawns one tokio task that runs the fast
//! pressure-sampling tick and the slower leak-detection tick until its
//! [`CancellationToken`] is cancelled. A failed cycle is logged and the
//! timer keeps going.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::manager::MemoryManager;

/// Background sampling and leak-detection loop.
pub struct MonitorDriver {
    manager: Arc<MemoryManager>,
    cancel: CancellationToken,
}

impl MonitorDriver {
    /// Create a driver for `manager`, stopped by `cancel`.
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>, cancel: CancellationToken) -> Self {
        Self { manager, cancel }
    }

    /// Spawn the background task.
    ///
    /// Both intervals fire immediately and then every
    /// `monitor.sampling_interval` / `leak_detection.interval`. Leak
    /// detection only runs when enabled in the manager's config.
    ///
    /// Returns a [`JoinHandle`](tokio::task::JoinHandle) that completes once
    /// the task has exited after [`shutdown`](Self::shutdown).
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let config = manager.config();
            let leaks_enabled = config.leak_detection.enabled;

            let mut sampling = tokio::time::interval(config.monitor.sampling_interval);
            sampling.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut leaks = tokio::time::interval(config.leak_detection.interval);
            leaks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(
                sampling_interval = ?config.monitor.sampling_interval,
                leak_detection = leaks_enabled,
                "memory monitor started"
            );

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = sampling.tick() => {
                        if let Err(error) = manager.sample() {
                            tracing::error!(%error, code = error.code(), "sampling cycle failed");
                        }
                    }
                    _ = leaks.tick(), if leaks_enabled => {
                        manager.detect_leaks();
                    }
                }
            }

            tracing::debug!("memory monitor stopped");
        })
    }

    /// Cancel the background task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for MonitorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorDriver")
            .field("manager", &self.manager)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::MemoryConfig;

    #[tokio::test]
    async fn driver_shuts_down_cleanly() {
        let manager = Arc::new(MemoryManager::new(MemoryConfig::testing()).unwrap());
        let driver = MonitorDriver::new(manager, CancellationToken::new());
        let handle = driver.start();

        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.shutdown();
        handle.await.unwrap();
        assert!(driver.is_cancelled());
    }
}
