//! Configuration for the memory manager.
//!
//! [`MemoryConfig`] is supplied once at construction. Every section has a
//! `Default`, and the whole tree can be loaded from any serde format when
//! the `serde` feature is enabled.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::consumer::RetentionPolicy;
use crate::error::{MemoryError, MemoryResult};
use crate::pool::{PlacementStrategy, PoolCategory};
use crate::pressure::{AlertCooldowns, SeverityThresholds};

const MIB: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

/// One row of the category → capacity table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolSpec {
    /// Category the pool serves.
    pub category: PoolCategory,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Per-pool override of [`DefragmentationConfig::threshold`].
    #[cfg_attr(feature = "serde", serde(default))]
    pub defrag_threshold: Option<f64>,
}

impl PoolSpec {
    /// A pool of `capacity` bytes for `category`.
    pub fn new(category: PoolCategory, capacity: u64) -> Self {
        Self {
            category,
            capacity,
            defrag_threshold: None,
        }
    }

    /// Override the defragmentation threshold for this pool.
    pub fn with_defrag_threshold(mut self, threshold: f64) -> Self {
        self.defrag_threshold = Some(threshold);
        self
    }
}

/// How candidate pools of one category are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PoolSelection {
    /// Ascending fragmentation ratio.
    #[default]
    LeastFragmented,
    /// Descending capacity.
    LargestCapacity,
}

/// Defragmentation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DefragmentationConfig {
    /// Defragment a pool once and retry when no free block fits.
    pub enabled: bool,
    /// Fragmentation at or above which `defragment_all` visits a pool.
    /// Default: 0.3
    pub threshold: f64,
}

impl Default for DefragmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.3,
        }
    }
}

/// Compression settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompressionConfig {
    /// Allow the compression pass at all.
    pub enabled: bool,
    /// Blocks idle longer than this are compressed. Default: 30s
    pub inactivity_threshold: Duration,
    /// Compressed size as a fraction of the original. Default: 0.6
    pub ratio: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inactivity_threshold: Duration::from_secs(30),
            ratio: 0.6,
        }
    }
}

/// Retention defaults applied to lazily created consumers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetentionConfig {
    /// Policy for consumers that were never registered explicitly.
    pub default_policy: RetentionPolicy,
    /// The cleanup pass only frees blocks accessed fewer times than this.
    /// Default: 3
    pub cleanup_access_floor: u64,
    /// Soft cap for consumers that were never registered explicitly.
    #[cfg_attr(feature = "serde", serde(default))]
    pub default_soft_cap: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_policy: RetentionPolicy::default(),
            cleanup_access_floor: 3,
            default_soft_cap: None,
        }
    }
}

/// Leak detection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LeakDetectionConfig {
    /// Run leak detection on the slow timer.
    pub enabled: bool,
    /// Slow timer period. Default: 60s
    pub interval: Duration,
    /// Blocks must be older than this to be suspicious. Default: 30 min
    pub age_threshold: Duration,
    /// ... and idle for longer than this. Default: 10 min
    pub idle_threshold: Duration,
}

impl Default for LeakDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            age_threshold: Duration::from_secs(30 * 60),
            idle_threshold: Duration::from_secs(10 * 60),
        }
    }
}

/// Which emergency-grade remediations auto-response may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmergencyActions {
    /// Aggressive and emergency cleanup.
    pub aggressive_cleanup: bool,
    /// Suspension of low-priority consumers through the host controller.
    pub suspend_low_priority: bool,
    /// Quality reduction through the host controller.
    pub force_reduced_quality: bool,
    /// Promote compression to an immediate action at `Critical` and above.
    pub emergency_compression: bool,
}

impl Default for EmergencyActions {
    fn default() -> Self {
        Self {
            aggressive_cleanup: true,
            suspend_low_priority: true,
            force_reduced_quality: true,
            emergency_compression: true,
        }
    }
}

/// Pressure monitor settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MonitorConfig {
    /// Fast timer period. Default: 1s
    pub sampling_interval: Duration,
    /// Sliding window the trend is fitted over. Default: 60s
    pub trend_window: Duration,
    /// Slope (ratio per sample) below which a trend is stable. Default: 0.001
    pub dead_band: f64,
    /// Severity boundaries.
    pub thresholds: SeverityThresholds,
    /// Per-severity alert cooldowns.
    pub cooldowns: AlertCooldowns,
    /// Maximum alerts kept in history. Default: 100
    pub alert_history_limit: usize,
    /// Maximum age of an alert in history. Default: 1h
    pub alert_history_max_age: Duration,
    /// Exhaustion projections under this raise a warning. Default: 60s
    pub exhaustion_horizon: Duration,
    /// Run auto-executable recommendations when an alert is raised.
    pub auto_response: bool,
    /// Emergency-grade action toggles.
    pub emergency: EmergencyActions,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_secs(1),
            trend_window: Duration::from_secs(60),
            dead_band: 0.001,
            thresholds: SeverityThresholds::default(),
            cooldowns: AlertCooldowns::default(),
            alert_history_limit: 100,
            alert_history_max_age: Duration::from_secs(60 * 60),
            exhaustion_horizon: Duration::from_secs(60),
            auto_response: true,
            emergency: EmergencyActions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryConfig
// ---------------------------------------------------------------------------

/// Complete configuration of a [`MemoryManager`](crate::MemoryManager).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MemoryConfig {
    /// Pool table; a category may appear more than once.
    pub pools: Vec<PoolSpec>,
    /// Free-block placement inside a pool.
    pub placement: PlacementStrategy,
    /// Ordering of candidate pools.
    pub pool_selection: PoolSelection,
    /// Defragmentation.
    pub defragmentation: DefragmentationConfig,
    /// Compression.
    pub compression: CompressionConfig,
    /// Retention defaults.
    pub retention: RetentionConfig,
    /// Leak detection.
    pub leak_detection: LeakDetectionConfig,
    /// Pressure monitor.
    pub monitor: MonitorConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::viewer()
    }
}

impl MemoryConfig {
    /// Desktop viewer sizing: 512 MiB textures, 128 MiB buffers, 256 MiB
    /// cache, 64 MiB scratch.
    pub fn viewer() -> Self {
        Self {
            pools: vec![
                PoolSpec::new(PoolCategory::Texture, 512 * MIB),
                PoolSpec::new(PoolCategory::Buffer, 128 * MIB),
                PoolSpec::new(PoolCategory::Cache, 256 * MIB),
                PoolSpec::new(PoolCategory::Scratch, 64 * MIB),
            ],
            placement: PlacementStrategy::BestFit,
            pool_selection: PoolSelection::LeastFragmented,
            defragmentation: DefragmentationConfig::default(),
            compression: CompressionConfig::default(),
            retention: RetentionConfig::default(),
            leak_detection: LeakDetectionConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }

    /// Small pools, eager reclamation.
    pub fn constrained() -> Self {
        let mut config = Self::viewer();
        config.pools = vec![
            PoolSpec::new(PoolCategory::Texture, 128 * MIB),
            PoolSpec::new(PoolCategory::Buffer, 32 * MIB),
            PoolSpec::new(PoolCategory::Cache, 32 * MIB),
            PoolSpec::new(PoolCategory::Scratch, 16 * MIB),
        ];
        config.defragmentation.threshold = 0.2;
        config.compression.inactivity_threshold = Duration::from_secs(10);
        config.compression.ratio = 0.5;
        config.retention.default_policy.max_unused_time = Duration::from_secs(60);
        config.retention.default_policy.max_age = Duration::from_secs(10 * 60);
        config
    }

    /// Tiny pools, no auto-response, no leak timer. For tests.
    pub fn testing() -> Self {
        let mut config = Self::viewer();
        config.pools = vec![
            PoolSpec::new(PoolCategory::Texture, 1000),
            PoolSpec::new(PoolCategory::Buffer, 1000),
            PoolSpec::new(PoolCategory::Cache, 1000),
            PoolSpec::new(PoolCategory::Scratch, 1000),
        ];
        config.monitor.auto_response = false;
        config.leak_detection.enabled = false;
        config
    }

    /// One pool of `capacity` bytes.
    pub fn single_pool(category: PoolCategory, capacity: u64) -> Self {
        Self::testing().with_pools(vec![PoolSpec::new(category, capacity)])
    }

    /// Replace the pool table.
    pub fn with_pools(mut self, pools: Vec<PoolSpec>) -> Self {
        self.pools = pools;
        self
    }

    /// Set the placement strategy.
    pub fn with_placement(mut self, placement: PlacementStrategy) -> Self {
        self.placement = placement;
        self
    }

    /// Set the pool selection policy.
    pub fn with_pool_selection(mut self, selection: PoolSelection) -> Self {
        self.pool_selection = selection;
        self
    }

    /// Replace the defragmentation section.
    pub fn with_defragmentation(mut self, defragmentation: DefragmentationConfig) -> Self {
        self.defragmentation = defragmentation;
        self
    }

    /// Replace the compression section.
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// Replace the retention section.
    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    /// Replace the leak detection section.
    pub fn with_leak_detection(mut self, leak_detection: LeakDetectionConfig) -> Self {
        self.leak_detection = leak_detection;
        self
    }

    /// Replace the monitor section.
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Enable or disable auto-response.
    pub fn with_auto_response(mut self, enabled: bool) -> Self {
        self.monitor.auto_response = enabled;
        self
    }

    /// Validate every section.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.pools.is_empty() {
            return Err(MemoryError::invalid_config("at least one pool is required"));
        }
        for spec in &self.pools {
            if spec.capacity == 0 {
                return Err(MemoryError::invalid_config(format!(
                    "{} pool capacity must be greater than zero",
                    spec.category
                )));
            }
            if let Some(threshold) = spec.defrag_threshold {
                check_unit("pool defrag_threshold", threshold)?;
            }
        }

        check_unit("defragmentation.threshold", self.defragmentation.threshold)?;

        let ratio = self.compression.ratio;
        if ratio.is_nan() || ratio <= 0.0 || ratio >= 1.0 {
            return Err(MemoryError::invalid_config(
                "compression.ratio must be in (0.0, 1.0)",
            ));
        }

        self.retention.default_policy.validate()?;

        let leaks = &self.leak_detection;
        if leaks.interval.is_zero() {
            return Err(MemoryError::invalid_config(
                "leak_detection.interval must be greater than zero",
            ));
        }
        if leaks.idle_threshold > leaks.age_threshold {
            return Err(MemoryError::invalid_config(
                "leak_detection.idle_threshold must not exceed age_threshold",
            ));
        }

        let monitor = &self.monitor;
        if monitor.sampling_interval.is_zero() {
            return Err(MemoryError::invalid_config(
                "monitor.sampling_interval must be greater than zero",
            ));
        }
        if monitor.trend_window < monitor.sampling_interval {
            return Err(MemoryError::invalid_config(
                "monitor.trend_window must cover at least one sampling interval",
            ));
        }
        if monitor.dead_band.is_nan() || monitor.dead_band < 0.0 {
            return Err(MemoryError::invalid_config(
                "monitor.dead_band must be non-negative",
            ));
        }
        if monitor.alert_history_limit == 0 {
            return Err(MemoryError::invalid_config(
                "monitor.alert_history_limit must be greater than zero",
            ));
        }
        monitor.thresholds.validate()?;
        monitor.cooldowns.validate()?;
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> MemoryResult<()> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(MemoryError::invalid_config(format!(
            "{name} must be in [0.0, 1.0]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        MemoryConfig::viewer().validate().unwrap();
        MemoryConfig::constrained().validate().unwrap();
        MemoryConfig::testing().validate().unwrap();
        MemoryConfig::single_pool(PoolCategory::Cache, 64).validate().unwrap();
    }

    #[test]
    fn empty_pool_table_rejected() {
        let err = MemoryConfig::testing().with_pools(vec![]).validate().unwrap_err();
        assert_eq!(err.code(), "MEM:CONFIG:INVALID");
    }

    #[test]
    fn zero_capacity_rejected() {
        let config =
            MemoryConfig::testing().with_pools(vec![PoolSpec::new(PoolCategory::Texture, 0)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn compression_ratio_bounds() {
        for ratio in [0.0, 1.0, -0.5, f64::NAN] {
            let mut config = MemoryConfig::testing();
            config.compression.ratio = ratio;
            assert!(config.validate().is_err(), "ratio {ratio} accepted");
        }
    }

    #[test]
    fn trend_window_must_cover_interval() {
        let mut config = MemoryConfig::testing();
        config.monitor.trend_window = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }
}
