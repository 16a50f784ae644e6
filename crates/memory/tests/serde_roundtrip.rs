#![cfg(feature = "serde")]

use std::time::Duration;

use lumen_memory::prelude::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

#[rstest]
#[case::viewer(MemoryConfig::viewer())]
#[case::constrained(MemoryConfig::constrained())]
#[case::testing(MemoryConfig::testing())]
fn presets_survive_json(#[case] config: MemoryConfig) {
    let json = serde_json::to_string(&config).unwrap();
    let back: MemoryConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
    back.validate().unwrap();
}

#[test]
fn missing_sections_take_defaults() {
    let json = r#"{
        "pools": [
            { "category": "texture", "capacity": 4096 },
            { "category": "cache", "capacity": 1024, "defrag_threshold": 0.5 }
        ],
        "placement": "first_fit",
        "pool_selection": "largest_capacity"
    }"#;
    let config: MemoryConfig = serde_json::from_str(json).unwrap();

    assert_eq!(
        config.pools,
        vec![
            PoolSpec::new(PoolCategory::Texture, 4096),
            PoolSpec::new(PoolCategory::Cache, 1024).with_defrag_threshold(0.5),
        ]
    );
    assert_eq!(config.placement, PlacementStrategy::FirstFit);
    assert_eq!(config.pool_selection, PoolSelection::LargestCapacity);
    assert_eq!(config.monitor, MemoryConfig::default().monitor);
    assert_eq!(config.monitor.sampling_interval, Duration::from_secs(1));

    let manager = MemoryManager::new(config).unwrap();
    assert_eq!(manager.usage(), (0, 5120));
}

#[test]
fn invalid_values_are_rejected_at_construction() {
    let mut config = MemoryConfig::testing();
    config.monitor.thresholds.high = config.monitor.thresholds.moderate;
    let json = serde_json::to_string(&config).unwrap();

    // Deserialization accepts it; construction does not.
    let back: MemoryConfig = serde_json::from_str(&json).unwrap();
    let err = MemoryManager::new(back).unwrap_err();
    assert_eq!(err.code(), "MEM:CONFIG:INVALID");
}

#[test]
fn enums_use_snake_case() {
    assert_eq!(
        serde_json::to_value(PlacementStrategy::WorstFit).unwrap(),
        serde_json::json!("worst_fit")
    );
    assert_eq!(
        serde_json::to_value(Severity::Critical).unwrap(),
        serde_json::json!("critical")
    );
    assert_eq!(
        serde_json::to_value(ConsumerId::from("viewport-1")).unwrap(),
        serde_json::json!("viewport-1")
    );
}
