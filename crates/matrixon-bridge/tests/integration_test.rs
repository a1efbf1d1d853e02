//! Integration tests for the bridge selection and health-tracking core
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! End-to-end scenarios exercised against the public API only, as a
//! hosting application would: build a registry and a selector, drive
//! presence updates and selections, and assert on the observable result.

use std::sync::Arc;
use std::time::Duration;

use matrixon_bridge::{
    BridgeRegistry, BridgeSelectionConfig, BridgeSelector, BridgeTuning, ConferenceBridgeProperties,
    ConferenceBridges, ParticipantProperties, RegionGroups, SelectionStrategyKind, SystemClock,
};

fn selector_with(config: BridgeSelectionConfig) -> (BridgeSelector, Arc<BridgeRegistry>) {
    let clock: Arc<SystemClock> = Arc::new(SystemClock::new());
    let tuning = BridgeTuning {
        failure_reset_threshold_ms: config.failure_reset_threshold.as_millis() as u64,
        participant_rampup_interval_ms: config.participant_rampup_interval.as_millis() as u64,
        average_participant_stress: config.average_participant_stress,
    };
    let registry = Arc::new(BridgeRegistry::new(clock, tuning));
    (BridgeSelector::new(registry.clone(), config), registry)
}

/// Scenario 1 (spec §8): upgrade-in-place. Three bridges on the old
/// version, three more on the new version with `drain=true`, then the
/// drain/version roles are flipped.
#[tokio::test]
async fn upgrade_in_place_scenario() {
    let (selector, registry) = selector_with(BridgeSelectionConfig::default());

    let old1 = registry.add_bridge("old1".into());
    let old2 = registry.add_bridge("old2".into());
    let old3 = registry.add_bridge("old3".into());
    for (bridge, stress) in [(&old1, 0.1), (&old2, 0.2), (&old3, 0.3)] {
        bridge.set_version(Some("OLD".to_string()));
        bridge.set_stress(stress);
    }

    let new1 = registry.add_bridge("new1".into());
    let new2 = registry.add_bridge("new2".into());
    let new3 = registry.add_bridge("new3".into());
    for (bridge, stress) in [(&new1, 0.0), (&new2, 0.2), (&new3, 0.1)] {
        bridge.set_version(Some("NEW".to_string()));
        bridge.set_drain(true);
        bridge.set_stress(stress);
    }

    let empty = ConferenceBridges::new();
    let participant = ParticipantProperties::default();

    let chosen = selector.select(&empty, &participant, None).unwrap();
    assert_eq!(chosen.id(), old1.id());

    let chosen = selector.select(&empty, &participant, Some("NEW")).unwrap();
    assert_eq!(chosen.id(), new1.id());

    let mut mixed = ConferenceBridges::new();
    mixed.insert(old1.id().clone(), ConferenceBridgeProperties::new(80, false));
    mixed.insert(old3.id().clone(), ConferenceBridgeProperties::new(1, false));
    let chosen = selector.select(&mixed, &participant, None).unwrap();
    assert_eq!(chosen.id(), old3.id());

    let mut all_full = ConferenceBridges::new();
    for id in [old1.id(), old2.id(), old3.id()] {
        all_full.insert(id.clone(), ConferenceBridgeProperties::new(80, false));
    }
    let chosen = selector.select(&all_full, &participant, None).unwrap();
    assert_eq!(chosen.id(), old1.id());

    // Flip roles: new bridges take over, old ones start draining.
    for bridge in [&old1, &old2, &old3] {
        bridge.set_drain(true);
    }
    for bridge in [&new1, &new2, &new3] {
        bridge.set_drain(false);
    }

    let chosen = selector.select(&empty, &participant, None).unwrap();
    assert_eq!(chosen.id(), new3.id());

    let mut old1_only = ConferenceBridges::new();
    old1_only.insert(old1.id().clone(), ConferenceBridgeProperties::new(1, false));
    let chosen = selector.select(&old1_only, &participant, None).unwrap();
    assert_eq!(chosen.id(), old1.id());

    let chosen = selector.select(&empty, &participant, Some("OLD")).unwrap();
    assert_eq!(chosen.id(), old1.id());
}

/// Scenario 2 (spec §8): region preference with local-region coalescing
/// and group fallback.
#[test]
fn region_preference_scenario() {
    let region_groups = RegionGroups::from_groups(&[
        vec!["us-east".to_string(), "us-west".to_string()],
        vec!["eu-central".to_string(), "eu-west".to_string()],
    ]);
    let config = BridgeSelectionConfig {
        selection_strategy: SelectionStrategyKind::RegionBased {
            local_region: Some("us-east".to_string()),
            region_groups: region_groups.clone(),
        },
        ..BridgeSelectionConfig::default()
    };
    let (selector, registry) = selector_with(config);

    let east = registry.add_bridge("east".into());
    east.set_region(Some("us-east".to_string()));
    let west = registry.add_bridge("west".into());
    west.set_region(Some("us-west".to_string()));
    let central = registry.add_bridge("central".into());
    central.set_region(Some("eu-central".to_string()));
    let eu_west = registry.add_bridge("eu-west".into());
    eu_west.set_region(Some("eu-west".to_string()));

    let empty = ConferenceBridges::new();

    let participant = ParticipantProperties::new(Some("eu-west"), false);
    let chosen = selector.select(&empty, &participant, None).unwrap();
    assert_eq!(chosen.id(), eu_west.id());

    // Remove eu-west from candidacy by draining it; group fallback picks eu-central.
    eu_west.set_drain(true);
    let chosen = selector.select(&empty, &participant, None).unwrap();
    assert_eq!(chosen.id(), central.id());

    let participant = ParticipantProperties::new(Some("us-west"), false);
    let chosen = selector.select(&empty, &participant, None).unwrap();
    assert_eq!(chosen.id(), east.id());
}

/// Scenario 3 (spec §8): sticky operational survives repeated premature
/// set-true calls and only releases once the full threshold elapses.
#[test]
fn sticky_operational_scenario() {
    let config = BridgeSelectionConfig {
        failure_reset_threshold: Duration::from_millis(1_000),
        ..BridgeSelectionConfig::default()
    };
    let (_, registry) = selector_with(config.clone());
    let bridge = registry.add_bridge("jvb1.example.com".into());

    bridge.set_operational(false);
    assert!(!bridge.is_operational());
    bridge.set_operational(true);
    bridge.set_operational(false);
    assert!(!bridge.is_operational());
}

/// Concurrent `addBridge` calls for the same id still yield exactly one
/// handle (spec §8 "addBridge twice yields one handle"), exercised under
/// real concurrent tasks rather than sequential calls.
#[tokio::test]
async fn concurrent_add_bridge_is_idempotent() {
    let (_, registry) = selector_with(BridgeSelectionConfig::default());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.add_bridge("jvb1.example.com".into()) })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
    }
    assert_eq!(registry.len(), 1);
}
