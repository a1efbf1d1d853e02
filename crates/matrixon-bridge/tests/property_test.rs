//! Quantified-invariant property tests (spec §8).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! Checks the properties spec §8 states as universally quantified rather
//! than as single examples: corrected stress never drops below the raw
//! reported value, and a selection result (when any) is always drawn from
//! the candidate set it was given.

use std::sync::Arc;

use matrixon_bridge::{
    Bridge, BridgeTuning, ConferenceBridges, ManualClock, ParticipantProperties,
    SelectionStrategyKind,
};
use proptest::prelude::*;

proptest! {
    /// `correctedStress(b, t) >= lastReportedStress(b, t)` for any raw
    /// stress value and any number of recent allocations.
    #[test]
    fn corrected_stress_never_drops_below_raw(
        raw_stress in 0.0f64..5.0,
        allocations in 0u32..20,
        average_participant_stress in 0.0f64..1.0,
    ) {
        let clock = Arc::new(ManualClock::new());
        let tuning = BridgeTuning {
            average_participant_stress,
            ..BridgeTuning::default()
        };
        let bridge = Bridge::new("jvb1.example.com".into(), clock, tuning);
        bridge.set_stress(raw_stress);
        for _ in 0..allocations {
            bridge.record_allocation();
        }
        prop_assert!(bridge.corrected_stress() >= raw_stress);
    }

    /// A selection result is always a member of the candidate slice it was
    /// computed from, or there is no result at all.
    #[test]
    fn selection_result_is_always_a_candidate(
        stresses in prop::collection::vec(0.0f64..2.0, 1..8),
    ) {
        let clock = Arc::new(ManualClock::new());
        let candidates: Vec<_> = stresses
            .iter()
            .enumerate()
            .map(|(i, stress)| {
                let bridge = Arc::new(Bridge::new(
                    format!("bridge-{i}").into(),
                    clock.clone(),
                    BridgeTuning::default(),
                ));
                bridge.set_stress(*stress);
                bridge
            })
            .collect();

        let strategy = SelectionStrategyKind::Single;
        let result = strategy.select(
            &candidates,
            &ConferenceBridges::new(),
            &ParticipantProperties::default(),
            80,
        );

        match result {
            None => {}
            Some(chosen) => {
                prop_assert!(candidates.iter().any(|c| c.id() == chosen.id()));
            }
        }
    }
}
