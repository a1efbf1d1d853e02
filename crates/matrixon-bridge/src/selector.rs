//! Selector facade (spec §4.3).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! Composes the candidate set from the registry, enforces version-pinning,
//! drain and shutdown filtering, then delegates to the configured
//! strategy and records the allocation on the winner.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::bridge::{Bridge, BridgeTuning};
use crate::config::BridgeSelectionConfig;
use crate::model::{ConferenceBridges, ParticipantProperties};
use crate::registry::BridgeRegistry;

/// The bridge selection facade (spec §4.3).
pub struct BridgeSelector {
    registry: Arc<BridgeRegistry>,
    config: BridgeSelectionConfig,
}

impl BridgeSelector {
    pub fn new(registry: Arc<BridgeRegistry>, config: BridgeSelectionConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<BridgeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BridgeSelectionConfig {
        &self.config
    }

    /// Tuning parameters every bridge created through this selector's
    /// registry should share, derived from `BridgeSelectionConfig`.
    pub fn bridge_tuning(&self) -> BridgeTuning {
        BridgeTuning {
            failure_reset_threshold_ms: self.config.failure_reset_threshold.as_millis() as u64,
            participant_rampup_interval_ms: self.config.participant_rampup_interval.as_millis()
                as u64,
            average_participant_stress: self.config.average_participant_stress,
        }
    }

    /// Select a bridge for `participant`, applying version pinning, drain
    /// and shutdown filtering before delegating to the configured
    /// strategy. Returns `null` (`None`) for any expressible failure -
    /// the facade never throws (spec §4.3, §7).
    #[instrument(level = "debug", skip(self, conference_bridges, participant))]
    pub fn select(
        &self,
        conference_bridges: &ConferenceBridges,
        participant: &ParticipantProperties,
        version_hint: Option<&str>,
    ) -> Option<Arc<Bridge>> {
        let mut candidates = self.registry.snapshot();

        if !self.version_pinning_is_consistent(conference_bridges, version_hint) {
            debug!("❌ inconsistent version pinning; returning no candidate");
            return None;
        }

        // Version pinning: an explicit versionHint constrains candidates
        // outright; absent one, a version already shared by
        // conferenceBridges' keys constrains them just the same (spec
        // §4.3 step 1, invariant 5) - consistency between the two was
        // already checked above. Bridges already allocated to the
        // conference are exempt, the same way drain-filtering exempts
        // them.
        let pinned_version = match version_hint {
            Some(hint) => Some(Some(Arc::<str>::from(hint))),
            None => self.common_conference_version(conference_bridges),
        };
        if let Some(pinned) = pinned_version {
            candidates.retain(|bridge| {
                conference_bridges.contains_key(bridge.id())
                    || (bridge.is_operational() && bridge.version() == pinned)
            });
        }

        // Drain filtering: drained bridges stay eligible only for
        // conferences already allocated to them, or when explicitly
        // targeted by an operator-supplied versionHint - pinning a
        // version is itself a deliberate opt-in to that cohort, the same
        // way an existing conferenceBridges allocation is (spec §8
        // scenario 1: a draining cohort of the new version must still be
        // reachable via versionHint during a rolling upgrade).
        candidates.retain(|bridge| {
            !bridge.is_drain()
                || conference_bridges.contains_key(bridge.id())
                || version_hint.is_some()
        });

        // Shutdown filtering: unconditional (spec §4.3 step 3).
        candidates.retain(|bridge| !bridge.is_graceful_shutdown());

        if candidates.is_empty() {
            debug!("no candidates remain after filtering");
            return None;
        }

        let chosen = self.config.selection_strategy.select(
            &candidates,
            conference_bridges,
            participant,
            self.config.max_bridge_participants,
        )?;

        chosen.record_allocation();
        debug!(bridge = %chosen.id(), "✅ selected bridge");
        Some(chosen)
    }

    /// Determine whether the requested `version_hint` (if any) agrees with
    /// the version already shared by every bridge in `conference_bridges`
    /// (spec §4.3 step 1: "inconsistent pinning is a hard fail, not a
    /// silent relaxation"). Bridges in `conference_bridges` no longer
    /// present in the registry are skipped - they are opaque known
    /// bridges for this purpose only (spec §4.4.5).
    fn version_pinning_is_consistent(
        &self,
        conference_bridges: &ConferenceBridges,
        version_hint: Option<&str>,
    ) -> bool {
        if conference_bridges.is_empty() {
            return true;
        }

        let mut common_version: Option<Option<Arc<str>>> = None;
        for bridge_id in conference_bridges.keys() {
            let Some(bridge) = self.registry.get(bridge_id) else {
                continue;
            };
            let version = bridge.version();
            match &common_version {
                None => common_version = Some(version),
                Some(existing) if *existing != version => {
                    warn!(
                        bridge = %bridge_id,
                        "conferenceBridges keys disagree on version"
                    );
                    return false;
                }
                _ => {}
            }
        }

        match (version_hint, &common_version) {
            (Some(hint), Some(common)) => common.as_deref() == Some(hint),
            _ => true,
        }
    }

    /// The version shared by `conference_bridges`' keys that are still
    /// present in the registry, if any (spec §4.3 step 1's "effective
    /// pinned version"). Callers have already confirmed via
    /// `version_pinning_is_consistent` that every key agrees, so the
    /// first one found is representative.
    fn common_conference_version(
        &self,
        conference_bridges: &ConferenceBridges,
    ) -> Option<Option<Arc<str>>> {
        conference_bridges
            .keys()
            .find_map(|bridge_id| self.registry.get(bridge_id))
            .map(|bridge| bridge.version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{BridgeId, ConferenceBridgeProperties};

    fn selector(config: BridgeSelectionConfig) -> (BridgeSelector, Arc<BridgeRegistry>) {
        let clock = Arc::new(ManualClock::new());
        let tuning = BridgeTuning {
            failure_reset_threshold_ms: config.failure_reset_threshold.as_millis() as u64,
            participant_rampup_interval_ms: config.participant_rampup_interval.as_millis() as u64,
            average_participant_stress: config.average_participant_stress,
        };
        let registry = Arc::new(BridgeRegistry::new(clock, tuning));
        let bridge_selector = BridgeSelector::new(registry.clone(), config);
        (bridge_selector, registry)
    }

    #[test]
    fn picks_least_loaded_when_no_constraints() {
        let (selector, registry) = selector(BridgeSelectionConfig::default());
        let a = registry.add_bridge(BridgeId::from("a"));
        let b = registry.add_bridge(BridgeId::from("b"));
        a.set_stress(0.5);
        b.set_stress(0.1);

        let chosen = selector
            .select(&ConferenceBridges::new(), &ParticipantProperties::default(), None)
            .unwrap();
        assert_eq!(chosen.id(), b.id());
    }

    #[test]
    fn version_hint_restricts_candidates() {
        let (selector, registry) = selector(BridgeSelectionConfig::default());
        let old = registry.add_bridge(BridgeId::from("old"));
        let new = registry.add_bridge(BridgeId::from("new"));
        old.set_version(Some("1.0".to_string()));
        new.set_version(Some("2.0".to_string()));

        let chosen = selector
            .select(
                &ConferenceBridges::new(),
                &ParticipantProperties::default(),
                Some("2.0"),
            )
            .unwrap();
        assert_eq!(chosen.id(), new.id());
    }

    #[test]
    fn inconsistent_version_pinning_returns_none() {
        let (selector, registry) = selector(BridgeSelectionConfig::default());
        let a = registry.add_bridge(BridgeId::from("a"));
        let b = registry.add_bridge(BridgeId::from("b"));
        a.set_version(Some("1.0".to_string()));
        b.set_version(Some("2.0".to_string()));

        let mut conference_bridges = ConferenceBridges::new();
        conference_bridges.insert(a.id().clone(), ConferenceBridgeProperties::new(1, false));
        conference_bridges.insert(b.id().clone(), ConferenceBridgeProperties::new(1, false));

        let result = selector.select(&conference_bridges, &ParticipantProperties::default(), None);
        assert!(result.is_none());
    }

    #[test]
    fn drained_bridge_stays_eligible_for_its_own_conference() {
        let (selector, registry) = selector(BridgeSelectionConfig::default());
        let drained = registry.add_bridge(BridgeId::from("drained"));
        drained.set_drain(true);

        let mut conference_bridges = ConferenceBridges::new();
        conference_bridges.insert(
            drained.id().clone(),
            ConferenceBridgeProperties::new(1, false),
        );

        let chosen = selector
            .select(&conference_bridges, &ParticipantProperties::default(), None)
            .unwrap();
        assert_eq!(chosen.id(), drained.id());
    }

    #[test]
    fn drained_bridge_excluded_from_fresh_conferences() {
        let (selector, registry) = selector(BridgeSelectionConfig::default());
        let drained = registry.add_bridge(BridgeId::from("drained"));
        drained.set_drain(true);

        let result = selector.select(&ConferenceBridges::new(), &ParticipantProperties::default(), None);
        assert!(result.is_none());
    }

    #[test]
    fn drained_bridge_reachable_via_matching_version_hint() {
        let (selector, registry) = selector(BridgeSelectionConfig::default());
        let old = registry.add_bridge(BridgeId::from("old"));
        let new = registry.add_bridge(BridgeId::from("new"));
        old.set_version(Some("OLD".to_string()));
        new.set_version(Some("NEW".to_string()));
        new.set_drain(true);

        // With no hint, the draining NEW bridge is excluded from fresh
        // conferences and OLD wins.
        let chosen = selector
            .select(&ConferenceBridges::new(), &ParticipantProperties::default(), None)
            .unwrap();
        assert_eq!(chosen.id(), old.id());

        // Explicitly pinning to NEW reaches the draining bridge anyway.
        let chosen = selector
            .select(
                &ConferenceBridges::new(),
                &ParticipantProperties::default(),
                Some("NEW"),
            )
            .unwrap();
        assert_eq!(chosen.id(), new.id());
    }

    #[test]
    fn conference_bridges_version_constrains_candidates_without_a_hint() {
        let mut config = BridgeSelectionConfig::default();
        config.selection_strategy = crate::strategy::SelectionStrategyKind::Split;
        let (selector, registry) = selector(config);
        let a = registry.add_bridge(BridgeId::from("a"));
        let b = registry.add_bridge(BridgeId::from("b"));
        a.set_version(Some("v1".to_string()));
        b.set_version(Some("v2".to_string()));
        b.set_stress(0.0);

        let mut conference_bridges = ConferenceBridges::new();
        conference_bridges.insert(a.id().clone(), ConferenceBridgeProperties::new(1, false));

        // Split would otherwise prefer `b` (not yet in the conference,
        // least loaded); the conference's derived version pin (v1) must
        // exclude it even with no explicit versionHint.
        let chosen = selector
            .select(&conference_bridges, &ParticipantProperties::default(), None)
            .unwrap();
        assert_eq!(chosen.id(), a.id());
    }

    #[test]
    fn graceful_shutdown_bridge_is_never_selected() {
        let (selector, registry) = selector(BridgeSelectionConfig::default());
        let shutting_down = registry.add_bridge(BridgeId::from("leaving"));
        shutting_down.set_graceful_shutdown(true);

        let mut conference_bridges = ConferenceBridges::new();
        conference_bridges.insert(
            shutting_down.id().clone(),
            ConferenceBridgeProperties::new(1, false),
        );

        let result = selector.select(&conference_bridges, &ParticipantProperties::default(), None);
        assert!(result.is_none());
    }
}
