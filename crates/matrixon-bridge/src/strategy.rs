//! Selection strategies (spec §4.4).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! Modeled as a single tagged-variant enum rather than a strategy
//! hierarchy, per the design note in spec §9 ("avoid deep inheritance;
//! model strategies as a tagged variant... carrying only the parameters
//! each variant needs"). `Visitor` is the only variant with nested state -
//! it decorates two inner strategies, which the spec restricts to
//! Single/Split/RegionBased (never another `Visitor`, checked by
//! `BridgeSelectionConfig::validate`).
//!
//! ## Open question resolved (spec §9)
//! The distilled spec states operational filtering explicitly only for
//! the `Single` strategy ("the least-loaded *operational* bridge"); Split
//! and RegionBased are phrased only in terms of "non-overloaded". Treating
//! a known-unhealthy bridge as eligible for Split/RegionBased just because
//! it happens to report low stress would contradict the whole point of
//! the sticky operational flag, so every strategy here is only ever
//! handed the operational subset of its candidates - this crate's
//! `select` entry point performs that filter once, uniformly, before
//! delegating to the tagged variant. See DESIGN.md for the full writeup.

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::model::{ConferenceBridges, ParticipantProperties, RegionGroups};

/// A selection strategy, tagged by variant with only the parameters it
/// needs (spec §4.4, §9).
#[derive(Debug, Clone)]
pub enum SelectionStrategyKind {
    /// §4.4.1: never splits a conference across bridges unless forced by
    /// the per-bridge cap.
    Single,
    /// §4.4.2: prefers distinct bridges, ignores region.
    Split,
    /// §4.4.3: region-aware eight-tier fallthrough.
    RegionBased {
        local_region: Option<String>,
        region_groups: RegionGroups,
    },
    /// §4.4.4: partitions by the visitor attribute, decorating two inner
    /// strategies (never `Visitor` itself).
    Visitor {
        participant_strategy: Box<SelectionStrategyKind>,
        visitor_strategy: Box<SelectionStrategyKind>,
    },
}

impl SelectionStrategyKind {
    /// Whether this kind (or one of its Visitor children) nests another
    /// Visitor strategy - disallowed by `BridgeSelectionConfig::validate`.
    pub fn has_nested_visitor(&self) -> bool {
        match self {
            SelectionStrategyKind::Visitor {
                participant_strategy,
                visitor_strategy,
            } => {
                matches!(
                    participant_strategy.as_ref(),
                    SelectionStrategyKind::Visitor { .. }
                ) || matches!(
                    visitor_strategy.as_ref(),
                    SelectionStrategyKind::Visitor { .. }
                )
            }
            _ => false,
        }
    }

    /// Select a bridge for `participant` from `candidates`, given the
    /// conference's existing bridge allocations. `candidates` is expected
    /// to already have been filtered by the selector facade (version
    /// pinning, drain, shutdown, spec §4.3); this entry point additionally
    /// restricts every strategy to the operational subset (see module
    /// docs) before delegating to the tagged variant's own logic.
    pub fn select(
        &self,
        candidates: &[Arc<Bridge>],
        conference_bridges: &ConferenceBridges,
        participant: &ParticipantProperties,
        max_bridge_participants: u32,
    ) -> Option<Arc<Bridge>> {
        let operational: Vec<Arc<Bridge>> = candidates
            .iter()
            .filter(|bridge| bridge.is_operational())
            .cloned()
            .collect();

        match self {
            SelectionStrategyKind::Single => {
                select_single(&operational, conference_bridges, max_bridge_participants)
            }
            SelectionStrategyKind::Split => select_split(&operational, conference_bridges),
            SelectionStrategyKind::RegionBased {
                local_region,
                region_groups,
            } => select_region_based(
                &operational,
                conference_bridges,
                participant,
                local_region.as_deref(),
                region_groups,
                max_bridge_participants,
            ),
            SelectionStrategyKind::Visitor {
                participant_strategy,
                visitor_strategy,
            } => select_visitor(
                &operational,
                conference_bridges,
                participant,
                participant_strategy,
                visitor_strategy,
                max_bridge_participants,
            ),
        }
    }
}

/// Least-loaded bridge among `bridges`, breaking ties by list order (the
/// first bridge encountered with the minimal corrected stress wins, spec
/// §4.4.3's tie-break rule applied generally).
fn least_loaded(bridges: &[Arc<Bridge>]) -> Option<Arc<Bridge>> {
    bridges
        .iter()
        .cloned()
        .min_by(|a, b| {
            a.corrected_stress()
                .partial_cmp(&b.corrected_stress())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

fn is_conference_bridge(bridge: &Bridge, conference_bridges: &ConferenceBridges) -> bool {
    conference_bridges.contains_key(bridge.id())
}

fn is_under_cap(
    bridge: &Bridge,
    conference_bridges: &ConferenceBridges,
    max_bridge_participants: u32,
) -> bool {
    conference_bridges
        .get(bridge.id())
        .map(|props| props.is_under_cap(max_bridge_participants))
        .unwrap_or(true)
}

// -- 4.4.1 Single ----------------------------------------------------------

fn select_single(
    operational: &[Arc<Bridge>],
    conference_bridges: &ConferenceBridges,
    max_bridge_participants: u32,
) -> Option<Arc<Bridge>> {
    if !conference_bridges.is_empty() {
        let in_conference: Vec<Arc<Bridge>> = operational
            .iter()
            .filter(|bridge| {
                is_conference_bridge(bridge, conference_bridges)
                    && is_under_cap(bridge, conference_bridges, max_bridge_participants)
            })
            .cloned()
            .collect();
        if let Some(chosen) = least_loaded(&in_conference) {
            return Some(chosen);
        }
    }
    least_loaded(operational)
}

// -- 4.4.2 Split -------------------------------------------------------------

fn select_split(
    operational: &[Arc<Bridge>],
    conference_bridges: &ConferenceBridges,
) -> Option<Arc<Bridge>> {
    let not_in_conference: Vec<Arc<Bridge>> = operational
        .iter()
        .filter(|bridge| !is_conference_bridge(bridge, conference_bridges))
        .cloned()
        .collect();
    if let Some(chosen) = least_loaded(&not_in_conference) {
        return Some(chosen);
    }

    let in_conference: Vec<Arc<Bridge>> = operational
        .iter()
        .filter(|bridge| is_conference_bridge(bridge, conference_bridges))
        .cloned()
        .collect();
    least_loaded(&in_conference)
}

// -- 4.4.3 RegionBased -------------------------------------------------------

fn select_region_based(
    operational: &[Arc<Bridge>],
    conference_bridges: &ConferenceBridges,
    participant: &ParticipantProperties,
    local_region: Option<&str>,
    region_groups: &RegionGroups,
    max_bridge_participants: u32,
) -> Option<Arc<Bridge>> {
    let mut region = participant
        .region
        .clone()
        .or_else(|| local_region.map(str::to_owned));

    // "the first two participants of a conference should coalesce on the
    // local region when they're in the same group" (spec §4.4.3).
    if let Some(local) = local_region {
        if conference_bridges.is_empty() {
            if let Some(current) = &region {
                if current != local && region_groups.contains(current, local) {
                    region = Some(local.to_string());
                }
            }
        }
    }

    let region = region.unwrap_or_default();
    let nearby = region_groups.group_for(&region);

    let has_region_candidate = operational
        .iter()
        .any(|bridge| bridge.region().is_some_and(|r| nearby.iter().any(|n| n == r.as_ref())));
    let region = if !has_region_candidate {
        local_region.map(str::to_owned).unwrap_or(region)
    } else {
        region
    };
    let nearby = region_groups.group_for(&region);

    let non_overloaded: Vec<Arc<Bridge>> = operational
        .iter()
        .filter(|bridge| !bridge.is_overloaded())
        .cloned()
        .collect();

    let region_matches = |bridge: &Arc<Bridge>| bridge.region().is_some_and(|r| *r == *region);
    let group_matches =
        |bridge: &Arc<Bridge>| bridge.region().is_some_and(|r| nearby.iter().any(|n| n == r.as_ref()));
    let in_conference = |bridge: &Arc<Bridge>| is_conference_bridge(bridge, conference_bridges);

    let tiers: [Box<dyn Fn(&Arc<Bridge>) -> bool>; 6] = [
        Box::new(|b: &Arc<Bridge>| in_conference(b) && region_matches(b)),
        Box::new(|b: &Arc<Bridge>| in_conference(b) && group_matches(b)),
        Box::new(|b: &Arc<Bridge>| region_matches(b)),
        Box::new(|b: &Arc<Bridge>| group_matches(b)),
        Box::new(move |b: &Arc<Bridge>| in_conference(b)),
        Box::new(|_b: &Arc<Bridge>| true),
    ];

    for tier in &tiers {
        let matching: Vec<Arc<Bridge>> = non_overloaded
            .iter()
            .filter(|b| tier(b))
            .cloned()
            .collect();
        if let Some(chosen) = least_loaded(&matching) {
            return Some(chosen);
        }
    }

    // Tier 7: least-loaded conference bridge under the cap.
    let under_cap: Vec<Arc<Bridge>> = operational
        .iter()
        .filter(|bridge| {
            is_conference_bridge(bridge, conference_bridges)
                && is_under_cap(bridge, conference_bridges, max_bridge_participants)
        })
        .cloned()
        .collect();
    if let Some(chosen) = least_loaded(&under_cap) {
        return Some(chosen);
    }

    // Tier 8: least-loaded overall.
    least_loaded(operational)
}

// -- 4.4.4 Visitor ------------------------------------------------------------

fn select_visitor(
    operational: &[Arc<Bridge>],
    conference_bridges: &ConferenceBridges,
    participant: &ParticipantProperties,
    participant_strategy: &SelectionStrategyKind,
    visitor_strategy: &SelectionStrategyKind,
    max_bridge_participants: u32,
) -> Option<Arc<Bridge>> {
    let filtered: Vec<Arc<Bridge>> = operational
        .iter()
        .filter(|bridge| match conference_bridges.get(bridge.id()) {
            None => true,
            Some(props) => props.visitor == participant.visitor,
        })
        .cloned()
        .collect();

    let filtered_conference_bridges: ConferenceBridges = conference_bridges
        .iter()
        .filter(|(_, props)| props.visitor == participant.visitor)
        .map(|(id, props)| (id.clone(), *props))
        .collect();

    let inner = if participant.visitor {
        visitor_strategy
    } else {
        participant_strategy
    };

    if let Some(chosen) = inner.select(
        &filtered,
        &filtered_conference_bridges,
        participant,
        max_bridge_participants,
    ) {
        return Some(chosen);
    }

    // Segregation failed; mixing is permitted as a fallback (spec §4.4.4).
    inner.select(operational, conference_bridges, participant, max_bridge_participants)
}
