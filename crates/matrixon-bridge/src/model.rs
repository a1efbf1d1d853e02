//! Shared data model: bridge identity, conference/participant properties,
//! and region groups (spec §3).
//!
//! Author: arkSong <arksong2018@gmail.com>

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An opaque, immutable bridge identifier (JID-like string, e.g.
/// `jvb1.example.com`).
///
/// Cheap to clone: the inner string is `Arc`-shared, matching the way
/// `matrixon-switch`-style session identifiers are interned elsewhere in
/// the workspace.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BridgeId(Arc<str>);

impl BridgeId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BridgeId({})", self.0)
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BridgeId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for BridgeId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Per-conference-per-bridge record supplied by the caller on each
/// selection (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConferenceBridgeProperties {
    pub participant_count: u32,
    pub visitor: bool,
}

impl ConferenceBridgeProperties {
    pub fn new(participant_count: u32, visitor: bool) -> Self {
        Self {
            participant_count,
            visitor,
        }
    }

    /// Whether this conference-bridge pairing is below the per-bridge cap.
    pub fn is_under_cap(&self, max_bridge_participants: u32) -> bool {
        self.participant_count < max_bridge_participants
    }
}

/// The set of bridges a conference already has allocations on, keyed by
/// bridge id, as passed into `BridgeSelector::select` (spec §4.3).
pub type ConferenceBridges = HashMap<BridgeId, ConferenceBridgeProperties>;

/// Per-selection record describing the joining participant (spec §3).
#[derive(Debug, Clone, Default)]
pub struct ParticipantProperties {
    pub region: Option<String>,
    pub visitor: bool,
}

impl ParticipantProperties {
    pub fn new(region: Option<impl Into<String>>, visitor: bool) -> Self {
        Self {
            region: region.map(Into::into),
            visitor,
        }
    }
}

/// Maps a region to the set of regions considered "nearby" for it,
/// including itself. Regions not present in any configured group map to a
/// singleton containing only themselves (spec §3, §9).
#[derive(Debug, Clone, Default)]
pub struct RegionGroups {
    /// region -> canonical group members (always includes the region).
    groups: HashMap<String, Arc<Vec<String>>>,
}

impl RegionGroups {
    /// Build region groups from a list of groups (each an inner list of
    /// region names). A region that appears in more than one group is
    /// ambiguous; per spec §9 this is logged as an error and resolved
    /// deterministically by keeping the first group that named it.
    pub fn from_groups(raw_groups: &[Vec<String>]) -> Self {
        let mut groups: HashMap<String, Arc<Vec<String>>> = HashMap::new();
        let mut already_assigned: HashMap<String, usize> = HashMap::new();

        for (group_index, members) in raw_groups.iter().enumerate() {
            let canonical: Arc<Vec<String>> = Arc::new(members.clone());
            for region in members {
                if let Some(&first_index) = already_assigned.get(region) {
                    tracing::error!(
                        region = %region,
                        first_group = first_index,
                        duplicate_group = group_index,
                        "region appears in more than one region group; keeping first group"
                    );
                    continue;
                }
                already_assigned.insert(region.clone(), group_index);
                groups.insert(region.clone(), Arc::clone(&canonical));
            }
        }

        Self { groups }
    }

    /// The nearby-region set for `region`, always including `region`
    /// itself even when no group was configured for it.
    pub fn group_for(&self, region: &str) -> Vec<String> {
        match self.groups.get(region) {
            Some(members) => members.as_ref().clone(),
            None => vec![region.to_string()],
        }
    }

    pub fn contains(&self, region: &str, candidate: &str) -> bool {
        self.group_for(region).iter().any(|r| r == candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_id_cheap_clone_equality() {
        let a = BridgeId::from("jvb1.example.com");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "jvb1.example.com");
    }

    #[test]
    fn region_groups_singleton_for_unlisted_region() {
        let groups = RegionGroups::from_groups(&[]);
        assert_eq!(groups.group_for("eu-west"), vec!["eu-west".to_string()]);
    }

    #[test]
    fn region_groups_group_membership() {
        let groups = RegionGroups::from_groups(&[
            vec!["us-east".to_string(), "us-west".to_string()],
            vec!["eu-central".to_string(), "eu-west".to_string()],
        ]);
        assert!(groups.contains("us-east", "us-west"));
        assert!(!groups.contains("us-east", "eu-west"));
    }

    #[test]
    fn region_groups_duplicate_region_keeps_first_group() {
        let groups = RegionGroups::from_groups(&[
            vec!["us-east".to_string(), "us-west".to_string()],
            vec!["us-east".to_string(), "eu-west".to_string()],
        ]);
        // us-east stays bound to its first group (us-west), not the second.
        assert!(groups.contains("us-east", "us-west"));
        assert!(!groups.contains("us-east", "eu-west"));
    }
}
