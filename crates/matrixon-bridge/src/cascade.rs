//! Cascade (mesh-of-meshes) topology (spec §4.6).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! A cascade models how a single conference's bridges are wired together
//! for relaying: bridges are grouped into meshes (complete subgraphs), and
//! meshes are themselves linked by individual bridge-to-bridge links.
//! Mutation is infrequent relative to the registry (one conference's
//! topology changes only on bridge join/leave), so the whole graph sits
//! behind one `Mutex` rather than the per-field atomics `bridge.rs` uses -
//! the same "low contention, correctness-over-granularity" tradeoff as
//! `RampupCounter`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::model::BridgeId;

/// Errors raised by cascade operations (spec §4.6, §7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CascadeError {
    #[error("cascade precondition failed: {0}")]
    PrecondFail(String),
    #[error("cascade topology invalid: {0}")]
    InvalidTopology(String),
}

/// An opaque mesh identifier, interned the same way `BridgeId` is.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct MeshId(Arc<str>);

impl MeshId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }
}

impl fmt::Debug for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshId({})", self.0)
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MeshId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for MeshId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// A repair directive returned by a caller's repair callback after
/// `removeNode` disconnects the cascade (spec §4.6).
#[derive(Debug, Clone)]
pub struct Repair {
    pub from: BridgeId,
    pub to: BridgeId,
    pub mesh_id: MeshId,
}

impl Repair {
    pub fn new(from: BridgeId, to: BridgeId, mesh_id: MeshId) -> Self {
        Self { from, to, mesh_id }
    }
}

#[derive(Default)]
struct CascadeInner {
    nodes: HashSet<BridgeId>,
    /// node -> peer -> the mesh the link belongs to.
    links: HashMap<BridgeId, HashMap<BridgeId, MeshId>>,
    /// mesh -> member nodes.
    meshes: HashMap<MeshId, HashSet<BridgeId>>,
}

impl CascadeInner {
    fn has_link(&self, a: &BridgeId, b: &BridgeId) -> bool {
        self.links.get(a).is_some_and(|peers| peers.contains_key(b))
    }

    fn link(&mut self, a: &BridgeId, b: &BridgeId, mesh_id: &MeshId) {
        self.links
            .entry(a.clone())
            .or_default()
            .insert(b.clone(), mesh_id.clone());
    }

    fn unlink(&mut self, a: &BridgeId, b: &BridgeId) -> bool {
        self.links
            .get_mut(a)
            .map(|peers| peers.remove(b).is_some())
            .unwrap_or(false)
    }

    fn neighbors(&self, a: &BridgeId) -> Vec<BridgeId> {
        self.links
            .get(a)
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn add_link_between(
        &mut self,
        from: &BridgeId,
        to: &BridgeId,
        mesh_id: MeshId,
    ) -> Result<(), CascadeError> {
        if !self.nodes.contains(from) || !self.nodes.contains(to) {
            return Err(CascadeError::PrecondFail(format!(
                "cannot link {from} and {to}: one of them is not present in the cascade"
            )));
        }
        if self.has_link(from, to) || self.has_link(to, from) {
            return Err(CascadeError::PrecondFail(format!(
                "{from} and {to} are already linked"
            )));
        }
        self.link(from, to, &mesh_id);
        self.link(to, from, &mesh_id);
        self.meshes
            .entry(mesh_id)
            .or_default()
            .extend([from.clone(), to.clone()]);
        Ok(())
    }

    fn connected_components(&self) -> Vec<Vec<BridgeId>> {
        let mut visited: HashSet<BridgeId> = HashSet::new();
        let mut components = Vec::new();

        for start in &self.nodes {
            if visited.contains(start) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::new();
            visited.insert(start.clone());
            queue.push_back(start.clone());
            while let Some(current) = queue.pop_front() {
                component.push(current.clone());
                for neighbor in self.neighbors(&current) {
                    if visited.insert(neighbor.clone()) {
                        queue.push_back(neighbor);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    /// BFS from `node`, returning the visit order together with a map from
    /// every other reached node to its "branch root": the first neighbor
    /// of `node` on the shortest path to it (spec §4.6's `getPathsFrom`
    /// and `getNodesBehind`). `node` itself has no entry.
    fn branch_roots_from(&self, node: &BridgeId) -> (Vec<BridgeId>, HashMap<BridgeId, BridgeId>) {
        let mut visited: HashSet<BridgeId> = HashSet::new();
        let mut visit_order = Vec::new();
        let mut branch_root: HashMap<BridgeId, BridgeId> = HashMap::new();
        let mut queue = VecDeque::new();

        visited.insert(node.clone());
        visit_order.push(node.clone());
        queue.push_back(node.clone());

        while let Some(current) = queue.pop_front() {
            for neighbor in self.neighbors(&current) {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                let root = if current == *node {
                    neighbor.clone()
                } else {
                    branch_root
                        .get(&current)
                        .cloned()
                        .expect("every visited non-root node has a recorded branch root")
                };
                branch_root.insert(neighbor.clone(), root);
                visit_order.push(neighbor.clone());
                queue.push_back(neighbor);
            }
        }
        (visit_order, branch_root)
    }

    /// The set of nodes whose branch from `node` passes through `neighbor`
    /// - i.e. the subtree behind `neighbor`, not the whole connected
    /// component on its side (spec §4.6's `getNodesBehind`). Defined only
    /// when `node` and `neighbor` are adjacent.
    fn nodes_behind(&self, node: &BridgeId, neighbor: &BridgeId) -> HashSet<BridgeId> {
        let (_, branch_root) = self.branch_roots_from(node);
        let mut result: HashSet<BridgeId> = branch_root
            .iter()
            .filter(|(_, root)| *root == neighbor)
            .map(|(n, _)| n.clone())
            .collect();
        result.insert(neighbor.clone());
        result
    }

    /// BFS from `node`, pairing each reached node with the "first neighbor
    /// of `node` on the shortest path" (spec §4.6's `getPathsFrom`), not
    /// the immediate BFS predecessor.
    fn compute_paths_from(&self, node: &BridgeId) -> Vec<(BridgeId, Option<BridgeId>)> {
        let (visit_order, branch_root) = self.branch_roots_from(node);
        visit_order
            .into_iter()
            .map(|visited| {
                let parent = branch_root.get(&visited).cloned();
                (visited, parent)
            })
            .collect()
    }

    fn validate_locked(&self) -> Result<(), CascadeError> {
        for (a, peers) in &self.links {
            for (b, mesh_id) in peers {
                match self.links.get(b).and_then(|back| back.get(a)) {
                    Some(back_mesh) if back_mesh == mesh_id => {}
                    _ => {
                        return Err(CascadeError::InvalidTopology(format!(
                            "link {a} -> {b} is not symmetric"
                        )));
                    }
                }
            }
        }

        for (mesh_id, members) in &self.meshes {
            for a in members {
                for b in members {
                    if a != b && !self.has_link(a, b) {
                        return Err(CascadeError::InvalidTopology(format!(
                            "mesh {mesh_id} is not a complete subgraph: {a} is not linked to {b}"
                        )));
                    }
                }
            }
        }

        if self.nodes.len() > 1 {
            let components = self.connected_components();
            if components.len() > 1 {
                return Err(CascadeError::InvalidTopology(format!(
                    "cascade is disconnected into {} components",
                    components.len()
                )));
            }
        }

        Ok(())
    }
}

/// The mesh-of-meshes graph for a single conference (spec §4.6).
pub struct CascadeTopology {
    inner: Mutex<CascadeInner>,
    removal_count: AtomicU64,
}

impl Default for CascadeTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl CascadeTopology {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CascadeInner::default()),
            removal_count: AtomicU64::new(0),
        }
    }

    pub fn contains_node(&self, node: &BridgeId) -> bool {
        self.inner
            .lock()
            .expect("cascade mutex poisoned")
            .nodes
            .contains(node)
    }

    /// Number of links successfully removed by `removeLinkTo`/`removeNode`
    /// over this cascade's lifetime (observable by tests, spec §4.6).
    pub fn removal_count(&self) -> u64 {
        self.removal_count.load(Ordering::SeqCst)
    }

    /// Insert `node` as a peer of every current member of `mesh_id`. If the
    /// mesh has no members yet and `anchor` is supplied, links `node` to
    /// `anchor` alone, founding the mesh with those two nodes.
    pub fn add_node_to_mesh(
        &self,
        node: BridgeId,
        mesh_id: MeshId,
        anchor: Option<&BridgeId>,
    ) -> Result<(), CascadeError> {
        let mut inner = self.inner.lock().expect("cascade mutex poisoned");

        let members: Vec<BridgeId> = inner
            .meshes
            .get(&mesh_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();

        if members.is_empty() {
            if let Some(anchor) = anchor {
                if !inner.nodes.contains(anchor) {
                    return Err(CascadeError::PrecondFail(format!(
                        "anchor {anchor} is not present in the cascade"
                    )));
                }
                if inner.has_link(&node, anchor) || inner.has_link(anchor, &node) {
                    return Err(CascadeError::PrecondFail(format!(
                        "{node} already has a link to {anchor}"
                    )));
                }
                inner.nodes.insert(node.clone());
                inner.link(&node, anchor, &mesh_id);
                inner.link(anchor, &node, &mesh_id);
                let entry = inner.meshes.entry(mesh_id).or_default();
                entry.insert(node);
                entry.insert(anchor.clone());
            } else {
                inner.nodes.insert(node.clone());
                inner.meshes.entry(mesh_id).or_default().insert(node);
            }
            return Ok(());
        }

        for member in &members {
            if inner.has_link(&node, member) || inner.has_link(member, &node) {
                return Err(CascadeError::PrecondFail(format!(
                    "{node} already has a link to {member} in mesh {mesh_id}"
                )));
            }
        }

        inner.nodes.insert(node.clone());
        for member in &members {
            inner.link(&node, member, &mesh_id);
            inner.link(member, &node, &mesh_id);
        }
        inner.meshes.entry(mesh_id).or_default().insert(node);
        Ok(())
    }

    /// Drop `a`'s link to `b`. Directional; callers use it twice for
    /// symmetric removal (spec §4.6). Returns whether a link was actually
    /// removed.
    pub fn remove_link_to(&self, a: &BridgeId, b: &BridgeId) -> bool {
        let removed = {
            let mut inner = self.inner.lock().expect("cascade mutex poisoned");
            inner.unlink(a, b)
        };
        if removed {
            self.removal_count.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    /// Remove `node` and all incident links. If doing so disconnects the
    /// cascade, calls `repair` with the resulting components and applies
    /// each returned directive as `addLinkBetween`, then validates.
    pub fn remove_node<F>(&self, node: &BridgeId, repair: F) -> Result<(), CascadeError>
    where
        F: FnOnce(&[Vec<BridgeId>]) -> Vec<Repair>,
    {
        let mut inner = self.inner.lock().expect("cascade mutex poisoned");

        if !inner.nodes.contains(node) {
            return Ok(());
        }

        let neighbors = inner.neighbors(node);
        for neighbor in &neighbors {
            if inner.unlink(node, neighbor) {
                self.removal_count.fetch_add(1, Ordering::SeqCst);
            }
            if inner.unlink(neighbor, node) {
                self.removal_count.fetch_add(1, Ordering::SeqCst);
            }
        }
        for members in inner.meshes.values_mut() {
            members.remove(node);
        }
        inner.meshes.retain(|_, members| members.len() > 1);
        inner.nodes.remove(node);
        inner.links.remove(node);

        let components = inner.connected_components();
        if components.len() > 1 {
            let directives = repair(&components);
            for directive in directives {
                inner.add_link_between(&directive.from, &directive.to, directive.mesh_id)?;
            }
        }

        inner.validate_locked()
    }

    /// The set of nodes in `node`'s branch behind `neighbor` - the subtree
    /// reached via `neighbor` on the shortest-path tree rooted at `node`,
    /// not the whole component on `neighbor`'s side (spec §4.6). Defined
    /// only when `node` and `neighbor` are adjacent.
    pub fn nodes_behind(
        &self,
        node: &BridgeId,
        neighbor: &BridgeId,
    ) -> Result<HashSet<BridgeId>, CascadeError> {
        let inner = self.inner.lock().expect("cascade mutex poisoned");
        if !inner.has_link(node, neighbor) {
            return Err(CascadeError::PrecondFail(format!(
                "{node} and {neighbor} are not adjacent"
            )));
        }
        Ok(inner.nodes_behind(node, neighbor))
    }

    /// The union of `nodes_behind(node, m)` for every member `m` of
    /// `mesh_id` other than `node` (spec §4.6's mesh-id overload).
    pub fn nodes_behind_in_mesh(&self, mesh_id: &MeshId, node: &BridgeId) -> HashSet<BridgeId> {
        let inner = self.inner.lock().expect("cascade mutex poisoned");
        let members = inner.meshes.get(mesh_id).cloned().unwrap_or_default();
        let mut result = HashSet::new();
        for member in &members {
            if member == node {
                continue;
            }
            result.extend(inner.nodes_behind(node, member));
        }
        result
    }

    /// Visit every node reachable from `node` exactly once. `visitor` is
    /// called with the visited node and its path parent: `None` for
    /// `node` itself, `node` for its direct neighbors, and for everyone
    /// else the first neighbor of `node` on the shortest path to them
    /// (spec §4.6).
    pub fn paths_from(&self, node: &BridgeId, mut visitor: impl FnMut(&BridgeId, Option<&BridgeId>)) {
        let inner = self.inner.lock().expect("cascade mutex poisoned");
        for (visited, parent) in inner.compute_paths_from(node) {
            visitor(&visited, parent.as_ref());
        }
    }

    /// Minimum hop distance from `node` to any node satisfying `pred`, or
    /// `None` for infinity (spec §4.6).
    pub fn distance_from(&self, node: &BridgeId, pred: impl Fn(&BridgeId) -> bool) -> Option<u32> {
        let inner = self.inner.lock().expect("cascade mutex poisoned");
        if pred(node) {
            return Some(0);
        }
        let mut visited: HashSet<BridgeId> = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(node.clone());
        queue.push_back((node.clone(), 0u32));
        while let Some((current, dist)) = queue.pop_front() {
            for neighbor in inner.neighbors(&current) {
                if visited.insert(neighbor.clone()) {
                    if pred(&neighbor) {
                        return Some(dist + 1);
                    }
                    queue.push_back((neighbor, dist + 1));
                }
            }
        }
        None
    }

    /// Check invariants (i)-(iii) from spec §4.6: symmetric links, complete
    /// meshes, connected graph.
    pub fn validate(&self) -> Result<(), CascadeError> {
        self.inner.lock().expect("cascade mutex poisoned").validate_locked()
    }
}
