//! Bridge registry (spec §4.1).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! Holds the set of bridges known to this focus instance. `DashMap` gives
//! us the concurrent-safe, atomic insert/remove semantics the registry
//! needs (invariant 1: a bridge appears at most once) without a
//! registry-wide lock serializing every read, matching the pattern
//! `matrixon-a2a::state::State` uses for its own concurrent map of
//! in-flight message state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::bridge::{Bridge, BridgeTuning};
use crate::clock::Clock;
use crate::events::{subscribe, BridgeEvent, BridgeEventHandler, SubscriberSet, SubscriptionHandle};
use crate::model::BridgeId;
use crate::presence::PresencePayload;

/// The set of bridges known to this focus instance (spec §4.1).
#[derive(Debug)]
pub struct BridgeRegistry {
    bridges: DashMap<BridgeId, Arc<Bridge>>,
    subscribers: SubscriberSet,
    lost_bridges: AtomicU64,
    clock: Arc<dyn Clock>,
    tuning: BridgeTuning,
}

impl BridgeRegistry {
    pub fn new(clock: Arc<dyn Clock>, tuning: BridgeTuning) -> Self {
        Self {
            bridges: DashMap::new(),
            subscribers: SubscriberSet::default(),
            lost_bridges: AtomicU64::new(0),
            clock,
            tuning,
        }
    }

    /// Idempotently register a bridge, returning its handle. Emits
    /// `bridgeAdded` only the first time a given id is observed.
    #[instrument(level = "debug", skip(self))]
    pub fn add_bridge(&self, id: BridgeId) -> Arc<Bridge> {
        if let Some(existing) = self.bridges.get(&id) {
            return Arc::clone(existing.value());
        }

        let bridge = Arc::new(Bridge::new(
            id.clone(),
            Arc::clone(&self.clock),
            self.tuning.clone(),
        ));

        match self.bridges.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&bridge));
                debug!(bridge = %id, "🔧 bridge added to registry");
                self.subscribers.broadcast(BridgeEvent::Added(id));
                bridge
            }
        }
    }

    /// Remove a bridge from the registry, emitting `bridgeRemoved`. Unless
    /// the bridge was already in graceful shutdown, `lostBridges` is
    /// incremented (spec §4.1).
    #[instrument(level = "debug", skip(self))]
    pub fn remove_bridge(&self, id: &BridgeId) -> Option<Arc<Bridge>> {
        let (_, bridge) = self.bridges.remove(id)?;

        if !bridge.is_graceful_shutdown() {
            self.lost_bridges.fetch_add(1, Ordering::SeqCst);
        }

        info!(bridge = %id, "🗑️ bridge removed from registry");
        self.subscribers.broadcast(BridgeEvent::Removed(id.clone()));
        Some(bridge)
    }

    /// Apply a presence advertisement. An unknown id is silently treated as
    /// `addBridge` followed by apply (spec §4.1) - there is no error path.
    #[instrument(level = "debug", skip(self, payload))]
    pub fn update_presence(&self, id: BridgeId, payload: PresencePayload) -> Arc<Bridge> {
        let bridge = self.add_bridge(id.clone());
        let began_shutdown = bridge.apply_presence(&payload);
        if began_shutdown {
            info!(bridge = %id, "⚠️ bridge entering graceful shutdown");
            self.subscribers
                .broadcast(BridgeEvent::IsShuttingDown(id));
        }
        bridge
    }

    /// Notify subscribers that a bridge failed a health check (called by
    /// the health-check scheduler, spec §4.5).
    pub(crate) fn notify_failed_health_check(&self, id: &BridgeId) {
        self.subscribers
            .broadcast(BridgeEvent::FailedHealthCheck(id.clone()));
    }

    /// A consistent point-in-time snapshot of every known bridge. Order is
    /// unspecified (spec §4.1).
    pub fn snapshot(&self) -> Vec<Arc<Bridge>> {
        self.bridges.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn get(&self, id: &BridgeId) -> Option<Arc<Bridge>> {
        self.bridges.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    /// Count of bridges removed without first entering graceful shutdown
    /// (spec §4.1, an observable metric).
    pub fn lost_bridges(&self) -> u64 {
        self.lost_bridges.load(Ordering::SeqCst)
    }

    /// Register an observer of bridge lifecycle events (spec §4.1).
    pub fn subscribe(&self, handler: Arc<dyn BridgeEventHandler>) -> SubscriptionHandle {
        let handle = subscribe(handler);
        self.subscribers.add(handle.sender());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn registry() -> BridgeRegistry {
        BridgeRegistry::new(Arc::new(ManualClock::new()), BridgeTuning::default())
    }

    #[test]
    fn add_bridge_is_idempotent() {
        let registry = registry();
        let id = BridgeId::from("jvb1.example.com");
        let first = registry.add_bridge(id.clone());
        let second = registry.add_bridge(id.clone());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn update_presence_for_unknown_id_creates_bridge() {
        let registry = registry();
        let id = BridgeId::from("jvb1.example.com");
        let payload = PresencePayload::new(
            [("stress_level".to_string(), serde_json::json!(0.5))]
                .into_iter()
                .collect(),
        );
        let bridge = registry.update_presence(id.clone(), payload);
        assert_eq!(bridge.raw_stress(), 0.5);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_bridge_increments_lost_unless_shutting_down() {
        let registry = registry();
        let graceful = BridgeId::from("graceful.example.com");
        let crashed = BridgeId::from("crashed.example.com");

        let graceful_bridge = registry.add_bridge(graceful.clone());
        graceful_bridge.set_graceful_shutdown(true);
        registry.add_bridge(crashed.clone());

        registry.remove_bridge(&graceful);
        assert_eq!(registry.lost_bridges(), 0);

        registry.remove_bridge(&crashed);
        assert_eq!(registry.lost_bridges(), 1);
    }

    #[tokio::test]
    async fn subscriber_sees_added_then_removed() {
        use async_trait::async_trait;
        use crate::events::{BridgeEvent, BridgeEventHandler};
        use tokio::sync::Mutex as AsyncMutex;

        struct Recorder(AsyncMutex<Vec<BridgeEvent>>);

        #[async_trait]
        impl BridgeEventHandler for Recorder {
            async fn on_event(&self, event: BridgeEvent) {
                self.0.lock().await.push(event);
            }
        }

        let registry = registry();
        let recorder = Arc::new(Recorder(AsyncMutex::new(Vec::new())));
        let _handle = registry.subscribe(recorder.clone());

        let id = BridgeId::from("jvb1.example.com");
        registry.add_bridge(id.clone());
        registry.remove_bridge(&id);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let events = recorder.0.lock().await;
        assert_eq!(
            *events,
            vec![BridgeEvent::Added(id.clone()), BridgeEvent::Removed(id)]
        );
    }
}
