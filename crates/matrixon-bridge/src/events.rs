//! Bridge lifecycle events and the subscriber fan-out (spec §4.1, §6, §9).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! Events are delivered asynchronously and serialized per subscriber, with
//! no ordering guarantee across subscribers (spec §5). The design note in
//! §9 calls for a queue-per-subscriber with a single drainer task rather
//! than a shared queue, so one slow subscriber never head-of-line-blocks
//! another. Each `subscribe` call spawns exactly one drainer task bound to
//! an unbounded mpsc channel; dropping the returned `SubscriptionHandle`
//! cancels that task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::BridgeId;

/// Bridge lifecycle events (spec §4.1, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Added(BridgeId),
    Removed(BridgeId),
    IsShuttingDown(BridgeId),
    FailedHealthCheck(BridgeId),
}

/// An observer of bridge lifecycle events.
///
/// Implemented as an async trait (rather than four separate synchronous
/// callbacks) so a subscriber can await its own I/O - e.g. pushing a
/// metrics update - without blocking the registry or other subscribers.
#[async_trait]
pub trait BridgeEventHandler: Send + Sync + 'static {
    async fn on_event(&self, event: BridgeEvent);
}

/// A handle to a live subscription. Dropping it stops the drainer task.
#[derive(Debug)]
pub struct SubscriptionHandle {
    sender: mpsc::UnboundedSender<BridgeEvent>,
    task: tokio::task::JoinHandle<()>,
}

impl SubscriptionHandle {
    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<BridgeEvent> {
        self.sender.clone()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a subscriber's dedicated drainer task and return a handle whose
/// sender the registry can push events onto.
pub fn subscribe(handler: Arc<dyn BridgeEventHandler>) -> SubscriptionHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<BridgeEvent>();

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            debug!(?event, "🔔 delivering bridge event to subscriber");
            handler.on_event(event).await;
        }
    });

    SubscriptionHandle { sender: tx, task }
}

/// Internal: a registry's collection of live subscriptions, used to
/// broadcast an event to every subscriber's own queue.
#[derive(Debug, Default)]
pub(crate) struct SubscriberSet {
    senders: std::sync::Mutex<Vec<mpsc::UnboundedSender<BridgeEvent>>>,
}

impl SubscriberSet {
    pub(crate) fn add(&self, sender: mpsc::UnboundedSender<BridgeEvent>) {
        self.senders
            .lock()
            .expect("subscriber set mutex poisoned")
            .push(sender);
    }

    pub(crate) fn broadcast(&self, event: BridgeEvent) {
        let mut senders = self.senders.lock().expect("subscriber set mutex poisoned");
        senders.retain(|sender| match sender.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!("dropping dead bridge event subscriber channel");
                false
            }
        });
    }
}
