//! Health-check scheduler (spec §4.5).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! One periodic task per registered bridge, selectable between two
//! implementations: an active probe that sends a request over an injected
//! transport and retries once on timeout, or a presence-based mode that
//! infers health from the staleness and content of the last presence
//! advertisement (spec §4.5, §6). The scheduler subscribes to the
//! registry's own event stream so a task is spawned exactly once per
//! `bridgeAdded` and cancelled exactly once per `bridgeRemoved` - this
//! mirrors `matrixon-a2a`'s pattern of driving worker-task lifecycle off an
//! event subscription rather than a bespoke add/remove API, and guarantees
//! invariant §4.5 "removing a bridge cancels its task".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::bridge::Bridge;
use crate::clock::Clock;
use crate::config::HealthCheckConfig;
use crate::events::{BridgeEvent, BridgeEventHandler, SubscriptionHandle};
use crate::model::BridgeId;
use crate::registry::BridgeRegistry;

/// A health-check response classification (spec §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResponse {
    /// The bridge answered with a healthy result.
    Result,
    /// The bridge answered with an error condition.
    Error(ErrorCondition),
}

/// The XMPP-style error condition carried by a failed probe response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCondition {
    InternalServerError,
    ServiceUnavailable,
    /// Any other condition - logged as unexpected, never classified pass
    /// or fail (spec §4.5).
    Other(String),
}

/// The health-check back-channel's failure modes (spec §6, §7):
/// `TransportLost` causes the current probe to be skipped as a no-op, not a
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    NotConnected,
    Interrupted,
}

/// The abstract "send request, await response" primitive injected into the
/// scheduler (spec §6). Implementations are expected to race their own I/O
/// against the caller's timeout; the scheduler wraps every call in
/// `tokio::time::timeout` regardless, so a well-behaved implementation only
/// needs to return once it has an answer or know it cannot get one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthCheckTransport: Send + Sync + 'static {
    async fn send_health_check(
        &self,
        bridge: &BridgeId,
    ) -> Result<ProbeResponse, TransportFailure>;
}

/// Outcome of a single probe attempt, folding the transport-level timeout
/// in with the response classification.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeAttempt {
    Passed,
    Failed,
    Unexpected,
    TimedOut,
    TransportLost,
}

/// Which of the two health-check implementations a scheduler runs (spec
/// §4.5). Cheap to clone: the active transport is behind an `Arc`.
#[derive(Clone)]
pub enum HealthCheckMode {
    /// Send an active probe and wait for a response, retrying once on
    /// timeout.
    Active(Arc<dyn HealthCheckTransport>),
    /// Infer health from the freshness and content of presence
    /// advertisements; no network traffic of its own.
    Presence,
}

/// Observes the three health-check outcomes directly (spec §4.5). Distinct
/// from `BridgeEventHandler`: only `healthCheckFailed` folds into the
/// registry's own subscriber interface (spec §4.1) via
/// `BridgeRegistry::notify_failed_health_check`; `Passed`/`TimedOut` are
/// scheduler-level observations exposed here for tests and metrics sinks.
#[async_trait]
pub trait HealthCheckObserver: Send + Sync + 'static {
    async fn on_passed(&self, _bridge: &BridgeId) {}
    async fn on_failed(&self, _bridge: &BridgeId) {}
    async fn on_timed_out(&self, _bridge: &BridgeId) {}
}

/// Per-bridge periodic health-check scheduler (spec §4.5).
pub struct HealthCheckScheduler {
    registry: Arc<BridgeRegistry>,
    config: HealthCheckConfig,
    mode: HealthCheckMode,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn HealthCheckObserver>>,
    tasks: Mutex<HashMap<BridgeId, JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl HealthCheckScheduler {
    /// Construct a scheduler bound to `registry` and immediately spawn a
    /// task for every bridge already present, then subscribe to the
    /// registry so future `bridgeAdded`/`bridgeRemoved` events keep the
    /// task set in sync.
    pub fn new(
        registry: Arc<BridgeRegistry>,
        config: HealthCheckConfig,
        mode: HealthCheckMode,
        clock: Arc<dyn Clock>,
        observer: Option<Arc<dyn HealthCheckObserver>>,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            registry: Arc::clone(&registry),
            config,
            mode,
            clock,
            observer,
            tasks: Mutex::new(HashMap::new()),
            subscription: Mutex::new(None),
        });

        let handler: Arc<dyn BridgeEventHandler> = Arc::clone(&scheduler);
        let subscription = registry.subscribe(handler);
        *scheduler
            .subscription
            .lock()
            .expect("subscription mutex poisoned") = Some(subscription);

        for bridge in registry.snapshot() {
            scheduler.spawn_for(bridge);
        }

        scheduler
    }

    /// Number of bridges currently carrying a live health-check task.
    /// Exposed for tests that assert cancellation actually drops the task.
    pub fn active_task_count(&self) -> usize {
        self.tasks.lock().expect("tasks mutex poisoned").len()
    }

    fn spawn_for(&self, bridge: Arc<Bridge>) {
        let id = bridge.id().clone();
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let mode = self.mode.clone();
        let clock = Arc::clone(&self.clock);
        let observer = self.observer.clone();

        let handle = tokio::spawn(async move {
            run_bridge_loop(bridge, registry, config, mode, clock, observer).await;
        });

        let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");
        if let Some(previous) = tasks.insert(id, handle) {
            previous.abort();
        }
    }

    fn cancel_for(&self, id: &BridgeId) {
        let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");
        if let Some(task) = tasks.remove(id) {
            task.abort();
            debug!(bridge = %id, "🛑 health-check task cancelled");
        }
    }
}

impl Drop for HealthCheckScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.lock().expect("tasks mutex poisoned");
        for task in tasks.values() {
            task.abort();
        }
    }
}

#[async_trait]
impl BridgeEventHandler for HealthCheckScheduler {
    async fn on_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Added(id) => {
                if let Some(bridge) = self.registry.get(&id) {
                    self.spawn_for(bridge);
                }
            }
            BridgeEvent::Removed(id) => {
                self.cancel_for(&id);
            }
            BridgeEvent::IsShuttingDown(_) | BridgeEvent::FailedHealthCheck(_) => {}
        }
    }
}

/// The periodic loop for a single bridge: tick at `config.interval`, run
/// one round of whichever mode is configured, repeat until the task is
/// aborted. `tokio::time::interval` plus a synchronous-per-tick body gives
/// the "never overlaps itself" guarantee of spec §4.5 for free - the next
/// tick cannot fire until this iteration's `.await` chain completes.
async fn run_bridge_loop(
    bridge: Arc<Bridge>,
    registry: Arc<BridgeRegistry>,
    config: HealthCheckConfig,
    mode: HealthCheckMode,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn HealthCheckObserver>>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so a freshly-added bridge gets
    // one full interval of grace before its first probe.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match &mode {
            HealthCheckMode::Active(transport) => {
                run_active_round(&bridge, &registry, &config, transport.as_ref(), observer.as_deref())
                    .await;
            }
            HealthCheckMode::Presence => {
                run_presence_round(&bridge, &registry, &config, clock.as_ref(), observer.as_deref()).await;
            }
        }
    }
}

/// One active-probe round: send, classify, retry once on timeout (spec
/// §4.5, §8 scenario 6).
#[instrument(level = "debug", skip(bridge, registry, config, transport, observer))]
async fn run_active_round(
    bridge: &Bridge,
    registry: &BridgeRegistry,
    config: &HealthCheckConfig,
    transport: &dyn HealthCheckTransport,
    observer: Option<&dyn HealthCheckObserver>,
) {
    match probe_once(bridge.id(), transport, config.interval).await {
        ProbeAttempt::TransportLost => {
            warn!(bridge = %bridge.id(), "⚠️ health-check transport unavailable, skipping this round");
        }
        ProbeAttempt::TimedOut => {
            if config.retry_delay.is_zero() {
                emit_timed_out(bridge, registry, observer).await;
                return;
            }
            tokio::time::sleep(config.retry_delay).await;
            match probe_once(bridge.id(), transport, config.interval).await {
                ProbeAttempt::Passed => emit_passed(bridge, observer).await,
                ProbeAttempt::Failed => emit_failed(bridge, registry, observer).await,
                ProbeAttempt::Unexpected => {
                    warn!(bridge = %bridge.id(), "unexpected health-check error condition on retry");
                }
                ProbeAttempt::TimedOut => emit_timed_out(bridge, registry, observer).await,
                ProbeAttempt::TransportLost => {
                    warn!(bridge = %bridge.id(), "⚠️ health-check transport unavailable on retry, skipping this round");
                }
            }
        }
        ProbeAttempt::Passed => emit_passed(bridge, observer).await,
        ProbeAttempt::Failed => emit_failed(bridge, registry, observer).await,
        ProbeAttempt::Unexpected => {
            warn!(bridge = %bridge.id(), "unexpected health-check error condition");
        }
    }
}

async fn probe_once(
    id: &BridgeId,
    transport: &dyn HealthCheckTransport,
    timeout: Duration,
) -> ProbeAttempt {
    match tokio::time::timeout(timeout, transport.send_health_check(id)).await {
        Err(_elapsed) => ProbeAttempt::TimedOut,
        Ok(Err(TransportFailure::NotConnected)) | Ok(Err(TransportFailure::Interrupted)) => {
            ProbeAttempt::TransportLost
        }
        Ok(Ok(ProbeResponse::Result)) => ProbeAttempt::Passed,
        Ok(Ok(ProbeResponse::Error(ErrorCondition::InternalServerError)))
        | Ok(Ok(ProbeResponse::Error(ErrorCondition::ServiceUnavailable))) => ProbeAttempt::Failed,
        Ok(Ok(ProbeResponse::Error(ErrorCondition::Other(_)))) => ProbeAttempt::Unexpected,
    }
}

/// One presence-based round: healthy iff the last advertisement reported
/// health true and arrived within `presence_health_timeout` (spec §4.5).
#[instrument(level = "debug", skip(bridge, registry, config, clock, observer))]
async fn run_presence_round(
    bridge: &Bridge,
    registry: &BridgeRegistry,
    config: &HealthCheckConfig,
    clock: &dyn Clock,
    observer: Option<&dyn HealthCheckObserver>,
) {
    let now = clock.now_millis();
    let age_ms = now.saturating_sub(bridge.last_presence_at_millis());
    if age_ms > config.presence_health_timeout.as_millis() as u64 {
        emit_timed_out(bridge, registry, observer).await;
    } else if !bridge.last_presence_healthy() {
        emit_failed(bridge, registry, observer).await;
    } else {
        emit_passed(bridge, observer).await;
    }
}

async fn emit_passed(bridge: &Bridge, observer: Option<&dyn HealthCheckObserver>) {
    bridge.set_operational(true);
    debug!(bridge = %bridge.id(), "✅ health check passed");
    if let Some(observer) = observer {
        observer.on_passed(bridge.id()).await;
    }
}

async fn emit_failed(bridge: &Bridge, registry: &BridgeRegistry, observer: Option<&dyn HealthCheckObserver>) {
    bridge.set_operational(false);
    info!(bridge = %bridge.id(), "❌ health check failed");
    registry.notify_failed_health_check(bridge.id());
    if let Some(observer) = observer {
        observer.on_failed(bridge.id()).await;
    }
}

async fn emit_timed_out(bridge: &Bridge, registry: &BridgeRegistry, observer: Option<&dyn HealthCheckObserver>) {
    bridge.set_operational(false);
    warn!(bridge = %bridge.id(), "⏱️ health check timed out");
    registry.notify_failed_health_check(bridge.id());
    if let Some(observer) = observer {
        observer.on_timed_out(bridge.id()).await;
    }
}
