//! Per-bridge mutable state (spec §3, §4.2).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! ## Concurrency model
//! Per spec §5, bridge state fields are updated atomically *per field*, not
//! behind one shared lock: readers may see a coherent value for any single
//! field but could observe different fields from slightly different
//! moments. The ordering comparator tolerates this - a stale read degrades
//! selection quality, never correctness. The one exception is the sticky
//! `operational` flag together with its `lastFailureAt` timestamp, which
//! the design notes (§9) call out as needing to be read as a pair; we keep
//! that pair behind a single `Mutex` rather than packing them into one
//! atomic word; low contention (one write per health-check failure) makes
//! the lock cheap relative to bit-packing complexity.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use crate::clock::Clock;
use crate::model::BridgeId;
use crate::presence::PresencePayload;

/// Tuning parameters shared by every bridge in a registry, derived from
/// `BridgeSelectionConfig` (kept separate from that config type so `Bridge`
/// doesn't need to know about selection strategies or region groups).
#[derive(Debug, Clone)]
pub struct BridgeTuning {
    pub failure_reset_threshold_ms: u64,
    pub participant_rampup_interval_ms: u64,
    pub average_participant_stress: f64,
}

impl Default for BridgeTuning {
    fn default() -> Self {
        Self {
            failure_reset_threshold_ms: 60_000,
            participant_rampup_interval_ms: 10_000,
            average_participant_stress: 0.01,
        }
    }
}

/// Number of buckets the rampup ring is divided into. A fixed bucket count
/// keeps the ring's memory footprint constant regardless of how long the
/// rampup interval is configured to be (design note, §9: "do not use a
/// per-event timer").
const RAMPUP_BUCKET_COUNT: u64 = 8;

/// Sliding-window counter of participants this selector has assigned to a
/// bridge recently, implemented as a ring of fixed-width time buckets whose
/// total span equals `participantRampupInterval` (spec §4.2, design note §9).
#[derive(Debug, Default)]
struct RampupCounter {
    // (bucket_start_ms, count), oldest first.
    buckets: Mutex<VecDeque<(u64, u32)>>,
}

impl RampupCounter {
    fn bucket_width_ms(interval_ms: u64) -> u64 {
        (interval_ms / RAMPUP_BUCKET_COUNT).max(1)
    }

    fn record(&self, now_ms: u64, interval_ms: u64) {
        let width = Self::bucket_width_ms(interval_ms);
        let bucket_start = (now_ms / width) * width;
        let mut buckets = self.buckets.lock().expect("rampup mutex poisoned");
        match buckets.back_mut() {
            Some((start, count)) if *start == bucket_start => {
                *count += 1;
            }
            _ => buckets.push_back((bucket_start, 1)),
        }
        Self::prune(&mut buckets, now_ms, interval_ms);
    }

    fn sum(&self, now_ms: u64, interval_ms: u64) -> u32 {
        let mut buckets = self.buckets.lock().expect("rampup mutex poisoned");
        Self::prune(&mut buckets, now_ms, interval_ms);
        buckets.iter().map(|(_, count)| *count).sum()
    }

    fn prune(buckets: &mut VecDeque<(u64, u32)>, now_ms: u64, interval_ms: u64) {
        let window_start = now_ms.saturating_sub(interval_ms);
        while let Some((start, _)) = buckets.front() {
            if *start < window_start {
                buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-bridge mutable attributes (spec §3).
///
/// `id` is immutable; every other attribute may change over the bridge's
/// lifetime and is stored behind a field-granular lock or atomic so that
/// concurrent readers never block each other.
#[derive(Debug)]
pub struct Bridge {
    id: BridgeId,
    version: RwLock<Option<Arc<str>>>,
    region: RwLock<Option<Arc<str>>>,
    relay_id: RwLock<Option<Arc<str>>>,
    stress_bits: AtomicU64,
    drain: AtomicBool,
    graceful_shutdown: AtomicBool,
    operational: AtomicBool,
    /// Whether a caller has asked for `operational=true` since the last
    /// recorded failure; the promotion in `is_operational` only fires
    /// when this is set, never on the strength of elapsed time alone.
    pending_true: AtomicBool,
    last_failure_at_ms: AtomicU64,
    last_presence_at_ms: AtomicU64,
    last_presence_healthy: AtomicBool,
    rampup: RampupCounter,
    tuning: BridgeTuning,
    clock: Arc<dyn Clock>,
}

impl Bridge {
    /// Create a new bridge, freshly observed and assumed operational, not
    /// draining, not shutting down, with zero reported stress (spec §3
    /// lifecycle: "created on first presence observation").
    pub fn new(id: BridgeId, clock: Arc<dyn Clock>, tuning: BridgeTuning) -> Self {
        let now = clock.now_millis();
        Self {
            id,
            version: RwLock::new(None),
            region: RwLock::new(None),
            relay_id: RwLock::new(None),
            stress_bits: AtomicU64::new(0.0f64.to_bits()),
            drain: AtomicBool::new(false),
            graceful_shutdown: AtomicBool::new(false),
            operational: AtomicBool::new(true),
            pending_true: AtomicBool::new(false),
            last_failure_at_ms: AtomicU64::new(0),
            last_presence_at_ms: AtomicU64::new(now),
            last_presence_healthy: AtomicBool::new(true),
            rampup: RampupCounter::default(),
            tuning,
            clock,
        }
    }

    pub fn id(&self) -> &BridgeId {
        &self.id
    }

    // -- string attributes --------------------------------------------

    pub fn version(&self) -> Option<Arc<str>> {
        self.version.read().expect("version lock poisoned").clone()
    }

    pub fn set_version(&self, version: Option<String>) {
        *self.version.write().expect("version lock poisoned") = version.map(Arc::from);
    }

    pub fn region(&self) -> Option<Arc<str>> {
        self.region.read().expect("region lock poisoned").clone()
    }

    pub fn set_region(&self, region: Option<String>) {
        *self.region.write().expect("region lock poisoned") = region.map(Arc::from);
    }

    pub fn relay_id(&self) -> Option<Arc<str>> {
        self.relay_id
            .read()
            .expect("relay_id lock poisoned")
            .clone()
    }

    pub fn set_relay_id(&self, relay_id: Option<String>) {
        *self.relay_id.write().expect("relay_id lock poisoned") = relay_id.map(Arc::from);
    }

    // -- stress ----------------------------------------------------------

    /// The raw, last-reported stress value.
    pub fn raw_stress(&self) -> f64 {
        f64::from_bits(self.stress_bits.load(AtomicOrdering::Acquire))
    }

    pub fn set_stress(&self, stress: f64) {
        self.stress_bits
            .store(stress.to_bits(), AtomicOrdering::Release);
    }

    /// `correctedStress = max(lastReportedStress, lastReportedStress +
    /// recentAllocations * averageParticipantStress)` (spec §4.2).
    pub fn corrected_stress(&self) -> f64 {
        let raw = self.raw_stress();
        let recent = self.recent_allocations() as f64;
        let inflated = raw + recent * self.tuning.average_participant_stress;
        raw.max(inflated)
    }

    pub fn is_overloaded(&self) -> bool {
        self.corrected_stress() >= 1.0
    }

    /// Record that the selector just assigned a participant to this
    /// bridge, feeding the rampup correction (spec §4.2, §9).
    pub fn record_allocation(&self) {
        let now = self.clock.now_millis();
        self.rampup
            .record(now, self.tuning.participant_rampup_interval_ms);
    }

    fn recent_allocations(&self) -> u32 {
        let now = self.clock.now_millis();
        self.rampup
            .sum(now, self.tuning.participant_rampup_interval_ms)
    }

    // -- drain / shutdown --------------------------------------------

    pub fn is_drain(&self) -> bool {
        self.drain.load(AtomicOrdering::Acquire)
    }

    pub fn set_drain(&self, drain: bool) {
        self.drain.store(drain, AtomicOrdering::Release);
    }

    pub fn is_graceful_shutdown(&self) -> bool {
        self.graceful_shutdown.load(AtomicOrdering::Acquire)
    }

    /// Set the graceful-shutdown flag, returning `true` exactly when this
    /// call performed the false -> true transition (the registry uses this
    /// to decide whether to emit `bridgeIsShuttingDown`, spec §4.1).
    pub fn set_graceful_shutdown(&self, shutting_down: bool) -> bool {
        if !shutting_down {
            self.graceful_shutdown.store(false, AtomicOrdering::Release);
            return false;
        }
        !self.graceful_shutdown.swap(true, AtomicOrdering::AcqRel)
    }

    // -- sticky operational flag --------------------------------------

    /// Whether the bridge is currently considered operational, applying
    /// the sticky false->true hold (spec §3 invariant 2, §4.2, §8).
    ///
    /// A false->true transition requires *both* an explicit
    /// `set_operational(true)` call recorded since the last failure *and*
    /// `failureResetThreshold` having elapsed since that failure; absent a
    /// pending true request, reads keep returning `false` forever, no
    /// matter how much time passes. The flip itself happens lazily, on
    /// the next read once both conditions hold.
    pub fn is_operational(&self) -> bool {
        if self.operational.load(AtomicOrdering::Acquire) {
            return true;
        }
        if !self.pending_true.load(AtomicOrdering::Acquire) {
            return false;
        }
        let last_failure = self.last_failure_at_ms.load(AtomicOrdering::Acquire);
        let now = self.clock.now_millis();
        if now.saturating_sub(last_failure) >= self.tuning.failure_reset_threshold_ms {
            self.operational.store(true, AtomicOrdering::Release);
            true
        } else {
            false
        }
    }

    /// Set the operational flag. A `false` set always sticks immediately,
    /// resets the failure clock (spec §4.2: "a subsequent false set resets
    /// the clock") and clears any previously pending true request - it no
    /// longer applies to the new failure window. A `true` set records the
    /// request as pending and is only ever honored through the lazy
    /// threshold check in `is_operational`.
    pub fn set_operational(&self, operational: bool) {
        if operational {
            self.pending_true.store(true, AtomicOrdering::Release);
            let _ = self.is_operational();
        } else {
            self.operational.store(false, AtomicOrdering::Release);
            self.pending_true.store(false, AtomicOrdering::Release);
            self.last_failure_at_ms
                .store(self.clock.now_millis(), AtomicOrdering::Release);
        }
    }

    // -- presence ---------------------------------------------------------

    pub fn last_presence_at_millis(&self) -> u64 {
        self.last_presence_at_ms.load(AtomicOrdering::Acquire)
    }

    /// Whether the most recent presence advertisement reported the bridge
    /// healthy (spec §4.5, presence-based health mode). Bridges that never
    /// advertise a `healthy` key default to `true` - absence of the
    /// optional key is not itself a health signal.
    pub fn last_presence_healthy(&self) -> bool {
        self.last_presence_healthy.load(AtomicOrdering::Acquire)
    }

    /// Apply a presence advertisement, returning `true` iff this call
    /// performed the not-shutting-down -> shutting-down transition (spec
    /// §4.1's `updatePresence`).
    pub fn apply_presence(&self, payload: &PresencePayload) -> bool {
        self.last_presence_at_ms
            .store(self.clock.now_millis(), AtomicOrdering::Release);

        if let Some(healthy) = payload.healthy() {
            self.last_presence_healthy
                .store(healthy, AtomicOrdering::Release);
        }

        if let Some(stress) = payload.stress_level() {
            self.set_stress(stress);
        }
        if let Some(region) = payload.region() {
            self.set_region(Some(region));
        }
        if let Some(relay_id) = payload.relay_id() {
            self.set_relay_id(Some(relay_id));
        }
        if let Some(version) = payload.version() {
            self.set_version(Some(version));
        }
        if let Some(drain) = payload.drain() {
            self.set_drain(drain);
        }

        if let Some(shutting_down) = payload.shutdown_in_progress() {
            self.set_graceful_shutdown(shutting_down)
        } else {
            false
        }
    }

    /// Total order over bridges where `a` sorting before `b` means "a is
    /// more desirable" (spec §4.2): operational before non-operational,
    /// not-draining-for-shutdown before graceful-shutdown, then lower
    /// corrected stress.
    pub fn compare(a: &Bridge, b: &Bridge) -> Ordering {
        let a_operational = a.is_operational();
        let b_operational = b.is_operational();
        if a_operational != b_operational {
            return if a_operational {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        let a_shutdown = a.is_graceful_shutdown();
        let b_shutdown = b.is_graceful_shutdown();
        if a_shutdown != b_shutdown {
            return if a_shutdown {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        a.corrected_stress()
            .partial_cmp(&b.corrected_stress())
            .unwrap_or(Ordering::Equal)
    }
}
