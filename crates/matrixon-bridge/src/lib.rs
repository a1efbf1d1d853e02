//! Matrixon Bridge Selection and Health-Tracking Core
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.11.0-alpha
//! License: Apache 2.0 / MIT
//!
//! The bridge selection and health-tracking core of a conference-focus
//! service: for every participant joining a conference, picks exactly one
//! media-mixer bridge, subject to load, locality, version, drain/shutdown
//! and topology constraints, and maintains a live view of all known
//! bridges - absorbing presence advertisements, probing them for
//! liveness, retiring failed or departing bridges, and tracking the
//! cascade topology of bridge-to-bridge relays.
//!
//! This crate does not open sockets, negotiate media or persist state
//! across restarts; it consumes and produces the well-typed values
//! described module-by-module below, and a hosting application wires the
//! signaling, recording and presence transports in around it.
//!
//! ## Modules
//!
//! - [`model`] - bridge identity, conference/participant properties, region groups.
//! - [`bridge`] - per-bridge mutable state: stress, drain, sticky operational flag.
//! - [`registry`] - the set of known bridges and its subscriber interface.
//! - [`selector`] - the facade that filters candidates and delegates to a strategy.
//! - [`strategy`] - the four selection strategies (Single, Split, RegionBased, Visitor).
//! - [`health`] - the per-bridge health-check scheduler (active probe or presence-based).
//! - [`cascade`] - the mesh-of-meshes bridge relay topology for one conference.
//! - [`presence`] - parsing of a bridge's periodic status advertisement.
//! - [`events`] - bridge lifecycle events and the per-subscriber delivery queue.
//! - [`config`] - the enumerated configuration surface a hosting application fills in.
//! - [`clock`] - the monotonic time abstraction used throughout for deterministic tests.
//! - [`error`] - the crate-wide aggregated error type.

#![forbid(unsafe_code)]

pub mod bridge;
pub mod cascade;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod model;
pub mod presence;
pub mod registry;
pub mod selector;
pub mod strategy;

pub use bridge::{Bridge, BridgeTuning};
pub use cascade::{CascadeError, CascadeTopology, MeshId, Repair};
pub use clock::{Clock as MonotonicClock, ManualClock, SystemClock};
pub use config::{BridgeSelectionConfig, HealthCheckConfig, DEFAULT_MAX_BRIDGE_PARTICIPANTS};
pub use error::BridgeCoreError;
pub use events::{BridgeEvent, BridgeEventHandler, SubscriptionHandle};
pub use health::{
    ErrorCondition, HealthCheckMode, HealthCheckObserver, HealthCheckScheduler, HealthCheckTransport,
    ProbeResponse, TransportFailure,
};
pub use model::{BridgeId, ConferenceBridgeProperties, ConferenceBridges, ParticipantProperties, RegionGroups};
pub use presence::PresencePayload;
pub use registry::BridgeRegistry;
pub use selector::BridgeSelector;
pub use strategy::SelectionStrategyKind;
