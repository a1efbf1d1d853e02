//! Configuration surface (spec §6).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! The core itself never parses files, environment variables or CLI flags -
//! that's explicitly out of scope (spec §1) - but it still needs a typed,
//! validated configuration surface for the hosting application to fill in,
//! following the `MatrixonConfig::validate` convention from `matrixon-core`.

use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::BridgeCoreError;
use crate::strategy::SelectionStrategyKind;

/// Default per-bridge participant cap (`MAX_BP`), spec §6.
pub const DEFAULT_MAX_BRIDGE_PARTICIPANTS: u32 = 80;

/// Configuration for the selector facade and its strategies (spec §6).
///
/// `localRegion` and `regionGroups` are not duplicated here - the
/// region-based strategy carries them directly as
/// `SelectionStrategyKind::RegionBased` fields, the single source of
/// truth a `RegionBased` selection consults (spec §9's tagged-variant
/// design note: "carrying only the parameters each variant needs").
#[derive(Debug, Clone)]
pub struct BridgeSelectionConfig {
    /// `maxBridgeParticipants`.
    pub max_bridge_participants: u32,
    /// Which strategy `BridgeSelector` delegates to.
    pub selection_strategy: SelectionStrategyKind,
    /// `failureResetThreshold`.
    pub failure_reset_threshold: Duration,
    /// `participantRampupInterval`.
    pub participant_rampup_interval: Duration,
    /// `averageParticipantStress`.
    pub average_participant_stress: f64,
}

impl Default for BridgeSelectionConfig {
    fn default() -> Self {
        Self {
            max_bridge_participants: DEFAULT_MAX_BRIDGE_PARTICIPANTS,
            selection_strategy: SelectionStrategyKind::Single,
            failure_reset_threshold: Duration::from_secs(60),
            participant_rampup_interval: Duration::from_secs(10),
            average_participant_stress: 0.01,
        }
    }
}

impl BridgeSelectionConfig {
    /// Validate the configuration, mirroring `MatrixonConfig::validate`'s
    /// shape: a quick sanity pass with elapsed-time logging, returning a
    /// descriptive error for anything a hosting application got wrong.
    #[instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<(), BridgeCoreError> {
        let start = std::time::Instant::now();
        debug!("🔧 Validating BridgeSelectionConfig");

        if self.max_bridge_participants == 0 {
            return Err(BridgeCoreError::InvalidConfig(
                "maxBridgeParticipants must be greater than zero".into(),
            ));
        }

        if self.average_participant_stress < 0.0 {
            return Err(BridgeCoreError::InvalidConfig(
                "averageParticipantStress must be non-negative".into(),
            ));
        }

        if let SelectionStrategyKind::Visitor { .. } = &self.selection_strategy {
            // Visitor wraps two inner strategies; neither may itself be
            // Visitor (spec §4.4.4 defines Visitor purely as a decorator
            // over Single/Split/RegionBased).
            if self.selection_strategy.has_nested_visitor() {
                return Err(BridgeCoreError::InvalidConfig(
                    "Visitor selection strategy cannot nest another Visitor strategy".into(),
                ));
            }
        }

        info!("✅ BridgeSelectionConfig validated in {:?}", start.elapsed());
        Ok(())
    }
}

/// Configuration for the health-check scheduler (spec §4.5, §6).
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// `healthChecksInterval`.
    pub interval: Duration,
    /// `healthChecksRetryDelay`; zero disables the single retry.
    pub retry_delay: Duration,
    /// `presenceHealthTimeout`, only consulted in presence-based mode.
    pub presence_health_timeout: Duration,
    /// `usePresenceForHealth`.
    pub use_presence_for_health: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(5),
            presence_health_timeout: Duration::from_secs(60),
            use_presence_for_health: false,
        }
    }
}
