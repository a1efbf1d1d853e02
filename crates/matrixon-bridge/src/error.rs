//! Error types for the bridge selection and health-tracking core
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! Following `matrixon-common`'s convention, each module that can fail owns
//! a focused error enum, and this module aggregates them behind a single
//! `BridgeCoreError` for callers that just want one error type to log or
//! match on. Per spec §7, the selector, selection strategies and registry
//! never return an error for expressible runtime conditions - a failed
//! selection is `Ok(None)`, an unknown-id presence update is silently
//! upgraded to `addBridge` - so this enum only aggregates the two
//! components that do have a genuine error channel: the cascade (which
//! throws synchronously, by design - see §7) and configuration validation.

use thiserror::Error;

use crate::cascade::CascadeError;

/// Aggregated error type for the bridge core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeCoreError {
    #[error("cascade topology error: {0}")]
    Cascade(#[from] CascadeError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
