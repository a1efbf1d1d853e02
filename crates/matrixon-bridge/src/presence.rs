//! Presence payload parsing (spec §6).
//!
//! Author: arkSong <arksong2018@gmail.com>
//!
//! A bridge's periodic status advertisement arrives as a loosely-typed
//! mapping of named statistics. Only a handful of keys are recognized;
//! everything else is ignored so that bridges can advertise additional
//! diagnostic stats without the core choking on them.

use serde_json::Value;
use std::collections::HashMap;

/// A single presence advertisement from a bridge.
///
/// Recognized keys: `stress_level` (number), `region` (string), `relay_id`
/// (string), `version` (string), `drain` (bool), `shutdown_in_progress`
/// (bool). Unknown keys are ignored (spec §6).
#[derive(Debug, Clone, Default)]
pub struct PresencePayload {
    raw: HashMap<String, Value>,
}

impl PresencePayload {
    pub fn new(raw: HashMap<String, Value>) -> Self {
        Self { raw }
    }

    pub fn stress_level(&self) -> Option<f64> {
        self.raw.get("stress_level").and_then(Value::as_f64)
    }

    pub fn region(&self) -> Option<String> {
        self.raw
            .get("region")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn relay_id(&self) -> Option<String> {
        self.raw
            .get("relay_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn version(&self) -> Option<String> {
        self.raw
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn drain(&self) -> Option<bool> {
        self.raw.get("drain").and_then(Value::as_bool)
    }

    pub fn shutdown_in_progress(&self) -> Option<bool> {
        self.raw
            .get("shutdown_in_progress")
            .and_then(Value::as_bool)
    }

    /// Presence-based health: was the last advertisement explicitly
    /// healthy? Absent from the real `ColibriStatsExtension` payload used
    /// by the distilled spec's source system, but recognized here as an
    /// optional `healthy` key so the presence-based health-check mode
    /// (spec §4.5) has something to read.
    pub fn healthy(&self) -> Option<bool> {
        self.raw.get("healthy").and_then(Value::as_bool)
    }
}

impl From<HashMap<String, Value>> for PresencePayload {
    fn from(raw: HashMap<String, Value>) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognizes_known_keys_and_ignores_unknown() {
        let mut raw = HashMap::new();
        raw.insert("stress_level".to_string(), json!(0.42));
        raw.insert("region".to_string(), json!("us-east"));
        raw.insert("relay_id".to_string(), json!("relay-1"));
        raw.insert("version".to_string(), json!("1.2.3"));
        raw.insert("drain".to_string(), json!(true));
        raw.insert("shutdown_in_progress".to_string(), json!(false));
        raw.insert("some_unknown_stat".to_string(), json!(12345));

        let payload = PresencePayload::new(raw);
        assert_eq!(payload.stress_level(), Some(0.42));
        assert_eq!(payload.region(), Some("us-east".to_string()));
        assert_eq!(payload.relay_id(), Some("relay-1".to_string()));
        assert_eq!(payload.version(), Some("1.2.3".to_string()));
        assert_eq!(payload.drain(), Some(true));
        assert_eq!(payload.shutdown_in_progress(), Some(false));
    }

    #[test]
    fn missing_keys_are_none() {
        let payload = PresencePayload::new(HashMap::new());
        assert_eq!(payload.stress_level(), None);
        assert_eq!(payload.region(), None);
    }
}
