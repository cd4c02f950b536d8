//! Room and hub configuration.

use proscenium_core::{DocumentConfig, DEFAULT_MAX_HISTORY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Default control lease length in seconds.
pub const DEFAULT_CONTROL_TTL_SECS: f64 = 30.0;

/// Default capacity of a room's event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// String-keyed feature switches, propagated hub → room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags(BTreeMap<String, Value>);

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// `true` for `true`, non-zero numbers, and the strings "true"/"on"/"1".
    pub fn is_enabled(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(enabled)) => *enabled,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "on" | "1"),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FeatureFlags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Per-room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Control lease length used when a request carries no valid TTL.
    pub control_ttl_secs: f64,
    /// History window of the room's document.
    pub max_history: usize,
    /// Event channel capacity; slow subscribers lag past this.
    pub event_capacity: usize,
    /// Initial feature flags.
    pub feature_flags: FeatureFlags,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            control_ttl_secs: DEFAULT_CONTROL_TTL_SECS,
            max_history: DEFAULT_MAX_HISTORY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            feature_flags: FeatureFlags::default(),
        }
    }
}

impl RoomConfig {
    pub fn document_config(&self) -> DocumentConfig {
        DocumentConfig {
            max_history: self.max_history,
        }
    }

    /// The configured TTL, or the built-in default if it is not a positive
    /// finite number.
    pub fn control_ttl(&self) -> f64 {
        valid_ttl(Some(self.control_ttl_secs)).unwrap_or(DEFAULT_CONTROL_TTL_SECS)
    }
}

/// Hub configuration. Every room the hub builds starts from `room`.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    pub room: RoomConfig,
}

pub(crate) fn valid_ttl(ttl: Option<f64>) -> Option<f64> {
    ttl.filter(|ttl| ttl.is_finite() && *ttl > 0.0)
}
