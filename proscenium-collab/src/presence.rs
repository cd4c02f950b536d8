//! Per-client presence: who is in the room and what they are looking at.
//!
//! ```text
//! join(ClientInfo) ──► ClientPresence { cursor, selection, focus, typing, … }
//!                           ▲
//! update_presence(payload) ─┘  (recognized, type-checked keys only)
//! ```
//!
//! Presence is only ever mutated by the client it belongs to; a payload for a
//! client that has not joined is dropped.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::control::ControlState;

/// Identity supplied by the transport when a client joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: String,
    pub user_name: String,
}

impl ClientInfo {
    pub fn new(client_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            user_name: user_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientPresence {
    pub client_id: String,
    pub user_name: String,
    /// Highest operation clock this client has submitted.
    pub clock: u64,
    pub cursor: Option<Value>,
    pub selection: Vec<String>,
    pub focus: Option<String>,
    pub typing: bool,
    pub capabilities: BTreeSet<String>,
    pub joined_at: f64,
    pub last_seen: f64,
}

impl ClientPresence {
    pub(crate) fn new(info: ClientInfo, now: f64) -> Self {
        Self {
            client_id: info.client_id,
            user_name: info.user_name,
            clock: 0,
            cursor: None,
            selection: Vec::new(),
            focus: None,
            typing: false,
            capabilities: BTreeSet::new(),
            joined_at: now,
            last_seen: now,
        }
    }

    /// Merge the recognized keys of `payload`. Keys with the wrong type are
    /// skipped individually. Returns whether any field was taken.
    pub(crate) fn merge(&mut self, payload: &Value, now: f64) -> bool {
        let Value::Object(fields) = payload else {
            return false;
        };
        let mut merged = false;

        match fields.get("cursor") {
            Some(Value::Null) => {
                self.cursor = None;
                merged = true;
            }
            Some(cursor @ Value::Object(_)) => {
                self.cursor = Some(cursor.clone());
                merged = true;
            }
            _ => {}
        }

        if let Some(Value::Array(items)) = fields.get("selection") {
            self.selection = strings(items).collect();
            merged = true;
        }

        match fields.get("focus") {
            Some(Value::Null) => {
                self.focus = None;
                merged = true;
            }
            Some(Value::String(focus)) => {
                self.focus = Some(focus.clone());
                merged = true;
            }
            _ => {}
        }

        if let Some(Value::Bool(typing)) = fields.get("typing") {
            self.typing = *typing;
            merged = true;
        }

        if let Some(Value::Array(items)) = fields.get("capabilities") {
            self.capabilities = strings(items).collect();
            merged = true;
        }

        self.last_seen = now;
        merged
    }

    pub(crate) fn observe_clock(&mut self, clock: u64, now: f64) {
        self.clock = self.clock.max(clock);
        self.last_seen = now;
    }
}

fn strings(items: &[Value]) -> impl Iterator<Item = String> + '_ {
    items
        .iter()
        .filter_map(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read-only view of a room's clients and control lease.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceSnapshot {
    pub scene_id: String,
    /// Sorted by `client_id`.
    pub clients: Vec<ClientPresence>,
    pub control: ControlState,
}

impl PresenceSnapshot {
    pub fn client(&self, client_id: &str) -> Option<&ClientPresence> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }
}
