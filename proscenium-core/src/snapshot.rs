//! Snapshot wire shapes.
//!
//! ```text
//! snapshot:    { scene_id, title, start, version, clock, nodes, lines, order, meta }
//! persistable: snapshot + { lamport }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A free-form JSON object (graph node or script line).
pub type Record = serde_json::Map<String, Value>;

/// Key carrying a graph node's stable id.
pub const NODE_ID_KEY: &str = "id";
/// Key carrying a script line's stable id.
pub const LINE_ID_KEY: &str = "line_id";

/// Visible scene content, independent of version/clock bookkeeping.
///
/// Two documents that received the same operations compare equal here
/// regardless of delivery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    /// Live nodes, sorted by id.
    #[serde(default)]
    pub nodes: Vec<Record>,
    /// Live lines in script order; lines without a position trail in
    /// insertion order.
    #[serde(default)]
    pub lines: Vec<Record>,
    /// Raw ordering register contents.
    #[serde(default)]
    pub order: Vec<String>,
    /// Live meta entries, sorted by key.
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub scene_id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub clock: u64,
    #[serde(flatten)]
    pub state: SceneState,
}

impl SceneSnapshot {
    pub fn node(&self, id: &str) -> Option<&Record> {
        self.state
            .nodes
            .iter()
            .find(|node| record_id(node, NODE_ID_KEY) == Some(id))
    }

    pub fn line_ids(&self) -> Vec<&str> {
        self.state
            .lines
            .iter()
            .filter_map(|line| record_id(line, LINE_ID_KEY))
            .collect()
    }
}

/// Payload handed to the persistence collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedScene {
    #[serde(flatten)]
    pub snapshot: SceneSnapshot,
    #[serde(default)]
    pub lamport: u64,
}

impl PersistedScene {
    pub fn scene_id(&self) -> &str {
        &self.snapshot.scene_id
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version
    }
}

pub(crate) fn record_id<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    match record.get(key) {
        Some(Value::String(id)) if !id.is_empty() => Some(id.as_str()),
        _ => None,
    }
}
