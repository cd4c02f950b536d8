//! Operation contracts.
//!
//! Wire shape of an operation:
//! ```text
//! { op_id, actor, clock, kind, payload, timestamp }
//! ```
//!
//! `kind` is a closed set of known tags plus a single fallthrough
//! [`OperationKind::Unknown`] for tags this build does not understand.
//! Payloads travel as loose JSON and are validated into per-kind structs
//! ([`OperationBody`]) once, at the document boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::SystemTime;

use crate::error::OperationError;
use crate::snapshot::Record;

// ───────────────────────────────────────────────────────────────────
// Kind
// ───────────────────────────────────────────────────────────────────

/// Operation kind tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SceneFieldSet,
    SceneMetaUpdate,
    GraphNodeUpsert,
    GraphNodeRemove,
    ScriptLineUpsert,
    ScriptLineRemove,
    ScriptOrderReplace,
    /// Any tag not recognized by this build. Observed, never applied.
    Unknown(String),
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SceneFieldSet => "scene.field.set",
            Self::SceneMetaUpdate => "scene.meta.update",
            Self::GraphNodeUpsert => "graph.node.upsert",
            Self::GraphNodeRemove => "graph.node.remove",
            Self::ScriptLineUpsert => "script.line.upsert",
            Self::ScriptLineRemove => "script.line.remove",
            Self::ScriptOrderReplace => "script.order.replace",
            Self::Unknown(tag) => tag,
        }
    }

    pub fn parse(tag: &str) -> Self {
        match tag {
            "scene.field.set" => Self::SceneFieldSet,
            "scene.meta.update" => Self::SceneMetaUpdate,
            "graph.node.upsert" => Self::GraphNodeUpsert,
            "graph.node.remove" => Self::GraphNodeRemove,
            "script.line.upsert" => Self::ScriptLineUpsert,
            "script.line.remove" => Self::ScriptLineRemove,
            "script.order.replace" => Self::ScriptOrderReplace,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for OperationKind {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

impl Serialize for OperationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

// ───────────────────────────────────────────────────────────────────
// Operation
// ───────────────────────────────────────────────────────────────────

/// An immutable edit emitted by one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    op_id: String,
    actor: String,
    #[serde(default)]
    clock: u64,
    kind: OperationKind,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: f64,
}

impl Operation {
    /// Create an operation stamped with the current wall-clock time.
    pub fn new(
        op_id: impl Into<String>,
        actor: impl Into<String>,
        clock: u64,
        kind: impl Into<OperationKind>,
        payload: Value,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            op_id: op_id.into(),
            actor: actor.into(),
            clock,
            kind: kind.into(),
            payload,
            timestamp,
        }
    }

    /// Same operation with an explicit wall-clock timestamp.
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn op_id(&self) -> &str {
        &self.op_id
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

// ───────────────────────────────────────────────────────────────────
// Per-kind payloads
// ───────────────────────────────────────────────────────────────────

/// `scene.field.set`: `{ field, value }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSet {
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

/// `scene.meta.update`: `{ meta: { key: value, ... } }`. A `null` value
/// tombstones the key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetaUpdate {
    pub meta: serde_json::Map<String, Value>,
}

/// `graph.node.upsert`: `{ node: { id?, ... } }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeUpsert {
    pub node: Record,
}

/// `graph.node.remove`: `{ id }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeRemove {
    pub id: String,
}

/// `script.line.upsert`: `{ line: { line_id?, ... }, index?, after? }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineUpsert {
    pub line: Record,
    #[serde(default)]
    pub index: Option<f64>,
    #[serde(default)]
    pub after: Option<String>,
}

/// `script.line.remove`: `{ line_id }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineRemove {
    pub line_id: String,
}

/// `script.order.replace`: `{ order: [line_id, ...] }`. `null` entries are
/// dropped along with empty and repeated ids.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderReplace {
    pub order: Vec<Option<String>>,
}

/// A validated operation payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationBody {
    FieldSet(FieldSet),
    MetaUpdate(MetaUpdate),
    NodeUpsert(NodeUpsert),
    NodeRemove(NodeRemove),
    LineUpsert(LineUpsert),
    LineRemove(LineRemove),
    OrderReplace(OrderReplace),
    Unknown(String),
}

impl OperationBody {
    /// Validate a raw payload against the schema for `kind`.
    pub fn parse(kind: &OperationKind, payload: &Value) -> Result<Self, OperationError> {
        fn decode<T: serde::de::DeserializeOwned>(
            kind: &OperationKind,
            payload: &Value,
        ) -> Result<T, OperationError> {
            T::deserialize(payload).map_err(|e| OperationError::malformed(kind.as_str(), e))
        }

        Ok(match kind {
            OperationKind::SceneFieldSet => Self::FieldSet(decode(kind, payload)?),
            OperationKind::SceneMetaUpdate => Self::MetaUpdate(decode(kind, payload)?),
            OperationKind::GraphNodeUpsert => Self::NodeUpsert(decode(kind, payload)?),
            OperationKind::GraphNodeRemove => Self::NodeRemove(decode(kind, payload)?),
            OperationKind::ScriptLineUpsert => Self::LineUpsert(decode(kind, payload)?),
            OperationKind::ScriptLineRemove => Self::LineRemove(decode(kind, payload)?),
            OperationKind::ScriptOrderReplace => Self::OrderReplace(decode(kind, payload)?),
            OperationKind::Unknown(tag) => Self::Unknown(tag.clone()),
        })
    }
}

// ───────────────────────────────────────────────────────────────────
// Outcomes
// ───────────────────────────────────────────────────────────────────

/// Why an operation was observed without changing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Superseded by a dominating write, or the write carried the value
    /// already visible.
    Unchanged,
    /// `scene.field.set` targeting a field other than `title` / `start`.
    UnsupportedField(String),
    /// Kind tag not understood by this build.
    UnknownKind(String),
}

/// Tagged result of running one operation's handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    Rejected(RejectReason),
    Faulted(OperationError),
}

impl ApplyOutcome {
    pub(crate) fn from_change(changed: bool) -> Self {
        if changed {
            Self::Applied
        } else {
            Self::Rejected(RejectReason::Unchanged)
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }
}

/// History entry: an operation plus what the document assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedOperation {
    #[serde(flatten)]
    pub operation: Operation,
    pub version: u64,
    pub server_clock: u64,
    pub applied: bool,
    #[serde(skip)]
    pub outcome: ApplyOutcome,
}

impl LoggedOperation {
    pub fn result(&self, duplicate: bool) -> OperationResult {
        OperationResult {
            operation: self.operation.clone(),
            version: self.version,
            server_clock: self.server_clock,
            applied: self.applied,
            duplicate,
            outcome: self.outcome.clone(),
        }
    }
}

/// What the caller gets back from `apply_operation`.
///
/// For a duplicate, `version` and `server_clock` are the values recorded the
/// first time the `op_id` was processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    #[serde(flatten)]
    pub operation: Operation,
    pub version: u64,
    pub server_clock: u64,
    pub applied: bool,
    pub duplicate: bool,
    #[serde(skip)]
    pub outcome: ApplyOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_roundtrips_known_tags() {
        for tag in [
            "scene.field.set",
            "scene.meta.update",
            "graph.node.upsert",
            "graph.node.remove",
            "script.line.upsert",
            "script.line.remove",
            "script.order.replace",
        ] {
            let kind = OperationKind::parse(tag);
            assert!(kind.is_known(), "{tag} should be known");
            assert_eq!(kind.as_str(), tag);
        }
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let kind = OperationKind::parse("scene.camera.move");
        assert_eq!(kind, OperationKind::Unknown("scene.camera.move".into()));
        assert_eq!(kind.to_string(), "scene.camera.move");
    }

    #[test]
    fn test_operation_wire_shape() {
        let raw = json!({
            "op_id": "alice:1",
            "actor": "alice",
            "clock": 4,
            "kind": "scene.field.set",
            "payload": {"field": "title", "value": "Act I"},
            "timestamp": 1700000000.5
        });
        let op: Operation = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(op.op_id(), "alice:1");
        assert_eq!(op.clock(), 4);
        assert_eq!(op.kind(), &OperationKind::SceneFieldSet);
        assert_eq!(serde_json::to_value(&op).unwrap(), raw);
    }

    #[test]
    fn test_operation_defaults() {
        let op: Operation = serde_json::from_value(json!({
            "op_id": "x", "actor": "a", "kind": "future.kind"
        }))
        .unwrap();
        assert_eq!(op.clock(), 0);
        assert_eq!(op.payload(), &Value::Null);
        assert!(!op.kind().is_known());
    }

    #[test]
    fn test_parse_body() {
        let body = OperationBody::parse(
            &OperationKind::ScriptLineUpsert,
            &json!({"line": {"text": "Hello"}, "after": "l1"}),
        )
        .unwrap();
        match body {
            OperationBody::LineUpsert(upsert) => {
                assert_eq!(upsert.after.as_deref(), Some("l1"));
                assert!(upsert.index.is_none());
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_parse_body_malformed() {
        let err = OperationBody::parse(&OperationKind::GraphNodeRemove, &json!({"id": 7}))
            .unwrap_err();
        assert!(matches!(err, OperationError::MalformedPayload { ref kind, .. } if kind == "graph.node.remove"));
    }

    #[test]
    fn test_result_wire_shape() {
        let logged = LoggedOperation {
            operation: Operation::new("a:1", "a", 1, OperationKind::GraphNodeRemove, json!({"id": "n1"}))
                .with_timestamp(2.0),
            version: 3,
            server_clock: 9,
            applied: true,
            outcome: ApplyOutcome::Applied,
        };
        let wire = serde_json::to_value(logged.result(true)).unwrap();
        assert_eq!(wire["op_id"], "a:1");
        assert_eq!(wire["kind"], "graph.node.remove");
        assert_eq!(wire["version"], 3);
        assert_eq!(wire["server_clock"], 9);
        assert_eq!(wire["applied"], true);
        assert_eq!(wire["duplicate"], true);
        assert!(wire.get("outcome").is_none());
    }
}
