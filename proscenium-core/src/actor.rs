//! Client-side operation minting.
//!
//! An [`ActorClock`] owns one actor's Lamport clock and op counter and
//! produces operations with globally unique ids of the form
//! `"{actor}:{counter}"`.

use serde_json::{json, Value};

use crate::operation::{Operation, OperationKind};
use crate::snapshot::Record;

/// Where a new script line should be placed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinePosition {
    #[default]
    End,
    Index(usize),
    After(String),
}

#[derive(Debug, Clone)]
pub struct ActorClock {
    actor: String,
    counter: u64,
    clock: u64,
}

impl ActorClock {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            counter: 0,
            clock: 0,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Fold a clock seen elsewhere (e.g. a `server_clock`) into ours.
    pub fn observe(&mut self, remote_clock: u64) {
        self.clock = self.clock.max(remote_clock);
    }

    /// Mint the next operation.
    pub fn next(&mut self, kind: impl Into<OperationKind>, payload: Value) -> Operation {
        self.counter += 1;
        self.clock = self.clock.saturating_add(1);
        Operation::new(
            format!("{}:{}", self.actor, self.counter),
            self.actor.clone(),
            self.clock,
            kind,
            payload,
        )
    }

    pub fn set_title(&mut self, title: Option<&str>) -> Operation {
        self.next(
            OperationKind::SceneFieldSet,
            json!({"field": "title", "value": title}),
        )
    }

    pub fn set_start(&mut self, node_id: Option<&str>) -> Operation {
        self.next(
            OperationKind::SceneFieldSet,
            json!({"field": "start", "value": node_id}),
        )
    }

    pub fn update_meta(&mut self, meta: Record) -> Operation {
        self.next(OperationKind::SceneMetaUpdate, json!({ "meta": meta }))
    }

    pub fn upsert_node(&mut self, node: Record) -> Operation {
        self.next(OperationKind::GraphNodeUpsert, json!({ "node": node }))
    }

    pub fn remove_node(&mut self, id: &str) -> Operation {
        self.next(OperationKind::GraphNodeRemove, json!({ "id": id }))
    }

    pub fn upsert_line(&mut self, line: Record, position: LinePosition) -> Operation {
        let payload = match position {
            LinePosition::End => json!({ "line": line }),
            LinePosition::Index(index) => json!({ "line": line, "index": index }),
            LinePosition::After(after) => json!({ "line": line, "after": after }),
        };
        self.next(OperationKind::ScriptLineUpsert, payload)
    }

    pub fn remove_line(&mut self, line_id: &str) -> Operation {
        self.next(OperationKind::ScriptLineRemove, json!({ "line_id": line_id }))
    }

    pub fn replace_order<I, S>(&mut self, order: I) -> Operation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let order: Vec<String> = order.into_iter().map(Into::into).collect();
        self.next(OperationKind::ScriptOrderReplace, json!({ "order": order }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Document;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_op_ids_are_actor_scoped() {
        let mut alice = ActorClock::new("alice");
        let first = alice.set_title(Some("A"));
        let second = alice.set_title(Some("B"));
        assert_eq!(first.op_id(), "alice:1");
        assert_eq!(second.op_id(), "alice:2");
        assert_eq!(first.clock(), 1);
        assert_eq!(second.clock(), 2);
        assert_eq!(second.actor(), "alice");
    }

    #[test]
    fn test_observe_advances_clock() {
        let mut bob = ActorClock::new("bob");
        bob.observe(41);
        assert_eq!(bob.set_title(None).clock(), 42);
        bob.observe(3);
        assert_eq!(bob.clock(), 42);
    }

    #[test]
    fn test_minted_ops_apply() {
        let mut alice = ActorClock::new("alice");
        let mut doc = Document::new("s");
        let ops = vec![
            alice.set_title(Some("Prologue")),
            alice.upsert_node(record(json!({"id": "n1", "kind": "dialogue"}))),
            alice.set_start(Some("n1")),
            alice.upsert_line(record(json!({"line_id": "l1"})), LinePosition::End),
            alice.upsert_line(record(json!({"line_id": "l0"})), LinePosition::Index(0)),
            alice.upsert_line(record(json!({"line_id": "l2"})), LinePosition::After("l1".into())),
            alice.update_meta(record(json!({"act": 1}))),
        ];
        let results = doc.apply_many(ops);
        assert!(results.iter().all(|r| r.applied));

        let snap = doc.snapshot();
        assert_eq!(snap.state.title.as_deref(), Some("Prologue"));
        assert_eq!(snap.state.start.as_deref(), Some("n1"));
        assert_eq!(snap.line_ids(), ["l0", "l1", "l2"]);

        doc.apply_operation(alice.remove_line("l1"));
        doc.apply_operation(alice.remove_node("n1"));
        doc.apply_operation(alice.replace_order(["l2", "l0"]));
        let snap = doc.snapshot();
        assert_eq!(snap.line_ids(), ["l2", "l0"]);
        assert!(snap.state.nodes.is_empty());
    }
}
