//! Conflict-free scene document.
//!
//! Architecture:
//! ```text
//!              apply_operation(op)
//!                     │
//!        ┌────────────┴────────────┐
//!        │ op_id in history_index? │──yes──► cached result (duplicate=true)
//!        └────────────┬────────────┘
//!                     │ no
//!          server_clock = max(clock, op.clock) + 1
//!                     │
//!          OperationBody::parse(kind, payload)
//!                     │
//!     ┌───────────────┼────────────────────────────┐
//!     ▼               ▼                            ▼
//!  title/start     meta[key]  nodes[id]  lines[id] + line_order
//!  LwwRegister     LwwRegister ...       (LWW-gated)
//!                     │
//!          Applied ⇒ version += 1
//!                     │
//!          history.push_back(logged)   (evict oldest past max_history)
//! ```
//!
//! Every register write is stamped with the operation's *declared* clock and
//! its `op_id`, never with the server clock, so the visible state depends
//! only on the set of operations received and not on their arrival order.
//!
//! Reference: Lamport, "Time, Clocks, and the Ordering of Events" (1978)

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::OperationError;
use crate::operation::{
    ApplyOutcome, FieldSet, LineRemove, LineUpsert, LoggedOperation, MetaUpdate, NodeRemove,
    NodeUpsert, Operation, OperationBody, OperationResult, OrderReplace, RejectReason,
};
use crate::register::{LwwRegister, OrderRegister};
use crate::snapshot::{
    record_id, PersistedScene, Record, SceneSnapshot, SceneState, LINE_ID_KEY, NODE_ID_KEY,
};

/// Default number of operations retained for duplicate detection and replay.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Document configuration.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// Bounded history length (clamped to at least 1).
    pub max_history: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

/// Register-backed scene document with a bounded, deduplicating history.
#[derive(Debug)]
pub struct Document {
    scene_id: String,
    clock: u64,
    version: u64,
    title: LwwRegister<Option<String>>,
    start: LwwRegister<Option<String>>,
    meta: BTreeMap<String, LwwRegister<Value>>,
    nodes: BTreeMap<String, LwwRegister<Option<Record>>>,
    lines: IndexMap<String, LwwRegister<Option<Record>>>,
    line_order: OrderRegister,
    history: VecDeque<Arc<LoggedOperation>>,
    history_index: HashMap<String, Arc<LoggedOperation>>,
    max_history: usize,
}

impl Document {
    /// Create an empty document.
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self::with_config(scene_id, DocumentConfig::default())
    }

    pub fn with_config(scene_id: impl Into<String>, config: DocumentConfig) -> Self {
        Self {
            scene_id: scene_id.into(),
            clock: 0,
            version: 0,
            title: LwwRegister::new(None),
            start: LwwRegister::new(None),
            meta: BTreeMap::new(),
            nodes: BTreeMap::new(),
            lines: IndexMap::new(),
            line_order: OrderRegister::new(),
            history: VecDeque::new(),
            history_index: HashMap::new(),
            max_history: config.max_history.max(1),
        }
    }

    /// Create a document and, if a persisted payload exists, bootstrap from it.
    pub fn from_persisted(
        scene_id: impl Into<String>,
        persisted: Option<&PersistedScene>,
        config: DocumentConfig,
    ) -> Self {
        let mut doc = Self::with_config(scene_id, config);
        if let Some(persisted) = persisted {
            doc.bootstrap(persisted);
        }
        doc
    }

    /// Restore registers from a persisted payload.
    ///
    /// Values are assigned unconditionally at the zero stamp, so any later
    /// operation supersedes them. Nothing is appended to history. Nodes and
    /// lines lacking an id are skipped.
    pub fn bootstrap(&mut self, persisted: &PersistedScene) {
        let snapshot = &persisted.snapshot;
        let state = &snapshot.state;

        self.title.assign(state.title.clone());
        self.start.assign(state.start.clone());

        self.meta = state
            .meta
            .iter()
            .map(|(key, value)| (key.clone(), LwwRegister::new(value.clone())))
            .collect();

        self.nodes.clear();
        for node in &state.nodes {
            match record_id(node, NODE_ID_KEY) {
                Some(id) => {
                    self.nodes
                        .insert(id.to_string(), LwwRegister::new(Some(node.clone())));
                }
                None => log::warn!("Scene {}: skipping persisted node without id", self.scene_id),
            }
        }

        self.lines.clear();
        for line in &state.lines {
            match record_id(line, LINE_ID_KEY) {
                Some(id) => {
                    self.lines
                        .insert(id.to_string(), LwwRegister::new(Some(line.clone())));
                }
                None => log::warn!("Scene {}: skipping persisted line without line_id", self.scene_id),
            }
        }
        self.line_order.assign(state.order.iter().cloned());

        self.version = snapshot.version;
        self.clock = snapshot.clock.max(persisted.lamport);

        log::debug!(
            "Scene {} bootstrapped at version {} (clock {})",
            self.scene_id,
            self.version,
            self.clock
        );
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Whether `op_id` is still inside the duplicate-detection window.
    pub fn has_seen(&self, op_id: &str) -> bool {
        self.history_index.contains_key(op_id)
    }

    // ───────────────────────────────────────────────────────────────
    // Reads
    // ───────────────────────────────────────────────────────────────

    /// Materialize the visible state.
    pub fn snapshot(&self) -> SceneSnapshot {
        let nodes = self
            .nodes
            .values()
            .filter_map(|reg| reg.value().clone())
            .collect();

        let order = self.line_order.ids();
        let positioned: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut lines: Vec<Record> = order
            .iter()
            .filter_map(|id| self.lines.get(id))
            .filter_map(|reg| reg.value().clone())
            .collect();
        lines.extend(
            self.lines
                .iter()
                .filter(|(id, _)| !positioned.contains(id.as_str()))
                .filter_map(|(_, reg)| reg.value().clone()),
        );

        let meta = self
            .meta
            .iter()
            .filter(|(_, reg)| !reg.value().is_null())
            .map(|(key, reg)| (key.clone(), reg.value().clone()))
            .collect();

        SceneSnapshot {
            scene_id: self.scene_id.clone(),
            version: self.version,
            clock: self.clock,
            state: SceneState {
                title: self.title.value().clone(),
                start: self.start.value().clone(),
                nodes,
                lines,
                order: order.to_vec(),
                meta,
            },
        }
    }

    /// Snapshot plus the Lamport clock, for storage.
    pub fn persistable(&self) -> PersistedScene {
        PersistedScene {
            snapshot: self.snapshot(),
            lamport: self.clock,
        }
    }

    /// History entries with `version` strictly greater than `version`, in
    /// application order.
    pub fn operations_since(&self, version: u64) -> Vec<LoggedOperation> {
        self.history
            .iter()
            .filter(|logged| logged.version > version)
            .map(|logged| LoggedOperation::clone(logged))
            .collect()
    }

    // ───────────────────────────────────────────────────────────────
    // Writes
    // ───────────────────────────────────────────────────────────────

    /// Apply one operation. Never fails: malformed and unknown operations are
    /// logged as not applied.
    pub fn apply_operation(&mut self, op: Operation) -> OperationResult {
        if let Some(logged) = self.history_index.get(op.op_id()) {
            log::trace!("Scene {}: duplicate op {}", self.scene_id, op.op_id());
            return logged.result(true);
        }

        let server_clock = self.clock.max(op.clock()).saturating_add(1);
        self.clock = server_clock;

        let outcome = match OperationBody::parse(op.kind(), op.payload()) {
            Ok(body) => self.dispatch(&op, body),
            Err(err) => ApplyOutcome::Faulted(err),
        };

        match &outcome {
            ApplyOutcome::Applied => self.version += 1,
            ApplyOutcome::Faulted(err) => {
                log::warn!(
                    "Scene {}: op {} from {} faulted: {err}",
                    self.scene_id,
                    op.op_id(),
                    op.actor()
                );
            }
            ApplyOutcome::Rejected(reason) => {
                log::debug!(
                    "Scene {}: op {} ({}) not applied: {reason:?}",
                    self.scene_id,
                    op.op_id(),
                    op.kind()
                );
            }
        }

        let logged = Arc::new(LoggedOperation {
            applied: outcome.is_applied(),
            operation: op,
            version: self.version,
            server_clock,
            outcome,
        });
        self.record(Arc::clone(&logged));
        logged.result(false)
    }

    /// Apply operations in order. Each is independent of the others.
    pub fn apply_many<I>(&mut self, ops: I) -> Vec<OperationResult>
    where
        I: IntoIterator<Item = Operation>,
    {
        ops.into_iter().map(|op| self.apply_operation(op)).collect()
    }

    fn record(&mut self, logged: Arc<LoggedOperation>) {
        self.history_index
            .insert(logged.operation.op_id().to_string(), Arc::clone(&logged));
        self.history.push_back(logged);

        while self.history.len() > self.max_history {
            let Some(evicted) = self.history.pop_front() else {
                break;
            };
            let op_id = evicted.operation.op_id();
            if self
                .history_index
                .get(op_id)
                .is_some_and(|indexed| Arc::ptr_eq(indexed, &evicted))
            {
                self.history_index.remove(op_id);
            }
        }
    }

    fn dispatch(&mut self, op: &Operation, body: OperationBody) -> ApplyOutcome {
        let result = match body {
            OperationBody::FieldSet(set) => self.set_field(op, set),
            OperationBody::MetaUpdate(update) => Ok(self.update_meta(op, update)),
            OperationBody::NodeUpsert(upsert) => self.upsert_node(op, upsert),
            OperationBody::NodeRemove(remove) => self.remove_node(op, remove),
            OperationBody::LineUpsert(upsert) => self.upsert_line(op, upsert),
            OperationBody::LineRemove(remove) => self.remove_line(op, remove),
            OperationBody::OrderReplace(replace) => Ok(self.replace_order(op, replace)),
            OperationBody::Unknown(tag) => Ok(ApplyOutcome::Rejected(RejectReason::UnknownKind(tag))),
        };
        result.unwrap_or_else(ApplyOutcome::Faulted)
    }

    // ───────────────────────────────────────────────────────────────
    // Handlers
    // ───────────────────────────────────────────────────────────────

    fn set_field(&mut self, op: &Operation, set: FieldSet) -> Result<ApplyOutcome, OperationError> {
        let register = match set.field.as_str() {
            "title" => &mut self.title,
            "start" => &mut self.start,
            _ => {
                return Ok(ApplyOutcome::Rejected(RejectReason::UnsupportedField(set.field)));
            }
        };
        let value = match set.value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => {
                return Err(OperationError::invalid(
                    op.kind().as_str(),
                    "value",
                    format!("expected string or null, got {other}"),
                ));
            }
        };
        Ok(ApplyOutcome::from_change(
            register.update(value, op.clock(), op.op_id()),
        ))
    }

    fn update_meta(&mut self, op: &Operation, update: MetaUpdate) -> ApplyOutcome {
        let mut changed = false;
        for (key, value) in update.meta {
            if key.is_empty() {
                continue;
            }
            // Per-key tie-break so keys inside one op never collide.
            let tiebreak = format!("{}:{}", op.op_id(), key);
            let register = self.meta.entry(key).or_default();
            changed |= register.update(value, op.clock(), &tiebreak);
        }
        ApplyOutcome::from_change(changed)
    }

    fn upsert_node(&mut self, op: &Operation, upsert: NodeUpsert) -> Result<ApplyOutcome, OperationError> {
        let mut node = upsert.node;
        let id = ensure_record_id(&mut node, NODE_ID_KEY, op)?;
        let register = self.nodes.entry(id).or_default();
        Ok(ApplyOutcome::from_change(
            register.update(Some(node), op.clock(), op.op_id()),
        ))
    }

    fn remove_node(&mut self, op: &Operation, remove: NodeRemove) -> Result<ApplyOutcome, OperationError> {
        if remove.id.is_empty() {
            return Err(OperationError::invalid(op.kind().as_str(), "id", "must not be empty"));
        }
        // Tombstone, not delete: lower-stamped upserts must keep losing.
        let register = self.nodes.entry(remove.id).or_default();
        Ok(ApplyOutcome::from_change(
            register.update(None, op.clock(), op.op_id()),
        ))
    }

    fn upsert_line(&mut self, op: &Operation, upsert: LineUpsert) -> Result<ApplyOutcome, OperationError> {
        let mut line = upsert.line;
        let id = ensure_record_id(&mut line, LINE_ID_KEY, op)?;

        let register = self.lines.entry(id.clone()).or_default();
        let line_changed = register.update(Some(line), op.clock(), op.op_id());

        let mut order_changed = false;
        if !self.line_order.contains(&id) {
            let mut ids = self.line_order.ids().to_vec();
            let position = insertion_position(&ids, upsert.index, upsert.after.as_deref());
            ids.insert(position, id);
            order_changed = self.line_order.update(ids, op.clock(), op.op_id());
        }

        Ok(ApplyOutcome::from_change(line_changed || order_changed))
    }

    fn remove_line(&mut self, op: &Operation, remove: LineRemove) -> Result<ApplyOutcome, OperationError> {
        if remove.line_id.is_empty() {
            return Err(OperationError::invalid(op.kind().as_str(), "line_id", "must not be empty"));
        }

        let register = self.lines.entry(remove.line_id.clone()).or_default();
        let line_changed = register.update(None, op.clock(), op.op_id());

        let mut order_changed = false;
        if self.line_order.contains(&remove.line_id) {
            let remaining: Vec<String> = self
                .line_order
                .ids()
                .iter()
                .filter(|id| **id != remove.line_id)
                .cloned()
                .collect();
            order_changed = self.line_order.update(remaining, op.clock(), op.op_id());
        }

        Ok(ApplyOutcome::from_change(line_changed || order_changed))
    }

    fn replace_order(&mut self, op: &Operation, replace: OrderReplace) -> ApplyOutcome {
        let ids = replace.order.into_iter().flatten();
        ApplyOutcome::from_change(self.line_order.update(ids, op.clock(), op.op_id()))
    }
}

/// Read the record's id, deriving one from the op_id when absent.
///
/// Derived ids are UUIDv5 of the op_id, so every replica replaying the same
/// operation derives the same id.
fn ensure_record_id(record: &mut Record, key: &'static str, op: &Operation) -> Result<String, OperationError> {
    match record.get(key) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        None | Some(Value::Null) | Some(Value::String(_)) => {
            let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, op.op_id().as_bytes()).to_string();
            record.insert(key.to_string(), Value::String(id.clone()));
            Ok(id)
        }
        Some(other) => Err(OperationError::invalid(
            op.kind().as_str(),
            key,
            format!("expected string id, got {other}"),
        )),
    }
}

/// Where a new line lands: explicit index (clamped), right after `after` if
/// that id is present, else the end.
fn insertion_position(ids: &[String], index: Option<f64>, after: Option<&str>) -> usize {
    if let Some(index) = index.filter(|i| i.is_finite()) {
        // `as` saturates: negatives clamp to 0.
        return (index as usize).min(ids.len());
    }
    after
        .filter(|after| !after.is_empty())
        .and_then(|after| ids.iter().position(|id| id == after))
        .map_or(ids.len(), |pos| pos + 1)
}
