//! A scene room: one document, its connected clients, the control lease and
//! the persistence state.
//!
//! Architecture:
//! ```text
//!  transport ──► Room::apply_operations ──► Document::apply_many
//!                    │                           │
//!                    │ any applied ⇒ dirty       │ OperationResult[]
//!                    ▼                           ▼
//!               RoomState (Mutex) ─────────► RoomEvent (broadcast)
//!                    │
//!   Room::flush ─────┤ flush_gate (single-flight)
//!                    ▼
//!          SceneStore::save(persistable)   (state lock released)
//! ```
//!
//! Every mutation goes through the state mutex, so one room is one unit of
//! serialization. The store is only ever awaited after that guard is dropped.

use proscenium_core::{
    Document, LoggedOperation, Operation, OperationResult, SceneSnapshot,
};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::config::{FeatureFlags, RoomConfig};
use crate::control::{ControlLease, ControlResponse, ControlState};
use crate::presence::{ClientInfo, ClientPresence, PresenceSnapshot};
use crate::storage::{SceneStore, StoreError};
use crate::wallclock::{SystemWallClock, WallClock};

/// Notifications fanned out to room subscribers.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Joined { client_id: String },
    Left { client_id: String },
    Presence { client_id: String },
    Control(ControlState),
    /// Newly applied (non-duplicate) results of one batch.
    Applied(Arc<[OperationResult]>),
    Persisted { version: u64 },
    FeatureFlags(FeatureFlags),
}

struct RoomState {
    document: Document,
    clients: HashMap<String, ClientPresence>,
    control: ControlLease,
    dirty: bool,
    persisted_version: u64,
    feature_flags: FeatureFlags,
}

impl RoomState {
    fn needs_persist(&self) -> bool {
        self.dirty && self.document.version() != self.persisted_version
    }

    /// Run `f` against the lease with a view of who is connected. Returns
    /// the result and the new lease state if it changed.
    fn with_control<R>(
        &mut self,
        f: impl FnOnce(&mut ControlLease, &dyn Fn(&str) -> bool) -> R,
    ) -> (R, Option<ControlState>) {
        let before = self.control.state();
        let clients = &self.clients;
        let is_connected = |client_id: &str| clients.contains_key(client_id);
        let result = f(&mut self.control, &is_connected);
        let after = self.control.state();
        (result, (after != before).then_some(after))
    }

    fn presence(&self, scene_id: &str) -> PresenceSnapshot {
        let mut clients: Vec<ClientPresence> = self.clients.values().cloned().collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        PresenceSnapshot {
            scene_id: scene_id.to_string(),
            clients,
            control: self.control.state(),
        }
    }
}

pub struct Room {
    scene_id: String,
    state: Mutex<RoomState>,
    /// Held for the whole of a persistence round-trip.
    flush_gate: Mutex<()>,
    store: Option<Arc<dyn SceneStore>>,
    clock: Arc<dyn WallClock>,
    events: broadcast::Sender<RoomEvent>,
}

impl Room {
    /// Wrap `document`. Its current version counts as already persisted.
    pub fn new(
        document: Document,
        config: &RoomConfig,
        store: Option<Arc<dyn SceneStore>>,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let persisted_version = document.version();
        Self {
            scene_id: document.scene_id().to_string(),
            state: Mutex::new(RoomState {
                document,
                clients: HashMap::new(),
                control: ControlLease::new(config.control_ttl()),
                dirty: false,
                persisted_version,
                feature_flags: config.feature_flags.clone(),
            }),
            flush_gate: Mutex::new(()),
            store,
            clock,
            events,
        }
    }

    /// A fresh room with default configuration and no persistence.
    pub fn in_memory(scene_id: impl Into<String>) -> Self {
        let config = RoomConfig::default();
        let document = Document::with_config(scene_id, config.document_config());
        Self::new(document, &config, None, Arc::new(SystemWallClock))
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RoomEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_control(&self, control: Option<ControlState>) {
        if let Some(control) = control {
            self.publish(RoomEvent::Control(control));
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Clients and presence
    // ───────────────────────────────────────────────────────────────

    /// Register a client. Re-joining refreshes the name and `last_seen`
    /// and returns `false`.
    pub async fn join(&self, info: ClientInfo) -> bool {
        let now = self.clock.now();
        let client_id = info.client_id.clone();
        let joined = {
            let mut state = self.state.lock().await;
            match state.clients.entry(client_id.clone()) {
                Entry::Occupied(mut entry) => {
                    let presence = entry.get_mut();
                    presence.user_name = info.user_name;
                    presence.last_seen = now;
                    false
                }
                Entry::Vacant(entry) => {
                    entry.insert(ClientPresence::new(info, now));
                    true
                }
            }
        };
        if joined {
            log::debug!("Room {}: {client_id} joined", self.scene_id);
            self.publish(RoomEvent::Joined { client_id });
        }
        joined
    }

    /// Remove a client. An owner leaving hands control to the next connected
    /// waiter; a waiter leaving drops out of the queue.
    pub async fn leave(&self, client_id: &str) -> bool {
        let now = self.clock.now();
        let control = {
            let mut state = self.state.lock().await;
            if state.clients.remove(client_id).is_none() {
                return false;
            }
            let (_, control) =
                state.with_control(|lease, connected| lease.release(client_id, now, connected));
            control
        };
        log::debug!("Room {}: {client_id} left", self.scene_id);
        self.publish(RoomEvent::Left {
            client_id: client_id.to_string(),
        });
        self.publish_control(control);
        true
    }

    /// Merge recognized presence fields for a joined client. Unknown clients
    /// are ignored.
    pub async fn update_presence(&self, client_id: &str, payload: &Value) -> bool {
        let now = self.clock.now();
        let merged = {
            let mut state = self.state.lock().await;
            match state.clients.get_mut(client_id) {
                Some(presence) => presence.merge(payload, now),
                None => {
                    log::trace!("Room {}: presence from unknown client {client_id}", self.scene_id);
                    return false;
                }
            }
        };
        if merged {
            self.publish(RoomEvent::Presence {
                client_id: client_id.to_string(),
            });
        }
        merged
    }

    /// Clients and control lease, after expiring a stale lease.
    pub async fn presence(&self) -> PresenceSnapshot {
        let now = self.clock.now();
        let (snapshot, control) = {
            let mut state = self.state.lock().await;
            let (_, control) = state.with_control(|lease, connected| lease.expire(now, connected));
            (state.presence(&self.scene_id), control)
        };
        self.publish_control(control);
        snapshot
    }

    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    pub async fn has_client(&self, client_id: &str) -> bool {
        self.state.lock().await.clients.contains_key(client_id)
    }

    // ───────────────────────────────────────────────────────────────
    // Control
    // ───────────────────────────────────────────────────────────────

    /// Grant, extend or queue. `ttl` that is missing, non-finite or not
    /// positive falls back to the room's default.
    pub async fn request_control(&self, client_id: &str, ttl: Option<f64>) -> ControlResponse {
        let now = self.clock.now();
        let (response, control) = {
            let mut state = self.state.lock().await;
            if let Some(presence) = state.clients.get_mut(client_id) {
                presence.last_seen = now;
            }
            state.with_control(|lease, connected| lease.request(client_id, ttl, now, connected))
        };
        log::debug!("Room {}: control request from {client_id}: {response:?}", self.scene_id);
        self.publish_control(control);
        response
    }

    pub async fn release_control(&self, client_id: &str) -> bool {
        let now = self.clock.now();
        let (released, control) = {
            let mut state = self.state.lock().await;
            state.with_control(|lease, connected| lease.release(client_id, now, connected))
        };
        self.publish_control(control);
        released
    }

    // ───────────────────────────────────────────────────────────────
    // Document
    // ───────────────────────────────────────────────────────────────

    /// Apply a batch in order. Marks the room dirty if anything changed and
    /// advances the client's tracked clock to the highest clock in the batch.
    pub async fn apply_operations(&self, client_id: &str, ops: Vec<Operation>) -> Vec<OperationResult> {
        let now = self.clock.now();
        let batch_clock = ops.iter().map(Operation::clock).max();
        let submitted = ops.len();

        let results = {
            let mut state = self.state.lock().await;
            let results = state.document.apply_many(ops);
            if results.iter().any(|r| r.applied && !r.duplicate) {
                state.dirty = true;
            }
            if let (Some(clock), Some(presence)) = (batch_clock, state.clients.get_mut(client_id)) {
                presence.observe_clock(clock, now);
            }
            results
        };

        let fresh: Arc<[OperationResult]> = results
            .iter()
            .filter(|r| r.applied && !r.duplicate)
            .cloned()
            .collect();
        log::debug!(
            "Room {}: {} of {submitted} ops from {client_id} applied",
            self.scene_id,
            fresh.len()
        );
        if !fresh.is_empty() {
            self.publish(RoomEvent::Applied(fresh));
        }
        results
    }

    pub async fn snapshot(&self) -> SceneSnapshot {
        self.state.lock().await.document.snapshot()
    }

    pub async fn operations_since(&self, version: u64) -> Vec<LoggedOperation> {
        self.state.lock().await.document.operations_since(version)
    }

    pub async fn version(&self) -> u64 {
        self.state.lock().await.document.version()
    }

    // ───────────────────────────────────────────────────────────────
    // Persistence
    // ───────────────────────────────────────────────────────────────

    /// Whether there are applied changes not yet persisted.
    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.needs_persist()
    }

    pub async fn persisted_version(&self) -> u64 {
        self.state.lock().await.persisted_version
    }

    /// Persist the current state if it changed since the last save.
    ///
    /// Concurrent calls collapse: a caller that gets the gate after another
    /// flush already saved this version does nothing. A failed save leaves
    /// the room dirty. Returns whether a save happened.
    pub async fn flush(&self) -> Result<bool, StoreError> {
        let Some(store) = &self.store else {
            self.state.lock().await.dirty = false;
            return Ok(false);
        };
        if !self.is_dirty().await {
            return Ok(false);
        }

        let _gate = self.flush_gate.lock().await;
        let payload = {
            let state = self.state.lock().await;
            if !state.needs_persist() {
                return Ok(false);
            }
            state.document.persistable()
        };
        let version = payload.version();

        store.save(&payload).await?;

        {
            let mut state = self.state.lock().await;
            state.persisted_version = state.persisted_version.max(version);
            if state.document.version() == version {
                state.dirty = false;
            }
        }
        log::info!("Room {}: persisted version {version}", self.scene_id);
        self.publish(RoomEvent::Persisted { version });
        Ok(true)
    }

    // ───────────────────────────────────────────────────────────────
    // Feature flags
    // ───────────────────────────────────────────────────────────────

    pub async fn feature_flags(&self) -> FeatureFlags {
        self.state.lock().await.feature_flags.clone()
    }

    pub async fn set_feature_flags(&self, flags: FeatureFlags) {
        self.state.lock().await.feature_flags = flags.clone();
        self.publish(RoomEvent::FeatureFlags(flags));
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("scene_id", &self.scene_id)
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
