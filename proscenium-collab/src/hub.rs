//! Hub: lazily constructed registry of scene rooms.
//!
//! Architecture:
//! ```text
//!  room(scene_id) ──► Registry (Mutex) ──hit──► Arc<Room>
//!                          │ miss
//!                          ▼
//!              SceneStore::load(scene_id)
//!                          │
//!              Document::from_persisted ──► Room ──► registry insert
//!
//!  flush_all ──► join_all(room.flush()) ──► FlushReport
//!  discard_empty ──► evict rooms with no clients (no flush)
//! ```
//!
//! The registry lock is held across the first load of a scene so that two
//! concurrent first references build one room, not two. Lock order is always
//! registry → room; a room never reaches back into its hub.

use futures_util::future::join_all;
use proscenium_core::Document;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{FeatureFlags, HubConfig, RoomConfig};
use crate::room::Room;
use crate::storage::{SceneStore, StoreError};
use crate::wallclock::{SystemWallClock, WallClock};

/// Outcome of [`Hub::flush_all`].
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Rooms that actually saved.
    pub flushed: usize,
    /// Rooms whose save failed; they stay dirty.
    pub failures: Vec<(String, StoreError)>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Registry {
    rooms: HashMap<String, Arc<Room>>,
    feature_flags: FeatureFlags,
}

pub struct Hub {
    config: HubConfig,
    registry: Mutex<Registry>,
    store: Option<Arc<dyn SceneStore>>,
    clock: Arc<dyn WallClock>,
}

impl Hub {
    pub fn new(config: HubConfig, store: Option<Arc<dyn SceneStore>>) -> Self {
        let feature_flags = config.room.feature_flags.clone();
        Self {
            config,
            registry: Mutex::new(Registry {
                rooms: HashMap::new(),
                feature_flags,
            }),
            store,
            clock: Arc::new(SystemWallClock),
        }
    }

    /// Default configuration, nothing persisted.
    pub fn in_memory() -> Self {
        Self::new(HubConfig::default(), None)
    }

    /// Default configuration backed by `store`.
    pub fn with_store(store: Arc<dyn SceneStore>) -> Self {
        Self::new(HubConfig::default(), Some(store))
    }

    /// Replace the wall clock handed to rooms built from now on.
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The room for `scene_id`, loading and building it on first reference.
    pub async fn room(&self, scene_id: &str) -> Result<Arc<Room>, StoreError> {
        let mut registry = self.registry.lock().await;
        if let Some(room) = registry.rooms.get(scene_id) {
            return Ok(Arc::clone(room));
        }

        let persisted = match &self.store {
            Some(store) => store.load(scene_id).await?,
            None => None,
        };
        let config = RoomConfig {
            feature_flags: registry.feature_flags.clone(),
            ..self.config.room.clone()
        };
        let document = Document::from_persisted(scene_id, persisted.as_ref(), config.document_config());
        log::info!(
            "Opened room {scene_id} at version {} ({})",
            document.version(),
            if persisted.is_some() { "restored" } else { "new" }
        );

        let room = Arc::new(Room::new(document, &config, self.store.clone(), Arc::clone(&self.clock)));
        registry.rooms.insert(scene_id.to_string(), Arc::clone(&room));
        Ok(room)
    }

    /// The room for `scene_id` if it is live. Never loads.
    pub async fn get(&self, scene_id: &str) -> Option<Arc<Room>> {
        self.registry.lock().await.rooms.get(scene_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.rooms.len()
    }

    /// Ids of live rooms, sorted.
    pub async fn scene_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.lock().await.rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn live_rooms(&self) -> Vec<(String, Arc<Room>)> {
        self.registry
            .lock()
            .await
            .rooms
            .iter()
            .map(|(id, room)| (id.clone(), Arc::clone(room)))
            .collect()
    }

    /// Flush every live room concurrently. One room failing does not stop
    /// the others.
    pub async fn flush_all(&self) -> FlushReport {
        let rooms = self.live_rooms().await;
        let results = join_all(rooms.iter().map(|(_, room)| room.flush())).await;

        let mut report = FlushReport::default();
        for ((scene_id, _), result) in rooms.into_iter().zip(results) {
            match result {
                Ok(true) => report.flushed += 1,
                Ok(false) => {}
                Err(err) => {
                    log::error!("Failed to persist room {scene_id}: {err}");
                    report.failures.push((scene_id, err));
                }
            }
        }
        if report.flushed > 0 {
            log::info!("Flushed {} room(s)", report.flushed);
        }
        report
    }

    /// Evict every room with no connected clients and return their ids.
    /// Unsaved changes in evicted rooms are dropped; flush first if they
    /// matter.
    pub async fn discard_empty(&self) -> Vec<String> {
        let mut registry = self.registry.lock().await;
        let mut evicted = Vec::new();
        for (scene_id, room) in &registry.rooms {
            if room.client_count().await == 0 {
                evicted.push(scene_id.clone());
            }
        }
        for scene_id in &evicted {
            registry.rooms.remove(scene_id);
        }
        evicted.sort();
        if !evicted.is_empty() {
            log::info!("Discarded {} empty room(s)", evicted.len());
        }
        evicted
    }

    /// Flush one room, then evict it. Returns `false` if it was not live.
    /// On a failed flush the room stays registered.
    pub async fn close(&self, scene_id: &str) -> Result<bool, StoreError> {
        let Some(room) = self.get(scene_id).await else {
            return Ok(false);
        };
        room.flush().await?;

        let mut registry = self.registry.lock().await;
        if registry
            .rooms
            .get(scene_id)
            .is_some_and(|live| Arc::ptr_eq(live, &room))
        {
            registry.rooms.remove(scene_id);
            log::info!("Closed room {scene_id}");
        }
        Ok(true)
    }

    pub async fn feature_flags(&self) -> FeatureFlags {
        self.registry.lock().await.feature_flags.clone()
    }

    /// Replace the hub's flags and push them to every live room.
    pub async fn update_feature_flags(&self, flags: FeatureFlags) {
        let mut registry = self.registry.lock().await;
        registry.feature_flags = flags.clone();
        for room in registry.rooms.values() {
            room.set_feature_flags(flags.clone()).await;
        }
        log::debug!("Feature flags updated for {} room(s)", registry.rooms.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlResponse;
    use crate::presence::ClientInfo;
    use crate::storage::MemoryStore;
    use crate::wallclock::ManualWallClock;
    use proscenium_core::ActorClock;

    #[tokio::test]
    async fn test_room_is_built_once() {
        let hub = Hub::in_memory();
        let a = hub.room("s1").await.unwrap();
        let b = hub.room("s1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(hub.room_count().await, 1);
        assert!(hub.get("s2").await.is_none());
        assert_eq!(hub.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_room_restores_from_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let hub = Hub::with_store(store.clone());
            let room = hub.room("s1").await.unwrap();
            let mut alice = ActorClock::new("alice");
            room.apply_operations("alice", vec![alice.set_title(Some("Kept"))]).await;
            assert_eq!(hub.flush_all().await.flushed, 1);
        }

        let hub = Hub::with_store(store);
        let room = hub.room("s1").await.unwrap();
        assert_eq!(room.snapshot().await.state.title.as_deref(), Some("Kept"));
        assert_eq!(room.version().await, 1);
        assert!(!room.is_dirty().await);
    }

    #[tokio::test]
    async fn test_discard_empty_keeps_occupied() {
        let hub = Hub::in_memory();
        hub.room("empty").await.unwrap();
        let busy = hub.room("busy").await.unwrap();
        busy.join(ClientInfo::new("c1", "Alice")).await;

        assert_eq!(hub.discard_empty().await, ["empty"]);
        assert_eq!(hub.scene_ids().await, ["busy"]);
    }

    #[tokio::test]
    async fn test_close_flushes_then_evicts() {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::with_store(store.clone());
        let room = hub.room("s1").await.unwrap();
        let mut alice = ActorClock::new("alice");
        room.apply_operations("alice", vec![alice.set_title(Some("Bye"))]).await;

        assert!(hub.close("s1").await.unwrap());
        assert!(!hub.close("s1").await.unwrap());
        assert_eq!(hub.room_count().await, 0);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_rooms_use_injected_clock() {
        let clock = Arc::new(ManualWallClock::new(50.0));
        let hub = Hub::in_memory().with_clock(clock.clone());
        let room = hub.room("s1").await.unwrap();
        room.join(ClientInfo::new("c1", "Alice")).await;

        let granted = room.request_control("c1", Some(10.0)).await;
        assert_eq!(granted, ControlResponse::Granted { owner: "c1".into(), expires: 60.0 });
        clock.advance(10.0);
        assert!(room.presence().await.control.owner.is_none());
    }

    #[tokio::test]
    async fn test_feature_flags_reach_existing_and_new_rooms() {
        let hub = Hub::in_memory();
        let early = hub.room("early").await.unwrap();

        hub.update_feature_flags(FeatureFlags::new().with("branching", true)).await;
        let late = hub.room("late").await.unwrap();

        assert!(hub.feature_flags().await.is_enabled("branching"));
        assert!(early.feature_flags().await.is_enabled("branching"));
        assert!(late.feature_flags().await.is_enabled("branching"));
    }
}
