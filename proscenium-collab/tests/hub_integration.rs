//! Hub integration tests.
//!
//! Verifies:
//! - First concurrent references to a scene build exactly one room
//! - flush_all is best-effort across rooms
//! - discard_empty does not persist
//! - Scenes survive a hub restart through the file store

use async_trait::async_trait;
use futures_util::future::join_all;
use proscenium_collab::{
    ClientInfo, FileStore, Hub, HubConfig, MemoryStore, RoomConfig, SceneStore, StoreConfig,
    StoreError,
};
use proscenium_core::{ActorClock, LinePosition, PersistedScene, Record};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Counts loads (slowly) and rejects saves for scenes prefixed `bad`.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    loads: AtomicUsize,
}

#[async_trait]
impl SceneStore for CountingStore {
    async fn load(&self, scene_id: &str) -> Result<Option<PersistedScene>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.inner.load(scene_id).await
    }

    async fn save(&self, scene: &PersistedScene) -> Result<(), StoreError> {
        if scene.scene_id().starts_with("bad") {
            return Err(StoreError::Backend(format!("refusing {}", scene.scene_id())));
        }
        self.inner.save(scene).await
    }
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_builds_one_room() {
    init_logging();
    let store = Arc::new(CountingStore::default());
    let hub = Arc::new(Hub::with_store(store.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.room("shared").await })
        })
        .collect();
    let rooms: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    assert!(rooms.iter().all(|room| Arc::ptr_eq(room, &rooms[0])));
    assert_eq!(hub.room_count().await, 1);
}

#[tokio::test]
async fn test_flush_all_is_best_effort() {
    init_logging();
    let store = Arc::new(CountingStore::default());
    let hub = Hub::with_store(store.clone());
    let mut alice = ActorClock::new("alice");

    for scene_id in ["good-1", "bad-1", "good-2"] {
        let room = hub.room(scene_id).await.unwrap();
        room.apply_operations("alice", vec![alice.set_title(Some(scene_id))]).await;
    }
    hub.room("untouched").await.unwrap();

    let report = hub.flush_all().await;
    assert_eq!(report.flushed, 2);
    assert!(!report.is_ok());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "bad-1");

    assert!(store.inner.get("good-1").await.is_some());
    assert!(store.inner.get("good-2").await.is_some());
    assert!(store.inner.get("untouched").await.is_none());
    assert!(hub.get("bad-1").await.unwrap().is_dirty().await);

    // Nothing left to do for the rooms that made it.
    let again = hub.flush_all().await;
    assert_eq!(again.flushed, 0);
    assert_eq!(again.failures.len(), 1);
}

#[tokio::test]
async fn test_discard_empty_drops_unflushed_edits() {
    let store = Arc::new(MemoryStore::new());
    let hub = Hub::with_store(store.clone());
    let room = hub.room("scratch").await.unwrap();
    room.join(ClientInfo::new("c1", "Alice")).await;
    let mut alice = ActorClock::new("alice");
    room.apply_operations("c1", vec![alice.set_title(Some("lost"))]).await;

    assert!(hub.discard_empty().await.is_empty());
    room.leave("c1").await;
    assert_eq!(hub.discard_empty().await, ["scratch"]);
    assert_eq!(store.save_count(), 0);

    let reopened = hub.room("scratch").await.unwrap();
    assert_eq!(reopened.version().await, 0);
    assert!(reopened.snapshot().await.state.title.is_none());
}

#[tokio::test]
async fn test_room_config_applies_to_new_rooms() {
    let config = HubConfig {
        room: RoomConfig {
            control_ttl_secs: 2.0,
            max_history: 2,
            ..RoomConfig::default()
        },
    };
    let hub = Hub::new(config, None);
    let room = hub.room("s").await.unwrap();
    room.join(ClientInfo::new("a", "Alice")).await;

    let mut alice = ActorClock::new("a");
    let ops = (0..5).map(|i| alice.set_title(Some(&format!("t{i}")))).collect();
    room.apply_operations("a", ops).await;
    assert_eq!(room.operations_since(0).await.len(), 2);

    let granted = room.request_control("a", None).await;
    let presence = room.presence().await;
    let expires = presence.control.expires.unwrap();
    assert!(granted.is_granted());
    let granted_at = presence.client("a").unwrap().last_seen;
    assert!((expires - granted_at - 2.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_scene_survives_restart_on_disk() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut author = ActorClock::new("author");

    let before = {
        let store = Arc::new(FileStore::open(StoreConfig::at(dir.path())).await.unwrap());
        let hub = Hub::with_store(store);
        let room = hub.room("act-1/scene-3").await.unwrap();
        let ops = vec![
            author.set_title(Some("The Letter")),
            author.upsert_node(record(json!({"id": "n1", "kind": "dialogue"}))),
            author.set_start(Some("n1")),
            author.upsert_line(record(json!({"line_id": "l1", "text": "Who sent this?"})), LinePosition::End),
            author.upsert_line(record(json!({"line_id": "l0", "text": "(a knock)"})), LinePosition::Index(0)),
            author.update_meta(record(json!({"mood": "uneasy"}))),
        ];
        let results = room.apply_operations("author", ops).await;
        assert!(results.iter().all(|r| r.applied));

        assert!(hub.close("act-1/scene-3").await.unwrap());
        room.snapshot().await
    };

    let store = Arc::new(FileStore::open(StoreConfig::at(dir.path())).await.unwrap());
    assert_eq!(store.scene_ids().await.unwrap(), ["act-1/scene-3"]);

    let hub = Hub::with_store(store);
    let room = hub.room("act-1/scene-3").await.unwrap();
    let after = room.snapshot().await;
    assert_eq!(after, before);
    assert_eq!(after.line_ids(), ["l0", "l1"]);

    // Restored registers sit below any real edit.
    author.observe(after.clock);
    let results = room
        .apply_operations("author", vec![author.set_title(Some("The Second Letter"))])
        .await;
    assert!(results[0].applied);
    assert_eq!(results[0].version, before.version + 1);
}
