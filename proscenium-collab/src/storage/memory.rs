//! In-process scene store.

use async_trait::async_trait;
use proscenium_core::PersistedScene;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{SceneStore, StoreError};

/// Keeps the latest payload per scene in a map and counts saves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    scenes: RwLock<HashMap<String, PersistedScene>>,
    saves: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a scene, as if it had been saved earlier.
    pub fn with_scene(scene: PersistedScene) -> Self {
        let mut store = Self::new();
        store
            .scenes
            .get_mut()
            .insert(scene.scene_id().to_string(), scene);
        store
    }

    pub async fn get(&self, scene_id: &str) -> Option<PersistedScene> {
        self.scenes.read().await.get(scene_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.scenes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.scenes.read().await.is_empty()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SceneStore for MemoryStore {
    async fn load(&self, scene_id: &str) -> Result<Option<PersistedScene>, StoreError> {
        Ok(self.get(scene_id).await)
    }

    async fn save(&self, scene: &PersistedScene) -> Result<(), StoreError> {
        self.scenes
            .write()
            .await
            .insert(scene.scene_id().to_string(), scene.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
