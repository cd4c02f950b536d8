//! Persistence collaborator for scene rooms.
//!
//! Architecture:
//! ```text
//! ┌──────────┐  load(scene_id)   ┌──────────────┐
//! │   Hub    │ ────────────────► │              │──► MemoryStore (tests, embedding)
//! └──────────┘                   │  SceneStore  │
//! ┌──────────┐  save(persisted)  │   (trait)    │──► FileStore   (JSON + LZ4, one
//! │   Room   │ ────────────────► │              │                 file per scene)
//! └──────────┘                   └──────────────┘
//! ```
//!
//! Both calls may suspend. Neither is ever made while a room's state lock is
//! held.

pub mod file;
pub mod memory;

pub use file::{FileStore, StoreConfig};
pub use memory::MemoryStore;

use async_trait::async_trait;
use proscenium_core::PersistedScene;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("decompression error: {0}")]
    Decompression(#[from] lz4_flex::block::DecompressError),
    /// Failure reported by a backend that has no richer error type.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Loader/saver pair supplied to a hub at construction.
#[async_trait]
pub trait SceneStore: Send + Sync {
    /// The last persisted payload for `scene_id`, if any.
    async fn load(&self, scene_id: &str) -> Result<Option<PersistedScene>, StoreError>;

    async fn save(&self, scene: &PersistedScene) -> Result<(), StoreError>;
}
