//! # proscenium-collab: rooms, presence and persistence for scene documents
//!
//! Wraps a [`proscenium_core::Document`] per scene with the state a live
//! editing session needs: who is connected, who holds edit control, and
//! whether the scene has unsaved changes.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!  transport ────────► │ Hub                          │
//!  (out of scope)      │  scene_id → Arc<Room> (lazy) │
//!                      └──────────────┬───────────────┘
//!                                     │
//!                      ┌──────────────▼───────────────┐
//!                      │ Room                         │
//!                      │  Document                    │
//!                      │  clients: ClientPresence     │
//!                      │  ControlLease (TTL + FIFO)   │
//!                      │  dirty / persisted_version   │──► RoomEvent (broadcast)
//!                      └──────────────┬───────────────┘
//!                                     │ flush (single-flight)
//!                      ┌──────────────▼───────────────┐
//!                      │ SceneStore                   │
//!                      │  MemoryStore | FileStore     │
//!                      └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`hub`]: room registry, bulk flush, eviction
//! - [`room`]: per-scene serialization boundary
//! - [`control`]: edit-control lease state machine
//! - [`presence`]: per-client presence
//! - [`storage`]: persistence collaborator and its implementations
//! - [`config`]: room/hub configuration and feature flags
//! - [`wallclock`]: injectable wall clock

pub mod config;
pub mod control;
pub mod hub;
pub mod presence;
pub mod room;
pub mod storage;
pub mod wallclock;

// Re-exports for convenience
pub use config::{FeatureFlags, HubConfig, RoomConfig, DEFAULT_CONTROL_TTL_SECS};
pub use control::{ControlLease, ControlMode, ControlResponse, ControlState};
pub use hub::{FlushReport, Hub};
pub use presence::{ClientInfo, ClientPresence, PresenceSnapshot};
pub use room::{Room, RoomEvent};
pub use storage::{FileStore, MemoryStore, SceneStore, StoreConfig, StoreError};
pub use wallclock::{ManualWallClock, SystemWallClock, WallClock};
