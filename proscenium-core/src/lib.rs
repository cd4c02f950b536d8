//! # proscenium-core: conflict-free scene document engine
//!
//! A scene is a title, a start node, free-form metadata, a graph of nodes and
//! an ordered list of script lines. Every field is a last-writer-wins register
//! so that concurrent editors converge without locking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  Operation   ┌──────────────────────────────────────┐
//! │ ActorClock   │ ───────────► │ Document                             │
//! │ (per client) │              │  title / start   LwwRegister         │
//! └──────────────┘              │  meta[key]       LwwRegister         │
//!        ▲                      │  nodes[id]       LwwRegister (tomb.) │
//!        │ server_clock         │  lines[id]       LwwRegister (tomb.) │
//!        └───────────────────── │  line_order      OrderRegister       │
//!          OperationResult      │  history         bounded + indexed   │
//!                               └──────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`register`]: LWW scalar and ordered-id-list registers
//! - [`operation`]: operation records, kinds, payloads, results
//! - [`document`]: the document engine
//! - [`snapshot`]: snapshot / persistable wire shapes
//! - [`actor`]: client-side operation minting

pub mod actor;
pub mod document;
pub mod error;
pub mod operation;
pub mod register;
pub mod snapshot;

pub use actor::{ActorClock, LinePosition};
pub use document::{Document, DocumentConfig, DEFAULT_MAX_HISTORY};
pub use error::OperationError;
pub use operation::{
    ApplyOutcome, LoggedOperation, Operation, OperationBody, OperationKind, OperationResult,
    RejectReason,
};
pub use register::{LwwRegister, OrderRegister, Stamp};
pub use snapshot::{PersistedScene, Record, SceneSnapshot, SceneState};
