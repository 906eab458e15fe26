//! # codeshare-collab: shared code rooms with simulated execution
//!
//! Participants join a room, edit one shared buffer, pick a language, run
//! the code through heuristic runners and see each other's presence,
//! cursors and whiteboard strokes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  join / edit / run   ┌──────────────┐
//! │   Session   │ ───────────────────► │ RoomRegistry │◄──────┐
//! │ (per join)  │                      └──────┬───────┘       │ status
//! └──────┬──────┘                             │ snapshot      │
//!        │ execute                            ▼ broadcasts    │
//!        ▼                             ┌──────────────┐ ┌─────┴──────────┐
//! ┌──────────────────┐    result       │   EventBus   │ │ PresenceTracker│
//! │ExecutionDispatcher│ ─────────────► │ (jittered,   │ └────────────────┘
//! │ (per-user lease) │                 │  unordered)  │
//! └──────┬───────────┘                 └──────┬───────┘
//!        │                                    │ deliver
//!        ▼                                    ▼
//! ┌──────────────────┐                 ┌──────────────┐
//! │ LanguageRunner   │                 │   RoomView   │
//! │ (heuristics)     │                 │ (echo-free)  │
//! └──────────────────┘                 └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Events, users, languages, whiteboard ops, binary form
//! - [`bus`]: Per-room publish/subscribe with injected delivery jitter
//! - [`room`]: Membership and the shared code/language snapshot
//! - [`presence`]: idle/typing/executing transitions
//! - [`execution`] / [`runner`]: Leased dispatch to heuristic runners
//! - [`storage`]: Snapshot persistence (memory or RocksDB)
//! - [`view`]: Participant-side state with echo suppression
//! - [`engine`]: Wiring and per-join sessions

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod runner;
pub mod storage;
pub mod view;

// Re-exports for convenience
pub use bus::{BusStats, EventBus, EventHandler, Subscription};
pub use config::CollabConfig;
pub use engine::{CollabEngine, Session};
pub use error::CollabError;
pub use execution::{ExecutionDispatcher, ExecutionError, ExecutionResult};
pub use presence::PresenceTracker;
pub use protocol::{
    CursorPosition, DrawOp, Event, EventPayload, EventType, Language, Point, ProtocolError,
    User, UserId, UserStatus,
};
pub use room::{RoomRegistry, RoomState};
pub use runner::{LanguageRunner, RunOutcome, Runner};
pub use storage::{
    CodeStore, MemoryStore, RocksStore, RoomMetadata, RoomSnapshot, SnapshotStore, StoreConfig,
    StoreError,
};
pub use view::RoomView;
