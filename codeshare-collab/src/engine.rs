//! Component wiring and the per-join [`Session`] capability.
//!
//! One [`CollabEngine`] owns a bus, a room registry, an execution
//! dispatcher and a code store. Every call to [`CollabEngine::join`]
//! returns a fresh [`Session`] bound to one (room, user) pair, so a single
//! process can hold several identities in different rooms, or in the same
//! room.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::bus::{EventBus, Subscription};
use crate::config::CollabConfig;
use crate::error::CollabError;
use crate::execution::{ExecutionDispatcher, ExecutionError, ExecutionResult};
use crate::protocol::{CursorPosition, DrawOp, Event, Language, UserId};
use crate::room::{RoomRegistry, RoomState};
use crate::storage::{
    CodeStore, MemoryStore, RocksStore, RoomSnapshot, SnapshotStore, StoreConfig,
};
use crate::view::RoomView;

/// Owns every shared component. Cheap to clone.
#[derive(Clone)]
pub struct CollabEngine {
    config: CollabConfig,
    bus: EventBus,
    registry: RoomRegistry,
    dispatcher: ExecutionDispatcher,
    store: CodeStore,
}

impl CollabEngine {
    /// Build an engine. Opens RocksDB when `storage_path` is set.
    pub fn new(config: CollabConfig) -> Result<Self, CollabError> {
        let backend: Arc<dyn SnapshotStore> = match &config.storage_path {
            Some(path) => Arc::new(RocksStore::open(StoreConfig::at(path))?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::with_backend(config, backend))
    }

    /// Build an engine over an existing snapshot backend.
    pub fn with_backend(config: CollabConfig, backend: Arc<dyn SnapshotStore>) -> Self {
        let bus = EventBus::new(config.max_jitter);
        let registry = RoomRegistry::new(bus.clone(), config.typing_revert_delay);
        let dispatcher = ExecutionDispatcher::new(
            registry.clone(),
            config.execution_cooldown,
            config.execution_latency,
        );
        let store = CodeStore::new(backend, config.save_latency);

        Self {
            config,
            bus,
            registry,
            dispatcher,
            store,
        }
    }

    /// Join `room_id` under `user_name`.
    ///
    /// A room that does not exist yet is opened from its saved snapshot, or
    /// from the greeting template.
    pub async fn join(&self, room_id: &str, user_name: &str) -> Result<Session, CollabError> {
        let room_id = room_id.trim();
        let user_name = user_name.trim();
        if room_id.is_empty() {
            return Err(CollabError::Validation("Room ID must not be empty".into()));
        }
        if user_name.is_empty() {
            return Err(CollabError::Validation("User name must not be empty".into()));
        }

        if !self.registry.has_room(room_id).await {
            self.registry
                .open_room(room_id, self.store.load(room_id).await)
                .await;
        }
        let user_id = self.registry.join(room_id, user_name).await;

        Ok(Session {
            room_id: room_id.to_string(),
            user_id,
            user_name: user_name.to_string(),
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            store: self.store.clone(),
        })
    }

    /// Evict empty rooms idle past `room_idle_ttl`, checking every TTL.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let ttl = self.config.room_idle_ttl;
        self.registry.spawn_reaper(ttl, ttl)
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &ExecutionDispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &CodeStore {
        &self.store
    }
}

/// One user's membership of one room.
///
/// Every operation acts as this user in this room. Dropping a session does
/// not leave the room; call [`Session::leave`].
pub struct Session {
    room_id: String,
    user_id: UserId,
    user_name: String,
    registry: RoomRegistry,
    dispatcher: ExecutionDispatcher,
    store: CodeStore,
}

impl Session {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub async fn set_code(&self, code: impl Into<String>) {
        self.registry
            .set_code(&self.room_id, self.user_id, code)
            .await;
    }

    pub async fn set_language(&self, language: Language) {
        self.registry
            .set_language(&self.room_id, self.user_id, language)
            .await;
    }

    pub async fn update_cursor(&self, position: CursorPosition) {
        self.registry
            .update_cursor(&self.room_id, self.user_id, position)
            .await;
    }

    /// Run `code` as `language`. Blank code is rejected without taking the
    /// execution lease.
    pub async fn execute(&self, code: &str, language: &Language) -> ExecutionResult {
        if code.trim().is_empty() {
            return ExecutionResult::rejected(ExecutionError::Validation(
                "Please write some code before running".into(),
            ));
        }
        self.dispatcher
            .execute(code, language, &self.room_id, self.user_id)
            .await
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry.bus().subscribe(&self.room_id, handler)
    }

    pub fn subscribe_draw_ops<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry.bus().subscribe_draw_ops(&self.room_id, handler)
    }

    /// Relay one whiteboard op to the room. Returns the number of
    /// scheduled deliveries.
    pub fn publish_draw_op(&self, op: DrawOp) -> usize {
        self.registry
            .bus()
            .publish_draw_op(&self.room_id, self.user_id, op)
    }

    pub async fn save(&self, code: &str, language: &Language) -> Result<(), CollabError> {
        self.store.save(code, language, &self.room_id).await?;
        Ok(())
    }

    pub async fn load(&self) -> RoomSnapshot {
        self.store.load(&self.room_id).await
    }

    pub async fn snapshot(&self) -> Option<RoomState> {
        self.registry.snapshot(&self.room_id).await
    }

    /// A [`RoomView`] seeded from the room's current state.
    pub async fn view(&self) -> RoomView {
        let snapshot = self.snapshot().await.unwrap_or_else(|| RoomState {
            room_id: self.room_id.clone(),
            code: String::new(),
            language: Language::default(),
            users: Vec::new(),
        });
        RoomView::new(self.user_id, snapshot)
    }

    pub async fn leave(self) {
        self.registry.leave(&self.room_id, self.user_id).await;
    }
}
