//! Room snapshot persistence.
//!
//! ```text
//! ┌─────────────┐  save / load   ┌───────────────────┐
//! │  CodeStore  │ ─────────────► │ dyn SnapshotStore │
//! │ (templates, │                └────────┬──────────┘
//! │  latency)   │                         │
//! └─────────────┘            ┌────────────┴────────────┐
//!                            ▼                         ▼
//!                     ┌─────────────┐          ┌──────────────┐
//!                     │ MemoryStore │          │  RocksStore  │
//!                     │ (default)   │          │ CF "rooms"   │
//!                     └─────────────┘          │ CF "metadata"│
//!                                              └──────────────┘
//! ```
//!
//! Only the latest `{code, language}` per room is kept. There is no
//! history or versioning of snapshots.

pub mod memory;
pub mod rocks;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::Language;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, RoomMetadata, StoreConfig};

/// Persisted state of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub language: Language,
}

impl RoomSnapshot {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
        }
    }

    /// The greeting template for `language`.
    pub fn template(language: &Language) -> Self {
        Self::new(templates::default_template(language), language.clone())
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (snapshot, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(snapshot)
    }
}

/// Key-value backend keyed by room id.
pub trait SnapshotStore: Send + Sync {
    fn put(&self, room_id: &str, snapshot: &RoomSnapshot) -> Result<(), StoreError>;
    fn get(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Save/load front end over a [`SnapshotStore`].
///
/// `load` never fails: a missing or unreadable snapshot yields the
/// greeting template.
#[derive(Clone)]
pub struct CodeStore {
    backend: Arc<dyn SnapshotStore>,
    save_latency: Duration,
}

impl CodeStore {
    pub fn new(backend: Arc<dyn SnapshotStore>, save_latency: Duration) -> Self {
        Self {
            backend,
            save_latency,
        }
    }

    /// Process-local store with no simulated latency.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Duration::ZERO)
    }

    /// Persist the latest code and language of `room_id`.
    ///
    /// The backend call runs on the blocking pool.
    pub async fn save(
        &self,
        code: &str,
        language: &Language,
        room_id: &str,
    ) -> Result<(), StoreError> {
        log::debug!("Saving room {room_id} ({language}, {} bytes)", code.len());
        if !self.save_latency.is_zero() {
            tokio::time::sleep(self.save_latency).await;
        }

        let backend = self.backend.clone();
        let key = room_id.to_string();
        let snapshot = RoomSnapshot::new(code, language.clone());
        let saved = tokio::task::spawn_blocking(move || backend.put(&key, &snapshot))
            .await
            .unwrap_or_else(|e| Err(StoreError::DatabaseError(e.to_string())));
        saved.inspect_err(|e| {
            log::error!("Failed to save room {room_id}: {e}");
        })
    }

    /// Saved snapshot, or the JavaScript greeting template.
    pub async fn load(&self, room_id: &str) -> RoomSnapshot {
        self.load_for(room_id, &Language::default()).await
    }

    /// Saved snapshot, or the greeting template for `fallback`.
    pub async fn load_for(&self, room_id: &str, fallback: &Language) -> RoomSnapshot {
        let backend = self.backend.clone();
        let key = room_id.to_string();
        let loaded = tokio::task::spawn_blocking(move || backend.get(&key))
            .await
            .unwrap_or_else(|e| Err(StoreError::DatabaseError(e.to_string())));
        match loaded {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => RoomSnapshot::template(fallback),
            Err(e) => {
                log::warn!("Failed to load room {room_id}, using template: {e}");
                RoomSnapshot::template(fallback)
            }
        }
    }
}
