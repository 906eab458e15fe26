//! Process-local snapshot store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{RoomSnapshot, SnapshotStore, StoreError};

/// In-memory [`SnapshotStore`]. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, RoomSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, room_id: &str) -> Option<RoomSnapshot> {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room_id)
    }
}

impl SnapshotStore for MemoryStore {
    fn put(&self, room_id: &str, snapshot: &RoomSnapshot) -> Result<(), StoreError> {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn get(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError> {
        Ok(self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .cloned())
    }
}
