//! Presence state machine: `idle` / `typing` / `executing` per (room, user).
//!
//! ## Transitions
//!
//! ```text
//!            set_code                      revert delay elapsed
//!   idle ────────────────► typing ─────────────────────────────► idle
//!     ▲                    │  ▲ set_code: cancel pending revert,
//!     │                    │  └─ re-arm (last edit wins)
//!     │   run complete     ▼
//!     └──────────────── executing ◄──── dispatcher start (any state)
//! ```
//!
//! Every transition rebroadcasts the full roster; status is a field on
//! [`crate::protocol::User`], never a separate delta event.
//!
//! Lock order is `timers` → room table → bus. Timer tasks take the same
//! order, so a revert can never interleave between a new edit's cancel and
//! its status write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::protocol::{UserId, UserStatus};
use crate::room::RoomTable;

type PresenceKey = (String, UserId);

/// A scheduled typing → idle revert.
struct PendingRevert {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Drives presence transitions and owns the revert timers.
///
/// Cheap to clone; clones share timers.
#[derive(Clone)]
pub struct PresenceTracker {
    table: Arc<RoomTable>,
    revert_delay: Duration,
    timers: Arc<Mutex<HashMap<PresenceKey, PendingRevert>>>,
    generation: Arc<AtomicU64>,
}

impl PresenceTracker {
    pub(crate) fn new(table: Arc<RoomTable>, revert_delay: Duration) -> Self {
        Self {
            table,
            revert_delay,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Edit pulse: set `typing` and (re-)arm the revert timer.
    ///
    /// A pending revert from an earlier edit is canceled first.
    pub async fn pulse_typing(&self, room_id: &str, user_id: UserId) {
        let key = (room_id.to_string(), user_id);
        let mut timers = self.timers.lock().await;

        if let Some(previous) = timers.remove(&key) {
            previous.handle.abort();
        }
        if !self.table.apply_status(room_id, user_id, UserStatus::Typing).await {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let tracker = self.clone();
        let room = room_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(tracker.revert_delay).await;
            tracker.fire_revert(room, user_id, generation).await;
        });
        timers.insert(key, PendingRevert { generation, handle });
    }

    /// Execution start: cancel any typing revert and set `executing`.
    pub async fn begin_execution(&self, room_id: &str, user_id: UserId) {
        let mut timers = self.timers.lock().await;
        Self::cancel(&mut timers, room_id, user_id);
        self.table
            .apply_status(room_id, user_id, UserStatus::Executing)
            .await;
    }

    /// Execution end: back to `idle` unconditionally.
    pub async fn end_execution(&self, room_id: &str, user_id: UserId) {
        let mut timers = self.timers.lock().await;
        Self::cancel(&mut timers, room_id, user_id);
        self.table
            .apply_status(room_id, user_id, UserStatus::Idle)
            .await;
    }

    /// Drop any pending revert for a user leaving the room.
    pub(crate) async fn forget(&self, room_id: &str, user_id: UserId) {
        let mut timers = self.timers.lock().await;
        Self::cancel(&mut timers, room_id, user_id);
    }

    /// Current status, if the user is in the room.
    pub async fn status(&self, room_id: &str, user_id: UserId) -> Option<UserStatus> {
        self.table.user_status(room_id, user_id).await
    }

    /// Number of armed revert timers.
    pub async fn pending_reverts(&self) -> usize {
        self.timers.lock().await.len()
    }

    pub fn revert_delay(&self) -> Duration {
        self.revert_delay
    }

    async fn fire_revert(&self, room_id: String, user_id: UserId, generation: u64) {
        let key = (room_id, user_id);
        let mut timers = self.timers.lock().await;
        match timers.get(&key) {
            Some(pending) if pending.generation == generation => {
                timers.remove(&key);
            }
            // Superseded by a later edit or an execution pulse.
            _ => return,
        }
        self.table
            .apply_status(&key.0, user_id, UserStatus::Idle)
            .await;
    }

    fn cancel(timers: &mut HashMap<PresenceKey, PendingRevert>, room_id: &str, user_id: UserId) {
        if let Some(pending) = timers.remove(&(room_id.to_string(), user_id)) {
            pending.handle.abort();
        }
    }
}
