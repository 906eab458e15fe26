//! Room membership and shared code/language snapshot.
//!
//! ```text
//! join / leave / set_code / set_language / update_cursor
//!       │
//!       ▼
//! RoomTable (rooms: RwLock<HashMap<room_id, Room>>)
//!       │  mutate in place, clone the new roster/value
//!       ▼
//! EventBus::publish  ──►  every subscribed participant (async, unordered)
//! ```
//!
//! Membership changes and presence transitions always rebroadcast the
//! **full roster**. Any participant that receives one roster event has a
//! complete, consistent presence picture. This costs bandwidth linear in
//! room size per transition and is the known scalability limit of the
//! design.
//!
//! Mutations on unknown rooms or users are silent no-ops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::execution::ExecutionResult;
use crate::presence::PresenceTracker;
use crate::protocol::{CursorPosition, EventPayload, Language, User, UserId, UserStatus};
use crate::storage::RoomSnapshot;

/// Live state of one room.
struct Room {
    code: String,
    language: Language,
    users: Vec<User>,
    last_activity: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            code: String::new(),
            language: Language::default(),
            users: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Point-in-time copy of a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub room_id: String,
    pub code: String,
    pub language: Language,
    pub users: Vec<User>,
}

/// Room storage shared by the registry and the presence tracker.
pub(crate) struct RoomTable {
    rooms: RwLock<HashMap<String, Room>>,
    bus: EventBus,
}

impl RoomTable {
    pub(crate) fn new(bus: EventBus) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Set `status` on every roster entry of `user_id` and rebroadcast the
    /// roster. Returns `false` if the room or user is unknown.
    pub(crate) async fn apply_status(
        &self,
        room_id: &str,
        user_id: UserId,
        status: UserStatus,
    ) -> bool {
        let users = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(room_id) else {
                return false;
            };

            let mut found = false;
            for user in room.users.iter_mut().filter(|u| u.id == user_id) {
                user.status = status;
                found = true;
            }
            if !found {
                return false;
            }
            room.touch();
            room.users.clone()
        };

        log::debug!("User {user_id} in room {room_id} is now {status:?}");
        self.bus
            .publish(room_id, user_id, EventPayload::UserJoin { user: None, users });
        true
    }

    pub(crate) async fn user_status(&self, room_id: &str, user_id: UserId) -> Option<UserStatus> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)?
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.status)
    }
}

/// Shortest period between idle-room sweeps.
pub const MIN_REAPER_INTERVAL: Duration = Duration::from_millis(1);

/// Owns room existence, membership and the latest code/language snapshot.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RoomRegistry {
    table: Arc<RoomTable>,
    presence: PresenceTracker,
    bus: EventBus,
}

impl RoomRegistry {
    /// Create a registry publishing on `bus`, reverting typing status after
    /// `typing_revert_delay` without edits.
    pub fn new(bus: EventBus, typing_revert_delay: Duration) -> Self {
        let table = Arc::new(RoomTable::new(bus.clone()));
        let presence = PresenceTracker::new(table.clone(), typing_revert_delay);
        Self {
            table,
            presence,
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Create `room_id` seeded from a stored snapshot.
    ///
    /// Returns `false` and leaves the room untouched if it already exists.
    pub async fn open_room(&self, room_id: &str, snapshot: RoomSnapshot) -> bool {
        let mut rooms = self.table.rooms.write().await;
        if rooms.contains_key(room_id) {
            return false;
        }
        let mut room = Room::new();
        room.code = snapshot.code;
        room.language = snapshot.language;
        rooms.insert(room_id.to_string(), room);
        log::info!("Opened room {room_id}");
        true
    }

    /// Join `room_id` as a new idle user, creating the room if needed.
    ///
    /// No duplicate detection: joining twice under the same name yields two
    /// roster entries with distinct ids (multi-tab presence).
    pub async fn join(&self, room_id: &str, user_name: &str) -> UserId {
        let user = User::new(user_name);
        let user_id = user.id;

        let users = {
            let mut rooms = self.table.rooms.write().await;
            let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
                log::info!("Created room {room_id}");
                Room::new()
            });
            room.users.push(user.clone());
            room.touch();
            room.users.clone()
        };

        log::info!("{user_name} ({user_id}) joined room {room_id}");
        self.bus.publish(
            room_id,
            user_id,
            EventPayload::UserJoin {
                user: Some(user),
                users,
            },
        );
        user_id
    }

    /// Remove every roster entry of `user_id` and rebroadcast the roster.
    pub async fn leave(&self, room_id: &str, user_id: UserId) {
        let users = {
            let mut rooms = self.table.rooms.write().await;
            let Some(room) = rooms.get_mut(room_id) else {
                return;
            };
            let before = room.users.len();
            room.users.retain(|u| u.id != user_id);
            if room.users.len() == before {
                return;
            }
            room.touch();
            room.users.clone()
        };

        self.presence.forget(room_id, user_id).await;
        log::info!("User {user_id} left room {room_id}");
        self.bus
            .publish(room_id, user_id, EventPayload::UserLeave { user_id, users });
    }

    /// Roster in join order; empty for unknown rooms.
    pub async fn get_users(&self, room_id: &str) -> Vec<User> {
        let rooms = self.table.rooms.read().await;
        rooms
            .get(room_id)
            .map(|room| room.users.clone())
            .unwrap_or_default()
    }

    /// Overwrite the room's code, pulse the author's presence to `typing`
    /// and broadcast the new buffer.
    pub async fn set_code(&self, room_id: &str, user_id: UserId, code: impl Into<String>) {
        let code = code.into();
        {
            let mut rooms = self.table.rooms.write().await;
            let Some(room) = rooms.get_mut(room_id) else {
                log::debug!("Ignoring code change for unknown room {room_id}");
                return;
            };
            room.code = code.clone();
            room.touch();
        }

        self.presence.pulse_typing(room_id, user_id).await;
        self.bus
            .publish(room_id, user_id, EventPayload::CodeChange { code });
    }

    /// Overwrite the room's language and broadcast it.
    pub async fn set_language(&self, room_id: &str, user_id: UserId, language: Language) {
        {
            let mut rooms = self.table.rooms.write().await;
            let Some(room) = rooms.get_mut(room_id) else {
                log::debug!("Ignoring language change for unknown room {room_id}");
                return;
            };
            room.language = language.clone();
            room.touch();
        }

        self.bus
            .publish(room_id, user_id, EventPayload::LanguageChange { language });
    }

    /// Record the user's cursor and broadcast the move.
    pub async fn update_cursor(&self, room_id: &str, user_id: UserId, position: CursorPosition) {
        {
            let mut rooms = self.table.rooms.write().await;
            let Some(room) = rooms.get_mut(room_id) else {
                return;
            };
            let mut found = false;
            for user in room.users.iter_mut().filter(|u| u.id == user_id) {
                user.cursor = Some(position);
                found = true;
            }
            if !found {
                return;
            }
            room.touch();
        }

        self.bus
            .publish(room_id, user_id, EventPayload::CursorMove { user_id, position });
    }

    /// Broadcast the outcome of a run to the whole room.
    pub(crate) fn publish_execution_result(
        &self,
        room_id: &str,
        user_id: UserId,
        result: &ExecutionResult,
    ) {
        self.bus.publish(
            room_id,
            user_id,
            EventPayload::ExecutionResult {
                user_id,
                result: result.clone(),
            },
        );
    }

    /// Current status of a user, if present in the room.
    pub async fn user_status(&self, room_id: &str, user_id: UserId) -> Option<UserStatus> {
        self.table.user_status(room_id, user_id).await
    }

    /// Copy of the room's code, language and roster.
    pub async fn snapshot(&self, room_id: &str) -> Option<RoomState> {
        let rooms = self.table.rooms.read().await;
        rooms.get(room_id).map(|room| RoomState {
            room_id: room_id.to_string(),
            code: room.code.clone(),
            language: room.language.clone(),
            users: room.users.clone(),
        })
    }

    pub async fn has_room(&self, room_id: &str) -> bool {
        self.table.rooms.read().await.contains_key(room_id)
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.table.rooms.read().await.len()
    }

    /// Remove empty rooms whose last activity is older than `ttl`.
    ///
    /// Rooms with at least one member are never evicted.
    pub async fn evict_idle(&self, ttl: Duration) -> Vec<String> {
        let mut rooms = self.table.rooms.write().await;
        let now = Instant::now();
        let mut evicted = Vec::new();
        rooms.retain(|room_id, room| {
            let stale = room.users.is_empty() && now.duration_since(room.last_activity) > ttl;
            if stale {
                log::info!("Evicting idle room {room_id}");
                evicted.push(room_id.clone());
            }
            !stale
        });
        evicted
    }

    /// Hold the room table exclusively for `duration`.
    #[cfg(test)]
    pub(crate) async fn hold_rooms(&self, duration: Duration) {
        let _rooms = self.table.rooms.write().await;
        tokio::time::sleep(duration).await;
    }

    /// Run [`RoomRegistry::evict_idle`] every `interval` until the handle is
    /// aborted.
    ///
    /// A zero `interval` is raised to [`MIN_REAPER_INTERVAL`].
    pub fn spawn_reaper(&self, interval: Duration, ttl: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        let interval = interval.max(MIN_REAPER_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.evict_idle(ttl).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Event;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(EventBus::new(Duration::ZERO), Duration::from_millis(50))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_join_creates_room_and_returns_idle_user() {
        let registry = registry();
        assert!(!registry.has_room("r1").await);

        let alice = registry.join("r1", "Alice").await;
        assert!(registry.has_room("r1").await);

        let users = registry.get_users("r1").await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, alice);
        assert_eq!(users[0].status, UserStatus::Idle);
    }

    #[tokio::test]
    async fn test_join_twice_keeps_both_entries() {
        let registry = registry();
        let first = registry.join("r1", "Alice").await;
        let second = registry.join("r1", "Alice").await;
        assert_ne!(first, second);
        assert_eq!(registry.get_users("r1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_roster_preserves_join_order() {
        let registry = registry();
        registry.join("r1", "Alice").await;
        registry.join("r1", "Bob").await;
        registry.join("r1", "Carol").await;

        let names: Vec<String> = registry
            .get_users("r1")
            .await
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
    }

    #[tokio::test]
    async fn test_join_broadcasts_full_roster() {
        let registry = registry();
        registry.join("r1", "Alice").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = registry.bus().subscribe("r1", move |e| {
            let _ = tx.send(e.clone());
        });

        let bob = registry.join("r1", "Bob").await;
        let event = next_event(&mut rx).await;
        assert_eq!(event.sender_id, bob);
        match event.payload {
            EventPayload::UserJoin { user: Some(user), users } => {
                assert_eq!(user.id, bob);
                assert_eq!(users.len(), 2);
            }
            other => panic!("Expected UserJoin, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_leave_broadcasts_updated_roster() {
        let registry = registry();
        let alice = registry.join("r1", "Alice").await;
        let bob = registry.join("r1", "Bob").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = registry.bus().subscribe("r1", move |e| {
            let _ = tx.send(e.clone());
        });

        registry.leave("r1", alice).await;
        match next_event(&mut rx).await.payload {
            EventPayload::UserLeave { user_id, users } => {
                assert_eq!(user_id, alice);
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].id, bob);
            }
            other => panic!("Expected UserLeave, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_leave_unknown_is_noop() {
        let registry = registry();
        registry.leave("nowhere", UserId::new_v4()).await;
        assert!(!registry.has_room("nowhere").await);

        registry.join("r1", "Alice").await;
        let published = registry.bus().stats().published;
        registry.leave("r1", UserId::new_v4()).await;
        assert_eq!(registry.get_users("r1").await.len(), 1);
        assert_eq!(registry.bus().stats().published, published);
    }

    #[tokio::test]
    async fn test_get_users_unknown_room_is_empty() {
        assert!(registry().get_users("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_set_code_and_language_overwrite_snapshot() {
        let registry = registry();
        let alice = registry.join("r1", "Alice").await;

        registry.set_code("r1", alice, "print('hi')").await;
        registry.set_language("r1", alice, Language::Python).await;

        let state = registry.snapshot("r1").await.unwrap();
        assert_eq!(state.code, "print('hi')");
        assert_eq!(state.language, Language::Python);
    }

    #[tokio::test]
    async fn test_set_code_broadcasts_value_not_diff() {
        let registry = registry();
        let alice = registry.join("r1", "Alice").await;
        registry.set_code("r1", alice, "let a = 1;").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = registry.bus().subscribe("r1", move |e| {
            let _ = tx.send(e.clone());
        });
        registry.set_code("r1", alice, "let a = 2;").await;

        // Roster (typing) and code change arrive in any order.
        let mut saw_code = false;
        for _ in 0..2 {
            if let EventPayload::CodeChange { code } = next_event(&mut rx).await.payload {
                assert_eq!(code, "let a = 2;");
                saw_code = true;
            }
        }
        assert!(saw_code);
    }

    #[tokio::test]
    async fn test_set_code_unknown_room_is_noop() {
        let registry = registry();
        registry.set_code("ghost", UserId::new_v4(), "x").await;
        assert!(registry.snapshot("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_update_cursor() {
        let registry = registry();
        let alice = registry.join("r1", "Alice").await;
        registry
            .update_cursor("r1", alice, CursorPosition::new(3, 7))
            .await;

        let users = registry.get_users("r1").await;
        assert_eq!(users[0].cursor, Some(CursorPosition::new(3, 7)));

        // Unknown user: no-op.
        registry
            .update_cursor("r1", UserId::new_v4(), CursorPosition::new(1, 1))
            .await;
        assert_eq!(registry.get_users("r1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_open_room_seeds_snapshot_once() {
        let registry = registry();
        let seeded = RoomSnapshot::new("puts 1", Language::Ruby);
        assert!(registry.open_room("r1", seeded).await);
        assert!(!registry.open_room("r1", RoomSnapshot::new("x", Language::Go)).await);

        registry.join("r1", "Alice").await;
        let state = registry.snapshot("r1").await.unwrap();
        assert_eq!(state.code, "puts 1");
        assert_eq!(state.language, Language::Ruby);
        assert_eq!(state.users.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_idle_only_removes_empty_rooms() {
        let registry = registry();
        let alice = registry.join("busy", "Alice").await;
        let bob = registry.join("empty", "Bob").await;
        registry.leave("empty", bob).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let evicted = registry.evict_idle(Duration::from_millis(10)).await;

        assert_eq!(evicted, vec!["empty".to_string()]);
        assert!(registry.has_room("busy").await);
        assert!(!registry.has_room("empty").await);
        assert_eq!(registry.get_users("busy").await[0].id, alice);
    }

    #[tokio::test]
    async fn test_evict_idle_respects_ttl() {
        let registry = registry();
        let bob = registry.join("r1", "Bob").await;
        registry.leave("r1", bob).await;

        assert!(registry.evict_idle(Duration::from_secs(60)).await.is_empty());
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_reaper_evicts_in_background() {
        let registry = registry();
        let bob = registry.join("r1", "Bob").await;
        registry.leave("r1", bob).await;

        let reaper = registry.spawn_reaper(Duration::from_millis(10), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        reaper.abort();

        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_reaper_with_zero_ttl_keeps_running() {
        let registry = registry();
        let bob = registry.join("r1", "Bob").await;
        registry.leave("r1", bob).await;

        let reaper = registry.spawn_reaper(Duration::ZERO, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.room_count().await, 0);

        // Later rooms are swept by the same task.
        let carol = registry.join("r2", "Carol").await;
        registry.leave("r2", carol).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!reaper.is_finished());
        reaper.abort();

        assert_eq!(registry.room_count().await, 0);
    }
}
