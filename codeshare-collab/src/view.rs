//! Participant-side room state.
//!
//! The bus delivers every event to every subscriber, including the
//! sender. A [`RoomView`] drops its own events (echo suppression) and folds
//! the rest into a local picture of the room. Local edits are applied
//! synchronously, before they are published.

use std::collections::HashMap;

use crate::execution::ExecutionResult;
use crate::protocol::{CursorPosition, Event, EventPayload, Language, User, UserId};
use crate::room::RoomState;

/// Local picture of one room from one participant's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    local_user: UserId,
    code: String,
    language: Language,
    users: Vec<User>,
    cursors: HashMap<UserId, CursorPosition>,
    last_execution: Option<(UserId, ExecutionResult)>,
}

impl RoomView {
    /// Seed a view from a registry snapshot.
    pub fn new(local_user: UserId, snapshot: RoomState) -> Self {
        Self {
            local_user,
            code: snapshot.code,
            language: snapshot.language,
            users: snapshot.users,
            cursors: HashMap::new(),
            last_execution: None,
        }
    }

    /// Fold a delivered event into the view.
    ///
    /// Returns `false` if the event was the local user's own echo.
    pub fn apply(&mut self, event: &Event) -> bool {
        if event.sender_id == self.local_user {
            return false;
        }

        match &event.payload {
            EventPayload::CodeChange { code } => self.code = code.clone(),
            EventPayload::LanguageChange { language } => self.language = language.clone(),
            EventPayload::UserJoin { users, .. } | EventPayload::UserLeave { users, .. } => {
                self.users = users.clone();
                self.cursors
                    .retain(|id, _| users.iter().any(|u| u.id == *id));
            }
            EventPayload::CursorMove { user_id, position } => {
                self.cursors.insert(*user_id, *position);
            }
            EventPayload::ExecutionResult { user_id, result } => {
                self.last_execution = Some((*user_id, result.clone()));
            }
            // Whiteboard ops are rendered by the consumer, not kept here.
            EventPayload::Draw(_) => {}
        }
        true
    }

    pub fn set_local_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
    }

    pub fn set_local_language(&mut self, language: Language) {
        self.language = language;
    }

    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Last known cursor of a remote user.
    pub fn cursor(&self, user_id: UserId) -> Option<CursorPosition> {
        self.cursors.get(&user_id).copied()
    }

    /// Most recent run by a remote user, with its author.
    pub fn last_execution(&self) -> Option<&(UserId, ExecutionResult)> {
        self.last_execution.as_ref()
    }
}
