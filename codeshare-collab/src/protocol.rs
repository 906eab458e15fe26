//! Room event model and its binary form.
//!
//! Every mutation in a room is announced as an [`Event`]. Events are
//! immutable once published and carry no persisted identity: they are
//! delivered, never stored.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌───────────┬───────────┬────────────────────────────┐
//! │ sender_id │ timestamp │ payload (tagged variant)   │
//! │ 16 bytes  │ varint    │ variable                   │
//! └───────────┴───────────┴────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

use crate::execution::ExecutionResult;

/// Stable per-session user identity.
pub type UserId = Uuid;

// ───────────────────────────────────────────────────────────────────
// Languages
// ───────────────────────────────────────────────────────────────────

/// Language selection of a room.
///
/// Unknown tags are kept verbatim in [`Language::Other`] so that a room
/// can select a language the runners do not know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    JavaScript,
    Python,
    Java,
    Cpp,
    Ruby,
    Go,
    Other(String),
}

impl Language {
    /// Parse a language tag. Matching is case-insensitive.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" => Language::JavaScript,
            "python" | "py" => Language::Python,
            "java" => Language::Java,
            "cpp" | "c++" => Language::Cpp,
            "ruby" | "rb" => Language::Ruby,
            "go" | "golang" => Language::Go,
            _ => Language::Other(tag.trim().to_string()),
        }
    }

    /// Canonical lowercase tag.
    pub fn as_str(&self) -> &str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Go => "go",
            Language::Other(tag) => tag,
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::JavaScript
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Language {
    fn from(tag: String) -> Self {
        Language::from_tag(&tag)
    }
}

impl From<&str> for Language {
    fn from(tag: &str) -> Self {
        Language::from_tag(tag)
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.as_str().to_string()
    }
}

// ───────────────────────────────────────────────────────────────────
// Users
// ───────────────────────────────────────────────────────────────────

/// Activity classification broadcast as part of the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UserStatus {
    #[default]
    Idle,
    Typing,
    Executing,
}

/// Last-known cursor position in the shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

impl CursorPosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A room member as seen in the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub status: UserStatus,
    pub cursor: Option<CursorPosition>,
}

impl User {
    /// New idle user with a fresh identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with explicit id (for testing)
    pub fn with_id(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: UserStatus::Idle,
            cursor: None,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Whiteboard
// ───────────────────────────────────────────────────────────────────

/// Default eraser box half-size, in canvas pixels.
pub const ERASER_SIZE: f32 = 20.0;

/// Eraser strokes are white draw segments.
pub const ERASER_COLOR: &str = "#ffffff";

/// 2D canvas position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One atomic whiteboard instruction, relayed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawOp {
    Draw {
        start: Point,
        end: Point,
        color: String,
    },
    Rectangle {
        origin: Point,
        width: f32,
        height: f32,
        color: String,
    },
    Circle {
        center: Point,
        radius: f32,
        color: String,
    },
    Clear,
}

impl DrawOp {
    /// Pencil segment between two points.
    pub fn stroke(start: Point, end: Point, color: impl Into<String>) -> Self {
        DrawOp::Draw {
            start,
            end,
            color: color.into(),
        }
    }

    /// Rectangle spanned by a drag gesture. Width and height keep their sign.
    pub fn rectangle_from_drag(start: Point, end: Point, color: impl Into<String>) -> Self {
        DrawOp::Rectangle {
            origin: start,
            width: end.x - start.x,
            height: end.y - start.y,
            color: color.into(),
        }
    }

    /// Circle centered at `center` passing through `edge`.
    pub fn circle_from_drag(center: Point, edge: Point, color: impl Into<String>) -> Self {
        DrawOp::Circle {
            center,
            radius: center.distance(&edge),
            color: color.into(),
        }
    }

    /// Eraser dab: a white segment across the eraser box around `at`.
    pub fn erase_at(at: Point, size: f32) -> Self {
        DrawOp::Draw {
            start: Point::new(at.x - size, at.y - size),
            end: Point::new(at.x + size, at.y + size),
            color: ERASER_COLOR.to_string(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────────

/// Event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    CodeChange,
    LanguageChange,
    UserJoin,
    UserLeave,
    CursorMove,
    ExecutionResult,
    WhiteboardDraw,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CodeChange => "code_change",
            EventType::LanguageChange => "language_change",
            EventType::UserJoin => "user_join",
            EventType::UserLeave => "user_leave",
            EventType::CursorMove => "cursor_move",
            EventType::ExecutionResult => "execution_result",
            EventType::WhiteboardDraw => "whiteboard_draw",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads. Snapshot-carrying, never diffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    /// New full buffer contents.
    CodeChange { code: String },
    LanguageChange { language: Language },
    /// Full roster. `user` is the joining user, or `None` when the roster
    /// is rebroadcast for a presence transition.
    UserJoin { user: Option<User>, users: Vec<User> },
    UserLeave { user_id: UserId, users: Vec<User> },
    CursorMove { user_id: UserId, position: CursorPosition },
    ExecutionResult { user_id: UserId, result: ExecutionResult },
    Draw(DrawOp),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::CodeChange { .. } => EventType::CodeChange,
            EventPayload::LanguageChange { .. } => EventType::LanguageChange,
            EventPayload::UserJoin { .. } => EventType::UserJoin,
            EventPayload::UserLeave { .. } => EventType::UserLeave,
            EventPayload::CursorMove { .. } => EventType::CursorMove,
            EventPayload::ExecutionResult { .. } => EventType::ExecutionResult,
            EventPayload::Draw(_) => EventType::WhiteboardDraw,
        }
    }
}

/// A published room event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sender_id: UserId,
    /// Milliseconds since the Unix epoch at publish time.
    pub timestamp: u64,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp a payload with the sender and the current time.
    pub fn new(sender_id: UserId, payload: EventPayload) -> Self {
        Self {
            sender_id,
            timestamp: now_millis(),
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(event)
    }

    /// The draw op carried by a whiteboard event.
    pub fn draw_op(&self) -> Result<&DrawOp, ProtocolError> {
        match &self.payload {
            EventPayload::Draw(op) => Ok(op),
            _ => Err(ProtocolError::InvalidEventType(self.event_type())),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidEventType(EventType),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidEventType(t) => write!(f, "Unexpected event type: {t}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
