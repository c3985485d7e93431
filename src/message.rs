//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ReactionKind};
use crate::error::AppError;
use crate::room::{Member, RoomInfo, RoomSnapshot, RoomSummary};
use crate::session::{Role, SessionInfo};
use crate::types::{MessageId, RoomCode, RoomId, SessionId};

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a username (required before room operations)
    SetUsername { username: String },
    /// Join (or lazily create) a room by id
    JoinRoom {
        room_id: String,
        #[serde(default)]
        room_name: Option<String>,
        #[serde(default)]
        is_private: bool,
    },
    /// Leave the current room
    LeaveRoom,
    /// Send a chat message to the current room
    SendMessage {
        #[serde(default)]
        content: String,
        #[serde(default)]
        image_url: Option<String>,
    },
    /// Toggle a like or dislike
    SetReaction {
        message_id: MessageId,
        kind: ReactionKind,
    },
    /// Add an emoji reaction
    AddReaction { message_id: MessageId, emoji: String },
    /// Create a private room (does not join it)
    CreatePrivateRoom {
        #[serde(default)]
        room_name: Option<String>,
    },
    /// Join a private room by its code
    JoinPrivateRoom { room_code: String },
    /// List private rooms created under the caller's username
    GetMyRooms,
    /// Owner only: grant Admin to a username
    GrantAdmin { username: String },
    /// Owner only: revoke Admin from a username
    RevokeAdmin { username: String },
    /// Indicate typing started
    TypingStart,
    /// Indicate typing stopped
    TypingStop,
    /// Request process-wide counts
    Health,
}

/// Admin action kind reported back to the requester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Grant,
    Revoke,
}

/// Process-wide counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub rooms: usize,
    pub private_rooms: usize,
    pub admins: usize,
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted, session ID issued
    Connected { session_id: SessionId },
    /// Username claimed
    SessionReady { session: SessionInfo },
    /// Joined a room
    RoomJoined {
        room: RoomInfo,
        members: Vec<Member>,
        messages: Vec<ChatMessage>,
    },
    /// Someone else joined the room
    MemberJoined { member: Member },
    /// Someone left the room
    MemberLeft {
        session_id: SessionId,
        display_name: String,
    },
    /// New message in the room
    MessageCreated { message: ChatMessage },
    /// Reactions on a message changed
    MessageUpdated { message: ChatMessage },
    /// A member's role or display name changed
    SessionUpdated {
        session_id: SessionId,
        display_name: String,
        role: Role,
    },
    /// Join failed
    RoomError { code: ErrorCode, message: String },
    /// Outcome of a grant/revoke request
    AdminActionResult {
        action: AdminAction,
        username: String,
        success: bool,
        message: String,
    },
    /// Private room registered
    PrivateRoomCreated {
        room_id: RoomId,
        room_code: RoomCode,
        room_name: String,
    },
    /// Private rooms created by the caller
    MyRoomsList { rooms: Vec<RoomSummary> },
    /// A member is typing
    UserTyping {
        session_id: SessionId,
        display_name: String,
    },
    /// A member stopped typing
    UserStoppedTyping { session_id: SessionId },
    /// Process-wide counts
    Health(HealthReport),
    /// Generic error
    Error { code: ErrorCode, message: String },
}

impl From<RoomSnapshot> for ServerMessage {
    fn from(snapshot: RoomSnapshot) -> Self {
        ServerMessage::RoomJoined {
            room: snapshot.room,
            members: snapshot.members,
            messages: snapshot.messages,
        }
    }
}

/// Error codes for ServerMessage::RoomError and ServerMessage::Error
///
/// Represents different error scenarios that can be communicated to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Attempted action without claiming a username
    UsernameRequired,
    /// Unknown private room code
    RoomNotFound,
    /// Room at capacity
    RoomFull,
    /// Non-owner tried to change privileges
    PermissionDenied,
    /// Owner privilege cannot be changed
    InvalidTarget,
    /// Invalid message format
    InvalidMessage,
}

/// Convert AppError to ServerMessage for client notification
///
/// Admin errors are reported through `admin_action_result` by the server,
/// which knows the action and target; here they fall back to `error`.
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let message = err.to_string();
        match &err {
            AppError::RoomNotFound(_) => ServerMessage::RoomError {
                code: ErrorCode::RoomNotFound,
                message: "Room not found. Check the code.".to_string(),
            },
            AppError::RoomFull(_) => ServerMessage::RoomError {
                code: ErrorCode::RoomFull,
                message,
            },
            AppError::UsernameRequired => ServerMessage::Error {
                code: ErrorCode::UsernameRequired,
                message: "Username is required".to_string(),
            },
            AppError::PermissionDenied => ServerMessage::Error {
                code: ErrorCode::PermissionDenied,
                message,
            },
            AppError::InvalidTarget(_) => ServerMessage::Error {
                code: ErrorCode::InvalidTarget,
                message,
            },
            AppError::Json(e) => ServerMessage::Error {
                code: ErrorCode::InvalidMessage,
                message: format!("Invalid message format: {}", e),
            },
            // Fatal errors are not typically converted (connection closes)
            _ => ServerMessage::Error {
                code: ErrorCode::InvalidMessage,
                message: "Internal error".to_string(),
            },
        }
    }
}
