//! Basic type definitions for the relay
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: UUID-based unique connection identifier
//! - `RoomId`: room identity (`"public"` or `"private_<CODE>"`)
//! - `RoomCode`: 6-character `[A-Z0-9]` private room code
//! - `MessageId`: per-engine monotonically increasing message id

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alphabet used for private room codes
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a private room code
pub const CODE_LENGTH: usize = 6;

/// Room id of the single public room
pub const PUBLIC_ROOM: &str = "public";

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4 assigned by the transport layer when a socket connects.
/// Ordered so reaction sets serialize deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// The public room
    pub fn public() -> Self {
        Self(PUBLIC_ROOM.to_string())
    }

    /// Id of the private room bound to `code`
    pub fn private(code: &RoomCode) -> Self {
        Self(format!("private_{}", code))
    }

    pub fn is_public(&self) -> bool {
        self.0 == PUBLIC_ROOM
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room code (6-character uppercase alphanumeric)
///
/// Binds a private room to something a user can type.
/// Generated randomly or parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(pub String);

impl RoomCode {
    /// Generate a new random 6-character room code
    ///
    /// Each character is drawn uniformly from `[A-Z0-9]`.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Create a RoomCode from user input (trimmed, converted to uppercase)
    pub fn from_string(code: &str) -> Self {
        Self(code.trim().to_uppercase())
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identifier, unique within one engine instance
pub type MessageId = u64;
