//! Message log and reactions
//!
//! Messages are append-only. After creation only the reaction sets change:
//! likes and dislikes toggle and exclude each other, emoji reactions only
//! accumulate.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Role;
use crate::types::{MessageId, SessionId};

/// Like or dislike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    pub fn opposite(self) -> Self {
        match self {
            ReactionKind::Like => ReactionKind::Dislike,
            ReactionKind::Dislike => ReactionKind::Like,
        }
    }
}

/// Author fields frozen into a message at send time
#[derive(Debug, Clone)]
pub struct Author {
    pub id: SessionId,
    pub name: String,
    pub role: Role,
    pub is_creator: bool,
}

/// A chat message with its reaction state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author_id: SessionId,
    pub author_name: String,
    pub author_role: Role,
    pub is_creator: bool,
    pub content: String,
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub likes: BTreeSet<SessionId>,
    pub dislikes: BTreeSet<SessionId>,
    pub reactions: BTreeMap<String, BTreeSet<SessionId>>,
}

impl ChatMessage {
    pub fn new(id: MessageId, author: Author, content: String, image_url: Option<String>) -> Self {
        Self {
            id,
            author_id: author.id,
            author_name: author.name,
            author_role: author.role,
            is_creator: author.is_creator,
            content,
            image_url,
            timestamp: Utc::now(),
            likes: BTreeSet::new(),
            dislikes: BTreeSet::new(),
            reactions: BTreeMap::new(),
        }
    }

    fn set_for(&mut self, kind: ReactionKind) -> &mut BTreeSet<SessionId> {
        match kind {
            ReactionKind::Like => &mut self.likes,
            ReactionKind::Dislike => &mut self.dislikes,
        }
    }

    /// Toggle `kind` for `session`
    ///
    /// Removes the reaction if present; otherwise records it and drops the
    /// opposite kind so a session is never in both sets.
    pub fn toggle(&mut self, session: SessionId, kind: ReactionKind) {
        if self.set_for(kind).remove(&session) {
            return;
        }
        self.set_for(kind).insert(session);
        self.set_for(kind.opposite()).remove(&session);
    }

    /// Current like/dislike of `session`, if any
    pub fn reaction_of(&self, session: SessionId) -> Option<ReactionKind> {
        if self.likes.contains(&session) {
            Some(ReactionKind::Like)
        } else if self.dislikes.contains(&session) {
            Some(ReactionKind::Dislike)
        } else {
            None
        }
    }

    /// Add an emoji reaction. Returns false if it was already recorded.
    pub fn add_emoji(&mut self, session: SessionId, emoji: &str) -> bool {
        self.reactions
            .entry(emoji.to_string())
            .or_default()
            .insert(session)
    }
}

/// Truncate to `max_len` characters, then trim surrounding whitespace
pub fn sanitize_content(content: &str, max_len: usize) -> String {
    let truncated: String = content.chars().take(max_len).collect();
    truncated.trim().to_string()
}

/// Ordered message storage for one room
///
/// Grows without eviction; only `recent` is ever sent to joiners.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// The last `window` messages, oldest first
    pub fn recent(&self, window: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    pub fn find_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
