//! Room state and the room store
//!
//! A room holds an ordered member list, its message log and, for private
//! rooms, a code binding. The store keeps the `code -> room` index in step
//! with the room map.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chat::{ChatMessage, MessageLog};
use crate::error::AppError;
use crate::session::Role;
use crate::types::{RoomCode, RoomId, SessionId};

/// Member summary kept in a room's member list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub session_id: SessionId,
    pub display_name: String,
    pub role: Role,
    pub is_creator: bool,
}

/// Room metadata sent with a join snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub is_private: bool,
    pub code: Option<RoomCode>,
    pub member_count: usize,
    pub max_members: Option<usize>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Everything a joiner is briefed with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSnapshot {
    pub room: RoomInfo,
    pub members: Vec<Member>,
    pub messages: Vec<ChatMessage>,
}

/// Private room listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub code: RoomCode,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A chat room
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub is_private: bool,
    pub code: Option<RoomCode>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// `None` means unbounded
    pub max_members: Option<usize>,
    pub log: MessageLog,
    /// Generation of the pending expiry, if one is armed
    pub pending_expiry: Option<u64>,
    members: Vec<Member>,
}

impl Room {
    /// Create an empty room
    pub fn new(
        id: RoomId,
        name: String,
        code: Option<RoomCode>,
        created_by: String,
        max_members: Option<usize>,
    ) -> Self {
        Self {
            id,
            name,
            is_private: code.is_some(),
            code,
            created_by,
            created_at: Utc::now(),
            max_members,
            log: MessageLog::default(),
            pending_expiry: None,
            members: Vec::new(),
        }
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.members.iter().any(|m| m.session_id == session_id)
    }

    pub fn is_full(&self) -> bool {
        self.max_members
            .is_some_and(|max| self.members.len() >= max)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_mut(&mut self, session_id: SessionId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.session_id == session_id)
    }

    /// Append a member
    ///
    /// Fails with `RoomFull` at capacity. Adding a session that is already a
    /// member leaves the list unchanged.
    pub fn add_member(&mut self, member: Member) -> Result<(), AppError> {
        if self.contains(member.session_id) {
            return Ok(());
        }
        if let Some(max) = self.max_members.filter(|max| self.members.len() >= *max) {
            return Err(AppError::RoomFull(max));
        }
        self.members.push(member);
        Ok(())
    }

    /// Remove a member, returning its summary if it was present
    pub fn remove_member(&mut self, session_id: SessionId) -> Option<Member> {
        let index = self.members.iter().position(|m| m.session_id == session_id)?;
        Some(self.members.remove(index))
    }

    /// Current member ids
    pub fn member_ids(&self) -> Vec<SessionId> {
        self.members.iter().map(|m| m.session_id).collect()
    }

    /// Current member ids other than `session_id`
    pub fn member_ids_except(&self, session_id: SessionId) -> Vec<SessionId> {
        self.members
            .iter()
            .map(|m| m.session_id)
            .filter(|id| *id != session_id)
            .collect()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            is_private: self.is_private,
            code: self.code.clone(),
            member_count: self.members.len(),
            max_members: self.max_members,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
        }
    }

    pub fn snapshot(&self, history_window: usize) -> RoomSnapshot {
        RoomSnapshot {
            room: self.info(),
            members: self.members.clone(),
            messages: self.log.recent(history_window).to_vec(),
        }
    }
}

/// All active rooms plus the private-room code index
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,
    codes: HashMap<RoomCode, RoomId>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a code not bound to any active private room
    ///
    /// Also skips codes whose `private_<CODE>` id is already taken by a room
    /// a client created through a plain join.
    pub fn allocate_code(&self) -> RoomCode {
        loop {
            let code = RoomCode::generate();
            if !self.code_in_use(&code) && !self.rooms.contains_key(&RoomId::private(&code)) {
                break code;
            }
        }
    }

    /// Register a room and bind its code
    pub fn insert(&mut self, room: Room) {
        debug_assert!(room.is_empty(), "rooms are registered empty");
        if let Some(code) = &room.code {
            self.codes.insert(code.clone(), room.id.clone());
        }
        self.rooms.insert(room.id.clone(), room);
    }

    /// Delete a room and release its code
    pub fn remove(&mut self, id: &RoomId) -> Option<Room> {
        let room = self.rooms.remove(id)?;
        if let Some(code) = &room.code {
            self.codes.remove(code);
        }
        Some(room)
    }

    pub fn get(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn get_mut(&mut self, id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    pub fn contains(&self, id: &RoomId) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn code_in_use(&self, code: &RoomCode) -> bool {
        self.codes.contains_key(code)
    }

    /// Case-insensitive code lookup
    pub fn resolve_code(&self, code: &str) -> Option<&RoomId> {
        self.codes.get(&RoomCode::from_string(code))
    }

    /// Private rooms created by `username`, oldest first
    pub fn created_by(&self, username: &str) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .values()
            .filter(|room| room.created_by == username)
            .filter_map(|room| {
                room.code.as_ref().map(|code| RoomSummary {
                    id: room.id.clone(),
                    name: room.name.clone(),
                    code: code.clone(),
                    member_count: room.member_count(),
                    created_at: room.created_at,
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.code.cmp(&b.code)));
        summaries
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn private_count(&self) -> usize {
        self.codes.len()
    }
}
