//! Session registry
//!
//! Tracks identity-claimed connections: username, role, display name and
//! the room the session currently sits in. Roles come from a capability
//! list: one configured Owner plus a mutable set of Admin usernames.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{RoomId, SessionId};

/// Privilege level of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Admin,
    Owner,
}

/// Owner identity and the Admin set
#[derive(Debug, Clone)]
pub struct Privileges {
    owner: String,
    owner_label: String,
    admins: BTreeSet<String>,
}

impl Privileges {
    /// Create the capability list; the owner is never stored as an admin
    pub fn new(owner: String, owner_label: String, seed_admins: &[String]) -> Self {
        let admins = seed_admins
            .iter()
            .filter(|name| **name != owner)
            .cloned()
            .collect();
        Self {
            owner,
            owner_label,
            admins,
        }
    }

    pub fn is_owner(&self, username: &str) -> bool {
        self.owner == username
    }

    pub fn role_of(&self, username: &str) -> Role {
        if self.is_owner(username) {
            Role::Owner
        } else if self.admins.contains(username) {
            Role::Admin
        } else {
            Role::Guest
        }
    }

    /// Decorated name for privileged roles, raw username for guests
    pub fn display_name(&self, username: &str, role: Role) -> String {
        match role {
            Role::Owner => self.owner_label.clone(),
            Role::Admin => format!("Admin - {}", username),
            Role::Guest => username.to_string(),
        }
    }

    /// Returns true if the set changed
    pub fn grant(&mut self, username: &str) -> bool {
        self.admins.insert(username.to_string())
    }

    /// Returns true if the set changed
    pub fn revoke(&mut self, username: &str) -> bool {
        self.admins.remove(username)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.contains(username)
    }

    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }
}

/// State of one identity-claimed connection
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub current_room: Option<RoomId>,
    pub is_typing: bool,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Wire view of this session
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            current_room: self.current_room.clone(),
            joined_at: self.joined_at,
        }
    }
}

/// Session data sent to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub current_room: Option<RoomId>,
    pub joined_at: DateTime<Utc>,
}

/// All live sessions plus the privilege list used to classify them
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    privileges: Privileges,
}

impl SessionRegistry {
    pub fn new(privileges: Privileges) -> Self {
        Self {
            sessions: HashMap::new(),
            privileges,
        }
    }

    /// Store a session for `id`, replacing any previous record
    ///
    /// Usernames are not unique; two sessions may claim the same name.
    pub fn register(&mut self, id: SessionId, username: String) -> &Session {
        let role = self.privileges.role_of(&username);
        let display_name = self.privileges.display_name(&username, role);
        let now = Utc::now();
        let session = Session {
            id,
            username,
            display_name,
            role,
            current_room: None,
            is_typing: false,
            joined_at: now,
            last_active_at: now,
        };
        self.sessions.insert(id, session);
        &self.sessions[&id]
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Live sessions that claimed `username`
    pub fn ids_for_username(&self, username: &str) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.username == username)
            .map(|s| s.id)
            .collect();
        ids.sort();
        ids
    }

    /// Recompute role and display name after a privilege change
    pub fn refresh_role(&mut self, id: SessionId) -> Option<&Session> {
        let session = self.sessions.get_mut(&id)?;
        session.role = self.privileges.role_of(&session.username);
        session.display_name = self.privileges.display_name(&session.username, session.role);
        Some(session)
    }

    pub fn privileges(&self) -> &Privileges {
        &self.privileges
    }

    pub fn privileges_mut(&mut self) -> &mut Privileges {
        &mut self.privileges
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
