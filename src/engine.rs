//! Session and room coordination engine
//!
//! Owns the session registry and the room store and implements every
//! state-changing operation. The engine performs no I/O: each operation
//! records [`Effect`]s (deliveries with recipients resolved from the
//! membership at that moment, and expiry timer instructions) which the
//! caller drains with [`Engine::take_effects`].

use std::time::Duration;

use tracing::{debug, info};

use crate::chat::{sanitize_content, Author, ChatMessage, ReactionKind};
use crate::config::EngineConfig;
use crate::error::AppError;
use crate::message::{AdminAction, HealthReport, ServerMessage};
use crate::room::{Member, Room, RoomSnapshot, RoomStore, RoomSummary};
use crate::session::{Privileges, Role, Session, SessionInfo, SessionRegistry};
use crate::types::{MessageId, RoomCode, RoomId, SessionId};

/// Something the engine needs done outside itself
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send `message` to each recipient
    Deliver {
        recipients: Vec<SessionId>,
        message: ServerMessage,
    },
    /// Call [`Engine::expire_room`] with `generation` after `delay`
    ArmExpiry {
        room_id: RoomId,
        generation: u64,
        delay: Duration,
    },
    /// Drop the pending expiry for `room_id`
    CancelExpiry { room_id: RoomId },
}

/// The coordination engine
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    sessions: SessionRegistry,
    rooms: RoomStore,
    next_message_id: MessageId,
    next_expiry_generation: u64,
    effects: Vec<Effect>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let privileges = Privileges::new(
            config.owner.clone(),
            config.owner_label.clone(),
            &config.seed_admins,
        );
        Self {
            config,
            sessions: SessionRegistry::new(privileges),
            rooms: RoomStore::new(),
            next_message_id: 0,
            next_expiry_generation: 0,
            effects: Vec::new(),
        }
    }

    /// Drain the effects recorded since the last call
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    // ========== SESSIONS ==========

    /// Claim a username for `id`
    ///
    /// Always succeeds. A session that re-claims while in a room leaves the
    /// room first so its member summary never goes stale.
    pub fn register_session(&mut self, id: SessionId, username: String) -> SessionInfo {
        if self.sessions.get(id).is_some_and(|s| s.current_room.is_some()) {
            self.leave_room(id);
        }

        let info = self.sessions.register(id, username).info();
        info!(
            "Session {} claimed '{}' as '{}' ({:?})",
            id, info.username, info.display_name, info.role
        );
        self.unicast(id, ServerMessage::SessionReady {
            session: info.clone(),
        });
        info
    }

    /// Drop a session, leaving its room first. Unknown ids are ignored.
    pub fn remove_session(&mut self, id: SessionId) {
        self.leave_room(id);
        if let Some(session) = self.sessions.remove(id) {
            info!("Session {} ('{}') removed", id, session.display_name);
        }
        debug!(
            "Total sessions: {}, Total rooms: {}",
            self.sessions.len(),
            self.rooms.len()
        );
    }

    pub fn grant_admin(&mut self, requester: SessionId, target: &str) -> Result<(), AppError> {
        self.change_admin(requester, target, AdminAction::Grant)
    }

    pub fn revoke_admin(&mut self, requester: SessionId, target: &str) -> Result<(), AppError> {
        self.change_admin(requester, target, AdminAction::Revoke)
    }

    fn change_admin(
        &mut self,
        requester: SessionId,
        target: &str,
        action: AdminAction,
    ) -> Result<(), AppError> {
        let session = self.sessions.get(requester).ok_or(AppError::UsernameRequired)?;
        if session.role != Role::Owner {
            return Err(AppError::PermissionDenied);
        }

        let target = target.trim();
        if target.is_empty() || self.sessions.privileges().is_owner(target) {
            return Err(AppError::InvalidTarget(target.to_string()));
        }

        let changed = match action {
            AdminAction::Grant => self.sessions.privileges_mut().grant(target),
            AdminAction::Revoke => self.sessions.privileges_mut().revoke(target),
        };
        info!("Admin {:?} for '{}' (changed: {})", action, target, changed);

        if changed {
            for id in self.sessions.ids_for_username(target) {
                self.refresh_session(id);
            }
        }

        let message = match action {
            AdminAction::Grant => format!("{} is now an admin", target),
            AdminAction::Revoke => format!("{} is no longer an admin", target),
        };
        self.unicast(
            requester,
            ServerMessage::AdminActionResult {
                action,
                username: target.to_string(),
                success: true,
                message,
            },
        );
        Ok(())
    }

    /// Re-derive a live session's role and tell its room (or itself)
    fn refresh_session(&mut self, id: SessionId) {
        let Some(session) = self.sessions.refresh_role(id) else {
            return;
        };
        let display_name = session.display_name.clone();
        let role = session.role;
        let room_id = session.current_room.clone();

        let room = match &room_id {
            Some(room_id) => self.rooms.get_mut(room_id),
            None => None,
        };
        let recipients = match room {
            Some(room) => {
                if let Some(member) = room.member_mut(id) {
                    member.display_name = display_name.clone();
                    member.role = role;
                }
                room.member_ids()
            }
            None => vec![id],
        };

        self.deliver(
            recipients,
            ServerMessage::SessionUpdated {
                session_id: id,
                display_name,
                role,
            },
        );
    }

    // ========== ROOMS ==========

    /// Join `room_id`, creating it if unregistered
    ///
    /// Leaves any other room first. Fails with `RoomFull` at capacity.
    pub fn join_room(
        &mut self,
        id: SessionId,
        room_id: RoomId,
        desired_name: Option<String>,
        is_private: bool,
    ) -> Result<RoomSnapshot, AppError> {
        let session = self.sessions.get(id).ok_or(AppError::UsernameRequired)?;
        let username = session.username.clone();
        let display_name = session.display_name.clone();
        let role = session.role;

        match session.current_room.clone() {
            Some(current) if current == room_id => {
                if let Some(room) = self.rooms.get(&room_id) {
                    let snapshot = room.snapshot(self.config.history_window);
                    self.unicast(id, snapshot.clone().into());
                    return Ok(snapshot);
                }
            }
            Some(_) => self.leave_room(id),
            None => {}
        }

        if !self.rooms.contains(&room_id) {
            self.create_room_on_join(room_id.clone(), desired_name, is_private, &username);
        }

        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| AppError::RoomNotFound(room_id.to_string()))?;

        let member = Member {
            session_id: id,
            display_name,
            role,
            is_creator: username == room.created_by,
        };
        room.add_member(member.clone())?;

        let cancelled = room.pending_expiry.take().is_some();
        let snapshot = room.snapshot(self.config.history_window);
        let others = room.member_ids_except(id);

        if cancelled {
            debug!("Expiry of room {} cancelled", room_id);
            self.effects.push(Effect::CancelExpiry {
                room_id: room_id.clone(),
            });
        }

        if let Some(session) = self.sessions.get_mut(id) {
            session.current_room = Some(room_id.clone());
            session.touch();
        }

        info!(
            "{} joined {} ({}), {} members",
            member.display_name,
            snapshot.room.name,
            room_id,
            snapshot.members.len()
        );

        self.unicast(id, snapshot.clone().into());
        self.deliver(others, ServerMessage::MemberJoined { member });
        Ok(snapshot)
    }

    fn create_room_on_join(
        &mut self,
        room_id: RoomId,
        desired_name: Option<String>,
        is_private: bool,
        creator: &str,
    ) {
        // The shared public room is always open and unbounded
        let room = if is_private && !room_id.is_public() {
            let code = self.rooms.allocate_code();
            let name = clean_name(desired_name).unwrap_or_else(|| format!("Private Room {}", code));
            Room::new(
                room_id,
                name,
                Some(code),
                creator.to_string(),
                Some(self.config.max_private_members),
            )
        } else {
            let name = clean_name(desired_name).unwrap_or_else(|| "Public Chat".to_string());
            Room::new(room_id, name, None, creator.to_string(), None)
        };

        info!("Room {} created by '{}'", room.id, creator);
        self.rooms.insert(room);
    }

    /// Leave the current room, if any
    ///
    /// A private room left empty arms its expiry.
    pub fn leave_room(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let Some(room_id) = session.current_room.take() else {
            return;
        };
        session.is_typing = false;
        let display_name = session.display_name.clone();

        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        if room.remove_member(id).is_none() {
            return;
        }
        let remaining = room.member_ids();
        let abandoned = room.is_private && room.is_empty();

        info!("{} left {}", display_name, room_id);

        self.deliver(
            remaining,
            ServerMessage::MemberLeft {
                session_id: id,
                display_name,
            },
        );

        if abandoned {
            self.arm_expiry(&room_id);
        }
    }

    fn arm_expiry(&mut self, room_id: &RoomId) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        self.next_expiry_generation += 1;
        let generation = self.next_expiry_generation;
        room.pending_expiry = Some(generation);

        debug!(
            "Room {} empty, expires in {:?} (generation {})",
            room_id, self.config.room_expiry, generation
        );
        self.effects.push(Effect::ArmExpiry {
            room_id: room_id.clone(),
            generation,
            delay: self.config.room_expiry,
        });
    }

    /// Delete an abandoned room whose expiry fired
    ///
    /// Returns false when the room is gone, has members again, or the
    /// generation is stale.
    pub fn expire_room(&mut self, room_id: &RoomId, generation: u64) -> bool {
        let Some(room) = self.rooms.get(room_id) else {
            return false;
        };
        if room.pending_expiry != Some(generation) || !room.is_empty() {
            debug!("Ignoring stale expiry of room {}", room_id);
            return false;
        }

        if let Some(room) = self.rooms.remove(room_id) {
            info!("Cleaned up empty room: {} ({})", room.name, room_id);
        }
        true
    }

    /// Register an empty private room; the creator is not joined
    pub fn create_private_room(
        &mut self,
        id: SessionId,
        name: Option<String>,
    ) -> Result<(RoomId, RoomCode), AppError> {
        let session = self.sessions.get(id).ok_or(AppError::UsernameRequired)?;
        let username = session.username.clone();
        let display_name = session.display_name.clone();

        let code = self.rooms.allocate_code();
        let room_id = RoomId::private(&code);
        let name = clean_name(name).unwrap_or_else(|| format!("Private Room {}", code));

        self.rooms.insert(Room::new(
            room_id.clone(),
            name.clone(),
            Some(code.clone()),
            username,
            Some(self.config.max_private_members),
        ));
        // Never-joined rooms are cleaned up like abandoned ones
        self.arm_expiry(&room_id);

        info!("Private room created: {} ({}) by {}", name, code, display_name);

        self.unicast(
            id,
            ServerMessage::PrivateRoomCreated {
                room_id: room_id.clone(),
                room_code: code.clone(),
                room_name: name,
            },
        );
        Ok((room_id, code))
    }

    /// Case-insensitive code lookup
    pub fn resolve_room_code(&self, code: &str) -> Result<RoomId, AppError> {
        self.rooms
            .resolve_code(code)
            .cloned()
            .ok_or_else(|| AppError::RoomNotFound(code.to_string()))
    }

    /// Resolve `code` and join the room it names
    pub fn join_by_code(&mut self, id: SessionId, code: &str) -> Result<RoomSnapshot, AppError> {
        if !self.sessions.contains(id) {
            return Err(AppError::UsernameRequired);
        }
        let room_id = self.resolve_room_code(code)?;
        self.join_room(id, room_id, None, true)
    }

    /// Active private rooms created under `username`
    pub fn list_rooms_created_by(&self, username: &str) -> Vec<RoomSummary> {
        self.rooms.created_by(username)
    }

    /// List the caller's private rooms and send them back
    pub fn list_my_rooms(&mut self, id: SessionId) -> Result<Vec<RoomSummary>, AppError> {
        let session = self.sessions.get(id).ok_or(AppError::UsernameRequired)?;
        let rooms = self.list_rooms_created_by(&session.username);
        self.unicast(id, ServerMessage::MyRoomsList {
            rooms: rooms.clone(),
        });
        Ok(rooms)
    }

    // ========== MESSAGING ==========

    /// Post to the caller's current room
    ///
    /// Silently ignored outside a room or when there is nothing to send.
    pub fn post_message(
        &mut self,
        id: SessionId,
        content: &str,
        image_url: Option<String>,
    ) -> Option<ChatMessage> {
        let session = self.sessions.get_mut(id)?;
        let room_id = session.current_room.clone()?;

        let content = sanitize_content(content, self.config.max_message_len);
        let image_url = image_url.filter(|url| !url.trim().is_empty());
        if content.is_empty() && image_url.is_none() {
            return None;
        }

        session.touch();
        let was_typing = std::mem::take(&mut session.is_typing);
        let author_name = session.display_name.clone();
        let author_role = session.role;
        let username = session.username.clone();

        let room = self.rooms.get_mut(&room_id)?;
        self.next_message_id += 1;
        let author = Author {
            id,
            name: author_name,
            role: author_role,
            is_creator: username == room.created_by,
        };
        let message = ChatMessage::new(self.next_message_id, author, content, image_url);
        room.log.push(message.clone());

        let recipients = room.member_ids();
        let others = room.member_ids_except(id);

        debug!(
            "Message {} from {} in {}: {}",
            message.id,
            message.author_name,
            room_id,
            message.content.chars().take(50).collect::<String>()
        );

        if was_typing {
            self.deliver(others, ServerMessage::UserStoppedTyping { session_id: id });
        }
        self.deliver(
            recipients,
            ServerMessage::MessageCreated {
                message: message.clone(),
            },
        );
        Some(message)
    }

    /// Toggle a like or dislike on a message in the caller's room
    pub fn set_reaction(
        &mut self,
        id: SessionId,
        message_id: MessageId,
        kind: ReactionKind,
    ) -> Option<ChatMessage> {
        let room_id = self.sessions.get(id)?.current_room.clone()?;
        let room = self.rooms.get_mut(&room_id)?;
        let message = room.log.find_mut(message_id)?;

        message.toggle(id, kind);
        debug!(
            "Reaction of {} on message {} is now {:?}",
            id,
            message_id,
            message.reaction_of(id)
        );
        let updated = message.clone();
        let recipients = room.member_ids();

        self.deliver(
            recipients,
            ServerMessage::MessageUpdated {
                message: updated.clone(),
            },
        );
        Some(updated)
    }

    /// Add an emoji reaction on a message in the caller's room
    ///
    /// Additive only; nothing is emitted when the reaction already exists.
    pub fn add_emoji_reaction(
        &mut self,
        id: SessionId,
        message_id: MessageId,
        emoji: &str,
    ) -> Option<ChatMessage> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return None;
        }

        let room_id = self.sessions.get(id)?.current_room.clone()?;
        let room = self.rooms.get_mut(&room_id)?;
        let message = room.log.find_mut(message_id)?;

        if !message.add_emoji(id, emoji) {
            return None;
        }
        let updated = message.clone();
        let recipients = room.member_ids();

        self.deliver(
            recipients,
            ServerMessage::MessageUpdated {
                message: updated.clone(),
            },
        );
        Some(updated)
    }

    /// Update the typing flag and tell the rest of the room
    pub fn set_typing(&mut self, id: SessionId, typing: bool) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let Some(room_id) = session.current_room.clone() else {
            return;
        };
        if session.is_typing == typing {
            return;
        }
        session.is_typing = typing;
        let display_name = session.display_name.clone();

        let others = self
            .rooms
            .get(&room_id)
            .map(|room| room.member_ids_except(id))
            .unwrap_or_default();

        let message = if typing {
            ServerMessage::UserTyping {
                session_id: id,
                display_name,
            }
        } else {
            ServerMessage::UserStoppedTyping { session_id: id }
        };
        self.deliver(others, message);
    }

    // ========== HEALTH ==========

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            sessions: self.sessions.len(),
            rooms: self.rooms.len(),
            private_rooms: self.rooms.private_count(),
            admins: self.sessions.privileges().admin_count(),
        }
    }

    // ========== HELPERS ==========

    fn unicast(&mut self, id: SessionId, message: ServerMessage) {
        self.deliver(vec![id], message);
    }

    fn deliver(&mut self, recipients: Vec<SessionId>, message: ServerMessage) {
        if recipients.is_empty() {
            return;
        }
        self.effects.push(Effect::Deliver {
            recipients,
            message,
        });
    }
}

/// Trimmed, non-empty room name
fn clean_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineConfig {
            owner: "Charlie".to_string(),
            owner_label: "Owner - Charlie".to_string(),
            seed_admins: vec!["Alice".to_string()],
            ..EngineConfig::default()
        })
    }

    fn connect(engine: &mut Engine, name: &str) -> SessionId {
        let id = SessionId::new();
        engine.register_session(id, name.to_string());
        engine.take_effects();
        id
    }

    fn deliveries(effects: &[Effect]) -> Vec<(&Vec<SessionId>, &ServerMessage)> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Deliver {
                    recipients,
                    message,
                } => Some((recipients, message)),
                _ => None,
            })
            .collect()
    }

    fn expiry_generation(effects: &[Effect]) -> Option<u64> {
        effects.iter().find_map(|effect| match effect {
            Effect::ArmExpiry { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    /// `current_room` and room membership agree for `id`
    fn assert_consistent(engine: &Engine, id: SessionId) {
        let session = engine.session(id).unwrap();
        if let Some(room_id) = &session.current_room {
            let room = engine.room(room_id).unwrap();
            let count = room.members().iter().filter(|m| m.session_id == id).count();
            assert_eq!(count, 1);
        }
    }

    #[test]
    fn test_register_emits_session_ready() {
        let mut engine = engine();
        let id = SessionId::new();
        let info = engine.register_session(id, "Dave".to_string());
        assert_eq!(info.role, Role::Guest);

        let effects = engine.take_effects();
        let sent = deliveries(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, &vec![id]);
        assert!(matches!(sent[0].1, ServerMessage::SessionReady { session } if session.username == "Dave"));
    }

    #[test]
    fn test_unregistered_session_cannot_join() {
        let mut engine = engine();
        let err = engine
            .join_room(SessionId::new(), RoomId::public(), None, false)
            .unwrap_err();
        assert!(matches!(err, AppError::UsernameRequired));
    }

    #[test]
    fn test_public_room_created_lazily() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");

        let snapshot = engine.join_room(alice, RoomId::public(), None, false).unwrap();
        assert_eq!(snapshot.room.name, "Public Chat");
        assert_eq!(snapshot.room.created_by, "Alice");
        assert!(snapshot.room.code.is_none());
        assert!(snapshot.members[0].is_creator);
        engine.take_effects();

        let snapshot = engine.join_room(bob, RoomId::public(), None, false).unwrap();
        assert_eq!(snapshot.members.len(), 2);
        assert!(!snapshot.members[1].is_creator);

        let effects = engine.take_effects();
        let sent = deliveries(&effects);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, &vec![bob]);
        assert!(matches!(sent[0].1, ServerMessage::RoomJoined { .. }));
        assert_eq!(sent[1].0, &vec![alice]);
        assert!(matches!(sent[1].1, ServerMessage::MemberJoined { member } if member.session_id == bob));
    }

    #[test]
    fn test_switching_rooms_leaves_old_room() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.join_room(bob, RoomId::public(), None, false).unwrap();
        engine.take_effects();

        let lobby = RoomId::from("lobby");
        engine.join_room(bob, lobby.clone(), Some("Lobby".to_string()), false).unwrap();

        assert!(!engine.room(&RoomId::public()).unwrap().contains(bob));
        assert!(engine.room(&lobby).unwrap().contains(bob));
        assert_eq!(engine.session(bob).unwrap().current_room, Some(lobby));
        assert_consistent(&engine, alice);
        assert_consistent(&engine, bob);

        let effects = engine.take_effects();
        let left = deliveries(&effects)
            .into_iter()
            .find(|(_, msg)| matches!(msg, ServerMessage::MemberLeft { .. }))
            .unwrap();
        assert_eq!(left.0, &vec![alice]);
    }

    #[test]
    fn test_rejoining_same_room_does_not_duplicate() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        let snapshot = engine.join_room(alice, RoomId::public(), None, false).unwrap();

        assert_eq!(snapshot.members.len(), 1);
        assert_consistent(&engine, alice);
    }

    #[test]
    fn test_private_room_capacity() {
        let mut engine = engine();
        let owner = connect(&mut engine, "Zed");
        let (room_id, _) = engine.create_private_room(owner, Some("Full".to_string())).unwrap();

        for i in 0..15 {
            let id = connect(&mut engine, &format!("user{}", i));
            engine.join_room(id, room_id.clone(), None, true).unwrap();
        }
        let before = engine.room(&room_id).unwrap().members().to_vec();
        assert_eq!(before.len(), 15);

        let late = connect(&mut engine, "late");
        engine.join_room(late, RoomId::public(), None, false).unwrap();
        let err = engine.join_room(late, room_id.clone(), None, true).unwrap_err();

        assert!(matches!(err, AppError::RoomFull(15)));
        assert_eq!(engine.room(&room_id).unwrap().members(), before.as_slice());
        assert!(engine.session(late).unwrap().current_room.is_none());
        assert!(!engine.room(&RoomId::public()).unwrap().contains(late));
    }

    #[test]
    fn test_create_and_join_by_lowercase_code() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");

        let (room_id, code) = engine.create_private_room(alice, Some("Test".to_string())).unwrap();
        assert_eq!(room_id.0, format!("private_{}", code));
        assert_eq!(code.0.len(), 6);
        // Creator is not auto-joined
        assert!(engine.room(&room_id).unwrap().is_empty());
        assert!(engine.session(alice).unwrap().current_room.is_none());

        let effects = engine.take_effects();
        assert!(deliveries(&effects)
            .iter()
            .any(|(to, msg)| *to == &vec![alice] && matches!(msg, ServerMessage::PrivateRoomCreated { .. })));

        let snapshot = engine.join_by_code(bob, &code.0.to_lowercase()).unwrap();
        assert_eq!(snapshot.room.id, room_id);
        assert_eq!(snapshot.room.name, "Test");
        assert!(snapshot.room.is_private);
        assert_eq!(snapshot.room.max_members, Some(15));
        assert!(!snapshot.members[0].is_creator);
    }

    #[test]
    fn test_unknown_code() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");

        assert!(matches!(
            engine.resolve_room_code("NOPE00"),
            Err(AppError::RoomNotFound(_))
        ));
        assert!(matches!(
            engine.join_by_code(alice, "nope00"),
            Err(AppError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_private_join_creates_code() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let snapshot = engine
            .join_room(alice, RoomId::from("secret"), None, true)
            .unwrap();

        let code = snapshot.room.code.unwrap();
        assert_eq!(engine.resolve_room_code(&code.0).unwrap(), RoomId::from("secret"));
        assert_eq!(snapshot.room.name, format!("Private Room {}", code));
    }

    #[test]
    fn test_private_codes_unique() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let mut codes = std::collections::HashSet::new();
        for _ in 0..200 {
            let (_, code) = engine.create_private_room(alice, None).unwrap();
            assert!(codes.insert(code));
        }
        assert_eq!(engine.health().private_rooms, 200);
    }

    #[test]
    fn test_message_truncated() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();

        let message = engine.post_message(alice, &"x".repeat(500), None).unwrap();
        assert_eq!(message.content.chars().count(), 400);
    }

    #[test]
    fn test_message_noops() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");

        // Not in a room
        assert!(engine.post_message(alice, "hello", None).is_none());
        assert!(engine.take_effects().is_empty());

        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.take_effects();

        // Whitespace only
        assert!(engine.post_message(alice, "   ", None).is_none());
        assert!(engine.post_message(alice, "", Some("  ".to_string())).is_none());
        assert!(engine.take_effects().is_empty());

        // Image only is fine
        let message = engine
            .post_message(alice, "", Some("https://img.example/cat.png".to_string()))
            .unwrap();
        assert!(message.content.is_empty());
    }

    #[test]
    fn test_message_broadcast_and_ids() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.join_room(bob, RoomId::public(), None, false).unwrap();
        engine.take_effects();

        let first = engine.post_message(alice, " hi ", None).unwrap();
        let second = engine.post_message(bob, "hey", None).unwrap();
        assert!(second.id > first.id);
        assert_eq!(first.content, "hi");
        assert_eq!(first.author_name, "Admin - Alice");
        assert_eq!(first.author_role, Role::Admin);
        assert!(first.is_creator);
        assert!(!second.is_creator);

        let effects = engine.take_effects();
        let sent = deliveries(&effects);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, &vec![alice, bob]);
        assert!(matches!(sent[0].1, ServerMessage::MessageCreated { .. }));
    }

    #[test]
    fn test_history_window_on_join() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        for i in 0..50 {
            engine.post_message(alice, &format!("msg {}", i), None).unwrap();
        }

        let snapshot = engine.join_room(bob, RoomId::public(), None, false).unwrap();
        assert_eq!(snapshot.messages.len(), 45);
        assert_eq!(snapshot.messages[0].content, "msg 5");
        assert_eq!(engine.room(&RoomId::public()).unwrap().log.len(), 50);
    }

    #[test]
    fn test_reaction_toggle_and_exclusion() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.join_room(bob, RoomId::public(), None, false).unwrap();
        let message = engine.post_message(alice, "rate me", None).unwrap();
        engine.take_effects();

        let updated = engine.set_reaction(bob, message.id, ReactionKind::Like).unwrap();
        assert!(updated.likes.contains(&bob));

        let updated = engine.set_reaction(bob, message.id, ReactionKind::Dislike).unwrap();
        assert!(updated.dislikes.contains(&bob));
        assert!(updated.likes.is_disjoint(&updated.dislikes));

        let updated = engine.set_reaction(bob, message.id, ReactionKind::Dislike).unwrap();
        assert!(updated.likes.is_empty());
        assert!(updated.dislikes.is_empty());

        let effects = engine.take_effects();
        let sent = deliveries(&effects);
        assert_eq!(sent.len(), 3);
        assert!(sent
            .iter()
            .all(|(to, msg)| *to == &vec![alice, bob] && matches!(msg, ServerMessage::MessageUpdated { .. })));
    }

    #[test]
    fn test_reaction_scoped_to_current_room() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        let message = engine.post_message(alice, "only here", None).unwrap();

        engine.join_room(bob, RoomId::from("elsewhere"), None, false).unwrap();
        engine.take_effects();

        assert!(engine.set_reaction(bob, message.id, ReactionKind::Like).is_none());
        assert!(engine.add_emoji_reaction(bob, message.id, "🔥").is_none());
        assert!(engine.set_reaction(alice, 9999, ReactionKind::Like).is_none());
        assert!(engine.take_effects().is_empty());
    }

    #[test]
    fn test_emoji_reaction_additive() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        let message = engine.post_message(alice, "party", None).unwrap();
        engine.take_effects();

        let updated = engine.add_emoji_reaction(alice, message.id, "🎉").unwrap();
        assert!(updated.reactions["🎉"].contains(&alice));
        assert_eq!(engine.take_effects().len(), 1);

        assert!(engine.add_emoji_reaction(alice, message.id, "🎉").is_none());
        assert!(engine.add_emoji_reaction(alice, message.id, "  ").is_none());
        assert!(engine.take_effects().is_empty());
    }

    #[test]
    fn test_abandoned_private_room_expires() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let (room_id, code) = engine.create_private_room(alice, None).unwrap();
        engine.join_by_code(alice, &code.0).unwrap();
        engine.take_effects();

        engine.remove_session(alice);
        let effects = engine.take_effects();
        let generation = expiry_generation(&effects).unwrap();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ArmExpiry { delay, .. } if *delay == Duration::from_secs(300)
        )));

        // Still resolvable until the timer fires
        assert!(engine.resolve_room_code(&code.0).is_ok());

        assert!(engine.expire_room(&room_id, generation));
        assert!(engine.room(&room_id).is_none());
        assert!(matches!(
            engine.resolve_room_code(&code.0),
            Err(AppError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_join_cancels_expiry() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        let (room_id, code) = engine.create_private_room(alice, None).unwrap();
        let generation = expiry_generation(&engine.take_effects()).unwrap();

        engine.join_by_code(bob, &code.0).unwrap();
        let effects = engine.take_effects();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::CancelExpiry { room_id: r } if *r == room_id)));

        // A stale fire is ignored
        assert!(!engine.expire_room(&room_id, generation));
        assert!(engine.room(&room_id).is_some());

        // Emptied again: only the new generation expires it
        engine.leave_room(bob);
        let second = expiry_generation(&engine.take_effects()).unwrap();
        assert_ne!(second, generation);
        assert!(!engine.expire_room(&room_id, generation));
        assert!(engine.expire_room(&room_id, second));
    }

    #[test]
    fn test_public_room_never_expires() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.take_effects();

        engine.leave_room(alice);
        assert!(expiry_generation(&engine.take_effects()).is_none());
        assert!(engine.room(&RoomId::public()).is_some());
    }

    #[test]
    fn test_public_room_ignores_private_flag() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let snapshot = engine.join_room(alice, RoomId::public(), None, true).unwrap();
        assert!(!snapshot.room.is_private);
        assert!(snapshot.room.code.is_none());
        assert!(snapshot.room.max_members.is_none());
        engine.take_effects();

        engine.leave_room(alice);
        assert!(expiry_generation(&engine.take_effects()).is_none());
        assert!(engine.room(&RoomId::public()).is_some());
        assert_eq!(engine.health().private_rooms, 0);
    }

    #[test]
    fn test_remove_session_idempotent() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.join_room(bob, RoomId::public(), None, false).unwrap();
        engine.take_effects();

        engine.remove_session(alice);
        engine.remove_session(alice);
        engine.remove_session(SessionId::new());

        assert!(engine.session(alice).is_none());
        assert_eq!(engine.room(&RoomId::public()).unwrap().member_ids(), vec![bob]);
        let effects = engine.take_effects();
        assert_eq!(deliveries(&effects).len(), 1);
    }

    #[test]
    fn test_grant_admin_offline_user() {
        let mut engine = engine();
        let owner = connect(&mut engine, "Charlie");

        engine.grant_admin(owner, "Bob").unwrap();
        let effects = engine.take_effects();
        let sent = deliveries(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, &vec![owner]);
        assert!(matches!(
            sent[0].1,
            ServerMessage::AdminActionResult { success: true, .. }
        ));
        assert_eq!(engine.health().admins, 2);

        let bob = SessionId::new();
        let info = engine.register_session(bob, "Bob".to_string());
        assert_eq!(info.role, Role::Admin);
        assert_eq!(info.display_name, "Admin - Bob");
    }

    #[test]
    fn test_admin_permissions() {
        let mut engine = engine();
        let owner = connect(&mut engine, "Charlie");
        let alice = connect(&mut engine, "Alice");

        // Admins cannot grant
        assert!(matches!(
            engine.grant_admin(alice, "Bob"),
            Err(AppError::PermissionDenied)
        ));
        assert!(matches!(
            engine.revoke_admin(owner, "Charlie"),
            Err(AppError::InvalidTarget(_))
        ));
        assert!(matches!(
            engine.grant_admin(SessionId::new(), "Bob"),
            Err(AppError::UsernameRequired)
        ));
        assert!(engine.take_effects().is_empty());
    }

    #[test]
    fn test_grant_live_session_updates_room() {
        let mut engine = engine();
        let owner = connect(&mut engine, "Charlie");
        let bob = connect(&mut engine, "Bob");
        let dave = connect(&mut engine, "Dave");
        engine.join_room(bob, RoomId::public(), None, false).unwrap();
        engine.join_room(dave, RoomId::public(), None, false).unwrap();
        let before = engine.post_message(bob, "still a guest", None).unwrap();
        engine.take_effects();

        engine.grant_admin(owner, "Bob").unwrap();

        let session = engine.session(bob).unwrap();
        assert_eq!(session.role, Role::Admin);
        let room = engine.room(&RoomId::public()).unwrap();
        assert_eq!(room.members()[0].display_name, "Admin - Bob");

        let effects = engine.take_effects();
        let updated = deliveries(&effects)
            .into_iter()
            .find(|(_, msg)| matches!(msg, ServerMessage::SessionUpdated { .. }))
            .unwrap();
        assert_eq!(updated.0, &vec![bob, dave]);

        // Messages keep the author snapshot
        let snapshot = engine.join_room(dave, RoomId::public(), None, false).unwrap();
        let stored = snapshot.messages.iter().find(|m| m.id == before.id).unwrap();
        assert_eq!(stored.author_role, Role::Guest);
        assert_eq!(stored.author_name, "Bob");

        // Revoke outside a room notifies the session itself
        engine.leave_room(bob);
        engine.take_effects();
        engine.revoke_admin(owner, "Bob").unwrap();
        let effects = engine.take_effects();
        assert!(deliveries(&effects)
            .iter()
            .any(|(to, msg)| *to == &vec![bob] && matches!(msg, ServerMessage::SessionUpdated { role: Role::Guest, .. })));
    }

    #[test]
    fn test_list_rooms_created_by() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        engine.create_private_room(alice, Some("One".to_string())).unwrap();
        engine.create_private_room(alice, Some("Two".to_string())).unwrap();
        engine.create_private_room(bob, Some("Bob's".to_string())).unwrap();
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.take_effects();

        let rooms = engine.list_my_rooms(alice).unwrap();
        let mut names: Vec<&str> = rooms.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["One", "Two"]);
        assert_eq!(engine.list_rooms_created_by("Bob").len(), 1);
        assert!(engine.list_rooms_created_by("Nobody").is_empty());

        let effects = engine.take_effects();
        assert!(matches!(
            deliveries(&effects)[0].1,
            ServerMessage::MyRoomsList { rooms } if rooms.len() == 2
        ));
    }

    #[test]
    fn test_typing_indicators() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        let bob = connect(&mut engine, "Bob");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.join_room(bob, RoomId::public(), None, false).unwrap();
        engine.take_effects();

        engine.set_typing(alice, true);
        engine.set_typing(alice, true);
        let effects = engine.take_effects();
        let sent = deliveries(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, &vec![bob]);
        assert!(matches!(sent[0].1, ServerMessage::UserTyping { .. }));

        engine.post_message(alice, "done", None).unwrap();
        let effects = engine.take_effects();
        let sent = deliveries(&effects);
        assert!(matches!(sent[0].1, ServerMessage::UserStoppedTyping { .. }));
        assert!(!engine.session(alice).unwrap().is_typing);
    }

    #[test]
    fn test_reclaim_username_leaves_room() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();

        engine.register_session(alice, "Alicia".to_string());
        assert!(engine.session(alice).unwrap().current_room.is_none());
        assert!(engine.room(&RoomId::public()).unwrap().is_empty());
    }

    #[test]
    fn test_health_counts() {
        let mut engine = engine();
        let alice = connect(&mut engine, "Alice");
        connect(&mut engine, "Bob");
        engine.join_room(alice, RoomId::public(), None, false).unwrap();
        engine.create_private_room(alice, None).unwrap();

        let health = engine.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.sessions, 2);
        assert_eq!(health.rooms, 2);
        assert_eq!(health.private_rooms, 1);
        assert_eq!(health.admins, 1);
    }
}
