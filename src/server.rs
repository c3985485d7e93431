//! ChatServer Actor implementation
//!
//! The central actor owning the engine, the broadcast router and the room
//! expiry timers. Uses the Actor pattern with mpsc channels: every command
//! is handled to completion, including fan-out, before the next one.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{Effect, Engine};
use crate::error::AppError;
use crate::message::{AdminAction, ClientMessage, ErrorCode, HealthReport, ServerMessage};
use crate::router::Router;
use crate::types::{RoomId, SessionId};

/// Commands sent to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New socket connected
    Connect {
        session_id: SessionId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Socket closed
    Disconnect { session_id: SessionId },
    /// Decoded client event
    Client {
        session_id: SessionId,
        message: ClientMessage,
    },
    /// Frame that failed validation at the transport boundary
    Rejected { session_id: SessionId, reason: String },
    /// An empty private room's expiry delay elapsed
    ExpireRoom { room_id: RoomId, generation: u64 },
    /// Report process-wide counts
    Health { res_tx: oneshot::Sender<HealthReport> },
}

/// Ask the actor for a health report
pub async fn request_health(cmd_tx: &mpsc::Sender<ServerCommand>) -> Result<HealthReport, AppError> {
    let (res_tx, res_rx) = oneshot::channel();
    cmd_tx
        .send(ServerCommand::Health { res_tx })
        .await
        .map_err(|_| AppError::ChannelSend)?;
    res_rx.await.map_err(|_| AppError::ChannelSend)
}

/// Pending expiry task for a room
#[derive(Debug)]
struct ExpiryTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// The main ChatServer actor
pub struct ChatServer {
    engine: Engine,
    router: Router,
    timers: HashMap<RoomId, ExpiryTimer>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
    /// Used by timer tasks; weak so the actor still stops once every
    /// connection handler is gone
    commands: mpsc::WeakSender<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer listening on `receiver`
    pub fn new(
        config: EngineConfig,
        sender: &mpsc::Sender<ServerCommand>,
        receiver: mpsc::Receiver<ServerCommand>,
    ) -> Self {
        Self {
            engine: Engine::new(config),
            router: Router::new(),
            timers: HashMap::new(),
            receiver,
            commands: sender.downgrade(),
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { session_id, sender } => {
                debug!("Session {} registered", session_id);
                self.router.register(session_id, sender);
            }
            ServerCommand::Disconnect { session_id } => {
                debug!("Session {} unregistered", session_id);
                self.engine.remove_session(session_id);
                self.apply_effects();
                self.router.unregister(session_id);
            }
            ServerCommand::Client {
                session_id,
                message,
            } => {
                if !self.router.is_connected(session_id) {
                    debug!("Dropping event from disconnected session {}", session_id);
                    return;
                }
                self.handle_client_message(session_id, message);
                self.apply_effects();
            }
            ServerCommand::Rejected { session_id, reason } => {
                self.reply(
                    session_id,
                    ServerMessage::Error {
                        code: ErrorCode::InvalidMessage,
                        message: reason,
                    },
                );
            }
            ServerCommand::ExpireRoom {
                room_id,
                generation,
            } => {
                if self
                    .timers
                    .get(&room_id)
                    .is_some_and(|timer| timer.generation == generation)
                {
                    self.timers.remove(&room_id);
                }
                self.engine.expire_room(&room_id, generation);
                self.apply_effects();
            }
            ServerCommand::Health { res_tx } => {
                let _ = res_tx.send(self.engine.health());
            }
        }
    }

    /// Dispatch a decoded client event to the engine
    fn handle_client_message(&mut self, session_id: SessionId, message: ClientMessage) {
        let result = match message {
            ClientMessage::SetUsername { username } => {
                let username = username.trim();
                if username.is_empty() {
                    self.reply(
                        session_id,
                        ServerMessage::Error {
                            code: ErrorCode::InvalidMessage,
                            message: "Username cannot be empty".to_string(),
                        },
                    );
                } else {
                    self.engine.register_session(session_id, username.to_string());
                }
                Ok(())
            }
            ClientMessage::JoinRoom {
                room_id,
                room_name,
                is_private,
            } => self
                .engine
                .join_room(session_id, RoomId(room_id), room_name, is_private)
                .map(|_| ()),
            ClientMessage::LeaveRoom => {
                self.engine.leave_room(session_id);
                Ok(())
            }
            ClientMessage::SendMessage { content, image_url } => {
                self.engine.post_message(session_id, &content, image_url);
                Ok(())
            }
            ClientMessage::SetReaction { message_id, kind } => {
                self.engine.set_reaction(session_id, message_id, kind);
                Ok(())
            }
            ClientMessage::AddReaction { message_id, emoji } => {
                self.engine.add_emoji_reaction(session_id, message_id, &emoji);
                Ok(())
            }
            ClientMessage::CreatePrivateRoom { room_name } => self
                .engine
                .create_private_room(session_id, room_name)
                .map(|_| ()),
            ClientMessage::JoinPrivateRoom { room_code } => {
                self.engine.join_by_code(session_id, &room_code).map(|_| ())
            }
            ClientMessage::GetMyRooms => self.engine.list_my_rooms(session_id).map(|_| ()),
            ClientMessage::GrantAdmin { username } => {
                if let Err(e) = self.engine.grant_admin(session_id, &username) {
                    self.reply_admin_error(session_id, AdminAction::Grant, username, e);
                }
                Ok(())
            }
            ClientMessage::RevokeAdmin { username } => {
                if let Err(e) = self.engine.revoke_admin(session_id, &username) {
                    self.reply_admin_error(session_id, AdminAction::Revoke, username, e);
                }
                Ok(())
            }
            ClientMessage::TypingStart => {
                self.engine.set_typing(session_id, true);
                Ok(())
            }
            ClientMessage::TypingStop => {
                self.engine.set_typing(session_id, false);
                Ok(())
            }
            ClientMessage::Health => {
                let report = self.engine.health();
                self.reply(session_id, ServerMessage::Health(report));
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!("Request from {} failed: {}", session_id, e);
            self.reply(session_id, e.into());
        }
    }

    fn reply_admin_error(
        &mut self,
        session_id: SessionId,
        action: AdminAction,
        username: String,
        err: AppError,
    ) {
        warn!("Admin {:?} of '{}' by {} refused: {}", action, username, session_id, err);
        let msg = match err {
            AppError::UsernameRequired => err.into(),
            _ => ServerMessage::AdminActionResult {
                action,
                username,
                success: false,
                message: err.to_string(),
            },
        };
        self.reply(session_id, msg);
    }

    fn reply(&self, session_id: SessionId, msg: ServerMessage) {
        if let Err(e) = self.router.send(session_id, msg) {
            debug!("Could not reply to {}: {}", session_id, e);
        }
    }

    /// Carry out everything the engine recorded
    fn apply_effects(&mut self) {
        for effect in self.engine.take_effects() {
            match effect {
                Effect::Deliver {
                    recipients,
                    message,
                } => {
                    self.router.deliver(&recipients, &message);
                }
                Effect::ArmExpiry {
                    room_id,
                    generation,
                    delay,
                } => self.arm_timer(room_id, generation, delay),
                Effect::CancelExpiry { room_id } => {
                    if let Some(timer) = self.timers.remove(&room_id) {
                        timer.handle.abort();
                    }
                }
            }
        }
    }

    fn arm_timer(&mut self, room_id: RoomId, generation: u64, delay: Duration) {
        let commands = self.commands.clone();
        let target = room_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(cmd_tx) = commands.upgrade() {
                let _ = cmd_tx
                    .send(ServerCommand::ExpireRoom {
                        room_id: target,
                        generation,
                    })
                    .await;
            }
        });

        if let Some(previous) = self.timers.insert(room_id, ExpiryTimer { generation, handle }) {
            previous.handle.abort();
        }
    }
}
