//! Broadcast router
//!
//! Maps session ids to their outbound channels and fans messages out to
//! recipient lists resolved by the engine. Delivery is best-effort: a slow
//! or closed client never stalls the server actor.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::SessionId;

/// Outbound channels of connected sessions
#[derive(Debug, Default)]
pub struct Router {
    senders: HashMap<SessionId, mpsc::Sender<ServerMessage>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: SessionId, sender: mpsc::Sender<ServerMessage>) {
        self.senders.insert(id, sender);
    }

    pub fn unregister(&mut self, id: SessionId) {
        self.senders.remove(&id);
    }

    pub fn is_connected(&self, id: SessionId) -> bool {
        self.senders.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Send a message to one session
    pub fn send(&self, id: SessionId, msg: ServerMessage) -> Result<(), SendError> {
        let sender = self.senders.get(&id).ok_or(SendError::UnknownSession)?;
        sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::ChannelFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Send a message to every recipient, logging failures
    ///
    /// Returns the number of successful deliveries.
    pub fn deliver(&self, recipients: &[SessionId], msg: &ServerMessage) -> usize {
        let mut delivered = 0;
        for id in recipients {
            match self.send(*id, msg.clone()) {
                Ok(()) => delivered += 1,
                Err(SendError::ChannelFull) => {
                    warn!("Dropping message for {}: outbound queue full", id);
                }
                Err(e) => {
                    debug!("Could not deliver to {}: {}", id, e);
                }
            }
        }
        delivered
    }
}
