//! Room-based WebSocket Chat Relay Library
//!
//! A real-time chat relay built with tokio-tungstenite using the Actor
//! pattern for state management.
//!
//! # Features
//! - Username claims with Owner/Admin/Guest roles
//! - A lazily created public room plus named rooms
//! - Private rooms bound to 6-character codes, capped at 15 members
//! - Message history (last 45 sent to joiners)
//! - Like/dislike toggles and emoji reactions
//! - Typing indicators
//! - Cleanup of abandoned private rooms after a delay
//!
//! # Architecture
//! - `Engine` holds sessions, rooms and messages and performs no I/O;
//!   operations record effects (deliveries, timer instructions)
//! - `ChatServer` is the actor that owns the engine, applies its effects
//!   through the `Router` and runs the expiry timers
//! - Each connection has a `handler` task communicating with the server
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use room_relay::{ChatServer, EngineConfig, handle_connection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//!     tokio::spawn(ChatServer::new(EngineConfig::default(), &cmd_tx, cmd_rx).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx));
//!     }
//! }
//! ```

pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod message;
pub mod room;
pub mod router;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use chat::{ChatMessage, ReactionKind};
pub use config::{Config, ConfigError, EngineConfig};
pub use engine::{Effect, Engine};
pub use error::{AppError, SendError};
pub use handler::handle_connection;
pub use message::{ClientMessage, ErrorCode, HealthReport, ServerMessage};
pub use room::{Room, RoomSnapshot, RoomSummary};
pub use router::Router;
pub use server::{request_health, ChatServer, ServerCommand};
pub use session::{Role, Session};
pub use types::{MessageId, RoomCode, RoomId, SessionId};
