//! ChatMe client library for Rust.
//!
//! Talks to the ChatMe backend over REST (authentication, rooms, history,
//! moderation) and one WebSocket per open room (live messages). The session
//! manager owns the JWT access/refresh pair: it persists the pair across
//! restarts, rotates the access token proactively on a timer, and — when a
//! call comes back 401 — refreshes once and retries the call once.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatme_client::{ChatClient, MemoryTokenStore, RoomEvent};
//!
//! #[tokio::main]
//! async fn main() -> chatme_client::Result<()> {
//!     let mut client = ChatClient::new(
//!         Some("http://localhost:8000/api"),
//!         Some("ws://localhost:8000"),
//!         Arc::new(MemoryTokenStore::new()),
//!     )?;
//!
//!     client.login("a@b.com", "password").await?;
//!     let mut events = client.open_room("general").await?.subscribe();
//!
//!     client.send("hi").await;
//!     while let Ok(RoomEvent::Message(msg)) = events.recv().await {
//!         println!("{}: {}", msg.sender.username, msg.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod rest;
pub mod room;
pub mod session;
pub mod storage;
pub mod types;

pub use client::ChatClient;
pub use error::{ChatError, Result};
pub use rest::RestClient;
pub use room::{RoomConnection, RoomConnectionManager, RoomEvent, RoomState};
pub use session::SessionManager;
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use types::*;
