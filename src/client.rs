//! High-level `ChatClient` combining session, REST, and room connection.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::Result;
use crate::rest::RestClient;
use crate::room::{RoomConnection, RoomConnectionManager, RoomEvent, RoomState};
use crate::session::SessionManager;
use crate::storage::TokenStore;
use crate::types::{Identity, RegisterRequest};

/// The main ChatMe client.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use chatme_client::{ChatClient, FileTokenStore, RoomEvent};
///
/// #[tokio::main]
/// async fn main() -> chatme_client::Result<()> {
///     let store = Arc::new(FileTokenStore::new("/home/me/.chatme"));
///     let mut client = ChatClient::new(None, None, store)?;
///
///     if client.restore().await.is_none() {
///         client.login("a@b.com", "password").await?;
///     }
///
///     let mut events = client.open_room("general").await?.subscribe();
///     client.send("hello").await;
///     while let Ok(RoomEvent::Message(msg)) = events.recv().await {
///         println!("{}: {}", msg.sender.username, msg.content);
///     }
///     Ok(())
/// }
/// ```
pub struct ChatClient {
    session: SessionManager,
    rest: RestClient,
    rooms: RoomConnectionManager,
}

impl ChatClient {
    pub fn new(
        rest_url: Option<&str>,
        ws_url: Option<&str>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let session = SessionManager::new(rest_url, store)?;
        let rest = RestClient::new(session.clone(), rest_url)?;
        let rooms = RoomConnectionManager::new(rest.clone(), session.clone(), ws_url)?;
        Ok(Self {
            session,
            rest,
            rooms,
        })
    }

    /// Restore a persisted session, if one exists.
    pub async fn restore(&self) -> Option<Identity> {
        self.session.restore().await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Identity> {
        self.session.login(email, password).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<()> {
        self.session.register(request).await
    }

    /// Close any open room and end the session.
    pub async fn logout(&mut self) {
        self.rooms.close().await;
        self.session.logout().await;
    }

    /// Switch the active room; the previous connection (if any) is closed
    /// before the new room is even requested.
    pub async fn open_room(&mut self, room_name: &str) -> Result<&RoomConnection> {
        self.rooms.open(room_name).await
    }

    pub async fn close_room(&mut self) {
        self.rooms.close().await;
    }

    /// Fire-and-forget send into the active room.
    pub async fn send(&self, content: &str) {
        self.rooms.send(content).await;
    }

    pub fn room_state(&self) -> RoomState {
        self.rooms.state()
    }

    /// Subscribe to the active room's events, if a room is open.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<RoomEvent>> {
        self.rooms.connection().map(RoomConnection::subscribe)
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTokenStore;

    #[tokio::test]
    async fn new_client_starts_signed_out_and_idle() {
        let client = ChatClient::new(None, None, Arc::new(MemoryTokenStore::new())).unwrap();
        assert!(!client.session().is_authenticated());
        assert!(client.restore().await.is_none());
        assert_eq!(client.room_state(), RoomState::Idle);
        assert!(client.subscribe().is_none());
    }
}
