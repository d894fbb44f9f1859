//! Per-room WebSocket connection management.
//!
//! A mounted chat view drives one [`RoomConnectionManager`]. Opening a room
//! fetches its metadata and history over REST, then dials a single socket
//! scoped to that room, authenticated with the access token captured at
//! open time. The token is not rotated mid-connection and a dropped
//! transport is not redialed; the view surfaces the closure instead.

use std::sync::{Arc, RwLock};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ChatError, Result};
use crate::rest::RestClient;
use crate::session::SessionManager;
use crate::types::{ChatMessage, RoomSummary};

const DEFAULT_WS_BASE: &str = "ws://localhost:8000";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection lifecycle of the active chat view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomState {
    /// No room selected.
    #[default]
    Idle,
    /// Fetching room metadata and history; no socket yet.
    Loading,
    /// Exactly one live socket open for the selected room.
    Connected,
    /// Socket released: room change, view unmount, or transport loss.
    Closed,
}

/// Events fanned out to subscribers of an open room connection.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// An inbound message, appended in transport arrival order.
    Message(ChatMessage),
    /// The connection ended; no reconnect will be attempted.
    Closed { reason: Option<String> },
}

/// Inbound frames are JSON objects wrapping the message payload.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    message: ChatMessage,
}

/// Owns at most one live [`RoomConnection`]; opening a new room always
/// closes the previous connection before any work for the new one starts.
pub struct RoomConnectionManager {
    rest: RestClient,
    session: SessionManager,
    ws_base: Url,
    state: RoomState,
    active: Option<RoomConnection>,
}

impl RoomConnectionManager {
    pub fn new(rest: RestClient, session: SessionManager, ws_base: Option<&str>) -> Result<Self> {
        Ok(Self {
            rest,
            session,
            ws_base: Url::parse(ws_base.unwrap_or(DEFAULT_WS_BASE))?,
            state: RoomState::Idle,
            active: None,
        })
    }

    /// Select a room: tear down any previous connection, fetch the room and
    /// its history, then open the socket.
    ///
    /// Fails with [`ChatError::RoomNotFound`] before any socket is dialed
    /// when no room of that name exists.
    pub async fn open(&mut self, room_name: &str) -> Result<&RoomConnection> {
        if let Some(previous) = self.active.take() {
            previous.close().await;
        }
        self.state = RoomState::Loading;

        let outcome = self.load_and_connect(room_name).await;
        match outcome {
            Ok(connection) => {
                self.state = RoomState::Connected;
                Ok(&*self.active.insert(connection))
            }
            Err(e) => {
                self.state = RoomState::Closed;
                Err(e)
            }
        }
    }

    async fn load_and_connect(&self, room_name: &str) -> Result<RoomConnection> {
        let rooms = self.rest.list_rooms().await?;
        let room = rooms
            .into_iter()
            .find(|r| r.name == room_name)
            .ok_or_else(|| ChatError::RoomNotFound(room_name.to_owned()))?;
        let history = self.rest.room_messages(room.id).await?;

        // Token captured once, at open time.
        let token = self
            .session
            .access_token()
            .ok_or(ChatError::NotAuthenticated)?;
        let mut url = self.ws_base.clone();
        url.set_path(&format!("/ws/chat/{room_name}/"));
        url.set_query(Some(&format!("token={token}")));

        let (socket, _) = connect_async(url.as_str()).await?;
        info!(room = %room.name, "room connection open");
        Ok(RoomConnection::start(room, history, socket))
    }

    /// Forward `content` to the active connection; silently dropped while
    /// `Idle`, `Loading`, or `Closed`.
    pub async fn send(&self, content: &str) {
        match &self.active {
            Some(connection) => connection.send(content).await,
            None => debug!("dropping outbound message, no open room"),
        }
    }

    /// Tear down the active connection, if any. Used on view unmount.
    pub async fn close(&mut self) {
        if let Some(connection) = self.active.take() {
            connection.close().await;
        }
        self.state = RoomState::Closed;
    }

    /// The view-facing connection state.
    pub fn state(&self) -> RoomState {
        match &self.active {
            Some(connection) => connection.state(),
            None => self.state,
        }
    }

    pub fn connection(&self) -> Option<&RoomConnection> {
        self.active.as_ref()
    }
}

/// One live socket bound to one room.
#[derive(Debug)]
pub struct RoomConnection {
    room: RoomSummary,
    history: Vec<ChatMessage>,
    state: Arc<RwLock<RoomState>>,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    events: broadcast::Sender<RoomEvent>,
    reader: JoinHandle<()>,
}

impl RoomConnection {
    fn start(
        room: RoomSummary,
        history: Vec<ChatMessage>,
        socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> Self {
        let (sink, mut stream) = socket.split();
        let state = Arc::new(RwLock::new(RoomState::Connected));
        let (events, _) = broadcast::channel(256);

        let reader_state = Arc::clone(&state);
        let tx = events.clone();
        let room_name = room.name.clone();
        let reader = tokio::spawn(async move {
            let mut reason = None;
            while let Some(msg) = stream.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(room = %room_name, "transport error: {e}");
                        reason = Some(e.to_string());
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<InboundFrame>(&text) {
                        Ok(frame) => {
                            let _ = tx.send(RoomEvent::Message(frame.message));
                        }
                        Err(e) => debug!(room = %room_name, "ignoring unparseable frame: {e}"),
                    },
                    Message::Close(frame) => {
                        reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    _ => continue,
                }
            }
            if mark_closed(&reader_state) {
                debug!(room = %room_name, "room connection closed by transport");
                let _ = tx.send(RoomEvent::Closed { reason });
            }
        });

        Self {
            room,
            history,
            state,
            sink: Arc::new(tokio::sync::Mutex::new(Some(sink))),
            events,
            reader,
        }
    }

    pub fn room(&self) -> &RoomSummary {
        &self.room
    }

    /// Message history fetched when the room was opened, oldest first.
    /// Live messages arrive through [`RoomConnection::subscribe`].
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn state(&self) -> RoomState {
        *self.state.read().unwrap()
    }

    /// Subscribe to inbound messages and the closing event.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// Fire-and-forget send. Transmits one `{"message": content}` frame when
    /// connected; otherwise the content is silently dropped.
    pub async fn send(&self, content: &str) {
        if self.state() != RoomState::Connected {
            debug!("dropping outbound message, connection not open");
            return;
        }
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return;
        };
        let frame = serde_json::json!({ "message": content }).to_string();
        if let Err(e) = sink.send(Message::Text(frame.into())).await {
            warn!("outbound send failed, closing connection: {e}");
            let _ = mark_closed(&self.state);
        }
    }

    /// Release the socket. Consumes the connection; subscribers receive one
    /// final [`RoomEvent::Closed`].
    pub async fn close(self) {
        let emit = mark_closed(&self.state);
        self.reader.abort();
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if emit {
            let _ = self.events.send(RoomEvent::Closed { reason: None });
        }
        debug!(room = %self.room.name, "room connection released");
    }
}

/// Transition to `Closed`; returns `false` if the connection was already
/// closed (so the closing event is emitted exactly once).
fn mark_closed(state: &RwLock<RoomState>) -> bool {
    let mut guard = state.write().unwrap();
    if *guard == RoomState::Closed {
        false
    } else {
        *guard = RoomState::Closed;
        true
    }
}
