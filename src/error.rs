//! Error types for the ChatMe client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The backend rejected the supplied credentials.
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// The refresh token was rejected; the session has been cleared.
    #[error("session expired")]
    SessionExpired,

    /// No room with the requested name exists.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// A WebSocket-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The HTTP response had a non-2xx status code.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// An error from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Token storage I/O failure.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The access token could not be decoded.
    #[error("invalid access token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// An operation requiring a session was called while signed out.
    #[error("not authenticated")]
    NotAuthenticated,

    /// A malformed URL was supplied or built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, ChatError>;
