//! Domain types matching the ChatMe server models (snake_case field names).

use serde::{Deserialize, Serialize};

// ── Session ──────────────────────────────────────────────────────────────────

/// The access/refresh token pair held for an authenticated session.
///
/// A credential is always complete: the pair is stored, replaced, and cleared
/// as a unit, never one half without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access: String,
    pub refresh: String,
}

/// Claims embedded in a ChatMe access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub is_blocked: bool,
    pub exp: i64,
}

fn default_role() -> String {
    "user".to_owned()
}

/// The signed-in user, derived from the current access token's claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub is_blocked: bool,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.user_id,
            email: claims.email,
            role: claims.role,
            is_blocked: claims.is_blocked,
        }
    }
}

/// Result of the most recent login/register attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Loading,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_blocked: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub password2: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

// ── Rooms & messages ─────────────────────────────────────────────────────────

/// A user as rendered in rooms and message lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}

/// A named conversation, direct (two participants) or group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub sender: Participant,
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub is_flagged: bool,
    #[serde(default)]
    pub toxicity: Option<f64>,
}

// ── Admin & feedback ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: i64,
    pub content: String,
    #[serde(default)]
    pub user: Option<Participant>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Per-user toxicity counters for the admin activity dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActivity {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub toxic_count: i64,
    #[serde(default)]
    pub non_toxic_count: i64,
    #[serde(default)]
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockStatus {
    pub id: i64,
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}
