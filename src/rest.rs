//! Async REST client for the ChatMe API.
//!
//! Every authenticated call flows through one request helper that attaches
//! the session's current access token. A 401 response triggers exactly one
//! token refresh followed by one retry with the new token; a second 401 on
//! the same call is returned to the caller as a final failure.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::session::SessionManager;
use crate::types::{
    BlockStatus, ChatMessage, Feedback, Participant, Profile, RoomSummary, UserActivity,
};

const DEFAULT_BASE: &str = "http://localhost:8000/api";

/// Async ChatMe REST client.
///
/// Holds a reference to the [`SessionManager`] so every call reads the
/// latest access token; the session is never mutated here except through
/// the reactive refresh path.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    session: SessionManager,
}

impl RestClient {
    pub fn new(session: SessionManager, base_url: Option<&str>) -> Result<Self> {
        let client = Client::builder().build().map_err(ChatError::Http)?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE)
                .trim_end_matches('/')
                .to_owned(),
            session: session.clone(),
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    // ── Internal ──────────────────────────────────────────────────────────────

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(token) = self.session.access_token() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        Ok(req.send().await?)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let resp = self.send_once(method.clone(), path, body).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!(path, "access token rejected, refreshing and retrying once");
            // On refresh failure the session is already cleared; surface
            // `SessionExpired` and issue no retry.
            self.session.refresh().await?;
            let resp = self.send_once(method, path, body).await?;
            return parse(resp).await;
        }
        parse(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn put<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        self.request(Method::PUT, path, Some(body)).await
    }

    async fn patch<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.request(Method::DELETE, path, None).await
    }

    // ── Rooms ─────────────────────────────────────────────────────────────────

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>> {
        self.get("/rooms/").await
    }

    pub async fn get_room(&self, room_id: i64) -> Result<RoomSummary> {
        self.get(&format!("/rooms/{room_id}/")).await
    }

    /// Create (or join) a room. Direct rooms carry two participants; pass
    /// `is_group` for named group rooms.
    pub async fn create_room(&self, name: &str, is_group: bool) -> Result<RoomSummary> {
        self.post(
            "/rooms/",
            &serde_json::json!({ "name": name, "is_group": is_group }),
        )
        .await
    }

    /// Message history for a room, oldest first.
    pub async fn room_messages(&self, room_id: i64) -> Result<Vec<ChatMessage>> {
        self.get(&format!("/rooms/{room_id}/messages/")).await
    }

    // ── Users & profile ───────────────────────────────────────────────────────

    /// The user directory (everyone except the signed-in user).
    pub async fn list_users(&self) -> Result<Vec<Participant>> {
        self.get("/all/").await
    }

    pub async fn get_profile(&self) -> Result<Profile> {
        self.get("/profile/").await
    }

    pub async fn update_profile(&self, profile: &Profile) -> Result<Profile> {
        self.put("/profile/", &serde_json::to_value(profile)?).await
    }

    // ── Feedback ──────────────────────────────────────────────────────────────

    pub async fn submit_feedback(&self, content: &str) -> Result<()> {
        self.post::<Value>("/feedback/", &serde_json::json!({ "content": content }))
            .await?;
        Ok(())
    }

    /// All submitted feedback. Admin only.
    pub async fn feedback_list(&self) -> Result<Vec<Feedback>> {
        self.get("/feedback-list/").await
    }

    pub async fn delete_feedback(&self, feedback_id: i64) -> Result<()> {
        self.delete(&format!("/feedback/{feedback_id}/")).await
    }

    // ── Moderation ────────────────────────────────────────────────────────────

    /// Messages the backend's classifier flagged as toxic. Admin only.
    pub async fn flagged_messages(&self) -> Result<Vec<ChatMessage>> {
        self.get("/flagged-messages/").await
    }

    pub async fn delete_message(&self, message_id: i64) -> Result<()> {
        self.delete(&format!("/delete-message/{message_id}/")).await
    }

    /// Per-user toxicity counters for the activity dashboard. Admin only.
    pub async fn user_activity(&self) -> Result<Vec<UserActivity>> {
        self.get("/user-activity-list/").await
    }

    pub async fn set_user_blocked(&self, user_id: i64, is_blocked: bool) -> Result<BlockStatus> {
        self.patch(
            &format!("/user-block/{user_id}/"),
            &serde_json::json!({ "is_blocked": is_blocked }),
        )
        .await
    }
}

async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("detail")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| status.to_string());
        return Err(ChatError::Api {
            status: status.as_u16(),
            message,
        });
    }
    if status == StatusCode::NO_CONTENT {
        return serde_json::from_value(Value::Null).map_err(ChatError::Json);
    }
    Ok(resp.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::make_token;
    use crate::storage::{MemoryTokenStore, TokenStore};
    use crate::types::Credential;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn authed_client(
        server: &MockServer,
        access: &str,
    ) -> (RestClient, SessionManager, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(&Credential {
                access: access.to_owned(),
                refresh: "r1".to_owned(),
            })
            .await
            .unwrap();
        let base = format!("{}/api", server.uri());
        let session = SessionManager::new(Some(&base), store.clone()).unwrap();
        session.restore().await.unwrap();
        let client = RestClient::new(session.clone(), Some(&base)).unwrap();
        (client, session, store)
    }

    fn rooms_body() -> serde_json::Value {
        serde_json::json!([{
            "id": 5,
            "name": "g1",
            "is_group": true,
            "participants": [
                { "id": 1, "username": "alice", "image_url": null, "is_online": true }
            ]
        }])
    }

    #[tokio::test]
    async fn list_rooms_attaches_bearer_token() {
        let server = MockServer::start().await;
        let access = make_token(1, "a@b.com", "user", false);
        let (client, session, _store) = authed_client(&server, &access).await;

        Mock::given(method("GET"))
            .and(path("/api/rooms/"))
            .and(header("authorization", format!("Bearer {access}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(rooms_body()))
            .mount(&server)
            .await;

        let rooms = client.list_rooms().await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].name, "g1");
        assert!(rooms[0].is_group);
        session.logout().await;
    }

    #[tokio::test]
    async fn expired_token_refreshes_and_retries_once() {
        let server = MockServer::start().await;
        let access1 = make_token(1, "a@b.com", "user", false);
        let access2 = make_token(1, "a@b.com", "user", false);
        let (client, session, _store) = authed_client(&server, &access1).await;

        // First call with the stale token is rejected, the retry with the
        // rotated token succeeds.
        Mock::given(method("GET"))
            .and(path("/api/rooms/"))
            .and(header("authorization", format!("Bearer {access1}")))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "detail": "token expired" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/rooms/"))
            .and(header("authorization", format!("Bearer {access2}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(rooms_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/login/refresh/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access": access2 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let rooms = client.list_rooms().await.unwrap();
        assert_eq!(rooms[0].id, 5);
        session.logout().await;
    }

    #[tokio::test]
    async fn second_unauthorized_is_final() {
        let server = MockServer::start().await;
        let access = make_token(1, "a@b.com", "user", false);
        let (client, session, _store) = authed_client(&server, &access).await;

        // Every data call is rejected even after a successful refresh.
        Mock::given(method("GET"))
            .and(path("/api/rooms/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "detail": "still expired" })),
            )
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/login/refresh/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access": make_token(1, "a@b.com", "user", false)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client.list_rooms().await.unwrap_err();
        assert!(matches!(err, ChatError::Api { status: 401, .. }));
        session.logout().await;
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_session_expired() {
        let server = MockServer::start().await;
        let access = make_token(1, "a@b.com", "user", false);
        let (client, session, store) = authed_client(&server, &access).await;

        Mock::given(method("GET"))
            .and(path("/api/rooms/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "detail": "token expired" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/login/refresh/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "detail": "refresh expired" })),
            )
            .mount(&server)
            .await;

        let err = client.list_rooms().await.unwrap_err();
        assert!(matches!(err, ChatError::SessionExpired));
        assert!(!session.is_authenticated());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn non_auth_errors_pass_through() {
        let server = MockServer::start().await;
        let access = make_token(1, "a@b.com", "user", false);
        let (client, session, _store) = authed_client(&server, &access).await;

        Mock::given(method("GET"))
            .and(path("/api/rooms/99/"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({ "detail": "Not found." })),
            )
            .mount(&server)
            .await;

        let err = client.get_room(99).await.unwrap_err();
        match err {
            ChatError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Not found.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        session.logout().await;
    }

    #[tokio::test]
    async fn delete_accepts_no_content() {
        let server = MockServer::start().await;
        let access = make_token(1, "a@b.com", "admin", false);
        let (client, session, _store) = authed_client(&server, &access).await;

        Mock::given(method("DELETE"))
            .and(path("/api/delete-message/12/"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        client.delete_message(12).await.unwrap();
        session.logout().await;
    }
}
