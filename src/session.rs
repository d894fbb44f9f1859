//! Session manager: owns the access/refresh token pair.
//!
//! Lifecycle: [`SessionManager::restore`] at startup (from the token store),
//! replaced wholesale by [`SessionManager::login`], access token rotated by
//! [`SessionManager::refresh`], cleared by [`SessionManager::logout`] or by
//! any refresh failure. While a credential is held, a background task
//! refreshes the access token on a fixed interval; it is cancelled the
//! moment the credential is cleared.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::storage::TokenStore;
use crate::types::{
    Claims, Credential, Identity, LoginRequest, LoginResponse, RefreshResponse, RegisterRequest,
    SessionStatus,
};

const DEFAULT_BASE: &str = "http://localhost:8000/api";

/// The backend rotates access tokens well before the five-minute expiry the
/// server issues them with; refreshing on a fixed four-minute cadence keeps a
/// safety margin without tracking exact expiry skew.
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);

#[derive(Default)]
struct SessionState {
    credential: Option<Credential>,
    identity: Option<Identity>,
    status: SessionStatus,
    last_error: Option<Value>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    state: RwLock<SessionState>,
    /// Collapses concurrent refresh attempts into one in-flight call.
    refresh_gate: tokio::sync::Mutex<()>,
    refresh_interval: RwLock<Duration>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the authentication token pair and the signed-in identity.
///
/// Cheap to clone; all clones share the same session. The manager is the
/// sole mutator of the credential — every other component reads the latest
/// value through [`SessionManager::access_token`].
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(base_url: Option<&str>, store: Arc<dyn TokenStore>) -> Result<Self> {
        let http = reqwest::Client::builder().build().map_err(ChatError::Http)?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url
                    .unwrap_or(DEFAULT_BASE)
                    .trim_end_matches('/')
                    .to_owned(),
                store,
                state: RwLock::new(SessionState::default()),
                refresh_gate: tokio::sync::Mutex::new(()),
                refresh_interval: RwLock::new(DEFAULT_REFRESH_INTERVAL),
                refresh_task: Mutex::new(None),
            }),
        })
    }

    /// Override the proactive refresh cadence. Call before [`restore`] or
    /// [`login`].
    ///
    /// [`restore`]: SessionManager::restore
    /// [`login`]: SessionManager::login
    pub fn with_refresh_interval(self, interval: Duration) -> Self {
        *self.inner.refresh_interval.write().unwrap() = interval;
        self
    }

    /// Load a persisted credential, derive the identity from it, and start
    /// the proactive refresh timer. Returns the restored identity, or `None`
    /// when starting signed out (including when the stored token no longer
    /// decodes).
    pub async fn restore(&self) -> Option<Identity> {
        let credential = self.inner.store.load().await?;
        let claims = match decode_claims(&credential.access) {
            Ok(claims) => claims,
            Err(e) => {
                warn!("stored access token is not decodable, starting signed out: {e}");
                let _ = self.inner.store.clear().await;
                return None;
            }
        };
        let identity = Identity::from(claims);
        {
            let mut state = self.inner.state.write().unwrap();
            state.credential = Some(credential);
            state.identity = Some(identity.clone());
            state.status = SessionStatus::Succeeded;
        }
        self.spawn_refresh_task();
        debug!(user_id = identity.id, "session restored from storage");
        Some(identity)
    }

    /// Authenticate with the backend and establish a new session.
    ///
    /// On rejection the previous session (if any) is left untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity> {
        self.inner.state.write().unwrap().status = SessionStatus::Loading;

        let url = format!("{}/login/", self.inner.base_url);
        let body = LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        };
        let resp = match self.inner.http.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.record_failure(json!({ "detail": e.to_string() }));
                return Err(e.into());
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let payload = resp.json::<Value>().await.unwrap_or(Value::Null);
            let message = error_message(&payload, &status);
            self.record_failure(payload);
            return Err(ChatError::Auth {
                status: status.as_u16(),
                message,
            });
        }

        let tokens: LoginResponse = resp.json().await?;
        let claims = decode_claims(&tokens.access)?;
        let identity = Identity::from(claims);
        let credential = Credential {
            access: tokens.access,
            refresh: tokens.refresh,
        };

        {
            let mut state = self.inner.state.write().unwrap();
            state.credential = Some(credential.clone());
            state.identity = Some(identity.clone());
            state.status = SessionStatus::Succeeded;
            state.last_error = None;
        }
        if let Err(e) = self.inner.store.save(&credential).await {
            warn!("failed to persist tokens: {e}");
        }
        self.spawn_refresh_task();
        info!(user_id = identity.id, role = %identity.role, "logged in");
        Ok(identity)
    }

    /// Create an account. Does not establish a session; call [`login`] after.
    ///
    /// [`login`]: SessionManager::login
    pub async fn register(&self, request: &RegisterRequest) -> Result<()> {
        self.inner.state.write().unwrap().status = SessionStatus::Loading;

        let url = format!("{}/register/", self.inner.base_url);
        let resp = match self.inner.http.post(&url).json(request).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.record_failure(json!({ "detail": e.to_string() }));
                return Err(e.into());
            }
        };
        let status = resp.status();
        if !status.is_success() {
            let payload = resp.json::<Value>().await.unwrap_or(Value::Null);
            let message = error_message(&payload, &status);
            self.record_failure(payload);
            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }
        self.inner.state.write().unwrap().status = SessionStatus::Succeeded;
        Ok(())
    }

    /// Clear the credential, identity, and persisted tokens, and cancel the
    /// proactive refresh timer. Idempotent; never fails.
    pub async fn logout(&self) {
        force_logout(&self.inner).await;
        info!("logged out");
    }

    /// Rotate the access token using the held refresh token.
    ///
    /// The refresh token itself never changes here. Any failure — rejection
    /// or network — ends the session: the credential is cleared and
    /// [`ChatError::SessionExpired`] is returned. Concurrent callers collapse
    /// onto a single in-flight refresh.
    pub async fn refresh(&self) -> Result<()> {
        do_refresh(&self.inner).await
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.read().unwrap().identity.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .state
            .read()
            .unwrap()
            .credential
            .as_ref()
            .map(|c| c.access.clone())
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.state.read().unwrap().credential.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.read().unwrap().status
    }

    pub fn last_error(&self) -> Option<Value> {
        self.inner.state.read().unwrap().last_error.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().unwrap().credential.is_some()
    }

    fn record_failure(&self, payload: Value) {
        let mut state = self.inner.state.write().unwrap();
        state.status = SessionStatus::Failed;
        state.last_error = Some(payload);
    }

    fn spawn_refresh_task(&self) {
        let weak = Arc::downgrade(&self.inner);
        let interval = *self.inner.refresh_interval.read().unwrap();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.state.read().unwrap().credential.is_none() {
                    break;
                }
                if let Err(e) = do_refresh(&inner).await {
                    warn!("proactive refresh failed, session ended: {e}");
                    break;
                }
            }
        });
        let mut slot = self.inner.refresh_task.lock().unwrap();
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }
}

async fn force_logout(inner: &Arc<Inner>) {
    {
        let mut state = inner.state.write().unwrap();
        state.credential = None;
        state.identity = None;
        state.status = SessionStatus::Idle;
        state.last_error = None;
    }
    if let Err(e) = inner.store.clear().await {
        warn!("failed to clear token storage: {e}");
    }
    let handle = inner.refresh_task.lock().unwrap().take();
    if let Some(handle) = handle {
        handle.abort();
    }
}

async fn do_refresh(inner: &Arc<Inner>) -> Result<()> {
    let seen = {
        let state = inner.state.read().unwrap();
        match &state.credential {
            Some(credential) => credential.clone(),
            None => return Err(ChatError::NotAuthenticated),
        }
    };

    let _gate = inner.refresh_gate.lock().await;

    // Another caller may have already rotated the token while we waited for
    // the gate; the session may also have ended underneath us.
    {
        let state = inner.state.read().unwrap();
        match &state.credential {
            Some(credential) if credential.access != seen.access => return Ok(()),
            Some(_) => {}
            None => return Err(ChatError::SessionExpired),
        }
    }

    let url = format!("{}/login/refresh/", inner.base_url);
    let outcome = async {
        let resp = inner
            .http
            .post(&url)
            .json(&json!({ "refresh": seen.refresh }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let payload = resp.json::<Value>().await.unwrap_or(Value::Null);
            return Err(ChatError::Auth {
                status: status.as_u16(),
                message: error_message(&payload, &status),
            });
        }
        let body: RefreshResponse = resp.json().await?;
        let claims = decode_claims(&body.access)?;
        Ok::<(RefreshResponse, Claims), ChatError>((body, claims))
    }
    .await;

    let (body, claims) = match outcome {
        Ok(ok) => ok,
        Err(e) => {
            warn!("token refresh failed, ending session: {e}");
            force_logout(inner).await;
            return Err(ChatError::SessionExpired);
        }
    };

    let credential = Credential {
        access: body.access,
        refresh: seen.refresh,
    };
    {
        let mut state = inner.state.write().unwrap();
        state.identity = Some(Identity::from(claims));
        state.credential = Some(credential.clone());
    }
    if let Err(e) = inner.store.save(&credential).await {
        warn!("failed to persist refreshed token: {e}");
    }
    debug!("access token refreshed");
    Ok(())
}

/// Decode the claim set of an access token without verifying its signature.
/// The client holds no signing key; the token is only parsed for identity.
fn decode_claims(token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

fn error_message(payload: &Value, status: &reqwest::StatusCode) -> String {
    payload
        .get("detail")
        .or_else(|| payload.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| status.to_string())
}
