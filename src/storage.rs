//! Durable token storage.
//!
//! The browser build of ChatMe keeps the token pair in `localStorage` under
//! fixed keys; here the equivalent is a small JSON file (`tokens.json`)
//! written with 0o600 permissions. A missing or unreadable file simply means
//! "signed out".

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Credential;

/// Default token file name under the client data directory.
const TOKEN_FILE_NAME: &str = "tokens.json";

/// Where the current credential is persisted across restarts.
///
/// Implementations must treat the pair atomically: `save` replaces both
/// tokens, `clear` removes both.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the persisted credential, or `None` if absent or unreadable.
    async fn load(&self) -> Option<Credential>;

    /// Persist the credential, replacing any previous one.
    async fn save(&self, credential: &Credential) -> Result<()>;

    /// Remove any persisted credential. Idempotent.
    async fn clear(&self) -> Result<()>;
}

/// File-backed token store.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Store tokens at `<data_dir>/tokens.json`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(TOKEN_FILE_NAME),
        }
    }

    /// Store tokens at an exact file path.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Option<Credential> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("failed to read token file: {e}");
                return None;
            }
        };
        match serde_json::from_str::<Credential>(&data) {
            Ok(credential) => Some(credential),
            Err(e) => {
                tracing::warn!("failed to parse token file: {e}");
                None
            }
        }
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(credential)?;
        std::fs::write(&self.path, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&self.path, perms);
        }

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory token store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: std::sync::Mutex<Option<Credential>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Option<Credential> {
        self.inner.lock().unwrap().clone()
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        *self.inner.lock().unwrap() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.inner.lock().unwrap() = None;
        Ok(())
    }
}
