use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, warn};

use crate::api::types::AuthUser;

const SESSION_FILE: &str = "session.json";

/// The locally cached credential written after a successful sign-in and read
/// back on the next launch for optimistic rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl CachedSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create session directory: {0}")]
    CreateDirError(std::io::Error),
    #[error("Failed to read session cache: {0}")]
    ReadError(std::io::Error),
    #[error("Failed to write session cache: {0}")]
    WriteError(std::io::Error),
    #[error("Failed to delete session cache: {0}")]
    DeleteError(std::io::Error),
    #[error("Failed to serialize session cache: {0}")]
    SerializeError(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    pub(crate) root: PathBuf,
}

impl SessionStore {
    /// Session cache lives under the user config dir (~/.config/mivna).
    pub fn new_default() -> Result<Self, StoreError> {
        let base = default_store_dir();
        Self::new(base)
    }

    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            error!(?e, "Failed to create session store directory: {:?}", root);
            StoreError::CreateDirError(e)
        })?;
        Ok(Self { root })
    }

    fn session_path(&self) -> PathBuf {
        self.root.join(SESSION_FILE)
    }

    /// Load the cached session. A missing or corrupt cache reads as absent so
    /// the caller falls through to the login screen instead of erroring.
    pub fn load(&self) -> Result<Option<CachedSession>, StoreError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&path).map_err(StoreError::ReadError)?;
        match serde_json::from_str::<CachedSession>(&s) {
            Ok(cached) => Ok(Some(cached)),
            Err(e) => {
                warn!(?e, path=%path.display(), "session cache is corrupt; treating as absent");
                Ok(None)
            }
        }
    }

    pub fn save(&self, session: &CachedSession) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(StoreError::CreateDirError)?;
        let path = self.session_path();
        let json_data = serde_json::to_string_pretty(session)?;
        fs::write(&path, &json_data).map_err(|e| {
            error!(?e, "Failed to write session cache: {:?}", path);
            StoreError::WriteError(e)
        })?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let path = self.session_path();
        if path.exists() {
            fs::remove_file(&path).map_err(StoreError::DeleteError)?;
        }
        Ok(())
    }
}

fn default_store_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mivna")
}
