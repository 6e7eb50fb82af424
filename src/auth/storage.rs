use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth::token::TokenPair;

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "access";
/// Storage key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh";

/// Token store failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Token store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token store at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Token store unavailable: {0}")]
    Unavailable(String),
}

/// Durable key/value storage for the session's token pair.
///
/// Implementations only persist; they never validate what they hold.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist both tokens, replacing whatever was stored
    async fn save(&self, tokens: &TokenPair) -> Result<(), StorageError>;

    /// Load the stored pair. Missing either entry reads as `None`.
    async fn load(&self) -> Result<Option<TokenPair>, StorageError>;

    /// Remove both entries
    async fn clear(&self) -> Result<(), StorageError>;
}

fn pair_from_entries(entries: &BTreeMap<String, String>) -> Option<TokenPair> {
    let access = entries.get(ACCESS_TOKEN_KEY).filter(|v| !v.is_empty())?;
    let refresh = entries.get(REFRESH_TOKEN_KEY).filter(|v| !v.is_empty())?;
    Some(TokenPair::new(access.clone(), refresh.clone()))
}

/// Token store backed by a small JSON file
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<user config dir>/shopdesk/session.json`, when the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("shopdesk").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn read_entries(&self) -> Result<Option<BTreeMap<String, String>>, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn save(&self, tokens: &TokenPair) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let entries = BTreeMap::from([
            (ACCESS_TOKEN_KEY.to_string(), tokens.access.clone()),
            (REFRESH_TOKEN_KEY.to_string(), tokens.refresh.clone()),
        ]);
        let contents =
            serde_json::to_string_pretty(&entries).map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        // Write beside the target and rename so readers never see half a file
        let staging = self.path.with_extension("json.tmp");
        match fs::remove_file(&staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_error(e)),
        }

        // Owner-only from the moment the file exists
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&staging)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&staging, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), "Tokens saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<TokenPair>, StorageError> {
        let Some(entries) = self.read_entries().await? else {
            debug!(path = %self.path.display(), "No token store file");
            return Ok(None);
        };

        Ok(pair_from_entries(&entries))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Token store cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// In-process token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a pair, as if left behind by an earlier run
    pub fn with_tokens(tokens: &TokenPair) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::from([
                (ACCESS_TOKEN_KEY.to_string(), tokens.access.clone()),
                (REFRESH_TOKEN_KEY.to_string(), tokens.refresh.clone()),
            ])),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, tokens: &TokenPair) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.insert(ACCESS_TOKEN_KEY.to_string(), tokens.access.clone());
        entries.insert(REFRESH_TOKEN_KEY.to_string(), tokens.refresh.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<TokenPair>, StorageError> {
        Ok(pair_from_entries(&*self.entries.read().await))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.remove(ACCESS_TOKEN_KEY);
        entries.remove(REFRESH_TOKEN_KEY);
        Ok(())
    }
}
