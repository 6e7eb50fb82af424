use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::auth::storage::FileTokenStore;
use crate::auth::token::DEFAULT_REFRESH_THRESHOLD_SECS;
use crate::common::RetryPolicy;
use crate::error::{ClientError, ClientResult};

// Default configuration values
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api/";
const DEFAULT_LOGIN_PATH: &str = "token/";
const DEFAULT_REFRESH_PATH: &str = "token/refresh/";
const DEFAULT_LOGOUT_PATH: &str = "logout/";
const DEFAULT_PROFILE_PATH: &str = "me/";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Session client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend API root; endpoint paths are joined onto it
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Auth endpoint paths
    #[serde(default)]
    pub endpoints: Endpoints,
    /// Refresh ahead of any request made with less than this much access
    /// token lifetime left
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Retries for refresh calls that hit the network or a 5xx
    #[serde(default)]
    pub refresh_retry: RetryPolicy,
    /// Token file location; the user config dir is used when unset
    #[serde(default = "default_token_store_path")]
    pub token_store_path: Option<PathBuf>,
}

/// Auth endpoint paths, relative to the base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_login_path")]
    pub login: String,
    #[serde(default = "default_refresh_path")]
    pub refresh: String,
    #[serde(default = "default_logout_path")]
    pub logout: String,
    #[serde(default = "default_profile_path")]
    pub profile: String,
}

// Default functions
fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|val| !val.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn default_base_url() -> String {
    env_or("SHOPDESK_API_URL", DEFAULT_BASE_URL)
}

fn default_login_path() -> String {
    env_or("SHOPDESK_LOGIN_PATH", DEFAULT_LOGIN_PATH)
}

fn default_refresh_path() -> String {
    env_or("SHOPDESK_REFRESH_PATH", DEFAULT_REFRESH_PATH)
}

fn default_logout_path() -> String {
    env_or("SHOPDESK_LOGOUT_PATH", DEFAULT_LOGOUT_PATH)
}

fn default_profile_path() -> String {
    env_or("SHOPDESK_PROFILE_PATH", DEFAULT_PROFILE_PATH)
}

fn default_refresh_threshold() -> u64 {
    std::env::var("SHOPDESK_REFRESH_THRESHOLD_SECS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_REFRESH_THRESHOLD_SECS)
}

fn default_request_timeout() -> u64 {
    std::env::var("SHOPDESK_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
}

fn default_token_store_path() -> Option<PathBuf> {
    std::env::var("SHOPDESK_TOKEN_STORE")
        .ok()
        .filter(|val| !val.is_empty())
        .map(PathBuf::from)
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: default_login_path(),
            refresh: default_refresh_path(),
            logout: default_logout_path(),
            profile: default_profile_path(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoints: Endpoints::default(),
            refresh_threshold_secs: default_refresh_threshold(),
            request_timeout_secs: default_request_timeout(),
            refresh_retry: RetryPolicy::default(),
            token_store_path: default_token_store_path(),
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at a specific backend
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file. A missing file yields the
    /// defaults; nothing is written.
    pub async fn load(path: &Path) -> ClientResult<Self> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ClientError::Config(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());

        config.validate()?;
        Ok(config)
    }

    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("SHOPDESK_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        dirs_next::config_dir()
            .map(|dir| dir.join("shopdesk").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("shopdesk.json"))
    }

    pub fn validate(&self) -> ClientResult<()> {
        self.base()?;
        if self.refresh_threshold_secs == 0 {
            return Err(ClientError::Config(
                "refresh_threshold_secs must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed base URL, always ending in `/` so relative joins append
    pub fn base(&self) -> ClientResult<Url> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }

        let url = Url::parse(&raw)
            .map_err(|e| ClientError::Config(format!("invalid base URL {raw:?}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ClientError::Config(format!(
                "base URL must be http or https, got {other}"
            ))),
        }
    }

    /// Resolve an endpoint path against the base URL. Absolute URLs pass
    /// through unchanged.
    pub fn endpoint_url(&self, path: &str) -> ClientResult<String> {
        if let Ok(absolute) = Url::parse(path) {
            if matches!(absolute.scheme(), "http" | "https") {
                return Ok(absolute.to_string());
            }
        }

        let joined = self
            .base()?
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Config(format!("invalid endpoint path {path:?}: {e}")))?;
        Ok(joined.to_string())
    }

    /// `scheme://host[:port]` of the backend
    pub fn origin(&self) -> ClientResult<String> {
        Ok(self.base()?.origin().ascii_serialization())
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Where the file token store lives, if anywhere
    pub fn resolved_token_store_path(&self) -> Option<PathBuf> {
        self.token_store_path
            .clone()
            .or_else(FileTokenStore::default_path)
    }
}
