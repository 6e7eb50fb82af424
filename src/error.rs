use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::storage::StorageError;
use crate::auth::token::TokenError;

/// Message shown when the backend rejects a login without saying why
pub const DEFAULT_LOGIN_FAILURE: &str = "Login failed. Check your credentials.";

/// Errors surfaced by the session client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Invalid credentials: {detail}")]
    InvalidCredentials { detail: String },

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Failed to refresh session: {0}")]
    RefreshFailed(String),

    #[error("Session expired, please sign in again")]
    SessionExpired,

    #[error("Token storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Backend returned an invalid token: {0}")]
    InvalidToken(String),

    #[error("Unexpected response status {status}: {detail}")]
    UnexpectedStatus { status: u16, detail: String },

    #[error("API request failed with status {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Broad error families, used to pick retry and display behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Credentials rejected
    Authentication,
    /// Transport failures and timeouts
    Network,
    /// The session itself ended
    Session,
    /// Durable token storage
    Storage,
    /// The backend answered outside the auth contract
    Protocol,
    /// A downstream API call was rejected
    Api,
    /// Bad client configuration
    Configuration,
}

impl ErrorCategory {
    /// Only network failures are worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }
}

/// How a screen should present an error to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserNotice {
    /// Show next to the login form and let the user retry
    InlineFormError,
    /// Send the user back to the login screen with a "session expired" notice
    RedirectToLogin,
    /// Transient toast; nothing about the session changed
    TransientAlert,
    /// Nothing to show
    None,
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCredentials { .. } => ErrorCategory::Authentication,
            Self::Unreachable(_) => ErrorCategory::Network,
            Self::RefreshFailed(_) | Self::SessionExpired => ErrorCategory::Session,
            Self::StorageUnavailable(_) => ErrorCategory::Storage,
            Self::InvalidToken(_) | Self::UnexpectedStatus { .. } | Self::Decode(_) => {
                ErrorCategory::Protocol
            }
            Self::Api { .. } => ErrorCategory::Api,
            Self::Config(_) => ErrorCategory::Configuration,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub fn user_notice(&self) -> UserNotice {
        match self {
            Self::InvalidCredentials { .. } => UserNotice::InlineFormError,
            Self::RefreshFailed(_) | Self::SessionExpired => UserNotice::RedirectToLogin,
            Self::StorageUnavailable(_) => UserNotice::None,
            Self::Unreachable(_)
            | Self::InvalidToken(_)
            | Self::UnexpectedStatus { .. }
            | Self::Api { .. }
            | Self::Decode(_)
            | Self::Config(_) => UserNotice::TransientAlert,
        }
    }

    /// Map a transport failure. `{:#}` keeps the whole cause chain, which is
    /// where reqwest puts "connection refused" or "operation timed out".
    pub fn unreachable(err: anyhow::Error) -> Self {
        Self::Unreachable(format!("{err:#}"))
    }
}

impl From<StorageError> for ClientError {
    fn from(err: StorageError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<TokenError> for ClientError {
    fn from(err: TokenError) -> Self {
        Self::InvalidToken(err.to_string())
    }
}

/// Pull the `detail` message out of a `{"detail": "..."}` error body
pub fn detail_from_body(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.detail)
        .filter(|detail| !detail.is_empty())
}

/// Result alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
