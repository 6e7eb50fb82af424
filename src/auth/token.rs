use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

/// Default proactive refresh window: requests refresh the access token first
/// when it has fewer than this many seconds left.
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 240;

/// Access/refresh token pair issued by the backend
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived token attached to every API call
    pub access: String,
    /// Longer-lived token used only to obtain a new access token
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    /// Build the pair that follows a refresh. The refresh token is only
    /// replaced when the backend rotated it.
    pub fn rotate(&self, access: String, refresh: Option<String>) -> Self {
        Self {
            access,
            refresh: refresh.unwrap_or_else(|| self.refresh.clone()),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Username/password pair submitted once per login
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Back office roles carried in the token claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Owner,
    Sellers,
    Advicer,
    #[serde(other)]
    Other,
}

impl Role {
    /// Console route a user of this role lands on after signing in
    pub fn landing_route(&self) -> &'static str {
        match self {
            Self::Admin => "/adminDashboard",
            Self::Owner => "/owner-dashboard",
            Self::Sellers => "/sellersDashboard",
            Self::Advicer => "/advicer-dashboard",
            Self::Other => "/",
        }
    }
}

/// Claims read out of a token payload.
///
/// The backend may name the subject `sub` or `user_id`, and may send it as a
/// string or a number, so both are kept raw and resolved by [`Claims::subject`].
/// Only `exp` must be well-formed; any other claim of an unexpected shape is
/// dropped.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    fn from_payload(payload: &Map<String, Value>) -> Result<Self, TokenError> {
        let exp = payload
            .get("exp")
            .and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|secs| secs as i64)))
            .ok_or(TokenError::MissingClaim("exp"))?;

        Ok(Self {
            exp,
            sub: payload.get("sub").cloned(),
            user_id: payload.get("user_id").cloned(),
            username: lenient(payload, "username"),
            role: lenient(payload, "role"),
            token_type: lenient(payload, "token_type"),
            iat: lenient(payload, "iat"),
            jti: lenient(payload, "jti"),
        })
    }

    /// Subject identifier, preferring `sub` over `user_id`
    pub fn subject(&self) -> Option<String> {
        [&self.sub, &self.user_id]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

fn lenient<T: DeserializeOwned>(payload: &Map<String, Value>, key: &str) -> Option<T> {
    let value = payload.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            trace!(claim = key, error = %e, "Ignoring malformed claim");
            None
        }
    }
}

/// Errors decoding a token payload
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Token payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token is missing required claim: {0}")]
    MissingClaim(&'static str),
}

/// Decode a token's claims without verifying its signature.
///
/// Signature checks belong to the backend; the client only reads the claims
/// to schedule refreshes and to know who is signed in.
pub fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let mut segments = token.split('.');
    let payload = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(_header), Some(payload), Some(_signature), None) => payload,
        _ => {
            return Err(TokenError::Malformed(
                "expected three dot-separated segments".to_string(),
            ))
        }
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let payload: Value = serde_json::from_slice(&bytes)?;
    match payload {
        Value::Object(payload) => Claims::from_payload(&payload),
        _ => Err(TokenError::Malformed(
            "payload is not a JSON object".to_string(),
        )),
    }
}

/// The signed-in user as described by the access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub username: Option<String>,
    pub role: Option<Role>,
}

impl SessionUser {
    pub fn from_claims(claims: &Claims) -> Result<Self, TokenError> {
        let id = claims.subject().ok_or(TokenError::MissingClaim("sub"))?;
        Ok(Self {
            id,
            username: claims.username.clone(),
            role: claims.role,
        })
    }

    pub fn from_access_token(token: &str) -> Result<Self, TokenError> {
        Self::from_claims(&decode_claims(token)?)
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Computes remaining token lifetimes
#[derive(Clone)]
pub struct TokenClock {
    clock: Arc<dyn Clock>,
}

impl TokenClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Seconds until the token's `exp`, negative once expired.
    ///
    /// Fails closed: an undecodable token reports `f64::NEG_INFINITY`.
    pub fn seconds_until_expiry(&self, token: &str) -> f64 {
        match decode_claims(token) {
            Ok(claims) => {
                let now = self.clock.now().timestamp_millis() as f64 / 1000.0;
                claims.exp as f64 - now
            }
            Err(e) => {
                trace!(error = %e, "Treating undecodable token as expired");
                f64::NEG_INFINITY
            }
        }
    }

    pub fn is_expired(&self, token: &str) -> bool {
        self.seconds_until_expiry(token) <= 0.0
    }

    /// True when the token has less than `threshold` left (always true for
    /// malformed tokens)
    pub fn needs_refresh(&self, token: &str, threshold: Duration) -> bool {
        self.seconds_until_expiry(token) < threshold.as_secs_f64()
    }
}

impl Default for TokenClock {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl fmt::Debug for TokenClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClock")
            .field("now", &self.clock.now())
            .finish()
    }
}
