use serde::{Deserialize, Serialize};

pub mod streams;
pub use streams::{EventStream, Subscriber};

// Session event stream capacity
pub const SESSION_EVENT_CAPACITY: usize = 64;
pub const SESSION_EVENT_BUFFER_SIZE: usize = 16;

/// Token-free view of the session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    SignedOut,
    SignedIn,
    Refreshing,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SignedOut => "signed_out",
            Self::SignedIn => "signed_in",
            Self::Refreshing => "refreshing",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    /// The user asked to sign out
    UserLogout,
    /// The refresh token was rejected or could not be used
    SessionExpired,
}

/// Events published by the session controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Every state transition
    StateChanged { status: SessionStatus },
    /// A refresh finished and a new access token is in place
    Refreshed,
    /// A signed-in session ended
    SignedOut { reason: SignOutReason },
    /// The session ended without the user asking; screens should send the
    /// user back to the login form with an expiry notice
    Expired,
}

impl SessionEvent {
    pub fn status(&self) -> Option<SessionStatus> {
        match self {
            Self::StateChanged { status } => Some(*status),
            _ => None,
        }
    }
}
