use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::token::{SessionUser, TokenPair};
use crate::error::ClientError;
use crate::events::{
    EventStream, SessionEvent, SessionStatus, SignOutReason, Subscriber,
    SESSION_EVENT_BUFFER_SIZE, SESSION_EVENT_CAPACITY,
};

/// Current session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    SignedOut,
    SignedIn { user: SessionUser, tokens: TokenPair },
    Refreshing { user: SessionUser, tokens: TokenPair },
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::SignedOut => SessionStatus::SignedOut,
            Self::SignedIn { .. } => SessionStatus::SignedIn,
            Self::Refreshing { .. } => SessionStatus::Refreshing,
        }
    }

    pub fn user(&self) -> Option<&SessionUser> {
        match self {
            Self::SignedOut => None,
            Self::SignedIn { user, .. } | Self::Refreshing { user, .. } => Some(user),
        }
    }
}

/// Observable session state machine.
///
/// Screens read the state and subscribe to its events; only the auth client
/// moves it between states.
pub struct SessionController {
    state: RwLock<SessionState>,
    events: EventStream<SessionEvent>,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::SignedOut),
            events: EventStream::new(SESSION_EVENT_CAPACITY, SESSION_EVENT_BUFFER_SIZE),
        }
    }

    pub async fn current(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status()
    }

    pub async fn user(&self) -> Option<SessionUser> {
        self.state.read().await.user().cloned()
    }

    pub fn subscribe(&self) -> Subscriber<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether `err` ends the session. Only a failed refresh does; every
    /// other failure leaves the session as it was.
    pub fn is_session_fatal(&self, err: &ClientError) -> bool {
        matches!(
            err,
            ClientError::RefreshFailed(_) | ClientError::SessionExpired
        )
    }

    pub(crate) async fn signed_in(&self, user: SessionUser, tokens: TokenPair) {
        let mut state = self.state.write().await;
        info!(user_id = %user.id, previous = %state.status(), "Session signed in");
        *state = SessionState::SignedIn { user, tokens };

        self.events
            .publish(SessionEvent::StateChanged {
                status: SessionStatus::SignedIn,
            })
            .await;
    }

    /// Enter `Refreshing`. Only a signed-in session can start refreshing;
    /// returns false otherwise.
    pub(crate) async fn begin_refresh(&self) -> bool {
        let mut state = self.state.write().await;
        let (user, tokens) = match &*state {
            SessionState::SignedIn { user, tokens } => (user.clone(), tokens.clone()),
            other => {
                debug!(status = %other.status(), "Refresh outside a signed-in session");
                return false;
            }
        };

        *state = SessionState::Refreshing { user, tokens };
        debug!("Session refreshing");

        self.events
            .publish(SessionEvent::StateChanged {
                status: SessionStatus::Refreshing,
            })
            .await;
        true
    }

    pub(crate) async fn refreshed(&self, user: SessionUser, tokens: TokenPair) {
        let mut state = self.state.write().await;
        let previous = state.status();
        *state = SessionState::SignedIn { user, tokens };

        if previous != SessionStatus::SignedIn {
            self.events
                .publish(SessionEvent::StateChanged {
                    status: SessionStatus::SignedIn,
                })
                .await;
        }
        self.events.publish(SessionEvent::Refreshed).await;
        debug!(previous = %previous, "Session refreshed");
    }

    /// Leave `Refreshing` with the old tokens still in place
    pub(crate) async fn refresh_aborted(&self) {
        let mut state = self.state.write().await;
        let (user, tokens) = match &*state {
            SessionState::Refreshing { user, tokens } => (user.clone(), tokens.clone()),
            _ => return,
        };

        *state = SessionState::SignedIn { user, tokens };
        self.events
            .publish(SessionEvent::StateChanged {
                status: SessionStatus::SignedIn,
            })
            .await;
    }

    pub(crate) async fn signed_out(&self, reason: SignOutReason) {
        let mut state = self.state.write().await;
        let previous = state.status();
        *state = SessionState::SignedOut;

        match reason {
            SignOutReason::UserLogout => info!(previous = %previous, "Session signed out"),
            SignOutReason::SessionExpired => warn!(previous = %previous, "Session expired"),
        }

        if previous != SessionStatus::SignedOut {
            self.events
                .publish(SessionEvent::StateChanged {
                    status: SessionStatus::SignedOut,
                })
                .await;
        }
        if previous != SessionStatus::SignedOut || reason == SignOutReason::SessionExpired {
            self.events.publish(SessionEvent::SignedOut { reason }).await;
        }
        if reason == SignOutReason::SessionExpired {
            self.events.publish(SessionEvent::Expired).await;
        }
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}
