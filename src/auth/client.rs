use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::auth::session::SessionController;
use crate::auth::storage::TokenStore;
use crate::auth::token::{decode_claims, Credentials, SessionUser, TokenClock, TokenPair};
use crate::common::with_retry_if;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, DEFAULT_LOGIN_FAILURE};
use crate::events::{SessionStatus, SignOutReason};
use crate::http_client::{HttpClient, SimpleHttpResponse};

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present only when the backend rotates refresh tokens
    #[serde(default)]
    refresh: Option<String>,
}

type RefreshFuture = Shared<BoxFuture<'static, ClientResult<TokenPair>>>;

#[derive(Clone)]
struct InFlightRefresh {
    generation: u64,
    future: RefreshFuture,
}

pub(crate) fn json_headers() -> HashMap<String, String> {
    HashMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
    ])
}

/// Talks to the backend's auth endpoints and owns the current token pair.
///
/// It is the only writer of the token store, and it drives every session
/// transition. At most one refresh request is in flight at a time; every
/// caller that needs one while it runs shares its result.
pub struct AuthClient {
    config: Arc<ClientConfig>,
    http: Arc<dyn HttpClient>,
    store: Arc<dyn TokenStore>,
    session: Arc<SessionController>,
    clock: TokenClock,
    tokens: RwLock<Option<TokenPair>>,
    refresh_slot: Mutex<Option<InFlightRefresh>>,
    generation: AtomicU64,
}

impl AuthClient {
    pub fn new(
        config: Arc<ClientConfig>,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn TokenStore>,
        session: Arc<SessionController>,
    ) -> Self {
        Self {
            config,
            http,
            store,
            session,
            clock: TokenClock::default(),
            tokens: RwLock::new(None),
            refresh_slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: TokenClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn clock(&self) -> &TokenClock {
        &self.clock
    }

    pub(crate) fn http(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    /// The in-memory token pair, if signed in
    pub async fn tokens(&self) -> Option<TokenPair> {
        self.tokens.read().await.clone()
    }

    /// Exchange credentials for a fresh token pair and sign in.
    ///
    /// A second login replaces the first session entirely.
    pub async fn login(&self, credentials: &Credentials) -> ClientResult<TokenPair> {
        let url = self.config.endpoint_url(&self.config.endpoints.login)?;
        let body = json!({
            "username": credentials.username,
            "password": credentials.password,
        });

        debug!(username = %credentials.username, "Logging in");
        let response = self
            .http
            .post(&url, Some(json_headers()), Some(body.to_string()))
            .await
            .map_err(|e| {
                warn!(error = %e, "Login request failed");
                ClientError::unreachable(e)
            })?;

        if response.is_client_error() {
            let detail = response
                .detail()
                .unwrap_or_else(|| DEFAULT_LOGIN_FAILURE.to_string());
            info!(status = %response.status, "Login rejected");
            return Err(ClientError::InvalidCredentials { detail });
        }
        if !response.is_success() {
            return Err(unexpected_status(&response));
        }

        let parsed: LoginResponse = response
            .json()
            .map_err(|e| ClientError::InvalidToken(format!("login response: {e}")))?;
        let tokens = TokenPair::new(parsed.access, parsed.refresh);
        let user = SessionUser::from_access_token(&tokens.access)?;
        decode_claims(&tokens.refresh)?;

        *self.tokens.write().await = Some(tokens.clone());
        self.persist(&tokens).await;
        self.session.signed_in(user, tokens.clone()).await;

        Ok(tokens)
    }

    /// Obtain a new access token with the held refresh token, joining the
    /// refresh already in flight if there is one.
    ///
    /// A failed refresh ends the session: the tokens are dropped, the
    /// store is cleared and the controller signs out with
    /// [`SignOutReason::SessionExpired`] before the error is returned.
    pub async fn refresh(self: &Arc<Self>) -> ClientResult<TokenPair> {
        let in_flight = {
            let mut slot = self.refresh_slot.lock().await;
            self.join_or_start_refresh(&mut slot)
        };
        self.await_refresh(in_flight).await
    }

    /// Access token to attach to a request, refreshed first when it has
    /// less than `threshold` left. `None` when signed out.
    pub async fn fresh_access_token(
        self: &Arc<Self>,
        threshold: Duration,
    ) -> ClientResult<Option<String>> {
        // The expiry check and the slot inspection share one critical
        // section, so a second refresh cannot start while one is running.
        let in_flight = {
            let mut slot = self.refresh_slot.lock().await;

            let Some(tokens) = self.tokens().await else {
                return Ok(None);
            };
            if !self.clock.needs_refresh(&tokens.access, threshold) {
                return Ok(Some(tokens.access));
            }
            self.join_or_start_refresh(&mut slot)
        };

        let tokens = self.await_refresh(in_flight).await?;
        Ok(Some(tokens.access))
    }

    fn join_or_start_refresh(
        self: &Arc<Self>,
        slot: &mut Option<InFlightRefresh>,
    ) -> InFlightRefresh {
        if let Some(in_flight) = slot.as_ref().filter(|f| f.future.peek().is_none()) {
            debug!(generation = in_flight.generation, "Joining in-flight refresh");
            return in_flight.clone();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Starting token refresh");

        let auth = Arc::clone(self);
        let future = async move { auth.run_refresh().await }.boxed().shared();
        let in_flight = InFlightRefresh { generation, future };
        *slot = Some(in_flight.clone());
        in_flight
    }

    async fn await_refresh(&self, in_flight: InFlightRefresh) -> ClientResult<TokenPair> {
        let result = in_flight.future.await;

        let mut slot = self.refresh_slot.lock().await;
        if slot.as_ref().map(|f| f.generation) == Some(in_flight.generation) {
            *slot = None;
        }
        result
    }

    async fn run_refresh(&self) -> ClientResult<TokenPair> {
        let url = self.config.endpoint_url(&self.config.endpoints.refresh)?;
        let Some(current) = self.tokens().await else {
            return Err(ClientError::RefreshFailed(
                "no refresh token held".to_string(),
            ));
        };

        self.session.begin_refresh().await;
        let outcome = self.request_refresh(&url, &current).await;

        let mut held = self.tokens.write().await;
        if held.as_ref() != Some(&current) {
            // A login or logout finished while the refresh was in flight
            debug!("Session changed during refresh, discarding result");
            return held.clone().ok_or_else(|| {
                ClientError::RefreshFailed("session ended during refresh".to_string())
            });
        }

        match outcome {
            Ok((user, tokens)) => {
                *held = Some(tokens.clone());
                self.persist(&tokens).await;
                self.session.refreshed(user, tokens.clone()).await;
                info!("Access token refreshed");
                Ok(tokens)
            }
            Err(err) if self.session.is_session_fatal(&err) => {
                let taken = held.take();
                drop(held);

                error!(error = %err, "Token refresh failed, ending session");
                self.finish_sign_out(taken, SignOutReason::SessionExpired)
                    .await;
                Err(err)
            }
            Err(err) => {
                drop(held);
                self.session.refresh_aborted().await;
                Err(err)
            }
        }
    }

    /// Sign out. Always succeeds locally, even when the backend is
    /// unreachable.
    pub async fn logout(&self) {
        self.sign_out(SignOutReason::UserLogout).await;
    }

    /// Rebuild the session from the token store after a restart.
    ///
    /// A valid access token signs in without touching the network. An
    /// expired access token with a live refresh token costs exactly one
    /// refresh. Anything else clears the store.
    pub async fn initialize(self: &Arc<Self>) -> SessionStatus {
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Token store unreadable, starting signed out");
                None
            }
        };

        let Some(stored) = stored else {
            debug!("No stored session");
            return SessionStatus::SignedOut;
        };

        if !self.clock.is_expired(&stored.access) {
            match SessionUser::from_access_token(&stored.access) {
                Ok(user) => {
                    info!(user_id = %user.id, "Restored session from token store");
                    *self.tokens.write().await = Some(stored.clone());
                    self.session.signed_in(user, stored).await;
                    return SessionStatus::SignedIn;
                }
                Err(e) => warn!(error = %e, "Stored access token has no usable claims"),
            }
        }

        if self.clock.is_expired(&stored.refresh) {
            info!("Stored session has expired");
            self.clear_store().await;
            self.session.signed_out(SignOutReason::SessionExpired).await;
            return SessionStatus::SignedOut;
        }

        debug!("Stored access token expired, refreshing");
        *self.tokens.write().await = Some(stored);
        match self.refresh().await {
            Ok(_) => SessionStatus::SignedIn,
            Err(e) => {
                warn!(error = %e, "Could not restore session");
                SessionStatus::SignedOut
            }
        }
    }

    async fn request_refresh(
        &self,
        url: &str,
        current: &TokenPair,
    ) -> ClientResult<(SessionUser, TokenPair)> {
        let body = json!({ "refresh": current.refresh }).to_string();

        let response = with_retry_if(
            || self.post_refresh(url, &body),
            &self.config.refresh_retry,
            "Token refresh",
            |err: &ClientError| match err {
                ClientError::UnexpectedStatus { status, .. } => *status >= 500,
                other => other.is_retryable(),
            },
        )
        .await
        .map_err(|err| match err {
            ClientError::RefreshFailed(_) => err,
            other => ClientError::RefreshFailed(other.to_string()),
        })?;

        let parsed: RefreshResponse = response
            .json()
            .map_err(|e| ClientError::RefreshFailed(format!("invalid refresh response: {e}")))?;
        let tokens = current.rotate(parsed.access, parsed.refresh);
        let user = SessionUser::from_access_token(&tokens.access)
            .map_err(|e| ClientError::RefreshFailed(format!("invalid access token: {e}")))?;

        Ok((user, tokens))
    }

    async fn post_refresh(&self, url: &str, body: &str) -> ClientResult<SimpleHttpResponse> {
        let response = self
            .http
            .post(url, Some(json_headers()), Some(body.to_string()))
            .await
            .map_err(ClientError::unreachable)?;

        if response.is_success() {
            Ok(response)
        } else if response.is_server_error() {
            Err(unexpected_status(&response))
        } else {
            let detail = response
                .detail()
                .unwrap_or_else(|| "refresh token rejected".to_string());
            Err(ClientError::RefreshFailed(format!(
                "{detail} ({})",
                response.status.as_u16()
            )))
        }
    }

    async fn sign_out(&self, reason: SignOutReason) {
        let taken = self.tokens.write().await.take();
        self.finish_sign_out(taken, reason).await;
    }

    async fn finish_sign_out(&self, taken: Option<TokenPair>, reason: SignOutReason) {
        if let Some(tokens) = taken {
            self.revoke(&tokens).await;
        }
        self.clear_store().await;
        self.session.signed_out(reason).await;
    }

    /// Best-effort server-side logout; failures are only logged
    async fn revoke(&self, tokens: &TokenPair) {
        let url = match self.config.endpoint_url(&self.config.endpoints.logout) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Skipping logout call");
                return;
            }
        };

        let mut headers = json_headers();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", tokens.access),
        );
        let body = json!({ "refresh": tokens.refresh }).to_string();

        match self.http.post(&url, Some(headers), Some(body)).await {
            Ok(response) if response.is_success() => debug!("Refresh token revoked"),
            Ok(response) => warn!(status = %response.status, "Logout call rejected"),
            Err(e) => warn!(error = %e, "Logout call failed"),
        }
    }

    async fn persist(&self, tokens: &TokenPair) {
        if let Err(e) = self.store.save(tokens).await {
            warn!(error = %e, "Failed to persist tokens, session will not survive a restart");
        }
    }

    async fn clear_store(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear token store");
        }
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.config.base_url)
            .field("session", &self.session)
            .finish()
    }
}

fn unexpected_status(response: &SimpleHttpResponse) -> ClientError {
    ClientError::UnexpectedStatus {
        status: response.status.as_u16(),
        detail: response
            .detail()
            .unwrap_or_else(|| response.status.to_string()),
    }
}
