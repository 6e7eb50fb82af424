use std::sync::Arc;

use tracing::{info, warn};

// Export modules
pub mod api;
pub mod auth;
pub mod common;
pub mod config;
pub mod error;
pub mod events;
pub mod http_client;
pub mod profile;

pub use api::{ApiClient, ApiResponse};
pub use auth::{
    AuthClient, Credentials, FileTokenStore, MemoryTokenStore, Role, SessionController,
    SessionState, SessionUser, TokenClock, TokenPair, TokenStore,
};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, ErrorCategory, UserNotice};
pub use events::{SessionEvent, SessionStatus, SignOutReason, Subscriber};
pub use http_client::{HttpClient, ReqwestHttpClient};
pub use profile::{fetch_profile, Profile};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The assembled session stack: controller, auth client and request
/// pipeline sharing one configuration.
#[derive(Clone, Debug)]
pub struct SessionClient {
    auth: Arc<AuthClient>,
    api: ApiClient,
}

impl SessionClient {
    /// Build the stack with the reqwest transport and the file token store
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;

        let http = ReqwestHttpClient::with_timeout(config.request_timeout())
            .map_err(|e| ClientError::Config(format!("{e:#}")))?;

        let store: Arc<dyn TokenStore> = match config.resolved_token_store_path() {
            Some(path) => {
                info!(path = %path.display(), "Using file token store");
                Arc::new(FileTokenStore::new(path))
            }
            None => {
                warn!("No config directory available, tokens will not persist");
                Arc::new(MemoryTokenStore::new())
            }
        };

        Self::with_parts(config, Arc::new(http), store)
    }

    /// Build the stack from explicit parts
    pub fn with_parts(
        config: ClientConfig,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn TokenStore>,
    ) -> ClientResult<Self> {
        config.validate()?;

        let session = Arc::new(SessionController::new());
        let auth = Arc::new(AuthClient::new(Arc::new(config), http, store, session));
        let api = ApiClient::new(Arc::clone(&auth));

        Ok(Self { auth, api })
    }

    /// Restore any stored session. Call once at startup.
    pub async fn initialize(&self) -> SessionStatus {
        self.auth.initialize().await
    }

    pub async fn login(&self, credentials: &Credentials) -> ClientResult<TokenPair> {
        self.auth.login(credentials).await
    }

    pub async fn logout(&self) {
        self.auth.logout().await
    }

    pub fn auth(&self) -> &Arc<AuthClient> {
        &self.auth
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionController> {
        self.auth.session()
    }

    pub fn config(&self) -> &ClientConfig {
        self.auth.config()
    }

    pub fn subscribe(&self) -> Subscriber<SessionEvent> {
        self.session().subscribe()
    }
}
