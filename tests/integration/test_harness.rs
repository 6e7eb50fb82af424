//! Integration test harness for the session client
//! Provides a mock backend, token minting and a client wired to both

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use tempfile::TempDir;

use shopdesk_lib::common::RetryPolicy;
use shopdesk_lib::{
    ClientConfig, FileTokenStore, SessionClient, SessionEvent, SessionStatus, Subscriber,
    TokenPair, TokenStore,
};

const SIGNING_KEY: &[u8] = b"test-signing-key";

/// Mint an HS256 token that expires `expires_in` seconds from now
pub fn mint_token(token_type: &str, expires_in: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "token_type": token_type,
        "exp": now + expires_in,
        "iat": now,
        "jti": uuid::Uuid::new_v4().simple().to_string(),
        "user_id": 12,
        "username": "amina",
        "role": "SELLERS",
    });

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SIGNING_KEY),
    )
    .expect("Failed to mint token")
}

/// Access and refresh tokens with the given lifetimes
pub fn token_pair(access_expires_in: i64, refresh_expires_in: i64) -> TokenPair {
    TokenPair::new(
        mint_token("access", access_expires_in),
        mint_token("refresh", refresh_expires_in),
    )
}

/// Statuses carried by the events a subscriber has received so far
pub fn statuses(subscriber: &mut Subscriber<SessionEvent>) -> Vec<SessionStatus> {
    subscriber
        .drain()
        .iter()
        .filter_map(SessionEvent::status)
        .collect()
}

/// Test environment: a mock backend, a file token store in a temp dir and a
/// session client pointed at both
pub struct TestEnvironment {
    /// Mock backend
    pub server: ServerGuard,
    /// Client under test
    pub client: SessionClient,
    /// The same token file the client uses
    pub store: Arc<FileTokenStore>,
    _dir: TempDir,
}

impl TestEnvironment {
    /// Create a new test environment with an empty token store
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Create a test environment whose token store already holds `tokens`
    pub async fn with_stored(tokens: &TokenPair) -> Self {
        Self::build(Some(tokens)).await
    }

    async fn build(stored: Option<&TokenPair>) -> Self {
        let server = Server::new_async().await;
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("session.json");

        let store = Arc::new(FileTokenStore::new(&path));
        if let Some(tokens) = stored {
            store.save(tokens).await.expect("Failed to seed token store");
        }

        let mut config = ClientConfig::with_base_url(format!("{}/api/", server.url()));
        config.token_store_path = Some(path);
        config.request_timeout_secs = 5;
        config.refresh_retry = RetryPolicy::fixed_delay(1, Duration::from_millis(5));

        let client = SessionClient::new(config).expect("Failed to build client");

        Self {
            server,
            client,
            store,
            _dir: dir,
        }
    }

    /// Login succeeds for any credentials and issues `tokens`
    pub async fn mock_login(&mut self, tokens: &TokenPair) -> Mock {
        self.server
            .mock("POST", "/api/token/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "access": tokens.access, "refresh": tokens.refresh }).to_string())
            .create_async()
            .await
    }

    /// Refresh with `refresh` succeeds `hits` times and returns `access`
    pub async fn mock_refresh(&mut self, refresh: &str, access: &str, hits: usize) -> Mock {
        self.server
            .mock("POST", "/api/token/refresh/")
            .match_body(Matcher::PartialJson(json!({ "refresh": refresh })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "access": access }).to_string())
            .expect(hits)
            .create_async()
            .await
    }

    /// Refresh is rejected the way the backend rejects a blacklisted token
    pub async fn mock_refresh_rejected(&mut self, hits: usize) -> Mock {
        self.server
            .mock("POST", "/api/token/refresh/")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail": "Token is invalid or expired", "code": "token_not_valid"}"#)
            .expect(hits)
            .create_async()
            .await
    }

    /// GET `path` answers `body` only when it carries `Bearer <access>`
    pub async fn mock_authorized_get(
        &mut self,
        path: &str,
        access: &str,
        body: &str,
        hits: usize,
    ) -> Mock {
        self.server
            .mock("GET", path)
            .match_header("authorization", format!("Bearer {access}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }
}
