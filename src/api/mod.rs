//! Request pipeline
//!
//! Every backend call made on behalf of the signed-in user goes through
//! [`ApiClient`]. Before dispatch it checks the access token's remaining
//! lifetime and refreshes it first when it is inside the refresh window.
//! Concurrent callers share the auth client's single in-flight refresh.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::client::json_headers;
use crate::auth::{AuthClient, SessionController};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Successful response to a pipeline request
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    /// Correlation id sent with the request
    pub request_id: String,
}

impl ApiResponse {
    /// Decode the body. An empty body decodes as JSON `null`.
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Authenticated HTTP client handed to every screen. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    auth: Arc<AuthClient>,
}

impl ApiClient {
    pub fn new(auth: Arc<AuthClient>) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &Arc<AuthClient> {
        &self.auth
    }

    pub fn config(&self) -> &ClientConfig {
        self.auth.config()
    }

    pub fn session(&self) -> &Arc<SessionController> {
        self.auth.session()
    }

    /// Send a request to `path` (relative to the base URL, or absolute).
    ///
    /// Non-2xx answers become [`ClientError::Api`]. Requests are never
    /// retried here.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ClientResult<ApiResponse> {
        let url = self.config().endpoint_url(path)?;
        let access = self.authorize().await?;

        let request_id = Uuid::new_v4().to_string();
        let mut headers = json_headers();
        headers.insert(REQUEST_ID_HEADER.to_string(), request_id.clone());
        if let Some(access) = &access {
            headers.insert("Authorization".to_string(), format!("Bearer {access}"));
        }

        debug!(
            method = %method,
            path,
            request_id = %request_id,
            authenticated = access.is_some(),
            "Dispatching request"
        );

        let response = self
            .auth
            .http()
            .request(
                method.as_str(),
                &url,
                Some(headers),
                body.map(|b| b.to_string()),
            )
            .await
            .map_err(|e| {
                warn!(path, request_id = %request_id, error = %e, "Request failed");
                ClientError::unreachable(e)
            })?;

        if !response.is_success() {
            let status = response.status.as_u16();
            debug!(path, status, request_id = %request_id, "Request rejected");
            return Err(ClientError::Api {
                status,
                detail: response
                    .detail()
                    .unwrap_or_else(|| response.status.to_string()),
            });
        }

        Ok(ApiResponse {
            status: response.status.as_u16(),
            body: response.body,
            request_id,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send(Method::GET, path, None).await?.json()
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        self.send(Method::POST, path, Some(encode(body)?))
            .await?
            .json()
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        self.send(Method::PUT, path, Some(encode(body)?))
            .await?
            .json()
    }

    pub async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        self.send(Method::PATCH, path, Some(encode(body)?))
            .await?
            .json()
    }

    pub async fn delete(&self, path: &str) -> ClientResult<()> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }

    /// Access token to attach, refreshing it first when it is about to
    /// expire. `None` means dispatch unauthenticated.
    async fn authorize(&self) -> ClientResult<Option<String>> {
        let threshold = self.config().refresh_threshold();

        match self.auth.fresh_access_token(threshold).await {
            Ok(access) => Ok(access),
            // The auth client has already signed the session out
            Err(err) if self.session().is_session_fatal(&err) => Err(ClientError::SessionExpired),
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config().base_url)
            .finish()
    }
}

fn encode<B: Serialize>(body: &B) -> ClientResult<Value> {
    serde_json::to_value(body)
        .map_err(|e| ClientError::Decode(format!("failed to encode request body: {e}")))
}
