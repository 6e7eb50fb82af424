//! Login and logout against a mock backend

use mockito::Matcher;
use serde_json::json;

use shopdesk_lib::{
    ClientConfig, ClientError, Credentials, SessionClient, SessionEvent, SessionStatus,
    SignOutReason, TokenStore, UserNotice,
};

use crate::test_harness::{token_pair, TestEnvironment};

#[tokio::test]
async fn test_login_persists_and_signs_in() {
    let tokens = token_pair(900, 86_400);
    let mut env = TestEnvironment::new().await;

    let login = env
        .server
        .mock("POST", "/api/token/")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "username": "amina",
            "password": "hunter2"
        })))
        .with_status(200)
        .with_body(json!({ "access": tokens.access, "refresh": tokens.refresh }).to_string())
        .expect(1)
        .create_async()
        .await;

    let mut events = env.client.subscribe();
    let issued = env
        .client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap();

    login.assert_async().await;
    assert_eq!(issued, tokens);
    assert_eq!(env.store.load().await.unwrap(), Some(tokens));
    assert_eq!(env.client.session().status().await, SessionStatus::SignedIn);

    let user = env.client.session().user().await.unwrap();
    assert_eq!(user.id, "12");
    assert_eq!(
        user.role.map(|r| r.landing_route()),
        Some("/sellersDashboard")
    );
    assert_eq!(
        events.drain(),
        vec![SessionEvent::StateChanged {
            status: SessionStatus::SignedIn
        }]
    );
}

#[tokio::test]
async fn test_bad_credentials_surface_backend_detail() {
    let mut env = TestEnvironment::new().await;
    let _login = env
        .server
        .mock("POST", "/api/token/")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail": "No active account found with the given credentials"}"#)
        .create_async()
        .await;

    let err = env
        .client
        .login(&Credentials::new("amina", "wrong"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClientError::InvalidCredentials {
            detail: "No active account found with the given credentials".into()
        }
    );
    assert_eq!(err.user_notice(), UserNotice::InlineFormError);
    assert_eq!(env.client.session().status().await, SessionStatus::SignedOut);
    assert!(env.store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_second_login_fully_replaces_first() {
    let first = token_pair(900, 86_400);
    let second = token_pair(900, 86_400);
    let mut env = TestEnvironment::new().await;
    let creds = Credentials::new("amina", "hunter2");

    let login = env.mock_login(&first).await;
    env.client.login(&creds).await.unwrap();
    login.remove_async().await;

    let _login = env.mock_login(&second).await;
    env.client.login(&creds).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(env.store.load().await.unwrap(), Some(second.clone()));
    assert_eq!(env.client.auth().tokens().await, Some(second.clone()));
    match env.client.session().current().await {
        shopdesk_lib::SessionState::SignedIn { tokens, .. } => assert_eq!(tokens, second),
        other => panic!("expected signed in, got {other:?}"),
    }
}

#[tokio::test]
async fn test_logout_blacklists_refresh_token_and_clears_store() {
    let tokens = token_pair(900, 86_400);
    let mut env = TestEnvironment::new().await;
    let _login = env.mock_login(&tokens).await;
    let logout = env
        .server
        .mock("POST", "/api/logout/")
        .match_body(Matcher::Json(json!({ "refresh": tokens.refresh })))
        .with_status(205)
        .expect(1)
        .create_async()
        .await;

    env.client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap();
    let mut events = env.client.subscribe();

    env.client.logout().await;

    logout.assert_async().await;
    assert!(env.store.load().await.unwrap().is_none());
    assert!(!env.store.path().exists());
    assert_eq!(env.client.session().status().await, SessionStatus::SignedOut);
    assert_eq!(
        events.drain(),
        vec![
            SessionEvent::StateChanged {
                status: SessionStatus::SignedOut
            },
            SessionEvent::SignedOut {
                reason: SignOutReason::UserLogout
            },
        ]
    );
}

#[tokio::test]
async fn test_logout_succeeds_when_backend_fails() {
    let tokens = token_pair(900, 86_400);
    let mut env = TestEnvironment::new().await;
    let _login = env.mock_login(&tokens).await;
    let _logout = env
        .server
        .mock("POST", "/api/logout/")
        .with_status(500)
        .with_body("<h1>Server Error (500)</h1>")
        .create_async()
        .await;

    env.client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap();
    env.client.logout().await;

    assert!(env.store.load().await.unwrap().is_none());
    assert_eq!(env.client.session().status().await, SessionStatus::SignedOut);
}

#[tokio::test]
async fn test_unreachable_backend_leaves_session_alone() {
    // Nothing listens on port 1
    let mut config = ClientConfig::with_base_url("http://127.0.0.1:1/api/");
    let dir = tempfile::tempdir().unwrap();
    config.token_store_path = Some(dir.path().join("session.json"));
    let client = SessionClient::new(config).unwrap();

    let err = client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Unreachable(_)));
    assert!(err.is_retryable());
    assert_eq!(client.session().status().await, SessionStatus::SignedOut);

    // Logging out offline still works
    client.logout().await;
    assert_eq!(client.session().status().await, SessionStatus::SignedOut);
}
