//! Proactive refresh in the request pipeline

use futures::future::join_all;
use mockito::Matcher;
use serde_json::Value;

use shopdesk_lib::{ClientError, Credentials, SessionEvent, SessionStatus, TokenStore, UserNotice};

use crate::test_harness::{mint_token, statuses, token_pair, TestEnvironment};

#[tokio::test]
async fn test_three_simultaneous_calls_share_one_refresh() {
    let tokens = token_pair(200, 86_400);
    let new_access = mint_token("access", 900);
    let mut env = TestEnvironment::new().await;

    let _login = env.mock_login(&tokens).await;
    let refresh = env.mock_refresh(&tokens.refresh, &new_access, 1).await;
    let sales = env
        .mock_authorized_get("/api/sales/", &new_access, r#"[{"id": 1, "amount": "120.00"}]"#, 3)
        .await;

    let mut events = env.client.subscribe();
    env.client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap();

    let api = env.client.api();
    let (a, b, c) = tokio::join!(
        api.get_json::<Vec<Value>>("sales/"),
        api.get_json::<Vec<Value>>("sales/"),
        api.get_json::<Vec<Value>>("sales/"),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    refresh.assert_async().await;
    sales.assert_async().await;
    assert_eq!(
        statuses(&mut events),
        vec![
            SessionStatus::SignedIn,
            SessionStatus::Refreshing,
            SessionStatus::SignedIn
        ]
    );
    assert_eq!(
        env.store.load().await.unwrap().map(|t| t.access),
        Some(new_access)
    );
}

#[tokio::test]
async fn test_many_concurrent_calls_refresh_once() {
    let tokens = token_pair(30, 86_400);
    let new_access = mint_token("access", 900);
    let mut env = TestEnvironment::new().await;

    let _login = env.mock_login(&tokens).await;
    let refresh = env.mock_refresh(&tokens.refresh, &new_access, 1).await;
    let shops = env
        .mock_authorized_get("/api/shops/", &new_access, "[]", 8)
        .await;

    env.client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap();

    let calls = (0..8).map(|_| {
        let api = env.client.api().clone();
        tokio::spawn(async move { api.get_json::<Vec<Value>>("shops/").await })
    });
    for result in join_all(calls).await {
        assert!(result.unwrap().is_ok());
    }

    refresh.assert_async().await;
    shops.assert_async().await;
}

#[tokio::test]
async fn test_fresh_token_skips_refresh() {
    let tokens = token_pair(900, 86_400);
    let mut env = TestEnvironment::new().await;

    let _login = env.mock_login(&tokens).await;
    let refresh = env.mock_refresh(&tokens.refresh, "unused", 0).await;
    let shops = env
        .mock_authorized_get("/api/shops/", &tokens.access, "[]", 2)
        .await;

    env.client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap();
    env.client.api().get_json::<Vec<Value>>("shops/").await.unwrap();
    env.client.api().get_json::<Vec<Value>>("shops/").await.unwrap();

    refresh.assert_async().await;
    shops.assert_async().await;
}

#[tokio::test]
async fn test_rejected_refresh_forces_logout() {
    let tokens = token_pair(100, 86_400);
    let mut env = TestEnvironment::new().await;

    let _login = env.mock_login(&tokens).await;
    let refresh = env.mock_refresh_rejected(1).await;
    let budgets = env
        .server
        .mock("GET", "/api/budgets/")
        .expect(0)
        .create_async()
        .await;

    env.client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap();
    let mut events = env.client.subscribe();

    let err = env
        .client
        .api()
        .get_json::<Vec<Value>>("budgets/")
        .await
        .unwrap_err();

    assert_eq!(err, ClientError::SessionExpired);
    assert_eq!(err.user_notice(), UserNotice::RedirectToLogin);
    refresh.assert_async().await;
    budgets.assert_async().await;

    assert!(env.store.load().await.unwrap().is_none());
    assert!(env.client.auth().tokens().await.is_none());
    assert_eq!(env.client.session().status().await, SessionStatus::SignedOut);
    assert!(events.drain().contains(&SessionEvent::Expired));
}

#[tokio::test]
async fn test_signed_out_requests_carry_no_token() {
    let mut env = TestEnvironment::new().await;
    let public = env
        .server
        .mock("GET", "/api/shops/public/")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    env.client
        .api()
        .get_json::<Vec<Value>>("shops/public/")
        .await
        .unwrap();

    public.assert_async().await;
}

#[tokio::test]
async fn test_downstream_rejection_keeps_session() {
    let tokens = token_pair(900, 86_400);
    let mut env = TestEnvironment::new().await;

    let _login = env.mock_login(&tokens).await;
    let _leases = env
        .server
        .mock("DELETE", "/api/leases/4/")
        .with_status(403)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail": "You do not have permission to perform this action."}"#)
        .create_async()
        .await;

    env.client
        .login(&Credentials::new("amina", "hunter2"))
        .await
        .unwrap();
    let err = env.client.api().delete("leases/4/").await.unwrap_err();

    assert_eq!(
        err,
        ClientError::Api {
            status: 403,
            detail: "You do not have permission to perform this action.".into()
        }
    );
    assert_eq!(env.client.session().status().await, SessionStatus::SignedIn);
}
