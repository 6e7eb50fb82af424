//! Restoring a session from the token store at startup

use shopdesk_lib::{SessionEvent, SessionStatus, SignOutReason, TokenPair, TokenStore};

use crate::test_harness::{mint_token, statuses, token_pair, TestEnvironment};

#[tokio::test]
async fn test_valid_tokens_restore_without_network() {
    let stored = token_pair(900, 86_400);
    let mut env = TestEnvironment::with_stored(&stored).await;
    let refresh = env.mock_refresh(&stored.refresh, "unused", 0).await;

    let mut events = env.client.subscribe();
    let status = env.client.initialize().await;

    assert_eq!(status, SessionStatus::SignedIn);
    refresh.assert_async().await;
    assert_eq!(env.client.auth().tokens().await, Some(stored));
    assert_eq!(statuses(&mut events), vec![SessionStatus::SignedIn]);
    assert_eq!(
        env.client.session().user().await.and_then(|u| u.username),
        Some("amina".to_string())
    );
}

#[tokio::test]
async fn test_expired_access_refreshes_exactly_once() {
    let stored = token_pair(-120, 86_400);
    let new_access = mint_token("access", 900);
    let mut env = TestEnvironment::with_stored(&stored).await;
    let refresh = env.mock_refresh(&stored.refresh, &new_access, 1).await;

    let mut events = env.client.subscribe();
    let status = env.client.initialize().await;

    assert_eq!(status, SessionStatus::SignedIn);
    refresh.assert_async().await;
    assert_eq!(
        env.store.load().await.unwrap(),
        Some(TokenPair::new(new_access, stored.refresh))
    );

    let events = events.drain();
    assert!(events.contains(&SessionEvent::Refreshed));
    assert!(!events.contains(&SessionEvent::Expired));
}

#[tokio::test]
async fn test_fully_expired_session_is_cleared() {
    let stored = token_pair(-3_600, -60);
    let mut env = TestEnvironment::with_stored(&stored).await;
    let refresh = env.mock_refresh(&stored.refresh, "unused", 0).await;

    let mut events = env.client.subscribe();
    let status = env.client.initialize().await;

    assert_eq!(status, SessionStatus::SignedOut);
    refresh.assert_async().await;
    assert!(env.store.load().await.unwrap().is_none());
    assert_eq!(
        events.drain(),
        vec![
            SessionEvent::SignedOut {
                reason: SignOutReason::SessionExpired
            },
            SessionEvent::Expired,
        ]
    );
}

#[tokio::test]
async fn test_garbage_in_store_is_cleared() {
    let stored = TokenPair::new("garbage", "also-garbage");
    let mut env = TestEnvironment::with_stored(&stored).await;
    let refresh = env.mock_refresh("also-garbage", "unused", 0).await;

    assert_eq!(env.client.initialize().await, SessionStatus::SignedOut);
    refresh.assert_async().await;
    assert!(env.store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_revoked_refresh_at_startup_signs_out() {
    let stored = token_pair(-120, 86_400);
    let mut env = TestEnvironment::with_stored(&stored).await;
    let refresh = env.mock_refresh_rejected(1).await;

    let mut events = env.client.subscribe();
    let status = env.client.initialize().await;

    assert_eq!(status, SessionStatus::SignedOut);
    refresh.assert_async().await;
    assert!(env.store.load().await.unwrap().is_none());
    assert!(events.drain().contains(&SessionEvent::Expired));
}

#[tokio::test]
async fn test_empty_store_starts_signed_out_quietly() {
    let env = TestEnvironment::new().await;
    let mut events = env.client.subscribe();

    assert_eq!(env.client.initialize().await, SessionStatus::SignedOut);
    assert!(events.drain().is_empty());
}
