//! Integration tests for the account collection
//!
//! Covers:
//! - Index addressing after removals
//! - Restoring countdowns across restarts
//! - Recovery from a corrupted store
//! - Access token probing

mod common;

use common::{drain, form_value, Harness, START};
use core_auth::AuthError;
use core_runtime::events::{AuthEvent, CoreEvent};
use serde_json::json;

#[tokio::test]
async fn test_remove_shifts_following_accounts() {
    let harness = Harness::new();
    let manager = harness.manager();
    for name in ["alice", "bob", "carol"] {
        harness.login(&manager, name, 300, 1800).await;
    }
    let mut events = manager.events().subscribe();

    let removed = manager.remove_account(1).await.unwrap().unwrap();
    assert_eq!(removed.display_name(), "bob");
    assert_eq!(
        drain(&mut events),
        vec![CoreEvent::Auth(AuthEvent::AccountRemoved {
            account_id: removed.id.to_string(),
        })]
    );

    assert_eq!(manager.account(1).await.unwrap().display_name(), "carol");
    assert_eq!(harness.settings.stored_accounts().len(), 2);

    harness.http.reply_tokens("carol-access-2", None, 300, 1800);
    harness.http.reply_profile("carol");
    let tokens = manager.refresh(1).await.unwrap();

    let request = harness.http.token_requests().pop().unwrap();
    assert_eq!(form_value(&request, "refresh_token").as_deref(), Some("carol-refresh"));
    assert_eq!(tokens.access_token, "carol-access-2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("carol-refresh"));
    assert_eq!(
        manager.account(0).await.unwrap().tokens.access_token,
        "alice-access"
    );
}

#[tokio::test]
async fn test_remove_out_of_range_is_noop() {
    let harness = Harness::new();
    let manager = harness.manager();
    harness.login(&manager, "alice", 300, 1800).await;

    assert!(manager.remove_account(5).await.unwrap().is_none());
    assert_eq!(manager.accounts().await.len(), 1);
    assert!(matches!(
        manager.refresh(5).await,
        Err(AuthError::AccountNotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_cancels_timers() {
    let harness = Harness::new();
    let manager = harness.manager();
    harness.login(&manager, "alice", 300, 1800).await;
    manager.start_auto_refresh(0, 5).await.unwrap();
    assert_eq!(harness.scheduler.active(), 2);

    manager.remove_account(0).await.unwrap();
    assert_eq!(harness.scheduler.active(), 0);

    harness.advance(600).await;
    assert_eq!(harness.http.token_requests().len(), 1);
}

#[tokio::test]
async fn test_restart_keeps_original_deadlines() {
    let harness = Harness::new();
    {
        let manager = harness.manager();
        harness.login(&manager, "alice", 300, 1800).await;
    }
    assert_eq!(harness.scheduler.active(), 0);

    harness.clock.advance(std::time::Duration::from_secs(100));

    let manager = harness.manager();
    assert_eq!(manager.initialize().await.unwrap(), 1);

    let countdown = manager.countdown(0).await.unwrap();
    assert_eq!(countdown.access_remaining, 200);
    assert_eq!(countdown.refresh_remaining, Some(1700));
    assert_eq!(manager.account(0).await.unwrap().display_name(), "alice");
}

#[tokio::test]
async fn test_legacy_entry_is_stamped_on_load() {
    let harness = Harness::new();
    let legacy = json!([{
        "tokens": {
            "access_token": "old-access",
            "refresh_token": "old-refresh",
            "expires_in": 600,
        },
        "profile": { "preferred_username": "dave" },
    }]);
    harness
        .settings
        .insert_raw("kc_accounts", &legacy.to_string());

    let manager = harness.manager();
    assert_eq!(manager.initialize().await.unwrap(), 1);

    let account = manager.account(0).await.unwrap();
    assert_eq!(account.display_name(), "dave");
    assert_eq!(account.tokens.token_type, "Bearer");
    assert_eq!(account.issued_at.unwrap().timestamp(), START);

    let countdown = manager.countdown(0).await.unwrap();
    assert_eq!(countdown.access_remaining, 600);
    assert_eq!(countdown.refresh_remaining, None);

    let stored = harness.settings.stored_accounts();
    assert!(stored[0]["issued_at"].is_string());
    assert_eq!(stored[0]["id"], json!(account.id.to_string()));
}

#[tokio::test]
async fn test_corrupted_store_starts_empty() {
    let harness = Harness::new();
    harness.settings.insert_raw("kc_accounts", "{not json");

    let manager = harness.manager();
    let mut events = manager.events().subscribe();

    assert_eq!(manager.initialize().await.unwrap(), 0);
    assert!(manager.accounts().await.is_empty());
    assert_eq!(harness.settings.raw("kc_accounts"), None);
    assert!(matches!(
        drain(&mut events).as_slice(),
        [CoreEvent::Auth(AuthEvent::Error {
            account_id: None,
            recoverable: false,
            ..
        })]
    ));

    harness.login(&manager, "alice", 300, 1800).await;
    assert_eq!(harness.settings.stored_accounts().len(), 1);
}

#[tokio::test]
async fn test_probe_reports_without_touching_deadlines() {
    let harness = Harness::new();
    let manager = harness.manager();
    harness.login(&manager, "alice", 300, 1800).await;
    let before = manager.countdown(0).await.unwrap();

    harness.http.reply_profile("alice");
    let probe = manager.probe(0).await.unwrap();
    assert!(probe.valid);
    assert_eq!(probe.status, 200);

    harness.http.reply(401, "");
    let probe = manager.probe(0).await.unwrap();
    assert!(!probe.valid);
    assert_eq!(probe.status, 401);

    let request = harness.http.requests().pop().unwrap();
    assert!(request.url.ends_with("/protocol/openid-connect/userinfo"));
    assert_eq!(
        request.headers.get("Authorization").map(String::as_str),
        Some("Bearer alice-access")
    );
    assert_eq!(manager.countdown(0).await.unwrap(), before);

    assert!(matches!(
        manager.probe(0).await,
        Err(AuthError::Network(_))
    ));
}
