// SPDX-License-Identifier: MIT

//! OAuth state store tests.
//!
//! The state nonce is the CSRF/replay defense for the whole connect flow:
//! it must be single-use even under concurrent callback attempts.

use fitlink::services::OAuthStateStore;
use std::sync::Arc;

#[test]
fn test_consume_returns_bound_attempt() {
    let store = OAuthStateStore::new();
    let nonce = store.insert(
        "user-42",
        "verifier-abc".to_string(),
        "https://api.example.com/auth/fitbit/callback".to_string(),
    );

    let pending = store.consume(&nonce).expect("fresh state should be valid");
    assert_eq!(pending.user_id, "user-42");
    assert_eq!(pending.code_verifier, "verifier-abc");
    assert_eq!(
        pending.redirect_uri,
        "https://api.example.com/auth/fitbit/callback"
    );
}

#[test]
fn test_replay_always_fails() {
    let store = OAuthStateStore::new();
    let nonce = store.insert("user-1", "v".to_string(), "r".to_string());

    assert!(store.consume(&nonce).is_some());
    assert!(store.consume(&nonce).is_none());
    assert!(store.consume(&nonce).is_none());
}

#[test]
fn test_unknown_and_empty_state_rejected() {
    let store = OAuthStateStore::new();
    assert!(store.consume("").is_none());
    assert!(store.consume("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").is_none());
}

#[test]
fn test_nonce_is_url_safe_and_unguessable_length() {
    let store = OAuthStateStore::new();
    let nonce = store.insert("u", "v".to_string(), "r".to_string());

    // 32 bytes of entropy, base64url without padding
    assert_eq!(nonce.len(), 43);
    assert!(!nonce.contains('+'));
    assert!(!nonce.contains('/'));
    assert!(!nonce.contains('='));
}

/// Two concurrent callbacks racing on the same nonce: exactly one wins.
#[tokio::test]
async fn test_concurrent_consumption_single_winner() {
    let store = Arc::new(OAuthStateStore::new());

    for _ in 0..50 {
        let nonce = store.insert("user-1", "v".to_string(), "r".to_string());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let nonce = nonce.clone();
            handles.push(tokio::spawn(async move { store.consume(&nonce).is_some() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1, "exactly one callback may consume a state");
    }
}
