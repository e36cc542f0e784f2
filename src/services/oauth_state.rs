// SPDX-License-Identifier: MIT

//! PKCE helpers and the pending-OAuth-state store.
//!
//! Each connect attempt gets a single-use state nonce bound to the
//! initiating user and the PKCE code verifier. The nonce is round-tripped
//! through the provider redirect and consumed exactly once on callback.
//!
//! The store is in-process; with multiple server instances the callback can
//! land on an instance that never saw the nonce. Single-instance deployments
//! only (see DESIGN.md).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// How long a pending state stays valid.
const STATE_TTL_MINUTES: i64 = 10;

/// Generate a PKCE code verifier (RFC 7636: 43-128 chars, base64url).
///
/// 32 random bytes encode to 43 characters, the RFC minimum.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derive the S256 code challenge: BASE64URL(SHA256(verifier)).
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate an unguessable state nonce for CSRF protection.
fn generate_state_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A pending authorization attempt, keyed by its state nonce.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    /// The user who initiated the flow (binds the callback to them)
    pub user_id: String,
    /// PKCE verifier to send with the code exchange
    pub code_verifier: String,
    /// Redirect URI used in the authorization request; the token exchange
    /// must repeat it exactly
    pub redirect_uri: String,
    /// When this attempt stops being valid
    pub expires_at: DateTime<Utc>,
}

/// In-memory store of pending OAuth states.
#[derive(Clone, Default)]
pub struct OAuthStateStore {
    entries: std::sync::Arc<DashMap<String, PendingAuth>>,
}

impl OAuthStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending attempt and return its state nonce.
    ///
    /// Expired entries are evicted opportunistically on each insert so the
    /// map cannot grow unbounded from abandoned connect attempts.
    pub fn insert(&self, user_id: &str, code_verifier: String, redirect_uri: String) -> String {
        let now = Utc::now();
        self.entries.retain(|_, pending| pending.expires_at > now);

        let nonce = generate_state_nonce();
        self.entries.insert(
            nonce.clone(),
            PendingAuth {
                user_id: user_id.to_string(),
                code_verifier,
                redirect_uri,
                expires_at: now + Duration::minutes(STATE_TTL_MINUTES),
            },
        );
        nonce
    }

    /// Consume a state nonce, returning the pending attempt if it was valid.
    ///
    /// Removal is atomic: two concurrent callbacks with the same nonce can
    /// never both succeed. Expired entries are treated as absent.
    pub fn consume(&self, nonce: &str) -> Option<PendingAuth> {
        let (_, pending) = self.entries.remove(nonce)?;
        if pending.expires_at <= Utc::now() {
            return None;
        }
        Some(pending)
    }

    /// Number of pending attempts (for tests and diagnostics).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_meets_rfc_length() {
        let verifier = generate_code_verifier();
        assert!(verifier.len() >= 43 && verifier.len() <= 128);
    }

    #[test]
    fn test_verifier_is_url_safe() {
        let verifier = generate_code_verifier();
        assert!(!verifier.contains('+'));
        assert!(!verifier.contains('/'));
        assert!(!verifier.contains('='));
    }

    #[test]
    fn test_challenge_is_deterministic() {
        let verifier = generate_code_verifier();
        assert_eq!(code_challenge(&verifier), code_challenge(&verifier));
    }

    #[test]
    fn test_known_challenge_vector() {
        // RFC 7636 appendix B test vector
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_state_consumed_exactly_once() {
        let store = OAuthStateStore::new();
        let nonce = store.insert("user-1", "verifier".to_string(), "http://cb".to_string());

        let first = store.consume(&nonce);
        assert!(first.is_some());
        assert_eq!(first.unwrap().user_id, "user-1");

        assert!(store.consume(&nonce).is_none(), "replay must fail");
    }

    #[test]
    fn test_unknown_state_rejected() {
        let store = OAuthStateStore::new();
        assert!(store.consume("never-issued").is_none());
    }

    #[test]
    fn test_nonces_are_unique() {
        let store = OAuthStateStore::new();
        let a = store.insert("u", "v".to_string(), "r".to_string());
        let b = store.insert("u", "v".to_string(), "r".to_string());
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }
}
