// SPDX-License-Identifier: MIT

//! Fitbit OAuth authorization routes.
//!
//! `/auth/fitbit/connect` (authenticated) starts the flow and returns the
//! consent URL; `/auth/fitbit/callback` (public, reached by browser
//! redirect from Fitbit) finishes it and sends the browser back to the
//! frontend with a success or error indicator in the query string.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::services::fitbit::{AUTHORIZE_URL, OAUTH_SCOPES};
use crate::services::oauth_state::{code_challenge, generate_code_verifier};
use crate::AppState;

/// Public auth routes (browser callback).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/fitbit/callback", get(auth_callback))
}

/// Auth routes that require a session (applied under the auth middleware).
pub fn connect_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/fitbit/connect", get(auth_connect))
}

/// Response for the connect endpoint.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectResponse {
    /// Fully formed Fitbit consent URL for the frontend to open
    pub url: String,
}

/// Start the OAuth flow: mint PKCE material and a single-use state nonce,
/// and hand the consent URL back to the frontend.
async fn auth_connect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ConnectResponse>> {
    if state.config.fitbit_client_id.is_empty() {
        return Err(AppError::Configuration("FITBIT_CLIENT_ID"));
    }

    let redirect_uri = callback_url(&headers);

    let code_verifier = generate_code_verifier();
    let challenge = code_challenge(&code_verifier);

    let nonce = state
        .oauth_states
        .insert(&user.user_id, code_verifier, redirect_uri.clone());

    let url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        AUTHORIZE_URL,
        state.config.fitbit_client_id,
        urlencoding::encode(&redirect_uri),
        urlencoding::encode(OAUTH_SCOPES),
        nonce,
        challenge,
    );

    tracing::info!(
        user_id = %user.user_id,
        client_id = %state.config.fitbit_client_id,
        "Starting Fitbit OAuth flow"
    );

    Ok(Json(ConnectResponse { url }))
}

/// Derive the callback URL from the request headers.
fn callback_url(headers: &axum::http::HeaderMap) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            std::env::var("API_HOST").unwrap_or_else(|_| "localhost:8080".to_string())
        });

    let scheme = if host.contains("localhost") || host.contains("127.0.0.1") {
        "http"
    } else {
        "https"
    };

    format!("{}://{}/auth/fitbit/callback", scheme, host)
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback: validate and consume the state, exchange the code,
/// and bounce the browser back to the frontend.
///
/// This is a browser-facing endpoint, so every outcome is a redirect with
/// an indicator in the query string rather than a JSON error body.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let frontend_url = state.config.frontend_url.clone();

    // User declined consent at Fitbit. Consume the state anyway so the
    // nonce cannot be replayed later.
    if let Some(error) = params.error {
        let _ = state.oauth_states.consume(&params.state);
        tracing::warn!(error = %error, "OAuth denied by user or provider");
        return redirect_with_error(&frontend_url, "denied");
    }

    // Single-use: a second callback with the same nonce lands here too.
    let pending = match state.oauth_states.consume(&params.state) {
        Some(p) => p,
        None => {
            tracing::warn!("Invalid, expired, or replayed OAuth state");
            return redirect_with_error(&frontend_url, "invalid_state");
        }
    };

    let code = match params.code {
        Some(c) => c,
        None => {
            tracing::warn!("OAuth callback missing authorization code");
            return redirect_with_error(&frontend_url, "missing_code");
        }
    };

    tracing::info!(user_id = %pending.user_id, "Exchanging authorization code for tokens");

    match state
        .fitbit
        .handle_oauth_callback(
            &pending.user_id,
            &code,
            &pending.code_verifier,
            &pending.redirect_uri,
        )
        .await
    {
        Ok(()) => {
            let redirect_url = format!("{}?fitbit=connected", frontend_url);
            Redirect::temporary(&redirect_url)
        }
        Err(e) => {
            tracing::error!(error = %e, user_id = %pending.user_id, "Token exchange failed");
            let reason = match e {
                AppError::RateLimited => "rate_limited",
                _ => "exchange_failed",
            };
            redirect_with_error(&frontend_url, reason)
        }
    }
}

fn redirect_with_error(frontend_url: &str, reason: &str) -> Redirect {
    let url = format!(
        "{}?fitbit=error&reason={}",
        frontend_url,
        urlencoding::encode(reason)
    );
    Redirect::temporary(&url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, HeaderValue};

    #[test]
    fn test_callback_url_localhost_uses_http() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:8080"));

        assert_eq!(
            callback_url(&headers),
            "http://localhost:8080/auth/fitbit/callback"
        );
    }

    #[test]
    fn test_callback_url_production_uses_https() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.example.com"));

        assert_eq!(
            callback_url(&headers),
            "https://api.example.com/auth/fitbit/callback"
        );
    }
}
