// SPDX-License-Identifier: MIT

//! Connect/callback flow tests against the router (no provider calls).

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

mod common;

fn create_test_jwt(user_id: &str, signing_key: &[u8]) -> String {
    #[derive(Serialize)]
    struct Claims {
        sub: String,
        exp: usize,
        iat: usize,
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + 86400,
        iat: now,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )
    .unwrap()
}

#[tokio::test]
async fn test_connect_returns_consent_url() {
    let (app, state) = common::create_test_app();
    let token = create_test_jwt("user-7", &state.config.jwt_signing_key);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/fitbit/connect")
                .header(header::HOST, "localhost:8080")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let url = json["url"].as_str().expect("url field");

    assert!(url.starts_with("https://www.fitbit.com/oauth2/authorize?"));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("client_id=test_client_id"));
    assert!(url.contains("code_challenge_method=S256"));
    assert!(url.contains("code_challenge="));
    assert!(url.contains("state="));
    assert!(url.contains("scope=activity%20heartrate%20sleep%20profile"));
    assert!(url.contains(urlencoding::encode("http://localhost:8080/auth/fitbit/callback").as_ref()));

    // The pending attempt is registered server-side
    assert_eq!(state.oauth_states.len(), 1);
}

#[tokio::test]
async fn test_callback_rejects_unknown_state() {
    let (app, _) = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/fitbit/callback?code=abc&state=forged")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("http://localhost:5173"));
    assert!(location.contains("fitbit=error"));
    assert!(location.contains("reason=invalid_state"));
}

#[tokio::test]
async fn test_callback_reports_denied_consent() {
    let (app, state) = common::create_test_app();

    let nonce = state.oauth_states.insert(
        "user-7",
        "verifier".to_string(),
        "http://localhost:8080/auth/fitbit/callback".to_string(),
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/auth/fitbit/callback?state={}&error=access_denied",
                    nonce
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.contains("reason=denied"));

    // The nonce was consumed even though no exchange happened
    assert!(state.oauth_states.consume(&nonce).is_none());
}

#[tokio::test]
async fn test_callback_missing_code_consumes_state() {
    let (app, state) = common::create_test_app();

    let nonce = state.oauth_states.insert(
        "user-7",
        "verifier".to_string(),
        "http://localhost:8080/auth/fitbit/callback".to_string(),
    );

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/auth/fitbit/callback?state={}", nonce))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.contains("reason=missing_code"));

    // A second attempt with the same nonce is a replay
    let replay = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/auth/fitbit/callback?state={}&code=abc", nonce))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let location = replay.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.contains("reason=invalid_state"));
}

#[tokio::test]
async fn test_health_data_rejects_bad_date() {
    let (app, state) = common::create_test_app();
    let token = create_test_jwt("user-7", &state.config.jwt_signing_key);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/fitbit/health-data")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"date": "01/15/2026"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    // Rejected before any store or provider access
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "bad_request");
}
