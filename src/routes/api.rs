// SPDX-License-Identifier: MIT

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::HealthSummary;
use crate::AppState;
use axum::{
    extract::State,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/fitbit/status", get(get_status))
        .route("/api/fitbit/health-data", post(get_health_data))
        .route("/api/fitbit/connection", delete(disconnect))
}

// ─── Connection Status ───────────────────────────────────────

/// Connection status response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StatusResponse {
    pub connected: bool,
    pub fitbit_user_id: Option<String>,
    pub display_name: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<String>,
}

/// Report whether the user has a Fitbit connection.
///
/// Reads only the token store; never contacts the provider.
async fn get_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<StatusResponse>> {
    let tokens = state.db.get_tokens(&user.user_id).await?;

    let Some(tokens) = tokens else {
        return Ok(Json(StatusResponse {
            connected: false,
            fitbit_user_id: None,
            display_name: None,
            scope: None,
            expires_at: None,
        }));
    };

    // Display name is cosmetic; a missing profile row should not fail the check
    let display_name = state
        .db
        .get_user(&user.user_id)
        .await
        .ok()
        .flatten()
        .and_then(|u| u.display_name);

    Ok(Json(StatusResponse {
        connected: true,
        fitbit_user_id: Some(tokens.fitbit_user_id),
        display_name,
        scope: Some(tokens.scope),
        expires_at: Some(tokens.expires_at),
    }))
}

// ─── Health Data ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct HealthDataRequest {
    /// Target date (YYYY-MM-DD); defaults to today (UTC)
    #[serde(default)]
    pub date: Option<String>,
}

/// Fetch today's (or a given day's) normalized health summary.
async fn get_health_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<HealthDataRequest>,
) -> Result<Json<HealthSummary>> {
    let date = match request.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            AppError::BadRequest("Invalid 'date' parameter: must be YYYY-MM-DD".to_string())
        })?,
        None => Utc::now().date_naive(),
    };

    tracing::debug!(user_id = %user.user_id, date = %date, "Fetching health data");

    let summary = state.fitbit.fetch_health_summary(&user.user_id, date).await?;
    Ok(Json(summary))
}

// ─── Disconnect ──────────────────────────────────────────────

/// Response for disconnecting Fitbit.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DisconnectResponse {
    /// False when no connection existed to begin with
    pub disconnected: bool,
}

/// Delete the user's token record (the sole disconnect mechanism).
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DisconnectResponse>> {
    tracing::info!(user_id = %user.user_id, "User-initiated Fitbit disconnect");

    let disconnected = state.fitbit.disconnect(&user.user_id).await?;
    Ok(Json(DisconnectResponse { disconnected }))
}
