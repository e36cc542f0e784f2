// SPDX-License-Identifier: MIT

//! Fitbit API client and token lifecycle management.
//!
//! Handles:
//! - Authorization-code + PKCE exchange
//! - Token refresh when expired (single-flight per user)
//! - Daily activity / heart-rate / sleep fetching with fan-out
//! - Rate limit detection (429 falls back to cached data client-side)

use crate::error::AppError;
use serde::Deserialize;

/// Fitbit authorization endpoint (browser consent screen).
pub const AUTHORIZE_URL: &str = "https://www.fitbit.com/oauth2/authorize";

/// Scopes requested on connect, space-delimited per RFC 6749.
pub const OAUTH_SCOPES: &str = "activity heartrate sleep profile";

const DEFAULT_API_BASE: &str = "https://api.fitbit.com";
const HTTP_TIMEOUT_SECS: u64 = 10;

/// Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
}

impl FitbitClient {
    /// Create a new Fitbit client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_api_base(client_id, client_secret, DEFAULT_API_BASE.to_string())
    }

    /// Create a client pointed at a different API host (tests).
    pub fn with_api_base(client_id: String, client_secret: String, api_base: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            api_base,
            client_id,
            client_secret,
        }
    }

    fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.api_base)
    }

    // ─── OAuth endpoints ─────────────────────────────────────────────────────

    /// Exchange an authorization code (plus its PKCE verifier) for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<FitbitTokenResponse, AppError> {
        let response = self
            .http
            .post(self.token_url())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Token exchange request failed");
                AppError::Upstream {
                    endpoint: "token",
                    status: 0,
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status, body = %body, "Fitbit token exchange failed");
            return Err(classify_token_endpoint_failure(status, &body));
        }

        response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse token exchange response");
            AppError::Upstream {
                endpoint: "token",
                status: 0,
            }
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// A rejected refresh token (`invalid_grant`) maps to
    /// `RefreshTokenInvalid`; retrying it cannot succeed, so the caller
    /// deletes the token record instead.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<FitbitTokenResponse, AppError> {
        let response = self
            .http
            .post(self.token_url())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Token refresh request failed");
                AppError::Upstream {
                    endpoint: "token",
                    status: 0,
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, body = %body, "Fitbit token refresh failed");
            return Err(classify_token_endpoint_failure(status, &body));
        }

        response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse token refresh response");
            AppError::Upstream {
                endpoint: "token",
                status: 0,
            }
        })
    }

    /// Revoke a token pair at the provider (best-effort on disconnect).
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AppError> {
        let response = self
            .http
            .post(format!("{}/oauth2/revoke", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", refresh_token)])
            .send()
            .await
            .map_err(|_| AppError::Upstream {
                endpoint: "revoke",
                status: 0,
            })?;

        if !response.status().is_success() {
            return Err(AppError::Upstream {
                endpoint: "revoke",
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    // ─── Data endpoints ──────────────────────────────────────────────────────

    /// Daily activity summary for a date (YYYY-MM-DD).
    pub async fn get_daily_activity(
        &self,
        access_token: &str,
        date: &str,
    ) -> Result<DailyActivityResponse, AppError> {
        let url = format!("{}/1/user/-/activities/date/{}.json", self.api_base, date);
        self.get_json(&url, access_token, "activity").await
    }

    /// Heart-rate series for a date.
    pub async fn get_heart_rate(
        &self,
        access_token: &str,
        date: &str,
    ) -> Result<HeartRateResponse, AppError> {
        let url = format!(
            "{}/1/user/-/activities/heart/date/{}/1d.json",
            self.api_base, date
        );
        self.get_json(&url, access_token, "heart").await
    }

    /// Sleep summary for a date.
    pub async fn get_sleep(
        &self,
        access_token: &str,
        date: &str,
    ) -> Result<SleepResponse, AppError> {
        let url = format!("{}/1.2/user/-/sleep/date/{}.json", self.api_base, date);
        self.get_json(&url, access_token, "sleep").await
    }

    /// Authenticated user profile (display name).
    pub async fn get_profile(&self, access_token: &str) -> Result<ProfileResponse, AppError> {
        let url = format!("{}/1/user/-/profile.json", self.api_base);
        self.get_json(&url, access_token, "profile").await
    }

    /// Generic GET request with JSON response and per-endpoint failure detail.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
        endpoint: &'static str,
    ) -> Result<T, AppError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, endpoint, "Fitbit request failed");
                AppError::Upstream {
                    endpoint,
                    status: 0,
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, endpoint, body = %body, "Fitbit API error");
            return Err(classify_data_failure(endpoint, status));
        }

        response.json().await.map_err(|e| {
            tracing::error!(error = %e, endpoint, "JSON parse error");
            AppError::Upstream {
                endpoint,
                status: 0,
            }
        })
    }
}

/// Classify a non-2xx response from the token endpoint.
///
/// 429 is a rate limit; 400/401 with an `invalid_grant`/`invalid_token`
/// error type means the credential itself is dead.
fn classify_token_endpoint_failure(status: u16, body: &str) -> AppError {
    if status == 429 {
        return AppError::RateLimited;
    }
    if (status == 400 || status == 401)
        && (body.contains("invalid_grant") || body.contains("invalid_token"))
    {
        return AppError::RefreshTokenInvalid;
    }
    AppError::Upstream {
        endpoint: "token",
        status,
    }
}

/// Classify a non-2xx response from a data endpoint.
fn classify_data_failure(endpoint: &'static str, status: u16) -> AppError {
    if status == 429 {
        tracing::warn!(endpoint, "Fitbit rate limit hit (429)");
        return AppError::RateLimited;
    }
    AppError::Upstream { endpoint, status }
}

// ─── Provider response types ─────────────────────────────────────────────────

/// Token endpoint response (exchange and refresh share this shape).
#[derive(Debug, Clone, Deserialize)]
pub struct FitbitTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
    pub scope: Option<String>,
    /// Fitbit's identifier for the account
    pub user_id: Option<String>,
}

/// Daily activity summary response.
#[derive(Debug, Clone, Deserialize)]
pub struct DailyActivityResponse {
    pub summary: ActivitySummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivitySummary {
    #[serde(default)]
    pub steps: u32,
    #[serde(rename = "caloriesOut", default)]
    pub calories_out: u32,
    /// Calories burned during activities; the basis of the workout heuristic
    #[serde(rename = "activityCalories", default)]
    pub activity_calories: u32,
    #[serde(default)]
    pub distances: Vec<ActivityDistance>,
    #[serde(rename = "veryActiveMinutes", default)]
    pub very_active_minutes: u32,
    #[serde(rename = "fairlyActiveMinutes", default)]
    pub fairly_active_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityDistance {
    pub activity: String,
    pub distance: f64,
}

/// Heart-rate series response.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartRateResponse {
    #[serde(rename = "activities-heart", default)]
    pub activities_heart: Vec<HeartRateDay>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartRateDay {
    pub value: HeartRateValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartRateValue {
    #[serde(rename = "restingHeartRate")]
    pub resting_heart_rate: Option<u32>,
}

/// Sleep log response. The summary block is absent when nothing was logged.
#[derive(Debug, Clone, Deserialize)]
pub struct SleepResponse {
    pub summary: Option<SleepSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepSummary {
    #[serde(rename = "totalMinutesAsleep")]
    pub total_minutes_asleep: Option<u32>,
}

/// Profile response (display name only).
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub user: ProfileUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUser {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// FitbitService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

use crate::db::FirestoreDb;
use crate::models::{HealthSummary, TokenRecord, User};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Shared token cache type for use in AppState.
pub type TokenCache = Arc<DashMap<String, CachedToken>>;

/// Shared refresh locks type for use in AppState.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// High-level Fitbit service that manages token lifecycle and API calls.
///
/// This service encapsulates:
/// - Token retrieval from Firestore
/// - Automatic token refresh when expiring (with 5-minute margin)
/// - Rotation-aware storage of refreshed tokens
/// - In-memory token caching to reduce store reads
/// - Per-user locking to prevent duplicate refresh calls
#[derive(Clone)]
pub struct FitbitService {
    client: FitbitClient,
    db: FirestoreDb,
    /// In-memory cache of valid access tokens (shared across requests).
    token_cache: TokenCache,
    /// Per-user mutex to serialize token refresh operations.
    refresh_locks: RefreshLocks,
}

impl FitbitService {
    /// Create a new Fitbit service with shared token cache.
    ///
    /// The `token_cache` and `refresh_locks` should be shared across all
    /// `FitbitService` instances within a server process.
    pub fn new(
        client_id: String,
        client_secret: String,
        db: FirestoreDb,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self::with_client(
            FitbitClient::new(client_id, client_secret),
            db,
            token_cache,
            refresh_locks,
        )
    }

    /// Create a service around an existing client (tests point the client at
    /// a stub provider).
    pub fn with_client(
        client: FitbitClient,
        db: FirestoreDb,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self {
            client,
            db,
            token_cache,
            refresh_locks,
        }
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Get a valid (non-expired) access token for the given user.
    ///
    /// Strategy:
    /// 1. Check in-memory cache (fast path - no I/O)
    /// 2. Acquire per-user lock to prevent duplicate refresh calls
    /// 3. Re-check cache after lock (another task may have refreshed)
    /// 4. Fetch from Firestore; absent record means "not connected"
    /// 5. If token is valid, cache and return
    /// 6. If expired, refresh with Fitbit and persist the rotated pair
    /// 7. On `invalid_grant`, check for a cross-instance rotation race
    ///    before deleting the record
    pub async fn get_valid_access_token(&self, user_id: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        if let Some(cached) = self.token_cache.get(user_id) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
            // Expired or expiring soon - fall through to refresh
        }

        // Only one task per user performs the refresh; others wait here.
        let lock = self
            .refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        // Another task may have refreshed while we were waiting.
        if let Some(cached) = self.token_cache.get(user_id) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let tokens = match self.db.get_tokens(user_id).await? {
            Some(t) => t,
            None => {
                // Record gone (disconnected elsewhere) - drop any stale cache
                self.token_cache.remove(user_id);
                return Err(AppError::NotConnected);
            }
        };

        let expires_at = tokens.expires_at_utc().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "Unparseable token expiry for user {}",
                user_id
            ))
        })?;

        if now + margin < expires_at {
            self.token_cache.insert(
                user_id.to_string(),
                CachedToken {
                    access_token: tokens.access_token.clone(),
                    expires_at,
                },
            );
            return Ok(tokens.access_token);
        }

        tracing::info!(user_id, "Access token expired, refreshing");

        let refreshed = match self.client.refresh_token(&tokens.refresh_token).await {
            Ok(r) => r,
            Err(AppError::RefreshTokenInvalid) => {
                // Another server instance may have already rotated this
                // refresh token; if the stored one differs from what we
                // sent, use the winner's tokens instead of disconnecting.
                if let Some(current) = self.db.get_tokens(user_id).await? {
                    if current.refresh_token != tokens.refresh_token {
                        tracing::info!(
                            user_id,
                            "Refresh token race detected - using rotated tokens from store"
                        );
                        return self.cache_from_record(user_id, &current);
                    }
                }

                tracing::warn!(user_id, "Refresh token revoked, deleting token record");
                self.db.delete_tokens(user_id).await?;
                self.token_cache.remove(user_id);
                return Err(AppError::RefreshTokenInvalid);
            }
            // Transient failure: keep the record, the caller may retry
            Err(e) => return Err(e),
        };

        let new_expires_at = now + Duration::seconds(refreshed.expires_in);

        // The old refresh token is dead once rotation happens; both halves
        // of the pair go out in a single document write.
        let updated = TokenRecord {
            user_id: user_id.to_string(),
            access_token: refreshed.access_token.clone(),
            refresh_token: refreshed.refresh_token,
            expires_at: format_utc_rfc3339(new_expires_at),
            scope: refreshed.scope.unwrap_or(tokens.scope),
            fitbit_user_id: refreshed.user_id.unwrap_or(tokens.fitbit_user_id),
        };
        self.db.set_tokens(&updated).await?;

        self.token_cache.insert(
            user_id.to_string(),
            CachedToken {
                access_token: refreshed.access_token.clone(),
                expires_at: new_expires_at,
            },
        );

        tracing::info!(user_id, "Token refreshed and cached");
        Ok(refreshed.access_token)
    }

    /// Cache the access token from a freshly-read record and return it.
    fn cache_from_record(
        &self,
        user_id: &str,
        record: &TokenRecord,
    ) -> Result<String, AppError> {
        let expires_at = record.expires_at_utc().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "Unparseable token expiry for user {}",
                user_id
            ))
        })?;

        self.token_cache.insert(
            user_id.to_string(),
            CachedToken {
                access_token: record.access_token.clone(),
                expires_at,
            },
        );
        Ok(record.access_token.clone())
    }

    // ─── OAuth Callback Handling ─────────────────────────────────────────────

    /// Handle OAuth callback: exchange code for tokens, store user and tokens.
    pub async fn handle_oauth_callback(
        &self,
        user_id: &str,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<(), AppError> {
        let token_response = self
            .client
            .exchange_code(code, code_verifier, redirect_uri)
            .await?;

        let now = Utc::now();
        let fitbit_user_id = token_response.user_id.clone().unwrap_or_default();

        // Profile fetch is best-effort; a connect should not fail because
        // the display name was unavailable.
        let display_name = match self.client.get_profile(&token_response.access_token).await {
            Ok(profile) => profile.user.display_name,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch Fitbit profile, continuing anyway");
                None
            }
        };

        let user = User {
            user_id: user_id.to_string(),
            display_name,
            fitbit_user_id: fitbit_user_id.clone(),
            connected_at: format_utc_rfc3339(now),
        };

        if let Err(e) = self.db.upsert_user(&user).await {
            tracing::warn!(error = %e, "Failed to store user profile, continuing anyway");
        }

        let expires_at = now + Duration::seconds(token_response.expires_in);

        let record = TokenRecord {
            user_id: user_id.to_string(),
            access_token: token_response.access_token.clone(),
            refresh_token: token_response.refresh_token,
            expires_at: format_utc_rfc3339(expires_at),
            scope: token_response.scope.unwrap_or_else(|| OAUTH_SCOPES.to_string()),
            fitbit_user_id: fitbit_user_id.clone(),
        };
        self.db.set_tokens(&record).await?;

        self.token_cache.insert(
            user_id.to_string(),
            CachedToken {
                access_token: token_response.access_token,
                expires_at,
            },
        );

        tracing::info!(
            user_id,
            fitbit_user_id = %fitbit_user_id,
            "OAuth callback handled, user and tokens stored"
        );

        Ok(())
    }

    // ─── Health Data ─────────────────────────────────────────────────────────

    /// Fetch and normalize the health summary for one day.
    ///
    /// The three provider calls run concurrently; the first failure aborts
    /// the join, so a 429 on any endpoint surfaces as a single rate-limit
    /// signal and no partial summary is ever returned.
    pub async fn fetch_health_summary(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<HealthSummary, AppError> {
        let access_token = self.get_valid_access_token(user_id).await?;
        let day = date.format("%Y-%m-%d").to_string();

        let (activity, heart, sleep) = tokio::try_join!(
            self.client.get_daily_activity(&access_token, &day),
            self.client.get_heart_rate(&access_token, &day),
            self.client.get_sleep(&access_token, &day),
        )?;

        Ok(build_summary(&activity, &heart, &sleep, Utc::now()))
    }

    // ─── Disconnect ──────────────────────────────────────────────────────────

    /// Disconnect Fitbit: delete the token record and invalidate the cache.
    ///
    /// Returns false if no connection existed. Provider-side revocation is
    /// best-effort; the deleted record is the source of truth.
    pub async fn disconnect(&self, user_id: &str) -> Result<bool, AppError> {
        let tokens = match self.db.get_tokens(user_id).await? {
            Some(t) => t,
            None => return Ok(false),
        };

        // Delete first so concurrent fetches stop using the tokens.
        self.db.delete_tokens(user_id).await?;
        self.token_cache.remove(user_id);

        if let Err(e) = self.client.revoke(&tokens.refresh_token).await {
            tracing::warn!(error = %e, user_id, "Fitbit revocation failed (tokens already deleted)");
        }

        tracing::info!(user_id, "Fitbit disconnected");
        Ok(true)
    }
}

/// Normalize the three provider responses into a single summary.
///
/// The workout count is a placeholder heuristic: any nonzero activity-calorie
/// burn counts as one workout.
fn build_summary(
    activity: &DailyActivityResponse,
    heart: &HeartRateResponse,
    sleep: &SleepResponse,
    now: DateTime<Utc>,
) -> HealthSummary {
    let summary = &activity.summary;

    let distance = summary
        .distances
        .iter()
        .find(|d| d.activity == "total")
        .map(|d| d.distance)
        .unwrap_or(0.0);

    let heart_rate = heart
        .activities_heart
        .first()
        .and_then(|day| day.value.resting_heart_rate);

    let sleep_duration = sleep
        .summary
        .as_ref()
        .and_then(|s| s.total_minutes_asleep)
        .map(|minutes| f64::from(minutes) / 60.0);

    let workouts = u32::from(summary.activity_calories > 0);

    HealthSummary {
        steps: summary.steps,
        calories: summary.calories_out,
        distance,
        active_minutes: summary.very_active_minutes + summary.fairly_active_minutes,
        heart_rate,
        sleep_duration,
        workouts,
        last_synced: format_utc_rfc3339(now),
    }
}
