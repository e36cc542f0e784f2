//! OAuth token record stored per user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's Fitbit OAuth tokens (one record per user, upserted on conflict).
///
/// The access token must never be used once `expires_at` has passed; callers
/// go through the token refresher instead of reading this record directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Owning application user ID (also used as document ID)
    pub user_id: String,
    /// Short-lived bearer credential for the Fitbit API
    pub access_token: String,
    /// Long-lived credential used to mint new access tokens
    pub refresh_token: String,
    /// When the access token expires (ISO 8601)
    pub expires_at: String,
    /// Space-delimited granted scopes
    pub scope: String,
    /// The identifier Fitbit uses for this account
    pub fitbit_user_id: String,
}

impl TokenRecord {
    /// Parse the stored expiry timestamp.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }
}
