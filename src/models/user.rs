//! User model for storage and API.

use serde::{Deserialize, Serialize};

/// User profile stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Application user ID (also used as document ID)
    pub user_id: String,
    /// Display name from the Fitbit profile (may be None if not granted)
    pub display_name: Option<String>,
    /// The identifier Fitbit uses for this account
    pub fitbit_user_id: String,
    /// When the user first connected Fitbit (ISO 8601)
    pub connected_at: String,
}
