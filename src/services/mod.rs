// SPDX-License-Identifier: MIT

//! Services module - business logic layer.

pub mod fitbit;
pub mod oauth_state;

pub use fitbit::{FitbitClient, FitbitService, RefreshLocks, TokenCache};
pub use oauth_state::{OAuthStateStore, PendingAuth};
