// SPDX-License-Identifier: MIT

//! Fitlink: Fitbit health-data integration backend
//!
//! This crate provides the backend API for connecting user accounts to
//! Fitbit, keeping OAuth tokens fresh, and aggregating daily health data
//! into a normalized summary.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::{FitbitService, OAuthStateStore};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub fitbit: FitbitService,
    pub oauth_states: OAuthStateStore,
}
