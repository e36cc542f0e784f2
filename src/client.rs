// SPDX-License-Identifier: MIT

//! Client-side integration hook for the Fitbit feature.
//!
//! `HealthFeed` is the sole interface a frontend shell uses: it checks the
//! connection once on startup, fetches when connected, refreshes on an
//! interval in the background, and exposes its state through a watch
//! channel. The polling task is owned by the feed and cancelled on drop,
//! so no update can fire after teardown.
//!
//! A background refresh never blanks data that is already on screen:
//! `loading` is only raised while there are no stats yet, and a provider
//! rate limit keeps the previous stats and raises the `stale` flag instead
//! of an error.

use crate::models::HealthSummary;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Errors surfaced by a [`HealthBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Expected state, not a failure: the user has no Fitbit connection
    NotConnected,
    /// Provider rate limit; show cached data and retry on the next cycle
    RateLimited,
    /// Anything else (network, server, deserialization)
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotConnected => write!(f, "not connected"),
            BackendError::RateLimited => write!(f, "rate limited"),
            BackendError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Transport seam between the feed and the backend API.
pub trait HealthBackend: Send + Sync + 'static {
    /// Whether the user currently has a Fitbit connection.
    fn connection_status(&self) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Fetch today's health summary.
    fn fetch_summary(&self) -> impl Future<Output = Result<HealthSummary, BackendError>> + Send;

    /// Get the provider consent URL to open for a first-time connect.
    fn connect_url(&self) -> impl Future<Output = Result<String, BackendError>> + Send;

    /// Delete the connection server-side.
    fn disconnect(&self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Observable state of the feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub connected: bool,
    /// Last known summary; kept across failed refreshes
    pub stats: Option<HealthSummary>,
    /// True only while fetching with nothing to show yet
    pub loading: bool,
    /// True when the provider rate-limited the last refresh
    pub stale: bool,
    pub error: Option<String>,
}

enum FeedCommand {
    Refresh,
    Disconnect,
}

/// Handle to the background polling task.
pub struct HealthFeed<B: HealthBackend> {
    backend: Arc<B>,
    state_rx: watch::Receiver<FeedState>,
    cmd_tx: mpsc::Sender<FeedCommand>,
    task: JoinHandle<()>,
}

impl<B: HealthBackend> HealthFeed<B> {
    /// Start the feed: one connection check, an initial fetch when
    /// connected, then interval refreshes until the feed is dropped.
    pub fn spawn(backend: B, poll_interval: Duration) -> Self {
        let backend = Arc::new(backend);
        // Starts in loading state so consumers can tell "mount check still
        // running" from "checked and not connected".
        let (state_tx, state_rx) = watch::channel(FeedState {
            loading: true,
            ..FeedState::default()
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let task = tokio::spawn(run_feed(
            Arc::clone(&backend),
            state_tx,
            cmd_rx,
            poll_interval,
        ));

        Self {
            backend,
            state_rx,
            cmd_tx,
            task,
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> FeedState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state_rx.clone()
    }

    /// Trigger an immediate refresh (outside the interval).
    pub async fn refresh(&self) {
        let _ = self.cmd_tx.send(FeedCommand::Refresh).await;
    }

    /// Disconnect Fitbit and clear cached stats.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(FeedCommand::Disconnect).await;
    }

    /// Consent URL for a first-time connect; the UI opens it.
    pub async fn connect_url(&self) -> Result<String, BackendError> {
        self.backend.connect_url().await
    }

    /// Stop the polling task. Dropping the feed does the same.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl<B: HealthBackend> Drop for HealthFeed<B> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_feed<B: HealthBackend>(
    backend: Arc<B>,
    state_tx: watch::Sender<FeedState>,
    mut cmd_rx: mpsc::Receiver<FeedCommand>,
    poll_interval: Duration,
) {
    let mut feed = FeedState {
        loading: true,
        ..FeedState::default()
    };
    state_tx.send_replace(feed.clone());

    // Mount: one status check, then an initial fetch if connected
    feed.connected = backend.connection_status().await.unwrap_or(false);
    if feed.connected {
        fetch_into(&*backend, &mut feed, &state_tx).await;
    } else {
        feed.loading = false;
        state_tx.send_replace(feed.clone());
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if feed.connected {
                    fetch_into(&*backend, &mut feed, &state_tx).await;
                }
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(FeedCommand::Refresh) => {
                    fetch_into(&*backend, &mut feed, &state_tx).await;
                }
                Some(FeedCommand::Disconnect) => {
                    match backend.disconnect().await {
                        Ok(()) => feed = FeedState::default(),
                        Err(e) => feed.error = Some(e.to_string()),
                    }
                    state_tx.send_replace(feed.clone());
                }
                None => break,
            },
        }
    }
}

/// Run one fetch and fold the outcome into the feed state.
async fn fetch_into<B: HealthBackend>(
    backend: &B,
    feed: &mut FeedState,
    state_tx: &watch::Sender<FeedState>,
) {
    if feed.stats.is_none() {
        feed.loading = true;
        state_tx.send_replace(feed.clone());
    }

    match backend.fetch_summary().await {
        Ok(summary) => {
            feed.connected = true;
            feed.stats = Some(summary);
            feed.stale = false;
            feed.error = None;
        }
        Err(BackendError::NotConnected) => {
            feed.connected = false;
            feed.stats = None;
            feed.stale = false;
            feed.error = None;
        }
        Err(BackendError::RateLimited) => {
            // Keep showing what we have; the next poll cycle retries
            feed.stale = true;
            feed.error = None;
        }
        Err(BackendError::Other(msg)) => {
            feed.error = Some(msg);
        }
    }

    feed.loading = false;
    state_tx.send_replace(feed.clone());
}

// ─────────────────────────────────────────────────────────────────────────────
// ApiBackend - reqwest transport against the Fitlink API
// ─────────────────────────────────────────────────────────────────────────────

use serde::Deserialize;

/// Backend implementation talking to the Fitlink HTTP API.
pub struct ApiBackend {
    http: reqwest::Client,
    base_url: String,
    session_token: String,
}

#[derive(Deserialize)]
struct StatusBody {
    connected: bool,
}

#[derive(Deserialize)]
struct ConnectBody {
    url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl ApiBackend {
    pub fn new(base_url: String, session_token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url,
            session_token,
        }
    }

    /// Translate an API error response into a backend error.
    async fn classify(response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();
        if status == 429 {
            return BackendError::RateLimited;
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
            if parsed.error == "not_connected" || parsed.error == "reconnect_required" {
                return BackendError::NotConnected;
            }
            return BackendError::Other(parsed.error);
        }
        BackendError::Other(format!("HTTP {}", status))
    }
}

impl HealthBackend for ApiBackend {
    async fn connection_status(&self) -> Result<bool, BackendError> {
        let response = self
            .http
            .get(format!("{}/api/fitbit/status", self.base_url))
            .bearer_auth(&self.session_token)
            .send()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(body.connected)
    }

    async fn fetch_summary(&self) -> Result<HealthSummary, BackendError> {
        let response = self
            .http
            .post(format!("{}/api/fitbit/health-data", self.base_url))
            .bearer_auth(&self.session_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))
    }

    async fn connect_url(&self) -> Result<String, BackendError> {
        let response = self
            .http
            .get(format!("{}/auth/fitbit/connect", self.base_url))
            .bearer_auth(&self.session_token)
            .send()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        let body: ConnectBody = response
            .json()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(body.url)
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        let response = self
            .http
            .delete(format!("{}/api/fitbit/connection", self.base_url))
            .bearer_auth(&self.session_token)
            .send()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }
        Ok(())
    }
}
