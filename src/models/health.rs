//! Normalized daily health summary.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Aggregated health data for a single day.
///
/// Derived per fetch from the Fitbit activity, heart-rate, and sleep
/// endpoints; never persisted server-side. Fields the provider did not
/// report are None rather than zeroed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HealthSummary {
    pub steps: u32,
    /// Total calories burned
    pub calories: u32,
    /// Total distance in kilometers
    pub distance: f64,
    /// Very-active plus fairly-active minutes
    pub active_minutes: u32,
    /// Resting heart rate (bpm), if the provider reported one
    pub heart_rate: Option<u32>,
    /// Time asleep in hours, if sleep was logged
    pub sleep_duration: Option<f64>,
    /// Derived workout count for the day
    pub workouts: u32,
    /// When this summary was fetched (ISO 8601)
    pub last_synced: String,
}
