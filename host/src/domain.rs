//! ==============================================================================
//! domain.rs - view state shared between pollers and the web server
//! ==============================================================================
//!
//! purpose:
//!     the records every data source produces, and the merged view state the
//!     dashboard reads. each source owns exactly one `SourceState` slot.
//!
//! relationships:
//!     - written by: reconcile.rs (the only mutator)
//!     - read by: main.rs (api + html), alerts.rs
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// latest telemetry feed entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// air temperature in celsius
    pub temperature: f64,
    /// relative humidity (0-100%)
    pub humidity: f64,
    /// soil moisture (0-100%)
    pub soil_moisture: f64,
    /// light intensity (0-100%)
    pub light_intensity: f64,
    /// timestamp reported by the telemetry store, not the local fetch time
    pub recorded_at: Option<DateTime<Utc>>,
}

/// conditions the inference model read when it made its prediction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservedConditions {
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
}

/// npk / health prediction from the hosted model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NutrientPrediction {
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    /// e.g. "Healthy", "Moderate", "Critical"
    pub health_status: String,
    pub recommendation: String,
    /// only present for `analyze_live_data`; `analyze_plant` echoes its inputs
    pub observed: Option<ObservedConditions>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// wind speed in km/h
    pub wind_speed: f64,
    /// wmo code as reported; `None` when the field was missing
    pub weather_code: Option<i64>,
    pub condition: String,
    pub location: Coordinate,
}

/// per-source connection state shown as a badge on the dashboard
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Loading,
    Online,
    Offline,
    Error,
}

/// one source's slot in the view state
///
/// status and data always change in the same reducer step. on failure the
/// previous data is kept but the status becomes `Error`, so stale data is
/// never paired with `Online`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceState<T> {
    pub status: ConnectionStatus,
    pub data: Option<T>,
    /// local time of the last successful fetch
    pub last_success: Option<DateTime<Utc>>,
    /// message of the most recent failure, cleared on success
    pub last_error: Option<String>,
    /// sequence number of the request that produced the current state
    pub seq: u64,
}

impl<T> Default for SourceState<T> {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Loading,
            data: None,
            last_success: None,
            last_error: None,
            seq: 0,
        }
    }
}

/// merged record consumed by the presentation layer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub telemetry: SourceState<SensorReading>,
    pub inference: SourceState<NutrientPrediction>,
    pub weather: SourceState<WeatherSnapshot>,
    /// unix timestamp (ms) of the last applied update from any source
    pub last_update: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_loading() {
        let state = ViewState::default();
        assert_eq!(state.telemetry.status, ConnectionStatus::Loading);
        assert_eq!(state.inference.status, ConnectionStatus::Loading);
        assert_eq!(state.weather.status, ConnectionStatus::Loading);
        assert!(state.telemetry.data.is_none());
        assert_eq!(state.last_update, 0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionStatus::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
    }
}
