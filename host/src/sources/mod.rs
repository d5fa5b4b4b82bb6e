//! ==============================================================================
//! sources - remote data sources behind async traits
//! ==============================================================================
//!
//! purpose:
//!     one trait per kind of source, so the poller does not care whether it
//!     talks to the real services or to a stub in tests.
//!
//! relationships:
//!     - implemented by: thingspeak.rs, open_meteo.rs, gradio.rs
//!     - used by: poller.rs (scheduled polls), main.rs (/api/analyze)
//!
//! ==============================================================================

pub mod gradio;
pub mod open_meteo;
pub mod thingspeak;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::HttpConfig;
use crate::domain::{Coordinate, NutrientPrediction, SensorReading, WeatherSnapshot};
use crate::error::SourceError;

pub use gradio::GradioClient;
pub use open_meteo::OpenMeteoClient;
pub use thingspeak::ThingSpeakClient;

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// latest feed entry
    async fn latest(&self) -> Result<SensorReading, SourceError>;
}

/// inputs for an on-demand `analyze_plant` call
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlantInputs {
    pub soil_moisture: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub light_intensity: f64,
}

#[async_trait]
pub trait InferenceSource: Send + Sync {
    /// model reads the telemetry store itself
    async fn analyze_live(&self) -> Result<NutrientPrediction, SourceError>;

    async fn analyze_plant(&self, inputs: PlantInputs) -> Result<NutrientPrediction, SourceError>;
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self, location: Coordinate) -> Result<WeatherSnapshot, SourceError>;
}

/// shared reqwest client for all sources
pub fn http_client(config: &HttpConfig) -> Result<reqwest::Client, SourceError> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));
    if let Some(secs) = config.timeout_seconds {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build().map_err(SourceError::from)
}

/// read a body, turning non-2xx into `SourceError::Status`
pub(crate) async fn success_body(response: reqwest::Response) -> Result<String, SourceError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

/// bind a stub service on a random local port, returning its base url
#[cfg(test)]
pub(crate) async fn serve_stub(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
