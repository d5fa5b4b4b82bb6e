//! Open-Meteo current conditions.

use async_trait::async_trait;

use super::{success_body, WeatherSource};
use crate::config::WeatherConfig;
use crate::domain::{Coordinate, WeatherSnapshot};
use crate::error::SourceError;
use crate::normalize;

/// fields requested from the `current` block
const CURRENT_FIELDS: &str = "wind_speed_10m,weather_code";

pub struct OpenMeteoClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(http: reqwest::Client, config: &WeatherConfig) -> Self {
        Self { http, base_url: config.base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoClient {
    async fn current(&self, location: Coordinate) -> Result<WeatherSnapshot, SourceError> {
        let response = self
            .http
            .get(format!("{}/v1/forecast", self.base_url))
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
            ])
            .send()
            .await?;
        let body = success_body(response).await?;
        normalize::parse_forecast(&body, location)
    }
}
