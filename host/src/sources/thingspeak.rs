//! ThingSpeak channel feed reader.

use async_trait::async_trait;
use tracing::debug;

use super::{success_body, TelemetrySource};
use crate::config::TelemetryConfig;
use crate::domain::SensorReading;
use crate::error::SourceError;
use crate::normalize;

pub struct ThingSpeakClient {
    http: reqwest::Client,
    base_url: String,
    channel_id: String,
    api_key: String,
}

impl ThingSpeakClient {
    /// fails with `SourceError::Config` when the channel id or key is missing
    pub fn new(http: reqwest::Client, config: &TelemetryConfig) -> Result<Self, SourceError> {
        let channel_id = config
            .channel_id
            .clone()
            .ok_or_else(|| SourceError::Config("telemetry channel id".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SourceError::Config("telemetry api key".to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            channel_id,
            api_key,
        })
    }

    fn feed_url(&self) -> String {
        format!("{}/channels/{}/feeds.json", self.base_url, self.channel_id)
    }
}

#[async_trait]
impl TelemetrySource for ThingSpeakClient {
    async fn latest(&self) -> Result<SensorReading, SourceError> {
        let response = self
            .http
            .get(self.feed_url())
            .query(&[("api_key", self.api_key.as_str()), ("results", "1")])
            .send()
            .await?;
        let body = success_body(response).await?;
        debug!(bytes = body.len(), "thingspeak feed received");
        normalize::parse_feed(&body)
    }
}
