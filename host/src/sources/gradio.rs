//! ==============================================================================
//! gradio.rs - NPK / plant health predictions from a hosted gradio space
//! ==============================================================================
//!
//! protocol (gradio http call api):
//!     1. POST {base}/gradio_api/call/{fn}   body {"data": [...]}  -> {"event_id"}
//!     2. GET  {base}/gradio_api/call/{fn}/{event_id}  -> server-sent events
//!
//!     the `complete` event carries the output array as json on its data line.
//!     an `error` event means the function raised.
//!
//! ==============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{success_body, InferenceSource, PlantInputs};
use crate::config::InferenceConfig;
use crate::domain::NutrientPrediction;
use crate::error::SourceError;
use crate::normalize;

pub const ANALYZE_LIVE_DATA: &str = "analyze_live_data";
pub const ANALYZE_PLANT: &str = "analyze_plant";

#[derive(Debug, Deserialize)]
struct CallQueued {
    event_id: String,
}

pub struct GradioClient {
    http: reqwest::Client,
    base_url: String,
}

impl GradioClient {
    pub fn new(http: reqwest::Client, config: &InferenceConfig) -> Self {
        Self { http, base_url: config.base_url.trim_end_matches('/').to_string() }
    }

    /// run a named function and return its raw output array
    pub async fn call(&self, function: &str, inputs: Vec<Value>) -> Result<Vec<Value>, SourceError> {
        let call_url = format!("{}/gradio_api/call/{}", self.base_url, function);

        let response = self
            .http
            .post(&call_url)
            .json(&json!({ "data": inputs }))
            .send()
            .await?;
        let queued: CallQueued = serde_json::from_str(&success_body(response).await?)?;
        debug!(function, event_id = %queued.event_id, "gradio call queued");

        let response = self
            .http
            .get(format!("{}/{}", call_url, queued.event_id))
            .send()
            .await?;
        parse_event_stream(&success_body(response).await?)
    }
}

/// pull the output array out of a gradio event stream
pub fn parse_event_stream(body: &str) -> Result<Vec<Value>, SourceError> {
    let mut event = "";
    for line in body.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim();
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            match event {
                "complete" => return Ok(serde_json::from_str(data)?),
                "error" => {
                    let detail = if data.is_empty() || data == "null" { "function raised" } else { data };
                    return Err(SourceError::Remote(detail.to_string()));
                }
                _ => {}
            }
        }
    }
    Err(SourceError::Parse("event stream ended without a result".to_string()))
}

#[async_trait]
impl InferenceSource for GradioClient {
    async fn analyze_live(&self) -> Result<NutrientPrediction, SourceError> {
        let outputs = self.call(ANALYZE_LIVE_DATA, Vec::new()).await?;
        normalize::parse_live_analysis(&outputs)
    }

    async fn analyze_plant(&self, inputs: PlantInputs) -> Result<NutrientPrediction, SourceError> {
        let args = vec![
            json!(inputs.soil_moisture),
            json!(inputs.temperature),
            json!(inputs.humidity),
            json!(inputs.light_intensity),
        ];
        let outputs = self.call(ANALYZE_PLANT, args).await?;
        normalize::parse_plant_analysis(&outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::serve_stub;
    use axum::extract::Path;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    #[test]
    fn test_parse_complete_event() {
        let body = "event: generating\ndata: null\n\nevent: complete\ndata: [\"Success\", \"Healthy\"]\n\n";
        let values = parse_event_stream(body).unwrap();
        assert_eq!(values, vec![json!("Success"), json!("Healthy")]);
    }

    #[test]
    fn test_parse_error_and_truncated_streams() {
        assert_eq!(
            parse_event_stream("event: error\ndata: null\n\n"),
            Err(SourceError::Remote("function raised".to_string()))
        );
        assert!(matches!(
            parse_event_stream("event: heartbeat\ndata: null\n\n"),
            Err(SourceError::Parse(_))
        ));
        assert!(matches!(
            parse_event_stream("event: complete\ndata: [oops\n\n"),
            Err(SourceError::Parse(_))
        ));
    }

    fn stub_space() -> Router {
        Router::new()
            .route(
                "/gradio_api/call/:function",
                post(|Path(function): Path<String>, Json(body): Json<Value>| async move {
                    let id = match function.as_str() {
                        ANALYZE_LIVE_DATA => {
                            assert_eq!(body["data"], json!([]));
                            "live-1"
                        }
                        _ => {
                            assert_eq!(body["data"], json!([35.0, 24.0, 60.0, 70.0]));
                            "plant-1"
                        }
                    };
                    Json(json!({ "event_id": id }))
                }),
            )
            .route(
                "/gradio_api/call/:function/:event_id",
                get(|Path((_, event_id)): Path<(String, String)>| async move {
                    if event_id == "live-1" {
                        "event: complete\ndata: [\"Success\", \"Moderate\", \"Add compost\", 8.5, 4.0, 7.5, 35, 24.5, 61]\n\n"
                    } else {
                        "event: complete\ndata: [\"Healthy\", \"Keep going\", 12, 6, 9]\n\n"
                    }
                }),
            )
    }

    #[tokio::test]
    async fn test_analyze_live_round_trip() {
        let base = serve_stub(stub_space()).await;
        let client = GradioClient::new(
            reqwest::Client::new(),
            &InferenceConfig { base_url: base, ..InferenceConfig::default() },
        );

        let prediction = client.analyze_live().await.unwrap();
        assert_eq!(prediction.health_status, "Moderate");
        assert_eq!(prediction.nitrogen, 8.5);
        assert_eq!(prediction.observed.unwrap().temperature, 24.5);
    }

    #[tokio::test]
    async fn test_analyze_plant_sends_inputs_in_order() {
        let base = serve_stub(stub_space()).await;
        let client = GradioClient::new(
            reqwest::Client::new(),
            &InferenceConfig { base_url: base, ..InferenceConfig::default() },
        );

        let inputs = PlantInputs { soil_moisture: 35.0, temperature: 24.0, humidity: 60.0, light_intensity: 70.0 };
        let prediction = client.analyze_plant(inputs).await.unwrap();
        assert_eq!(prediction.health_status, "Healthy");
        assert_eq!(prediction.potassium, 9.0);
    }
}
