//! ==============================================================================
//! main.rs - plant monitor host entry point
//! ==============================================================================
//!
//! purpose:
//!     polls three remote sources for one plant and serves the merged result:
//!     - thingspeak: live sensor feed (temperature, humidity, soil, light)
//!     - gradio space: npk / health prediction from the hosted model
//!     - open-meteo: wind and current conditions at the plant's location
//!
//! responsibilities:
//!     - load configuration and set up logging
//!     - build the http clients for each source
//!     - start the reducer (reconcile.rs), the poll loops (poller.rs) and
//!       the alert watcher (alerts.rs)
//!     - serve the view state as json plus a plain html summary
//!     - tear everything down on ctrl-c
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ telemetry   │  │ inference   │  │ weather             │  │
//!     │  │ (15s loop)  │  │ (20s loop)  │  │ (once / optional)   │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │    Update      │                    │             │
//!     │         └────────────────┼────────────────────┘             │
//!     │                    ┌─────┴─────┐                            │
//!     │                    │  reducer  │ <- reconcile.rs            │
//!     │                    └─────┬─────┘                            │
//!     │                          │ watch<ViewState>                 │
//!     │                    ┌─────┴─────┐                            │
//!     │                    │ web server│ (port 3000)                │
//!     │                    └───────────┘                            │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod alerts;
mod config;
mod domain;
mod error;
mod normalize;
mod poller;
mod reconcile;
mod sources;
mod status;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{AlertConfig, HostConfig};
use crate::domain::{ConnectionStatus, SourceState, ViewState};
use crate::poller::{PollSettings, PollSources, Poller};
use crate::reconcile::Dashboard;
use crate::sources::{
    GradioClient, InferenceSource, OpenMeteoClient, PlantInputs, TelemetrySource, ThingSpeakClient,
};

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration, then logging (level comes from the config)
    let loaded = HostConfig::load_or_default();
    init_tracing(&loaded.config.logging.level);

    info!("===========================================================");
    info!("  Plant Monitor Host");
    info!("  telemetry + npk inference + weather");
    info!("===========================================================");
    loaded.log();
    let config = loaded.config;
    config.print_summary();

    // step 2: remote sources
    let http = sources::http_client(&config.http)?;
    let telemetry = ThingSpeakClient::new(http.clone(), &config.telemetry)
        .map(|c| Arc::new(c) as Arc<dyn TelemetrySource>);
    let inference: Arc<dyn InferenceSource> = Arc::new(GradioClient::new(http.clone(), &config.inference));
    let weather = Arc::new(OpenMeteoClient::new(http, &config.weather));

    // step 3: reducer and poll loops
    let mut dashboard = Dashboard::spawn(config.telemetry.freshness());
    let poller = Poller::spawn(
        PollSettings::from_config(&config),
        PollSources { telemetry, inference: inference.clone(), weather },
        dashboard.sink(),
        dashboard.shutdown_signal(),
    );

    let watcher = alerts::spawn_watcher(
        dashboard.view(),
        config.alerts.clone(),
        dashboard.shutdown_signal(),
        alerts::LogNotifier,
    );

    // step 4: web server in background
    let web = WebState { view: dashboard.view(), inference, alerts: config.alerts.clone() };
    let bind = config.server.bind.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = run_server(&bind, web).await {
            error!("[ERROR] Web server error: {:#}", e);
        }
    });

    // step 5: run until ctrl-c
    tokio::signal::ctrl_c().await?;
    info!("[SHUTDOWN] Stopping poll loops");
    dashboard.shutdown().await;
    poller.join().await;
    if let Err(e) = watcher.await {
        error!("[ERROR] Alert watcher ended abnormally: {}", e);
    }
    server.abort();
    let last = dashboard.snapshot();
    info!(
        telemetry = ?last.telemetry.status,
        inference = ?last.inference.status,
        weather = ?last.weather.status,
        "[SHUTDOWN] Final source status"
    );
    info!("[SHUTDOWN] Done");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ==============================================================================
// web server
// ==============================================================================

#[derive(Clone)]
struct WebState {
    view: watch::Receiver<ViewState>,
    inference: Arc<dyn InferenceSource>,
    alerts: AlertConfig,
}

fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/alerts", get(alerts_handler))
        .route("/api/analyze", post(analyze_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(bind: &str, state: WebState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("[STARTUP] Dashboard live at http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// json api endpoint for programmatic access
/// returns the merged view state as json
async fn api_handler(State(state): State<WebState>) -> Json<ViewState> {
    let view = state.view.borrow().clone();
    Json(view)
}

#[derive(Serialize)]
struct AlertReport {
    alerts: Vec<alerts::Alert>,
    bands: alerts::Bands,
    /// absent until the first prediction arrives
    nutrients: Option<alerts::NutrientReport>,
}

async fn alerts_handler(State(state): State<WebState>) -> Json<AlertReport> {
    let view = state.view.borrow().clone();
    Json(AlertReport {
        alerts: alerts::evaluate(&view, &state.alerts),
        bands: alerts::bands(&view),
        nutrients: view.inference.data.as_ref().map(alerts::nutrient_report),
    })
}

/// on-demand prediction for manual readings
/// POST /api/analyze {soil_moisture, temperature, humidity, light_intensity}
async fn analyze_handler(
    State(state): State<WebState>,
    Json(inputs): Json<PlantInputs>,
) -> impl IntoResponse {
    match state.inference.analyze_plant(inputs).await {
        Ok(prediction) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ok", "prediction": prediction})),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({"status": "error", "message": e.to_string()})),
        ),
    }
}

async fn dashboard_handler(State(state): State<WebState>) -> Html<String> {
    let view = state.view.borrow().clone();
    Html(render_summary(&view, &alerts::evaluate(&view, &state.alerts)))
}

fn status_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Loading => "loading",
        ConnectionStatus::Online => "online",
        ConnectionStatus::Offline => "offline",
        ConnectionStatus::Error => "error",
    }
}

fn source_row<T>(name: &str, slot: &SourceState<T>, detail: String) -> String {
    let error = slot
        .last_error
        .as_deref()
        .map(|e| format!(" ({})", html_escape(e)))
        .unwrap_or_default();
    format!(
        "<tr><td>{}</td><td>{}{}</td><td>{}</td></tr>\n",
        name,
        status_label(slot.status),
        error,
        html_escape(&detail)
    )
}

/// plain html summary; the rich dashboard consumes /api
fn render_summary(view: &ViewState, alerts: &[alerts::Alert]) -> String {
    let telemetry = view
        .telemetry
        .data
        .as_ref()
        .map(|r| {
            format!(
                "{:.1}°C, {:.0}% humidity, {:.0}% soil, {:.0}% light",
                r.temperature, r.humidity, r.soil_moisture, r.light_intensity
            )
        })
        .unwrap_or_default();
    let inference = view
        .inference
        .data
        .as_ref()
        .map(|p| {
            format!(
                "N {:.1} / P {:.1} / K {:.1}, {}: {}",
                p.nitrogen, p.phosphorus, p.potassium, p.health_status, p.recommendation
            )
        })
        .unwrap_or_default();
    let weather = view
        .weather
        .data
        .as_ref()
        .map(|w| format!("{}, wind {:.1} km/h", w.condition, w.wind_speed))
        .unwrap_or_default();

    let mut rows = String::new();
    rows.push_str(&source_row("Telemetry", &view.telemetry, telemetry));
    rows.push_str(&source_row("NPK analysis", &view.inference, inference));
    rows.push_str(&source_row("Weather", &view.weather, weather));

    let alert_items: String = alerts
        .iter()
        .map(|a| format!("<li>{}</li>\n", html_escape(&a.message)))
        .collect();

    format!(
        r#"<!doctype html>
<html>
<head><title>Plant Monitor</title><meta http-equiv="refresh" content="15"></head>
<body>
<h1>Plant Monitor</h1>
<table>
<tr><th>Source</th><th>Status</th><th>Latest</th></tr>
{}</table>
<h2>Alerts</h2>
<ul>
{}</ul>
</body>
</html>"#,
        rows, alert_items
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
