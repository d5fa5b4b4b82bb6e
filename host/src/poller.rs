//! ==============================================================================
//! poller.rs - three independent polling loops
//! ==============================================================================
//!
//! purpose:
//!     schedules fetches against each data source on its own timer and hands
//!     every completion to the reconciler.
//!
//! schedule:
//!     - telemetry: immediately, then every 15s (needs channel id + api key)
//!     - inference: immediately, then every 20s
//!     - weather:   once at startup, optionally repeated
//!
//! rules:
//!     - each loop is its own task; one slow source never delays another.
//!     - a tick that arrives while the previous request of the same source is
//!       still unresolved is skipped, not queued.
//!     - missing telemetry credentials report an error once and the loop
//!       never starts (no network call, no retry).
//!     - on shutdown the loops exit; requests already sent run to completion
//!       but the reconciler refuses their results.
//!
//! relationships:
//!     - uses: sources/ (the remote calls), reconcile.rs (UpdateSink)
//!     - started by: main.rs
//!
//! ==============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::domain::Coordinate;
use crate::error::SourceError;
use crate::reconcile::{Source, Update, UpdateSink};
use crate::sources::{InferenceSource, TelemetrySource, WeatherSource};

/// timing and location for the three loops
#[derive(Clone, Debug)]
pub struct PollSettings {
    pub telemetry_every: Duration,
    pub inference_every: Duration,
    /// `None` fetches the weather once
    pub weather_every: Option<Duration>,
    pub location: Coordinate,
    pub show_sensor_data: bool,
}

impl PollSettings {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            telemetry_every: Duration::from_secs(config.telemetry.interval_seconds.max(1)),
            inference_every: Duration::from_secs(config.inference.interval_seconds.max(1)),
            weather_every: config.weather.interval_seconds.map(|s| Duration::from_secs(s.max(1))),
            location: config.weather.location(),
            show_sensor_data: config.logging.show_sensor_data,
        }
    }
}

/// the collaborators each loop talks to
pub struct PollSources {
    /// `Err` when the telemetry credentials are missing
    pub telemetry: Result<Arc<dyn TelemetrySource>, SourceError>,
    pub inference: Arc<dyn InferenceSource>,
    pub weather: Arc<dyn WeatherSource>,
}

pub struct Poller {
    handles: Vec<JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(
        settings: PollSettings,
        sources: PollSources,
        sink: UpdateSink,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut handles = Vec::with_capacity(3);
        let show_data = settings.show_sensor_data;

        // 1. telemetry
        match sources.telemetry {
            Ok(telemetry) => {
                let sink = sink.clone();
                handles.push(spawn_loop(
                    Source::Telemetry,
                    Some(settings.telemetry_every),
                    shutdown.clone(),
                    move || {
                        let sink = sink.clone();
                        let telemetry = telemetry.clone();
                        let seq = sink.begin(Source::Telemetry);
                        async move {
                            let outcome = telemetry.latest().await;
                            if let (true, Ok(r)) = (show_data, &outcome) {
                                info!(
                                    "[TELEMETRY] Temp: {:.1}°C | Humidity: {:.1}% | Soil: {:.1}% | Light: {:.1}%",
                                    r.temperature, r.humidity, r.soil_moisture, r.light_intensity
                                );
                            }
                            sink.send(Update::Telemetry { seq, outcome }).await;
                        }
                    },
                ));
            }
            Err(e) => {
                warn!("[TELEMETRY] not polling: {}", e);
                let sink = sink.clone();
                handles.push(tokio::spawn(async move {
                    let seq = sink.begin(Source::Telemetry);
                    sink.send(Update::Telemetry { seq, outcome: Err(e) }).await;
                }));
            }
        }

        // 2. inference
        let inference = sources.inference;
        let inference_sink = sink.clone();
        handles.push(spawn_loop(
            Source::Inference,
            Some(settings.inference_every),
            shutdown.clone(),
            move || {
                let sink = inference_sink.clone();
                let inference = inference.clone();
                let seq = sink.begin(Source::Inference);
                async move {
                    let outcome = inference.analyze_live().await;
                    if let (true, Ok(p)) = (show_data, &outcome) {
                        info!(
                            "[NPK] N: {:.1} | P: {:.1} | K: {:.1} | Health: {}",
                            p.nitrogen, p.phosphorus, p.potassium, p.health_status
                        );
                    }
                    sink.send(Update::Inference { seq, outcome }).await;
                }
            },
        ));

        // 3. weather
        let weather = sources.weather;
        let location = settings.location;
        let weather_sink = sink;
        handles.push(spawn_loop(
            Source::Weather,
            settings.weather_every,
            shutdown,
            move || {
                let sink = weather_sink.clone();
                let weather = weather.clone();
                let seq = sink.begin(Source::Weather);
                async move {
                    let outcome = weather.current(location).await;
                    if let (true, Ok(w)) = (show_data, &outcome) {
                        info!("[WEATHER] {} | Wind: {:.1} km/h", w.condition, w.wind_speed);
                    }
                    sink.send(Update::Weather { seq, outcome }).await;
                }
            },
        ));

        Self { handles }
    }

    /// wait for every loop to exit (after shutdown)
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "poll loop ended abnormally");
            }
        }
    }
}

/// run `poll_once` on a timer until shutdown
///
/// the first tick fires immediately. with no period the poll runs once.
/// each poll runs in its own task so shutdown never aborts a request.
fn spawn_loop<F, Fut>(
    source: Source,
    period: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
    mut poll_once: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let in_flight = Arc::new(AtomicBool::new(false));
        let mut ticker = period.map(|p| {
            let mut ticker = interval(p);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            if let Some(ticker) = ticker.as_mut() {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
            }
            if *shutdown.borrow() {
                break;
            }

            if in_flight.swap(true, Ordering::AcqRel) {
                debug!(%source, "previous request still in flight, skipping tick");
            } else {
                let request = poll_once();
                let flag = in_flight.clone();
                tokio::spawn(async move {
                    request.await;
                    flag.store(false, Ordering::Release);
                });
            }

            if ticker.is_none() {
                break;
            }
        }
        debug!(%source, "poll loop stopped");
    })
}
