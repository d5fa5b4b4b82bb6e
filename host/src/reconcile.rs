//! ==============================================================================
//! reconcile.rs - single-owner view state and its reducer task
//! ==============================================================================
//!
//! purpose:
//!     every poll completion is sent here as an `Update`. one task owns the
//!     `ViewState`, applies updates in arrival order and publishes snapshots
//!     through a watch channel. nothing else mutates the view state.
//!
//! ordering:
//!     each request gets a per-source sequence number when it is issued.
//!     a completion whose number is no longer the latest issued for its
//!     source is dropped before it reaches the reducer, and the reducer never
//!     applies a number lower than the one it already holds. a slow old
//!     response therefore never overwrites a newer one.
//!
//! teardown:
//!     `Dashboard::shutdown` stops the reducer and closes the update channel.
//!     completions of requests still in flight are refused by the channel.
//!
//! relationships:
//!     - fed by: poller.rs (through `UpdateSink`)
//!     - read by: main.rs (web handlers hold a watch receiver)
//!     - uses: status.rs for the freshness rule
//!
//! ==============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{
    ConnectionStatus, NutrientPrediction, SensorReading, SourceState, ViewState, WeatherSnapshot,
};
use crate::error::SourceError;
use crate::status;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Telemetry,
    Inference,
    Weather,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Source::Telemetry => "telemetry",
            Source::Inference => "inference",
            Source::Weather => "weather",
        };
        f.write_str(name)
    }
}

/// one poll completion
#[derive(Debug)]
pub enum Update {
    Telemetry { seq: u64, outcome: Result<SensorReading, SourceError> },
    Inference { seq: u64, outcome: Result<NutrientPrediction, SourceError> },
    Weather { seq: u64, outcome: Result<WeatherSnapshot, SourceError> },
}

impl Update {
    pub fn source(&self) -> Source {
        match self {
            Update::Telemetry { .. } => Source::Telemetry,
            Update::Inference { .. } => Source::Inference,
            Update::Weather { .. } => Source::Weather,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            Update::Telemetry { seq, .. } | Update::Inference { seq, .. } | Update::Weather { seq, .. } => *seq,
        }
    }
}

// ==============================================================================
// request ledger - latest issued sequence number per source
// ==============================================================================

#[derive(Debug, Default)]
pub struct RequestLedger {
    telemetry: AtomicU64,
    inference: AtomicU64,
    weather: AtomicU64,
}

impl RequestLedger {
    fn counter(&self, source: Source) -> &AtomicU64 {
        match source {
            Source::Telemetry => &self.telemetry,
            Source::Inference => &self.inference,
            Source::Weather => &self.weather,
        }
    }

    /// reserve the next sequence number for a request about to be sent
    pub fn issue(&self, source: Source) -> u64 {
        self.counter(source).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn latest(&self, source: Source) -> u64 {
        self.counter(source).load(Ordering::Acquire)
    }
}

// ==============================================================================
// reconciler - the pure merge step
// ==============================================================================

pub struct Reconciler {
    state: ViewState,
    freshness: Duration,
}

impl Reconciler {
    pub fn new(freshness: Duration) -> Self {
        Self { state: ViewState::default(), freshness }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// merge one completion; returns false when it was discarded as stale
    pub fn apply(&mut self, update: Update, now: DateTime<Utc>) -> bool {
        let source = update.source();
        let applied = match update {
            Update::Telemetry { seq, outcome } => {
                let ok_status = match &outcome {
                    Ok(reading) => status::telemetry_status(reading.recorded_at, now, self.freshness),
                    Err(_) => ConnectionStatus::Error,
                };
                merge(&mut self.state.telemetry, source, seq, outcome, ok_status, now)
            }
            Update::Inference { seq, outcome } => {
                let ok_status = status::fetched_status(&outcome);
                merge(&mut self.state.inference, source, seq, outcome, ok_status, now)
            }
            Update::Weather { seq, outcome } => {
                let ok_status = status::fetched_status(&outcome);
                merge(&mut self.state.weather, source, seq, outcome, ok_status, now)
            }
        };

        if applied {
            self.state.last_update = now.timestamp_millis().max(0) as u64;
        }
        applied
    }
}

/// write one source's slot; status and data move together
fn merge<T>(
    slot: &mut SourceState<T>,
    source: Source,
    seq: u64,
    outcome: Result<T, SourceError>,
    status: ConnectionStatus,
    now: DateTime<Utc>,
) -> bool {
    if seq <= slot.seq {
        debug!(%source, seq, current = slot.seq, "discarding out-of-order response");
        return false;
    }

    let previous = slot.status;
    slot.seq = seq;
    slot.status = status;
    match outcome {
        Ok(data) => {
            slot.data = Some(data);
            slot.last_success = Some(now);
            slot.last_error = None;
        }
        Err(e) => {
            // previous data stays for display, the status says it is not live
            if e.is_permanent() {
                error!(%source, error = %e, "source disabled");
            } else {
                warn!(%source, error = %e, "poll failed");
            }
            slot.last_error = Some(e.to_string());
        }
    }

    if previous != status {
        info!(%source, from = ?previous, to = ?status, "status changed");
    }
    true
}

// ==============================================================================
// dashboard - reducer task + channels
// ==============================================================================

/// handle given to pollers for reporting completions
#[derive(Clone)]
pub struct UpdateSink {
    tx: mpsc::Sender<Update>,
    ledger: Arc<RequestLedger>,
}

impl UpdateSink {
    /// sequence number for a request being issued now
    pub fn begin(&self, source: Source) -> u64 {
        self.ledger.issue(source)
    }

    /// hand a completion to the reducer. returns whether it was delivered:
    /// false when a newer request of the same source was issued meanwhile,
    /// or once the dashboard is torn down.
    pub async fn send(&self, update: Update) -> bool {
        let source = update.source();
        let latest = self.ledger.latest(source);
        if update.seq() != latest {
            debug!(%source, seq = update.seq(), latest, "discarding superseded response");
            return false;
        }
        self.tx.send(update).await.is_ok()
    }
}

pub struct Dashboard {
    sink: UpdateSink,
    view: watch::Receiver<ViewState>,
    shutdown: watch::Sender<bool>,
    reducer: Option<JoinHandle<()>>,
}

impl Dashboard {
    /// start the reducer task
    pub fn spawn(freshness: Duration) -> Self {
        let ledger = Arc::new(RequestLedger::default());
        let (tx, rx) = mpsc::channel(32);
        let (view_tx, view) = watch::channel(ViewState::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reconciler = Reconciler::new(freshness);
        let reducer = tokio::spawn(run_reducer(reconciler, rx, view_tx, shutdown_rx));

        Self {
            sink: UpdateSink { tx, ledger },
            view,
            shutdown,
            reducer: Some(reducer),
        }
    }

    pub fn sink(&self) -> UpdateSink {
        self.sink.clone()
    }

    /// receiver that resolves whenever the view state changes
    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// signal observed by pollers; flips to true on shutdown
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// stop applying updates. returns once the reducer has exited, so the
    /// published view state is final when this resolves.
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(reducer) = self.reducer.take() {
            if let Err(e) = reducer.await {
                warn!(error = %e, "reducer task ended abnormally");
            }
        }
    }
}

async fn run_reducer(
    mut reconciler: Reconciler,
    mut rx: mpsc::Receiver<Update>,
    view_tx: watch::Sender<ViewState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            update = rx.recv() => match update {
                Some(update) => {
                    if reconciler.apply(update, Utc::now()) {
                        view_tx.send_replace(reconciler.state().clone());
                    }
                }
                None => break,
            },
        }
    }
    rx.close();
    debug!("reducer stopped");
}
