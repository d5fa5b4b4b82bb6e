//! Freshness and connection status evaluation.

use chrono::{DateTime, Duration, Utc};

use crate::domain::ConnectionStatus;

/// Readings older than this are shown as offline.
pub const DEFAULT_FRESHNESS_MINUTES: u32 = 5;

/// Status of a successful telemetry fetch, judged by the reading's own timestamp.
///
/// Strictly older than `window` is stale. A reading without a timestamp cannot
/// be shown to be fresh and counts as stale. Future timestamps (clock skew)
/// count as fresh.
pub fn telemetry_status(
    recorded_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> ConnectionStatus {
    match recorded_at {
        Some(at) if now.signed_duration_since(at) <= window => ConnectionStatus::Online,
        _ => ConnectionStatus::Offline,
    }
}

/// Sources without a freshness threshold are online on any valid response.
pub fn fetched_status<T, E>(outcome: &Result<T, E>) -> ConnectionStatus {
    match outcome {
        Ok(_) => ConnectionStatus::Online,
        Err(_) => ConnectionStatus::Error,
    }
}
