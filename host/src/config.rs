//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!     telemetry credentials can come from the environment instead of the file.
//!
//! structure:
//!     - ServerConfig: where the dashboard api listens.
//!     - LoggingConfig: tracing filter and whether readings are logged.
//!     - HttpConfig: shared client settings (optional request timeout).
//!     - TelemetryConfig: ThingSpeak channel, key, poll interval, freshness.
//!     - InferenceConfig: Gradio space url and poll interval.
//!     - WeatherConfig: forecast api, coordinate, optional refresh interval.
//!     - AlertConfig: NPK / moisture thresholds.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::domain::Coordinate;

/// environment variable names for the telemetry credentials
pub const ENV_CHANNEL_ID: &str = "THINGSPEAK_CHANNEL_ID";
pub const ENV_API_KEY: &str = "THINGSPEAK_API_KEY";

/// used when no coordinate is configured
pub const FALLBACK_COORDINATE: Coordinate = Coordinate { latitude: 12.9716, longitude: 77.5946 };

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub inference: InferenceConfig,
    pub weather: WeatherConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HttpConfig {
    /// no timeout when absent; a hung request then blocks only its own source
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub base_url: String,
    pub channel_id: Option<String>,
    pub api_key: Option<String>,
    pub interval_seconds: u64,
    /// at least one minute; 0 is raised to 1 with a warning
    pub freshness_minutes: u32,
}

impl TelemetryConfig {
    /// how old a reading may be and still count as online
    pub fn freshness(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.freshness_minutes.max(1)))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.thingspeak.com".to_string(),
            channel_id: None,
            api_key: None,
            interval_seconds: 15,
            freshness_minutes: crate::status::DEFAULT_FRESHNESS_MINUTES,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InferenceConfig {
    /// root of the gradio space, e.g. https://<owner>-<space>.hf.space
    pub base_url: String,
    pub interval_seconds: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://vipul918-npkvaluepredictor.hf.space".to_string(),
            interval_seconds: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// fetch once at startup when absent
    pub interval_seconds: Option<u64>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com".to_string(),
            latitude: None,
            longitude: None,
            interval_seconds: None,
        }
    }
}

impl WeatherConfig {
    /// configured coordinate, or the fallback when either half is missing
    pub fn location(&self) -> Coordinate {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Coordinate { latitude, longitude },
            _ => FALLBACK_COORDINATE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertConfig {
    pub nitrogen_low: f64,
    pub phosphorus_low: f64,
    pub potassium_low: f64,
    pub moisture_low: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { nitrogen_low: 10.0, phosphorus_low: 5.0, potassium_low: 8.0, moisture_low: 30.0 }
    }
}

/// result of `HostConfig::load_or_default`
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: HostConfig,
    /// file the config came from; `None` means built-in defaults
    pub origin: Option<PathBuf>,
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn log(&self) {
        for warning in &self.warnings {
            warn!("[CONFIG] {}", warning);
        }
        match &self.origin {
            Some(path) => info!("[CONFIG] Loaded from {}", path.display()),
            None => warn!("[CONFIG] No config file found - using defaults"),
        }
    }
}

/// blank strings count as missing
fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback, then apply environment overrides.
    ///
    /// runs before logging is set up, so what happened is returned rather
    /// than logged; see `LoadedConfig::log`.
    pub fn load_or_default() -> LoadedConfig {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        let mut warnings = Vec::new();
        let mut found = None;
        for path in paths {
            if path.exists() {
                match Self::load(&path) {
                    Ok(config) => {
                        found = Some((config, path));
                        break;
                    }
                    Err(e) => warnings.push(format!("Failed to load {}: {}", path.display(), e)),
                }
            }
        }

        let (mut config, origin) = match found {
            Some((config, path)) => (config, Some(path)),
            None => (Self::default(), None),
        };
        config.apply_env(|name| std::env::var(name).ok());
        if config.telemetry.freshness_minutes == 0 {
            warnings.push("telemetry.freshness_minutes = 0, using 1".to_string());
        }
        LoadedConfig { config, origin, warnings }
    }

    /// environment wins over the file for the telemetry credentials
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = non_empty(lookup(ENV_CHANNEL_ID)) {
            self.telemetry.channel_id = Some(id);
        }
        if let Some(key) = non_empty(lookup(ENV_API_KEY)) {
            self.telemetry.api_key = Some(key);
        }
        self.telemetry.channel_id = non_empty(self.telemetry.channel_id.take());
        self.telemetry.api_key = non_empty(self.telemetry.api_key.take());
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        let location = self.weather.location();
        info!("┌─────────────────────────────────────────┐");
        info!("│           HOST CONFIGURATION            │");
        info!("├─────────────────────────────────────────┤");
        info!("│ Bind: {}", self.server.bind);
        info!("│ Telemetry: every {}s, fresh for {}m", self.telemetry.interval_seconds, self.telemetry.freshness_minutes);
        info!(
            "│ Credentials: channel {} / key {}",
            if self.telemetry.channel_id.is_some() { "set" } else { "MISSING" },
            if self.telemetry.api_key.is_some() { "set" } else { "MISSING" },
        );
        info!("│ Inference: every {}s", self.inference.interval_seconds);
        match self.weather.interval_seconds {
            Some(s) => info!("│ Weather: every {}s at {:.4},{:.4}", s, location.latitude, location.longitude),
            None => info!("│ Weather: once at {:.4},{:.4}", location.latitude, location.longitude),
        }
        info!("│ Log Level: {}", self.logging.level);
        info!("└─────────────────────────────────────────┘");
    }
}
