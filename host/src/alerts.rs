//! ==============================================================================
//! alerts.rs - threshold alerts and per-metric health bands
//! ==============================================================================
//!
//! purpose:
//!     derives what the dashboard flags from the merged view state:
//!     - alerts: low npk / moisture and a critical health label
//!     - bands: healthy / warning / alert per sensor card
//!     - diagnoses: likely nutrient disorders from the predicted npk levels
//!     - watcher: announces the alert set whenever it changes
//!
//! rules:
//!     - moisture prefers the value the model observed, else telemetry.
//!     - npk alerts need a prediction; telemetry alone cannot raise them.
//!     - data kept from before a failed poll is still evaluated; the source
//!       status tells the reader how current it is.
//!
//! ==============================================================================

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AlertConfig;
use crate::domain::{NutrientPrediction, ViewState};

/// health label the model uses for plants that need attention now
pub const CRITICAL_HEALTH: &str = "Critical";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowMoisture,
    LowNitrogen,
    LowPhosphorus,
    LowPotassium,
    CriticalHealth,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Healthy,
    Warning,
    Alert,
}

pub fn moisture_band(value: f64) -> Band {
    if value < 30.0 {
        Band::Alert
    } else if value < 40.0 || value > 80.0 {
        Band::Warning
    } else {
        Band::Healthy
    }
}

pub fn temperature_band(value: f64) -> Band {
    if !(15.0..=30.0).contains(&value) {
        Band::Alert
    } else if !(18.0..=27.0).contains(&value) {
        Band::Warning
    } else {
        Band::Healthy
    }
}

pub fn light_band(value: f64) -> Band {
    if value < 20.0 {
        Band::Alert
    } else if value < 40.0 || value > 90.0 {
        Band::Warning
    } else {
        Band::Healthy
    }
}

pub fn nutrient_band(value: f64) -> Band {
    if value < 5.0 {
        Band::Alert
    } else if value < 10.0 {
        Band::Warning
    } else {
        Band::Healthy
    }
}

/// bands for whichever metrics currently have data
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Bands {
    pub soil_moisture: Option<Band>,
    pub temperature: Option<Band>,
    pub light_intensity: Option<Band>,
    pub nitrogen: Option<Band>,
    pub phosphorus: Option<Band>,
}

pub fn bands(view: &ViewState) -> Bands {
    let reading = view.telemetry.data.as_ref();
    let prediction = view.inference.data.as_ref();
    Bands {
        soil_moisture: reading.map(|r| moisture_band(r.soil_moisture)),
        temperature: reading.map(|r| temperature_band(r.temperature)),
        light_intensity: reading.map(|r| light_band(r.light_intensity)),
        nitrogen: prediction.map(|p| nutrient_band(p.nitrogen)),
        phosphorus: prediction.map(|p| nutrient_band(p.phosphorus)),
    }
}

// ==============================================================================
// nutrient diagnosis
// ==============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnosis {
    pub name: &'static str,
    pub severity: Severity,
    pub cause: &'static str,
}

const fn diagnosis(name: &'static str, severity: Severity, cause: &'static str) -> Diagnosis {
    Diagnosis { name, severity, cause }
}

/// likely disorders for one npk prediction; never empty
pub fn diagnose(nitrogen: f64, phosphorus: f64, potassium: f64) -> Vec<Diagnosis> {
    let mut found = Vec::new();

    if nitrogen < 10.0 {
        found.push(diagnosis(
            "Nitrogen Deficiency",
            Severity::High,
            "Yellowing of older leaves, stunted growth",
        ));
    } else if nitrogen > 25.0 {
        found.push(diagnosis(
            "Excessive Vegetative Growth",
            Severity::Medium,
            "Too much nitrogen delays flowering and fruiting",
        ));
    }

    if phosphorus < 5.0 {
        found.push(diagnosis(
            "Phosphorus Deficiency",
            Severity::High,
            "Purple/dark leaves, poor root development",
        ));
    } else if phosphorus > 15.0 {
        found.push(diagnosis(
            "Zinc & Iron Deficiency Risk",
            Severity::Medium,
            "Excess phosphorus blocks micronutrient uptake",
        ));
    }

    if potassium < 8.0 {
        found.push(diagnosis(
            "Potassium Deficiency",
            Severity::High,
            "Leaf edge burning, weak stems, disease susceptibility",
        ));
    } else if potassium > 20.0 {
        found.push(diagnosis(
            "Calcium & Magnesium Deficiency Risk",
            Severity::Medium,
            "Excess potassium blocks other nutrient absorption",
        ));
    }

    if nitrogen < 10.0 && phosphorus < 5.0 {
        found.push(diagnosis(
            "Severe Nutrient Depletion",
            Severity::High,
            "Multiple deficiencies causing poor overall health",
        ));
    }

    if found.is_empty() {
        found.push(diagnosis(
            "Healthy Nutrient Balance",
            Severity::Low,
            "NPK levels are within optimal range",
        ));
    }
    found
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Warning,
    Critical,
}

/// the model's own label wins; without one the worst diagnosis decides
pub fn overall_health(label: &str, diagnoses: &[Diagnosis]) -> OverallHealth {
    let label = label.trim().to_lowercase();
    if !label.is_empty() {
        return if label.contains("healthy") && !label.contains("unhealthy") {
            OverallHealth::Healthy
        } else {
            OverallHealth::Critical
        };
    }
    match diagnoses.iter().map(|d| d.severity).max() {
        Some(Severity::High) => OverallHealth::Critical,
        Some(Severity::Medium) => OverallHealth::Warning,
        Some(Severity::Low) | None => OverallHealth::Healthy,
    }
}

/// diagnoses plus the overall verdict for a prediction
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NutrientReport {
    pub overall: OverallHealth,
    pub diagnoses: Vec<Diagnosis>,
}

pub fn nutrient_report(prediction: &NutrientPrediction) -> NutrientReport {
    let diagnoses = diagnose(prediction.nitrogen, prediction.phosphorus, prediction.potassium);
    NutrientReport { overall: overall_health(&prediction.health_status, &diagnoses), diagnoses }
}

// ==============================================================================
// alerts
// ==============================================================================

pub fn evaluate(view: &ViewState, limits: &AlertConfig) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let prediction = view.inference.data.as_ref();

    let moisture = prediction
        .and_then(|p| p.observed.as_ref().map(|o| o.soil_moisture))
        .or_else(|| view.telemetry.data.as_ref().map(|r| r.soil_moisture));
    if let Some(moisture) = moisture {
        if moisture < limits.moisture_low {
            alerts.push(Alert {
                kind: AlertKind::LowMoisture,
                message: format!("Soil moisture is LOW ({}%)", moisture),
            });
        }
    }

    let Some(p) = prediction else {
        return alerts;
    };

    let nutrients = [
        (AlertKind::LowNitrogen, "Nitrogen", p.nitrogen, limits.nitrogen_low),
        (AlertKind::LowPhosphorus, "Phosphorus", p.phosphorus, limits.phosphorus_low),
        (AlertKind::LowPotassium, "Potassium", p.potassium, limits.potassium_low),
    ];
    for (kind, name, value, low) in nutrients {
        if value < low {
            alerts.push(Alert { kind, message: format!("{} is LOW ({})", name, value) });
        }
    }

    if p.health_status == CRITICAL_HEALTH {
        alerts.push(Alert {
            kind: AlertKind::CriticalHealth,
            message: format!("Overall health: CRITICAL. Recommendation: {}", p.recommendation),
        });
    }

    alerts
}

// ==============================================================================
// alert watcher
// ==============================================================================

/// where announced alerts go
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// announces alerts through the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        warn!("[ALERT] {}", message);
    }
}

/// one message for the whole alert set
pub fn compose_message(alerts: &[Alert]) -> String {
    let lines: Vec<&str> = alerts.iter().map(|a| a.message.as_str()).collect();
    format!("Plant Monitor Alert\n\n{}\n\nCheck dashboard.", lines.join("\n"))
}

/// check once now and again on every view change until shutdown
///
/// a notification goes out only when the set of alert kinds changes to a
/// non-empty one, so a persisting condition is announced once.
pub fn spawn_watcher<N>(
    mut view: watch::Receiver<ViewState>,
    limits: AlertConfig,
    mut shutdown: watch::Receiver<bool>,
    notifier: N,
) -> JoinHandle<()>
where
    N: Notifier + 'static,
{
    tokio::spawn(async move {
        let mut announced: Vec<AlertKind> = Vec::new();
        loop {
            let alerts = evaluate(&view.borrow_and_update(), &limits);
            let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
            if kinds != announced {
                if alerts.is_empty() {
                    info!("[ALERT] Plant is healthy again");
                } else {
                    notifier.notify(&compose_message(&alerts));
                }
                announced = kinds;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                changed = view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("alert watcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NutrientPrediction, ObservedConditions, SensorReading};

    fn view(soil: Option<f64>, prediction: Option<NutrientPrediction>) -> ViewState {
        let mut view = ViewState::default();
        view.telemetry.data = soil.map(|soil_moisture| SensorReading {
            temperature: 22.0,
            humidity: 60.0,
            soil_moisture,
            light_intensity: 70.0,
            recorded_at: None,
        });
        view.inference.data = prediction;
        view
    }

    fn prediction(n: f64, p: f64, k: f64, health: &str, observed_moisture: Option<f64>) -> NutrientPrediction {
        NutrientPrediction {
            nitrogen: n,
            phosphorus: p,
            potassium: k,
            health_status: health.to_string(),
            recommendation: "Add fertilizer".to_string(),
            observed: observed_moisture.map(|soil_moisture| ObservedConditions {
                soil_moisture,
                temperature: 22.0,
                humidity: 60.0,
            }),
        }
    }

    fn kinds(alerts: &[Alert]) -> Vec<AlertKind> {
        alerts.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_empty_view_has_no_alerts() {
        assert!(evaluate(&ViewState::default(), &AlertConfig::default()).is_empty());
        assert_eq!(bands(&ViewState::default()), Bands::default());
    }

    #[test]
    fn test_telemetry_moisture_only() {
        let alerts = evaluate(&view(Some(20.0), None), &AlertConfig::default());
        assert_eq!(kinds(&alerts), vec![AlertKind::LowMoisture]);
        assert_eq!(alerts[0].message, "Soil moisture is LOW (20%)");
    }

    #[test]
    fn test_model_moisture_wins_over_telemetry() {
        let v = view(Some(20.0), Some(prediction(15.0, 8.0, 9.0, "Healthy", Some(45.0))));
        assert!(evaluate(&v, &AlertConfig::default()).is_empty());
    }

    #[test]
    fn test_low_npk_and_critical() {
        let v = view(Some(50.0), Some(prediction(9.9, 4.0, 7.0, CRITICAL_HEALTH, None)));
        let alerts = evaluate(&v, &AlertConfig::default());
        assert_eq!(
            kinds(&alerts),
            vec![
                AlertKind::LowNitrogen,
                AlertKind::LowPhosphorus,
                AlertKind::LowPotassium,
                AlertKind::CriticalHealth
            ]
        );
        assert!(alerts[3].message.contains("Add fertilizer"));
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let limits = AlertConfig { nitrogen_low: 20.0, ..AlertConfig::default() };
        let v = view(None, Some(prediction(15.0, 8.0, 9.0, "Healthy", Some(45.0))));
        assert_eq!(kinds(&evaluate(&v, &limits)), vec![AlertKind::LowNitrogen]);
    }

    #[test]
    fn test_bands() {
        assert_eq!(moisture_band(29.0), Band::Alert);
        assert_eq!(moisture_band(35.0), Band::Warning);
        assert_eq!(moisture_band(60.0), Band::Healthy);
        assert_eq!(moisture_band(85.0), Band::Warning);

        assert_eq!(temperature_band(14.0), Band::Alert);
        assert_eq!(temperature_band(31.0), Band::Alert);
        assert_eq!(temperature_band(17.0), Band::Warning);
        assert_eq!(temperature_band(28.0), Band::Warning);
        assert_eq!(temperature_band(23.5), Band::Healthy);

        assert_eq!(light_band(10.0), Band::Alert);
        assert_eq!(light_band(30.0), Band::Warning);
        assert_eq!(light_band(95.0), Band::Warning);
        assert_eq!(light_band(76.0), Band::Healthy);

        assert_eq!(nutrient_band(4.0), Band::Alert);
        assert_eq!(nutrient_band(8.3), Band::Warning);
        assert_eq!(nutrient_band(15.0), Band::Healthy);
    }

    #[test]
    fn test_bands_from_view() {
        let v = view(Some(42.0), Some(prediction(15.0, 8.3, 9.0, "Healthy", None)));
        let b = bands(&v);
        assert_eq!(b.soil_moisture, Some(Band::Healthy));
        assert_eq!(b.temperature, Some(Band::Healthy));
        assert_eq!(b.phosphorus, Some(Band::Warning));
    }

    fn names(found: &[Diagnosis]) -> Vec<&'static str> {
        found.iter().map(|d| d.name).collect()
    }

    #[test]
    fn test_diagnosis_thresholds() {
        let cases: [(f64, f64, f64, &[&str]); 10] = [
            (15.0, 10.0, 12.0, &["Healthy Nutrient Balance"]),
            (10.0, 5.0, 8.0, &["Healthy Nutrient Balance"]),
            (25.0, 15.0, 20.0, &["Healthy Nutrient Balance"]),
            (9.9, 10.0, 12.0, &["Nitrogen Deficiency"]),
            (25.1, 10.0, 12.0, &["Excessive Vegetative Growth"]),
            (15.0, 4.9, 12.0, &["Phosphorus Deficiency"]),
            (15.0, 15.1, 12.0, &["Zinc & Iron Deficiency Risk"]),
            (15.0, 10.0, 7.9, &["Potassium Deficiency"]),
            (15.0, 10.0, 20.1, &["Calcium & Magnesium Deficiency Risk"]),
            (
                5.0,
                2.0,
                30.0,
                &[
                    "Nitrogen Deficiency",
                    "Phosphorus Deficiency",
                    "Calcium & Magnesium Deficiency Risk",
                    "Severe Nutrient Depletion",
                ],
            ),
        ];
        for (n, p, k, expected) in cases {
            assert_eq!(names(&diagnose(n, p, k)), expected.to_vec(), "n={} p={} k={}", n, p, k);
        }
    }

    #[test]
    fn test_diagnosis_severity() {
        let found = diagnose(30.0, 2.0, 10.0);
        assert_eq!(found[0].severity, Severity::Medium);
        assert_eq!(found[1].severity, Severity::High);
        assert_eq!(diagnose(15.0, 10.0, 12.0)[0].severity, Severity::Low);
        // depletion needs both n and p low
        assert!(!names(&diagnose(5.0, 10.0, 12.0)).contains(&"Severe Nutrient Depletion"));
    }

    #[test]
    fn test_overall_health() {
        let high = diagnose(5.0, 10.0, 12.0);
        let medium = diagnose(30.0, 10.0, 12.0);
        let low = diagnose(15.0, 10.0, 12.0);

        assert_eq!(overall_health("Healthy", &high), OverallHealth::Healthy);
        assert_eq!(overall_health("Critical", &low), OverallHealth::Critical);
        assert_eq!(overall_health("Unhealthy", &low), OverallHealth::Critical);
        assert_eq!(overall_health("", &high), OverallHealth::Critical);
        assert_eq!(overall_health("", &medium), OverallHealth::Warning);
        assert_eq!(overall_health("  ", &low), OverallHealth::Healthy);
    }

    #[test]
    fn test_nutrient_report_uses_prediction() {
        let report = nutrient_report(&prediction(9.0, 4.0, 9.0, "Critical", None));
        assert_eq!(report.overall, OverallHealth::Critical);
        assert_eq!(report.diagnoses.last().map(|d| d.name), Some("Severe Nutrient Depletion"));
    }

    impl Notifier for tokio::sync::mpsc::UnboundedSender<String> {
        fn notify(&self, message: &str) {
            let _ = self.send(message.to_string());
        }
    }

    #[tokio::test]
    async fn test_watcher_announces_new_alerts_once() {
        let (view_tx, view_rx) = watch::channel(ViewState::default());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (notes_tx, mut notes) = tokio::sync::mpsc::unbounded_channel();
        let watcher = spawn_watcher(view_rx, AlertConfig::default(), stop_rx, notes_tx);

        view_tx.send_replace(view(Some(20.0), None));
        let message = notes.recv().await.unwrap();
        assert!(message.contains("Soil moisture is LOW (20%)"));
        assert!(message.ends_with("Check dashboard."));

        // same alert kinds, different reading: not announced again
        let mut still_dry = view(Some(20.0), None);
        still_dry.telemetry.data.as_mut().unwrap().temperature = 25.0;
        view_tx.send_replace(still_dry);

        drop(view_tx);
        watcher.await.unwrap();
        assert!(notes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watcher_stops_on_shutdown() {
        let (_view_tx, view_rx) = watch::channel(view(Some(20.0), None));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (notes_tx, mut notes) = tokio::sync::mpsc::unbounded_channel();
        let watcher = spawn_watcher(view_rx, AlertConfig::default(), stop_rx, notes_tx);

        // the initial check runs before any change
        assert!(notes.recv().await.unwrap().contains("Soil moisture"));
        stop_tx.send_replace(true);
        watcher.await.unwrap();
    }
}
