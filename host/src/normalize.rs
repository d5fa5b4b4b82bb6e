//! ==============================================================================
//! normalize.rs - raw response shapes -> domain records
//! ==============================================================================
//!
//! purpose:
//!     turns what each remote source returns into the records in domain.rs.
//!
//! policy:
//!     - telemetry is lenient: a bad field becomes 0, partial data beats none.
//!     - inference is strict: the positional array is validated first and any
//!       mismatch fails closed.
//!     - weather codes go through a fixed wmo range table.
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{Coordinate, NutrientPrediction, ObservedConditions, SensorReading, WeatherSnapshot};
use crate::error::SourceError;

/// `fetchStatus` value the inference space uses to report its own failure
pub const REMOTE_ERROR_STATUS: &str = "Error";

// ==============================================================================
// telemetry (thingspeak feeds.json)
// ==============================================================================

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    feeds: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    field1: Value,
    #[serde(default)]
    field2: Value,
    #[serde(default)]
    field3: Value,
    #[serde(default)]
    field4: Value,
}

/// read a json scalar as a number, accepting numeric strings
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// field value or 0, never an error
pub fn lenient_number(value: &Value) -> f64 {
    number(value).unwrap_or(0.0)
}

/// parse a feeds.json body; uses the most recent entry
pub fn parse_feed(body: &str) -> Result<SensorReading, SourceError> {
    let response: FeedResponse = serde_json::from_str(body)?;
    let entry = response
        .feeds
        .last()
        .ok_or_else(|| SourceError::Parse("feed contains no entries".to_string()))?;

    let recorded_at = entry
        .created_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(SensorReading {
        temperature: lenient_number(&entry.field1),
        humidity: lenient_number(&entry.field2),
        soil_moisture: lenient_number(&entry.field3),
        light_intensity: lenient_number(&entry.field4),
        recorded_at,
    })
}

// ==============================================================================
// weather (open-meteo forecast, current block)
// ==============================================================================

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    #[serde(default)]
    wind_speed_10m: Value,
    #[serde(default)]
    weather_code: Value,
}

/// wmo weather code -> condition label
pub fn condition_for_code(code: i64) -> &'static str {
    match code {
        0 => "Clear Sky",
        1..=3 => "Partly Cloudy",
        45..=48 => "Fog",
        51..=57 => "Drizzle",
        61..=67 => "Rain",
        71..=77 => "Snow",
        80..=82 => "Rain Showers",
        85..=86 => "Snow Showers",
        95..=99 => "Thunderstorm",
        _ => "Unknown",
    }
}

pub fn parse_forecast(body: &str, location: Coordinate) -> Result<WeatherSnapshot, SourceError> {
    let response: ForecastResponse = serde_json::from_str(body)?;
    let current = response.current;

    let weather_code = number(&current.weather_code)
        .filter(|v| v.fract() == 0.0)
        .map(|v| v as i64);
    let condition = weather_code.map(condition_for_code).unwrap_or("Unknown");

    Ok(WeatherSnapshot {
        wind_speed: lenient_number(&current.wind_speed_10m),
        weather_code,
        condition: condition.to_string(),
        location,
    })
}

// ==============================================================================
// inference (gradio space outputs)
// ==============================================================================

fn text_at(values: &[Value], index: usize, name: &str) -> Result<String, SourceError> {
    match &values[index] {
        Value::String(s) => Ok(s.clone()),
        other => Err(SourceError::Shape(format!("{} (slot {}) is not text: {}", name, index, other))),
    }
}

fn number_at(values: &[Value], index: usize, name: &str) -> Result<f64, SourceError> {
    number(&values[index])
        .ok_or_else(|| SourceError::Shape(format!("{} (slot {}) is not numeric: {}", name, index, values[index])))
}

/// `analyze_live_data` output:
/// `[fetch status, health, recommendation, n, p, k, moisture, temperature, humidity]`
pub fn parse_live_analysis(values: &[Value]) -> Result<NutrientPrediction, SourceError> {
    // the status slot wins over shape checks so remote failures report clearly
    if let Some(Value::String(status)) = values.first() {
        if status == REMOTE_ERROR_STATUS {
            return Err(SourceError::Remote(status.clone()));
        }
    }
    if values.len() != 9 {
        return Err(SourceError::Shape(format!("expected 9 outputs, got {}", values.len())));
    }
    text_at(values, 0, "fetch status")?;

    Ok(NutrientPrediction {
        health_status: text_at(values, 1, "health status")?,
        recommendation: text_at(values, 2, "recommendation")?,
        nitrogen: number_at(values, 3, "nitrogen")?,
        phosphorus: number_at(values, 4, "phosphorus")?,
        potassium: number_at(values, 5, "potassium")?,
        observed: Some(ObservedConditions {
            soil_moisture: number_at(values, 6, "soil moisture")?,
            temperature: number_at(values, 7, "temperature")?,
            humidity: number_at(values, 8, "humidity")?,
        }),
    })
}

/// `analyze_plant` output: `[health, recommendation, n, p, k]`
pub fn parse_plant_analysis(values: &[Value]) -> Result<NutrientPrediction, SourceError> {
    if values.len() != 5 {
        return Err(SourceError::Shape(format!("expected 5 outputs, got {}", values.len())));
    }

    Ok(NutrientPrediction {
        health_status: text_at(values, 0, "health status")?,
        recommendation: text_at(values, 1, "recommendation")?,
        nitrogen: number_at(values, 2, "nitrogen")?,
        phosphorus: number_at(values, 3, "phosphorus")?,
        potassium: number_at(values, 4, "potassium")?,
        observed: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HOME: Coordinate = Coordinate { latitude: 12.97, longitude: 77.59 };

    #[test]
    fn test_feed_with_bad_field_defaults_to_zero() {
        let body = json!({
            "channel": {"id": 2638062},
            "feeds": [{
                "created_at": "2024-06-01T10:00:00Z",
                "entry_id": 7,
                "field1": "21.5",
                "field2": "60",
                "field3": "abc",
                "field4": "80"
            }]
        })
        .to_string();

        let reading = parse_feed(&body).unwrap();
        assert_eq!(reading.temperature, 21.5);
        assert_eq!(reading.humidity, 60.0);
        assert_eq!(reading.soil_moisture, 0.0);
        assert_eq!(reading.light_intensity, 80.0);
        assert_eq!(
            reading.recorded_at.unwrap().to_rfc3339(),
            "2024-06-01T10:00:00+00:00"
        );
    }

    #[test]
    fn test_feed_missing_and_null_fields() {
        let body = r#"{"feeds":[{"created_at":"bogus","field1":null,"field2":12,"field4":{"x":1}}]}"#;
        let reading = parse_feed(body).unwrap();
        assert_eq!(reading.temperature, 0.0);
        assert_eq!(reading.humidity, 12.0);
        assert_eq!(reading.soil_moisture, 0.0);
        assert_eq!(reading.light_intensity, 0.0);
        assert!(reading.recorded_at.is_none());
    }

    #[test]
    fn test_feed_uses_latest_entry() {
        let body = r#"{"feeds":[{"field1":"1"},{"field1":"2"}]}"#;
        assert_eq!(parse_feed(body).unwrap().temperature, 2.0);
    }

    #[test]
    fn test_empty_feed_is_an_error() {
        assert!(matches!(parse_feed(r#"{"feeds":[]}"#), Err(SourceError::Parse(_))));
        assert!(matches!(parse_feed("-1"), Err(SourceError::Parse(_))));
    }

    #[test]
    fn test_lenient_number_rejects_non_finite() {
        assert_eq!(lenient_number(&json!("NaN")), 0.0);
        assert_eq!(lenient_number(&json!("inf")), 0.0);
        assert_eq!(lenient_number(&json!(" 3.25 ")), 3.25);
        assert_eq!(lenient_number(&json!(true)), 0.0);
    }

    #[test]
    fn test_weather_code_table() {
        assert_eq!(condition_for_code(0), "Clear Sky");
        assert_eq!(condition_for_code(2), "Partly Cloudy");
        assert_eq!(condition_for_code(45), "Fog");
        assert_eq!(condition_for_code(55), "Drizzle");
        assert_eq!(condition_for_code(61), "Rain");
        assert_eq!(condition_for_code(75), "Snow");
        assert_eq!(condition_for_code(81), "Rain Showers");
        assert_eq!(condition_for_code(86), "Snow Showers");
        assert_eq!(condition_for_code(99), "Thunderstorm");
    }

    #[test]
    fn test_weather_code_outside_ranges_is_unknown() {
        for code in [-1, 4, 44, 60, 100, 1000] {
            assert_eq!(condition_for_code(code), "Unknown", "code {}", code);
        }
    }

    #[test]
    fn test_forecast_rain() {
        let body = r#"{"latitude":12.97,"current":{"time":"2024-06-01T10:00","wind_speed_10m":7.4,"weather_code":61}}"#;
        let snapshot = parse_forecast(body, HOME).unwrap();
        assert_eq!(snapshot.condition, "Rain");
        assert_eq!(snapshot.weather_code, Some(61));
        assert_eq!(snapshot.wind_speed, 7.4);
        assert_eq!(snapshot.location, HOME);
    }

    #[test]
    fn test_forecast_code_as_integral_float() {
        let body = r#"{"current":{"wind_speed_10m":3,"weather_code":61.0}}"#;
        let snapshot = parse_forecast(body, HOME).unwrap();
        assert_eq!(snapshot.weather_code, Some(61));
        assert_eq!(snapshot.condition, "Rain");

        let body = r#"{"current":{"weather_code":61.5}}"#;
        let snapshot = parse_forecast(body, HOME).unwrap();
        assert_eq!(snapshot.weather_code, None);
        assert_eq!(snapshot.condition, "Unknown");
    }

    #[test]
    fn test_forecast_without_code() {
        let snapshot = parse_forecast(r#"{"current":{}}"#, HOME).unwrap();
        assert_eq!(snapshot.condition, "Unknown");
        assert_eq!(snapshot.wind_speed, 0.0);
        assert!(parse_forecast(r#"{"hourly":{}}"#, HOME).is_err());
    }

    #[test]
    fn test_live_analysis_maps_positionally() {
        let values = vec![
            json!("Success"),
            json!("Healthy"),
            json!("Keep watering schedule"),
            json!(14.2),
            json!(6.1),
            json!("9.5"),
            json!(41),
            json!(24.0),
            json!(63.0),
        ];
        let prediction = parse_live_analysis(&values).unwrap();
        assert_eq!(prediction.health_status, "Healthy");
        assert_eq!(prediction.nitrogen, 14.2);
        assert_eq!(prediction.potassium, 9.5);
        let observed = prediction.observed.unwrap();
        assert_eq!(observed.soil_moisture, 41.0);
        assert_eq!(observed.humidity, 63.0);
    }

    #[test]
    fn test_live_analysis_remote_error() {
        let values = vec![json!("Error"), json!("Unknown"), json!(""), json!(0), json!(0), json!(0), json!(0), json!(0), json!(0)];
        assert_eq!(
            parse_live_analysis(&values),
            Err(SourceError::Remote("Error".to_string()))
        );
    }

    #[test]
    fn test_live_analysis_fails_closed_on_shape() {
        assert!(matches!(parse_live_analysis(&[json!("Success")]), Err(SourceError::Shape(_))));

        let mut values: Vec<Value> = vec![json!("Success"), json!("Healthy"), json!("ok")];
        values.extend([json!(1), json!("n/a"), json!(1), json!(1), json!(1), json!(1)]);
        assert!(matches!(parse_live_analysis(&values), Err(SourceError::Shape(_))));

        let mut values: Vec<Value> = vec![json!("Success"), json!(3), json!("ok")];
        values.extend(std::iter::repeat(json!(1)).take(6));
        assert!(matches!(parse_live_analysis(&values), Err(SourceError::Shape(_))));
    }

    #[test]
    fn test_plant_analysis() {
        let values = vec![json!("Critical"), json!("Add nitrogen"), json!(4), json!(3), json!(2)];
        let prediction = parse_plant_analysis(&values).unwrap();
        assert_eq!(prediction.health_status, "Critical");
        assert_eq!(prediction.nitrogen, 4.0);
        assert!(prediction.observed.is_none());
        assert!(parse_plant_analysis(&values[..4]).is_err());
    }
}
