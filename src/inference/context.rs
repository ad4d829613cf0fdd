//! Context rendering, prompt template and the rule-based fallback.

use crate::sensor::{Reading, ReadingValue, SensorKind};

/// Query used when the caller supplies none.
pub const DEFAULT_QUERY: &str =
    "Analyze the sensor data and provide insights about the current environment.";

const SYSTEM_PROMPT: &str = "You are an intelligent edge AI assistant with access to real-time sensor data. Analyze sensor readings and provide contextual insights.";

/// Temperature change across the last three readings that counts as a trend.
const TREND_DELTA: f64 = 0.5;

/// Idle seconds after which the fallback calls an area quiet.
const QUIET_AFTER_SECS: i64 = 60;

/// Render one line per sensor from its most recent reading.
///
/// `recent` is in registration order, readings oldest first. Sensors with no
/// readings are skipped.
pub fn render_context(recent: &[(String, Vec<Reading>)]) -> String {
    recent
        .iter()
        .filter_map(|(sensor_id, readings)| {
            readings.last().map(|latest| render_line(sensor_id, latest, readings))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(sensor_id: &str, latest: &Reading, readings: &[Reading]) -> String {
    match &latest.sensor_type {
        SensorKind::Temperature => {
            let mut line = format!("Temperature sensor '{sensor_id}': {}°C", latest.value);
            match temperature_trend(readings) {
                Some(true) => line.push_str(" (increasing)"),
                Some(false) => line.push_str(" (decreasing)"),
                None => {}
            }
            line
        }
        SensorKind::Motion => {
            if matches!(latest.value, ReadingValue::Boolean(true)) {
                format!("Motion detected on sensor '{sensor_id}'")
            } else if let Some(last) = latest.metadata_f64("last_motion") {
                let idle = (latest.epoch_secs() - last).max(0.0) as i64;
                format!("No motion for {idle}s on '{sensor_id}'")
            } else {
                format!("No motion on '{sensor_id}'")
            }
        }
        SensorKind::Camera => {
            let objects = latest
                .metadata
                .get("objects_detected")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let brightness = latest.metadata_f64("brightness").unwrap_or(0.5);
            format!("Camera '{sensor_id}': {objects} objects detected, brightness {brightness:.2}")
        }
        SensorKind::Accelerometer => {
            let magnitude = match &latest.value {
                ReadingValue::Vector(c) => c.values().map(|v| v * v).sum::<f64>().sqrt(),
                _ => 0.0,
            };
            format!("Accelerometer '{sensor_id}': magnitude {magnitude:.2} m/s²")
        }
        SensorKind::Generic(label) => {
            format!("Sensor '{sensor_id}' ({label}): {} {}", latest.value, latest.unit)
        }
    }
}

/// `Some(true)` rising, `Some(false)` falling, over the last three readings.
fn temperature_trend(readings: &[Reading]) -> Option<bool> {
    if readings.len() < 3 {
        return None;
    }
    let tail = &readings[readings.len() - 3..];
    let first = tail[0].value.as_f64()?;
    let last = tail[2].value.as_f64()?;
    if last > first + TREND_DELTA {
        Some(true)
    } else if last < first - TREND_DELTA {
        Some(false)
    } else {
        None
    }
}

/// Wrap the context and query in the chat template.
pub fn build_prompt(context: &str, query: Option<&str>) -> String {
    let query = query.filter(|q| !q.trim().is_empty()).unwrap_or(DEFAULT_QUERY);
    format!(
        "<|system|>\n{SYSTEM_PROMPT}\n\nCurrent Sensor Data:\n{context}\n<|end|>\n<|user|>\n{query}\n<|end|>\n<|assistant|>"
    )
}

/// Deterministic keyword summary of a rendered context.
pub fn fallback_summary(context: &str) -> String {
    let mut insights: Vec<&str> = context.lines().filter_map(insight_for).collect();
    if insights.is_empty() {
        insights.push("All sensor readings are within normal ranges.");
    }

    let bullets: Vec<String> = insights.iter().map(|i| format!("• {i}")).collect();
    format!("Sensor Analysis:\n{}", bullets.join("\n"))
}

fn insight_for(line: &str) -> Option<&'static str> {
    if line.starts_with("Temperature") && line.contains("(increasing)") {
        Some("Temperature is rising - monitor for overheating.")
    } else if line.starts_with("Temperature") && line.contains("(decreasing)") {
        Some("Temperature is falling - check heating or ventilation.")
    } else if line.starts_with("Motion detected") {
        Some("Activity detected in the area.")
    } else if idle_seconds(line).map_or(false, |s| s >= QUIET_AFTER_SECS) {
        Some("Area has been quiet for over a minute.")
    } else {
        None
    }
}

/// Parse `n` out of "No motion for {n}s on ...".
fn idle_seconds(line: &str) -> Option<i64> {
    line.strip_prefix("No motion for ")?
        .split_once("s on ")?
        .0
        .parse()
        .ok()
}
