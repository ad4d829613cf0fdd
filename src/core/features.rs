//! Feature extraction from raw readings.
//!
//! The [`Preprocessor`] turns each reading into a numeric feature vector,
//! keeping a short temporal window per sensor. Windowed features only appear
//! once enough samples are buffered, so a sensor's vector grows during warm-up.

use crate::core::stats;
use crate::core::vision::{self, WORKING_SIZE};
use crate::core::windowing::RingBuffer;
use crate::sensor::{Reading, ReadingValue, SensorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Normalization for temperature: (v - mean) / std.
const TEMPERATURE_MEAN: f64 = 22.0;
const TEMPERATURE_STD: f64 = 5.0;

/// `time_since_motion` is expressed in minutes and capped here.
const MOTION_IDLE_CAP_MINUTES: f64 = 10.0;

/// Numeric features extracted from one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub features: Vec<f64>,
    /// Names parallel to `features`
    pub feature_names: Vec<String>,
    pub context: HashMap<String, Value>,
}

impl FeatureRecord {
    pub fn new(sensor_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp,
            features: Vec::new(),
            feature_names: Vec::new(),
            context: HashMap::new(),
        }
    }

    /// Append a named feature.
    pub fn push(&mut self, name: impl Into<String>, value: f64) {
        self.features.push(value);
        self.feature_names.push(name.into());
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.feature_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.features[i])
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Preprocessor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    pub window_size: usize,
    pub normalize: bool,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            normalize: true,
        }
    }
}

/// Converts readings into feature records with per-sensor temporal windows.
pub struct Preprocessor {
    config: PreprocessorConfig,
    /// One row per buffered sample; the row shape depends on the sensor kind.
    windows: HashMap<String, RingBuffer<Vec<f64>>>,
}

impl Preprocessor {
    pub fn new(config: PreprocessorConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    /// Extract features from one reading.
    ///
    /// Returns `None` when the value's shape does not fit the sensor kind.
    pub fn process_reading(&mut self, reading: &Reading) -> Option<FeatureRecord> {
        match &reading.sensor_type {
            SensorKind::Temperature => self.temperature(reading),
            SensorKind::Motion => self.motion(reading),
            SensorKind::Camera => camera(reading),
            SensorKind::Accelerometer => self.accelerometer(reading),
            SensorKind::Generic(label) => Some(generic(reading, label)),
        }
    }

    /// Process readings in order, dropping those that yield no features.
    pub fn process_batch(&mut self, readings: &[Reading]) -> Vec<FeatureRecord> {
        readings
            .iter()
            .filter_map(|r| self.process_reading(r))
            .collect()
    }

    /// The last `len` window rows for a sensor, flattened oldest first and
    /// left-padded with zero rows. `None` for a sensor never seen.
    pub fn temporal_embedding(&self, sensor_id: &str, len: usize) -> Option<Vec<f64>> {
        let window = self.windows.get(sensor_id)?;
        let rows = window.last_n(len);
        let width = rows.first().map(|r| r.len()).unwrap_or(1);

        let mut out = vec![0.0; (len - rows.len()) * width];
        for row in rows {
            out.extend(row);
        }
        Some(out)
    }

    /// Forget one sensor's window.
    pub fn reset(&mut self, sensor_id: &str) {
        self.windows.remove(sensor_id);
    }

    fn window(&mut self, sensor_id: &str) -> &mut RingBuffer<Vec<f64>> {
        let capacity = self.config.window_size;
        self.windows
            .entry(sensor_id.to_string())
            .or_insert_with(|| RingBuffer::new(capacity))
    }

    fn temperature(&mut self, reading: &Reading) -> Option<FeatureRecord> {
        let value = match reading.value {
            ReadingValue::Scalar(v) => v,
            _ => return None,
        };
        let normalize = self.config.normalize;
        let window = self.window(&reading.sensor_id);
        window.push(vec![value]);

        let mut record = FeatureRecord::new(reading.sensor_id.clone(), reading.timestamp)
            .with_context("raw_value", value)
            .with_context("unit", reading.unit.clone());

        let current = if normalize {
            (value - TEMPERATURE_MEAN) / TEMPERATURE_STD
        } else {
            value
        };
        record.push("temperature_current", current);

        if let Some(previous) = window.previous() {
            record.push("temperature_delta", value - previous[0]);
        }

        if window.is_full() {
            let values: Vec<f64> = window.iter().map(|row| row[0]).collect();
            record.push("temperature_mean", stats::mean(&values));
            record.push("temperature_std", stats::std_dev(&values));
            record.push("temperature_min", stats::min(&values));
            record.push("temperature_max", stats::max(&values));
        }

        Some(record)
    }

    fn motion(&mut self, reading: &Reading) -> Option<FeatureRecord> {
        let detected = match reading.value {
            ReadingValue::Boolean(b) => b,
            _ => return None,
        };
        let current = if detected { 1.0 } else { 0.0 };
        let window = self.window(&reading.sensor_id);
        window.push(vec![current]);

        let mut record = FeatureRecord::new(reading.sensor_id.clone(), reading.timestamp)
            .with_context("motion_detected", detected);
        record.push("motion_current", current);

        if window.is_full() {
            let active: f64 = window.iter().map(|row| row[0]).sum();
            record.push("motion_frequency", active / window.len() as f64);

            let idle_secs = if detected {
                0.0
            } else {
                let now = reading.epoch_secs();
                let last = reading.metadata_f64("last_motion").unwrap_or(now);
                (now - last).max(0.0)
            };
            record.push(
                "time_since_motion",
                (idle_secs / 60.0).min(MOTION_IDLE_CAP_MINUTES),
            );
        }

        Some(record)
    }

    fn accelerometer(&mut self, reading: &Reading) -> Option<FeatureRecord> {
        let components = match &reading.value {
            ReadingValue::Vector(c) => c,
            _ => return None,
        };
        let axis = |name: &str| components.get(name).copied().unwrap_or(0.0);
        let (x, y, z) = (axis("x"), axis("y"), axis("z"));
        let magnitude = (x * x + y * y + z * z).sqrt();

        let window = self.window(&reading.sensor_id);
        window.push(vec![x, y, z, magnitude]);

        let mut record = FeatureRecord::new(reading.sensor_id.clone(), reading.timestamp)
            .with_context("raw_accel", json!({ "x": x, "y": y, "z": z }));
        record.push("accel_x", x);
        record.push("accel_y", y);
        record.push("accel_z", z);
        record.push("accel_magnitude", magnitude);

        if window.len() >= 3 {
            let rows = window.to_vec();
            let jerks: Vec<f64> = rows
                .windows(2)
                .map(|pair| {
                    (0..3)
                        .map(|i| (pair[1][i] - pair[0][i]).powi(2))
                        .sum::<f64>()
                        .sqrt()
                })
                .collect();
            record.push("jerk_magnitude", stats::mean(&jerks));

            for (i, name) in ["x", "y", "z"].iter().enumerate() {
                let column: Vec<f64> = rows.iter().map(|row| row[i]).collect();
                record.push(format!("accel_{name}_variance"), stats::variance(&column));
            }
        }

        Some(record)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(PreprocessorConfig::default())
    }
}

fn camera(reading: &Reading) -> Option<FeatureRecord> {
    let frame = match &reading.value {
        ReadingValue::Image(frame) => frame,
        _ => return None,
    };
    let small = vision::downsample(frame, WORKING_SIZE);
    let gray = small.grayscale();

    let mut record = FeatureRecord::new(reading.sensor_id.clone(), reading.timestamp)
        .with_context(
            "frame_shape",
            json!([frame.height(), frame.width(), frame.channels()]),
        )
        .with_context(
            "objects_detected",
            reading
                .metadata
                .get("objects_detected")
                .cloned()
                .unwrap_or(json!(0)),
        );
    if let Some(resolution) = reading.metadata.get("resolution") {
        record.context.insert("resolution".to_string(), resolution.clone());
    }

    for (i, channel) in ["r", "g", "b"].iter().enumerate() {
        record.push(format!("brightness_{channel}"), small.channel(i).mean() / 255.0);
    }
    record.push("brightness_overall", gray.mean() / 255.0);
    record.push("contrast", gray.std_dev() / 255.0);
    record.push("edge_density", vision::sobel_magnitude_mean(&gray) / 255.0);

    Some(record)
}

fn generic(reading: &Reading, label: &str) -> FeatureRecord {
    let mut record = FeatureRecord::new(reading.sensor_id.clone(), reading.timestamp);
    match &reading.value {
        ReadingValue::Scalar(_) | ReadingValue::Boolean(_) => {
            let value = reading.value.as_f64().unwrap_or(0.0);
            record.push(format!("{label}_value"), value);
            record.context.insert("raw_value".to_string(), json!(value));
        }
        _ => record.push("unknown", 0.0),
    }
    record
}

/// Concatenate several feature vectors in order.
pub fn fuse(records: &[FeatureRecord]) -> Vec<f64> {
    records
        .iter()
        .flat_map(|r| r.features.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::ImageFrame;
    use chrono::Duration;

    fn temperature(v: f64) -> Reading {
        Reading::new("t", SensorKind::Temperature, ReadingValue::Scalar(v), "°C", 0.95)
    }

    fn motion(detected: bool, idle_secs: i64) -> Reading {
        let now = Utc::now();
        let last = now - Duration::seconds(idle_secs);
        Reading::new("m", SensorKind::Motion, ReadingValue::Boolean(detected), "boolean", 1.0)
            .at(now)
            .with_metadata("last_motion", crate::sensor::types::epoch_secs(last))
    }

    #[test]
    fn test_temperature_window_growth() {
        let mut pre = Preprocessor::default();
        let first = pre.process_reading(&temperature(27.0)).unwrap();
        assert_eq!(first.feature_names, vec!["temperature_current"]);
        assert!((first.features[0] - 1.0).abs() < 1e-12);

        let second = pre.process_reading(&temperature(25.0)).unwrap();
        assert_eq!(second.len(), 2);
        assert!((second.get("temperature_delta").unwrap() + 2.0).abs() < 1e-12);

        let mut last = second;
        for _ in 0..8 {
            last = pre.process_reading(&temperature(25.0)).unwrap();
        }
        assert_eq!(last.len(), 6);
        assert!((last.get("temperature_mean").unwrap() - 25.2).abs() < 1e-9);
        assert_eq!(last.get("temperature_max"), Some(27.0));
        assert_eq!(last.get("temperature_min"), Some(25.0));
    }

    #[test]
    fn test_temperature_without_normalization() {
        let mut pre = Preprocessor::new(PreprocessorConfig {
            window_size: 3,
            normalize: false,
        });
        let record = pre.process_reading(&temperature(21.5)).unwrap();
        assert_eq!(record.features, vec![21.5]);
    }

    #[test]
    fn test_motion_features() {
        let mut pre = Preprocessor::new(PreprocessorConfig {
            window_size: 4,
            normalize: true,
        });
        pre.process_reading(&motion(true, 0));
        pre.process_reading(&motion(false, 30));
        let partial = pre.process_reading(&motion(false, 60)).unwrap();
        assert_eq!(partial.feature_names, vec!["motion_current"]);

        let full = pre.process_reading(&motion(false, 120)).unwrap();
        assert_eq!(full.get("motion_frequency"), Some(0.25));
        assert!((full.get("time_since_motion").unwrap() - 2.0).abs() < 0.01);

        let capped = pre.process_reading(&motion(false, 3600)).unwrap();
        assert_eq!(capped.get("time_since_motion"), Some(10.0));

        let active = pre.process_reading(&motion(true, 0)).unwrap();
        assert_eq!(active.get("time_since_motion"), Some(0.0));
    }

    #[test]
    fn test_accelerometer_features() {
        let mut pre = Preprocessor::default();
        let make = |x: f64| {
            Reading::new(
                "a",
                SensorKind::Accelerometer,
                ReadingValue::axes(x, 0.0, 0.0),
                "m/s²",
                0.95,
            )
        };
        let first = pre.process_reading(&make(3.0)).unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(first.get("accel_magnitude"), Some(3.0));

        pre.process_reading(&make(4.0));
        let third = pre.process_reading(&make(6.0)).unwrap();
        assert_eq!(third.len(), 8);
        // Jerks are 1 and 2.
        assert!((third.get("jerk_magnitude").unwrap() - 1.5).abs() < 1e-12);
        let expected_var = stats::variance(&[3.0, 4.0, 6.0]);
        assert!((third.get("accel_x_variance").unwrap() - expected_var).abs() < 1e-12);
        assert_eq!(third.get("accel_y_variance"), Some(0.0));
    }

    #[test]
    fn test_camera_features() {
        let frame = ImageFrame::new(640, 480, 3, vec![255; 640 * 480 * 3]).unwrap();
        let reading = Reading::new(
            "c",
            SensorKind::Camera,
            ReadingValue::Image(frame),
            "rgb_frame",
            0.9,
        )
        .with_metadata("objects_detected", 2);
        let mut pre = Preprocessor::default();
        let record = pre.process_reading(&reading).unwrap();
        assert_eq!(
            record.feature_names,
            vec![
                "brightness_r",
                "brightness_g",
                "brightness_b",
                "brightness_overall",
                "contrast",
                "edge_density"
            ]
        );
        assert!((record.get("brightness_overall").unwrap() - 1.0).abs() < 1e-9);
        assert!(record.get("contrast").unwrap().abs() < 1e-9);
        assert!(record.get("edge_density").unwrap().abs() < 1e-9);
        assert_eq!(record.context["objects_detected"], json!(2));
    }

    #[test]
    fn test_shape_mismatch_yields_none() {
        let mut pre = Preprocessor::default();
        let bad_temp = Reading::new(
            "t",
            SensorKind::Temperature,
            ReadingValue::Boolean(true),
            "",
            1.0,
        );
        let bad_cam = Reading::new("c", SensorKind::Camera, ReadingValue::Scalar(1.0), "", 1.0);
        let bad_accel = Reading::new(
            "a",
            SensorKind::Accelerometer,
            ReadingValue::Scalar(1.0),
            "",
            1.0,
        );
        assert!(pre.process_reading(&bad_temp).is_none());
        assert!(pre.process_reading(&bad_cam).is_none());
        assert!(pre.process_reading(&bad_accel).is_none());

        let batch = pre.process_batch(&[bad_temp, temperature(22.0)]);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_generic_passthrough() {
        let mut pre = Preprocessor::default();
        let kind = SensorKind::Generic("humidity".to_string());
        let scalar = Reading::new("h", kind.clone(), ReadingValue::Scalar(55.0), "%", 1.0);
        let record = pre.process_reading(&scalar).unwrap();
        assert_eq!(record.feature_names, vec!["humidity_value"]);
        assert_eq!(record.features, vec![55.0]);

        let odd = Reading::new("h", kind, ReadingValue::axes(1.0, 2.0, 3.0), "", 1.0);
        let record = pre.process_reading(&odd).unwrap();
        assert_eq!(record.feature_names, vec!["unknown"]);
        assert_eq!(record.features, vec![0.0]);
    }

    #[test]
    fn test_embedding_fuse_and_reset() {
        let mut pre = Preprocessor::default();
        assert!(pre.temporal_embedding("t", 4).is_none());

        let a = pre.process_reading(&temperature(20.0)).unwrap();
        let b = pre.process_reading(&temperature(21.0)).unwrap();
        assert_eq!(pre.temporal_embedding("t", 4), Some(vec![0.0, 0.0, 20.0, 21.0]));
        assert_eq!(pre.temporal_embedding("t", 1), Some(vec![21.0]));

        assert_eq!(fuse(&[a.clone(), b.clone()]).len(), a.len() + b.len());

        pre.reset("t");
        assert!(pre.temporal_embedding("t", 4).is_none());
    }
}
