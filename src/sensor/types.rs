//! Reading types shared by every sensor variant.
//!
//! A [`Reading`] is produced once per sample and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Closed set of sensor kinds understood by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Motion,
    Camera,
    Accelerometer,
    /// Any other scalar source, tagged with its type label (e.g. "humidity").
    Generic(String),
}

impl SensorKind {
    /// Short lower-case label used in feature names and logs.
    pub fn label(&self) -> &str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Motion => "motion",
            SensorKind::Camera => "camera",
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Generic(label) => label,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A captured image frame, row-major and channel-interleaved.
///
/// The shape always matches the buffer: frames are only built through
/// [`ImageFrame::new`], and deserialization runs the same check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameParts")]
pub struct ImageFrame {
    width: usize,
    height: usize,
    channels: usize,
    pixels: Vec<u8>,
}

#[derive(Deserialize)]
struct FrameParts {
    width: usize,
    height: usize,
    channels: usize,
    pixels: Vec<u8>,
}

impl TryFrom<FrameParts> for ImageFrame {
    type Error = String;

    fn try_from(parts: FrameParts) -> Result<Self, Self::Error> {
        let FrameParts {
            width,
            height,
            channels,
            pixels,
        } = parts;
        let len = pixels.len();
        ImageFrame::new(width, height, channels, pixels).ok_or_else(|| {
            format!(
                "image buffer of {len} bytes does not fit a {width}x{height}x{channels} frame"
            )
        })
    }
}

impl ImageFrame {
    /// Build a frame, returning `None` if the buffer does not match the shape.
    pub fn new(width: usize, height: usize, channels: usize, pixels: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || channels == 0 {
            return None;
        }
        if width.checked_mul(height)?.checked_mul(channels)? != pixels.len() {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel component at (x, y, channel).
    pub fn at(&self, x: usize, y: usize, c: usize) -> u8 {
        self.pixels[(y * self.width + x) * self.channels + c]
    }
}

/// The value carried by a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingValue {
    Scalar(f64),
    Boolean(bool),
    /// Labeled components, e.g. `{x, y, z}` for an inertial sensor.
    Vector(BTreeMap<String, f64>),
    Image(ImageFrame),
}

impl ReadingValue {
    /// Numeric view used for summary statistics. Booleans count as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Scalar(v) => Some(*v),
            ReadingValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            ReadingValue::Vector(_) | ReadingValue::Image(_) => None,
        }
    }

    /// Build a 3-axis vector value.
    pub fn axes(x: f64, y: f64, z: f64) -> Self {
        let mut components = BTreeMap::new();
        components.insert("x".to_string(), x);
        components.insert("y".to_string(), y);
        components.insert("z".to_string(), z);
        ReadingValue::Vector(components)
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Scalar(v) => write!(f, "{v}"),
            ReadingValue::Boolean(b) => write!(f, "{b}"),
            ReadingValue::Vector(components) => {
                let parts: Vec<String> = components
                    .iter()
                    .map(|(name, v)| format!("{name}={v}"))
                    .collect();
                write!(f, "{}", parts.join(", "))
            }
            ReadingValue::Image(frame) => {
                write!(f, "{}x{}x{} frame", frame.width(), frame.height(), frame.channels())
            }
        }
    }
}

/// A single sensor sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: String,
    pub sensor_type: SensorKind,
    pub timestamp: DateTime<Utc>,
    pub value: ReadingValue,
    pub unit: String,
    /// Confidence in the value (0-1)
    pub confidence: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Reading {
    /// Create a reading stamped with the current time.
    pub fn new(
        sensor_id: impl Into<String>,
        sensor_type: SensorKind,
        value: ReadingValue,
        unit: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            sensor_type,
            timestamp: Utc::now(),
            value,
            unit: unit.into(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Numeric metadata lookup.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_f64())
    }

    /// Timestamp as fractional epoch seconds.
    pub fn epoch_secs(&self) -> f64 {
        epoch_secs(self.timestamp)
    }
}

/// Fractional seconds since the Unix epoch.
pub fn epoch_secs(timestamp: DateTime<Utc>) -> f64 {
    timestamp.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_frame_shape_check() {
        assert!(ImageFrame::new(2, 2, 3, vec![0; 12]).is_some());
        assert!(ImageFrame::new(2, 2, 3, vec![0; 11]).is_none());
        assert!(ImageFrame::new(0, 2, 3, vec![]).is_none());
        assert!(ImageFrame::new(usize::MAX, 2, 3, vec![]).is_none());
    }

    #[test]
    fn test_deserialize_rejects_mismatched_frames() {
        let ok = r#"{"width":2,"height":1,"channels":1,"pixels":[7,9]}"#;
        let frame: ImageFrame = serde_json::from_str(ok).unwrap();
        assert_eq!(frame.at(1, 0, 0), 9);

        let short = r#"{"width":64,"height":64,"channels":3,"pixels":[0,0,0]}"#;
        assert!(serde_json::from_str::<ImageFrame>(short).is_err());
        let empty = r#"{"width":0,"height":0,"channels":3,"pixels":[]}"#;
        assert!(serde_json::from_str::<ImageFrame>(empty).is_err());
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(ReadingValue::Scalar(2.5).as_f64(), Some(2.5));
        assert_eq!(ReadingValue::Boolean(true).as_f64(), Some(1.0));
        assert_eq!(ReadingValue::axes(0.0, 0.0, 9.8).as_f64(), None);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let reading = Reading::new(
            "t1",
            SensorKind::Temperature,
            ReadingValue::Scalar(21.0),
            "°C",
            1.7,
        );
        assert_eq!(reading.confidence, 1.0);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(ReadingValue::axes(1.0, 2.0, 3.0).to_string(), "x=1, y=2, z=3");
        let frame = ImageFrame::new(4, 2, 3, vec![0; 24]).unwrap();
        assert_eq!(ReadingValue::Image(frame).to_string(), "4x2x3 frame");
    }
}
