//! In-process sensor implementations.
//!
//! These stand in for real hardware during development and testing. Each one
//! produces plausible values with the same shape a physical driver would, so
//! the rest of the pipeline cannot tell the difference. [`GenericSensor`] is
//! the hook for real backends: it wraps caller-supplied closures.

use crate::sensor::types::{epoch_secs, ImageFrame, Reading, ReadingValue, SensorKind};
use crate::sensor::{Sensor, SensorError};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{ContinuousCDF, Normal};

/// Draw from N(mean, std_dev) by inverting the CDF.
fn gaussian(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let p: f64 = rng.gen_range(f64::EPSILON..1.0);
    Normal::new(mean, std_dev)
        .map(|n| n.inverse_cdf(p))
        .unwrap_or(mean)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn not_active(id: &str) -> SensorError {
    SensorError::NotActive(id.to_string())
}

/// Temperature probe (I2C in the field), simulated around 22 °C.
pub struct TemperatureSensor {
    id: String,
    sampling_rate: f64,
    active: bool,
    base_temp: f64,
    rng: StdRng,
}

impl TemperatureSensor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sampling_rate: 1.0,
            active: false,
            base_temp: 22.0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rate(mut self, hz: f64) -> Self {
        self.sampling_rate = hz;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Sensor for TemperatureSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Temperature
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        self.active = true;
        tracing::info!(sensor = %self.id, "temperature sensor initialized (simulated)");
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.active {
            return Err(not_active(&self.id));
        }
        let temperature = gaussian(&mut self.rng, self.base_temp, 0.5);
        Ok(Reading::new(
            self.id.clone(),
            SensorKind::Temperature,
            ReadingValue::Scalar(round_to(temperature, 2)),
            "°C",
            0.95,
        ))
    }

    fn shutdown(&mut self) {
        self.active = false;
        tracing::info!(sensor = %self.id, "temperature sensor shut down");
    }
}

/// PIR motion detector (GPIO in the field).
pub struct MotionSensor {
    id: String,
    sampling_rate: f64,
    active: bool,
    detection_probability: f64,
    last_motion: DateTime<Utc>,
    rng: StdRng,
}

impl MotionSensor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sampling_rate: 1.0,
            active: false,
            detection_probability: 0.2,
            last_motion: Utc::now(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rate(mut self, hz: f64) -> Self {
        self.sampling_rate = hz;
        self
    }

    pub fn with_detection_probability(mut self, p: f64) -> Self {
        self.detection_probability = p.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Sensor for MotionSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Motion
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        self.active = true;
        tracing::info!(sensor = %self.id, "motion sensor initialized (simulated)");
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.active {
            return Err(not_active(&self.id));
        }
        let detected = self.rng.gen_bool(self.detection_probability);
        let now = Utc::now();
        if detected {
            self.last_motion = now;
        }
        Ok(Reading::new(
            self.id.clone(),
            SensorKind::Motion,
            ReadingValue::Boolean(detected),
            "boolean",
            if detected { 1.0 } else { 0.8 },
        )
        .at(now)
        .with_metadata("last_motion", epoch_secs(self.last_motion)))
    }

    fn shutdown(&mut self) {
        self.active = false;
        tracing::info!(sensor = %self.id, "motion sensor shut down");
    }
}

/// Frame-grabbing camera (USB in the field), emitting random RGB frames.
pub struct CameraSensor {
    id: String,
    sampling_rate: f64,
    active: bool,
    resolution: (usize, usize),
    rng: StdRng,
}

impl CameraSensor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sampling_rate: 10.0,
            active: false,
            resolution: (640, 480),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rate(mut self, hz: f64) -> Self {
        self.sampling_rate = hz;
        self
    }

    pub fn with_resolution(mut self, width: usize, height: usize) -> Self {
        self.resolution = (width.max(1), height.max(1));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Sensor for CameraSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Camera
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        self.active = true;
        tracing::info!(sensor = %self.id, "camera sensor initialized (simulated)");
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.active {
            return Err(not_active(&self.id));
        }
        let (width, height) = self.resolution;
        let mut pixels = vec![0u8; width * height * 3];
        self.rng.fill(&mut pixels[..]);
        let frame = ImageFrame::new(width, height, 3, pixels).ok_or_else(|| SensorError::Read {
            sensor_id: self.id.clone(),
            reason: "frame buffer does not match resolution".to_string(),
        })?;

        let objects: u32 = self.rng.gen_range(0..5);
        let brightness: f64 = self.rng.gen_range(0.3..0.9);

        Ok(Reading::new(
            self.id.clone(),
            SensorKind::Camera,
            ReadingValue::Image(frame),
            "rgb_frame",
            0.9,
        )
        .with_metadata("resolution", vec![width as u64, height as u64])
        .with_metadata("objects_detected", objects)
        .with_metadata("brightness", brightness))
    }

    fn shutdown(&mut self) {
        self.active = false;
        tracing::info!(sensor = %self.id, "camera sensor shut down");
    }
}

/// 3-axis accelerometer (I2C in the field), at rest under gravity.
pub struct AccelerometerSensor {
    id: String,
    sampling_rate: f64,
    active: bool,
    rng: StdRng,
}

impl AccelerometerSensor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sampling_rate: 50.0,
            active: false,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_rate(mut self, hz: f64) -> Self {
        self.sampling_rate = hz;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Sensor for AccelerometerSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Accelerometer
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        self.active = true;
        tracing::info!(sensor = %self.id, "accelerometer initialized (simulated)");
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.active {
            return Err(not_active(&self.id));
        }
        let x = round_to(gaussian(&mut self.rng, 0.0, 0.1), 3);
        let y = round_to(gaussian(&mut self.rng, 0.0, 0.1), 3);
        let z = round_to(gaussian(&mut self.rng, 9.8, 0.2), 3);
        Ok(Reading::new(
            self.id.clone(),
            SensorKind::Accelerometer,
            ReadingValue::axes(x, y, z),
            "m/s²",
            0.95,
        ))
    }

    fn shutdown(&mut self) {
        self.active = false;
        tracing::info!(sensor = %self.id, "accelerometer shut down");
    }
}

type ScalarSource = Box<dyn FnMut() -> Result<f64, String> + Send>;
type Initializer = Box<dyn FnMut() -> Result<(), String> + Send>;

/// A scalar sensor backed by caller-supplied closures.
///
/// Used for humidity, light, pressure and any external backend that yields a
/// single number per sample.
pub struct GenericSensor {
    id: String,
    label: String,
    unit: String,
    sampling_rate: f64,
    active: bool,
    source: ScalarSource,
    initializer: Option<Initializer>,
}

impl GenericSensor {
    pub fn new<F>(
        id: impl Into<String>,
        label: impl Into<String>,
        unit: impl Into<String>,
        sampling_rate: f64,
        source: F,
    ) -> Self
    where
        F: FnMut() -> Result<f64, String> + Send + 'static,
    {
        Self {
            id: id.into(),
            label: label.into(),
            unit: unit.into(),
            sampling_rate,
            active: false,
            source: Box::new(source),
            initializer: None,
        }
    }

    /// A generic sensor emitting N(mean, std_dev) noise.
    pub fn simulated(
        id: impl Into<String>,
        label: impl Into<String>,
        unit: impl Into<String>,
        sampling_rate: f64,
        mean: f64,
        std_dev: f64,
    ) -> Self {
        let mut rng = StdRng::from_entropy();
        Self::new(id, label, unit, sampling_rate, move || {
            Ok(round_to(gaussian(&mut rng, mean, std_dev), 2))
        })
    }

    /// Run `init` during `initialize`; an error keeps the sensor inactive.
    pub fn with_initializer<F>(mut self, init: F) -> Self
    where
        F: FnMut() -> Result<(), String> + Send + 'static,
    {
        self.initializer = Some(Box::new(init));
        self
    }
}

impl Sensor for GenericSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Generic(self.label.clone())
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        if let Some(init) = self.initializer.as_mut() {
            init().map_err(|reason| SensorError::Init {
                sensor_id: self.id.clone(),
                reason,
            })?;
        }
        self.active = true;
        tracing::info!(sensor = %self.id, label = %self.label, "generic sensor initialized");
        Ok(())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.active {
            return Err(not_active(&self.id));
        }
        let value = (self.source)().map_err(|reason| SensorError::Read {
            sensor_id: self.id.clone(),
            reason,
        })?;
        Ok(Reading::new(
            self.id.clone(),
            self.kind(),
            ReadingValue::Scalar(value),
            self.unit.clone(),
            1.0,
        ))
    }

    fn shutdown(&mut self) {
        self.active = false;
        tracing::info!(sensor = %self.id, "generic sensor shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_values_are_plausible() {
        let mut sensor = TemperatureSensor::new("t").with_seed(7);
        sensor.initialize().unwrap();
        for _ in 0..50 {
            let reading = sensor.read().unwrap();
            let v = reading.value.as_f64().unwrap();
            assert!((15.0..29.0).contains(&v), "implausible temperature {v}");
            assert_eq!(reading.unit, "°C");
            assert_eq!(reading.confidence, 0.95);
        }
    }

    #[test]
    fn test_motion_tracks_last_motion() {
        let mut sensor = MotionSensor::new("m").with_detection_probability(1.0);
        sensor.initialize().unwrap();
        let reading = sensor.read().unwrap();
        assert_eq!(reading.value, ReadingValue::Boolean(true));
        assert_eq!(reading.confidence, 1.0);
        let last = reading.metadata_f64("last_motion").unwrap();
        assert!((last - reading.epoch_secs()).abs() < 1e-6);
    }

    #[test]
    fn test_camera_frame_matches_resolution() {
        let mut sensor = CameraSensor::new("cam").with_resolution(32, 24).with_seed(1);
        sensor.initialize().unwrap();
        let reading = sensor.read().unwrap();
        match reading.value {
            ReadingValue::Image(frame) => {
                assert_eq!((frame.width(), frame.height(), frame.channels()), (32, 24, 3));
            }
            other => panic!("expected image, got {other:?}"),
        }
        let objects = reading.metadata.get("objects_detected").unwrap().as_u64().unwrap();
        assert!(objects < 5);
    }

    #[test]
    fn test_accelerometer_reads_gravity() {
        let mut sensor = AccelerometerSensor::new("acc").with_seed(3);
        sensor.initialize().unwrap();
        let reading = sensor.read().unwrap();
        match reading.value {
            ReadingValue::Vector(axes) => {
                assert!((axes["z"] - 9.8).abs() < 2.0);
                assert!(axes["x"].abs() < 1.0);
            }
            other => panic!("expected vector, got {other:?}"),
        }
    }

    #[test]
    fn test_generic_initializer_failure() {
        let mut sensor = GenericSensor::new("h", "humidity", "%", 1.0, || Ok(50.0))
            .with_initializer(|| Err("bus not found".to_string()));
        let err = sensor.initialize().unwrap_err();
        assert!(matches!(err, SensorError::Init { .. }));
        assert!(!sensor.is_active());
    }

    #[test]
    fn test_generic_read_error() {
        let mut sensor = GenericSensor::new("p", "pressure", "hPa", 1.0, || {
            Err("checksum mismatch".to_string())
        });
        sensor.initialize().unwrap();
        assert!(matches!(sensor.read(), Err(SensorError::Read { .. })));
    }
}
