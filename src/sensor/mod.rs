//! Sensor acquisition for the edge pipeline.
//!
//! Every sensor implements the [`Sensor`] contract. The pipeline itself works
//! with [`SensorDevice`], a closed set of variants that dispatches to the
//! concrete implementation.

pub mod manager;
pub mod notify;
pub mod simulated;
pub mod types;

pub use manager::{
    sampling_interval, HistoryView, ManagerConfig, SensorManager, SensorStats, StopSignal,
};
pub use notify::{CallbackError, Notifier, ReadingCallback};
pub use simulated::{
    AccelerometerSensor, CameraSensor, GenericSensor, MotionSensor, TemperatureSensor,
};
pub use types::{ImageFrame, Reading, ReadingValue, SensorKind};

/// Errors raised by sensors and the sensor manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorError {
    /// Hardware or backend initialization failed; the sensor is not streamed.
    Init { sensor_id: String, reason: String },
    /// `read` was called before a successful `initialize`.
    NotActive(String),
    /// A transient read failure.
    Read { sensor_id: String, reason: String },
    InvalidRate { sensor_id: String, rate: f64 },
    Duplicate(String),
    UnknownSensor(String),
    AlreadyStreaming,
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::Init { sensor_id, reason } => {
                write!(f, "Sensor {sensor_id} failed to initialize: {reason}")
            }
            SensorError::NotActive(id) => write!(f, "Sensor {id} not initialized"),
            SensorError::Read { sensor_id, reason } => {
                write!(f, "Sensor {sensor_id} read failed: {reason}")
            }
            SensorError::InvalidRate { sensor_id, rate } => {
                write!(f, "Sensor {sensor_id} has invalid sampling rate {rate} Hz")
            }
            SensorError::Duplicate(id) => write!(f, "Sensor {id} is already registered"),
            SensorError::UnknownSensor(id) => write!(f, "Unknown sensor: {id}"),
            SensorError::AlreadyStreaming => {
                write!(f, "Sensors cannot be registered while streaming")
            }
        }
    }
}

impl std::error::Error for SensorError {}

/// Capability contract shared by every sensor.
pub trait Sensor: Send {
    fn id(&self) -> &str;

    fn kind(&self) -> SensorKind;

    /// Sampling rate in Hz.
    fn sampling_rate(&self) -> f64;

    fn is_active(&self) -> bool;

    /// Bring the sensor up. A failure excludes the sensor from streaming.
    fn initialize(&mut self) -> Result<(), SensorError>;

    /// Produce one reading. Fails with [`SensorError::NotActive`] before
    /// a successful `initialize`.
    fn read(&mut self) -> Result<Reading, SensorError>;

    fn shutdown(&mut self);
}

/// The closed set of sensor variants handled by the pipeline.
pub enum SensorDevice {
    Temperature(TemperatureSensor),
    Motion(MotionSensor),
    Camera(CameraSensor),
    Accelerometer(AccelerometerSensor),
    Generic(GenericSensor),
}

macro_rules! dispatch {
    ($self:expr, $sensor:ident => $body:expr) => {
        match $self {
            SensorDevice::Temperature($sensor) => $body,
            SensorDevice::Motion($sensor) => $body,
            SensorDevice::Camera($sensor) => $body,
            SensorDevice::Accelerometer($sensor) => $body,
            SensorDevice::Generic($sensor) => $body,
        }
    };
}

impl Sensor for SensorDevice {
    fn id(&self) -> &str {
        dispatch!(self, s => s.id())
    }

    fn kind(&self) -> SensorKind {
        dispatch!(self, s => s.kind())
    }

    fn sampling_rate(&self) -> f64 {
        dispatch!(self, s => s.sampling_rate())
    }

    fn is_active(&self) -> bool {
        dispatch!(self, s => s.is_active())
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        dispatch!(self, s => s.initialize())
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        dispatch!(self, s => s.read())
    }

    fn shutdown(&mut self) {
        dispatch!(self, s => s.shutdown())
    }
}

impl From<TemperatureSensor> for SensorDevice {
    fn from(sensor: TemperatureSensor) -> Self {
        SensorDevice::Temperature(sensor)
    }
}

impl From<MotionSensor> for SensorDevice {
    fn from(sensor: MotionSensor) -> Self {
        SensorDevice::Motion(sensor)
    }
}

impl From<CameraSensor> for SensorDevice {
    fn from(sensor: CameraSensor) -> Self {
        SensorDevice::Camera(sensor)
    }
}

impl From<AccelerometerSensor> for SensorDevice {
    fn from(sensor: AccelerometerSensor) -> Self {
        SensorDevice::Accelerometer(sensor)
    }
}

impl From<GenericSensor> for SensorDevice {
    fn from(sensor: GenericSensor) -> Self {
        SensorDevice::Generic(sensor)
    }
}
