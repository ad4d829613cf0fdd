//! Configuration for the edge sensor agent.

use crate::core::PreprocessorConfig;
use crate::inference::InferenceConfig;
use crate::learner::LearnerConfig;
use crate::sensor::{
    AccelerometerSensor, CameraSensor, GenericSensor, MotionSensor, SensorDevice,
    TemperatureSensor,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sensors to register, in order
    pub sensors: Vec<SensorSpec>,

    /// Readings kept per sensor
    pub history_capacity: usize,

    /// Delay before retrying a failed sensor read
    #[serde(with = "duration_serde")]
    pub retry_backoff: Duration,

    pub preprocessing: PreprocessorConfig,

    pub learning: LearningSettings,

    pub inference: InferenceSettings,

    pub persistence: PersistenceSettings,

    /// Path for learned parameters and activity stats
    pub data_path: PathBuf,

    /// Path for exported sensor logs
    pub export_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("edge-sensor-agent");

        Self {
            sensors: SensorSpec::default_set(),
            history_capacity: 1000,
            retry_backoff: Duration::from_secs(1),
            preprocessing: PreprocessorConfig::default(),
            learning: LearningSettings::default(),
            inference: InferenceSettings::default(),
            persistence: PersistenceSettings::default(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("edge-sensor-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be positive".into()));
        }
        if self.preprocessing.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be positive".into()));
        }
        if self.learning.learner.memory_size == 0 || self.learning.learner.update_threshold == 0 {
            return Err(ConfigError::Invalid(
                "memory_size and update_threshold must be positive".into(),
            ));
        }
        if self.inference.interval.is_zero() {
            return Err(ConfigError::Invalid("inference interval must be positive".into()));
        }
        if self.persistence.auto_save && self.persistence.save_interval.is_zero() {
            return Err(ConfigError::Invalid("save_interval must be positive".into()));
        }
        for spec in &self.sensors {
            if let Some(rate) = spec.rate_hz() {
                if crate::sensor::sampling_interval(rate).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "sensor {} has invalid rate {rate}",
                        spec.id()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Learned parameter file.
    pub fn params_path(&self) -> PathBuf {
        self.data_path.join(&self.persistence.params_file)
    }

    /// Activity counter file.
    pub fn activity_path(&self) -> PathBuf {
        self.data_path.join("activity.json")
    }

    /// Sensor log export file.
    pub fn sensor_log_path(&self) -> PathBuf {
        self.export_path.join("sensor_log.json")
    }
}

/// A sensor to build at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorSpec {
    Temperature {
        id: String,
        rate_hz: Option<f64>,
    },
    Motion {
        id: String,
        rate_hz: Option<f64>,
        detection_probability: Option<f64>,
    },
    Camera {
        id: String,
        rate_hz: Option<f64>,
        width: Option<usize>,
        height: Option<usize>,
    },
    Accelerometer {
        id: String,
        rate_hz: Option<f64>,
    },
    /// Simulated scalar source around `mean`
    Generic {
        id: String,
        label: String,
        unit: String,
        rate_hz: f64,
        mean: f64,
        std_dev: f64,
    },
}

impl SensorSpec {
    /// The stock sensor layout: two thermometers, a motion detector, a camera
    /// and an accelerometer.
    pub fn default_set() -> Vec<Self> {
        vec![
            SensorSpec::Temperature {
                id: "temp_room".to_string(),
                rate_hz: None,
            },
            SensorSpec::Temperature {
                id: "temp_outdoor".to_string(),
                rate_hz: None,
            },
            SensorSpec::Motion {
                id: "motion_entrance".to_string(),
                rate_hz: None,
                detection_probability: None,
            },
            SensorSpec::Camera {
                id: "camera_main".to_string(),
                rate_hz: None,
                width: Some(640),
                height: Some(480),
            },
            SensorSpec::Accelerometer {
                id: "accel_device".to_string(),
                rate_hz: None,
            },
        ]
    }

    pub fn id(&self) -> &str {
        match self {
            SensorSpec::Temperature { id, .. }
            | SensorSpec::Motion { id, .. }
            | SensorSpec::Camera { id, .. }
            | SensorSpec::Accelerometer { id, .. }
            | SensorSpec::Generic { id, .. } => id,
        }
    }

    /// Configured rate, if overridden.
    pub fn rate_hz(&self) -> Option<f64> {
        match self {
            SensorSpec::Temperature { rate_hz, .. }
            | SensorSpec::Motion { rate_hz, .. }
            | SensorSpec::Camera { rate_hz, .. }
            | SensorSpec::Accelerometer { rate_hz, .. } => *rate_hz,
            SensorSpec::Generic { rate_hz, .. } => Some(*rate_hz),
        }
    }

    /// Construct the sensor this entry describes.
    pub fn build(&self) -> SensorDevice {
        match self {
            SensorSpec::Temperature { id, rate_hz } => {
                let mut sensor = TemperatureSensor::new(id.clone());
                if let Some(hz) = rate_hz {
                    sensor = sensor.with_rate(*hz);
                }
                sensor.into()
            }
            SensorSpec::Motion {
                id,
                rate_hz,
                detection_probability,
            } => {
                let mut sensor = MotionSensor::new(id.clone());
                if let Some(hz) = rate_hz {
                    sensor = sensor.with_rate(*hz);
                }
                if let Some(p) = detection_probability {
                    sensor = sensor.with_detection_probability(*p);
                }
                sensor.into()
            }
            SensorSpec::Camera {
                id,
                rate_hz,
                width,
                height,
            } => {
                let mut sensor = CameraSensor::new(id.clone());
                if let Some(hz) = rate_hz {
                    sensor = sensor.with_rate(*hz);
                }
                if let (Some(w), Some(h)) = (width, height) {
                    sensor = sensor.with_resolution(*w, *h);
                }
                sensor.into()
            }
            SensorSpec::Accelerometer { id, rate_hz } => {
                let mut sensor = AccelerometerSensor::new(id.clone());
                if let Some(hz) = rate_hz {
                    sensor = sensor.with_rate(*hz);
                }
                sensor.into()
            }
            SensorSpec::Generic {
                id,
                label,
                unit,
                rate_hz,
                mean,
                std_dev,
            } => GenericSensor::simulated(
                id.clone(),
                label.clone(),
                unit.clone(),
                *rate_hz,
                *mean,
                *std_dev,
            )
            .into(),
        }
    }
}

/// Online learning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSettings {
    pub enabled: bool,
    pub anomaly_detection: bool,
    /// Readings buffered between the sensors and the learning task
    pub channel_capacity: usize,
    pub learner: LearnerConfig,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            anomaly_detection: true,
            channel_capacity: 256,
            learner: LearnerConfig::default(),
        }
    }
}

/// Periodic inference settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Time between insights
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// llama.cpp-compatible server; fallback insights only when unset
    pub model_url: Option<String>,
    /// Question asked on every tick (default analysis request when unset)
    pub query: Option<String>,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    pub orchestrator: InferenceConfig,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            model_url: None,
            query: None,
            request_timeout: Duration::from_secs(60),
            orchestrator: InferenceConfig::default(),
        }
    }
}

/// Learned-state persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    pub auto_save: bool,
    #[serde(with = "duration_serde")]
    pub save_interval: Duration,
    /// File name under `data_path`
    pub params_file: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            auto_save: true,
            save_interval: Duration::from_secs(300),
            params_file: "learned_params.json".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
