//! Edge Sensor Agent - on-device sensor pipeline with online learning.
//!
//! Streams readings from a set of sensors, turns them into feature records,
//! adapts anomaly bands, feature weights and pattern centroids without full
//! retraining, and periodically asks a language model (or a rule-based
//! fallback) to summarize what the sensors are seeing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Edge Sensor Agent                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────┐       │
//! │  │   Sensors   │──▶│   Manager    │──▶│ Preprocessor│       │
//! │  │ (simulated) │   │  (history)   │   │  (features) │       │
//! │  └─────────────┘   └──────────────┘   └─────────────┘       │
//! │                           │                  │              │
//! │                           ▼                  ▼              │
//! │                    ┌──────────────┐   ┌─────────────┐       │
//! │                    │ Orchestrator │   │   Learner   │       │
//! │                    │  (insights)  │   │  (online)   │       │
//! │                    └──────────────┘   └─────────────┘       │
//! │                           │                                 │
//! │                           ▼                                 │
//! │                    ┌──────────────┐                         │
//! │                    │ Activity Log │                         │
//! │                    └──────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use edge_sensor_agent::{config::Config, system::EdgeSystem};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), edge_sensor_agent::system::SystemError> {
//! let mut system = EdgeSystem::new(Config::default());
//! system.setup_sensors()?;
//! let summary = system.run_for(Some(Duration::from_secs(30))).await?;
//! println!("{} samples learned", summary.total_samples);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod inference;
pub mod learner;
pub mod sensor;
pub mod system;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use config::{Config, SensorSpec};
pub use core::{FeatureRecord, Preprocessor, PreprocessorConfig};
pub use inference::{CompletionModel, InferenceOrchestrator, InferenceResult, ModelError};
pub use learner::{IncrementalLearner, LearnerConfig, LearningSummary, SharedLearner};
pub use sensor::{
    Reading, ReadingValue, Sensor, SensorDevice, SensorError, SensorKind, SensorManager,
    StopSignal,
};
pub use system::{EdgeSystem, SystemError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
