//! End-to-end wiring: sensors → preprocessing → learning, plus scheduled
//! insights and periodic persistence.

use crate::config::{Config, ConfigError};
use crate::core::{FeatureRecord, Preprocessor};
use crate::inference::{CompletionModel, InferenceOrchestrator, InferenceResult};
use crate::learner::{IncrementalLearner, LearningSummary, SharedLearner};
use crate::sensor::{
    CallbackError, ManagerConfig, Reading, ReadingCallback, SensorDevice, SensorError,
    SensorManager, SensorStats, StopSignal,
};
use crate::transparency::{create_shared_log_with_persistence, SharedTransparencyLog};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Receives every insight produced by the inference loop.
pub type InsightHandler = Arc<dyn Fn(&InferenceResult) + Send + Sync>;

/// System-level failures. Only startup problems surface here.
#[derive(Debug)]
pub enum SystemError {
    /// Nothing registered to stream from
    NoSensors,
    Sensor(SensorError),
    Config(ConfigError),
}

impl std::fmt::Display for SystemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemError::NoSensors => write!(f, "No sensors registered"),
            SystemError::Sensor(e) => write!(f, "Sensor error: {e}"),
            SystemError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for SystemError {}

impl From<SensorError> for SystemError {
    fn from(e: SensorError) -> Self {
        SystemError::Sensor(e)
    }
}

impl From<ConfigError> for SystemError {
    fn from(e: ConfigError) -> Self {
        SystemError::Config(e)
    }
}

/// Point-in-time view of the whole system.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub registered_sensors: Vec<String>,
    pub active_sensors: Vec<String>,
    pub sensor_stats: BTreeMap<String, Option<SensorStats>>,
    pub learning_summary: LearningSummary,
    pub model_configured: bool,
}

/// What happened to one reading on its way into the learner.
#[derive(Debug, Clone, PartialEq)]
pub enum LearningOutcome {
    /// The value did not fit the sensor kind
    Dropped,
    Learned {
        anomaly: Option<f64>,
        updated: bool,
    },
}

/// Preprocess → detect → learn, for one reading at a time.
pub struct LearningPipeline {
    preprocessor: Preprocessor,
    learner: SharedLearner,
    activity: SharedTransparencyLog,
    anomaly_detection: bool,
}

impl LearningPipeline {
    pub fn new(
        preprocessor: Preprocessor,
        learner: SharedLearner,
        activity: SharedTransparencyLog,
        anomaly_detection: bool,
    ) -> Self {
        Self {
            preprocessor,
            learner,
            activity,
            anomaly_detection,
        }
    }

    pub fn handle(&mut self, reading: &Reading) -> LearningOutcome {
        self.activity.record_reading();
        let record = match self.preprocessor.process_reading(reading) {
            Some(record) => record,
            None => {
                tracing::debug!(
                    sensor = %reading.sensor_id,
                    "reading value does not fit sensor kind"
                );
                self.activity.record_dropped_reading();
                return LearningOutcome::Dropped;
            }
        };

        let (anomaly, updated) = self.learn(&record);
        if let Some(score) = anomaly {
            tracing::warn!(sensor = %reading.sensor_id, "Anomaly detected: score={score:.2}");
            self.activity.record_anomaly();
        }
        self.activity.record_experience();
        if updated {
            self.activity.record_learning_update();
        }
        LearningOutcome::Learned { anomaly, updated }
    }

    /// Detection and the buffer update run under one lock acquisition.
    fn learn(&self, record: &FeatureRecord) -> (Option<f64>, bool) {
        let mut learner = lock(&self.learner);
        let anomaly = if self.anomaly_detection {
            let (is_anomaly, score) = learner.detect_anomaly(record);
            is_anomaly.then_some(score)
        } else {
            None
        };
        let updated = learner.add_experience(record, None, None);
        (anomaly, updated)
    }

    /// Drain `rx` until it closes or `stop` is raised.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Reading>, stop: StopSignal) {
        loop {
            let reading = tokio::select! {
                received = rx.recv() => match received {
                    Some(reading) => reading,
                    None => break,
                },
                _ = stop.stopped() => break,
            };
            self.handle(&reading);
        }
        tracing::info!("Learning consumer stopped");
    }
}

/// Forward readings into the learning queue. A full queue drops the reading
/// and counts it as backlog.
fn learning_feed(tx: mpsc::Sender<Reading>, activity: SharedTransparencyLog) -> ReadingCallback {
    Box::new(move |reading: &Reading| match tx.try_send(reading.clone()) {
        Ok(()) | Err(TrySendError::Closed(_)) => Ok(()),
        Err(TrySendError::Full(_)) => {
            activity.record_backlogged_reading();
            Err(CallbackError::new("learning queue full, reading dropped"))
        }
    })
}

fn lock(learner: &SharedLearner) -> MutexGuard<'_, IncrementalLearner> {
    match learner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The complete on-device pipeline.
pub struct EdgeSystem {
    config: Config,
    manager: SensorManager,
    learner: SharedLearner,
    activity: SharedTransparencyLog,
    model: Option<Arc<dyn CompletionModel>>,
    insight_handler: Option<InsightHandler>,
    orchestrator: Option<Arc<InferenceOrchestrator>>,
    learning_tx: Option<mpsc::Sender<Reading>>,
    learning_rx: Option<mpsc::Receiver<Reading>>,
    stop: StopSignal,
    tasks: Vec<JoinHandle<()>>,
    running: bool,
}

impl EdgeSystem {
    pub fn new(config: Config) -> Self {
        let manager = SensorManager::new(ManagerConfig {
            history_capacity: config.history_capacity,
            retry_backoff: config.retry_backoff,
        });
        let learner = IncrementalLearner::new(config.learning.learner.clone()).shared();
        let activity = create_shared_log_with_persistence(config.activity_path());

        let (learning_tx, learning_rx) = if config.learning.enabled {
            let (tx, rx) = mpsc::channel(config.learning.channel_capacity.max(1));
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        Self {
            config,
            manager,
            learner,
            activity,
            model: None,
            insight_handler: None,
            orchestrator: None,
            learning_tx,
            learning_rx,
            stop: StopSignal::new(),
            tasks: Vec::new(),
            running: false,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn CompletionModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_insight_handler(mut self, handler: InsightHandler) -> Self {
        self.insight_handler = Some(handler);
        self
    }

    /// Register every sensor listed in the configuration.
    pub fn setup_sensors(&mut self) -> Result<usize, SystemError> {
        let specs = self.config.sensors.clone();
        for spec in &specs {
            self.register_sensor(spec.build())?;
        }
        tracing::info!("Setup complete: {} sensors registered", specs.len());
        Ok(specs.len())
    }

    /// Register one sensor and route its readings into learning.
    pub fn register_sensor(&mut self, sensor: impl Into<SensorDevice>) -> Result<(), SystemError> {
        let device = sensor.into();
        let id = crate::sensor::Sensor::id(&device).to_string();
        self.manager.register_sensor(device)?;
        if let Some(tx) = &self.learning_tx {
            self.manager
                .register_callback(&id, learning_feed(tx.clone(), self.activity.clone()))?;
        }
        Ok(())
    }

    /// Signal that ends every loop started by [`start`](Self::start).
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn learner(&self) -> SharedLearner {
        self.learner.clone()
    }

    pub fn activity(&self) -> SharedTransparencyLog {
        self.activity.clone()
    }

    pub fn manager(&self) -> &SensorManager {
        &self.manager
    }

    pub fn orchestrator(&self) -> Option<Arc<InferenceOrchestrator>> {
        self.orchestrator.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Bring everything up: restore learned state, initialize and stream
    /// sensors, then start the learning, inference and save loops.
    pub async fn start(&mut self) -> Result<(), SystemError> {
        if self.running {
            return Ok(());
        }
        if self.manager.is_empty() {
            return Err(SystemError::NoSensors);
        }
        self.stop.reset();

        let params_path = self.config.params_path();
        if params_path.exists() {
            if let Err(e) = lock(&self.learner).load(&params_path) {
                tracing::warn!("Failed to load learned parameters: {e}");
            }
        }

        let total = self.manager.len();
        let ready = self.manager.initialize_all().await;
        if ready < total {
            tracing::warn!("{} of {total} sensors failed to initialize", total - ready);
        }
        self.manager.start_streaming()?;

        if let Some(rx) = self.learning_rx.take() {
            let pipeline = LearningPipeline::new(
                Preprocessor::new(self.config.preprocessing.clone()),
                self.learner.clone(),
                self.activity.clone(),
                self.config.learning.anomaly_detection,
            );
            self.tasks.push(tokio::spawn(pipeline.run(rx, self.stop.clone())));
        }

        let mut orchestrator = InferenceOrchestrator::new(
            self.manager.history_view(),
            self.config.inference.orchestrator.clone(),
        )
        .with_activity_log(self.activity.clone());
        if let Some(model) = &self.model {
            orchestrator = orchestrator.with_model(model.clone());
        }
        let orchestrator = Arc::new(orchestrator);
        self.orchestrator = Some(orchestrator.clone());
        self.tasks.push(self.spawn_inference(orchestrator.clone()));

        if self.config.persistence.auto_save {
            self.tasks.push(self.spawn_periodic_save(orchestrator));
        }

        self.running = true;
        tracing::info!("Edge system is running");
        Ok(())
    }

    fn spawn_inference(&self, orchestrator: Arc<InferenceOrchestrator>) -> JoinHandle<()> {
        let interval = self.config.inference.interval;
        let query = self.config.inference.query.clone();
        let handler = self.insight_handler.clone();
        let stop = self.stop.clone();

        tokio::spawn(async move {
            orchestrator
                .run_periodic(
                    interval,
                    query,
                    move |result| {
                        match &handler {
                            Some(handler) => handler(result),
                            None => tracing::info!("Sensor insights:\n{}", result.insights),
                        }
                        Ok(())
                    },
                    stop,
                )
                .await
        })
    }

    fn spawn_periodic_save(&self, orchestrator: Arc<InferenceOrchestrator>) -> JoinHandle<()> {
        let every = self.config.persistence.save_interval;
        let learner = self.learner.clone();
        let activity = self.activity.clone();
        let params_path = self.config.params_path();
        let log_path = self.config.sensor_log_path();
        let stop = self.stop.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(every) => {}
                    _ = stop.stopped() => break,
                }
                persist(&learner, &activity, &orchestrator, &params_path, &log_path);
            }
        })
    }

    /// Stop all loops, shut sensors down and persist final state.
    pub async fn stop(&mut self) -> LearningSummary {
        self.stop.trigger();
        self.manager.shutdown_all().await;

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("background task failed: {e}");
            }
        }

        if self.running {
            if let Some(orchestrator) = &self.orchestrator {
                persist(
                    &self.learner,
                    &self.activity,
                    orchestrator,
                    &self.config.params_path(),
                    &self.config.sensor_log_path(),
                );
            }
        }
        self.running = false;

        let summary = lock(&self.learner).summary();
        tracing::info!(
            samples = summary.total_samples,
            updates = summary.update_count,
            "Shutdown complete"
        );
        summary
    }

    /// Run until `duration` elapses (if given) or the stop signal is raised,
    /// then shut down.
    pub async fn run_for(
        &mut self,
        duration: Option<Duration>,
    ) -> Result<LearningSummary, SystemError> {
        self.start().await?;
        let stop = self.stop.clone();
        match duration {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {}
                    _ = stop.stopped() => {}
                }
            }
            None => stop.stopped().await,
        }
        Ok(self.stop().await)
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            running: self.running,
            registered_sensors: self.manager.sensor_ids(),
            active_sensors: self.manager.active_sensor_ids(),
            sensor_stats: self
                .manager
                .sensor_ids()
                .into_iter()
                .map(|id| {
                    let stats = self.manager.stats(&id);
                    (id, stats)
                })
                .collect(),
            learning_summary: lock(&self.learner).summary(),
            model_configured: self.model.is_some(),
        }
    }
}

/// Save learned parameters, the sensor log and activity counters. Failures
/// are logged; nothing here stops the pipeline.
fn persist(
    learner: &SharedLearner,
    activity: &SharedTransparencyLog,
    orchestrator: &InferenceOrchestrator,
    params_path: &std::path::Path,
    log_path: &std::path::Path,
) {
    if let Err(e) = lock(learner).save(params_path) {
        tracing::warn!("Save error: {e}");
    }
    if let Err(e) = orchestrator.export_log(log_path) {
        tracing::warn!("Export error: {e}");
    }
    if let Err(e) = activity.save() {
        tracing::warn!("Activity log save error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{ReadingValue, SensorKind};
    use crate::transparency::create_shared_log;

    fn temp(v: f64) -> Reading {
        Reading::new("t", SensorKind::Temperature, ReadingValue::Scalar(v), "°C", 0.95)
    }

    #[test]
    fn test_pipeline_learns_and_flags() {
        let learner = IncrementalLearner::with_seed(
            crate::learner::LearnerConfig {
                update_threshold: 6,
                ..Default::default()
            },
            1,
        )
        .shared();
        let activity = create_shared_log();
        let mut pipeline = LearningPipeline::new(
            Preprocessor::new(crate::core::PreprocessorConfig {
                window_size: 100,
                normalize: false,
            }),
            learner.clone(),
            activity.clone(),
            true,
        );

        // The first vector has no delta; the next five share one length.
        pipeline.handle(&temp(22.0));
        for _ in 0..5 {
            pipeline.handle(&temp(22.0));
        }
        let outcome = pipeline.handle(&temp(35.0));
        assert!(matches!(
            outcome,
            LearningOutcome::Learned { anomaly: Some(score), .. } if score > 0.0
        ));

        let dropped = pipeline.handle(&Reading::new(
            "t",
            SensorKind::Temperature,
            ReadingValue::Boolean(true),
            "",
            1.0,
        ));
        assert_eq!(dropped, LearningOutcome::Dropped);

        let stats = activity.stats();
        assert_eq!(stats.readings_processed, 8);
        assert_eq!(stats.readings_dropped, 1);
        assert_eq!(stats.experiences_added, 7);
        assert_eq!(stats.anomalies_detected, 1);
        assert_eq!(stats.learning_updates, 1);
    }

    #[test]
    fn test_malformed_frames_never_reach_the_pipeline() {
        let reading = |image: &str| {
            format!(
                r#"{{"sensor_id":"cam","sensor_type":"camera",
                    "timestamp":"2024-01-01T00:00:00Z","value":{{"image":{image}}},
                    "unit":"rgb_frame","confidence":0.9,"metadata":{{}}}}"#
            )
        };
        let short = reading(r#"{"width":64,"height":64,"channels":3,"pixels":[0,0,0,0]}"#);
        let empty = reading(r#"{"width":0,"height":0,"channels":3,"pixels":[]}"#);
        assert!(serde_json::from_str::<Reading>(&short).is_err());
        assert!(serde_json::from_str::<Reading>(&empty).is_err());
        assert!(crate::sensor::ImageFrame::new(64, 64, 3, vec![0; 10]).is_none());
        assert!(crate::sensor::ImageFrame::new(0, 0, 3, Vec::new()).is_none());

        let tiny = reading(r#"{"width":2,"height":2,"channels":1,"pixels":[0,50,100,150]}"#);
        let frame: Reading = serde_json::from_str(&tiny).unwrap();
        let mut pipeline = LearningPipeline::new(
            Preprocessor::default(),
            IncrementalLearner::new(Default::default()).shared(),
            create_shared_log(),
            true,
        );
        assert!(matches!(pipeline.handle(&frame), LearningOutcome::Learned { .. }));
    }

    #[test]
    fn test_full_learning_queue_counts_backlog() {
        let activity = create_shared_log();
        let (tx, mut rx) = mpsc::channel(1);
        let feed = learning_feed(tx, activity.clone());

        assert!(feed(&temp(21.0)).is_ok());
        assert!(feed(&temp(22.0)).is_err());
        assert!(feed(&temp(23.0)).is_err());
        assert_eq!(activity.stats().readings_backlogged, 2);

        assert!(rx.try_recv().is_ok());
        drop(rx);
        assert!(feed(&temp(24.0)).is_ok());
        assert_eq!(activity.stats().readings_backlogged, 2);
    }

    #[tokio::test]
    async fn test_start_without_sensors_fails() {
        let mut config = Config::default();
        config.sensors.clear();
        config.data_path = std::env::temp_dir().join(format!("edge_sys_{}", uuid::Uuid::new_v4()));
        let mut system = EdgeSystem::new(config);
        assert_eq!(system.setup_sensors().unwrap(), 0);
        assert!(matches!(system.start().await, Err(SystemError::NoSensors)));
        assert!(!system.is_running());
    }
}
