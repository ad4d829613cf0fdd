//! Periodic insight generation over the sensor history.

use crate::core::RingBuffer;
use crate::inference::context::{build_prompt, fallback_summary, render_context};
use crate::inference::{CompletionModel, GenerationParams};
use crate::sensor::{HistoryView, SensorStats, StopSignal};
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Returned when no sensor has buffered anything yet.
pub const NO_DATA: &str = "No sensor data available";

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Readings per sensor fed into the context
    pub recent_readings: usize,
    /// Context records kept for export
    pub max_history: usize,
    pub generation: GenerationParams,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            recent_readings: 5,
            max_history: 50,
            generation: GenerationParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Model,
    Fallback,
}

/// One answered inference, kept for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    pub timestamp: DateTime<Utc>,
    pub context: String,
    pub query: Option<String>,
    pub response: String,
    pub source: ResponseSource,
}

/// Payload handed to the periodic callback.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    pub timestamp: DateTime<Utc>,
    pub insights: String,
}

#[derive(Serialize)]
struct SensorLogExport<'a> {
    export_time: DateTime<Utc>,
    host: String,
    instance_id: String,
    context_history: Vec<ContextRecord>,
    sensor_stats: BTreeMap<String, Option<SensorStats>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activity: Option<crate::transparency::TransparencyStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// Builds context from sensor history and asks the model for insights.
pub struct InferenceOrchestrator {
    history: HistoryView,
    model: Option<Arc<dyn CompletionModel>>,
    config: InferenceConfig,
    context_history: Mutex<RingBuffer<ContextRecord>>,
    activity: Option<SharedTransparencyLog>,
    instance_id: String,
}

impl InferenceOrchestrator {
    pub fn new(history: HistoryView, config: InferenceConfig) -> Self {
        Self {
            history,
            model: None,
            context_history: Mutex::new(RingBuffer::new(config.max_history)),
            config,
            activity: None,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn CompletionModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Count model and fallback answers in `log`.
    pub fn with_activity_log(mut self, log: SharedTransparencyLog) -> Self {
        self.activity = Some(log);
        self
    }

    /// Use a fixed instance id in exports.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Render the current context from recent readings.
    pub fn current_context(&self) -> Option<String> {
        let recent: Vec<_> = self
            .history
            .snapshot(self.config.recent_readings)
            .into_iter()
            .filter(|(_, readings)| !readings.is_empty())
            .collect();
        if recent.is_empty() {
            None
        } else {
            Some(render_context(&recent))
        }
    }

    /// Answer one query (or the default analysis request) from current data.
    pub async fn run_inference(&self, query: Option<&str>) -> String {
        let context = match self.current_context() {
            Some(context) => context,
            None => return NO_DATA.to_string(),
        };
        let prompt = build_prompt(&context, query);

        let (response, source) = match &self.model {
            Some(model) => match model.complete(&prompt, &self.config.generation).await {
                Ok(text) => (text.trim().to_string(), ResponseSource::Model),
                Err(e) => {
                    tracing::warn!(model = model.name(), "Inference error: {e}");
                    (fallback_summary(&context), ResponseSource::Fallback)
                }
            },
            None => (fallback_summary(&context), ResponseSource::Fallback),
        };

        if let Some(log) = &self.activity {
            match source {
                ResponseSource::Model => log.record_model_response(),
                ResponseSource::Fallback => log.record_fallback_response(),
            }
        }

        let record = ContextRecord {
            timestamp: Utc::now(),
            context,
            query: query.map(str::to_string),
            response: response.clone(),
            source,
        };
        self.lock_history().push(record);

        response
    }

    /// Run one inference per tick until `stop` is raised.
    ///
    /// Ticks never overlap: a slow call delays the next tick rather than
    /// running alongside it. A failing or panicking callback is logged and
    /// the loop carries on.
    pub async fn run_periodic<F>(
        &self,
        interval: Duration,
        query: Option<String>,
        callback: F,
        stop: StopSignal,
    ) where
        F: Fn(&InferenceResult) -> Result<(), String>,
    {
        tracing::info!("Started continuous monitoring (every {:.1}s)", interval.as_secs_f64());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.stopped() => break,
            }
            if stop.is_set() {
                break;
            }

            let insights = self.run_inference(query.as_deref()).await;
            let result = InferenceResult {
                timestamp: Utc::now(),
                insights,
            };

            match catch_unwind(AssertUnwindSafe(|| callback(&result))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Insight callback failed: {e}"),
                Err(_) => tracing::error!("Insight callback panicked"),
            }
        }
        tracing::info!("Stopped continuous monitoring");
    }

    /// Recorded context/response pairs, oldest first.
    pub fn context_history(&self) -> Vec<ContextRecord> {
        self.lock_history().to_vec()
    }

    /// Write the context history and per-sensor stats as pretty JSON.
    pub fn export_log(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let export = SensorLogExport {
            export_time: Utc::now(),
            host,
            instance_id: self.instance_id.clone(),
            context_history: self.context_history(),
            sensor_stats: self
                .history
                .sensor_ids()
                .into_iter()
                .map(|id| {
                    let stats = self.history.stats(&id);
                    (id, stats)
                })
                .collect(),
            activity: self.activity.as_ref().map(|log| log.stats()),
            model: self.model.as_ref().map(|m| m.name()),
        };

        let json = serde_json::to_string_pretty(&export).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Exported sensor log");
        Ok(())
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, RingBuffer<ContextRecord>> {
        match self.context_history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{CompletionFuture, ModelError};
    use crate::sensor::{SensorManager, TemperatureSensor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned(&'static str);

    impl CompletionModel for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
            _params: &'a GenerationParams,
        ) -> CompletionFuture<'a> {
            Box::pin(async move { Ok(format!("  {}  ", self.0)) })
        }
    }

    struct Broken;

    impl CompletionModel for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
            _params: &'a GenerationParams,
        ) -> CompletionFuture<'a> {
            Box::pin(async { Err(ModelError::Unavailable("offline".to_string())) })
        }
    }

    /// Sleeps for `delay` and tracks how many calls run at once.
    struct Slow {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CompletionModel for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
            _params: &'a GenerationParams,
        ) -> CompletionFuture<'a> {
            Box::pin(async move {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok("done".to_string())
            })
        }
    }

    async fn streaming_manager() -> SensorManager {
        let mut manager = SensorManager::default();
        manager
            .register_sensor(TemperatureSensor::new("room").with_seed(1))
            .unwrap();
        manager.initialize_all().await;
        manager.start_streaming().unwrap();
        manager
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_leaves_history_untouched() {
        let mut manager = SensorManager::default();
        manager.register_sensor(TemperatureSensor::new("room")).unwrap();
        let orchestrator =
            InferenceOrchestrator::new(manager.history_view(), InferenceConfig::default());

        assert_eq!(orchestrator.run_inference(None).await, NO_DATA);
        assert!(orchestrator.context_history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_and_fallback_sources() {
        let mut manager = streaming_manager().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let with_model =
            InferenceOrchestrator::new(manager.history_view(), InferenceConfig::default())
                .with_model(Arc::new(Canned("All good.")));
        assert_eq!(with_model.run_inference(Some("status?")).await, "All good.");
        let record = &with_model.context_history()[0];
        assert_eq!(record.source, ResponseSource::Model);
        assert_eq!(record.query.as_deref(), Some("status?"));
        assert!(record.context.starts_with("Temperature sensor 'room'"));

        let log = crate::transparency::create_shared_log();
        let broken = InferenceOrchestrator::new(manager.history_view(), InferenceConfig::default())
            .with_model(Arc::new(Broken))
            .with_activity_log(log.clone());
        let answer = broken.run_inference(None).await;
        assert!(answer.starts_with("Sensor Analysis:\n• "));
        assert_eq!(broken.context_history()[0].source, ResponseSource::Fallback);
        assert_eq!(log.stats().fallback_responses, 1);

        manager.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_history_is_bounded() {
        let mut manager = streaming_manager().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let orchestrator = InferenceOrchestrator::new(
            manager.history_view(),
            InferenceConfig {
                max_history: 3,
                ..InferenceConfig::default()
            },
        );
        for _ in 0..5 {
            orchestrator.run_inference(None).await;
        }
        assert_eq!(orchestrator.context_history().len(), 3);
        manager.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_never_overlap() {
        let mut manager = streaming_manager().await;
        let slow = Arc::new(Slow {
            delay: Duration::from_secs(3),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Arc::new(
            InferenceOrchestrator::new(manager.history_view(), InferenceConfig::default())
                .with_model(slow.clone()),
        );
        let stop = StopSignal::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let task = {
            let orchestrator = orchestrator.clone();
            let stop = stop.clone();
            let delivered = delivered.clone();
            tokio::spawn(async move {
                orchestrator
                    .run_periodic(
                        Duration::from_secs(1),
                        None,
                        move |_| {
                            let n = delivered.fetch_add(1, Ordering::SeqCst);
                            if n % 2 == 0 {
                                Err("sink unavailable".to_string())
                            } else {
                                panic!("sink crashed")
                            }
                        },
                        stop,
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(12_500)).await;
        stop.trigger();
        task.await.unwrap();
        manager.shutdown_all().await;

        assert_eq!(slow.max_active.load(Ordering::SeqCst), 1);
        // Each call takes 3s with a 1s period, so calls are back to back.
        let calls = slow.calls.load(Ordering::SeqCst);
        assert!((3..=5).contains(&calls), "calls = {calls}");
        assert!(delivered.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_log() {
        let mut manager = streaming_manager().await;
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let orchestrator =
            InferenceOrchestrator::new(manager.history_view(), InferenceConfig::default())
                .with_instance_id("test-instance");
        orchestrator.run_inference(None).await;
        manager.shutdown_all().await;

        let path = std::env::temp_dir().join(format!("edge_export_{}.json", uuid::Uuid::new_v4()));
        orchestrator.export_log(&path).unwrap();
        let exported: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(exported["instance_id"], "test-instance");
        assert_eq!(exported["context_history"].as_array().unwrap().len(), 1);
        assert_eq!(exported["context_history"][0]["source"], "fallback");
        assert!(exported["sensor_stats"]["room"]["count"].as_u64().unwrap() >= 2);

        let _ = std::fs::remove_file(path);
    }
}
