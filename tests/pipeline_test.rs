//! End-to-end tests for the sensor pipeline

use edge_sensor_agent::config::{Config, SensorSpec};
use edge_sensor_agent::core::{Preprocessor, PreprocessorConfig};
use edge_sensor_agent::inference::{
    CompletionFuture, CompletionModel, GenerationParams, InferenceResult, ModelError,
};
use edge_sensor_agent::learner::LearnedParameters;
use edge_sensor_agent::sensor::{MotionSensor, Reading, SensorManager, TemperatureSensor};
use edge_sensor_agent::system::EdgeSystem;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("edge_sensor_{tag}_{}", uuid::Uuid::new_v4()))
}

fn drain(rx: &mut mpsc::Receiver<Reading>) -> Vec<Reading> {
    let mut out = Vec::new();
    while let Ok(reading) = rx.try_recv() {
        out.push(reading);
    }
    out
}

fn test_config(tag: &str, sensors: Vec<SensorSpec>) -> Config {
    let root = temp_dir(tag);
    let mut config = Config::default();
    config.sensors = sensors;
    config.data_path = root.join("data");
    config.export_path = root.join("exports");
    config.inference.interval = Duration::from_millis(250);
    config.learning.learner.update_threshold = 5;
    config.persistence.auto_save = false;
    config
}

#[tokio::test(start_paused = true)]
async fn test_two_sensors_feed_windowed_features() {
    let mut manager = SensorManager::default();
    manager
        .register_sensor(TemperatureSensor::new("room").with_rate(1.0))
        .unwrap();
    manager
        .register_sensor(MotionSensor::new("door").with_rate(1.0))
        .unwrap();
    let mut temps = manager.subscribe("room", 64).unwrap();
    let mut motions = manager.subscribe("door", 64).unwrap();

    assert_eq!(manager.initialize_all().await, 2);
    assert_eq!(manager.start_streaming().unwrap(), 2);
    tokio::time::sleep(Duration::from_secs(10)).await;
    manager.shutdown_all().await;

    let temps = drain(&mut temps);
    let motions = drain(&mut motions);
    assert!(temps.len() >= 8, "only {} temperature readings", temps.len());
    assert!(motions.len() >= 8, "only {} motion readings", motions.len());

    let mut preprocessor = Preprocessor::new(PreprocessorConfig {
        window_size: 5,
        normalize: true,
    });
    let records = preprocessor.process_batch(&temps);
    assert_eq!(records.len(), temps.len());
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.get("temperature_mean").is_some(), i >= 4, "record {i}");
        assert_eq!(record.get("temperature_delta").is_some(), i >= 1, "record {i}");
    }

    let records = preprocessor.process_batch(&motions);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.get("motion_frequency").is_some(), i >= 4, "record {i}");
    }
}

#[tokio::test]
async fn test_readings_are_spaced_by_sampling_interval() {
    let mut manager = SensorManager::default();
    manager
        .register_sensor(TemperatureSensor::new("fast").with_rate(10.0))
        .unwrap();
    manager.initialize_all().await;
    manager.start_streaming().unwrap();

    tokio::time::sleep(Duration::from_millis(1050)).await;
    manager.shutdown_all().await;

    let readings = manager.recent("fast", 100);
    assert!(readings.len() >= 5, "only {} readings", readings.len());
    assert!(readings.len() <= 12, "{} readings", readings.len());
    for pair in readings.windows(2) {
        let gap = pair[1].timestamp - pair[0].timestamp;
        assert!(gap.num_milliseconds() >= 90, "gap {gap}");
    }
}

#[tokio::test]
async fn test_system_run_learns_and_persists() {
    let config = test_config(
        "run",
        vec![
            SensorSpec::Temperature {
                id: "temp_room".to_string(),
                rate_hz: Some(20.0),
            },
            SensorSpec::Motion {
                id: "motion_hall".to_string(),
                rate_hz: Some(20.0),
                detection_probability: Some(0.5),
            },
        ],
    );
    let params_path = config.params_path();
    let log_path = config.sensor_log_path();

    let insights: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = insights.clone();
    let mut system = EdgeSystem::new(config.clone()).with_insight_handler(Arc::new(
        move |result: &InferenceResult| {
            sink.lock().unwrap().push(result.insights.clone());
        },
    ));
    assert_eq!(system.setup_sensors().unwrap(), 2);

    let summary = system
        .run_for(Some(Duration::from_millis(1500)))
        .await
        .unwrap();
    assert!(!system.is_running());
    assert!(summary.total_samples >= 10, "{summary:?}");
    assert!(summary.update_count >= 1, "{summary:?}");

    let insights = insights.lock().unwrap().clone();
    assert!(insights.len() >= 2, "{insights:?}");
    assert!(insights.iter().any(|i| i.starts_with("Sensor Analysis:")));

    let params = LearnedParameters::read(&params_path).unwrap();
    assert_eq!(params.metadata.total_samples, summary.total_samples);
    assert!(params.feature_weights.contains_key("temp_room:temperature_current"));

    let log: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&log_path).unwrap()).unwrap();
    assert!(log["context_history"].as_array().unwrap().len() >= 1);
    assert!(log["sensor_stats"]["temp_room"]["count"].as_u64().unwrap() > 0);
    assert_eq!(log["context_history"][0]["source"], "fallback");

    let activity = system.activity().stats();
    assert_eq!(activity.readings_processed, activity.experiences_added);
    assert!(activity.fallback_responses >= 2);

    // A second run resumes from the saved parameters.
    let mut resumed = EdgeSystem::new(config);
    resumed.setup_sensors().unwrap();
    let second = resumed
        .run_for(Some(Duration::from_millis(500)))
        .await
        .unwrap();
    assert!(second.total_samples > summary.total_samples);
    assert!(second.update_count >= summary.update_count);

    let _ = std::fs::remove_dir_all(params_path.parent().unwrap().parent().unwrap());
}

#[tokio::test]
async fn test_stop_signal_ends_open_ended_run() {
    let config = test_config(
        "stop",
        vec![SensorSpec::Temperature {
            id: "t".to_string(),
            rate_hz: Some(10.0),
        }],
    );
    let root = config.data_path.parent().unwrap().to_path_buf();
    let mut system = EdgeSystem::new(config);
    system.setup_sensors().unwrap();

    let stop = system.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        stop.trigger();
    });

    let summary = tokio::time::timeout(Duration::from_secs(5), system.run_for(None))
        .await
        .expect("run did not stop")
        .unwrap();
    assert!(summary.total_samples >= 1);

    let _ = std::fs::remove_dir_all(root);
}

/// Always answers the same text.
struct Echo;

impl CompletionModel for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        _params: &'a GenerationParams,
    ) -> CompletionFuture<'a> {
        let has_context = prompt.contains("Temperature sensor 'temp_room'");
        Box::pin(async move {
            if has_context {
                Ok("  The room is stable.  ".to_string())
            } else {
                Err(ModelError::Request("empty context".to_string()))
            }
        })
    }
}

#[tokio::test]
async fn test_model_answers_are_used_when_available() {
    let mut config = test_config(
        "model",
        vec![SensorSpec::Temperature {
            id: "temp_room".to_string(),
            rate_hz: Some(20.0),
        }],
    );
    config.learning.enabled = false;
    let root = config.data_path.parent().unwrap().to_path_buf();

    let insights: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = insights.clone();
    let mut system = EdgeSystem::new(config)
        .with_model(Arc::new(Echo))
        .with_insight_handler(Arc::new(move |result: &InferenceResult| {
            sink.lock().unwrap().push(result.insights.clone());
        }));
    system.setup_sensors().unwrap();

    let summary = system
        .run_for(Some(Duration::from_millis(900)))
        .await
        .unwrap();
    assert_eq!(summary.total_samples, 0);

    let insights = insights.lock().unwrap().clone();
    assert!(insights.iter().any(|i| i == "The room is stable."), "{insights:?}");
    assert!(system.activity().stats().model_responses >= 1);

    let _ = std::fs::remove_dir_all(root);
}
