//! Online learning over a bounded experience buffer.
//!
//! The learner never retrains from scratch. Every `update_threshold` new
//! experiences it runs one pass over the whole buffer and blends the result
//! into three parameter sets:
//!
//! - feature weights (variance share per feature)
//! - anomaly bands (mean ± 3σ per feature)
//! - pattern centroids (up to five per sensor)

pub mod experience;
pub mod persistence;
pub mod update;

pub use experience::Experience;
pub use persistence::{LearnedParameters, ParameterMetadata, PersistenceError};

use crate::core::{FeatureRecord, RingBuffer};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use update::feature_key;

/// Learner shared between the consumer task and status queries.
pub type SharedLearner = Arc<Mutex<IncrementalLearner>>;

/// Learner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Recorded alongside saved parameters
    pub learning_rate: f64,
    /// Experience buffer capacity
    pub memory_size: usize,
    /// New experiences between update passes
    pub update_threshold: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            memory_size: 1000,
            update_threshold: 10,
        }
    }
}

/// Snapshot of learning progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSummary {
    pub total_samples: u64,
    pub update_count: u64,
    pub features_tracked: usize,
    pub anomaly_thresholds_learned: usize,
    pub pattern_clusters: BTreeMap<String, usize>,
    /// Fill ratio of the experience buffer (0-1)
    pub buffer_utilization: f64,
}

pub struct IncrementalLearner {
    config: LearnerConfig,
    buffer: RingBuffer<Experience>,
    /// Experiences added since the last pass
    pending: usize,
    feature_weights: BTreeMap<String, f64>,
    anomaly_thresholds: BTreeMap<String, (f64, f64)>,
    pattern_clusters: BTreeMap<String, Vec<Vec<f64>>>,
    update_count: u64,
    total_samples: u64,
    rng: StdRng,
}

impl IncrementalLearner {
    pub fn new(config: LearnerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// A learner with deterministic cluster seeding.
    pub fn with_seed(config: LearnerConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: LearnerConfig, rng: StdRng) -> Self {
        let config = LearnerConfig {
            update_threshold: config.update_threshold.max(1),
            ..config
        };
        Self {
            buffer: RingBuffer::new(config.memory_size),
            config,
            pending: 0,
            feature_weights: BTreeMap::new(),
            anomaly_thresholds: BTreeMap::new(),
            pattern_clusters: BTreeMap::new(),
            update_count: 0,
            total_samples: 0,
            rng,
        }
    }

    /// Wrap into a [`SharedLearner`].
    pub fn shared(self) -> SharedLearner {
        Arc::new(Mutex::new(self))
    }

    /// Buffer one experience. Returns `true` if this triggered an update pass.
    pub fn add_experience(
        &mut self,
        record: &FeatureRecord,
        label: Option<String>,
        reward: Option<f64>,
    ) -> bool {
        self.buffer
            .push(Experience::from_record(record, label, reward));
        self.total_samples += 1;
        self.pending += 1;

        if self.pending < self.config.update_threshold {
            return false;
        }
        self.pending = 0;
        self.update_pass()
    }

    /// Recompute every parameter set over the whole buffer.
    fn update_pass(&mut self) -> bool {
        if self.buffer.len() < 2 {
            return false;
        }

        let groups = experience::homogeneous_groups(self.buffer.iter());
        for (sensor_id, group) in &groups {
            update::update_feature_weights(&mut self.feature_weights, sensor_id, group);
            update::update_anomaly_thresholds(&mut self.anomaly_thresholds, sensor_id, group);
            if update::update_pattern_clusters(
                &mut self.pattern_clusters,
                sensor_id,
                group,
                &mut self.rng,
            ) {
                tracing::debug!(sensor = %sensor_id, "seeded pattern clusters");
            }
        }

        self.update_count += 1;
        tracing::debug!(
            update = self.update_count,
            buffered = self.buffer.len(),
            "incremental update completed"
        );
        true
    }

    /// Score a record against the learned bands.
    ///
    /// Each out-of-band feature scores its distance past the nearer bound
    /// divided by that bound's magnitude (1.0 for a zero bound). The result is
    /// the mean of those scores, or `(false, 0.0)` when nothing triggers.
    pub fn detect_anomaly(&self, record: &FeatureRecord) -> (bool, f64) {
        let scores: Vec<f64> = record
            .feature_names
            .iter()
            .zip(&record.features)
            .filter_map(|(name, value)| {
                let (lower, upper) = *self
                    .anomaly_thresholds
                    .get(&feature_key(&record.sensor_id, name))?;
                if *value < lower {
                    Some(relative_excess(lower - value, lower))
                } else if *value > upper {
                    Some(relative_excess(value - upper, upper))
                } else {
                    None
                }
            })
            .collect();

        if scores.is_empty() {
            (false, 0.0)
        } else {
            (true, scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Index of the nearest learned centroid of matching dimension.
    pub fn predict_pattern(&self, record: &FeatureRecord) -> Option<usize> {
        self.pattern_clusters
            .get(&record.sensor_id)?
            .iter()
            .enumerate()
            .filter(|(_, c)| c.len() == record.features.len())
            .map(|(i, c)| (i, crate::core::stats::euclidean(&record.features, c)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Learned weight for a feature, or 0.0.
    pub fn feature_importance(&self, sensor_id: &str, feature: &str) -> f64 {
        self.feature_weights
            .get(&feature_key(sensor_id, feature))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn anomaly_band(&self, sensor_id: &str, feature: &str) -> Option<(f64, f64)> {
        self.anomaly_thresholds
            .get(&feature_key(sensor_id, feature))
            .copied()
    }

    pub fn clusters(&self, sensor_id: &str) -> Option<&[Vec<f64>]> {
        self.pattern_clusters.get(sensor_id).map(|c| c.as_slice())
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn summary(&self) -> LearningSummary {
        LearningSummary {
            total_samples: self.total_samples,
            update_count: self.update_count,
            features_tracked: self.feature_weights.len(),
            anomaly_thresholds_learned: self.anomaly_thresholds.len(),
            pattern_clusters: self
                .pattern_clusters
                .iter()
                .map(|(sensor, c)| (sensor.clone(), c.len()))
                .collect(),
            buffer_utilization: self.buffer.len() as f64 / self.buffer.capacity() as f64,
        }
    }

    /// The learned state as a persistable record.
    pub fn parameters(&self) -> LearnedParameters {
        LearnedParameters {
            feature_weights: self.feature_weights.clone(),
            anomaly_thresholds: self.anomaly_thresholds.clone(),
            pattern_clusters: self.pattern_clusters.clone(),
            metadata: ParameterMetadata {
                update_count: self.update_count,
                total_samples: self.total_samples,
                learning_rate: self.config.learning_rate,
                saved_at: Utc::now(),
            },
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        self.parameters().write(path)?;
        tracing::info!(path = %path.display(), "saved learned parameters");
        Ok(())
    }

    /// Restore learned state. On error the current state is kept as-is.
    pub fn load(&mut self, path: &Path) -> Result<(), PersistenceError> {
        let params = LearnedParameters::read(path)?;
        self.feature_weights = params.feature_weights;
        self.anomaly_thresholds = params.anomaly_thresholds;
        self.pattern_clusters = params.pattern_clusters;
        self.update_count = params.metadata.update_count;
        self.total_samples = params.metadata.total_samples;
        tracing::info!(
            path = %path.display(),
            updates = self.update_count,
            samples = self.total_samples,
            "loaded learned parameters"
        );
        Ok(())
    }
}

impl Default for IncrementalLearner {
    fn default() -> Self {
        Self::new(LearnerConfig::default())
    }
}

fn relative_excess(distance: f64, bound: f64) -> f64 {
    if bound == 0.0 {
        1.0
    } else {
        distance / bound.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(sensor: &str, values: &[f64]) -> FeatureRecord {
        let mut record = FeatureRecord::new(sensor, Utc::now());
        for (i, v) in values.iter().enumerate() {
            record.push(format!("f{i}"), *v);
        }
        record
    }

    fn temperature(v: f64) -> FeatureRecord {
        let mut record = FeatureRecord::new("temp", Utc::now());
        record.push("temperature_current", v);
        record
    }

    fn config(threshold: usize) -> LearnerConfig {
        LearnerConfig {
            update_threshold: threshold,
            ..LearnerConfig::default()
        }
    }

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("edge_learner_{}_{name}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_no_anomaly_before_learning() {
        let learner = IncrementalLearner::default();
        assert_eq!(learner.detect_anomaly(&temperature(99.0)), (false, 0.0));
        assert_eq!(learner.predict_pattern(&temperature(99.0)), None);
        assert_eq!(learner.feature_importance("temp", "temperature_current"), 0.0);
    }

    #[test]
    fn test_update_cadence() {
        let mut learner = IncrementalLearner::with_seed(config(10), 1);
        let passes: Vec<usize> = (0..25)
            .filter_map(|i| learner.add_experience(&temperature(i as f64), None, None).then_some(i))
            .collect();
        assert_eq!(passes, vec![9, 19]);
        assert_eq!(learner.update_count(), 2);
        assert_eq!(learner.summary().total_samples, 25);
    }

    #[test]
    fn test_constant_input_gives_degenerate_band() {
        let mut learner = IncrementalLearner::with_seed(config(5), 1);
        for _ in 0..5 {
            learner.add_experience(&temperature(21.0), None, None);
        }
        assert_eq!(learner.anomaly_band("temp", "temperature_current"), Some((21.0, 21.0)));
        assert_eq!(learner.detect_anomaly(&temperature(21.0)), (false, 0.0));

        let (anomalous, score) = learner.detect_anomaly(&temperature(21.5));
        assert!(anomalous);
        assert!(score > 0.0);
    }

    #[test]
    fn test_zero_bound_scores_one() {
        let mut learner = IncrementalLearner::with_seed(config(5), 1);
        for _ in 0..5 {
            learner.add_experience(&temperature(0.0), None, None);
        }
        assert_eq!(learner.detect_anomaly(&temperature(3.0)), (true, 1.0));
    }

    #[test]
    fn test_oscillating_temperature_scenario() {
        let mut learner = IncrementalLearner::with_seed(config(10), 42);
        for i in 0..20 {
            let v = if i % 2 == 0 { 20.0 } else { 24.0 };
            learner.add_experience(&temperature(v), None, None);
        }
        assert_eq!(learner.update_count(), 2);

        // mean 22, σ 2
        let (lower, upper) = learner.anomaly_band("temp", "temperature_current").unwrap();
        assert!((lower - 16.0).abs() < 1e-9);
        assert!((upper - 28.0).abs() < 1e-9);
        assert!(lower <= 20.0 && upper >= 24.0);

        let (anomalous, score) = learner.detect_anomaly(&temperature(40.0));
        assert!(anomalous);
        assert!((score - 12.0 / 28.0).abs() < 1e-9);

        assert!((learner.feature_importance("temp", "temperature_current") - 1.0).abs() < 1e-12);
        assert!(learner.predict_pattern(&temperature(21.0)).is_some());
    }

    #[test]
    fn test_heterogeneous_lengths_use_majority() {
        let mut learner = IncrementalLearner::with_seed(config(8), 3);
        learner.add_experience(&record("s", &[1.0]), None, None);
        learner.add_experience(&record("s", &[2.0, 1.0]), None, None);
        for i in 0..6 {
            learner.add_experience(&record("s", &[i as f64, 10.0, 5.0]), None, None);
        }
        assert_eq!(learner.update_count(), 1);
        assert!(learner.anomaly_band("s", "f2").is_some());
        assert_eq!(learner.clusters("s").map(|c| c[0].len()), Some(3));
        // Mismatched dimension never matches a centroid.
        assert_eq!(learner.predict_pattern(&record("s", &[1.0])), None);
    }

    #[test]
    fn test_weights_stay_normalized() {
        let mut learner = IncrementalLearner::with_seed(config(10), 5);
        for i in 0..30 {
            let x = (i % 3) as f64;
            learner.add_experience(&record("s", &[x, 2.0 * x]), None, None);
        }
        let total = learner.feature_importance("s", "f0") + learner.feature_importance("s", "f1");
        assert!((total - 1.0).abs() < 1e-9);
        assert!(learner.feature_importance("s", "f1") > learner.feature_importance("s", "f0"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut learner = IncrementalLearner::with_seed(config(10), 9);
        for i in 0..30 {
            let features = [i as f64 * 0.37, (i % 4) as f64 / 3.0];
            learner.add_experience(&record("s", &features), None, None);
        }
        let path = temp_file("roundtrip.json");
        learner.save(&path).unwrap();

        let mut restored = IncrementalLearner::default();
        restored.load(&path).unwrap();
        let before = learner.parameters();
        let after = restored.parameters();
        assert_eq!(before.feature_weights, after.feature_weights);
        assert_eq!(before.anomaly_thresholds, after.anomaly_thresholds);
        assert_eq!(before.pattern_clusters, after.pattern_clusters);
        assert_eq!(restored.summary().update_count, 3);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_failed_load_keeps_state() {
        let mut learner = IncrementalLearner::with_seed(config(5), 1);
        for _ in 0..5 {
            learner.add_experience(&temperature(21.0), None, None);
        }
        let before = learner.parameters();

        let missing_field = temp_file("missing.json");
        std::fs::write(
            &missing_field,
            r#"{"feature_weights": {}, "anomaly_thresholds": {}}"#,
        )
        .unwrap();
        assert!(matches!(learner.load(&missing_field), Err(PersistenceError::Parse(_))));

        let garbage = temp_file("garbage.json");
        std::fs::write(&garbage, "not json").unwrap();
        assert!(learner.load(&garbage).is_err());

        assert!(matches!(
            learner.load(&temp_file("absent.json")),
            Err(PersistenceError::Io(_))
        ));

        let after = learner.parameters();
        assert_eq!(before.anomaly_thresholds, after.anomaly_thresholds);
        assert_eq!(before.feature_weights, after.feature_weights);
        assert_eq!(learner.update_count(), 1);

        let _ = std::fs::remove_file(missing_field);
        let _ = std::fs::remove_file(garbage);
    }

    #[test]
    fn test_summary_counts() {
        let mut learner = IncrementalLearner::with_seed(
            LearnerConfig {
                memory_size: 20,
                update_threshold: 10,
                ..LearnerConfig::default()
            },
            2,
        );
        for i in 0..10 {
            learner.add_experience(&record("s", &[i as f64]), None, None);
        }
        let summary = learner.summary();
        assert_eq!(summary.features_tracked, 1);
        assert_eq!(summary.anomaly_thresholds_learned, 1);
        assert_eq!(summary.pattern_clusters.get("s"), Some(&5));
        assert!((summary.buffer_utilization - 0.5).abs() < 1e-12);
    }
}
