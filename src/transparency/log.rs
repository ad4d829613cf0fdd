//! Pipeline activity log.
//!
//! Counts what the agent has done (readings consumed, experiences learned,
//! anomalies flagged, insights generated) so an operator can audit a device
//! without digging through raw data. Counters survive restarts when a
//! persistence path is configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Activity counters for the pipeline.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Readings handed to the preprocessor
    readings_processed: AtomicU64,
    /// Readings whose value did not fit the sensor kind
    readings_dropped: AtomicU64,
    /// Readings lost because the learning queue was full
    readings_backlogged: AtomicU64,
    /// Experiences added to the learner
    experiences_added: AtomicU64,
    /// Records flagged anomalous
    anomalies_detected: AtomicU64,
    /// Learner update passes completed
    learning_updates: AtomicU64,
    /// Insights answered by the model
    model_responses: AtomicU64,
    /// Insights answered by the rule-based fallback
    fallback_responses: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            readings_processed: AtomicU64::new(0),
            readings_dropped: AtomicU64::new(0),
            readings_backlogged: AtomicU64::new(0),
            experiences_added: AtomicU64::new(0),
            anomalies_detected: AtomicU64::new(0),
            learning_updates: AtomicU64::new(0),
            model_responses: AtomicU64::new(0),
            fallback_responses: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that restores and persists its counters at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous activity stats: {e}");
        }

        log
    }

    pub fn record_reading(&self) {
        self.readings_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_reading(&self) {
        self.readings_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backlogged_reading(&self) {
        self.readings_backlogged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_experience(&self) {
        self.experiences_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self) {
        self.anomalies_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_learning_update(&self) {
        self.learning_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_response(&self) {
        self.model_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_response(&self) {
        self.fallback_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            readings_processed: self.readings_processed.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            readings_backlogged: self.readings_backlogged.load(Ordering::Relaxed),
            experiences_added: self.experiences_added.load(Ordering::Relaxed),
            anomalies_detected: self.anomalies_detected.load(Ordering::Relaxed),
            learning_updates: self.learning_updates.load(Ordering::Relaxed),
            model_responses: self.model_responses.load(Ordering::Relaxed),
            fallback_responses: self.fallback_responses.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Pipeline Activity:\n\
             - Readings processed: {}\n\
             - Readings dropped: {}\n\
             - Readings lost to backlog: {}\n\
             - Experiences learned: {}\n\
             - Learning updates: {}\n\
             - Anomalies detected: {}\n\
             - Model insights: {}\n\
             - Fallback insights: {}\n\
             - Session duration: {} seconds",
            stats.readings_processed,
            stats.readings_dropped,
            stats.readings_backlogged,
            stats.experiences_added,
            stats.learning_updates,
            stats.anomalies_detected,
            stats.model_responses,
            stats.fallback_responses,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                readings_processed: stats.readings_processed,
                readings_dropped: stats.readings_dropped,
                readings_backlogged: stats.readings_backlogged,
                experiences_added: stats.experiences_added,
                anomalies_detected: stats.anomalies_detected,
                learning_updates: stats.learning_updates,
                model_responses: stats.model_responses,
                fallback_responses: stats.fallback_responses,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.readings_processed
                    .store(persisted.readings_processed, Ordering::Relaxed);
                self.readings_dropped
                    .store(persisted.readings_dropped, Ordering::Relaxed);
                self.readings_backlogged
                    .store(persisted.readings_backlogged, Ordering::Relaxed);
                self.experiences_added
                    .store(persisted.experiences_added, Ordering::Relaxed);
                self.anomalies_detected
                    .store(persisted.anomalies_detected, Ordering::Relaxed);
                self.learning_updates
                    .store(persisted.learning_updates, Ordering::Relaxed);
                self.model_responses
                    .store(persisted.model_responses, Ordering::Relaxed);
                self.fallback_responses
                    .store(persisted.fallback_responses, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.readings_processed,
            &self.readings_dropped,
            &self.readings_backlogged,
            &self.experiences_added,
            &self.anomalies_detected,
            &self.learning_updates,
            &self.model_responses,
            &self.fallback_responses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of activity counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub readings_processed: u64,
    pub readings_dropped: u64,
    pub readings_backlogged: u64,
    pub experiences_added: u64,
    pub anomalies_detected: u64,
    pub learning_updates: u64,
    pub model_responses: u64,
    pub fallback_responses: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    readings_processed: u64,
    readings_dropped: u64,
    #[serde(default)]
    readings_backlogged: u64,
    experiences_added: u64,
    anomalies_detected: u64,
    learning_updates: u64,
    model_responses: u64,
    fallback_responses: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared activity log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
