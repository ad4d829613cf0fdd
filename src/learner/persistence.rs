//! On-disk record of learned parameters.

use crate::learner::update::MAX_CLUSTERS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything a learner needs to resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedParameters {
    pub feature_weights: BTreeMap<String, f64>,
    pub anomaly_thresholds: BTreeMap<String, (f64, f64)>,
    pub pattern_clusters: BTreeMap<String, Vec<Vec<f64>>>,
    pub metadata: ParameterMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMetadata {
    pub update_count: u64,
    pub total_samples: u64,
    pub learning_rate: f64,
    pub saved_at: DateTime<Utc>,
}

impl LearnedParameters {
    /// Write as pretty JSON via a temporary sibling file renamed into place.
    pub fn write(&self, path: &Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        let tmp = temp_sibling(path);
        std::fs::write(&tmp, content).map_err(|e| PersistenceError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            PersistenceError::Io(e.to_string())
        })?;
        Ok(())
    }

    /// Read and validate a record.
    pub fn read(path: &Path) -> Result<Self, PersistenceError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PersistenceError::Io(e.to_string()))?;
        let params: Self = serde_json::from_str(&content)
            .map_err(|e| PersistenceError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Structural checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        for (key, weight) in &self.feature_weights {
            if !weight.is_finite() {
                return Err(invalid(format!("weight for {key} is not finite")));
            }
        }

        for (key, (lower, upper)) in &self.anomaly_thresholds {
            if !lower.is_finite() || !upper.is_finite() {
                return Err(invalid(format!("threshold for {key} is not finite")));
            }
            if lower > upper {
                return Err(invalid(format!(
                    "threshold for {key} has lower bound {lower} above upper bound {upper}"
                )));
            }
        }

        for (sensor, centroids) in &self.pattern_clusters {
            if centroids.len() > MAX_CLUSTERS {
                return Err(invalid(format!(
                    "{sensor} has {} centroids (max {MAX_CLUSTERS})",
                    centroids.len()
                )));
            }
            let dimension = centroids.first().map(|c| c.len()).unwrap_or(0);
            for centroid in centroids {
                if centroid.len() != dimension {
                    return Err(invalid(format!("{sensor} has centroids of mixed dimension")));
                }
                if centroid.iter().any(|v| !v.is_finite()) {
                    return Err(invalid(format!("{sensor} has a non-finite centroid")));
                }
            }
        }

        if !self.metadata.learning_rate.is_finite() {
            return Err(invalid("learning rate is not finite".to_string()));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> PersistenceError {
    PersistenceError::Invalid(reason)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "learned_params.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Saving or loading learned parameters failed.
#[derive(Debug)]
pub enum PersistenceError {
    Io(String),
    Parse(String),
    Invalid(String),
    Serialize(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "IO error: {e}"),
            PersistenceError::Parse(e) => write!(f, "Parse error: {e}"),
            PersistenceError::Invalid(e) => write!(f, "Invalid parameters: {e}"),
            PersistenceError::Serialize(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for PersistenceError {}
