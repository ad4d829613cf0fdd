//! Learner buffer entries and the grouping used by update passes.

use crate::core::FeatureRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// One buffered observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub features: Vec<f64>,
    pub feature_names: Vec<String>,
    pub label: Option<String>,
    pub reward: Option<f64>,
    pub context: HashMap<String, Value>,
}

impl Experience {
    pub fn from_record(record: &FeatureRecord, label: Option<String>, reward: Option<f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            sensor_id: record.sensor_id.clone(),
            features: record.features.clone(),
            feature_names: record.feature_names.clone(),
            label,
            reward,
            context: record.context.clone(),
        }
    }
}

/// A sensor's experiences that share one feature-vector length.
#[derive(Debug)]
pub struct Homogeneous<'a> {
    pub rows: Vec<&'a Experience>,
}

impl<'a> Homogeneous<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Vector length shared by every row.
    pub fn dimension(&self) -> usize {
        self.rows.first().map(|e| e.features.len()).unwrap_or(0)
    }

    pub fn feature_names(&self) -> &'a [String] {
        self.rows
            .first()
            .map(|e| e.feature_names.as_slice())
            .unwrap_or(&[])
    }

    /// Values of feature `i` across all rows.
    pub fn column(&self, i: usize) -> Vec<f64> {
        self.rows.iter().map(|e| e.features[i]).collect()
    }

    pub fn points(&self) -> Vec<&'a [f64]> {
        self.rows.iter().map(|e| e.features.as_slice()).collect()
    }
}

/// Group experiences by sensor, keeping only the majority-length rows of
/// each group.
///
/// Ties between lengths go to the one seen most recently.
pub fn homogeneous_groups<'a>(
    experiences: impl IntoIterator<Item = &'a Experience>,
) -> BTreeMap<String, Homogeneous<'a>> {
    let mut grouped: BTreeMap<String, Vec<&'a Experience>> = BTreeMap::new();
    for exp in experiences {
        grouped.entry(exp.sensor_id.clone()).or_default().push(exp);
    }

    grouped
        .into_iter()
        .map(|(sensor_id, rows)| {
            let dimension = majority_length(&rows);
            let rows = rows
                .into_iter()
                .filter(|e| e.features.len() == dimension)
                .collect();
            (sensor_id, Homogeneous { rows })
        })
        .collect()
}

fn majority_length(rows: &[&Experience]) -> usize {
    // length -> (count, index of last occurrence)
    let mut tally: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
    for (idx, exp) in rows.iter().enumerate() {
        let entry = tally.entry(exp.features.len()).or_insert((0, idx));
        entry.0 += 1;
        entry.1 = idx;
    }
    tally
        .into_iter()
        .max_by_key(|(_, (count, last))| (*count, *last))
        .map(|(len, _)| len)
        .unwrap_or(0)
}
