//! The three parameter updates run by each learning pass.

use crate::core::stats;
use crate::learner::experience::Homogeneous;
use rand::rngs::StdRng;
use rand::seq::index;
use std::collections::BTreeMap;

/// Maximum centroids kept per sensor.
pub const MAX_CLUSTERS: usize = 5;

/// Samples required before thresholds or clusters are learned.
pub const MIN_SAMPLES: usize = 5;

const WEIGHT_RETAIN: f64 = 0.7;
const THRESHOLD_RETAIN: f64 = 0.8;
const CENTROID_RETAIN: f64 = 0.7;

/// `retain·old + (1-retain)·sample`
pub fn blend(old: f64, sample: f64, retain: f64) -> f64 {
    retain * old + (1.0 - retain) * sample
}

/// Key for per-feature learned parameters.
pub fn feature_key(sensor_id: &str, feature: &str) -> String {
    format!("{sensor_id}:{feature}")
}

/// Variance-proportional feature weights, blended into `weights`.
pub fn update_feature_weights(
    weights: &mut BTreeMap<String, f64>,
    sensor_id: &str,
    group: &Homogeneous<'_>,
) {
    if group.len() < 2 {
        return;
    }
    let variances: Vec<f64> = (0..group.dimension())
        .map(|i| stats::variance(&group.column(i)))
        .collect();
    let total: f64 = variances.iter().sum();
    if total <= 0.0 {
        return;
    }

    for (name, variance) in group.feature_names().iter().zip(&variances) {
        let sample = variance / total;
        weights
            .entry(feature_key(sensor_id, name))
            .and_modify(|w| *w = blend(*w, sample, WEIGHT_RETAIN))
            .or_insert(sample);
    }
}

/// mean ± 3σ bands per feature, blended into `thresholds`.
pub fn update_anomaly_thresholds(
    thresholds: &mut BTreeMap<String, (f64, f64)>,
    sensor_id: &str,
    group: &Homogeneous<'_>,
) {
    if group.len() < MIN_SAMPLES {
        return;
    }
    for (i, name) in group.feature_names().iter().enumerate() {
        let column = group.column(i);
        let mean = stats::mean(&column);
        let spread = 3.0 * stats::std_dev(&column);
        let (lower, upper) = (mean - spread, mean + spread);

        thresholds
            .entry(feature_key(sensor_id, name))
            .and_modify(|(lo, hi)| {
                *lo = blend(*lo, lower, THRESHOLD_RETAIN);
                *hi = blend(*hi, upper, THRESHOLD_RETAIN);
            })
            .or_insert((lower, upper));
    }
}

/// Seed or refine a sensor's pattern centroids.
///
/// Returns `true` when the centroids were (re)seeded rather than refined.
pub fn update_pattern_clusters(
    clusters: &mut BTreeMap<String, Vec<Vec<f64>>>,
    sensor_id: &str,
    group: &Homogeneous<'_>,
    rng: &mut StdRng,
) -> bool {
    if group.len() < MIN_SAMPLES {
        return false;
    }
    let points = group.points();

    let stale = clusters
        .get(sensor_id)
        .map(|c| c.first().map(|v| v.len()) != Some(group.dimension()))
        .unwrap_or(true);
    if stale {
        let k = MAX_CLUSTERS.min(points.len());
        let seeds = index::sample(rng, points.len(), k)
            .into_iter()
            .map(|i| points[i].to_vec())
            .collect();
        clusters.insert(sensor_id.to_string(), seeds);
        return true;
    }

    if let Some(centroids) = clusters.get_mut(sensor_id) {
        for centroid in centroids.iter_mut() {
            refine_centroid(centroid, &points);
        }
    }
    false
}

/// Move `centroid` towards the points strictly closer than the median
/// distance. Unchanged when no point qualifies.
fn refine_centroid(centroid: &mut [f64], points: &[&[f64]]) {
    let distances: Vec<f64> = points
        .iter()
        .map(|p| stats::euclidean(p, centroid))
        .collect();
    let cutoff = stats::median(&distances);
    let close: Vec<&[f64]> = points
        .iter()
        .zip(&distances)
        .filter(|(_, d)| **d < cutoff)
        .map(|(p, _)| *p)
        .collect();
    if close.is_empty() {
        return;
    }

    for (i, value) in centroid.iter_mut().enumerate() {
        let column: Vec<f64> = close.iter().map(|p| p[i]).collect();
        *value = blend(*value, stats::mean(&column), CENTROID_RETAIN);
    }
}
