//! Volume outlier scoring.
//!
//! The scorer is a capability: given scalar samples and a contamination
//! fraction it labels roughly that fraction of the samples as outliers. The
//! default implementation is an isolation forest with a fixed seed, so the
//! same input always yields the same labels.

use super::anomaly::{Baseline, TimeSeries};
use super::bucket::TimeBucket;
use super::{AnomalyKind, AnomalyRecord, Severity};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Labels scalar samples as inliers or outliers.
pub trait OutlierScorer: Send + Sync {
    /// Returns one label per sample, `true` for outliers.
    fn label(&self, samples: &[f64], contamination: f64) -> Vec<bool>;
}

/// Ensemble of random isolation trees over one-dimensional samples.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

enum Node {
    Leaf {
        size: usize,
    },
    Split {
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn build(values: &[f64], depth: usize, height_limit: usize, rng: &mut StdRng) -> Node {
        if depth >= height_limit || values.len() <= 1 {
            return Node::Leaf { size: values.len() };
        }
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if min >= max {
            return Node::Leaf { size: values.len() };
        }

        // Half-open range keeps `max` on the right, so neither side is empty.
        let threshold = rng.gen_range(min..max);
        let (left, right): (Vec<f64>, Vec<f64>) = values.iter().partition(|&&v| v <= threshold);
        Node::Split {
            threshold,
            left: Box::new(Node::build(&left, depth + 1, height_limit, rng)),
            right: Box::new(Node::build(&right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, value: f64, depth: usize) -> f64 {
        match self {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                threshold,
                left,
                right,
            } => {
                if value <= *threshold {
                    left.path_length(value, depth + 1)
                } else {
                    right.path_length(value, depth + 1)
                }
            }
        }
    }
}

/// Average path length of an unsuccessful search in a binary search tree
/// of `n` nodes; normalizes isolation depth.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in `[0, 1]`.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

impl IsolationForest {
    /// Anomaly score per sample in `(0, 1]`; higher means easier to isolate.
    pub fn scores(&self, samples: &[f64]) -> Vec<f64> {
        let n = samples.len();
        if n < 2 {
            return vec![0.5; n];
        }
        let subsample = self.max_samples.clamp(2, n);
        let height_limit = (subsample as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let trees: Vec<Node> = (0..self.n_trees.max(1))
            .map(|_| {
                let picked: Vec<f64> = rand::seq::index::sample(&mut rng, n, subsample)
                    .into_iter()
                    .map(|i| samples[i])
                    .collect();
                Node::build(&picked, 0, height_limit, &mut rng)
            })
            .collect();

        let norm = average_path_length(subsample);
        samples
            .iter()
            .map(|&x| {
                let mean_depth =
                    trees.iter().map(|t| t.path_length(x, 0)).sum::<f64>() / trees.len() as f64;
                2f64.powf(-mean_depth / norm)
            })
            .collect()
    }
}

impl OutlierScorer for IsolationForest {
    fn label(&self, samples: &[f64], contamination: f64) -> Vec<bool> {
        if samples.len() < 2 || contamination <= 0.0 {
            return vec![false; samples.len()];
        }
        let scores = self.scores(samples);
        let cutoff = percentile(&scores, 1.0 - contamination.min(0.5));
        scores.iter().map(|&s| s > cutoff).collect()
    }
}

/// Run `scorer` over the per-minute volume series and report every minute
/// labelled as an outlier.
pub fn detect_volume_outliers(
    buckets: &[(DateTime<Utc>, TimeBucket)],
    baseline: &Baseline,
    scorer: &dyn OutlierScorer,
    contamination: f64,
) -> Vec<AnomalyRecord> {
    let volumes = TimeSeries::new(buckets.iter().map(|(_, b)| b.total as f64).collect());
    let labels = scorer.label(volumes.values(), contamination);
    let expected_range = baseline.expected_volume_range();

    buckets
        .iter()
        .zip(labels)
        .filter(|(_, outlier)| *outlier)
        .map(|((ts, bucket), _)| {
            tracing::info!(bucket = %ts, total = bucket.total, "Unusual log volume");
            let mut details = json!({
                "log_count": bucket.total,
                "expected_range": expected_range,
            });
            let z = volumes.z_score(bucket.total as f64);
            if z.is_finite() {
                details["z_score"] = json!(z);
            }
            AnomalyRecord {
                kind: AnomalyKind::VolumeOutlier,
                severity: Severity::Medium,
                timestamp: Some(*ts),
                service: None,
                description: format!(
                    "Unusual log volume detected: {} logs in this time window",
                    bucket.total
                ),
                details,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 1.0), 5.0);
        assert!((percentile(&v, 0.9) - 4.6).abs() < 1e-12);
    }

    #[test]
    fn test_isolated_point_scores_highest() {
        let mut samples = vec![50.0; 11];
        samples.push(500.0);
        let scores = IsolationForest::default().scores(&samples);
        let max_idx = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(max_idx, 11);
    }

    #[test]
    fn test_label_single_spike() {
        let mut samples = vec![50.0; 11];
        samples.insert(4, 500.0);
        let labels = IsolationForest::default().label(&samples, 0.1);
        let flagged: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![4]);
    }

    #[test]
    fn test_constant_series_has_no_outliers() {
        let labels = IsolationForest::default().label(&[20.0; 15], 0.1);
        assert!(labels.iter().all(|l| !l));
    }

    #[test]
    fn test_labels_are_deterministic() {
        let samples: Vec<f64> = (0..40).map(|i| ((i * 37) % 23) as f64 + 10.0).collect();
        let forest = IsolationForest::default();
        assert_eq!(forest.label(&samples, 0.1), forest.label(&samples, 0.1));
        assert_eq!(forest.scores(&samples), forest.scores(&samples));
    }

    #[test]
    fn test_label_fraction_is_bounded() {
        let samples: Vec<f64> = (0..100).map(|i| (i as f64).sqrt() * 7.0).collect();
        let labels = IsolationForest::default().label(&samples, 0.1);
        let flagged = labels.iter().filter(|l| **l).count();
        assert!(flagged >= 1 && flagged <= 10, "flagged {}", flagged);
    }

    #[test]
    fn test_tiny_inputs() {
        let forest = IsolationForest::default();
        assert!(forest.label(&[], 0.1).is_empty());
        assert_eq!(forest.label(&[3.0], 0.1), vec![false]);
    }
}
