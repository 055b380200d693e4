use crate::detect::bucket::TimeBucket;
use crate::detect::DetectError;
use chrono::{DateTime, Utc};

/// Fewest minute buckets a baseline may be built from.
pub const MIN_BASELINE_BUCKETS: usize = 3;

/// A simple time series for statistical analysis.
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance. Zero for fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self
            .values
            .iter()
            .map(|&x| (x - mean).powi(2))
            .sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Z = (value - mean) / std_dev. Infinite when the series is constant
    /// and `value` differs from it.
    pub fn z_score(&self, value: f64) -> f64 {
        let std = self.std_dev();
        if std == 0.0 {
            if (value - self.mean()).abs() > f64::EPSILON {
                return f64::INFINITY;
            }
            return 0.0;
        }
        (value - self.mean()) / std
    }
}

/// Mean and spread of error rate and volume across one batch's minute buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    /// Per-bucket error rate, aligned with the ordered bucket sequence.
    pub error_rates: Vec<f64>,
    pub mean_error_rate: f64,
    pub std_error_rate: f64,
    pub mean_volume: f64,
    pub std_volume: f64,
}

impl Baseline {
    pub fn from_buckets(buckets: &[(DateTime<Utc>, TimeBucket)]) -> Result<Self, DetectError> {
        if buckets.len() < MIN_BASELINE_BUCKETS {
            return Err(DetectError::InsufficientBaseline {
                needed: MIN_BASELINE_BUCKETS,
                have: buckets.len(),
            });
        }

        let rates = TimeSeries::new(buckets.iter().map(|(_, b)| b.error_rate()).collect());
        let volume = TimeSeries::new(buckets.iter().map(|(_, b)| b.total as f64).collect());

        Ok(Self {
            mean_error_rate: rates.mean(),
            std_error_rate: rates.std_dev(),
            mean_volume: volume.mean(),
            std_volume: volume.std_dev(),
            error_rates: rates.values,
        })
    }

    /// Error rate a bucket must exceed to count as a spike.
    pub fn error_threshold(&self) -> f64 {
        self.mean_error_rate + 2.0 * self.std_error_rate
    }

    /// Volume a bucket must exceed to count as a spike.
    pub fn volume_threshold(&self) -> f64 {
        self.mean_volume + 2.0 * self.std_volume
    }

    /// One standard deviation either side of the mean volume, rounded.
    pub fn expected_volume_range(&self) -> String {
        format!(
            "{:.0} - {:.0}",
            self.mean_volume - self.std_volume,
            self.mean_volume + self.std_volume
        )
    }
}
