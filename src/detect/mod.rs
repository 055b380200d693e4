//! Anomaly detection over log batches, and incident recording.
//!
//! The detection core is a pure function of its input batch: records are
//! normalized, bucketed by minute and by service, compared against a
//! baseline computed from the same batch, and finally passed through an
//! isolation forest on the per-minute volume series.

pub mod anomaly;
pub mod bucket;
pub mod engine;
pub mod incident;
pub mod normalize;
pub mod outlier;
pub mod rules;

use self::anomaly::Baseline;
use self::bucket::Buckets;
use self::normalize::RawLogRecord;
use self::outlier::{IsolationForest, OutlierScorer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fraction of volume samples expected to be outliers.
pub const CONTAMINATION: f64 = 0.10;

/// Minimum number of minute buckets before the volume scorer runs.
pub const MIN_OUTLIER_BUCKETS: usize = 10;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("insufficient baseline data: need {needed} samples, have {have}")]
    InsufficientBaseline { needed: usize, have: usize },
}

/// Severity levels for detected anomalies and the incidents built from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => anyhow::bail!("unknown severity '{}'", other),
        }
    }
}

/// Which detector produced an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    #[serde(rename = "error_rate_spike")]
    SpikeErrorRate,
    #[serde(rename = "service_error_rate")]
    ServiceErrorRate,
    #[serde(rename = "log_volume_anomaly")]
    VolumeOutlier,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::SpikeErrorRate => "error_rate_spike",
            AnomalyKind::ServiceErrorRate => "service_error_rate",
            AnomalyKind::VolumeOutlier => "log_volume_anomaly",
        }
    }
}

/// A single detected anomaly. Pure output; built once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub description: String,
    pub details: serde_json::Value,
}

/// Anomalies plus counters describing what the batch looked like.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    pub anomalies: Vec<AnomalyRecord>,
    pub records_seen: usize,
    pub records_dropped: usize,
    pub time_buckets: usize,
    pub services: usize,
}

/// Run every detector over `batch` and return the anomalies found.
///
/// Order: error-rate spikes, then per-service error rates, then volume
/// outliers. The same minute may show up under more than one kind.
pub fn detect(batch: &[RawLogRecord]) -> Vec<AnomalyRecord> {
    detect_with_report(batch).anomalies
}

/// Same as [`detect`], but also reports how many records were dropped as
/// unparsable and how many buckets were built.
pub fn detect_with_report(batch: &[RawLogRecord]) -> DetectionReport {
    detect_with_scorer(batch, &IsolationForest::default())
}

/// Run detection with a caller-supplied volume outlier scorer.
pub fn detect_with_scorer(batch: &[RawLogRecord], scorer: &dyn OutlierScorer) -> DetectionReport {
    let records: Vec<_> = batch.iter().filter_map(normalize::normalize).collect();
    let dropped = batch.len() - records.len();
    if dropped > 0 {
        tracing::debug!(dropped, total = batch.len(), "Dropped unparsable log records");
    }

    let buckets = Buckets::aggregate(&records);
    let mut report = DetectionReport {
        anomalies: Vec::new(),
        records_seen: batch.len(),
        records_dropped: dropped,
        time_buckets: buckets.time_len(),
        services: buckets.service_len(),
    };

    let ordered = buckets.ordered_time_buckets();
    let baseline = match Baseline::from_buckets(&ordered) {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!("Skipping detection: {}", e);
            return report;
        }
    };

    let spikes = rules::detect_error_spikes(&ordered, &baseline);
    let services = rules::detect_service_error_rates(buckets.services());
    let volume = if ordered.len() >= MIN_OUTLIER_BUCKETS {
        outlier::detect_volume_outliers(&ordered, &baseline, scorer, CONTAMINATION)
    } else {
        Vec::new()
    };

    tracing::debug!(
        spikes = spikes.len(),
        services = services.len(),
        volume = volume.len(),
        buckets = ordered.len(),
        "Detection finished"
    );

    report.anomalies.extend(spikes);
    report.anomalies.extend(services);
    report.anomalies.extend(volume);
    report
}
