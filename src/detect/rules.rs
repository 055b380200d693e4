//! Rule-based detectors: minute-level error-rate spikes and per-service
//! error rates.

use super::anomaly::Baseline;
use super::bucket::{ServiceBucket, TimeBucket};
use super::{AnomalyKind, AnomalyRecord, Severity};
use chrono::{DateTime, Utc};
use serde_json::json;

/// Spike error rate above which the anomaly is reported as high severity.
pub const HIGH_SEVERITY_ERROR_RATE: f64 = 0.5;

/// Services with fewer logs than this are never judged.
pub const MIN_SERVICE_LOGS: u64 = 5;

/// Per-service error rate that triggers an anomaly.
pub const SERVICE_ERROR_RATE_THRESHOLD: f64 = 0.3;

/// Flag minutes whose error rate AND volume are both more than two standard
/// deviations above the batch mean. Requiring both keeps quiet minutes with a
/// handful of errors from being reported.
pub fn detect_error_spikes(
    buckets: &[(DateTime<Utc>, TimeBucket)],
    baseline: &Baseline,
) -> Vec<AnomalyRecord> {
    let error_threshold = baseline.error_threshold();
    let volume_threshold = baseline.volume_threshold();

    let mut anomalies = Vec::new();
    for ((ts, bucket), &rate) in buckets.iter().zip(&baseline.error_rates) {
        if rate <= error_threshold || bucket.total as f64 <= volume_threshold {
            continue;
        }
        let severity = if rate > HIGH_SEVERITY_ERROR_RATE {
            Severity::High
        } else {
            Severity::Medium
        };
        tracing::info!(
            bucket = %ts,
            errors = bucket.error_count,
            total = bucket.total,
            %severity,
            "Error rate spike"
        );
        anomalies.push(AnomalyRecord {
            kind: AnomalyKind::SpikeErrorRate,
            severity,
            timestamp: Some(*ts),
            service: None,
            description: format!(
                "Error rate spike detected: {}/{} logs are errors ({:.1}%)",
                bucket.error_count,
                bucket.total,
                rate * 100.0
            ),
            details: json!({
                "error_rate": rate,
                "total_logs": bucket.total,
                "error_count": bucket.error_count,
            }),
        });
    }
    anomalies
}

/// Flag services with at least [`MIN_SERVICE_LOGS`] logs whose error rate
/// exceeds [`SERVICE_ERROR_RATE_THRESHOLD`]. Emitted in the given order.
pub fn detect_service_error_rates(services: &[(String, ServiceBucket)]) -> Vec<AnomalyRecord> {
    let mut anomalies = Vec::new();
    for (name, stats) in services {
        if stats.total < MIN_SERVICE_LOGS {
            continue;
        }
        let rate = stats.error_count as f64 / stats.total as f64;
        if rate <= SERVICE_ERROR_RATE_THRESHOLD {
            continue;
        }
        tracing::info!(service = %name, rate, "High service error rate");
        anomalies.push(AnomalyRecord {
            kind: AnomalyKind::ServiceErrorRate,
            severity: Severity::Medium,
            timestamp: None,
            service: Some(name.clone()),
            description: format!(
                "High error rate in {}: {}/{} logs are errors ({:.1}%)",
                name,
                stats.error_count,
                stats.total,
                rate * 100.0
            ),
            details: json!({
                "service": name,
                "error_rate": rate,
                "total_logs": stats.total,
                "error_count": stats.error_count,
            }),
        });
    }
    anomalies
}
