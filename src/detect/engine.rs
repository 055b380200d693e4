use crate::config::DetectionConfig;
use crate::detect::incident::IncidentManager;
use crate::detect::normalize::RawLogRecord;
use crate::detect::{self, AnomalyRecord};
use crate::notify::Notifier;
use crate::storage::{self, Pool};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of one scan over recent logs.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub anomalies_detected: usize,
    pub incidents_created: Vec<Uuid>,
    pub anomalies: Vec<AnomalyRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ScanOutcome {
    fn empty(message: &str) -> Self {
        Self {
            anomalies_detected: 0,
            incidents_created: Vec::new(),
            anomalies: Vec::new(),
            message: Some(message.to_string()),
        }
    }
}

/// Pulls recent logs from storage, runs detection, opens incidents and
/// sends alerts.
pub struct AnomalyEngine {
    pool: Pool,
    incident_manager: IncidentManager,
    notifier: Arc<dyn Notifier>,
    config: DetectionConfig,
}

impl AnomalyEngine {
    pub fn new(pool: Pool, notifier: Arc<dyn Notifier>, config: DetectionConfig) -> Self {
        let incident_manager = IncidentManager::new(pool.clone());
        Self {
            pool,
            incident_manager,
            notifier,
            config,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn incidents(&self) -> &IncidentManager {
        &self.incident_manager
    }

    /// Run a scan for anomalies over the configured window.
    pub async fn run_scan(&self) -> Result<ScanOutcome> {
        info!(window_minutes = self.config.window_minutes, "Running anomaly detection scan");

        let pool = self.pool.clone();
        let since = chrono::Utc::now() - chrono::Duration::minutes(self.config.window_minutes);
        let limit = self.config.batch_limit;
        let logs = tokio::task::spawn_blocking(move || storage::recent_logs(&pool, since, limit))
            .await??;

        if logs.len() < self.config.min_logs {
            info!(logs = logs.len(), min = self.config.min_logs, "Not enough logs to scan");
            return Ok(ScanOutcome::empty("Not enough logs for anomaly detection"));
        }

        let batch: Vec<RawLogRecord> = logs.iter().map(RawLogRecord::from).collect();
        let anomalies = detect::detect(&batch);
        if anomalies.is_empty() {
            info!(logs = logs.len(), "No anomalies detected");
            return Ok(ScanOutcome::empty("No anomalies detected"));
        }

        // Persisting is all-or-nothing; an error here aborts the scan.
        let manager = self.incident_manager.clone();
        let to_record = anomalies.clone();
        let incidents =
            tokio::task::spawn_blocking(move || manager.record_batch(&to_record)).await??;

        for incident in &incidents {
            warn!(
                incident = %incident.id,
                severity = %incident.severity,
                "{}",
                incident.description
            );
            if let Err(e) = self.notifier.notify(incident).await {
                warn!(incident = %incident.id, "Failed to send alert: {:#}", e);
            }
        }

        Ok(ScanOutcome {
            anomalies_detected: anomalies.len(),
            incidents_created: incidents.iter().map(|i| i.id).collect(),
            anomalies,
            message: None,
        })
    }
}

/// Periodic scan loop. Returns immediately when the interval is zero.
pub async fn run_scan_loop(engine: Arc<AnomalyEngine>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }
    info!(interval_secs, "Scan loop started");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        match engine.run_scan().await {
            Ok(outcome) => {
                if outcome.anomalies_detected > 0 {
                    info!(
                        anomalies = outcome.anomalies_detected,
                        incidents = outcome.incidents_created.len(),
                        "Scan finished"
                    );
                }
            }
            Err(e) => error!("Scan failed: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::incident::Incident;
    use crate::storage::{insert_logs, open_pool, NewLog};
    use chrono::{Duration as ChronoDuration, Timelike, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, incident: &Incident) -> Result<()> {
            self.seen.lock().unwrap().push(incident.id);
            if self.fail {
                anyhow::bail!("webhook down");
            }
            Ok(())
        }
    }

    fn seed_service_errors(pool: &Pool) {
        // Three recent minutes, one service failing half the time.
        let now = Utc::now().with_second(0).unwrap();
        let mut logs = Vec::new();
        for minute in 1..=3 {
            for i in 0..6 {
                logs.push(NewLog {
                    timestamp: now - ChronoDuration::minutes(minute),
                    service: "checkout".into(),
                    level: if i % 2 == 0 { "error".into() } else { "info".into() },
                    message: "payment".into(),
                    metadata: serde_json::Value::Null,
                });
            }
        }
        insert_logs(pool, &logs).unwrap();
    }

    fn engine(pool: Pool, notifier: Arc<RecordingNotifier>) -> AnomalyEngine {
        AnomalyEngine::new(pool, notifier, DetectionConfig::default())
    }

    #[tokio::test]
    async fn test_scan_with_too_few_logs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = open_pool(dir.path().join("scan.db").to_str().unwrap())?;
        let engine = engine(pool, Arc::new(RecordingNotifier::default()));

        let outcome = engine.run_scan().await?;
        assert_eq!(outcome.anomalies_detected, 0);
        assert_eq!(
            outcome.message.as_deref(),
            Some("Not enough logs for anomaly detection")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_scan_opens_incidents_and_notifies() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = open_pool(dir.path().join("scan.db").to_str().unwrap())?;
        seed_service_errors(&pool);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(pool, notifier.clone());

        let outcome = engine.run_scan().await?;
        assert_eq!(outcome.anomalies_detected, 1);
        assert_eq!(outcome.incidents_created.len(), 1);
        assert_eq!(*notifier.seen.lock().unwrap(), outcome.incidents_created);
        assert_eq!(engine.incidents().list_recent(10)?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_incidents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pool = open_pool(dir.path().join("scan.db").to_str().unwrap())?;
        seed_service_errors(&pool);
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let engine = engine(pool, notifier.clone());

        let outcome = engine.run_scan().await?;
        assert_eq!(outcome.incidents_created.len(), 1);
        assert_eq!(notifier.seen.lock().unwrap().len(), 1);
        assert_eq!(engine.incidents().list_recent(10)?.len(), 1);
        Ok(())
    }
}
