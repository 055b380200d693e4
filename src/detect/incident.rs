use crate::detect::{AnomalyRecord, Severity};
use crate::storage::{format_ts, parse_ts, Pool};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

/// An incident opened for a detected anomaly.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub severity: Severity,
    pub description: String,
    pub summary: Option<String>,
    pub root_cause: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

const INCIDENT_COLUMNS: &str =
    "id, created_at, status, severity, description, summary, root_cause, resolved_at";

fn incident_from_row(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let id_str: String = row.get(0)?;
    let created_at: String = row.get(1)?;
    let sev_str: String = row.get(3)?;
    let resolved_at: Option<String> = row.get(7)?;

    Ok(Incident {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        created_at: parse_ts(&created_at),
        status: row.get(2)?,
        severity: sev_str.parse().unwrap_or(Severity::Medium),
        description: row.get(4)?,
        summary: row.get(5)?,
        root_cause: row.get(6)?,
        resolved_at: resolved_at.as_deref().map(parse_ts),
    })
}

#[derive(Clone)]
pub struct IncidentManager {
    pool: Pool,
}

impl IncidentManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open one incident per anomaly inside a single transaction. Any failure
    /// rolls back the whole batch.
    pub fn record_batch(&self, anomalies: &[AnomalyRecord]) -> Result<Vec<Incident>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(anomalies.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO incidents (id, created_at, status, severity, description, anomaly_type)
                 VALUES (?1, ?2, 'open', ?3, ?4, ?5)",
            )?;
            for anomaly in anomalies {
                let incident = Incident {
                    id: Uuid::new_v4(),
                    created_at: Utc::now(),
                    status: "open".to_string(),
                    severity: anomaly.severity,
                    description: anomaly.description.clone(),
                    summary: None,
                    root_cause: None,
                    resolved_at: None,
                };
                stmt.execute(params![
                    incident.id.to_string(),
                    format_ts(&incident.created_at),
                    incident.severity.as_str(),
                    incident.description,
                    anomaly.kind.as_str()
                ])
                .context("Failed to insert incident")?;
                created.push(incident);
            }
        }
        tx.commit().context("Failed to commit incident batch")?;
        Ok(created)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<Incident>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM incidents ORDER BY created_at DESC LIMIT ?1",
            INCIDENT_COLUMNS
        ))?;

        let rows = stmt.query_map([limit as i64], incident_from_row)?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        let conn = self.pool.get()?;
        let incident = conn
            .query_row(
                &format!("SELECT {} FROM incidents WHERE id = ?1", INCIDENT_COLUMNS),
                [id.to_string()],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    pub fn update_summary(&self, id: Uuid, summary: &str, root_cause: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE incidents SET summary = ?2, root_cause = ?3 WHERE id = ?1",
            params![id.to_string(), summary, root_cause],
        )?;
        if changed == 0 {
            anyhow::bail!("Incident '{}' not found", id);
        }
        Ok(())
    }
}
