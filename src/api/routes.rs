//! API route definitions.

use super::error::ApiError;
use super::state::AppState;
use crate::detect::engine::ScanOutcome;
use crate::detect::incident::Incident;
use crate::detect::normalize::{RawLogRecord, RawTimestamp, UNKNOWN_SERVICE};
use crate::detect::{self, DetectionReport};
use crate::storage::{self, NewLog};
use crate::summarize;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_INCIDENT_LIMIT: usize = 100;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/logs", post(ingest_logs))
        .route("/incidents", get(list_incidents))
        .route("/summary/{incident_id}", get(incident_summary))
        .route("/detect", post(run_detection))
        .route("/analyze", post(analyze_batch))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let pool = state.pool.clone();
    let db_ok = matches!(
        tokio::task::spawn_blocking(move || storage::count_logs(&pool)).await,
        Ok(Ok(_))
    );

    Json(json!({
        "status": "ok",
        "checks": { "db": db_ok },
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct IngestLog {
    #[serde(default)]
    timestamp: Option<RawTimestamp>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    #[serde(default)]
    logs: Vec<IngestLog>,
}

fn to_new_log(index: usize, log: IngestLog) -> Result<NewLog, ApiError> {
    let timestamp = match log.timestamp {
        None => Utc::now(),
        Some(raw) => raw
            .resolve()
            .ok_or_else(|| ApiError::BadRequest(format!("invalid timestamp in log {}", index)))?,
    };
    Ok(NewLog {
        timestamp,
        service: log
            .service
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
        level: log.level.unwrap_or_default(),
        message: log.message.unwrap_or_default(),
        metadata: log.metadata.unwrap_or(Value::Null),
    })
}

async fn ingest_logs(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(request) = payload?;
    if request.logs.is_empty() {
        return Err(ApiError::BadRequest("no logs provided".into()));
    }

    let logs = request
        .logs
        .into_iter()
        .enumerate()
        .map(|(i, log)| to_new_log(i, log))
        .collect::<Result<Vec<_>, _>>()?;

    let pool = state.pool.clone();
    let count = tokio::task::spawn_blocking(move || storage::insert_logs(&pool, &logs)).await??;
    tracing::debug!(count, "Ingested logs");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "count": count })),
    ))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Incident>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_INCIDENT_LIMIT);
    let manager = state.engine.incidents().clone();
    let incidents = tokio::task::spawn_blocking(move || manager.list_recent(limit)).await??;
    Ok(Json(incidents))
}

async fn incident_summary(
    State(state): State<AppState>,
    Path(incident_id): Path<String>,
) -> Result<Json<Incident>, ApiError> {
    let id = Uuid::parse_str(&incident_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid incident id '{}'", incident_id)))?;

    let incident = summarize::summarize_incident(
        state.engine.incidents(),
        &state.pool,
        state.summarizer.as_ref(),
        &state.summarizer_config,
        id,
    )
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("incident '{}' not found", id)))?;

    Ok(Json(incident))
}

async fn run_detection(State(state): State<AppState>) -> Result<Json<ScanOutcome>, ApiError> {
    let outcome = state.engine.run_scan().await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    batch: Vec<Value>,
}

/// Run the detection core over a caller-supplied batch without touching
/// storage.
async fn analyze_batch(
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<DetectionReport>, ApiError> {
    let Json(request) = payload?;
    let (batch, skipped) = RawLogRecord::from_values(request.batch);
    let mut report = detect::detect_with_report(&batch);
    report.records_seen += skipped;
    report.records_dropped += skipped;
    Ok(Json(report))
}
