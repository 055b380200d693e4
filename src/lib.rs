//! logpulse -- unsupervised anomaly detection over application logs.
//!
//! This crate provides the detection core (normalization, bucketing,
//! baseline rules and an isolation forest on log volume) together with
//! storage, incident tracking, alerting, LLM summaries and the HTTP API
//! that ties them into a daemon.

pub mod api;
pub mod config;
pub mod detect;
pub mod notify;
pub mod storage;
pub mod summarize;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, LogpulseConfig};
use crate::detect::engine::{self, AnomalyEngine};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // An already-installed subscriber is left in place.
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Build the scan engine for a config: storage pool, webhook notifier and
/// detection settings.
pub fn build_engine(config: &LogpulseConfig) -> Result<Arc<AnomalyEngine>> {
    tracing::info!(db_path = %config.storage.db_path, "Initializing database");
    let pool = storage::open_pool(&config.storage.db_path)?;
    let notifier = notify::WebhookNotifier::new(&config.alerts)?;
    if config.alerts.webhook_url.is_none() {
        tracing::info!("No alert webhook configured, alerts disabled");
    }
    Ok(Arc::new(AnomalyEngine::new(
        pool,
        Arc::new(notifier),
        config.detection.clone(),
    )))
}

/// Start the logpulse daemon: API server and background scan loop.
pub async fn serve(config: LogpulseConfig) -> Result<()> {
    let engine = build_engine(&config)?;

    let scan_engine = engine.clone();
    let interval = config.detection.scan_interval_secs;
    tokio::spawn(async move {
        engine::run_scan_loop(scan_engine, interval).await;
    });

    let summarizer = summarize::OpenAiSummarizer::new(&config.summarizer)?;
    if config.summarizer.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set, incident summaries will be unavailable");
    }

    let state = api::state::AppState {
        pool: engine.pool().clone(),
        engine,
        summarizer: Arc::new(summarizer),
        summarizer_config: config.summarizer.clone(),
    };

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let app = api::router(state);

    tracing::info!(%addr, "logpulse listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
