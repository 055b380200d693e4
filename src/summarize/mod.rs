//! Natural-language incident summaries from an OpenAI-compatible model.
//!
//! Summaries are best effort. A missing API key or a failed request never
//! surfaces as an error; the caller gets a sentinel pair explaining why no
//! analysis is available.

use crate::config::SummarizerConfig;
use crate::detect::incident::{Incident, IncidentManager};
use crate::detect::normalize::{SeverityClass, UNKNOWN_SERVICE};
use crate::storage::{self, Pool, StoredLog};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Most log lines handed to the model.
pub const MAX_CONTEXT_LOGS: usize = 20;

const SYSTEM_PROMPT: &str =
    "You are a helpful DevOps engineer analyzing system incidents. Always respond with valid JSON.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSummary {
    pub summary: String,
    pub root_cause: String,
}

impl IncidentSummary {
    pub fn unconfigured() -> Self {
        Self {
            summary: "LLM analysis unavailable: API key not configured".to_string(),
            root_cause: "Please configure OPENAI_API_KEY environment variable".to_string(),
        }
    }

    pub fn failed(err: &anyhow::Error) -> Self {
        Self {
            summary: format!("Error during LLM analysis: {:#}", err),
            root_cause: "Please check API key and network connectivity".to_string(),
        }
    }
}

/// Produces a summary and likely root cause for an incident.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, description: &str, recent_logs: &[StoredLog]) -> IncidentSummary;
}

/// Prefer error-level logs; fall back to the most recent ones. At most
/// [`MAX_CONTEXT_LOGS`] either way.
pub fn select_context(logs: &[StoredLog]) -> Vec<&StoredLog> {
    let errors: Vec<&StoredLog> = logs
        .iter()
        .filter(|l| SeverityClass::from_level(&l.level) == SeverityClass::Error)
        .take(MAX_CONTEXT_LOGS)
        .collect();
    if !errors.is_empty() {
        return errors;
    }
    logs.iter().take(MAX_CONTEXT_LOGS).collect()
}

pub fn format_log_line(log: &StoredLog) -> String {
    let service = if log.service.is_empty() {
        UNKNOWN_SERVICE
    } else {
        log.service.as_str()
    };
    let level = if log.level.is_empty() {
        "info"
    } else {
        log.level.as_str()
    };
    format!(
        "[{}] {} [{}]: {}",
        log.timestamp.to_rfc3339(),
        service,
        level,
        log.message
    )
}

pub fn build_prompt(description: &str, logs: &[StoredLog]) -> String {
    let context = select_context(logs)
        .into_iter()
        .map(format_log_line)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a DevOps engineer analyzing an incident. Based on the incident description and recent logs, provide:

1. A concise summary of what happened (2-3 sentences)
2. The most likely root cause (1-2 sentences)

Incident Description:
{}

Recent Logs:
{}

Respond in JSON format with \"summary\" and \"root_cause\" fields.
",
        description, context
    )
}

/// Strip a surrounding Markdown code fence, if any.
pub fn strip_code_fence(content: &str) -> &str {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

#[derive(Debug, Deserialize)]
struct ModelAnswer {
    summary: Option<String>,
    root_cause: Option<String>,
}

pub fn parse_answer(content: &str) -> Result<IncidentSummary> {
    let answer: ModelAnswer = serde_json::from_str(strip_code_fence(content))
        .context("Model response was not valid JSON")?;
    Ok(IncidentSummary {
        summary: answer
            .summary
            .unwrap_or_else(|| "Unable to generate summary".to_string()),
        root_cause: answer
            .root_cause
            .unwrap_or_else(|| "Unable to determine root cause".to_string()),
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Chat-completions client for OpenAI or any API-compatible endpoint.
pub struct OpenAiSummarizer {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl OpenAiSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
        })
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn request(&self, api_key: &str, prompt: String) -> Result<IncidentSummary> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.3,
            max_tokens: 500,
        };

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API returned {}: {}", status, body);
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat response")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("No choices in chat response")?;

        parse_answer(&content)
    }
}

#[async_trait::async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, description: &str, recent_logs: &[StoredLog]) -> IncidentSummary {
        let Some(api_key) = self.api_key.as_deref() else {
            return IncidentSummary::unconfigured();
        };

        let prompt = build_prompt(description, recent_logs);
        match self.request(api_key, prompt).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "LLM summarization failed");
                IncidentSummary::failed(&e)
            }
        }
    }
}

/// Return the incident with its summary filled in, asking the model only
/// when no summary has been stored yet. `None` when the incident is unknown.
pub async fn summarize_incident(
    incidents: &IncidentManager,
    pool: &Pool,
    summarizer: &dyn Summarizer,
    config: &SummarizerConfig,
    id: Uuid,
) -> Result<Option<Incident>> {
    let manager = incidents.clone();
    let Some(mut incident) = tokio::task::spawn_blocking(move || manager.get(id)).await?? else {
        return Ok(None);
    };
    if incident.summary.is_some() && incident.root_cause.is_some() {
        return Ok(Some(incident));
    }

    let pool = pool.clone();
    let since = chrono::Utc::now() - chrono::Duration::minutes(config.context_window_minutes);
    let limit = config.context_limit;
    let logs = tokio::task::spawn_blocking(move || storage::recent_logs(&pool, since, limit)).await??;

    let result = summarizer.summarize(&incident.description, &logs).await;

    let manager = incidents.clone();
    let stored = result.clone();
    tokio::task::spawn_blocking(move || {
        manager.update_summary(id, &stored.summary, &stored.root_cause)
    })
    .await??;

    incident.summary = Some(result.summary);
    incident.root_cause = Some(result.root_cause);
    Ok(Some(incident))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn log(i: i64, level: &str) -> StoredLog {
        StoredLog {
            id: i,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            service: "api".into(),
            level: level.into(),
            message: format!("message {}", i),
            metadata: json!({}),
        }
    }

    #[test]
    fn test_context_prefers_errors() {
        let mut logs: Vec<StoredLog> = (0..30).map(|i| log(i, "info")).collect();
        logs.push(log(100, "ERROR"));
        logs.push(log(101, "fatal"));
        let picked = select_context(&logs);
        let ids: Vec<i64> = picked.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![100, 101]);
    }

    #[test]
    fn test_context_falls_back_and_caps() {
        let logs: Vec<StoredLog> = (0..30).map(|i| log(i, "info")).collect();
        let picked = select_context(&logs);
        assert_eq!(picked.len(), MAX_CONTEXT_LOGS);
        assert_eq!(picked[0].id, 0);

        let errors: Vec<StoredLog> = (0..30).map(|i| log(i, "error")).collect();
        assert_eq!(select_context(&errors).len(), MAX_CONTEXT_LOGS);
    }

    #[test]
    fn test_log_line_format() {
        let mut l = log(1, "");
        l.service = String::new();
        assert_eq!(
            format_log_line(&l),
            "[2024-05-01T10:00:00+00:00] unknown [info]: message 1"
        );
    }

    #[test]
    fn test_prompt_embeds_description_and_logs() {
        let prompt = build_prompt("checkout failing", &[log(7, "error")]);
        assert!(prompt.contains("Incident Description:\ncheckout failing"));
        assert!(prompt.contains("api [error]: message 7"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {}  "), "{}");
    }

    #[test]
    fn test_parse_answer_defaults() {
        let parsed = parse_answer("```json\n{\"summary\": \"db down\"}\n```").unwrap();
        assert_eq!(parsed.summary, "db down");
        assert_eq!(parsed.root_cause, "Unable to determine root cause");
        assert!(parse_answer("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_key_returns_sentinel() {
        let summarizer = OpenAiSummarizer::new(&SummarizerConfig::default()).unwrap();
        let result = summarizer.summarize("anything", &[]).await;
        assert_eq!(result, IncidentSummary::unconfigured());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_degrades() {
        let config = SummarizerConfig {
            api_key: Some("sk-test".into()),
            base_url: "http://127.0.0.1:9/v1".into(),
            timeout_secs: 1,
            ..SummarizerConfig::default()
        };
        let summarizer = OpenAiSummarizer::new(&config).unwrap();
        let result = summarizer.summarize("anything", &[log(1, "error")]).await;
        assert!(result.summary.starts_with("Error during LLM analysis"));
        assert_eq!(result.root_cause, "Please check API key and network connectivity");
    }

    struct FixedSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, description: &str, recent_logs: &[StoredLog]) -> IncidentSummary {
            IncidentSummary {
                summary: format!("{} ({} logs)", description, recent_logs.len()),
                root_cause: "bad deploy".into(),
            }
        }
    }

    #[tokio::test]
    async fn test_summarize_incident_caches_result() -> Result<()> {
        use crate::detect::{AnomalyKind, AnomalyRecord, Severity};

        let dir = tempfile::tempdir()?;
        let pool = storage::open_pool(dir.path().join("sum.db").to_str().unwrap())?;
        let incidents = IncidentManager::new(pool.clone());
        let created = incidents.record_batch(&[AnomalyRecord {
            kind: AnomalyKind::ServiceErrorRate,
            severity: Severity::Medium,
            timestamp: None,
            service: Some("checkout".into()),
            description: "checkout failing".into(),
            details: json!({}),
        }])?;
        let id = created[0].id;
        let config = SummarizerConfig::default();

        let first = summarize_incident(&incidents, &pool, &FixedSummarizer, &config, id)
            .await?
            .unwrap();
        assert_eq!(first.summary.as_deref(), Some("checkout failing (0 logs)"));
        assert_eq!(first.root_cause.as_deref(), Some("bad deploy"));

        // A second call must come from the database, not the summarizer.
        let unconfigured = OpenAiSummarizer::new(&config)?;
        let second = summarize_incident(&incidents, &pool, &unconfigured, &config, id)
            .await?
            .unwrap();
        assert_eq!(second.summary, first.summary);

        let missing =
            summarize_incident(&incidents, &pool, &FixedSummarizer, &config, Uuid::new_v4()).await?;
        assert!(missing.is_none());
        Ok(())
    }
}
