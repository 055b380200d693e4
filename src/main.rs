use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use logpulse::config::LogpulseConfig;
use logpulse::detect::normalize::RawLogRecord;
use logpulse::detect::{self, DetectionReport};

#[derive(Parser)]
#[command(
    name = "logpulse",
    about = "Unsupervised log anomaly detection and incident tracking",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (defaults to $LOGPULSE_CONFIG, then ./logpulse.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + background scans)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run detection over a JSON file of log records without touching the database
    Detect {
        /// Input file, or "-" for stdin. A JSON array or an object with a "logs" array.
        #[arg(long)]
        input: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run one scan over recent stored logs and open incidents
    Scan,

    /// Inspect incidents
    Incidents {
        #[command(subcommand)]
        action: IncidentAction,
    },

    /// Generate (or show the cached) AI summary for an incident
    Summarize {
        /// Incident id
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum IncidentAction {
    /// List the most recent incidents
    List {
        /// Maximum number of incidents to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn read_batch(input: &str) -> Result<Vec<Value>> {
    let content = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input))?
    };

    let value: Value = serde_json::from_str(&content).context("input is not valid JSON")?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove("logs") {
            Some(Value::Array(items)) => Ok(items),
            _ => anyhow::bail!("expected a JSON array or an object with a \"logs\" array"),
        },
        _ => anyhow::bail!("expected a JSON array or an object with a \"logs\" array"),
    }
}

fn print_report(report: &DetectionReport) {
    println!("\n=== logpulse Detection Report ===");
    println!(
        "Records:  {} seen, {} dropped",
        report.records_seen, report.records_dropped
    );
    println!(
        "Buckets:  {} minutes, {} services",
        report.time_buckets, report.services
    );
    if report.anomalies.is_empty() {
        println!("\nNo anomalies detected.");
    } else {
        println!();
        println!("{:<20} | {:<8} | Description", "Type", "Severity");
        println!("{:-<20}-|-{:-<8}-|-{:-<40}", "", "", "");
        for anomaly in &report.anomalies {
            println!(
                "{:<20} | {:<8} | {}",
                anomaly.kind.as_str(),
                anomaly.severity.as_str().to_uppercase(),
                anomaly.description
            );
        }
    }
    println!("=================================\n");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config =
        LogpulseConfig::load_with(cli.config.as_deref(), |key| std::env::var(key).ok())?;
    logpulse::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting logpulse daemon");
            logpulse::serve(config).await?;
        }
        Commands::Detect { input, json } => {
            let (batch, skipped) = RawLogRecord::from_values(read_batch(&input)?);
            let mut report = detect::detect_with_report(&batch);
            report.records_seen += skipped;
            report.records_dropped += skipped;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Scan => {
            let engine = logpulse::build_engine(&config)?;
            let outcome = engine.run_scan().await?;
            if let Some(message) = &outcome.message {
                println!("{}", message);
            } else {
                println!(
                    "Detected {} anomalies, opened {} incidents:",
                    outcome.anomalies_detected,
                    outcome.incidents_created.len()
                );
                for (id, anomaly) in outcome.incidents_created.iter().zip(&outcome.anomalies) {
                    println!("  {} [{}] {}", id, anomaly.severity, anomaly.description);
                }
            }
        }
        Commands::Incidents { action } => match action {
            IncidentAction::List { limit } => {
                let engine = logpulse::build_engine(&config)?;
                let incidents = engine.incidents().list_recent(limit)?;
                if incidents.is_empty() {
                    println!("No incidents found.");
                } else {
                    println!(
                        "{:<36} | {:<20} | {:<8} | {:<6} | Description",
                        "ID", "Created", "Severity", "Status"
                    );
                    println!("{:-<36}-|-{:-<20}-|-{:-<8}-|-{:-<6}-|-{:-<30}", "", "", "", "", "");
                    for inc in incidents {
                        println!(
                            "{:<36} | {:<20} | {:<8} | {:<6} | {}",
                            inc.id,
                            inc.created_at.format("%Y-%m-%d %H:%M:%S"),
                            inc.severity,
                            inc.status,
                            inc.description
                        );
                    }
                }
            }
        },
        Commands::Summarize { id } => {
            let engine = logpulse::build_engine(&config)?;
            let summarizer = logpulse::summarize::OpenAiSummarizer::new(&config.summarizer)?;
            let incident = logpulse::summarize::summarize_incident(
                engine.incidents(),
                engine.pool(),
                &summarizer,
                &config.summarizer,
                id,
            )
            .await?
            .with_context(|| format!("incident '{}' not found", id))?;

            println!("Incident:    {}", incident.id);
            println!("Severity:    {}", incident.severity);
            println!("Description: {}", incident.description);
            println!("Summary:     {}", incident.summary.unwrap_or_default());
            println!("Root cause:  {}", incident.root_cause.unwrap_or_default());
        }
    }

    Ok(())
}
