use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use sentinel::config::SentinelConfig;
use sentinel::event::{Event, Message, Topic};
use sentinel::fleet::{AgentSample, FleetMonitor};
use sentinel::Sentinel;

#[derive(Parser)]
#[command(
    name = "sentinel",
    about = "Automated threat triage and incident response",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP daemon
    Serve {
        /// Bind address (overrides api.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Analyze newline-delimited JSON events from stdin
    Watch {
        /// Generate random telemetry instead of reading stdin
        #[arg(long)]
        demo: bool,

        /// Milliseconds between generated events
        #[arg(long, default_value = "5000")]
        interval_ms: u64,

        /// Stop after this many generated events
        #[arg(long)]
        count: Option<u64>,
    },

    /// Analyze a single JSON event file and print every published message
    Analyze {
        /// Event file
        path: PathBuf,
    },

    /// Print a health report for a JSON array of agent samples
    Health {
        /// Fleet snapshot file
        path: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SentinelConfig::resolve(cli.config.as_deref())?;
    sentinel::logging::init(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "Starting Sentinel daemon");
            sentinel::serve(config).await?;
        }
        Commands::Watch {
            demo,
            interval_ms,
            count,
        } => {
            let sentinel = Arc::new(Sentinel::new(config)?);
            print_alerts(&sentinel);
            sentinel.start();

            let feed = async {
                if demo {
                    demo_feed(&sentinel, Duration::from_millis(interval_ms), count).await
                } else {
                    stdin_feed(&sentinel).await
                }
            };
            tokio::select! {
                result = feed => result?,
                _ = tokio::signal::ctrl_c() => eprintln!("\nShutting down Sentinel..."),
            }

            sentinel.settle().await;
            sentinel.dispose().await;
        }
        Commands::Analyze { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read event file: {}", path.display()))?;
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse event file: {}", path.display()))?;

            let sentinel = Sentinel::new(config)?;
            for topic in [
                Topic::ThreatDetected,
                Topic::AnomalyDetected,
                Topic::IncidentCreated,
                Topic::ResponseCompleted,
            ] {
                sentinel.subscribe(topic, "cli-printer", move |message| {
                    let line = json!({ "topic": topic, "message": message });
                    println!("{}", serde_json::to_string(&line)?);
                    Ok(())
                });
            }
            sentinel.start();
            sentinel.submit(Event::from_json(value)).await;
            sentinel.settle().await;
            sentinel.dispose().await;
        }
        Commands::Health { path, json } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read fleet file: {}", path.display()))?;
            let samples: Vec<AgentSample> = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse fleet file: {}", path.display()))?;

            let mut fleet = FleetMonitor::from_samples(&samples);
            if json {
                println!("{}", serde_json::to_string_pretty(&fleet.check())?);
            } else {
                print!("{}", fleet.report());
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn print_alerts(sentinel: &Sentinel) {
    sentinel.subscribe(Topic::ThreatDetected, "cli-alerts", |message| {
        if let Message::ThreatDetected(threat) = message {
            println!(
                "THREAT ALERT: {} (severity {}/10) from {}",
                threat.rule, threat.severity, threat.source
            );
        }
        Ok(())
    });
    sentinel.subscribe(Topic::AnomalyDetected, "cli-alerts", |message| {
        if let Message::AnomalyDetected(anomaly) = message {
            println!(
                "ANOMALY DETECTED: {} ({}, observed {:.1} vs baseline {:.1})",
                anomaly.metric, anomaly.tier, anomaly.observed, anomaly.baseline
            );
        }
        Ok(())
    });
    sentinel.subscribe(Topic::IncidentCreated, "cli-alerts", |message| {
        if let Message::IncidentCreated(incident) = message {
            println!("INCIDENT CREATED: {} (status: {})", incident.id, incident.status);
        }
        Ok(())
    });
    sentinel.subscribe(Topic::ResponseCompleted, "cli-alerts", |message| {
        if let Message::ResponseCompleted(summary) = message {
            let actions: Vec<&str> = summary.actions.iter().map(|a| a.as_str()).collect();
            println!("RESPONSE COMPLETED: {} [{}]", summary.incident_id, actions.join(", "));
        }
        Ok(())
    });
}

async fn stdin_feed(sentinel: &Sentinel) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => sentinel.submit(Event::from_json(value)).await,
            Err(e) => tracing::warn!(error = %e, "skipping malformed event line"),
        }
    }
    Ok(())
}

async fn demo_feed(sentinel: &Sentinel, interval: Duration, count: Option<u64>) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut sent = 0u64;
    println!("Sentinel is running. Press Ctrl+C to stop.");
    loop {
        if count.is_some_and(|limit| sent >= limit) {
            return Ok(());
        }
        ticker.tick().await;
        sentinel.submit(demo_event()).await;
        sent += 1;
    }
}

fn demo_event() -> Event {
    let mut rng = rand::thread_rng();
    let mut payload = Map::new();
    payload.insert("cpu_usage".into(), json!(rng.gen_range(0.0..100.0)));
    payload.insert("memory_usage".into(), json!(rng.gen_range(0.0..100.0)));
    payload.insert("network_traffic".into(), json!(rng.gen_range(0.0..10_000.0)));
    Event::new(format!("system_{}", rng.gen_range(0..5)), payload)
}
