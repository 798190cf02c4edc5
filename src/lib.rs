//! Sentinel -- automated threat triage and incident response.
//!
//! Events enter through [`Sentinel::submit`], are recorded in the ledger, and
//! are analyzed concurrently by the signature engine and the anomaly
//! detector. Threat findings at or above the configured severity open an
//! incident whose response plan the orchestrator drives to completion.
//! Every step is observable through the [`event::Dispatcher`].

pub mod api;
pub mod config;
pub mod detect;
pub mod event;
pub mod fleet;
pub mod logging;
pub mod response;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::SentinelConfig;
use crate::detect::signature::default_signatures;
use crate::detect::{AnomalyDetector, ComponentStatus, SignatureEngine};
use crate::event::{Dispatcher, Event, EventLedger, LedgerEntry, Message, Topic};
use crate::response::{
    ActionExecutor, Incident, IncidentOrchestrator, LoggingExecutor, ResponsePolicy,
};

/// Snapshot of component states.
#[derive(Debug, Clone, Serialize)]
pub struct SentinelStatus {
    pub running: bool,
    pub signature_engine: ComponentStatus,
    pub anomaly_detector: ComponentStatus,
    pub orchestrator: ComponentStatus,
}

/// The analysis and response pipeline.
pub struct Sentinel {
    config: SentinelConfig,
    dispatcher: Arc<Dispatcher>,
    signatures: SignatureEngine,
    anomalies: AnomalyDetector,
    orchestrator: Arc<IncidentOrchestrator>,
    running: AtomicBool,
}

impl Sentinel {
    /// Build the pipeline with the default logging action executor.
    pub fn new(config: SentinelConfig) -> Result<Self> {
        let delay = Duration::from_millis(config.response.action_delay_ms);
        let executor = LoggingExecutor::with_delay(delay);
        Self::with_executor(config, Arc::new(executor))
    }

    /// Build the pipeline around a caller-supplied enforcement backend.
    ///
    /// Invalid signatures, baselines, or response policies are fatal.
    pub fn with_executor(
        config: SentinelConfig,
        executor: Arc<dyn ActionExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        info!("initializing sentinel");

        let dispatcher = Arc::new(Dispatcher::new(EventLedger::new(config.ledger.capacity)));

        // Configured signatures replace built-ins of the same name.
        let signatures = SignatureEngine::new(dispatcher.clone(), default_signatures())
            .context("failed to load built-in signatures")?;
        for signature in &config.detection.signatures {
            signatures
                .upsert_signature(signature.clone())
                .with_context(|| format!("invalid signature '{}'", signature.name))?;
        }

        let anomalies = AnomalyDetector::new(
            dispatcher.clone(),
            config.detection.baselines.clone(),
            config.detection.deviation_threshold,
        )
        .context("failed to seed anomaly baselines")?;

        let policy = ResponsePolicy::new(config.response.plan.clone())
            .context("invalid response plan")?;
        let orchestrator = Arc::new(
            IncidentOrchestrator::new(dispatcher.clone(), policy, executor)
                .with_max_concurrent(config.response.max_concurrent_incidents)
                .with_action_timeout(Duration::from_secs(config.response.action_timeout_secs)),
        );
        orchestrator.initialize();

        if config.response.auto_respond {
            let threshold = config.detection.threat_threshold;
            let weak = Arc::downgrade(&orchestrator);
            dispatcher.subscribe(Topic::ThreatDetected, "auto-response", move |message| {
                let Message::ThreatDetected(finding) = message else {
                    return Ok(());
                };
                if finding.severity < threshold {
                    return Ok(());
                }
                match weak.upgrade() {
                    Some(orchestrator) => orchestrator.spawn_response(finding.clone()),
                    None => Ok(()),
                }
            });
        }

        info!("sentinel initialized");
        Ok(Self {
            config,
            dispatcher,
            signatures,
            anomalies,
            orchestrator,
            running: AtomicBool::new(false),
        })
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("sentinel is already running");
            return;
        }
        info!("starting sentinel threat detection");
        self.orchestrator.initialize();
        self.dispatcher.publish(Message::Started);
        self.signatures.start();
        self.anomalies.start();
    }

    /// Stop detection, abort in-flight responses, and drop all incidents.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("sentinel is not running");
            return;
        }
        info!("stopping sentinel");
        self.signatures.stop();
        self.anomalies.stop();
        self.orchestrator.cleanup().await;
        self.dispatcher.publish(Message::Stopped);
        info!("sentinel stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SentinelStatus {
        SentinelStatus {
            running: self.is_running(),
            signature_engine: self.signatures.status(),
            anomaly_detector: self.anomalies.status(),
            orchestrator: self.orchestrator.status(),
        }
    }

    /// Record `event` and run both detectors over it concurrently.
    ///
    /// Returns once both analyses are done. Responses to qualifying threats
    /// continue in the background; see [`Sentinel::settle`].
    pub async fn submit(&self, event: Event) {
        self.dispatcher.publish(Message::EventReceived(event.clone()));

        let detection = &self.config.detection;
        let threats = async {
            if detection.enable_signature_detection {
                self.signatures.analyze(&event).await.len()
            } else {
                0
            }
        };
        let anomalies = async {
            if detection.enable_anomaly_detection {
                self.anomalies.analyze(&event.payload).await.len()
            } else {
                0
            }
        };
        let (threats, anomalies) = tokio::join!(threats, anomalies);
        tracing::debug!(source = %event.source, threats, anomalies, "event analyzed");
    }

    /// Wait for every response plan started so far to finish.
    pub async fn settle(&self) {
        self.orchestrator.settle().await;
    }

    pub fn active_incidents(&self) -> Vec<Incident> {
        self.orchestrator.active_incidents()
    }

    pub async fn handle_manual_alert(&self, alert: &Map<String, Value>) {
        self.orchestrator.handle_manual_alert(alert).await;
    }

    pub fn recent(&self, limit: usize) -> Vec<LedgerEntry> {
        self.dispatcher.ledger().recent(limit)
    }

    /// Register an observer for a dispatcher topic.
    pub fn subscribe<F>(&self, topic: Topic, name: impl Into<String>, handler: F)
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(topic, name, handler);
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    pub fn signatures(&self) -> &SignatureEngine {
        &self.signatures
    }

    pub fn anomalies(&self) -> &AnomalyDetector {
        &self.anomalies
    }

    pub fn orchestrator(&self) -> &Arc<IncidentOrchestrator> {
        &self.orchestrator
    }

    pub async fn dispose(&self) {
        self.stop().await;
        info!("sentinel disposed");
    }
}

/// Run the HTTP daemon until Ctrl-C.
pub async fn serve(config: SentinelConfig) -> Result<()> {
    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.api.bind))?;

    let sentinel = Arc::new(Sentinel::new(config)?);
    sentinel.start();

    let app = api::router(api::state::AppState {
        sentinel: sentinel.clone(),
    });

    info!(%addr, "sentinel listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    sentinel.dispose().await;
    Ok(())
}
