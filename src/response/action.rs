//! Response actions and the pluggable capability that performs them.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Incident;
use crate::detect::ThreatFinding;

/// The closed set of response actions a plan may name.
///
/// Unknown names are rejected when a policy is parsed, so a typo in
/// configuration fails at startup instead of silently doing nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    IsolateHost,
    BlockIp,
    CollectForensics,
    IncreaseMonitoring,
    LogEvent,
    NotifyTeam,
    UpdateAlert,
}

impl ResponseAction {
    pub const ALL: [ResponseAction; 7] = [
        ResponseAction::IsolateHost,
        ResponseAction::BlockIp,
        ResponseAction::CollectForensics,
        ResponseAction::IncreaseMonitoring,
        ResponseAction::LogEvent,
        ResponseAction::NotifyTeam,
        ResponseAction::UpdateAlert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseAction::IsolateHost => "isolate_host",
            ResponseAction::BlockIp => "block_ip",
            ResponseAction::CollectForensics => "collect_forensics",
            ResponseAction::IncreaseMonitoring => "increase_monitoring",
            ResponseAction::LogEvent => "log_event",
            ResponseAction::NotifyTeam => "notify_team",
            ResponseAction::UpdateAlert => "update_alert",
        }
    }

    /// Whether the action changes something outside this process.
    pub fn is_disruptive(&self) -> bool {
        matches!(
            self,
            ResponseAction::IsolateHost | ResponseAction::BlockIp | ResponseAction::NotifyTeam
        )
    }
}

impl std::fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown response action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for ResponseAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResponseAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Capability that carries out one response action.
///
/// Production implementations talk to enforcement backends (firewall, EDR,
/// ticketing). Implementations must return promptly once `cancel` fires.
#[async_trait::async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn perform(
        &self,
        action: ResponseAction,
        incident: &Incident,
        finding: &ThreatFinding,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Default executor: logs what a real backend would do, after an optional delay.
#[derive(Debug, Clone, Default)]
pub struct LoggingExecutor {
    delay: Duration,
}

impl LoggingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn perform(
        &self,
        action: ResponseAction,
        incident: &Incident,
        finding: &ThreatFinding,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let detail = match action {
            ResponseAction::IsolateHost => "isolating host",
            ResponseAction::BlockIp => "blocking ip",
            ResponseAction::CollectForensics => "collecting forensic data",
            ResponseAction::IncreaseMonitoring => "increasing monitoring",
            ResponseAction::LogEvent => "security event logged",
            ResponseAction::NotifyTeam => "notifying security team",
            ResponseAction::UpdateAlert => "alert updated",
        };
        if action.is_disruptive() {
            warn!(
                %action,
                incident = %incident.id,
                rule = %finding.rule,
                source = %finding.source,
                "{detail}"
            );
        } else {
            info!(
                %action,
                incident = %incident.id,
                rule = %finding.rule,
                source = %finding.source,
                "{detail}"
            );
        }

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("{action} cancelled"),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        Ok(())
    }
}
