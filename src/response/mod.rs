//! Incident lifecycle and automated response.

pub mod action;
pub mod orchestrator;
pub mod plan;

pub use self::action::{ActionExecutor, LoggingExecutor, ResponseAction};
pub use self::orchestrator::IncidentOrchestrator;
pub use self::plan::{PlanRule, ResponsePolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::detect::ThreatFinding;

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("incident {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: IncidentStatus,
        to: IncidentStatus,
    },
    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

/// Incident status. Transitions only move forward:
/// `open -> mitigated -> resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Mitigated,
    /// Terminal; only an operator outside this crate can close an incident.
    Resolved,
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Open => write!(f, "open"),
            IncidentStatus::Mitigated => write!(f, "mitigated"),
            IncidentStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// A unit of tracked response work created from a qualifying threat finding.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: Uuid,
    pub finding_id: Uuid,
    pub rule: String,
    pub source: String,
    pub status: IncidentStatus,
    pub severity: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Actions that completed successfully, in plan order.
    pub actions: Vec<ResponseAction>,
}

impl Incident {
    pub fn open(finding: &ThreatFinding) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            finding_id: finding.id,
            rule: finding.rule.clone(),
            source: finding.source.clone(),
            status: IncidentStatus::Open,
            severity: finding.severity,
            created_at: now,
            updated_at: now,
            actions: Vec::new(),
        }
    }

    pub fn transition(&mut self, to: IncidentStatus) -> Result<(), ResponseError> {
        if to <= self.status {
            return Err(ResponseError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status != IncidentStatus::Resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Completed,
    /// Shutdown cancelled the plan before every action was attempted.
    Aborted,
}

/// Completion record published on `response:completed`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSummary {
    pub incident_id: Uuid,
    pub actions: Vec<ResponseAction>,
    pub status: ResponseStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn finding() -> ThreatFinding {
        ThreatFinding {
            id: Uuid::new_v4(),
            rule: "malware_signature".to_string(),
            severity: 9.0,
            category: "malware".to_string(),
            timestamp: Utc::now(),
            source: "host-a".to_string(),
            event: Event::new("host-a", Default::default()),
        }
    }

    #[test]
    fn test_status_moves_forward_only() {
        let mut incident = Incident::open(&finding());
        assert_eq!(incident.status, IncidentStatus::Open);

        incident.transition(IncidentStatus::Mitigated).unwrap();
        assert!(incident.transition(IncidentStatus::Open).is_err());
        assert!(incident.transition(IncidentStatus::Mitigated).is_err());

        incident.transition(IncidentStatus::Resolved).unwrap();
        assert!(!incident.is_active());
    }

    #[test]
    fn test_summary_wire_shape() {
        let summary = ResponseSummary {
            incident_id: Uuid::nil(),
            actions: vec![ResponseAction::LogEvent],
            status: ResponseStatus::Completed,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["actions"][0], "log_event");
        assert!(json.get("incidentId").is_some());
    }
}
