//! Signature-based threat detection and baseline anomaly detection.

pub mod anomaly;
pub mod signature;

pub use self::anomaly::AnomalyDetector;
pub use self::signature::{Condition, Matcher, SignatureEngine, ThreatSignature};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::event::Event;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("signature '{name}': severity {severity} outside [0, 10]")]
    InvalidSeverity { name: String, severity: f64 },
    #[error("duplicate signature name '{0}'")]
    DuplicateSignature(String),
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("baseline for '{key}' must be a positive finite number, got {value}")]
    InvalidBaseline { key: String, value: f64 },
    #[error("deviation threshold must be a positive finite number, got {0}")]
    InvalidThreshold(f64),
}

/// Running state reported by detectors and the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Active,
    Inactive,
}

impl ComponentStatus {
    pub fn from_running(running: bool) -> Self {
        if running {
            ComponentStatus::Active
        } else {
            ComponentStatus::Inactive
        }
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentStatus::Active => write!(f, "active"),
            ComponentStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// One signature match against one event.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatFinding {
    pub id: Uuid,
    pub rule: String,
    /// Copied verbatim from the matching signature.
    pub severity: f64,
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub event: Event,
}

/// Coarse anomaly classification derived from deviation magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyTier {
    /// Reserved; the ratio rule never produces it.
    Low,
    Medium,
    High,
}

impl std::fmt::Display for AnomalyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyTier::Low => write!(f, "low"),
            AnomalyTier::Medium => write!(f, "medium"),
            AnomalyTier::High => write!(f, "high"),
        }
    }
}

/// A metric that deviated from its baseline by more than the threshold.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyFinding {
    pub id: Uuid,
    pub metric: String,
    pub tier: AnomalyTier,
    pub timestamp: DateTime<Utc>,
    pub observed: f64,
    pub baseline: f64,
    pub deviation: f64,
    pub metrics: Map<String, Value>,
}
