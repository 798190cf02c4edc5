//! Event model, bounded ledger, and the in-process publish/subscribe fabric.

pub mod dispatch;
pub mod ledger;

pub use self::dispatch::Dispatcher;
pub use self::ledger::{EventLedger, LedgerEntry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::detect::{AnomalyFinding, ThreatFinding};
use crate::response::{Incident, ResponseSummary};

/// A telemetry event submitted by a producer.
///
/// Events are immutable once dispatched; everything downstream only borrows
/// or clones them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "unknown_source")]
    pub source: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

impl Event {
    pub fn new(source: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            source: source.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Build an event from a flat JSON object.
    ///
    /// A top-level `source` string becomes the event source and a top-level
    /// RFC 3339 `timestamp` becomes the event time. Every other key, including
    /// a `source` or `timestamp` that is not usable as such, stays in the
    /// payload.
    pub fn from_json(value: Value) -> Self {
        let mut payload = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };

        let source = match payload.get("source") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => unknown_source(),
        };
        if payload.get("source").is_some_and(Value::is_string) {
            payload.remove("source");
        }

        let parsed = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let timestamp = match parsed {
            Some(ts) => {
                payload.remove("timestamp");
                ts
            }
            None => Utc::now(),
        };

        Self {
            source,
            timestamp,
            payload,
        }
    }

    /// Canonical textual form of the payload that signature matchers scan.
    ///
    /// Keys are emitted in sorted order so the same payload always
    /// serializes to the same string.
    pub fn canonical_payload(&self) -> String {
        Value::Object(self.payload.clone()).to_string()
    }
}

/// Topics carried by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "event:received")]
    EventReceived,
    #[serde(rename = "threat:detected")]
    ThreatDetected,
    #[serde(rename = "anomaly:detected")]
    AnomalyDetected,
    #[serde(rename = "incident:created")]
    IncidentCreated,
    #[serde(rename = "response:completed")]
    ResponseCompleted,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "stopped")]
    Stopped,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::EventReceived => "event:received",
            Topic::ThreatDetected => "threat:detected",
            Topic::AnomalyDetected => "anomaly:detected",
            Topic::IncidentCreated => "incident:created",
            Topic::ResponseCompleted => "response:completed",
            Topic::Started => "started",
            Topic::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message published on the dispatcher. The topic is implied by the variant.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    EventReceived(Event),
    ThreatDetected(ThreatFinding),
    AnomalyDetected(AnomalyFinding),
    IncidentCreated(Incident),
    ResponseCompleted(ResponseSummary),
    Started,
    Stopped,
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Message::EventReceived(_) => Topic::EventReceived,
            Message::ThreatDetected(_) => Topic::ThreatDetected,
            Message::AnomalyDetected(_) => Topic::AnomalyDetected,
            Message::IncidentCreated(_) => Topic::IncidentCreated,
            Message::ResponseCompleted(_) => Topic::ResponseCompleted,
            Message::Started => Topic::Started,
            Message::Stopped => Topic::Stopped,
        }
    }
}
