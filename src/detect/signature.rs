//! Signature detection engine: named threat rules matched against events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ComponentStatus, DetectError, ThreatFinding};
use crate::event::{Dispatcher, Event, Message};

/// Predicate applied to a single payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Exists,
    Equals(Value),
    /// Substring match against a string field.
    Contains(String),
    Above(f64),
    Below(f64),
}

impl Condition {
    fn holds(&self, value: &Value) -> bool {
        match self {
            Condition::Exists => true,
            Condition::Equals(expected) => value == expected,
            Condition::Contains(needle) => {
                value.as_str().is_some_and(|s| s.contains(needle.as_str()))
            }
            Condition::Above(limit) => value.as_f64().is_some_and(|v| v > *limit),
            Condition::Below(limit) => value.as_f64().is_some_and(|v| v < *limit),
        }
    }
}

/// Configuration form of a [`Matcher`], as written in TOML/JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatcherSpec {
    Substring { pattern: String },
    Regex { pattern: String },
    Field { field: String, condition: Condition },
}

/// How a signature decides whether an event matches.
///
/// `Substring` and `Regex` scan the canonical serialized payload; `Field`
/// evaluates a predicate against one (dot-separated) payload path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatcherSpec", into = "MatcherSpec")]
pub enum Matcher {
    Substring(String),
    Regex(Regex),
    Field { path: String, condition: Condition },
}

impl Matcher {
    pub fn substring(pattern: impl Into<String>) -> Self {
        Matcher::Substring(pattern.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, DetectError> {
        Regex::new(pattern)
            .map(Matcher::Regex)
            .map_err(|source| DetectError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn field(path: impl Into<String>, condition: Condition) -> Self {
        Matcher::Field {
            path: path.into(),
            condition,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.matches_canonical(event, &event.canonical_payload())
    }

    /// Like [`Matcher::matches`] with the canonical payload already computed.
    pub fn matches_canonical(&self, event: &Event, canonical: &str) -> bool {
        match self {
            Matcher::Substring(pattern) => canonical.contains(pattern.as_str()),
            Matcher::Regex(re) => re.is_match(canonical),
            Matcher::Field { path, condition } => {
                lookup(event, path).is_some_and(|value| condition.holds(value))
            }
        }
    }
}

fn lookup<'a>(event: &'a Event, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = event.payload.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

impl TryFrom<MatcherSpec> for Matcher {
    type Error = DetectError;

    fn try_from(spec: MatcherSpec) -> Result<Self, Self::Error> {
        match spec {
            MatcherSpec::Substring { pattern } => Ok(Matcher::Substring(pattern)),
            MatcherSpec::Regex { pattern } => Matcher::regex(&pattern),
            MatcherSpec::Field { field, condition } => Ok(Matcher::field(field, condition)),
        }
    }
}

impl From<Matcher> for MatcherSpec {
    fn from(matcher: Matcher) -> Self {
        match matcher {
            Matcher::Substring(pattern) => MatcherSpec::Substring { pattern },
            Matcher::Regex(re) => MatcherSpec::Regex {
                pattern: re.as_str().to_string(),
            },
            Matcher::Field { path, condition } => MatcherSpec::Field {
                field: path,
                condition,
            },
        }
    }
}

/// A named threat rule with a fixed severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatSignature {
    pub name: String,
    pub matcher: Matcher,
    pub severity: f64,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "detected".to_string()
}

impl ThreatSignature {
    pub fn new(
        name: impl Into<String>,
        matcher: Matcher,
        severity: f64,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            matcher,
            severity,
            category: category.into(),
        }
    }

    fn validate(&self) -> Result<(), DetectError> {
        if !(0.0..=10.0).contains(&self.severity) {
            return Err(DetectError::InvalidSeverity {
                name: self.name.clone(),
                severity: self.severity,
            });
        }
        Ok(())
    }
}

/// Built-in rule set loaded at startup.
pub fn default_signatures() -> Vec<ThreatSignature> {
    vec![
        ThreatSignature::new(
            "malware_signature",
            Matcher::substring("malicious_pattern"),
            9.0,
            "malware",
        ),
        ThreatSignature::new(
            "dos_attack",
            Matcher::substring("excessive_requests"),
            8.0,
            "denial_of_service",
        ),
        ThreatSignature::new(
            "brute_force",
            Matcher::substring("failed_login_attempts"),
            7.0,
            "credential_access",
        ),
    ]
}

/// Matches events against the signature table and publishes one
/// [`ThreatFinding`] per matching rule.
pub struct SignatureEngine {
    signatures: RwLock<Vec<ThreatSignature>>,
    dispatcher: Arc<Dispatcher>,
    running: AtomicBool,
}

impl SignatureEngine {
    /// Build an engine from a rule set. Invalid or duplicate rules are fatal.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        signatures: Vec<ThreatSignature>,
    ) -> Result<Self, DetectError> {
        let mut table: Vec<ThreatSignature> = Vec::with_capacity(signatures.len());
        for signature in signatures {
            signature.validate()?;
            if table.iter().any(|s| s.name == signature.name) {
                return Err(DetectError::DuplicateSignature(signature.name));
            }
            table.push(signature);
        }
        info!(rules = table.len(), "threat signatures loaded");

        Ok(Self {
            signatures: RwLock::new(table),
            dispatcher,
            running: AtomicBool::new(false),
        })
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("signature engine started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("signature engine stopped");
    }

    pub fn status(&self) -> ComponentStatus {
        ComponentStatus::from_running(self.running.load(Ordering::SeqCst))
    }

    /// Insert a rule, replacing any existing rule with the same name in place.
    pub fn upsert_signature(&self, signature: ThreatSignature) -> Result<(), DetectError> {
        signature.validate()?;
        let mut table = self.signatures.write().unwrap_or_else(PoisonError::into_inner);
        match table.iter_mut().find(|s| s.name == signature.name) {
            Some(existing) => {
                debug!(rule = %signature.name, "replacing signature");
                *existing = signature;
            }
            None => {
                debug!(rule = %signature.name, "adding signature");
                table.push(signature);
            }
        }
        Ok(())
    }

    pub fn remove_signature(&self, name: &str) -> bool {
        let mut table = self.signatures.write().unwrap_or_else(PoisonError::into_inner);
        let before = table.len();
        table.retain(|s| s.name != name);
        table.len() != before
    }

    pub fn signatures(&self) -> Vec<ThreatSignature> {
        self.signatures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Evaluate every rule against `event` and publish each match.
    ///
    /// No-op while the engine is stopped.
    pub async fn analyze(&self, event: &Event) -> Vec<ThreatFinding> {
        if !self.running.load(Ordering::SeqCst) {
            return Vec::new();
        }

        let canonical = event.canonical_payload();
        let findings: Vec<ThreatFinding> = {
            let table = self.signatures.read().unwrap_or_else(PoisonError::into_inner);
            table
                .iter()
                .filter(|s| s.matcher.matches_canonical(event, &canonical))
                .map(|s| ThreatFinding {
                    id: Uuid::new_v4(),
                    rule: s.name.clone(),
                    severity: s.severity,
                    category: s.category.clone(),
                    timestamp: Utc::now(),
                    source: event.source.clone(),
                    event: event.clone(),
                })
                .collect()
        };

        for finding in &findings {
            info!(
                rule = %finding.rule,
                severity = finding.severity,
                source = %finding.source,
                "threat detected"
            );
            self.dispatcher.publish(Message::ThreatDetected(finding.clone()));
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Topic;
    use serde_json::json;

    fn engine() -> SignatureEngine {
        let engine =
            SignatureEngine::new(Arc::new(Dispatcher::default()), default_signatures()).unwrap();
        engine.start();
        engine
    }

    fn event(value: Value) -> Event {
        Event::from_json(value)
    }

    #[tokio::test]
    async fn test_detects_malware_signature() {
        let engine = engine();
        let findings = engine
            .analyze(&event(json!({ "source": "x", "data": "malicious_pattern present" })))
            .await;

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, "malware_signature");
        assert_eq!(findings[0].severity, 9.0);
        assert_eq!(findings[0].source, "x");
        assert_eq!(engine.dispatcher.ledger().recent(10)[0].kind, Topic::ThreatDetected);
    }

    #[tokio::test]
    async fn test_one_finding_per_matching_rule_every_call() {
        let engine = engine();
        let ev = event(json!({ "data": "malicious_pattern and excessive_requests" }));

        for _ in 0..2 {
            let mut rules: Vec<String> =
                engine.analyze(&ev).await.into_iter().map(|f| f.rule).collect();
            rules.sort();
            assert_eq!(rules, vec!["dos_attack", "malware_signature"]);
        }
        assert_eq!(engine.dispatcher.ledger().len(), 4);
    }

    #[tokio::test]
    async fn test_benign_event_produces_nothing() {
        let engine = engine();
        let findings = engine.analyze(&event(json!({ "data": "normal_operation" }))).await;
        assert!(findings.is_empty());
        assert!(engine.dispatcher.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_engine_is_noop() {
        let engine = engine();
        engine.stop();
        assert_eq!(engine.status(), ComponentStatus::Inactive);

        let findings = engine.analyze(&event(json!({ "data": "malicious_pattern" }))).await;
        assert!(findings.is_empty());

        engine.start();
        assert_eq!(engine.status(), ComponentStatus::Active);
    }

    #[tokio::test]
    async fn test_nested_payload_is_scanned() {
        let engine = engine();
        let findings = engine
            .analyze(&event(json!({
                "source": "test",
                "data": { "pattern": "malicious_pattern" }
            })))
            .await;
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_rejects_out_of_range_severity() {
        let bad = ThreatSignature::new("too_hot", Matcher::substring("x"), 11.0, "test");
        let err = SignatureEngine::new(Arc::new(Dispatcher::default()), vec![bad]).err();
        assert!(matches!(err, Some(DetectError::InvalidSeverity { .. })));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut rules = default_signatures();
        rules.push(ThreatSignature::new("brute_force", Matcher::substring("y"), 5.0, "dup"));
        let err = SignatureEngine::new(Arc::new(Dispatcher::default()), rules).err();
        assert!(matches!(
            err,
            Some(DetectError::DuplicateSignature(name)) if name == "brute_force"
        ));
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        assert!(matches!(Matcher::regex("(unclosed"), Err(DetectError::InvalidPattern { .. })));
    }

    #[test]
    fn test_regex_and_field_matchers() {
        let ev = event(json!({
            "user": { "name": "root", "attempts": 12 },
            "msg": "login FAILED for root",
        }));

        assert!(Matcher::regex(r"(?i)login failed").unwrap().matches(&ev));
        assert!(Matcher::field("user.name", Condition::Equals(json!("root"))).matches(&ev));
        assert!(Matcher::field("user.attempts", Condition::Above(10.0)).matches(&ev));
        assert!(!Matcher::field("user.attempts", Condition::Below(10.0)).matches(&ev));
        assert!(Matcher::field("msg", Condition::Contains("FAILED".into())).matches(&ev));
        assert!(!Matcher::field("user.uid", Condition::Exists).matches(&ev));
    }

    #[test]
    fn test_matcher_deserializes_from_toml() {
        let sig: ThreatSignature = toml::from_str(
            r#"
            name = "root_login"
            severity = 6.5
            matcher = { type = "field", field = "user", condition = { equals = "root" } }
            "#,
        )
        .unwrap();
        assert_eq!(sig.category, "detected");
        assert!(sig.matcher.matches(&event(json!({ "user": "root" }))));

        let bad: Result<ThreatSignature, _> = toml::from_str(
            r#"
            name = "broken"
            severity = 5
            matcher = { type = "regex", pattern = "[" }
            "#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_upsert_and_remove() {
        let engine = engine();
        engine
            .upsert_signature(ThreatSignature::new(
                "brute_force",
                Matcher::substring("ssh_fail"),
                6.0,
                "credential_access",
            ))
            .unwrap();
        engine
            .upsert_signature(ThreatSignature::new(
                "crypto_miner",
                Matcher::substring("xmrig"),
                7.5,
                "resource_hijacking",
            ))
            .unwrap();

        let names: Vec<String> = engine.signatures().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["malware_signature", "dos_attack", "brute_force", "crypto_miner"]);
        assert_eq!(engine.signatures()[2].severity, 6.0);

        assert!(engine.remove_signature("dos_attack"));
        assert!(!engine.remove_signature("dos_attack"));
        assert_eq!(engine.signatures().len(), 3);
    }
}
