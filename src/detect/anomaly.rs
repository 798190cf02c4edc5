//! Baseline anomaly detection.
//!
//! The threshold is a plain relative-deviation ratio, `|observed - baseline| / baseline`,
//! not a count of standard deviations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AnomalyFinding, AnomalyTier, ComponentStatus, DetectError};
use crate::event::{Dispatcher, Message};

pub const DEFAULT_DEVIATION_THRESHOLD: f64 = 3.0;

/// Deviations above this ratio are classified [`AnomalyTier::High`].
pub const HIGH_TIER_DEVIATION: f64 = 5.0;

pub fn default_baselines() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("cpu_usage".to_string(), 50.0),
        ("memory_usage".to_string(), 60.0),
        ("network_traffic".to_string(), 1000.0),
        ("request_rate".to_string(), 500.0),
    ])
}

/// Relative deviation of `observed` from `baseline`.
pub fn deviation(observed: f64, baseline: f64) -> f64 {
    (observed - baseline).abs() / baseline
}

pub fn classify(deviation: f64) -> AnomalyTier {
    if deviation > HIGH_TIER_DEVIATION {
        AnomalyTier::High
    } else {
        AnomalyTier::Medium
    }
}

fn check_baseline(key: &str, value: f64) -> Result<(), DetectError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DetectError::InvalidBaseline {
            key: key.to_string(),
            value,
        })
    }
}

pub struct AnomalyDetector {
    baselines: RwLock<BTreeMap<String, f64>>,
    threshold: f64,
    dispatcher: Arc<Dispatcher>,
    running: AtomicBool,
}

impl AnomalyDetector {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        baselines: BTreeMap<String, f64>,
        threshold: f64,
    ) -> Result<Self, DetectError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(DetectError::InvalidThreshold(threshold));
        }
        for (key, value) in &baselines {
            check_baseline(key, *value)?;
        }
        info!(baselines = baselines.len(), threshold, "anomaly baselines seeded");

        Ok(Self {
            baselines: RwLock::new(baselines),
            threshold,
            dispatcher,
            running: AtomicBool::new(false),
        })
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("anomaly detector started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("anomaly detector stopped");
    }

    pub fn status(&self) -> ComponentStatus {
        ComponentStatus::from_running(self.running.load(Ordering::SeqCst))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Replace the expected value for `key`. Takes effect on the next analysis.
    pub fn update_baseline(&self, key: &str, value: f64) -> Result<(), DetectError> {
        check_baseline(key, value)?;
        self.baselines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        debug!(%key, value, "baseline updated");
        Ok(())
    }

    pub fn baseline(&self, key: &str) -> Option<f64> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    pub fn baselines(&self) -> BTreeMap<String, f64> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Compare every baselined metric present in `metrics` and publish one
    /// finding per metric whose deviation exceeds the threshold.
    ///
    /// Non-numeric values for a baselined key are ignored. No-op while stopped.
    pub async fn analyze(&self, metrics: &Map<String, Value>) -> Vec<AnomalyFinding> {
        if !self.running.load(Ordering::SeqCst) {
            return Vec::new();
        }

        let findings: Vec<AnomalyFinding> = {
            let baselines = self.baselines.read().unwrap_or_else(PoisonError::into_inner);
            baselines
                .iter()
                .filter_map(|(key, &baseline)| {
                    let observed = metrics.get(key)?.as_f64()?;
                    let deviation = deviation(observed, baseline);
                    (deviation > self.threshold).then(|| AnomalyFinding {
                        id: Uuid::new_v4(),
                        metric: key.clone(),
                        tier: classify(deviation),
                        timestamp: Utc::now(),
                        observed,
                        baseline,
                        deviation,
                        metrics: metrics.clone(),
                    })
                })
                .collect()
        };

        for finding in &findings {
            warn!(
                metric = %finding.metric,
                tier = %finding.tier,
                observed = finding.observed,
                baseline = finding.baseline,
                deviation = finding.deviation,
                "anomaly detected"
            );
            self.dispatcher.publish(Message::AnomalyDetected(finding.clone()));
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> AnomalyDetector {
        let d = AnomalyDetector::new(
            Arc::new(Dispatcher::default()),
            default_baselines(),
            DEFAULT_DEVIATION_THRESHOLD,
        )
        .unwrap();
        d.start();
        d
    }

    fn metrics(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_deviation_and_tier() {
        assert_eq!(deviation(500.0, 50.0), 9.0);
        assert!((deviation(55.0, 50.0) - 0.1).abs() < 1e-12);
        assert_eq!(classify(9.0), AnomalyTier::High);
        assert_eq!(classify(5.0), AnomalyTier::Medium);
        assert_eq!(classify(3.5), AnomalyTier::Medium);
    }

    #[tokio::test]
    async fn test_large_spike_is_high() {
        let d = detector();
        let findings = d.analyze(&metrics(json!({ "cpu_usage": 500 }))).await;

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].metric, "cpu_usage");
        assert_eq!(findings[0].tier, AnomalyTier::High);
        assert_eq!(findings[0].observed, 500.0);
        assert_eq!(findings[0].baseline, 50.0);
        assert_eq!(d.dispatcher.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_small_drift_is_ignored() {
        let d = detector();
        assert!(d.analyze(&metrics(json!({ "cpu_usage": 55 }))).await.is_empty());
        // Exactly at the threshold is not a breach.
        assert!(d.analyze(&metrics(json!({ "cpu_usage": 200 }))).await.is_empty());
    }

    #[tokio::test]
    async fn test_medium_tier_between_thresholds() {
        let d = detector();
        let findings = d.analyze(&metrics(json!({ "cpu_usage": 250 }))).await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].tier, AnomalyTier::Medium);
    }

    #[tokio::test]
    async fn test_multiple_keys_trigger_independently() {
        let d = detector();
        let findings = d
            .analyze(&metrics(json!({
                "cpu_usage": 500,
                "memory_usage": 61,
                "request_rate": 5000,
                "unrelated": 1e9,
                "network_traffic": "lots",
            })))
            .await;

        let keys: Vec<&str> = findings.iter().map(|f| f.metric.as_str()).collect();
        assert_eq!(keys, vec!["cpu_usage", "request_rate"]);
    }

    #[tokio::test]
    async fn test_update_baseline_applies_to_later_analyses() {
        let d = detector();
        d.update_baseline("cpu_usage", 400.0).unwrap();
        assert_eq!(d.baseline("cpu_usage"), Some(400.0));
        assert!(d.analyze(&metrics(json!({ "cpu_usage": 500 }))).await.is_empty());

        d.update_baseline("disk_io", 10.0).unwrap();
        assert_eq!(d.analyze(&metrics(json!({ "disk_io": 100 }))).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_detector_is_noop() {
        let d = detector();
        d.stop();
        assert!(d.analyze(&metrics(json!({ "cpu_usage": 5000 }))).await.is_empty());
        assert_eq!(d.status(), ComponentStatus::Inactive);
    }

    #[test]
    fn test_rejects_non_positive_baselines() {
        let d = detector();
        assert!(matches!(
            d.update_baseline("cpu_usage", 0.0),
            Err(DetectError::InvalidBaseline { .. })
        ));

        let bad = BTreeMap::from([("x".to_string(), -1.0)]);
        assert!(AnomalyDetector::new(Arc::new(Dispatcher::default()), bad, 3.0).is_err());
        assert!(matches!(
            AnomalyDetector::new(Arc::new(Dispatcher::default()), default_baselines(), 0.0),
            Err(DetectError::InvalidThreshold(_))
        ));
    }
}
