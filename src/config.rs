//! TOML configuration for Sentinel.
//!
//! The configuration is read once at startup and handed to the core as a
//! read-only snapshot. Every section has compiled-in defaults, so an empty
//! file (or no file at all) is a valid configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::anomaly::{default_baselines, DEFAULT_DEVIATION_THRESHOLD};
use crate::detect::ThreatSignature;
use crate::event::ledger::DEFAULT_CAPACITY;
use crate::response::plan::{default_rules, PlanRule};

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "SENTINEL_CONFIG";
pub const LOCAL_CONFIG: &str = "sentinel.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl SentinelConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded sentinel configuration");
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. `explicit`, if given. Failure here is an error.
    /// 2. The file named by `SENTINEL_CONFIG`.
    /// 3. `./sentinel.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SENTINEL_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Check the documented value ranges.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.detection.threat_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            anyhow::bail!(
                "detection.threat_threshold must be a non-negative number, got {threshold}"
            );
        }
        let deviation = self.detection.deviation_threshold;
        if !deviation.is_finite() || deviation <= 0.0 {
            anyhow::bail!("detection.deviation_threshold must be positive, got {deviation}");
        }
        if self.ledger.capacity == 0 {
            anyhow::bail!("ledger.capacity must be at least 1");
        }
        if self.response.max_concurrent_incidents == 0 {
            anyhow::bail!("response.max_concurrent_incidents must be at least 1");
        }
        if self.response.action_timeout_secs == 0 {
            anyhow::bail!("response.action_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn`, `error`, or `silent`.
    pub level: String,
    pub format: LogFormat,
    /// ANSI colours for the `pretty` and `compact` formats.
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            colors: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enable_signature_detection: bool,
    pub enable_anomaly_detection: bool,
    /// Minimum threat severity that opens an incident.
    pub threat_threshold: f64,
    /// Refresh interval advertised to external rule feeds (seconds).
    /// Reported by `/api/v1/status`; signatures are updated through the API.
    pub update_interval_secs: u64,
    /// Relative-deviation ratio above which a metric is anomalous.
    pub deviation_threshold: f64,
    /// Expected value per metric key. Replaces the built-in table when set.
    pub baselines: BTreeMap<String, f64>,
    /// Signatures loaded in addition to the built-in rule set.
    pub signatures: Vec<ThreatSignature>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enable_signature_detection: true,
            enable_anomaly_detection: true,
            threat_threshold: 7.0,
            update_interval_secs: 300,
            deviation_threshold: DEFAULT_DEVIATION_THRESHOLD,
            baselines: default_baselines(),
            signatures: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub auto_respond: bool,
    pub max_concurrent_incidents: usize,
    /// Upper bound on a single action attempt (seconds).
    pub action_timeout_secs: u64,
    /// Artificial latency added by the logging executor (milliseconds).
    pub action_delay_ms: u64,
    /// Severity range to action list, first match wins.
    pub plan: Vec<PlanRule>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            auto_respond: true,
            max_concurrent_incidents: 10,
            action_timeout_secs: 30,
            action_delay_ms: 0,
            plan: default_rules(),
        }
    }
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

/// Settings handed to external collectors and notifiers.
///
/// Sentinel does not poll data sources itself. These values are reported by
/// `/api/v1/status` so collectors can pick them up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Time a collector should wait on one data source (seconds).
    pub data_source_timeout_secs: u64,
    /// Interval at which collectors should push metric samples (seconds).
    pub metrics_interval_secs: u64,
    pub alert_channels: Vec<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            data_source_timeout_secs: 5,
            metrics_interval_secs: 60,
            alert_channels: vec!["console".to_string(), "email".to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseAction;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = SentinelConfig::default();

        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert!(cfg.logging.colors);

        assert!(cfg.detection.enable_signature_detection);
        assert!(cfg.detection.enable_anomaly_detection);
        assert_eq!(cfg.detection.threat_threshold, 7.0);
        assert_eq!(cfg.detection.deviation_threshold, 3.0);
        assert_eq!(cfg.detection.baselines["cpu_usage"], 50.0);
        assert_eq!(cfg.detection.baselines.len(), 4);

        assert!(cfg.response.auto_respond);
        assert_eq!(cfg.response.max_concurrent_incidents, 10);
        assert_eq!(cfg.response.action_timeout_secs, 30);
        assert_eq!(cfg.response.plan.len(), 3);

        assert_eq!(cfg.monitoring.alert_channels, vec!["console", "email"]);
        assert_eq!(cfg.ledger.capacity, 10_000);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[logging]
level = "silent"
format = "json"
colors = false

[detection]
threat_threshold = 5.5
enable_anomaly_detection = false

[detection.baselines]
login_rate = 20

[[detection.signatures]]
name = "reverse_shell"
severity = 9.5
category = "execution"
matcher = { type = "regex", pattern = "bash -i >& /dev/tcp/" }

[response]
auto_respond = false
max_concurrent_incidents = 2

[[response.plan]]
min = 0
actions = ["notify_team"]

[monitoring]
alert_channels = ["slack"]

[ledger]
capacity = 50
"#;

        let cfg: SentinelConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.logging.level, "silent");
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert!(!cfg.logging.colors);
        assert_eq!(cfg.detection.threat_threshold, 5.5);
        assert!(!cfg.detection.enable_anomaly_detection);
        assert!(cfg.detection.enable_signature_detection);
        assert_eq!(cfg.detection.baselines.len(), 1);
        assert_eq!(cfg.detection.baselines["login_rate"], 20.0);
        assert_eq!(cfg.detection.signatures[0].name, "reverse_shell");
        assert!(!cfg.response.auto_respond);
        assert_eq!(cfg.response.max_concurrent_incidents, 2);
        assert_eq!(cfg.response.plan[0].actions, vec![ResponseAction::NotifyTeam]);
        assert_eq!(cfg.monitoring.alert_channels, vec!["slack"]);
        assert_eq!(cfg.ledger.capacity, 50);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: SentinelConfig = toml::from_str("").unwrap();
        let defaults = SentinelConfig::default();

        assert_eq!(cfg.detection.threat_threshold, defaults.detection.threat_threshold);
        assert_eq!(cfg.ledger.capacity, defaults.ledger.capacity);
        assert_eq!(cfg.response.plan, defaults.response.plan);
        assert_eq!(cfg.api.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut cfg = SentinelConfig::default();
        cfg.ledger.capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SentinelConfig::default();
        cfg.detection.threat_threshold = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = SentinelConfig::default();
        cfg.detection.deviation_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = SentinelConfig::default();
        cfg.response.max_concurrent_incidents = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_action_is_a_parse_error() {
        let result: Result<SentinelConfig, _> = toml::from_str(
            r#"
[[response.plan]]
min = 0
actions = ["log_event", "launch_missiles"]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sentinel.toml");
        std::fs::write(
            &path,
            r#"
[ledger]
capacity = 7
"#,
        )
        .unwrap();

        let cfg = SentinelConfig::load(&path).unwrap();
        assert_eq!(cfg.ledger.capacity, 7);

        let explicit = SentinelConfig::resolve(Some(&path)).unwrap();
        assert_eq!(explicit.ledger.capacity, 7);
    }

    #[test]
    fn test_load_invalid_values_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sentinel.toml");
        std::fs::write(&path, "[ledger]\ncapacity = 0\n").unwrap();
        assert!(SentinelConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = SentinelConfig::resolve(Some(Path::new("/nonexistent/path/sentinel.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = SentinelConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: SentinelConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.response.plan, roundtripped.response.plan);
        assert_eq!(cfg.detection.baselines, roundtripped.detection.baselines);
        assert_eq!(cfg.monitoring.alert_channels, roundtripped.monitoring.alert_channels);
    }
}
