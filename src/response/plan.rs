//! Severity-to-action policy.
//!
//! A policy is an ordered list of half-open severity ranges `[min, max)`,
//! each naming the actions to run. Construction rejects policies that leave
//! a gap, overlap, or stop short of infinity, so every severity in
//! `[0, inf)` selects exactly one plan.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ResponseAction;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("response policy has no rules")]
    Empty,
    #[error("rule [{min}, {max:?}) is not a valid range")]
    InvalidRange { min: f64, max: Option<f64> },
    #[error("severities in [{from}, {to}) are not covered by any rule")]
    Gap { from: f64, to: f64 },
    #[error("rules overlap at severity {at}")]
    Overlap { at: f64 },
    #[error("severities at or above {from} are not covered by any rule")]
    Unbounded { from: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRule {
    pub min: f64,
    /// Exclusive upper bound; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub actions: Vec<ResponseAction>,
}

impl PlanRule {
    pub fn new(min: f64, max: Option<f64>, actions: Vec<ResponseAction>) -> Self {
        Self { min, max, actions }
    }

    pub fn contains(&self, severity: f64) -> bool {
        severity >= self.min && self.max.map_or(true, |max| severity < max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResponsePolicy {
    rules: Vec<PlanRule>,
}

impl ResponsePolicy {
    pub fn new(rules: Vec<PlanRule>) -> Result<Self, PolicyError> {
        if rules.is_empty() {
            return Err(PolicyError::Empty);
        }
        for rule in &rules {
            let valid_min = rule.min.is_finite() && rule.min >= 0.0;
            let valid_max = rule.max.map_or(true, |max| !max.is_nan() && max > rule.min);
            if !valid_min || !valid_max {
                return Err(PolicyError::InvalidRange {
                    min: rule.min,
                    max: rule.max,
                });
            }
        }

        let mut sorted: Vec<&PlanRule> = rules.iter().collect();
        sorted.sort_by(|a, b| a.min.total_cmp(&b.min));

        let mut covered_to = 0.0;
        for rule in sorted {
            if rule.min > covered_to {
                return Err(PolicyError::Gap {
                    from: covered_to,
                    to: rule.min,
                });
            }
            if rule.min < covered_to {
                return Err(PolicyError::Overlap { at: rule.min });
            }
            match rule.max {
                Some(max) => covered_to = max,
                None => covered_to = f64::INFINITY,
            }
        }
        if covered_to.is_finite() {
            return Err(PolicyError::Unbounded { from: covered_to });
        }

        Ok(Self { rules })
    }

    /// Actions for `severity`. Negative and NaN severities are treated as 0.
    pub fn plan_for(&self, severity: f64) -> &[ResponseAction] {
        let severity = if severity >= 0.0 { severity } else { 0.0 };
        self.rules
            .iter()
            .find(|rule| rule.contains(severity))
            .map(|rule| rule.actions.as_slice())
            .unwrap_or_default()
    }

    pub fn rules(&self) -> &[PlanRule] {
        &self.rules
    }
}

pub fn default_rules() -> Vec<PlanRule> {
    use ResponseAction::*;

    vec![
        PlanRule::new(8.0, None, vec![IsolateHost, BlockIp, CollectForensics]),
        PlanRule::new(6.0, Some(8.0), vec![IncreaseMonitoring, LogEvent, NotifyTeam]),
        PlanRule::new(0.0, Some(6.0), vec![LogEvent, UpdateAlert]),
    ]
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}
