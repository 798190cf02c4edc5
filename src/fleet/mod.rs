//! Agent fleet health tracking.
//!
//! Tracks heartbeats, response times, and alignment scores for connected
//! agents and rolls them up into a health check summary.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An agent is offline after this many seconds without a heartbeat.
pub const OFFLINE_AFTER_SECS: i64 = 5 * 60;
/// Response times above this (milliseconds) mark an agent degraded.
pub const DEGRADED_RESPONSE_MS: f64 = 2000.0;
/// Alignment scores below this mark an agent degraded.
pub const DEGRADED_ALIGNMENT: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Online,
    Degraded,
    Offline,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Online => write!(f, "online"),
            AgentState::Degraded => write!(f, "degraded"),
            AgentState::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub name: String,
    pub platform: String,
    pub state: AgentState,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub response_time_ms: f64,
    /// Percentage in `[0, 100]`.
    pub alignment_score: f64,
}

impl AgentHealth {
    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        now - self.registered_at
    }

    fn evaluate(&self, now: DateTime<Utc>) -> AgentState {
        if now - self.last_seen > Duration::seconds(OFFLINE_AFTER_SECS) {
            AgentState::Offline
        } else if self.response_time_ms > DEGRADED_RESPONSE_MS
            || self.alignment_score < DEGRADED_ALIGNMENT
        {
            AgentState::Degraded
        } else {
            AgentState::Online
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
    pub average_alignment: f64,
    pub alerts: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FleetMonitor {
    agents: BTreeMap<String, AgentHealth>,
}

impl FleetMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent_id: &str, name: &str, platform: &str) {
        let now = Utc::now();
        self.agents.insert(
            agent_id.to_string(),
            AgentHealth {
                agent_id: agent_id.to_string(),
                name: name.to_string(),
                platform: platform.to_string(),
                state: AgentState::Online,
                registered_at: now,
                last_seen: now,
                response_time_ms: 0.0,
                alignment_score: 100.0,
            },
        );
    }

    pub fn unregister(&mut self, agent_id: &str) -> bool {
        self.agents.remove(agent_id).is_some()
    }

    /// Record a heartbeat. Unknown agents are ignored.
    pub fn heartbeat(&mut self, agent_id: &str, response_time_ms: f64) -> bool {
        self.heartbeat_at(agent_id, response_time_ms, Utc::now())
    }

    pub fn heartbeat_at(
        &mut self,
        agent_id: &str,
        response_time_ms: f64,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return false;
        };
        agent.last_seen = at;
        agent.response_time_ms = response_time_ms;
        agent.state = agent.evaluate(Utc::now());
        true
    }

    /// Set the alignment score, clamped to `[0, 100]`.
    pub fn set_alignment(&mut self, agent_id: &str, score: f64) -> bool {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return false;
        };
        agent.alignment_score = score.clamp(0.0, 100.0);
        true
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentHealth> {
        self.agents.get(agent_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentHealth> {
        self.agents.values()
    }

    pub fn agents_in(&self, state: AgentState) -> Vec<&AgentHealth> {
        self.agents.values().filter(|a| a.state == state).collect()
    }

    /// Re-evaluate every agent and summarize.
    pub fn check(&mut self) -> HealthCheck {
        self.check_at(Utc::now())
    }

    pub fn check_at(&mut self, now: DateTime<Utc>) -> HealthCheck {
        let mut summary = HealthCheck {
            timestamp: now,
            total: self.agents.len(),
            online: 0,
            degraded: 0,
            offline: 0,
            average_alignment: 0.0,
            alerts: Vec::new(),
        };

        let mut alignment_total = 0.0;
        for agent in self.agents.values_mut() {
            agent.state = agent.evaluate(now);
            match agent.state {
                AgentState::Online => summary.online += 1,
                AgentState::Offline => {
                    summary.offline += 1;
                    summary.alerts.push(format!("Agent {} is offline", agent.name));
                }
                AgentState::Degraded => {
                    summary.degraded += 1;
                    summary.alerts.push(format!(
                        "Agent {} is degraded (response: {}ms, alignment: {}%)",
                        agent.name, agent.response_time_ms, agent.alignment_score
                    ));
                }
            }
            alignment_total += agent.alignment_score;
        }
        if summary.total > 0 {
            summary.average_alignment = alignment_total / summary.total as f64;
        }
        summary
    }

    pub fn report(&mut self) -> String {
        let check = self.check();

        let mut out = String::from("=== Agent Health Report ===\n\n");
        let _ = writeln!(out, "Timestamp: {}", check.timestamp.to_rfc3339());
        let _ = writeln!(out, "Total Agents: {}", check.total);
        let _ = writeln!(
            out,
            "Online: {} | Offline: {} | Degraded: {}",
            check.online, check.offline, check.degraded
        );
        let _ = writeln!(out, "Average Alignment Score: {:.2}%\n", check.average_alignment);

        if check.alerts.is_empty() {
            out.push_str("All systems nominal\n");
        } else {
            out.push_str("Alerts:\n");
            for alert in &check.alerts {
                let _ = writeln!(out, "  - {alert}");
            }
        }
        out
    }
}

/// One agent's entry in a fleet snapshot file.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSample {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub platform: String,
    pub response_time_ms: f64,
    #[serde(default = "full_alignment")]
    pub alignment_score: f64,
    /// Defaults to now when absent.
    pub last_seen: Option<DateTime<Utc>>,
}

fn full_alignment() -> f64 {
    100.0
}

impl FleetMonitor {
    pub fn from_samples(samples: &[AgentSample]) -> Self {
        let mut monitor = Self::new();
        for s in samples {
            monitor.register(&s.agent_id, &s.name, &s.platform);
            let seen = s.last_seen.unwrap_or_else(Utc::now);
            monitor.heartbeat_at(&s.agent_id, s.response_time_ms, seen);
            monitor.set_alignment(&s.agent_id, s.alignment_score);
        }
        monitor
    }
}
