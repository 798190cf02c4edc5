//! Incident orchestrator: opens incidents for qualifying threats and drives
//! their response plans to completion.
//!
//! Actions of one incident run strictly in plan order; plans of different
//! incidents run concurrently, bounded by a semaphore.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    ActionExecutor, Incident, IncidentStatus, ResponseError, ResponsePolicy, ResponseStatus,
    ResponseSummary,
};
use crate::detect::{ComponentStatus, ThreatFinding};
use crate::event::{Dispatcher, Message};

pub const DEFAULT_MAX_CONCURRENT_INCIDENTS: usize = 10;
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct IncidentOrchestrator {
    incidents: Mutex<HashMap<Uuid, Incident>>,
    policy: ResponsePolicy,
    executor: Arc<dyn ActionExecutor>,
    dispatcher: Arc<Dispatcher>,
    permits: Semaphore,
    action_timeout: Duration,
    cancel: Mutex<CancellationToken>,
    tasks: TaskTracker,
    running: AtomicBool,
}

impl IncidentOrchestrator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        policy: ResponsePolicy,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            incidents: Mutex::new(HashMap::new()),
            policy,
            executor,
            dispatcher,
            permits: Semaphore::new(DEFAULT_MAX_CONCURRENT_INCIDENTS),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            cancel: Mutex::new(CancellationToken::new()),
            tasks: TaskTracker::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Cap on response plans executing at the same time (minimum 1).
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.permits = Semaphore::new(max.max(1));
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Mark the orchestrator active. A token cancelled by an earlier
    /// shutdown is replaced.
    pub fn initialize(&self) {
        info!("initializing incident response orchestrator");
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> ComponentStatus {
        ComponentStatus::from_running(self.running.load(Ordering::SeqCst))
    }

    pub fn policy(&self) -> &ResponsePolicy {
        &self.policy
    }

    /// Open an incident for `finding`, run its plan, and publish the
    /// completion record.
    ///
    /// A failed or timed-out action is logged and left out of the executed
    /// list; the plan continues with the next action. If shutdown cancels the
    /// plan, the remaining actions are skipped, the incident stays open, and
    /// the record is marked aborted.
    pub async fn respond_to_threat(
        &self,
        finding: &ThreatFinding,
    ) -> Result<ResponseSummary, ResponseError> {
        let cancel = self.cancel_token();
        if cancel.is_cancelled() {
            return Err(ResponseError::ShuttingDown);
        }
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(ResponseError::ShuttingDown),
            permit = self.permits.acquire() => permit.map_err(|_| ResponseError::ShuttingDown)?,
        };

        let incident = Incident::open(finding);
        let incident_id = incident.id;
        self.incidents()
            .insert(incident_id, incident.clone());
        info!(
            incident = %incident_id,
            rule = %finding.rule,
            severity = finding.severity,
            "incident created"
        );
        self.dispatcher.publish(Message::IncidentCreated(incident.clone()));

        let plan = self.policy.plan_for(finding.severity).to_vec();
        let mut executed = Vec::with_capacity(plan.len());
        let mut status = ResponseStatus::Completed;

        for action in plan {
            if cancel.is_cancelled() {
                warn!(incident = %incident_id, %action, "response aborted by shutdown");
                status = ResponseStatus::Aborted;
                break;
            }

            let attempt = tokio::time::timeout(
                self.action_timeout,
                self.executor.perform(action, &incident, finding, &cancel),
            )
            .await;

            match attempt {
                Ok(Ok(())) => {
                    executed.push(action);
                    if let Some(tracked) = self.incidents().get_mut(&incident_id) {
                        tracked.actions.push(action);
                    }
                }
                Ok(Err(e)) => {
                    error!(
                        incident = %incident_id,
                        %action,
                        error = %e,
                        "failed to execute action"
                    );
                }
                Err(_) => {
                    error!(
                        incident = %incident_id,
                        %action,
                        timeout = ?self.action_timeout,
                        "action timed out"
                    );
                }
            }
        }

        // Shutdown may have interrupted the final action.
        if cancel.is_cancelled() {
            status = ResponseStatus::Aborted;
        }

        if status == ResponseStatus::Completed {
            if let Some(tracked) = self.incidents().get_mut(&incident_id) {
                tracked.transition(IncidentStatus::Mitigated)?;
            }
        }

        let summary = ResponseSummary {
            incident_id,
            actions: executed,
            status,
        };
        info!(
            incident = %incident_id,
            actions = summary.actions.len(),
            status = ?summary.status,
            "response completed"
        );
        self.dispatcher.publish(Message::ResponseCompleted(summary.clone()));
        Ok(summary)
    }

    /// Run [`Self::respond_to_threat`] as a tracked background task on the
    /// current runtime.
    pub fn spawn_response(self: &Arc<Self>, finding: ThreatFinding) -> anyhow::Result<()> {
        let handle = tokio::runtime::Handle::try_current()?;
        let orchestrator = Arc::clone(self);
        self.tasks.spawn_on(
            async move {
                if let Err(e) = orchestrator.respond_to_threat(&finding).await {
                    warn!(finding = %finding.id, error = %e, "response not started");
                }
            },
            &handle,
        );
        Ok(())
    }

    /// Wait until every response task spawned so far has finished.
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub fn incident(&self, id: &Uuid) -> Option<Incident> {
        self.incidents().get(id).cloned()
    }

    /// Every incident that is not resolved, oldest first.
    pub fn active_incidents(&self) -> Vec<Incident> {
        let mut active: Vec<Incident> = self
            .incidents()
            .values()
            .filter(|i| i.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|i| i.created_at);
        active
    }

    /// Operator-submitted alert hook. Recorded in the log only.
    pub async fn handle_manual_alert(&self, alert: &Map<String, Value>) {
        info!(fields = alert.len(), "processing manual alert");
        let payload = Value::Object(alert.clone());
        debug!(alert = %payload, "manual alert payload");
    }

    /// Cancel in-flight plans, wait for their tasks, and drop all incidents.
    pub async fn cleanup(&self) {
        info!("cleaning up response orchestrator");
        self.running.store(false, Ordering::SeqCst);
        self.cancel_token().cancel();
        self.settle().await;
        self.incidents().clear();
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn incidents(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Incident>> {
        self.incidents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
