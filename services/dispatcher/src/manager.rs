//! # Manager
//!
//! Entry point of the dispatch core. `submit` admits a request, runs its
//! workflow under the supervisor and waits for the first of: the workflow's
//! result, the workflow dying, or the request deadline. The admission slot is
//! released exactly once on every path.

use crate::admission::AdmissionQueue;
use crate::context::trace_hex;
use crate::engine::ProcessingEngine;
use crate::error::{DispatchError, DispatchResult};
use crate::metrics::DispatchMetrics;
use crate::workflow::Workflow;
use actors::{ChildExit, Supervisor};
use codec::{Envelope, Response};
use dispatch_config::DispatchSettings;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Gate consulted before admission and told about every terminal outcome
pub trait AdmissionPolicy: Send + Sync + 'static {
    fn allowed(&self) -> bool;

    fn record_outcome(&self, outcome: &Result<Response, DispatchError>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub timeout_ms: u64,
    pub retry_max: u32,
}

impl SubmitOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry_max: 2,
        }
    }
}

impl From<&DispatchSettings> for SubmitOptions {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            timeout_ms: settings.default_timeout_ms,
            retry_max: settings.default_retry_max,
        }
    }
}

pub struct Manager {
    admission: Arc<AdmissionQueue>,
    supervisor: Supervisor,
    engine: Arc<dyn ProcessingEngine>,
    metrics: Arc<DispatchMetrics>,
    policy: Option<Arc<dyn AdmissionPolicy>>,
    defaults: SubmitOptions,
}

impl Manager {
    pub fn new(
        admission: Arc<AdmissionQueue>,
        supervisor: Supervisor,
        engine: Arc<dyn ProcessingEngine>,
        metrics: Arc<DispatchMetrics>,
        defaults: SubmitOptions,
    ) -> Self {
        Self {
            admission,
            supervisor,
            engine,
            metrics,
            policy: None,
            defaults,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AdmissionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn defaults(&self) -> SubmitOptions {
        self.defaults
    }

    pub fn admission(&self) -> &Arc<AdmissionQueue> {
        &self.admission
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub async fn submit(&self, envelope: Envelope, options: SubmitOptions) -> DispatchResult<Response> {
        if let Some(policy) = &self.policy {
            if !policy.allowed() {
                DispatchMetrics::incr(&self.metrics.quarantined);
                return Err(DispatchError::Quarantined);
            }
        }

        let outcome = self.dispatch(envelope, options).await;

        if let Some(policy) = &self.policy {
            policy.record_outcome(&outcome);
        }
        self.metrics.record_outcome(&outcome);
        outcome
    }

    async fn dispatch(&self, envelope: Envelope, options: SubmitOptions) -> DispatchResult<Response> {
        let permit = match self.admission.offer() {
            Ok(permit) => permit,
            Err(e) => {
                DispatchMetrics::incr(&self.metrics.busy);
                return Err(e);
            }
        };
        DispatchMetrics::incr(&self.metrics.admitted);

        let trace_id = trace_hex(envelope.trace_id);
        let engine = Arc::clone(&self.engine);
        let metrics = Arc::clone(&self.metrics);
        let timeout = options.timeout();

        let spawned = self.supervisor.spawn(move |child| {
            let workflow = Workflow::new(child, envelope, timeout, options.retry_max, engine, metrics);
            Ok::<_, Infallible>(workflow.run())
        });

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                permit.release();
                warn!(trace_id = %trace_id, error = %e, "Workflow spawn failed");
                return Err(DispatchError::actor_crash(e.to_string()));
            }
        };
        let actor_id = child.id();

        let outcome = tokio::select! {
            biased;
            exit = &mut child => match exit {
                ChildExit::Completed(result) => result,
                ChildExit::Crashed(reason) => Err(DispatchError::ActorCrash(reason)),
                ChildExit::Aborted => Err(DispatchError::actor_crash("workflow aborted")),
            },
            _ = tokio::time::sleep(timeout) => {
                // best effort: stops further retries, the attempt in flight finishes on its own
                child.cancel();
                Err(DispatchError::Timeout)
            }
        };
        permit.release();

        debug!(
            trace_id = %trace_id,
            actor_id = %actor_id,
            outcome = outcome.as_ref().map_or_else(|e| e.reason(), |_| "ok"),
            "Submit finished"
        );
        outcome
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("in_flight", &self.admission.in_flight())
            .field("capacity", &self.admission.capacity())
            .field("defaults", &self.defaults)
            .field("policy", &self.policy.is_some())
            .finish()
    }
}
