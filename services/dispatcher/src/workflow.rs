//! # Workflow
//!
//! Per-request state machine, run as one supervised child:
//!
//! ```text
//! Init ──invalid──> Failed(invalid_envelope)
//!  │
//!  └─valid─> Running ──ok──> Succeeded
//!              │  ▲
//!              │  └── RetryScheduled <── error, retry_left > 0
//!              └──── error, retry_left == 0 ──> Failed(timeout | actor_crash)
//! ```
//!
//! Retries are immediate and strictly sequential. Cancellation is only
//! observed between attempts; an attempt in flight always runs to its own
//! timeout.

use crate::admission::guarded;
use crate::context::RequestContext;
use crate::engine::ProcessingEngine;
use crate::error::{DispatchError, DispatchResult, EngineError};
use crate::metrics::DispatchMetrics;
use crate::responses;
use crate::router;
use actors::ChildContext;
use codec::{Envelope, Response};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Init,
    Running,
    RetryScheduled,
    Succeeded,
    Failed(&'static str),
}

pub struct Workflow {
    child: ChildContext,
    ctx: RequestContext,
    envelope: Envelope,
    timeout: Duration,
    retry_left: u32,
    engine: Arc<dyn ProcessingEngine>,
    metrics: Arc<DispatchMetrics>,
    state: WorkflowState,
}

impl Workflow {
    pub fn new(
        child: ChildContext,
        envelope: Envelope,
        timeout: Duration,
        retry_max: u32,
        engine: Arc<dyn ProcessingEngine>,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        let ctx = RequestContext::new(envelope.trace_id, envelope.span_id, child.id);
        Self {
            child,
            ctx,
            envelope,
            timeout,
            retry_left: retry_max,
            engine,
            metrics,
            state: WorkflowState::Init,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Drive the request to exactly one terminal result
    pub async fn run(mut self) -> DispatchResult<Response> {
        let result = self.execute().await;
        match &result {
            Ok(_) => self.transition(WorkflowState::Succeeded),
            Err(e) => self.transition(WorkflowState::Failed(e.reason())),
        }
        result
    }

    async fn execute(&mut self) -> DispatchResult<Response> {
        let (method, path) = validate(&self.envelope)?;

        let hints = self.envelope.edge_hints;
        let engine = Arc::clone(&self.engine);
        let verdict = guarded("security", || engine.security(hints))?;
        let lane = guarded("pick_lane", || {
            Ok::<_, Infallible>(router::pick_lane(&path, &method))
        })?;
        self.ctx.lane = Some(lane);

        if verdict.waf {
            info!(trace_id = %self.ctx.trace_hex(), path = %path, "Request blocked by WAF hint");
            return Ok(responses::waf_blocked());
        }
        if verdict.ratelimit {
            info!(trace_id = %self.ctx.trace_hex(), path = %path, "Request rate limited by edge hint");
            return Ok(responses::rate_limited());
        }

        self.transition(WorkflowState::Running);
        loop {
            self.ctx.attempt += 1;
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.timeout,
                self.engine.process_request(&self.ctx, &self.envelope),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(EngineError::Timeout),
            };
            let latency = started.elapsed();
            self.metrics.record_attempt(latency);

            let error = match outcome {
                Ok(response) => {
                    debug!(
                        trace_id = %self.ctx.trace_hex(),
                        actor_id = %self.ctx.actor_id,
                        lane = %lane,
                        attempt = self.ctx.attempt,
                        latency_us = latency.as_micros() as u64,
                        status = response.status,
                        "Engine attempt succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => e,
            };

            warn!(
                trace_id = %self.ctx.trace_hex(),
                actor_id = %self.ctx.actor_id,
                lane = %lane,
                attempt = self.ctx.attempt,
                latency_us = latency.as_micros() as u64,
                retry_left = self.retry_left,
                error = %error,
                "Engine attempt failed"
            );

            let terminal = if error.is_timeout() {
                DispatchError::Timeout
            } else {
                DispatchError::ActorCrash(error.to_string())
            };

            if self.retry_left == 0 {
                return Err(terminal);
            }
            if self.child.is_cancelled() {
                debug!(trace_id = %self.ctx.trace_hex(), "Cancelled, no further attempts");
                return Err(terminal);
            }

            self.retry_left -= 1;
            DispatchMetrics::incr(&self.metrics.retries);
            self.transition(WorkflowState::RetryScheduled);
            self.transition(WorkflowState::Running);
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        debug!(
            trace_id = %self.ctx.trace_hex(),
            actor_id = %self.ctx.actor_id,
            from = ?self.state,
            to = ?next,
            "Workflow transition"
        );
        self.state = next;
    }
}

/// Method and path must be non-empty UTF-8; headers must be UTF-8
fn validate(envelope: &Envelope) -> DispatchResult<(String, String)> {
    let method = envelope
        .method_str()
        .ok_or_else(|| DispatchError::invalid_envelope("method is not valid UTF-8"))?;
    let path = envelope
        .path_str()
        .ok_or_else(|| DispatchError::invalid_envelope("path is not valid UTF-8"))?;
    if envelope.headers_str().is_none() {
        return Err(DispatchError::invalid_envelope("headers are not valid UTF-8"));
    }
    if method.is_empty() {
        return Err(DispatchError::invalid_envelope("method is empty"));
    }
    if path.is_empty() {
        return Err(DispatchError::invalid_envelope("path is empty"));
    }
    Ok((method.to_owned(), path.to_owned()))
}
