//! Dispatch events carried on the multiplexer lanes

use crate::context::trace_hex;
use crate::error::{DispatchError, DispatchResult};
use crate::manager::{Manager, SubmitOptions};
use actors::{EventHandler, EventMultiplexer};
use async_trait::async_trait;
use codec::{Envelope, Response};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum DispatchEvent {
    SubmitRequest {
        envelope: Envelope,
        options: SubmitOptions,
        reply: oneshot::Sender<DispatchResult<Response>>,
    },
    /// Informational note; logged and dropped
    Telemetry { note: String },
}

/// Routes lane events into the [`Manager`]
pub struct ManagerEventHandler {
    manager: Arc<Manager>,
}

impl ManagerEventHandler {
    pub fn new(manager: Arc<Manager>) -> Arc<Self> {
        Arc::new(Self { manager })
    }
}

#[async_trait]
impl EventHandler<DispatchEvent> for ManagerEventHandler {
    async fn handle(&self, lane: usize, event: DispatchEvent) {
        match event {
            DispatchEvent::SubmitRequest {
                envelope,
                options,
                reply,
            } => {
                debug!(lane, trace_id = %trace_hex(envelope.trace_id), "Submitting from lane");
                // The lane hands the request off and moves on; ordering is
                // preserved up to the point of submission.
                let manager = Arc::clone(&self.manager);
                tokio::spawn(async move {
                    let outcome = manager.submit(envelope, options).await;
                    if reply.send(outcome).is_err() {
                        warn!(lane, "Submitter went away before the reply");
                    }
                });
            }
            DispatchEvent::Telemetry { note } => {
                info!(lane, note = %note, "Lane telemetry");
            }
        }
    }
}

/// How the connection handler reaches the manager
#[derive(Clone)]
pub enum Submitter {
    Direct(Arc<Manager>),
    Lanes {
        lanes: Arc<EventMultiplexer<DispatchEvent>>,
        defaults: SubmitOptions,
    },
}

impl Submitter {
    pub fn lanes(manager: &Arc<Manager>, lane_count: usize) -> Result<Self, actors::MultiplexerError> {
        let defaults = manager.defaults();
        let lanes = EventMultiplexer::start(lane_count, ManagerEventHandler::new(Arc::clone(manager)))?;
        Ok(Submitter::Lanes {
            lanes: Arc::new(lanes),
            defaults,
        })
    }

    /// Submit with default options. `key` picks the lane (client identity).
    pub async fn submit(&self, key: &str, envelope: Envelope) -> DispatchResult<Response> {
        match self {
            Submitter::Direct(manager) => manager.submit(envelope, manager.defaults()).await,
            Submitter::Lanes { lanes, defaults } => {
                let (reply, response) = oneshot::channel();
                let lane = lanes.lane_for(key);
                lanes
                    .enqueue(
                        lane,
                        DispatchEvent::SubmitRequest {
                            envelope,
                            options: *defaults,
                            reply,
                        },
                    )
                    .map_err(|e| DispatchError::actor_crash(e.to_string()))?;
                response
                    .await
                    .map_err(|_| DispatchError::actor_crash("lane dropped the request"))?
            }
        }
    }
}
