//! Per-request correlation context

use crate::router::Lane;
use actors::ActorId;

/// Correlation data threaded from the workflow into every engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub trace_id: u64,
    pub span_id: u64,
    /// Workflow task handling the request
    pub actor_id: ActorId,
    /// Set once the router has picked a lane
    pub lane: Option<Lane>,
    /// 1-based engine attempt, 0 before the first call
    pub attempt: u32,
}

impl RequestContext {
    pub fn new(trace_id: u64, span_id: u64, actor_id: ActorId) -> Self {
        Self {
            trace_id,
            span_id,
            actor_id,
            lane: None,
            attempt: 0,
        }
    }

    /// Trace id as the 16-digit hex string used in logs
    pub fn trace_hex(&self) -> String {
        trace_hex(self.trace_id)
    }
}

pub fn trace_hex(trace_id: u64) -> String {
    hex::encode(trace_id.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_hex_is_fixed_width() {
        let ctx = RequestContext::new(0xAB, 1, ActorId::new());
        assert_eq!(ctx.trace_hex(), "00000000000000ab");
        assert_eq!(ctx.attempt, 0);
        assert!(ctx.lane.is_none());
    }
}
