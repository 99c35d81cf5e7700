//! Dispatch counters
//!
//! Relaxed atomics updated on the request path; [`DispatchMetrics::snapshot`]
//! produces a serializable copy for the periodic stats log.

use crate::error::DispatchError;
use codec::Response;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub connections: AtomicU64,
    pub read_failures: AtomicU64,
    pub write_failures: AtomicU64,
    pub invalid_frames: AtomicU64,
    pub shield_rejections: AtomicU64,

    pub admitted: AtomicU64,
    pub busy: AtomicU64,
    pub quarantined: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed_invalid_envelope: AtomicU64,
    pub failed_timeout: AtomicU64,
    pub failed_actor_crash: AtomicU64,
    pub failed_exception: AtomicU64,

    pub engine_attempts: AtomicU64,
    pub retries: AtomicU64,
    pub engine_latency_us_total: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections: u64,
    pub read_failures: u64,
    pub write_failures: u64,
    pub invalid_frames: u64,
    pub shield_rejections: u64,
    pub admitted: u64,
    pub busy: u64,
    pub quarantined: u64,
    pub succeeded: u64,
    pub failed_invalid_envelope: u64,
    pub failed_timeout: u64,
    pub failed_actor_crash: u64,
    pub failed_exception: u64,
    pub engine_attempts: u64,
    pub retries: u64,
    pub avg_engine_latency_us: u64,
}

impl DispatchMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self, latency: Duration) {
        self.engine_attempts.fetch_add(1, Ordering::Relaxed);
        self.engine_latency_us_total
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Count a terminal submit outcome. `busy` and `quarantined` are counted
    /// where they are decided.
    pub fn record_outcome(&self, outcome: &Result<Response, DispatchError>) {
        let counter = match outcome {
            Ok(_) => &self.succeeded,
            Err(DispatchError::InvalidEnvelope(_)) => &self.failed_invalid_envelope,
            Err(DispatchError::Timeout) => &self.failed_timeout,
            Err(DispatchError::ActorCrash(_)) => &self.failed_actor_crash,
            Err(DispatchError::Exception(_)) => &self.failed_exception,
            Err(DispatchError::Busy) | Err(DispatchError::Quarantined) => return,
        };
        Self::incr(counter);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let attempts = load(&self.engine_attempts);
        let avg_engine_latency_us = if attempts == 0 {
            0
        } else {
            load(&self.engine_latency_us_total) / attempts
        };

        MetricsSnapshot {
            connections: load(&self.connections),
            read_failures: load(&self.read_failures),
            write_failures: load(&self.write_failures),
            invalid_frames: load(&self.invalid_frames),
            shield_rejections: load(&self.shield_rejections),
            admitted: load(&self.admitted),
            busy: load(&self.busy),
            quarantined: load(&self.quarantined),
            succeeded: load(&self.succeeded),
            failed_invalid_envelope: load(&self.failed_invalid_envelope),
            failed_timeout: load(&self.failed_timeout),
            failed_actor_crash: load(&self.failed_actor_crash),
            failed_exception: load(&self.failed_exception),
            engine_attempts: attempts,
            retries: load(&self.retries),
            avg_engine_latency_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_and_latency() {
        let metrics = DispatchMetrics::default();
        metrics.record_outcome(&Ok(Response::new(200)));
        metrics.record_outcome(&Err(DispatchError::Timeout));
        metrics.record_outcome(&Err(DispatchError::Busy));
        metrics.record_attempt(Duration::from_micros(100));
        metrics.record_attempt(Duration::from_micros(300));

        let snap = metrics.snapshot();
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.failed_timeout, 1);
        assert_eq!(snap.busy, 0);
        assert_eq!(snap.engine_attempts, 2);
        assert_eq!(snap.avg_engine_latency_us, 200);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(DispatchMetrics::default().snapshot()).unwrap();
        assert_eq!(json["succeeded"], 0);
    }
}
