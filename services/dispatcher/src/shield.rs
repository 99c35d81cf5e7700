//! # DDoS Shield
//!
//! Per-client token buckets consulted before admission. Refill happens in
//! whole seconds: a bucket's timestamp only moves once at least one full
//! second has elapsed, so fractional time carries over to the next check.
//! Checks for one client serialize on that client's map shard.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShieldDecision {
    Ok,
    Limited,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u64,
    last_refill: Instant,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct DdosShield {
    capacity: u64,
    refill_per_sec: u64,
    buckets: DashMap<String, Bucket>,
}

impl DdosShield {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity: capacity as u64,
            refill_per_sec: refill_per_sec as u64,
            buckets: DashMap::new(),
        }
    }

    /// Take one token for `remote`; `Limited` leaves the bucket untouched
    pub fn check(&self, remote: &str) -> ShieldDecision {
        let now = Instant::now();
        let capacity = self.capacity;

        let mut bucket = self
            .buckets
            .entry(remote.to_owned())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: now,
                last_seen: now,
            });

        let elapsed_secs = now.duration_since(bucket.last_refill).as_secs();
        if elapsed_secs > 0 {
            bucket.tokens = capacity.min(
                bucket
                    .tokens
                    .saturating_add(elapsed_secs.saturating_mul(self.refill_per_sec)),
            );
            bucket.last_refill = now;
        }
        bucket.last_seen = now;

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            ShieldDecision::Ok
        } else {
            ShieldDecision::Limited
        }
    }

    /// Drop buckets not consulted for longer than `max_idle`
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_seen) <= max_idle);
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!(evicted, tracked = self.buckets.len(), "Pruned idle shield buckets");
        }
        evicted
    }

    /// Number of tracked clients
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_exhausts_then_refills() {
        let shield = DdosShield::new(3, 1);

        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        assert_eq!(shield.check("a"), ShieldDecision::Limited);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        assert_eq!(shield.check("a"), ShieldDecision::Limited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_seconds_do_not_refill() {
        let shield = DdosShield::new(1, 10);

        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(shield.check("a"), ShieldDecision::Limited);
        // the 900ms are not lost: the timestamp did not move
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(shield.check("a"), ShieldDecision::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_capped_at_capacity() {
        let shield = DdosShield::new(2, 50);

        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        assert_eq!(shield.check("a"), ShieldDecision::Limited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let shield = DdosShield::new(1, 1);

        assert_eq!(shield.check("a"), ShieldDecision::Ok);
        assert_eq!(shield.check("a"), ShieldDecision::Limited);
        assert_eq!(shield.check("b"), ShieldDecision::Ok);
        assert_eq!(shield.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle() {
        let shield = DdosShield::new(5, 1);
        shield.check("old");
        tokio::time::advance(Duration::from_secs(120)).await;
        shield.check("fresh");

        assert_eq!(shield.prune_idle(Duration::from_secs(60)), 1);
        assert_eq!(shield.len(), 1);
    }
}
