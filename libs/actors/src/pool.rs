//! # Actor Pool
//!
//! Registry of long-lived workers with pluggable selection. Registration
//! appends (the same worker may be registered more than once to weight it);
//! `pick` is O(1) under a shared read lock.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no workers registered")]
    NoWorkers,
}

/// Strategy for choosing a worker out of the registered set
pub trait SelectionPolicy<W>: Send + Sync {
    /// Select a worker, `None` only when `workers` is empty
    fn select<'a>(&self, workers: &'a [W]) -> Option<&'a W>;

    fn name(&self) -> &'static str;
}

/// Cycles through workers in registration order
#[derive(Debug, Default)]
pub struct RoundRobin {
    next_index: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<W> SelectionPolicy<W> for RoundRobin {
    fn select<'a>(&self, workers: &'a [W]) -> Option<&'a W> {
        if workers.is_empty() {
            return None;
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed) % workers.len();
        workers.get(index)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

pub struct ActorPool<W> {
    workers: RwLock<Vec<W>>,
    policy: Box<dyn SelectionPolicy<W>>,
}

impl<W: Clone> ActorPool<W> {
    /// Pool with round-robin selection
    pub fn new() -> Self
    where
        W: 'static,
    {
        Self::with_policy(Box::new(RoundRobin::new()))
    }

    pub fn with_policy(policy: Box<dyn SelectionPolicy<W>>) -> Self {
        Self {
            workers: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub fn register(&self, worker: W) {
        let mut workers = self.workers.write();
        workers.push(worker);
        debug!(
            policy = self.policy.name(),
            workers = workers.len(),
            "Registered pool worker"
        );
    }

    pub fn pick(&self) -> Result<W, PoolError> {
        let workers = self.workers.read();
        self.policy
            .select(&workers)
            .cloned()
            .ok_or(PoolError::NoWorkers)
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Snapshot of the registered workers in registration order
    pub fn workers(&self) -> Vec<W> {
        self.workers.read().clone()
    }
}

impl<W: Clone + 'static> Default for ActorPool<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> std::fmt::Debug for ActorPool<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorPool")
            .field("workers", &self.workers.read().len())
            .field("policy", &self.policy.name())
            .finish()
    }
}
