//! # Event Multiplexer
//!
//! Fixed set of event lanes, each drained by its own task. A lane handles one
//! event per tick and yields between ticks, so a busy lane cannot starve the
//! rest of the runtime. Within a lane events are handled strictly in FIFO
//! order; an empty lane parks until the next enqueue.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultiplexerError {
    #[error("lane count must be positive")]
    NoLanes,

    #[error("lane {lane} out of range (lanes: {lanes})")]
    LaneOutOfRange { lane: usize, lanes: usize },

    #[error("lane {0} is closed")]
    LaneClosed(usize),
}

/// Handles events popped off a lane
#[async_trait]
pub trait EventHandler<E>: Send + Sync + 'static {
    async fn handle(&self, lane: usize, event: E);
}

struct Lane<E> {
    sender: mpsc::UnboundedSender<E>,
    processed: Arc<AtomicU64>,
}

pub struct EventMultiplexer<E> {
    lanes: Vec<Lane<E>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: Send + 'static> EventMultiplexer<E> {
    /// Start `lanes` lane tasks on the current runtime
    pub fn start<H>(lanes: usize, handler: Arc<H>) -> Result<Self, MultiplexerError>
    where
        H: EventHandler<E>,
    {
        if lanes == 0 {
            return Err(MultiplexerError::NoLanes);
        }

        let mut lane_handles = Vec::with_capacity(lanes);
        let mut tasks = Vec::with_capacity(lanes);

        for lane in 0..lanes {
            let (sender, receiver) = mpsc::unbounded_channel();
            let processed = Arc::new(AtomicU64::new(0));
            tasks.push(tokio::spawn(drain_lane(
                lane,
                receiver,
                Arc::clone(&handler),
                Arc::clone(&processed),
            )));
            lane_handles.push(Lane { sender, processed });
        }

        info!(lanes, "Event multiplexer started");

        Ok(Self {
            lanes: lane_handles,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Stable lane for a key, e.g. a client identity
    pub fn lane_for<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }

    pub fn enqueue(&self, lane: usize, event: E) -> Result<(), MultiplexerError> {
        let target = self.lanes.get(lane).ok_or(MultiplexerError::LaneOutOfRange {
            lane,
            lanes: self.lanes.len(),
        })?;
        target
            .sender
            .send(event)
            .map_err(|_| MultiplexerError::LaneClosed(lane))
    }

    /// Events handled so far on `lane`
    pub fn processed(&self, lane: usize) -> u64 {
        self.lanes
            .get(lane)
            .map(|l| l.processed.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Close every lane and wait for queued events to drain
    pub async fn shutdown(self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        drop(self.lanes);
        for task in tasks {
            let _ = task.await;
        }
        info!("Event multiplexer stopped");
    }
}

async fn drain_lane<E, H>(
    lane: usize,
    mut receiver: mpsc::UnboundedReceiver<E>,
    handler: Arc<H>,
    processed: Arc<AtomicU64>,
) where
    H: EventHandler<E>,
{
    debug!(lane, "Lane started");
    while let Some(event) = receiver.recv().await {
        handler.handle(lane, event).await;
        processed.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }
    debug!(lane, "Lane closed");
}
