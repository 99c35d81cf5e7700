//! # Admission Queue
//!
//! Global bound on in-flight requests. A successful [`AdmissionQueue::offer`]
//! hands out an [`AdmissionPermit`] that gives its slot back exactly once,
//! either through [`AdmissionPermit::release`] or on drop.

use crate::error::{DispatchError, DispatchResult};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
pub struct AdmissionQueue {
    in_flight: AtomicUsize,
    max: usize,
}

impl AdmissionQueue {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            max,
        })
    }

    /// Claim a slot, or `Busy` when the queue is at capacity
    pub fn offer(self: &Arc<Self>) -> DispatchResult<AdmissionPermit> {
        let count = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        if count > self.max {
            self.release_slot();
            return Err(DispatchError::Busy);
        }
        Ok(AdmissionPermit {
            queue: Some(Arc::clone(self)),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.max
    }

    /// Decrement floored at zero
    fn release_slot(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// One admitted request's claim on the queue
pub struct AdmissionPermit {
    queue: Option<Arc<AdmissionQueue>>,
}

impl AdmissionPermit {
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.release_slot();
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("held", &self.queue.is_some())
            .finish()
    }
}

/// Run a fallible operation, turning an error or a panic into
/// [`DispatchError::Exception`]
pub fn guarded<T, E, F>(operation: &'static str, f: F) -> DispatchResult<T>
where
    F: FnOnce() -> Result<T, E>,
    E: fmt::Display,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(operation, error = %e, "Guarded operation failed");
            Err(DispatchError::Exception(format!("{}: {}", operation, e)))
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            warn!(operation, reason = %reason, "Guarded operation panicked");
            Err(DispatchError::Exception(format!("{}: {}", operation, reason)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn test_offer_until_busy() {
        let queue = AdmissionQueue::new(2);
        let a = queue.offer().unwrap();
        let _b = queue.offer().unwrap();

        assert_eq!(queue.offer().unwrap_err(), DispatchError::Busy);
        // rejected offers leave the counter where it was
        assert_eq!(queue.in_flight(), 2);

        a.release();
        assert_eq!(queue.in_flight(), 1);
        assert!(queue.offer().is_ok());
    }

    #[test]
    fn test_drop_releases_once() {
        let queue = AdmissionQueue::new(1);
        {
            let _permit = queue.offer().unwrap();
            assert_eq!(queue.in_flight(), 1);
        }
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_release_floors_at_zero() {
        let queue = AdmissionQueue::new(1);
        queue.release_slot();
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_offers_respect_capacity() {
        let queue = AdmissionQueue::new(8);
        let permits: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..32)
                .map(|_| s.spawn(|| queue.offer().ok()))
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(permits.len(), 8);
        assert_eq!(queue.in_flight(), 8);
        drop(permits);
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_guarded_passes_values_through() {
        let value = guarded("pick_lane", || Ok::<_, Infallible>(5)).unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn test_guarded_converts_errors_and_panics() {
        let err = guarded("security", || Err::<(), _>("bad hints")).unwrap_err();
        assert_eq!(err, DispatchError::Exception("security: bad hints".into()));

        let err = guarded("security", || -> Result<(), Infallible> { panic!("boom") })
            .unwrap_err();
        assert_eq!(err.reason(), "exception");
    }
}
