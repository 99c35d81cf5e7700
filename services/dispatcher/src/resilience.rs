//! # Resilience Guard
//!
//! Counts failures and timeouts over a fixed window. Crossing either
//! threshold quarantines dispatch for a fixed period. Attached to the
//! [`Manager`](crate::manager::Manager) as its admission policy when enabled.
//!
//! ```text
//! OPEN ──failures ≥ F or timeouts ≥ T──> QUARANTINED ──quarantine elapsed──> OPEN
//! ```

use crate::error::DispatchError;
use crate::manager::AdmissionPolicy;
use codec::Response;
use dispatch_config::ResilienceSettings;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub window: Duration,
    pub failure_threshold: u32,
    pub timeout_threshold: u32,
    pub quarantine: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            failure_threshold: 5,
            timeout_threshold: 3,
            quarantine: Duration::from_secs(30),
        }
    }
}

impl From<&ResilienceSettings> for ResilienceConfig {
    fn from(settings: &ResilienceSettings) -> Self {
        Self {
            window: settings.window(),
            failure_threshold: settings.failure_threshold,
            timeout_threshold: settings.timeout_threshold,
            quarantine: settings.quarantine(),
        }
    }
}

/// Subsystem to shed under sustained pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShedTarget {
    Gpu,
    Compression,
    Inference,
}

impl fmt::Display for ShedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShedTarget::Gpu => "gpu",
            ShedTarget::Compression => "compression",
            ShedTarget::Inference => "inference",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ResilienceState {
    failures: u32,
    timeouts: u32,
    window_start: Instant,
    quarantined_until: Option<Instant>,
}

impl ResilienceState {
    fn rotate_if_expired(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) > window {
            self.failures = 0;
            self.timeouts = 0;
            self.window_start = now;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResilienceSnapshot {
    pub failures: u32,
    pub timeouts: u32,
    pub quarantined: bool,
    pub shed: Option<ShedTarget>,
}

#[derive(Debug)]
pub struct ResilienceGuard {
    config: ResilienceConfig,
    state: Mutex<ResilienceState>,
}

impl ResilienceGuard {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ResilienceState {
                failures: 0,
                timeouts: 0,
                window_start: Instant::now(),
                quarantined_until: None,
            }),
        }
    }

    pub fn record_failure(&self) {
        self.record(|state| state.failures += 1);
    }

    pub fn record_timeout(&self) {
        self.record(|state| state.timeouts += 1);
    }

    fn record(&self, bump: impl FnOnce(&mut ResilienceState)) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.rotate_if_expired(now, self.config.window);
        bump(&mut state);

        if state.failures >= self.config.failure_threshold
            || state.timeouts >= self.config.timeout_threshold
        {
            let until = now + self.config.quarantine;
            if state.quarantined_until.map_or(true, |prev| prev <= now) {
                warn!(
                    failures = state.failures,
                    timeouts = state.timeouts,
                    quarantine_secs = self.config.quarantine.as_secs(),
                    "Dispatch quarantined"
                );
            }
            state.quarantined_until = Some(until);
        }
    }

    pub fn allowed(&self) -> bool {
        let state = self.state.lock();
        match state.quarantined_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// Counts in the current window; an expired window reads as empty
    fn current_counts(&self) -> (u32, u32) {
        let state = self.state.lock();
        if Instant::now().duration_since(state.window_start) > self.config.window {
            (0, 0)
        } else {
            (state.failures, state.timeouts)
        }
    }

    pub fn backpressure_signal(&self) -> Option<ShedTarget> {
        let (failures, timeouts) = self.current_counts();
        let failures_breached = failures >= self.config.failure_threshold;
        let timeouts_breached = timeouts >= self.config.timeout_threshold;

        match (failures_breached, timeouts_breached) {
            (true, true) => Some(ShedTarget::Gpu),
            (false, true) => Some(ShedTarget::Compression),
            (true, false) => Some(ShedTarget::Inference),
            (false, false) => None,
        }
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        let (failures, timeouts) = self.current_counts();
        ResilienceSnapshot {
            failures,
            timeouts,
            quarantined: !self.allowed(),
            shed: self.backpressure_signal(),
        }
    }
}

impl AdmissionPolicy for ResilienceGuard {
    fn allowed(&self) -> bool {
        ResilienceGuard::allowed(self)
    }

    fn record_outcome(&self, outcome: &Result<Response, DispatchError>) {
        match outcome {
            Err(DispatchError::Timeout) => self.record_timeout(),
            Err(DispatchError::ActorCrash(_)) | Err(DispatchError::Exception(_)) => {
                self.record_failure()
            }
            _ => {}
        }
    }
}
