//! Dispatch error taxonomy
//!
//! Every terminal failure of a request maps to one coarse reason tag. Only
//! the tag ever reaches the wire; details stay in logs.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Envelope failed validation; never retried
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Retry budget exhausted on timeouts, or the submit deadline passed
    #[error("request timed out")]
    Timeout,

    /// Engine failures exhausted the retry budget, or the workflow died
    #[error("actor crash: {0}")]
    ActorCrash(String),

    /// Admission capacity reached; nothing was spawned
    #[error("dispatcher busy")]
    Busy,

    /// The resilience gate is holding requests back
    #[error("dispatch quarantined")]
    Quarantined,

    /// A guarded operation failed or panicked
    #[error("exception: {0}")]
    Exception(String),
}

impl DispatchError {
    /// Coarse reason tag written into 502 frames
    pub fn reason(&self) -> &'static str {
        match self {
            DispatchError::InvalidEnvelope(_) => "invalid_envelope",
            DispatchError::Timeout => "timeout",
            DispatchError::ActorCrash(_) => "actor_crash",
            DispatchError::Busy => "busy",
            DispatchError::Quarantined => "quarantined",
            DispatchError::Exception(_) => "exception",
        }
    }

    pub fn invalid_envelope(reason: impl Into<String>) -> Self {
        DispatchError::InvalidEnvelope(reason.into())
    }

    pub fn actor_crash(reason: impl Into<String>) -> Self {
        DispatchError::ActorCrash(reason.into())
    }
}

/// Failures reported by a processing engine call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine call timed out")]
    Timeout,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("core error: {0}")]
    CoreError(String),
}

impl EngineError {
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Timeout => "timeout",
            EngineError::BackendUnavailable(_) => "backend_unavailable",
            EngineError::CoreError(_) => "core_error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => EngineError::Timeout,
            std::io::ErrorKind::NotFound
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::PermissionDenied => {
                EngineError::BackendUnavailable(e.to_string())
            }
            _ => EngineError::CoreError(e.to_string()),
        }
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_tags() {
        assert_eq!(DispatchError::Busy.reason(), "busy");
        assert_eq!(DispatchError::actor_crash("x").reason(), "actor_crash");
        assert_eq!(DispatchError::invalid_envelope("x").reason(), "invalid_envelope");
        assert_eq!(
            EngineError::BackendUnavailable("gone".into()).reason(),
            "backend_unavailable"
        );
    }

    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(matches!(
            EngineError::from(refused),
            EngineError::BackendUnavailable(_)
        ));
        let timed_out = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert!(EngineError::from(timed_out).is_timeout());
    }
}
