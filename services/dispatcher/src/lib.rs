//! # Dispatcher
//!
//! Request-dispatch tier between the edge gateway and the processing engine.
//! Accepts one binary request frame per Unix socket connection, applies
//! per-client rate limiting and a global admission bound, runs each request
//! as a supervised workflow with retries, and writes one response frame back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌───────────┐   ┌────────────────────┐
//! │ Connection  │──▶│  Shield  │──▶│  Manager  │──▶│ Workflow (child)   │
//! │ Handler     │   │  bucket  │   │ admission │   │ router + engine    │
//! └─────────────┘   └──────────┘   └─────┬─────┘   └─────────┬──────────┘
//!        ▲                               │ select            │ retries
//!        │                               ▼                   ▼
//!        └──────── Response ◀── result | crash | timeout ◀───┘
//! ```
//!
//! Optional pieces: event lanes between the handler and the manager, and a
//! resilience gate that quarantines dispatch after repeated failures.

pub mod admission;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod resilience;
pub mod responses;
pub mod router;
pub mod server;
pub mod shield;
pub mod workflow;

pub use admission::{guarded, AdmissionPermit, AdmissionQueue};
pub use context::RequestContext;
pub use engine::{BackendWorker, ProcessingEngine, SocketEngine};
pub use error::{DispatchError, DispatchResult, EngineError, EngineResult};
pub use events::{DispatchEvent, ManagerEventHandler, Submitter};
pub use manager::{AdmissionPolicy, Manager, SubmitOptions};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use resilience::{ResilienceConfig, ResilienceGuard, ResilienceSnapshot, ShedTarget};
pub use router::{pick_lane, security, Lane, SecurityVerdict};
pub use server::{client_identity, socket_engine, ConnectionHandler, DispatchService};
pub use shield::{DdosShield, ShieldDecision};
pub use workflow::{Workflow, WorkflowState};
