//! Supervised Task Runtime
//!
//! Building blocks the dispatcher composes its request path from:
//! per-request children under a [`Supervisor`], long-lived workers in an
//! [`ActorPool`], and ordered event lanes in an [`EventMultiplexer`].
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   enqueue    ┌────────────────────┐
//! │  EventMultiplexer  │─────────────▶│  lane task (1..N)  │
//! └────────────────────┘              └─────────┬──────────┘
//!                                               │ handle
//!                                               ▼
//! ┌────────────────────┐    spawn     ┌────────────────────┐
//! │     Supervisor     │─────────────▶│  child (request)   │
//! │  intensity window  │◀─ ChildExit ─│  CancellationToken │
//! └────────────────────┘              └─────────┬──────────┘
//!                                               │ pick
//!                                               ▼
//!                                     ┌────────────────────┐
//!                                     │     ActorPool      │
//!                                     │  round-robin       │
//!                                     └────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust
//! use actors::{ChildExit, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let supervisor = Supervisor::new("requests", SupervisorConfig::default());
//! let child = supervisor
//!     .spawn(|ctx| Ok::<_, String>(async move { ctx.id.to_string() }))
//!     .unwrap();
//!
//! if let ChildExit::Completed(id) = child.await {
//!     assert!(id.starts_with("actor-"));
//! }
//! # }
//! ```

pub mod multiplexer;
pub mod pool;
pub mod registry;
pub mod supervisor;

pub use multiplexer::{EventHandler, EventMultiplexer, MultiplexerError};
pub use pool::{ActorPool, PoolError, RoundRobin, SelectionPolicy};
pub use registry::ActorId;
pub use supervisor::{
    ChildContext, ChildExit, ChildHandle, Supervisor, SupervisorConfig, SupervisorError,
    SupervisorSnapshot,
};
