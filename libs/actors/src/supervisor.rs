//! # Supervisor
//!
//! Runs short-lived child tasks (one per request) in isolation. A child that
//! panics is contained: its [`ChildHandle`] resolves to [`ChildExit::Crashed`]
//! and nothing else is affected. Children are never restarted.
//!
//! Spawn failures (a failing init closure, no runtime) are counted in a
//! sliding intensity window. When more than `max_spawn_failures` land within
//! `window`, the supervisor halts: every later spawn fails with
//! [`SupervisorError::Halted`] and [`Supervisor::wait_halted`] resolves so the
//! owning service can shut down.

use crate::registry::ActorId;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("supervisor '{0}' halted after exceeding spawn failure intensity")]
    Halted(String),

    #[error("child init failed: {0}")]
    InitFailed(String),

    #[error("no async runtime available to spawn on")]
    NoRuntime,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_spawn_failures: u32,
    pub window: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_spawn_failures: 100,
            window: Duration::from_secs(5),
        }
    }
}

/// Identity and cancellation handed to a child's init closure
#[derive(Debug, Clone)]
pub struct ChildContext {
    pub id: ActorId,
    pub cancel: CancellationToken,
}

impl ChildContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// How a child task ended
#[derive(Debug)]
pub enum ChildExit<T> {
    Completed(T),
    /// The child panicked; carries the panic message
    Crashed(String),
    /// The task was aborted or its runtime shut down
    Aborted,
}

/// Monitor for a spawned child. Awaiting it yields the child's exit.
#[derive(Debug)]
pub struct ChildHandle<T> {
    id: ActorId,
    cancel: CancellationToken,
    join: JoinHandle<ChildExit<T>>,
}

impl<T> ChildHandle<T> {
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Request cooperative cancellation; the child observes it at its own pace
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Hard stop, used only on service shutdown
    pub fn abort(&self) {
        self.join.abort();
    }
}

impl<T> Future for ChildHandle<T> {
    type Output = ChildExit<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.join).poll(cx).map(|joined| match joined {
            Ok(exit) => exit,
            Err(e) if e.is_panic() => ChildExit::Crashed(panic_message(&*e.into_panic())),
            Err(_) => ChildExit::Aborted,
        })
    }
}

#[derive(Debug, Default)]
pub struct SupervisorStats {
    pub spawned: AtomicU64,
    pub live: AtomicU64,
    pub crashed: AtomicU64,
    pub spawn_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSnapshot {
    pub spawned: u64,
    pub live: u64,
    pub crashed: u64,
    pub spawn_failures: u64,
    pub halted: bool,
}

/// Failure counter over a fixed window that restarts once it expires
#[derive(Debug, Default)]
struct IntensityWindow {
    window_start: Option<Instant>,
    failures: u32,
}

impl IntensityWindow {
    /// Count one failure; false once the limit is exceeded within the window
    fn record(&mut self, now: Instant, config: &SupervisorConfig) -> bool {
        match self.window_start {
            Some(start) if now.duration_since(start) <= config.window => {}
            _ => {
                self.window_start = Some(now);
                self.failures = 0;
            }
        }
        self.failures += 1;
        self.failures <= config.max_spawn_failures
    }
}

struct SupervisorInner {
    name: String,
    config: SupervisorConfig,
    intensity: Mutex<IntensityWindow>,
    halted: watch::Sender<bool>,
    stats: SupervisorStats,
}

/// Decrements the live count when the child task ends, including by unwind
struct LiveGuard(Arc<SupervisorInner>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.stats.live.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, config: SupervisorConfig) -> Self {
        let (halted, _) = watch::channel(false);
        Self {
            inner: Arc::new(SupervisorInner {
                name: name.into(),
                config,
                intensity: Mutex::new(IntensityWindow::default()),
                halted,
                stats: SupervisorStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Spawn a child. `init` builds the child's future from its context and
    /// may fail, which counts against the spawn failure intensity.
    pub fn spawn<F, Fut, E>(&self, init: F) -> Result<ChildHandle<Fut::Output>, SupervisorError>
    where
        F: FnOnce(ChildContext) -> Result<Fut, E>,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
        E: fmt::Display,
    {
        if self.is_halted() {
            return Err(SupervisorError::Halted(self.inner.name.clone()));
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.record_spawn_failure("no runtime");
                return Err(SupervisorError::NoRuntime);
            }
        };

        let ctx = ChildContext {
            id: ActorId::new(),
            cancel: CancellationToken::new(),
        };
        let child = match init(ctx.clone()) {
            Ok(child) => child,
            Err(e) => {
                let reason = e.to_string();
                self.record_spawn_failure(&reason);
                return Err(SupervisorError::InitFailed(reason));
            }
        };

        self.inner.stats.spawned.fetch_add(1, Ordering::Relaxed);
        self.inner.stats.live.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let actor_id = ctx.id;
        let join = runtime.spawn(async move {
            let live = LiveGuard(inner);
            match AssertUnwindSafe(child).catch_unwind().await {
                Ok(output) => ChildExit::Completed(output),
                Err(payload) => {
                    let reason = panic_message(&*payload);
                    live.0.stats.crashed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        supervisor = %live.0.name,
                        actor_id = %actor_id,
                        reason = %reason,
                        "Supervised child crashed"
                    );
                    ChildExit::Crashed(reason)
                }
            }
        });

        debug!(supervisor = %self.inner.name, actor_id = %actor_id, "Spawned child");

        Ok(ChildHandle {
            id: actor_id,
            cancel: ctx.cancel,
            join,
        })
    }

    pub fn is_halted(&self) -> bool {
        *self.inner.halted.borrow()
    }

    /// Resolves once the supervisor has halted
    pub async fn wait_halted(&self) {
        let mut halted = self.inner.halted.subscribe();
        // The sender lives as long as `self`, so this only returns once halted
        let _ = halted.wait_for(|halted| *halted).await;
    }

    pub fn stats(&self) -> SupervisorSnapshot {
        let stats = &self.inner.stats;
        SupervisorSnapshot {
            spawned: stats.spawned.load(Ordering::Relaxed),
            live: stats.live.load(Ordering::Relaxed),
            crashed: stats.crashed.load(Ordering::Relaxed),
            spawn_failures: stats.spawn_failures.load(Ordering::Relaxed),
            halted: self.is_halted(),
        }
    }

    fn record_spawn_failure(&self, reason: &str) {
        self.inner.stats.spawn_failures.fetch_add(1, Ordering::Relaxed);

        let within_limits = self
            .inner
            .intensity
            .lock()
            .record(Instant::now(), &self.inner.config);

        if within_limits {
            warn!(supervisor = %self.inner.name, reason = %reason, "Child spawn failed");
            return;
        }

        if !self.inner.halted.send_replace(true) {
            error!(
                supervisor = %self.inner.name,
                max_failures = self.inner.config.max_spawn_failures,
                window_ms = self.inner.config.window.as_millis() as u64,
                reason = %reason,
                "Spawn failure intensity exceeded, halting supervisor"
            );
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
