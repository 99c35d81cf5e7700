//! # Processing Engine
//!
//! The dispatcher talks to the backend through [`ProcessingEngine`]. The
//! production implementation, [`SocketEngine`], forwards each envelope to a
//! backend process over a Unix socket with the same frames the edge uses:
//! one request frame out, write side closed, one response frame back.
//!
//! Backends are registered as workers in an [`ActorPool`]; every call picks
//! the next backend round-robin.

use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::router::{self, SecurityVerdict};
use actors::{ActorId, ActorPool};
use async_trait::async_trait;
use codec::{decode_response, encode_request, Envelope, Response};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

#[async_trait]
pub trait ProcessingEngine: Send + Sync + 'static {
    async fn process_request(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
    ) -> EngineResult<Response>;

    /// Verdict for the edge hints; defaults to the router's bit mapping
    fn security(&self, edge_hints: u32) -> EngineResult<SecurityVerdict> {
        Ok(router::security(edge_hints))
    }
}

/// One backend process reachable over a Unix socket
#[derive(Debug, Clone)]
pub struct BackendWorker {
    pub id: ActorId,
    pub socket_path: Arc<PathBuf>,
    calls: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl BackendWorker {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            id: ActorId::new(),
            socket_path: Arc::new(socket_path.into()),
            calls: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

pub struct SocketEngine {
    backends: ActorPool<BackendWorker>,
    connect_timeout: Duration,
    max_response_bytes: usize,
}

impl SocketEngine {
    pub fn new<P: AsRef<Path>>(
        socket_paths: &[P],
        connect_timeout: Duration,
        max_response_bytes: usize,
    ) -> Self {
        let backends = ActorPool::new();
        for path in socket_paths {
            let worker = BackendWorker::new(path.as_ref());
            debug!(
                worker = %worker.id,
                socket = %path.as_ref().display(),
                "Registered engine backend"
            );
            backends.register(worker);
        }
        Self {
            backends,
            connect_timeout,
            max_response_bytes,
        }
    }

    pub fn backends(&self) -> Vec<BackendWorker> {
        self.backends.workers()
    }

    async fn round_trip(&self, worker: &BackendWorker, envelope: &Envelope) -> EngineResult<Response> {
        let mut stream = tokio::time::timeout(
            self.connect_timeout,
            UnixStream::connect(worker.socket_path.as_path()),
        )
        .await
        .map_err(|_| EngineError::BackendUnavailable("connect timed out".to_string()))?
        .map_err(|e| EngineError::BackendUnavailable(e.to_string()))?;

        stream.write_all(&encode_request(envelope)).await?;
        stream.shutdown().await?;

        let mut frame = Vec::with_capacity(4096);
        (&mut stream)
            .take(self.max_response_bytes as u64 + 1)
            .read_to_end(&mut frame)
            .await?;
        if frame.len() > self.max_response_bytes {
            return Err(EngineError::CoreError(format!(
                "response exceeds {} bytes",
                self.max_response_bytes
            )));
        }

        decode_response(&frame).map_err(|e| EngineError::CoreError(e.to_string()))
    }
}

#[async_trait]
impl ProcessingEngine for SocketEngine {
    async fn process_request(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
    ) -> EngineResult<Response> {
        let worker = self
            .backends
            .pick()
            .map_err(|e| EngineError::BackendUnavailable(e.to_string()))?;
        worker.calls.fetch_add(1, Ordering::Relaxed);

        let result = self.round_trip(&worker, envelope).await;
        if let Err(e) = &result {
            worker.failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                trace_id = %ctx.trace_hex(),
                actor_id = %ctx.actor_id,
                attempt = ctx.attempt,
                backend = %worker.socket_path.display(),
                error = %e,
                "Engine call failed"
            );
        }
        result
    }
}
