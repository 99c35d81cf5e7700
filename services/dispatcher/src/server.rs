//! # Dispatch Server
//!
//! Unix socket listener and per-connection handling. Each connection carries
//! exactly one request frame (terminated by the peer's half-close) and gets
//! exactly one response frame back before it is closed.
//!
//! ```text
//! accept ─> read ─> decode ──invalid──> 400
//!                     │
//!                     └─> identity ─> shield ──limited──> 429
//!                                       │
//!                                       └─> submit ──ok──> engine response
//!                                                  └─err─> 502 <reason>
//! ```

use crate::admission::AdmissionQueue;
use crate::context::trace_hex;
use crate::engine::{ProcessingEngine, SocketEngine};
use crate::events::Submitter;
use crate::manager::{Manager, SubmitOptions};
use crate::metrics::DispatchMetrics;
use crate::resilience::{ResilienceConfig, ResilienceGuard};
use crate::responses;
use crate::shield::{DdosShield, ShieldDecision};
use actors::{MultiplexerError, Supervisor, SupervisorConfig};
use anyhow::{anyhow, Context, Result};
use codec::{decode_request, encode_response, Envelope, Response};
use dispatch_config::DispatchConfig;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Shield maintenance cadence when periodic stats logging is disabled
const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Build the production engine from configuration
pub fn socket_engine(config: &DispatchConfig) -> Arc<dyn ProcessingEngine> {
    Arc::new(SocketEngine::new(
        &config.engine.socket_paths,
        config.engine.connect_timeout(),
        config.server.max_frame_bytes,
    ))
}

/// Client identity used as the shield key and lane key.
///
/// Client headers reach us unchanged from the edge, so a header is only
/// consulted when `trusted_header` names one appended by a proxy we trust,
/// and then only its rightmost hop. Otherwise the connection's peer uid is
/// the identity.
pub fn client_identity(
    envelope: &Envelope,
    peer_uid: Option<u32>,
    trusted_header: Option<&str>,
) -> String {
    let proxied = trusted_header
        .and_then(|name| envelope.header(name))
        .and_then(|v| v.rsplit(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(client) = proxied {
        return client.to_string();
    }

    match peer_uid {
        Some(uid) => format!("uid:{}", uid),
        None => "unix".to_string(),
    }
}

/// Fields of one request kept for the access log
#[derive(Debug, Default)]
struct AccessEntry {
    method: String,
    path: String,
    hints: u32,
    trace_id: Option<u64>,
    remote: Option<String>,
}

impl AccessEntry {
    fn from_envelope(envelope: &Envelope, remote: &str) -> Self {
        Self {
            method: String::from_utf8_lossy(&envelope.method).into_owned(),
            path: String::from_utf8_lossy(&envelope.path).into_owned(),
            hints: envelope.edge_hints,
            trace_id: Some(envelope.trace_id),
            remote: Some(remote.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionHandler {
    shield: Arc<DdosShield>,
    submitter: Submitter,
    metrics: Arc<DispatchMetrics>,
    identity_header: Option<String>,
    max_frame_bytes: usize,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        shield: Arc<DdosShield>,
        submitter: Submitter,
        metrics: Arc<DispatchMetrics>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            shield,
            submitter,
            metrics,
            identity_header: config.shield.identity_header.clone(),
            max_frame_bytes: config.server.max_frame_bytes,
            read_timeout: config.server.read_timeout(),
            write_timeout: config.server.write_timeout(),
        }
    }

    pub async fn handle_unix(&self, stream: UnixStream) {
        let peer_uid = stream.peer_cred().ok().map(|cred| cred.uid());
        self.handle(stream, peer_uid).await;
    }

    /// Serve one request on `stream` and close it
    pub async fn handle<S>(&self, mut stream: S, peer_uid: Option<u32>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();
        DispatchMetrics::incr(&self.metrics.connections);

        let frame = match self.read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => {
                DispatchMetrics::incr(&self.metrics.read_failures);
                debug!(error = %e, "Connection read failed");
                return;
            }
        };

        let (response, entry) = self.respond(&frame, peer_uid).await;

        let write = async {
            stream.write_all(&encode_response(&response)).await?;
            stream.shutdown().await
        };
        let written = match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
        };
        if let Err(e) = written {
            DispatchMetrics::incr(&self.metrics.write_failures);
            warn!(error = %e, status = response.status, "Response write failed");
        }

        info!(
            method = %entry.method,
            path = %entry.path,
            status = response.status,
            body_len = response.body_len(),
            hints = entry.hints,
            duration_us = started.elapsed().as_micros() as u64,
            remote = entry.remote.as_deref().unwrap_or("-"),
            trace_id = %entry.trace_id.map(trace_hex).unwrap_or_default(),
            "access"
        );
    }

    /// Read until the peer half-closes. Frames over the limit come back with
    /// one extra byte so the caller can reject them.
    async fn read_frame<S>(&self, stream: &mut S) -> std::io::Result<Vec<u8>>
    where
        S: AsyncRead + Unpin,
    {
        let mut frame = Vec::with_capacity(8192);
        let limit = self.max_frame_bytes as u64 + 1;
        let read =
            tokio::time::timeout(self.read_timeout, stream.take(limit).read_to_end(&mut frame))
                .await;
        match read {
            Ok(Ok(_)) => Ok(frame),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
        }
    }

    async fn respond(&self, frame: &[u8], peer_uid: Option<u32>) -> (Response, AccessEntry) {
        if frame.len() > self.max_frame_bytes {
            DispatchMetrics::incr(&self.metrics.invalid_frames);
            warn!(limit = self.max_frame_bytes, "Request frame exceeds limit");
            return (responses::invalid_frame(), AccessEntry::default());
        }

        let mut envelope = match decode_request(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                DispatchMetrics::incr(&self.metrics.invalid_frames);
                warn!(error = %e, bytes = frame.len(), "Invalid request frame");
                return (responses::invalid_frame(), AccessEntry::default());
            }
        };

        let remote = client_identity(&envelope, peer_uid, self.identity_header.as_deref());
        let entry = AccessEntry::from_envelope(&envelope, &remote);

        if self.shield.check(&remote) == ShieldDecision::Limited {
            DispatchMetrics::incr(&self.metrics.shield_rejections);
            return (responses::shield_limited(), entry);
        }

        envelope.remote = Some(remote.clone());
        let response = match self.submitter.submit(&remote, envelope).await {
            Ok(response) => response,
            Err(e) => {
                debug!(
                    trace_id = %entry.trace_id.map(trace_hex).unwrap_or_default(),
                    error = %e,
                    "Dispatch failed"
                );
                responses::dispatch_failed(e.reason())
            }
        };
        (response, entry)
    }
}

/// Removes the listening socket file when the server stops
struct SocketFileGuard {
    path: PathBuf,
}

impl Drop for SocketFileGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn bind_listener(path: &Path) -> Result<(UnixListener, SocketFileGuard)> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create socket directory {}", parent.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind {}", path.display()))?;
    Ok((
        listener,
        SocketFileGuard {
            path: path.to_path_buf(),
        },
    ))
}

/// The assembled dispatch tier: shield, admission, supervisor, manager and
/// optional lanes and resilience gate
pub struct DispatchService {
    config: DispatchConfig,
    manager: Arc<Manager>,
    shield: Arc<DdosShield>,
    guard: Option<Arc<ResilienceGuard>>,
    submitter: Submitter,
    metrics: Arc<DispatchMetrics>,
}

impl DispatchService {
    /// Wire up the dispatch core. Starts the event lanes when enabled, so it
    /// must run inside a tokio runtime.
    pub fn new(
        config: DispatchConfig,
        engine: Arc<dyn ProcessingEngine>,
    ) -> std::result::Result<Self, MultiplexerError> {
        let metrics = Arc::new(DispatchMetrics::default());
        let admission = AdmissionQueue::new(config.dispatch.admission_max);
        let supervisor = Supervisor::new(
            "workflows",
            SupervisorConfig {
                max_spawn_failures: config.supervisor.max_spawn_failures,
                window: config.supervisor.window(),
            },
        );

        let mut manager = Manager::new(
            admission,
            supervisor,
            engine,
            Arc::clone(&metrics),
            SubmitOptions::from(&config.dispatch),
        );

        let guard = if config.resilience.enabled {
            let guard = Arc::new(ResilienceGuard::new(ResilienceConfig::from(
                &config.resilience,
            )));
            manager = manager.with_policy(guard.clone());
            Some(guard)
        } else {
            None
        };
        let manager = Arc::new(manager);

        let submitter = if config.dispatch.event_lanes > 0 {
            Submitter::lanes(&manager, config.dispatch.event_lanes)?
        } else {
            Submitter::Direct(Arc::clone(&manager))
        };

        let shield = Arc::new(DdosShield::new(
            config.shield.capacity,
            config.shield.refill_per_sec,
        ));

        Ok(Self {
            config,
            manager,
            shield,
            guard,
            submitter,
            metrics,
        })
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn shield(&self) -> &Arc<DdosShield> {
        &self.shield
    }

    pub fn connection_handler(&self) -> ConnectionHandler {
        ConnectionHandler::new(
            Arc::clone(&self.shield),
            self.submitter.clone(),
            Arc::clone(&self.metrics),
            &self.config,
        )
    }

    /// Serve until `shutdown` resolves or the supervisor halts, then drain
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let socket_path = self.config.server.socket_path.clone();
        let (listener, _socket_file) = bind_listener(&socket_path)?;

        info!(
            socket = %socket_path.display(),
            admission_max = self.manager.admission().capacity(),
            event_lanes = self.config.dispatch.event_lanes,
            resilience = self.guard.is_some(),
            "Dispatcher listening"
        );

        let maintenance = self.spawn_maintenance_task();
        let handler = self.connection_handler();
        let supervisor = self.manager.supervisor().clone();
        let connections = TaskTracker::new();
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, draining connections");
                    break Ok(());
                }
                _ = supervisor.wait_halted() => {
                    error!("Workflow supervisor halted, shutting down");
                    break Err(anyhow!("supervisor '{}' halted", supervisor.name()));
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let handler = handler.clone();
                        connections.spawn(async move { handler.handle_unix(stream).await });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        };

        drop(listener);
        connections.close();
        let drain = self.config.server.drain_timeout();
        if tokio::time::timeout(drain, connections.wait()).await.is_err() {
            warn!(
                open = connections.len(),
                drain_ms = drain.as_millis() as u64,
                "Drain timeout elapsed with connections still open"
            );
        }

        maintenance.abort();
        drop(handler);
        if let Submitter::Lanes { lanes, .. } = self.submitter {
            if let Ok(lanes) = Arc::try_unwrap(lanes) {
                lanes.shutdown().await;
            }
        }

        info!(metrics = ?self.metrics.snapshot(), "Dispatcher stopped");
        result
    }

    /// Prunes idle shield buckets and logs stats on the configured interval
    fn spawn_maintenance_task(&self) -> JoinHandle<()> {
        let stats_secs = self.config.logging.stats_interval_secs;
        let period = if stats_secs == 0 {
            DEFAULT_MAINTENANCE_INTERVAL
        } else {
            Duration::from_secs(stats_secs)
        };
        let idle = Duration::from_secs(self.config.shield.idle_eviction_secs);
        let shield = Arc::clone(&self.shield);
        let metrics = Arc::clone(&self.metrics);
        let manager = Arc::clone(&self.manager);
        let guard = self.guard.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = shield.prune_idle(idle);

                if stats_secs > 0 {
                    let snapshot = metrics.snapshot();
                    let workflows = manager.supervisor().stats();
                    info!(
                        metrics = %serde_json::to_string(&snapshot).unwrap_or_default(),
                        in_flight = manager.admission().in_flight(),
                        live_workflows = workflows.live,
                        crashed_workflows = workflows.crashed,
                        shield_clients = shield.len(),
                        evicted,
                        "Dispatcher stats"
                    );
                }

                if let Some(guard) = &guard {
                    let resilience = guard.snapshot();
                    if let Some(target) = resilience.shed {
                        warn!(
                            shed = %target,
                            failures = resilience.failures,
                            timeouts = resilience.timeouts,
                            quarantined = resilience.quarantined,
                            "Backpressure signal"
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_client_headers_by_default() {
        let env = Envelope::new("GET", "/")
            .with_headers("X-Real-IP: 10.0.0.2\r\nX-Forwarded-For: 203.0.113.9\r\n");
        assert_eq!(client_identity(&env, Some(1000), None), "uid:1000");
        assert_eq!(client_identity(&env, None, None), "unix");
    }

    #[test]
    fn test_identity_takes_rightmost_trusted_hop() {
        let env = Envelope::new("GET", "/")
            .with_headers("X-Forwarded-For: 6.6.6.6, 203.0.113.9\r\n");
        assert_eq!(
            client_identity(&env, Some(1000), Some("x-forwarded-for")),
            "203.0.113.9"
        );
    }

    #[test]
    fn test_identity_falls_back_when_trusted_header_missing() {
        let bare = Envelope::new("GET", "/");
        assert_eq!(
            client_identity(&bare, Some(1000), Some("X-Forwarded-For")),
            "uid:1000"
        );

        let blank = Envelope::new("GET", "/").with_headers("X-Forwarded-For: 1.2.3.4, \r\n");
        assert_eq!(
            client_identity(&blank, Some(7), Some("X-Forwarded-For")),
            "uid:7"
        );
    }

    #[test]
    fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("d.sock");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale").unwrap();

        tokio_test::block_on(async {
            let (_listener, guard) = bind_listener(&path).unwrap();
            assert!(path.exists());
            drop(guard);
        });
        assert!(!path.exists());
    }
}
