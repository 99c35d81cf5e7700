//! # Dispatcher Integration Tests
//!
//! Exercises the dispatch core through its public API:
//! - manager submit outcomes and admission pairing
//! - connection handling over in-memory and Unix socket streams
//! - resilience gate and event lanes wired through `DispatchService`

use actors::{Supervisor, SupervisorConfig};
use async_trait::async_trait;
use codec::{decode_response, encode_request, Envelope, Response, META_SEC_WAF};
use dispatch_config::DispatchConfig;
use dispatcher::{
    AdmissionQueue, DispatchError, DispatchMetrics, DispatchService, EngineError, Manager,
    ProcessingEngine, RequestContext, ResilienceConfig, ResilienceGuard, SubmitOptions,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Respond(i32),
    Fail,
    Sleep(Duration),
    SleepThenFail(Duration),
    Panic,
}

struct MockEngine {
    behavior: Behavior,
    calls: AtomicU32,
}

impl MockEngine {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessingEngine for MockEngine {
    async fn process_request(
        &self,
        _ctx: &RequestContext,
        envelope: &Envelope,
    ) -> Result<Response, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Respond(status) => Ok(Response::new(status).with_body(envelope.path.clone())),
            Behavior::Fail => Err(EngineError::CoreError("scripted failure".into())),
            Behavior::Sleep(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Response::new(200))
            }
            Behavior::SleepThenFail(delay) => {
                tokio::time::sleep(delay).await;
                Err(EngineError::CoreError("slow failure".into()))
            }
            Behavior::Panic => panic!("engine blew up"),
        }
    }
}

fn manager(engine: Arc<MockEngine>, admission_max: usize) -> Manager {
    Manager::new(
        AdmissionQueue::new(admission_max),
        Supervisor::new("test-workflows", SupervisorConfig::default()),
        engine,
        Arc::new(DispatchMetrics::default()),
        SubmitOptions::default(),
    )
}

fn options(timeout_ms: u64, retry_max: u32) -> SubmitOptions {
    SubmitOptions {
        timeout_ms,
        retry_max,
    }
}

#[tokio::test]
async fn test_healthy_engine_returns_response_and_restores_admission() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let manager = manager(engine.clone(), 4);
    let before = manager.admission().in_flight();

    let env = Envelope::new("GET", "/hello");
    let resp = manager.submit(env, options(1_000, 2)).await.unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_deref(), Some(&b"/hello"[..]));
    assert_eq!(manager.admission().in_flight(), before);
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_waf_hint_short_circuits_without_engine() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let manager = manager(engine.clone(), 4);

    let env = Envelope::new("GET", "/admin").with_hints(0x2);
    let resp = manager.submit(env, options(1_000, 2)).await.unwrap();

    assert_eq!(resp.status, 403);
    assert_ne!(resp.meta_flags & META_SEC_WAF, 0);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_failures_exhaust_retry_budget() {
    let engine = MockEngine::new(Behavior::Fail);
    let manager = manager(engine.clone(), 4);

    let err = manager
        .submit(Envelope::new("POST", "/orders"), options(1_000, 3))
        .await
        .unwrap_err();

    assert_eq!(err.reason(), "actor_crash");
    assert_eq!(engine.calls(), 4);
    assert_eq!(manager.admission().in_flight(), 0);
    assert_eq!(manager.metrics().snapshot().retries, 3);
}

#[tokio::test]
async fn test_invalid_envelope_is_not_retried() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let manager = manager(engine.clone(), 4);

    let err = manager
        .submit(Envelope::new("", "/"), options(1_000, 5))
        .await
        .unwrap_err();

    assert_eq!(err.reason(), "invalid_envelope");
    assert_eq!(engine.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_admission() {
    let engine = MockEngine::new(Behavior::Sleep(Duration::from_secs(60)));
    let manager = manager(engine.clone(), 1);

    let err = manager
        .submit(Envelope::new("GET", "/slow"), options(100, 0))
        .await
        .unwrap_err();

    assert_eq!(err, DispatchError::Timeout);
    assert_eq!(manager.admission().in_flight(), 0);
    // the slot is reusable right away
    assert!(manager.admission().offer().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_remaining_retries() {
    let engine = MockEngine::new(Behavior::SleepThenFail(Duration::from_millis(60)));
    let manager = manager(engine.clone(), 1);

    let err = manager
        .submit(Envelope::new("GET", "/slow"), options(100, 3))
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::Timeout);
    assert_eq!(manager.admission().in_flight(), 0);
    // second attempt was underway when the submit gave up
    assert_eq!(engine.calls(), 2);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.calls(), 2);
    assert_eq!(manager.supervisor().stats().live, 0);
}

#[tokio::test]
async fn test_spawn_failure_releases_admission() {
    let supervisor = Supervisor::new(
        "halting-workflows",
        SupervisorConfig {
            max_spawn_failures: 1,
            window: Duration::from_secs(5),
        },
    );
    for _ in 0..2 {
        let _ = supervisor.spawn(|_ctx| Err::<std::future::Ready<()>, _>("init failed"));
    }
    assert!(supervisor.is_halted());

    let engine = MockEngine::new(Behavior::Respond(200));
    let manager = Manager::new(
        AdmissionQueue::new(2),
        supervisor,
        engine.clone(),
        Arc::new(DispatchMetrics::default()),
        SubmitOptions::default(),
    );

    let err = manager
        .submit(Envelope::new("GET", "/"), options(1_000, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::ActorCrash(_)));
    assert_eq!(manager.admission().in_flight(), 0);
    assert_eq!(manager.metrics().snapshot().admitted, 1);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_bound_rejects_with_busy() {
    let engine = MockEngine::new(Behavior::Sleep(Duration::from_secs(1)));
    let manager = Arc::new(manager(engine.clone(), 1));

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .submit(Envelope::new("GET", "/a"), options(5_000, 0))
                .await
        })
    };
    while manager.admission().in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    let err = manager
        .submit(Envelope::new("GET", "/b"), options(5_000, 0))
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::Busy);
    assert_eq!(manager.metrics().snapshot().busy, 1);

    assert_eq!(first.await.unwrap().unwrap().status, 200);
    assert_eq!(manager.admission().in_flight(), 0);
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_workflow_crash_is_reported_as_actor_crash() {
    let engine = MockEngine::new(Behavior::Panic);
    let manager = manager(engine.clone(), 2);

    let err = manager
        .submit(Envelope::new("GET", "/"), options(1_000, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::ActorCrash(_)));
    assert_eq!(manager.admission().in_flight(), 0);
    assert_eq!(manager.supervisor().stats().crashed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resilience_gate_quarantines_after_failures() {
    let engine = MockEngine::new(Behavior::Fail);
    let guard = Arc::new(ResilienceGuard::new(ResilienceConfig::default()));
    let manager = manager(engine.clone(), 4).with_policy(guard.clone());

    for _ in 0..5 {
        let err = manager
            .submit(Envelope::new("GET", "/"), options(1_000, 0))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "actor_crash");
    }

    let err = manager
        .submit(Envelope::new("GET", "/"), options(1_000, 0))
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::Quarantined);
    assert_eq!(engine.calls(), 5);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(guard.allowed());
}

// ---- connection handling ----

fn service_config(event_lanes: usize, shield_capacity: u32) -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.dispatch.event_lanes = event_lanes;
    config.shield.capacity = shield_capacity;
    config.shield.refill_per_sec = 1;
    config
}

async fn exchange(service: &DispatchService, frame: &[u8], peer_uid: Option<u32>) -> Response {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let handler = service.connection_handler();
    let task = tokio::spawn(async move { handler.handle(server, peer_uid).await });

    client.write_all(frame).await.unwrap();
    client.shutdown().await.unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    task.await.unwrap();

    decode_response(&out).unwrap()
}

#[tokio::test]
async fn test_handler_round_trip() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let service = DispatchService::new(service_config(0, 10), engine.clone()).unwrap();

    let frame = encode_request(&Envelope::new("GET", "/hello").with_ids(1, 2));
    let resp = exchange(&service, &frame, Some(1000)).await;

    assert_eq!(resp.status, 200);
    assert_eq!(service.metrics().snapshot().succeeded, 1);
    assert_eq!(service.shield().len(), 1);
}

#[tokio::test]
async fn test_malformed_frame_gets_400_without_submit() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let service = DispatchService::new(service_config(0, 10), engine.clone()).unwrap();

    let mut frame = Vec::new();
    frame.extend_from_slice(&1_000u32.to_le_bytes());
    frame.extend_from_slice(b"GET");
    let resp = exchange(&service, &frame, None).await;

    assert_eq!(resp.status, 400);
    let snap = service.metrics().snapshot();
    assert_eq!(snap.invalid_frames, 1);
    assert_eq!(snap.admitted, 0);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let mut config = service_config(0, 10);
    config.server.max_frame_bytes = 64;
    let service = DispatchService::new(config, engine.clone()).unwrap();

    let frame = encode_request(&Envelope::new("POST", "/upload").with_body(vec![b'x'; 256]));
    let resp = exchange(&service, &frame, None).await;

    assert_eq!(resp.status, 400);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_shield_limits_repeat_client() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let service = DispatchService::new(service_config(0, 1), engine.clone()).unwrap();

    let frame = encode_request(&Envelope::new("GET", "/"));
    assert_eq!(exchange(&service, &frame, Some(1000)).await.status, 200);

    let limited = exchange(&service, &frame, Some(1000)).await;
    assert_eq!(limited.status, 429);
    assert!(std::str::from_utf8(&limited.headers_flat)
        .unwrap()
        .contains("Retry-After"));
    assert_eq!(engine.calls(), 1);

    // another peer has its own bucket
    assert_eq!(exchange(&service, &frame, Some(1001)).await.status, 200);
}

#[tokio::test]
async fn test_forwarded_headers_do_not_reset_the_bucket() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let service = DispatchService::new(service_config(0, 1), engine.clone()).unwrap();

    let mut statuses = Vec::new();
    for i in 0..20 {
        let frame = encode_request(&Envelope::new("GET", "/").with_headers(format!(
            "X-Forwarded-For: 10.9.9.{}\r\nX-Real-IP: 10.8.8.{}\r\n",
            i, i
        )));
        statuses.push(exchange(&service, &frame, Some(1000)).await.status);
    }

    assert_eq!(statuses[0], 200);
    assert!(statuses[1..].iter().all(|&status| status == 429));
    assert_eq!(engine.calls(), 1);
    assert_eq!(service.shield().len(), 1);
}

#[tokio::test]
async fn test_trusted_header_keys_on_rightmost_hop() {
    let engine = MockEngine::new(Behavior::Respond(200));
    let mut config = service_config(0, 1);
    config.shield.identity_header = Some("X-Forwarded-For".to_string());
    let service = DispatchService::new(config, engine.clone()).unwrap();

    // a client-chosen first hop does not change the proxy-appended one
    for (spoofed, expected) in [("1.1.1.1", 200), ("2.2.2.2", 429)] {
        let frame = encode_request(&Envelope::new("GET", "/").with_headers(format!(
            "X-Forwarded-For: {}, 198.51.100.4\r\n",
            spoofed
        )));
        assert_eq!(exchange(&service, &frame, Some(1000)).await.status, expected);
    }

    let other = encode_request(
        &Envelope::new("GET", "/").with_headers("X-Forwarded-For: 198.51.100.5\r\n"),
    );
    assert_eq!(exchange(&service, &other, Some(1000)).await.status, 200);
    assert_eq!(service.shield().len(), 2);
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_failure_renders_502_with_reason_tag() {
    let engine = MockEngine::new(Behavior::Fail);
    let service = DispatchService::new(service_config(0, 10), engine).unwrap();

    let frame = encode_request(&Envelope::new("GET", "/"));
    let resp = exchange(&service, &frame, None).await;

    assert_eq!(resp.status, 502);
    assert_eq!(resp.body.as_deref(), Some(&b"actor_crash"[..]));
}

#[tokio::test]
async fn test_requests_travel_through_event_lanes() {
    let engine = MockEngine::new(Behavior::Respond(201));
    let service = DispatchService::new(service_config(4, 100), engine.clone()).unwrap();

    let frame = encode_request(&Envelope::new("PUT", "/items/1"));
    for peer_uid in [1000, 1001, 1002] {
        assert_eq!(exchange(&service, &frame, Some(peer_uid)).await.status, 201);
    }
    assert_eq!(engine.calls(), 3);
}

#[tokio::test]
async fn test_server_serves_over_unix_socket_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("run").join("dispatcher.sock");

    let mut config = service_config(2, 10);
    config.server.socket_path = socket_path.clone();
    let engine = MockEngine::new(Behavior::Respond(200));
    let service = DispatchService::new(config, engine.clone()).unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(service.run(async {
        let _ = stop_rx.await;
    }));

    let mut stream = loop {
        match tokio::net::UnixStream::connect(&socket_path).await {
            Ok(stream) => break stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    };
    stream
        .write_all(&encode_request(&Envelope::new("GET", "/hello")))
        .await
        .unwrap();
    stream.shutdown().await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    assert_eq!(decode_response(&out).unwrap().status, 200);

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert!(!socket_path.exists());
}
