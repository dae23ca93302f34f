//! Gateway behavior against in-process backend doubles.
//!
//! Timing tests run on a paused tokio clock, so backoff sleeps complete
//! instantly while `tokio::time::Instant` still advances by the exact
//! delay.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use scribe_llm::{
    Backend, BlockingBackend, CancellationToken, CompletionRequest, CompletionResponse,
    EventIter, EventStream, Gateway, GatewayConfig, GatewayError, Result, RetryConfig,
    StreamEvent, format_conversation,
};

fn request() -> CompletionRequest {
    CompletionRequest::new("test-model", format_conversation("Hi", None))
}

fn gateway_for<B>(backend: Arc<B>, config: GatewayConfig) -> Gateway
where
    B: Backend + BlockingBackend + 'static,
{
    Gateway::new(backend.clone(), backend, config)
}

fn fast_config() -> GatewayConfig {
    GatewayConfig {
        retry: RetryConfig {
            multiplier: Duration::from_millis(1),
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
            ..RetryConfig::default()
        },
        ..GatewayConfig::default()
    }
}

// ── Doubles ─────────────────────────────────────────────────────────────

/// Fails the first `fail_first` calls, then answers "hello".
struct FlakyBackend {
    fail_first: u32,
    error: fn() -> GatewayError,
    calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
}

impl FlakyBackend {
    fn new(fail_first: u32, error: fn() -> GatewayError) -> Self {
        Self {
            fail_first,
            error,
            calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<CompletionResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            Err((self.error)())
        } else {
            Ok(CompletionResponse::from_text("hello"))
        }
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        self.call_times.lock().unwrap().push(Instant::now());
        self.next()
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<EventStream> {
        Err((self.error)())
    }
}

impl BlockingBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        self.next()
    }

    fn stream(&self, _request: &CompletionRequest) -> Result<EventIter> {
        Err((self.error)())
    }
}

/// Holds every async completion until the test releases a permit on `gate`.
struct GatedBackend {
    gate: Semaphore,
    started: AtomicUsize,
}

impl GatedBackend {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        }
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate
            .acquire()
            .await
            .map_err(|_| GatewayError::Stream("gate closed".into()))?
            .forget();
        Ok(CompletionResponse::from_text("released"))
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<EventStream> {
        Ok(stream::iter(vec![Ok(StreamEvent::MessageStop)]).boxed())
    }
}

impl BlockingBackend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        Ok(CompletionResponse::from_text("unbounded"))
    }

    fn stream(&self, _request: &CompletionRequest) -> Result<EventIter> {
        Ok(Box::new(std::iter::empty()))
    }
}

/// Streams a fixed list of events, optionally failing after `fail_after` of them.
struct ScriptedStream {
    events: Vec<StreamEvent>,
    fail_after: Option<usize>,
}

impl ScriptedStream {
    fn items(&self) -> Vec<Result<StreamEvent>> {
        let mut items: Vec<Result<StreamEvent>> = self.events.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(GatewayError::Stream("connection reset".into())));
            // Anything after the failure must never be observed.
            items.push(Ok(StreamEvent::MessageStop));
        }
        items
    }
}

#[async_trait]
impl Backend for ScriptedStream {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        Ok(CompletionResponse::from_text("unused"))
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<EventStream> {
        Ok(stream::iter(self.items()).boxed())
    }
}

impl BlockingBackend for ScriptedStream {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        Ok(CompletionResponse::from_text("unused"))
    }

    fn stream(&self, _request: &CompletionRequest) -> Result<EventIter> {
        Ok(Box::new(self.items().into_iter()))
    }
}

fn three_events() -> Vec<StreamEvent> {
    vec![
        StreamEvent::text_delta(0, "e1"),
        StreamEvent::text_delta(0, "e2"),
        StreamEvent::text_delta(0, "e3"),
    ]
}

// ── Text extraction ─────────────────────────────────────────────────────

#[tokio::test]
async fn complete_async_returns_first_text_block() {
    let backend = Arc::new(FlakyBackend::new(0, || GatewayError::Timeout));
    let gateway = gateway_for(backend.clone(), GatewayConfig::default());

    assert_eq!(gateway.complete_async(&request()).await.unwrap(), "hello");
    assert_eq!(backend.calls(), 1);
    assert_eq!(gateway.in_flight(), 0);
}

#[test]
fn complete_sync_returns_first_text_block() {
    let backend = Arc::new(FlakyBackend::new(0, || GatewayError::Timeout));
    let gateway = gateway_for(backend.clone(), GatewayConfig::default());

    assert_eq!(gateway.complete_sync(&request()).unwrap(), "hello");
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn invalid_request_never_reaches_backend() {
    let backend = Arc::new(FlakyBackend::new(0, || GatewayError::Timeout));
    let gateway = gateway_for(backend.clone(), GatewayConfig::default());
    let bad = request().with_max_tokens(0);

    let err = gateway.complete_async(&bad).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)));
    assert!(gateway.complete_sync(&bad).is_err());
    assert!(gateway.stream_sync(&bad).is_err());
    assert!(gateway.stream_async(&bad, |_| {}).await.is_err());
    assert_eq!(backend.calls(), 0);
}

// ── Retry policy ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn async_retry_succeeds_on_sixth_attempt_with_bounded_delays() {
    let backend = Arc::new(FlakyBackend::new(5, || GatewayError::Timeout));
    let gateway = gateway_for(backend.clone(), GatewayConfig::default());

    let text = gateway.complete_async(&request()).await.unwrap();
    assert_eq!(text, "hello");
    assert_eq!(backend.calls(), 6);

    let times = backend.call_times.lock().unwrap().clone();
    assert_eq!(times.len(), 6);
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(5), "gap {gap:?} < 5s");
        assert!(gap <= Duration::from_secs(60), "gap {gap:?} > 60s");
    }
}

#[tokio::test(start_paused = true)]
async fn async_retry_exhaustion_stops_after_six_attempts() {
    let backend = Arc::new(FlakyBackend::new(u32::MAX, || {
        GatewayError::Overloaded("busy".into())
    }));
    let gateway = gateway_for(backend.clone(), GatewayConfig::default());

    let err = gateway.complete_async(&request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Overloaded(_)));
    assert_eq!(backend.calls(), 6);
    assert_eq!(gateway.in_flight(), 0);
}

#[test]
fn sync_retry_succeeds_on_sixth_attempt_with_bounded_delays() {
    let slept = Arc::new(Mutex::new(Vec::new()));
    let backend = Arc::new(FlakyBackend::new(5, || GatewayError::ServerError {
        status: 503,
        message: "unavailable".into(),
    }));
    let gateway = {
        let slept = Arc::clone(&slept);
        gateway_for(backend.clone(), GatewayConfig::default())
            .with_blocking_sleep(move |d| slept.lock().unwrap().push(d))
    };

    assert_eq!(gateway.complete_sync(&request()).unwrap(), "hello");
    assert_eq!(backend.calls(), 6);

    let slept = slept.lock().unwrap();
    assert_eq!(slept.len(), 5);
    for d in slept.iter() {
        assert!(*d >= Duration::from_secs(5) && *d <= Duration::from_secs(60));
    }
}

#[test]
fn sync_retry_exhaustion_stops_after_six_attempts() {
    let sleeps = Arc::new(AtomicU32::new(0));
    let backend = Arc::new(FlakyBackend::new(u32::MAX, || GatewayError::Timeout));
    let gateway = {
        let sleeps = Arc::clone(&sleeps);
        gateway_for(backend.clone(), GatewayConfig::default()).with_blocking_sleep(move |_| {
            sleeps.fetch_add(1, Ordering::SeqCst);
        })
    };

    let err = gateway.complete_sync(&request()).unwrap_err();
    assert!(matches!(err, GatewayError::Timeout));
    assert_eq!(backend.calls(), 6);
    assert_eq!(sleeps.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn terminal_errors_are_not_retried() {
    let backend = Arc::new(FlakyBackend::new(u32::MAX, || {
        GatewayError::AuthFailed("invalid x-api-key".into())
    }));
    let gateway = gateway_for(backend.clone(), fast_config());

    let err = gateway.complete_async(&request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::AuthFailed(_)));
    assert_eq!(backend.calls(), 1);

    let err = gateway.complete_sync(&request()).unwrap_err();
    assert!(matches!(err, GatewayError::AuthFailed(_)));
    assert_eq!(backend.calls(), 2);
}

// ── Admission control ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn admission_holds_extra_request_until_a_slot_frees() {
    let backend = Arc::new(GatedBackend::new());
    let config = GatewayConfig {
        in_flight_limit: 2,
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(gateway_for(backend.clone(), config));

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.complete_async(&request()).await })
        })
        .collect();

    // Far longer than the old polling interval.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(backend.started(), 2);
    assert_eq!(gateway.in_flight(), 2);

    backend.gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(backend.started(), 3);
    assert_eq!(gateway.in_flight(), 2);

    backend.gate.add_permits(2);
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "released");
    }
    assert_eq!(gateway.in_flight(), 0);
}

#[tokio::test]
async fn failed_attempts_release_their_slot() {
    let backend = Arc::new(FlakyBackend::new(u32::MAX, || {
        GatewayError::InvalidRequest("rejected".into())
    }));
    let config = GatewayConfig {
        in_flight_limit: 1,
        ..fast_config()
    };
    let gateway = gateway_for(backend.clone(), config);

    for _ in 0..5 {
        assert!(gateway.complete_async(&request()).await.is_err());
    }
    assert_eq!(backend.calls(), 5);
    assert_eq!(gateway.in_flight(), 0);
}

#[tokio::test]
async fn retried_attempts_release_their_slot() {
    let backend = Arc::new(FlakyBackend::new(3, || GatewayError::Timeout));
    let config = GatewayConfig {
        in_flight_limit: 1,
        ..fast_config()
    };
    let gateway = gateway_for(backend.clone(), config);

    assert_eq!(gateway.complete_async(&request()).await.unwrap(), "hello");
    assert_eq!(backend.calls(), 4);
    assert_eq!(gateway.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn admission_timeout_reports_capacity_exceeded() {
    let backend = Arc::new(GatedBackend::new());
    let config = GatewayConfig {
        in_flight_limit: 1,
        admission_timeout: Some(Duration::from_secs(30)),
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(gateway_for(backend.clone(), config));

    let holder = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.complete_async(&request()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(gateway.in_flight(), 1);

    let err = gateway.complete_async(&request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::CapacityExceeded { limit: 1, .. }));
    assert_eq!(backend.started(), 1);

    backend.gate.add_permits(1);
    holder.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_for_admission() {
    let backend = Arc::new(GatedBackend::new());
    let config = GatewayConfig {
        in_flight_limit: 1,
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(gateway_for(backend.clone(), config));

    let _holder = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.complete_async(&request()).await })
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    let err = gateway
        .complete_async_with_cancel(&request(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
    assert_eq!(backend.started(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_refuses_waiting_requests() {
    let backend = Arc::new(GatedBackend::new());
    let config = GatewayConfig {
        in_flight_limit: 1,
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(gateway_for(backend.clone(), config));

    let _holder = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.complete_async(&request()).await })
    };
    let waiter = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.complete_async(&request()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    gateway.shutdown();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn sync_and_streaming_paths_bypass_admission() {
    let backend = Arc::new(GatedBackend::new());
    let config = GatewayConfig {
        in_flight_limit: 1,
        ..GatewayConfig::default()
    };
    let gateway = Arc::new(gateway_for(backend.clone(), config));

    let _holder = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.complete_async(&request()).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(gateway.in_flight(), 1);

    assert_eq!(gateway.complete_sync(&request()).unwrap(), "unbounded");

    let mut seen = Vec::new();
    gateway
        .stream_async(&request(), |event| seen.push(event))
        .await
        .unwrap();
    assert_eq!(seen, vec![StreamEvent::MessageStop]);
}

// ── Streaming ───────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_async_delivers_events_in_order() {
    let backend = Arc::new(ScriptedStream {
        events: three_events(),
        fail_after: None,
    });
    let gateway = gateway_for(backend, GatewayConfig::default());

    let mut seen = Vec::new();
    gateway
        .stream_async(&request(), |event| seen.push(event))
        .await
        .unwrap();
    assert_eq!(seen, three_events());
}

#[tokio::test]
async fn stream_async_failure_keeps_delivered_events() {
    let backend = Arc::new(ScriptedStream {
        events: three_events(),
        fail_after: Some(1),
    });
    let gateway = gateway_for(backend, GatewayConfig::default());

    let mut seen = Vec::new();
    let err = gateway
        .stream_async(&request(), |event| seen.push(event))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Stream(_)));
    assert_eq!(seen, vec![StreamEvent::text_delta(0, "e1")]);
}

#[test]
fn stream_sync_yields_events_in_order() {
    let backend = Arc::new(ScriptedStream {
        events: three_events(),
        fail_after: None,
    });
    let gateway = gateway_for(backend, GatewayConfig::default());

    let events: Vec<StreamEvent> = gateway
        .stream_sync(&request())
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(events, three_events());
}

#[test]
fn stream_sync_ends_after_first_error() {
    let backend = Arc::new(ScriptedStream {
        events: three_events(),
        fail_after: Some(2),
    });
    let gateway = gateway_for(backend, GatewayConfig::default());

    let items: Vec<Result<StreamEvent>> = gateway.stream_sync(&request()).unwrap().collect();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap().text(), Some("e1"));
    assert_eq!(items[1].as_ref().unwrap().text(), Some("e2"));
    assert!(items[2].is_err());
}

#[test]
fn gateway_reports_backend_and_limits() {
    let backend = Arc::new(GatedBackend::new());
    let gateway = gateway_for(backend, GatewayConfig::default());
    assert_eq!(gateway.backend_name(), "gated");
    assert_eq!(gateway.in_flight_limit(), 10);
    assert_eq!(gateway.in_flight(), 0);
    assert_eq!(gateway.retry_config().max_attempts, 6);
    assert!(format!("{gateway:?}").contains("gated"));
}
