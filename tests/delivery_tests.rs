//! End-to-end delivery tests
//!
//! Drive the axum router the way GitHub would and observe what reaches the
//! publisher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use github_hook_delivery::delivery::USER_AGENT;
use github_hook_delivery::error::PublishError;
use github_hook_delivery::secret::{SecretProvider, StaticSecret};
use github_hook_delivery::server::{router, serve, DrainOutcome, HOOK_PATH};
use github_hook_delivery::verifier::{sign_sha1, sign_sha256, ACCEPTED_BODY};
use github_hook_delivery::{Delivery, GitHubVerifier, InFlightTracker, OutboundMessage, Publisher};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::Semaphore;
use tower::ServiceExt;

const SECRET: &str = "integration-secret";
const TOPIC: &str = "github-events";
const PUSH_BODY: &str = r#"{"ref":"refs/heads/main"}"#;

/// Records every publish; optionally holds each one until released.
#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    gate: Option<Arc<Semaphore>>,
    tracker: OnceLock<InFlightTracker>,
    observed_in_flight: Mutex<Vec<usize>>,
}

impl RecordingPublisher {
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), PublishError> {
        if let Some(tracker) = self.tracker.get() {
            self.observed_in_flight.lock().push(tracker.in_flight());
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        self.sent.lock().push((topic.to_string(), message));
        Ok(())
    }
}

/// Secret that changes between calls, to check it is read per request.
struct RotatingSecret {
    current: Mutex<Vec<u8>>,
    reads: AtomicUsize,
}

impl SecretProvider for RotatingSecret {
    fn secret(&self) -> Vec<u8> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.current.lock().clone()
    }
}

fn delivery_with(
    publisher: Arc<RecordingPublisher>,
    secret: Arc<dyn SecretProvider>,
) -> Arc<Delivery> {
    Arc::new(Delivery::new(
        TOPIC,
        Arc::new(GitHubVerifier::new()),
        secret,
        publisher,
    ))
}

fn delivery(publisher: Arc<RecordingPublisher>) -> Arc<Delivery> {
    delivery_with(publisher, Arc::new(StaticSecret::new(SECRET)))
}

fn hook_request(body: &str, delivery_id: &str, signature: &str) -> Request<Body> {
    Request::post(HOOK_PATH)
        .header("content-type", "application/json")
        .header("X-GitHub-Event", "push")
        .header("X-GitHub-Delivery", delivery_id)
        .header("X-Hub-Signature", signature)
        .header("X-Forwarded-For", "192.0.2.1")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn signed(body: &str, delivery_id: &str) -> Request<Body> {
    hook_request(body, delivery_id, &sign_sha1(SECRET.as_bytes(), body.as_bytes()))
}

#[tokio::test]
async fn test_push_event_published_once() {
    let publisher = Arc::new(RecordingPublisher::default());
    let delivery = delivery(publisher.clone());

    let response = router(delivery.clone())
        .oneshot(signed(PUSH_BODY, "abc123"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), ACCEPTED_BODY.as_bytes());

    delivery.tracker().drain().await;

    let sent = publisher.sent();
    assert_eq!(sent.len(), 1);
    let (topic, message) = &sent[0];
    assert_eq!(topic, TOPIC);
    assert_eq!(message.header("X-GitHub-Event"), Some("push"));
    assert_eq!(message.header("X-GitHub-Delivery"), Some("abc123"));
    assert_eq!(message.header("content-type"), Some("application/json"));
    assert_eq!(
        message.header("X-Hub-Signature"),
        Some(sign_sha1(SECRET.as_bytes(), PUSH_BODY.as_bytes()).as_str())
    );
    assert_eq!(message.header("User-Agent"), Some(USER_AGENT));
    assert_eq!(message.headers().len(), 5);
    assert_eq!(message.header("X-Forwarded-For"), None);
    assert_eq!(message.body().as_ref(), PUSH_BODY.as_bytes());
}

#[tokio::test]
async fn test_sha256_only_delivery_forwards_its_signature() {
    let publisher = Arc::new(RecordingPublisher::default());
    let delivery = delivery(publisher.clone());

    let signature = sign_sha256(SECRET.as_bytes(), PUSH_BODY.as_bytes());
    let request = Request::post(HOOK_PATH)
        .header("content-type", "application/json")
        .header("X-GitHub-Event", "push")
        .header("X-GitHub-Delivery", "abc123")
        .header("X-Hub-Signature-256", &signature)
        .body(Body::from(PUSH_BODY))
        .unwrap();

    let response = router(delivery.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    delivery.tracker().drain().await;
    let sent = publisher.sent();
    assert_eq!(sent.len(), 1);
    let message = &sent[0].1;
    assert_eq!(message.header("X-Hub-Signature"), Some(signature.as_str()));
    assert_eq!(message.headers().len(), 5);
    assert_eq!(message.body().as_ref(), PUSH_BODY.as_bytes());
}

#[tokio::test]
async fn test_flipped_signature_rejected_and_server_keeps_serving() {
    let publisher = Arc::new(RecordingPublisher::default());
    let delivery = delivery(publisher.clone());
    let app = router(delivery.clone());

    let mut signature = sign_sha1(SECRET.as_bytes(), PUSH_BODY.as_bytes()).into_bytes();
    let last = signature.len() - 1;
    signature[last] = if signature[last] == b'a' { b'b' } else { b'a' };
    let signature = String::from_utf8(signature).unwrap();

    let response = app
        .clone()
        .oneshot(hook_request(PUSH_BODY, "abc123", &signature))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    delivery.tracker().drain().await;
    assert!(publisher.sent().is_empty());

    let response = app.oneshot(signed(PUSH_BODY, "def456")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    delivery.tracker().drain().await;
    assert_eq!(publisher.sent().len(), 1);
}

#[tokio::test]
async fn test_missing_signature_not_published() {
    let publisher = Arc::new(RecordingPublisher::default());
    let delivery = delivery(publisher.clone());

    let request = Request::post(HOOK_PATH)
        .header("content-type", "application/json")
        .header("X-GitHub-Event", "push")
        .header("X-GitHub-Delivery", "abc123")
        .body(Body::from(PUSH_BODY))
        .unwrap();

    let response = router(delivery.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(delivery.tracker().in_flight(), 0);
    assert!(publisher.sent().is_empty());
}

#[tokio::test]
async fn test_response_does_not_wait_for_publish() {
    let gate = Arc::new(Semaphore::new(0));
    let publisher = Arc::new(RecordingPublisher::gated(gate.clone()));
    let delivery = delivery(publisher.clone());

    let response = tokio::time::timeout(
        Duration::from_secs(1),
        router(delivery.clone()).oneshot(signed(PUSH_BODY, "abc123")),
    )
    .await
    .expect("response must not wait for the broker")
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(delivery.tracker().in_flight(), 1);

    gate.add_permits(1);
    delivery.tracker().drain().await;
    assert_eq!(publisher.sent().len(), 1);
}

#[tokio::test]
async fn test_secret_read_fresh_per_request() {
    let publisher = Arc::new(RecordingPublisher::default());
    let secret = Arc::new(RotatingSecret {
        current: Mutex::new(b"first".to_vec()),
        reads: AtomicUsize::new(0),
    });
    let delivery = delivery_with(publisher.clone(), secret.clone());
    let app = router(delivery.clone());

    let sig = sign_sha1(b"first", PUSH_BODY.as_bytes());
    let response = app
        .clone()
        .oneshot(hook_request(PUSH_BODY, "1", &sig))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    *secret.current.lock() = b"second".to_vec();

    let response = app
        .clone()
        .oneshot(hook_request(PUSH_BODY, "2", &sig))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let sig = sign_sha1(b"second", PUSH_BODY.as_bytes());
    let response = app
        .oneshot(hook_request(PUSH_BODY, "3", &sig))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(secret.reads.load(Ordering::SeqCst), 3);
    delivery.tracker().drain().await;
    assert_eq!(publisher.sent().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_each_published() {
    const K: usize = 50;
    let publisher = Arc::new(RecordingPublisher::default());
    let delivery = delivery(publisher.clone());
    let _ = publisher.tracker.set(delivery.tracker().clone());
    let app = router(delivery.clone());

    let requests = (0..K).map(|i| {
        let app = app.clone();
        async move {
            let body = format!(r#"{{"n":{i}}}"#);
            app.oneshot(signed(&body, &format!("delivery-{i}")))
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = futures::future::join_all(requests).await;
    assert!(statuses.iter().all(|s| *s == StatusCode::OK));

    delivery.tracker().drain().await;
    assert_eq!(delivery.tracker().in_flight(), 0);

    let sent = publisher.sent();
    assert_eq!(sent.len(), K);
    let mut ids: Vec<_> = sent
        .iter()
        .map(|(_, m)| m.header("X-GitHub-Delivery").unwrap().to_string())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), K);

    // Each publish runs inside its own registration, so it sees at least itself.
    let observed = publisher.observed_in_flight.lock().clone();
    assert_eq!(observed.len(), K);
    assert!(observed.iter().all(|n| (1..=K).contains(n)));
}

#[tokio::test]
async fn test_replayed_payload_published_twice() {
    let publisher = Arc::new(RecordingPublisher::default());
    let delivery = delivery(publisher.clone());
    let app = router(delivery.clone());

    for _ in 0..2 {
        let response = app.clone().oneshot(signed(PUSH_BODY, "same-id")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    delivery.tracker().drain().await;
    assert_eq!(publisher.sent().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_waits_for_in_flight_publishes() {
    let gate = Arc::new(Semaphore::new(0));
    let publisher = Arc::new(RecordingPublisher::gated(gate.clone()));
    let delivery = delivery(publisher.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    // Five verified requests in flight before shutdown starts.
    let app = router(delivery.clone());
    for i in 0..5 {
        let response = app
            .clone()
            .oneshot(signed(PUSH_BODY, &format!("inflight-{i}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(delivery.tracker().in_flight(), 5);

    let server = tokio::spawn(serve(
        listener,
        delivery.clone(),
        async {
            let _ = stop_rx.await;
        },
        Duration::from_secs(10),
    ));

    stop_tx.send(()).unwrap();

    // Release the publishes one at a time with varying delays.
    for (i, delay) in [30u64, 5, 50, 10, 20].into_iter().enumerate() {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        assert!(!server.is_finished(), "shutdown finished with {} pending", 5 - i);
        gate.add_permits(1);
    }

    let outcome = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("shutdown should finish once publishes complete")
        .unwrap()
        .unwrap();

    assert_eq!(outcome, DrainOutcome::Drained);
    assert_eq!(publisher.sent().len(), 5);
    assert_eq!(delivery.tracker().in_flight(), 0);
}

#[tokio::test]
async fn test_shutdown_grace_period_elapses() {
    let gate = Arc::new(Semaphore::new(0));
    let publisher = Arc::new(RecordingPublisher::gated(gate));
    let delivery = delivery(publisher.clone());

    let response = router(delivery.clone())
        .oneshot(signed(PUSH_BODY, "stuck"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let outcome = serve(listener, delivery, async {}, Duration::from_millis(50))
        .await
        .unwrap();

    assert_eq!(outcome, DrainOutcome::TimedOut { abandoned: 1 });
    assert!(publisher.sent().is_empty());
}
