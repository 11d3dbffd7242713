use super::*;
use crate::broker::{Connector, MemoryBroker, WORK_QUEUE};
use crate::config::WorkerConfig;
use crate::worker::Worker;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower::ServiceExt;

async fn connected(broker: &MemoryBroker) -> ConnectionContext {
    let ctx = ConnectionContext::new();
    ctx.install(broker.connect().await.unwrap()).await;
    ctx
}

fn gateway_with_timeout(ctx: &ConnectionContext, timeout_ms: u64) -> Gateway {
    Gateway::new(
        ctx.clone(),
        GatewayConfig {
            timeout_ms,
            ..GatewayConfig::default()
        },
    )
}

async fn start_worker(
    broker: &MemoryBroker,
    ctx: &ConnectionContext,
) -> (CancellationToken, JoinHandle<()>) {
    let worker = Worker::new(ctx.clone(), WorkerConfig::default());
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let task = tokio::spawn(async move { worker.run(token).await });
    while !broker.queue_exists(WORK_QUEUE).await {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    (shutdown, task)
}

async fn post(app: axum::Router, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// ============================================================================
// Gateway::call
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transaction_round_trip() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let (shutdown, worker) = start_worker(&broker, &ctx).await;
    let gateway = Gateway::new(ctx.clone(), GatewayConfig::default());

    let started = Instant::now();
    let reply = gateway
        .call(&json!({"id": "TX1", "amount": 42, "currency": "EUR"}))
        .await
        .unwrap();

    assert_eq!(
        reply,
        json!({"id": "TX1", "amount": 42, "currency": "EUR", "status": "success"})
    );
    assert!(started.elapsed() >= Duration::from_millis(3_000));
    // The reply queue is gone; only the work queue is left.
    assert_eq!(broker.queue_count().await, 1);

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_timeout_closes_channel_once() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let gateway = Gateway::new(ctx.clone(), GatewayConfig::default());

    let started = Instant::now();
    let result = gateway.call(&json!({"id": "TX1"})).await;

    assert!(matches!(result, Err(RpcError::Timeout(_))));
    assert!(started.elapsed() >= Duration::from_millis(300_000));
    assert_eq!(broker.channel_closes(), 1);
    assert_eq!(broker.queue_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_timeout_is_dropped() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let (shutdown, worker) = start_worker(&broker, &ctx).await;
    let gateway = gateway_with_timeout(&ctx, 1_000);

    let result = gateway.call(&json!({"id": "TX1"})).await;
    assert!(matches!(result, Err(RpcError::Timeout(_))));

    // The worker answers into a deleted queue and keeps serving.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let patient = gateway_with_timeout(&ctx, 10_000);
    let reply = patient.call(&json!({"id": "TX2"})).await.unwrap();
    assert_eq!(reply, json!({"id": "TX2", "status": "success"}));

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_call_without_connection_fails() {
    let gateway = Gateway::new(ConnectionContext::new(), GatewayConfig::default());

    let result = gateway.call(&json!({})).await;

    assert!(matches!(result, Err(RpcError::Channel(_))));
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_cleans_up() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let gateway = Gateway::new(ctx.clone(), GatewayConfig::default());
    broker.fail_publishes_forever();

    let result = gateway.call(&json!({"id": "TX1"})).await;

    assert!(matches!(result, Err(RpcError::Publish { retries: 5, .. })));
    assert_eq!(broker.publish_attempts(), 6);
    assert_eq!(broker.channel_closes(), 1);
    assert_eq!(broker.queue_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_publish_times_out() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let gateway = gateway_with_timeout(&ctx, 1_000);
    broker.stall_publishes();

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(600),
        gateway.call(&json!({"id": "TX1"})),
    )
    .await
    .expect("deadline must bound the publish");

    assert!(matches!(result, Err(RpcError::Timeout(t)) if t == Duration::from_secs(1)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(broker.publish_attempts(), 1);
    assert_eq!(broker.published(), 0);
    assert_eq!(broker.channel_closes(), 1);
    assert_eq!(broker.queue_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_get_their_own_replies() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let (shutdown, worker) = start_worker(&broker, &ctx).await;
    let gateway = Gateway::new(ctx.clone(), GatewayConfig::default());

    let calls: Vec<_> = (0..16)
        .map(|n| {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.call(&json!({ "n": n })).await })
        })
        .collect();

    for (n, call) in calls.into_iter().enumerate() {
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply, json!({"n": n, "status": "success"}));
    }
    assert_eq!(broker.channel_closes(), 16);

    shutdown.cancel();
    worker.await.unwrap();
}

// ============================================================================
// Router
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_router_returns_reply() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let (shutdown, worker) = start_worker(&broker, &ctx).await;
    let app = router(Gateway::new(ctx.clone(), GatewayConfig::default()));

    let (status, body) = post(app, r#"{"id":"TX1","amount":42,"currency":"EUR"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"id": "TX1", "amount": 42, "currency": "EUR", "status": "success"})
    );

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_router_timeout_is_504() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let app = router(gateway_with_timeout(&ctx, 500));

    let (status, body) = post(app, r#"{"id":"TX1"}"#).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, json!({"error": "The server took too long to respond."}));
}

#[tokio::test]
async fn test_router_failure_is_500() {
    let app = router(Gateway::new(
        ConnectionContext::new(),
        GatewayConfig::default(),
    ));

    let (status, body) = post(app, r#"{"id":"TX1"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({"error": "An error occurred while sending the transaction."})
    );
}

#[tokio::test]
async fn test_router_rejects_non_object_body() {
    let broker = MemoryBroker::new();
    let ctx = connected(&broker).await;
    let app = router(Gateway::new(ctx, GatewayConfig::default()));

    let (status, _) = post(app, "[1, 2, 3]").await;

    assert!(status.is_client_error(), "{}", status);
    assert_eq!(broker.publish_attempts(), 0);
}

#[tokio::test]
async fn test_router_health() {
    let app = router(Gateway::new(
        ConnectionContext::new(),
        GatewayConfig::default(),
    ));
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn test_error_statuses() {
    let cases = [
        (RpcError::Timeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
        (RpcError::MalformedReply, StatusCode::INTERNAL_SERVER_ERROR),
        (RpcError::ListenerClosed, StatusCode::INTERNAL_SERVER_ERROR),
        (
            RpcError::Channel(crate::broker::BrokerError::NotConnected),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, expected) in cases {
        assert_eq!(error_response(&err).status(), expected);
    }
}
