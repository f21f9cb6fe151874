//! Flush-worker behavior of the metrics sender.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use vigil_agent::services::metrics_sender::MetricsSender;
use vigil_client::identity::IdentityStore;
use vigil_client::PlatformClient;
use vigil_common::types::{MetricPoint, MetricValue};

const OK_BODY: &str = r#"{"code":200,"msg":"ok"}"#;

fn sender_for(url: &str, buffer_size: usize, flush_interval: Duration) -> Arc<MetricsSender> {
    let identity = Arc::new(IdentityStore::default());
    identity.publish("a1".into(), "t1".into());
    let client = Arc::new(PlatformClient::new(url, Duration::from_secs(2), identity).unwrap());
    Arc::new(MetricsSender::new(client, buffer_size, flush_interval))
}

fn point(item_id: i64, ts: i64) -> MetricPoint {
    MetricPoint {
        item_id,
        timestamp: ts,
        value: MetricValue::Int(ts),
    }
}

#[tokio::test]
async fn timer_flush_transmits_buffered_points() {
    let mut server = mockito::Server::new_async().await;
    let metrics = server
        .mock("POST", "/deviceMonitor/agent/metrics")
        .match_header("authorization", "Bearer t1")
        .with_status(200)
        .with_body(OK_BODY)
        .expect(3)
        .create_async()
        .await;

    let sender = sender_for(&server.url(), 100, Duration::from_millis(300));
    for i in 0..3 {
        sender.enqueue(point(1, i));
    }

    let cancel = CancellationToken::new();
    let worker = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(800)).await;
    cancel.cancel();
    worker.await.unwrap();

    metrics.assert_async().await;
    assert_eq!(sender.buffered(), 0);
    assert_eq!(sender.send_failure_count(), 0);
}

#[tokio::test]
async fn capacity_signal_flushes_without_waiting_for_timer() {
    let mut server = mockito::Server::new_async().await;
    let metrics = server
        .mock("POST", "/deviceMonitor/agent/metrics")
        .with_status(200)
        .with_body(OK_BODY)
        .expect_at_least(2)
        .create_async()
        .await;

    // Timer far away; only the buffer-full signal can flush.
    let sender = sender_for(&server.url(), 2, Duration::from_secs(300));
    let cancel = CancellationToken::new();
    let worker = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.run(cancel).await })
    };

    sender.enqueue(point(1, 1));
    sender.enqueue(point(1, 2));

    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();
    worker.await.unwrap();

    metrics.assert_async().await;
}

#[tokio::test]
async fn shutdown_drains_remaining_points() {
    let mut server = mockito::Server::new_async().await;
    let metrics = server
        .mock("POST", "/deviceMonitor/agent/metrics")
        .with_status(200)
        .with_body(OK_BODY)
        .expect(3)
        .create_async()
        .await;

    let sender = sender_for(&server.url(), 100, Duration::from_secs(300));
    let cancel = CancellationToken::new();
    let worker = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.run(cancel).await })
    };

    for i in 0..3 {
        sender.enqueue(point(2, i));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    worker.await.unwrap();

    metrics.assert_async().await;
    assert_eq!(sender.buffered(), 0);
}

#[tokio::test]
async fn rejected_points_are_counted_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let metrics = server
        .mock("POST", "/deviceMonitor/agent/metrics")
        .with_status(500)
        .with_body("boom")
        .expect(3)
        .create_async()
        .await;

    let sender = sender_for(&server.url(), 100, Duration::from_millis(200));
    let cancel = CancellationToken::new();
    let worker = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.run(cancel).await })
    };

    for i in 0..3 {
        sender.enqueue(point(3, i));
    }
    tokio::time::sleep(Duration::from_millis(600)).await;
    cancel.cancel();
    worker.await.unwrap();

    // One attempt per point, then dropped.
    metrics.assert_async().await;
    assert_eq!(sender.send_failure_count(), 3);
    assert_eq!(sender.buffered(), 0);
}
