//! End-to-end tests for the tracking pipeline
//!
//! These tests drive the full path: inbound messages -> state machine ->
//! session durations -> aggregator -> export cycle -> collector, using a
//! minimal canned-response HTTP server so delivery, retry, and crash-recovery
//! behavior are exercised against real sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use taskpulse_core::export::MetricExporter;
use taskpulse_core::metrics::{MetricAggregator, METRIC_ACTIVE_TIME};
use taskpulse_core::{
    ActivityTracker, CycleOutcome, InboundMessage, Route, RouteType, StateStore,
};

/// Serve one canned status per incoming connection, counting hits.
async fn serve_statuses(statuses: Vec<u16>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        for status in statuses {
            let (mut socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            counter.fetch_add(1, Ordering::SeqCst);
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {} X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (addr, hits)
}

/// Read headers plus the declared body so the client never sees a reset
/// before it finishes writing.
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_string();
            let body_len = content_length(&headers);
            while buf.len() < pos + 4 + body_len {
                let n = match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);
            }
            return;
        }
    }
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

fn navigate(route: Route, timestamp: i64) -> InboundMessage {
    InboundMessage::Navigation {
        route,
        timestamp,
        previous_route: None,
    }
}

fn focus(timestamp: i64) -> InboundMessage {
    InboundMessage::Focus {
        route: None,
        timestamp,
    }
}

fn blur(timestamp: i64) -> InboundMessage {
    InboundMessage::Blur {
        route: None,
        timestamp,
    }
}

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, hits) = serve_statuses(vec![200]).await;

    let store = StateStore::load(dir.path().join("state.json"));
    let tracker = ActivityTracker::new(store).unwrap();
    tracker.set_endpoint(format!("http://{}", addr)).unwrap();

    tracker.handle_message(navigate(Route::task_detail("ws-1", "proj-1", "task-1"), 0));
    tracker.handle_message(focus(1_000));
    tracker.handle_message(blur(6_000));

    let records = tracker.peek_metrics();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, METRIC_ACTIVE_TIME);
    assert_eq!(records[0].value, 5_000);

    let outcome = tracker.export_now().await;
    assert_eq!(outcome, CycleOutcome::Exported(1));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.queued_metrics(), 0);
    // Confirmed delivery clears the crash-safety checkpoint.
    assert_eq!(tracker.pending_metrics(), 0);
}

#[tokio::test]
async fn test_export_retries_transient_errors_then_succeeds() {
    let (addr, hits) = serve_statuses(vec![500, 500, 200]).await;
    let exporter = MetricExporter::new(format!("http://{}", addr)).unwrap();

    let mut agg = MetricAggregator::new("m");
    agg.record_scroll(10);
    let batch = agg.flush();

    assert!(exporter.export(&batch).await);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_export_aborts_on_404_without_retry() {
    let (addr, hits) = serve_statuses(vec![404, 200]).await;
    let exporter = MetricExporter::new(format!("http://{}", addr)).unwrap();

    let mut agg = MetricAggregator::new("m");
    agg.record_scroll(10);
    let batch = agg.flush();

    assert!(!exporter.export(&batch).await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_cycle_recovers_on_next_cycle() {
    let dir = tempfile::tempdir().unwrap();

    let store = StateStore::load(dir.path().join("state.json"));
    let tracker = ActivityTracker::new(store).unwrap();
    // Nothing listens here; the first cycle fails after its retries.
    tracker.set_endpoint("http://127.0.0.1:1").unwrap();

    tracker.handle_message(navigate(Route::task_board("ws", "proj"), 0));
    tracker.handle_message(focus(0));
    tracker.handle_message(blur(2_000));

    let outcome = tracker.export_now().await;
    assert_eq!(outcome, CycleOutcome::Deferred(1));
    // The batch stays checkpointed and back in the queue.
    assert_eq!(tracker.pending_metrics(), 1);
    assert_eq!(tracker.queued_metrics(), 1);

    // Operator fixes the endpoint; the next cycle delivers the same batch.
    let (addr, hits) = serve_statuses(vec![200]).await;
    tracker.set_endpoint(format!("http://{}", addr)).unwrap();

    let outcome = tracker.export_now().await;
    assert_eq!(outcome, CycleOutcome::Exported(1));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.pending_metrics(), 0);
}

#[tokio::test]
async fn test_crash_recovery_requeues_pending_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    // First process: records metrics, checkpoints them, dies before export
    // confirms.
    {
        let store = StateStore::load(&path);
        let tracker = ActivityTracker::new(store).unwrap();
        tracker.set_endpoint("http://127.0.0.1:1").unwrap();
        tracker.handle_message(navigate(Route::new(RouteType::Workspace), 0));
        tracker.handle_message(focus(0));
        tracker.handle_message(blur(3_000));
        let outcome = tracker.export_now().await;
        assert_eq!(outcome, CycleOutcome::Deferred(1));
    }

    // Second process: the pending batch is restored and exported once.
    let (addr, hits) = serve_statuses(vec![200]).await;
    let tracker = ActivityTracker::new(StateStore::load(&path)).unwrap();
    assert_eq!(tracker.queued_metrics(), 1);
    tracker.set_endpoint(format!("http://{}", addr)).unwrap();

    let outcome = tracker.export_now().await;
    assert_eq!(outcome, CycleOutcome::Exported(1));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.pending_metrics(), 0);
    assert_eq!(tracker.queued_metrics(), 0);
}
