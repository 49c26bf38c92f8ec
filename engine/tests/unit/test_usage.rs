//! Usage worker unit tests

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use toolhost::models::usage::UsageRecord;
use toolhost::workers::usage::{self, MemorySink, UsageRecorder};

fn create_test_record(endpoint: &str, status_code: u16) -> UsageRecord {
    UsageRecord {
        tool_id: Some("t-1".to_string()),
        deployment_id: Some("d-1".to_string()),
        endpoint: endpoint.to_string(),
        method: "POST".to_string(),
        status_code,
        response_time_ms: 12,
        user_id: Some("user-1".to_string()),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_worker_flushes_on_interval() {
    let (recorder, rx) = UsageRecorder::channel(16);
    let sink = Arc::new(MemorySink::new());
    let (tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let worker_sink = sink.clone();
    let worker = tokio::spawn(async move {
        let options = usage::Options {
            batch_size: 100,
            flush_interval: Duration::from_millis(20),
        };
        usage::run(
            &options,
            rx,
            worker_sink.as_ref(),
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    recorder.record(create_test_record("/run", 200));
    recorder.record(create_test_record("/run", 502));

    let mut written = Vec::new();
    for _ in 0..100 {
        written = sink.records();
        if written.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(written.len(), 2);
    assert_eq!(written[1].status_code, 502);

    tx.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_steady_traffic_does_not_delay_flush() {
    let (recorder, rx) = UsageRecorder::channel(64);
    let sink = Arc::new(MemorySink::new());
    let (tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let worker_sink = sink.clone();
    let worker = tokio::spawn(async move {
        let options = usage::Options {
            batch_size: 100,
            flush_interval: Duration::from_millis(200),
        };
        usage::run(
            &options,
            rx,
            worker_sink.as_ref(),
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    // A record every 100ms, never enough to fill a batch
    for i in 0..10 {
        recorder.record(create_test_record(&format!("/tick/{}", i), 200));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!sink.records().is_empty());

    tx.send(()).unwrap();
    worker.await.unwrap();
    assert_eq!(sink.records().len(), 10);
}

#[tokio::test]
async fn test_worker_exits_when_recorders_are_gone() {
    let (recorder, rx) = UsageRecorder::channel(16);
    let sink = MemorySink::new();

    for i in 0..5 {
        recorder.record(create_test_record(&format!("/call/{}", i), 200));
    }
    drop(recorder);

    let options = usage::Options {
        batch_size: 2,
        flush_interval: Duration::from_secs(60),
    };
    usage::run(&options, rx, &sink, Box::pin(std::future::pending::<()>())).await;

    let written = sink.records();
    assert_eq!(written.len(), 5);
    assert_eq!(written[4].endpoint, "/call/4");
}
