//! Usage recording
//!
//! Routed requests hand their usage record to a bounded channel and move
//! on. A background worker drains the channel into a sink in batches.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::models::usage::UsageRecord;

/// Usage worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Records written per sink call at most
    pub batch_size: usize,

    /// Pending records are flushed at least this often
    pub flush_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Fire-and-forget handle used by the request router
#[derive(Debug, Clone)]
pub struct UsageRecorder {
    tx: mpsc::Sender<UsageRecord>,
}

impl UsageRecorder {
    /// Create a recorder and the receiving end for the usage worker
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<UsageRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a record without waiting. Dropped with a warning when the
    /// queue is full or the worker is gone.
    pub fn record(&self, record: UsageRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!(
                    "Usage queue full, dropping record for {} {}",
                    record.method, record.endpoint
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Usage worker stopped, dropping record");
            }
        }
    }
}

/// Destination of usage records
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn write(&self, records: &[UsageRecord]) -> Result<(), EngineError>;
}

/// Appends one JSON object per line
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    file: File,
}

impl JsonLinesSink {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

#[async_trait]
impl UsageSink for JsonLinesSink {
    async fn write(&self, records: &[UsageRecord]) -> Result<(), EngineError> {
        let mut lines = Vec::new();
        for record in records {
            serde_json::to_writer(&mut lines, record)?;
            lines.push(b'\n');
        }
        self.file.append(&lines).await
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl UsageSink for MemorySink {
    async fn write(&self, records: &[UsageRecord]) -> Result<(), EngineError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(records);
        Ok(())
    }
}

/// Run the usage worker until shutdown, then drain and flush
pub async fn run<K>(
    options: &Options,
    mut rx: mpsc::Receiver<UsageRecord>,
    sink: &K,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    K: UsageSink + ?Sized,
{
    info!("Usage worker starting...");
    let mut batch = Vec::with_capacity(options.batch_size);

    // Ticks on a fixed schedule regardless of traffic
    let mut flush_interval = interval(options.flush_interval.max(Duration::from_millis(1)));
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    flush_interval.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                while let Ok(record) = rx.try_recv() {
                    batch.push(record);
                }
                flush(sink, &mut batch).await;
                info!("Usage worker shutting down...");
                return;
            }
            received = rx.recv() => match received {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= options.batch_size {
                        flush(sink, &mut batch).await;
                    }
                }
                None => {
                    flush(sink, &mut batch).await;
                    info!("Usage channel closed, worker exiting");
                    return;
                }
            },
            _ = flush_interval.tick() => {
                flush(sink, &mut batch).await;
            }
        }
    }
}

async fn flush<K>(sink: &K, batch: &mut Vec<UsageRecord>)
where
    K: UsageSink + ?Sized,
{
    if batch.is_empty() {
        return;
    }
    if let Err(e) = sink.write(batch).await {
        error!("Failed to write {} usage records: {}", batch.len(), e);
    }
    batch.clear();
}
