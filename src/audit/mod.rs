//! Bounded audit trail of observable control-plane effects.
//!
//! Events land in a fixed-capacity in-memory ring (drop-oldest) and, when a
//! durable sink is configured, are appended asynchronously through a queue.
//! Appends are fire-and-forget with error logging; `flush` drains the queue
//! before shutdown.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Default in-memory ring capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Cap on events read back from the durable sink.
pub const DURABLE_READ_CAP: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub target: String,
    pub user: String,
    pub details: String,
}

/// Durable store for audit events. Retention is the sink's concern.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<()>;

    /// Most recent events, newest first, at most `limit`.
    async fn read_recent(&self, limit: usize) -> Result<Vec<AuditEvent>>;
}

/// Append-only JSONL file sink.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn read_recent(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut events: Vec<AuditEvent> = content
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }
}

enum SinkMsg {
    Append(AuditEvent),
    Flush(oneshot::Sender<()>),
}

pub struct AuditLog {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
    sink: Option<Arc<dyn AuditSink>>,
    tx: Option<mpsc::Sender<SinkMsg>>,
}

impl AuditLog {
    /// Memory-only log.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            sink: None,
            tx: None,
        }
    }

    /// Log with an async durable writer. Must be called from within a tokio
    /// runtime; the writer task lives until the log is dropped.
    pub fn with_sink(capacity: usize, sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<SinkMsg>(1024);
        let worker_sink = Arc::clone(&sink);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    SinkMsg::Append(event) => {
                        if let Err(e) = worker_sink.append(&event).await {
                            log::error!("audit durable append failed for {}: {}", event.id, e);
                        }
                    }
                    SinkMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            sink: Some(sink),
            tx: Some(tx),
        }
    }

    pub fn record(&self, action: &str, target: &str, user: &str, details: &str) {
        let event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: action.to_string(),
            target: target.to_string(),
            user: user.to_string(),
            details: details.to_string(),
        };
        {
            let mut events = self.events.lock();
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(SinkMsg::Append(event)) {
                log::error!("audit durable queue full, dropping append: {}", e);
            }
        }
    }

    /// Newest `n` events, reverse-chronological, from memory.
    pub fn recent(&self, n: usize) -> Vec<AuditEvent> {
        let events = self.events.lock();
        events.iter().rev().take(n).cloned().collect()
    }

    /// All events: prefers the durable sink (capped), falls back to memory.
    pub async fn all(&self) -> Vec<AuditEvent> {
        if let Some(sink) = &self.sink {
            match sink.read_recent(DURABLE_READ_CAP).await {
                Ok(events) if !events.is_empty() => return events,
                Ok(_) => {}
                Err(e) => log::warn!("audit durable read failed, using memory: {}", e),
            }
        }
        self.recent(self.capacity)
    }

    /// Drain the durable queue. No-op without a sink.
    pub async fn flush(&self) {
        if let Some(tx) = &self.tx {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(SinkMsg::Flush(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
