#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Pipeline events: what a stage produced, published to memory or a JSONL file.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};
use uuid::Uuid;

/// Live-subscriber buffer, independent of the retained backlog.
const CHANNEL_CAPACITY: usize = 1024;

/// Event emitted when a pipeline stage finishes (or fails).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Unique identifier.
    pub id: Uuid,
    /// Stage that produced the event (`collector`, `trainer`, ...).
    pub stage: String,
    /// Dotted event type, e.g. `pipeline.split.completed`.
    pub event_type: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Stage-specific payload (row counts, artifact paths, metrics).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PipelineEvent {
    /// Creates an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: stage.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Sink for pipeline events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: PipelineEvent) -> Result<()>;
}

/// In-memory broadcast bus with a bounded backlog, used by tests and embedders.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<PipelineEvent>,
    backlog: Arc<Mutex<VecDeque<PipelineEvent>>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Creates a bus that keeps at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY.max(capacity));
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Live receiver for events published after this call. The channel holds
    /// more events than the backlog, so a slow receiver still sees every one
    /// the backlog has already evicted.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PipelineEvent> {
        self.backlog.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: PipelineEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(event.clone());
        }
        // No subscribers is fine; the backlog still records the event.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Appends events as JSON lines to a file.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates the publisher, creating parent directories of `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating event log dir {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Event log location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: PipelineEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening event log {}", self.path.display()))?;
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    #[test]
    fn memory_bus_delivers_and_bounds_backlog() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(2);
            let mut rx = bus.subscribe();
            for stage in ["collector", "splitter", "trainer"] {
                bus.publish(PipelineEvent::new(stage, "pipeline.stage.completed", json!({})))
                    .await
                    .unwrap();
            }
            for expected in ["collector", "splitter", "trainer"] {
                assert_eq!(rx.recv().await.unwrap().stage, expected);
            }
            let retained: Vec<_> = bus.snapshot().into_iter().map(|e| e.stage).collect();
            assert_eq!(retained, vec!["splitter", "trainer"]);
        });
    }

    #[test]
    fn file_publisher_appends_lines() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let publisher = FileEventPublisher::new(dir.path().join("events/run.jsonl")).unwrap();
            publisher
                .publish(PipelineEvent::new(
                    "splitter",
                    "pipeline.split.completed",
                    json!({ "train": 7 }),
                ))
                .await
                .unwrap();
            publisher
                .publish(PipelineEvent::new("trainer", "pipeline.train.completed", json!({})))
                .await
                .unwrap();
            let content = std::fs::read_to_string(publisher.path()).unwrap();
            assert_eq!(content.lines().count(), 2);
            assert!(content.contains("pipeline.split.completed"));
        });
    }
}
