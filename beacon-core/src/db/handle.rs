//! Async, lazily opened handle to the durable queue
//!
//! The queue is opened on first use and never explicitly closed. Clones share
//! one connection; the page and the background worker each build their own
//! handle over the same file. Blocking SQLite work runs on tokio's blocking
//! pool so callers never stall their executor.

use super::repo::EventQueue;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::types::{EventRecord, QueueEntry, QueueStats};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

#[derive(Clone)]
pub struct QueueHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    /// Where to open from; `None` when built around an already-open queue
    source: Option<(PathBuf, Duration)>,
    queue: OnceCell<Arc<EventQueue>>,
}

impl QueueHandle {
    /// Handle that opens `path` on first use
    pub fn lazy(path: PathBuf, busy_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                source: Some((path, busy_timeout)),
                queue: OnceCell::new(),
            }),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::lazy(config.resolved_path(), config.busy_timeout())
    }

    /// Wrap an already-open (and migrated) queue
    pub fn from_queue(queue: EventQueue) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                source: None,
                queue: OnceCell::new_with(Some(Arc::new(queue))),
            }),
        }
    }

    /// In-memory queue, mostly for tests
    pub fn in_memory() -> Result<Self> {
        let queue = EventQueue::open_in_memory()?;
        queue.migrate()?;
        Ok(Self::from_queue(queue))
    }

    /// Open the queue now. A failed open is not cached; the next call retries.
    pub async fn ensure_open(&self) -> Result<()> {
        self.queue().await.map(|_| ())
    }

    async fn queue(&self) -> Result<Arc<EventQueue>> {
        let queue = self
            .inner
            .queue
            .get_or_try_init(|| async {
                let (path, busy_timeout) = self.inner.source.clone().ok_or_else(|| {
                    Error::QueueUnavailable("queue has no backing path".to_string())
                })?;

                tokio::task::spawn_blocking(move || -> Result<Arc<EventQueue>> {
                    tracing::info!(path = %path.display(), "Opening event queue");
                    let queue = EventQueue::open(&path, busy_timeout)?;
                    queue.migrate()?;
                    Ok(Arc::new(queue))
                })
                .await
                .map_err(|e| Error::QueueUnavailable(format!("queue open task failed: {}", e)))?
            })
            .await?;
        Ok(Arc::clone(queue))
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&EventQueue) -> Result<T> + Send + 'static,
    {
        let queue = self.queue().await?;
        tokio::task::spawn_blocking(move || op(&queue))
            .await
            .map_err(|e| Error::QueueUnavailable(format!("queue task failed: {}", e)))?
    }

    /// Append a record. Fails open: malformed records and store failures are
    /// logged and dropped, and `None` is returned.
    pub async fn enqueue(&self, record: EventRecord) -> Option<i64> {
        if let Err(e) = record.validate() {
            tracing::warn!(kind = %record.kind(), error = %e, "Rejected malformed event");
            return None;
        }

        let kind = record.kind();
        match self.run(move |q| q.enqueue(&record)).await {
            Ok(id) => {
                tracing::trace!(id, kind = %kind, "Enqueued event");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Dropped event: queue unavailable");
                None
            }
        }
    }

    pub async fn count_unsynced(&self) -> Result<usize> {
        self.run(|q| q.count_unsynced()).await
    }

    pub async fn list_unsynced(&self) -> Result<Vec<QueueEntry>> {
        self.run(|q| q.list_unsynced()).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
        self.run(move |q| q.get(id)).await
    }

    pub async fn mark_synced(&self, ids: Vec<i64>) -> Result<usize> {
        self.run(move |q| q.mark_synced(&ids)).await
    }

    pub async fn purge_synced(&self) -> Result<usize> {
        self.run(|q| q.purge_synced()).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.run(|q| q.stats()).await
    }
}
