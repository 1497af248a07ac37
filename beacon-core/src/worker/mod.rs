//! Background worker and the channel pages use to reach it
//!
//! The worker runs as its own task and owns flushing on behalf of every
//! page. Pages talk to it through a [`WorkerClient`]; every request that
//! expects a reply is bounded by the configured request timeout, after which
//! the client falls back to a default answer instead of hanging.

mod bridge;
mod periodic;
mod protocol;
mod registration;

pub use bridge::serve_lines;
pub use periodic::PeriodicSync;
pub use protocol::{FlushReply, QueueSizeReply, TrackEventData, WorkerReply, WorkerRequest};
pub use registration::{RegistrationState, WorkerRegistration};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::delivery::FlushEngine;
use crate::error::{Error, Result};
use crate::tracker::Tracker;

use protocol::Envelope;

/// Request handler living in the background context
#[derive(Clone)]
pub struct BackgroundWorker {
    engine: FlushEngine,
    tracker: Tracker,
}

impl BackgroundWorker {
    pub fn new(engine: FlushEngine, tracker: Tracker) -> Self {
        Self { engine, tracker }
    }

    /// Answer one request. `TRACK_EVENT` has no reply.
    pub async fn handle(&self, request: WorkerRequest) -> Option<WorkerReply> {
        match request {
            WorkerRequest::GetQueueSize => {
                let size = match self.engine.queue().count_unsynced().await {
                    Ok(size) => size,
                    Err(e) => {
                        tracing::warn!(error = %e, "Queue size unavailable");
                        0
                    }
                };
                Some(WorkerReply::QueueSize(QueueSizeReply { size }))
            }
            WorkerRequest::FlushAnalytics => {
                let report = self.engine.flush().await;
                Some(WorkerReply::Flush(FlushReply::from(&report)))
            }
            WorkerRequest::TrackEvent(TrackEventData { event_type, data }) => {
                self.tracker.track_raw(&event_type, data).await;
                None
            }
        }
    }

    /// Start serving on a fresh channel
    pub fn spawn(self, capacity: usize, timeout: Duration) -> (WorkerClient, JoinHandle<()>) {
        let (tx, inbox) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(self.run(inbox));
        (WorkerClient::new(tx, timeout), task)
    }

    async fn run(self, mut inbox: mpsc::Receiver<Envelope>) {
        tracing::info!("Background worker active");

        while let Some(envelope) = inbox.recv().await {
            // A long flush must not hold up queue size lookups
            let worker = self.clone();
            tokio::spawn(async move { worker.dispatch(envelope).await });
        }

        tracing::info!("Background worker stopped: no clients left");
    }

    async fn dispatch(&self, envelope: Envelope) {
        let Envelope { id, request, reply } = envelope;
        let name = request.name();
        tracing::debug!(id, request = name, "Worker request received");

        let answer = self.handle(request).await;
        if let (Some(port), Some(answer)) = (reply, answer) {
            if port.send(answer).is_err() {
                tracing::debug!(id, request = name, "Requester gone before reply");
            }
        }
    }
}

/// Outcome of a flush requested through the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAck {
    Confirmed(FlushReply),
    /// No reply in time, or the worker is gone. The flush may still run.
    Unconfirmed,
}

/// Page-side end of the coordination channel
#[derive(Clone)]
pub struct WorkerClient {
    tx: mpsc::Sender<Envelope>,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl WorkerClient {
    pub(crate) fn new(tx: mpsc::Sender<Envelope>, timeout: Duration) -> Self {
        Self {
            tx,
            timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Send a request and wait for its reply, bounded by the request timeout.
    ///
    /// Requests without a reply resolve to `Ok(None)` once handed over.
    pub async fn request(&self, request: WorkerRequest) -> Result<Option<WorkerReply>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = request.name();

        let (port, answer) = if request.expects_reply() {
            let (port, answer) = oneshot::channel();
            (Some(port), Some(answer))
        } else {
            (None, None)
        };

        let exchange = async {
            self.tx
                .send(Envelope {
                    id,
                    request,
                    reply: port,
                })
                .await
                .map_err(|_| Error::Worker("background worker is not running".to_string()))?;

            match answer {
                Some(answer) => answer.await.map(Some).map_err(|_| {
                    Error::Worker(format!("{} request {} dropped by worker", name, id))
                }),
                None => Ok(None),
            }
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Worker(format!(
                "{} request {} timed out after {:?}",
                name, id, self.timeout
            ))),
        }
    }

    /// Unsynced entry count as seen by the worker; 0 when it cannot answer
    pub async fn queue_size(&self) -> usize {
        match self.request(WorkerRequest::GetQueueSize).await {
            Ok(Some(WorkerReply::QueueSize(reply))) => reply.size,
            Ok(other) => {
                tracing::warn!(reply = ?other, "Unexpected reply to GET_QUEUE_SIZE");
                0
            }
            Err(e) => {
                tracing::warn!(error = %e, "Queue size request failed; assuming empty");
                0
            }
        }
    }

    pub async fn flush(&self) -> FlushAck {
        match self.request(WorkerRequest::FlushAnalytics).await {
            Ok(Some(WorkerReply::Flush(reply))) => FlushAck::Confirmed(reply),
            Ok(other) => {
                tracing::warn!(reply = ?other, "Unexpected reply to FLUSH_ANALYTICS");
                FlushAck::Unconfirmed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Flush not confirmed by worker");
                FlushAck::Unconfirmed
            }
        }
    }

    /// Fire-and-forget; never waits on a full channel
    pub fn track_event(&self, event_type: &str, data: Option<Map<String, Value>>) -> bool {
        let envelope = Envelope {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            request: WorkerRequest::TrackEvent(TrackEventData {
                event_type: event_type.to_string(),
                data,
            }),
            reply: None,
        };

        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(event_type, error = %e, "TRACK_EVENT not delivered to worker");
                false
            }
        }
    }
}
