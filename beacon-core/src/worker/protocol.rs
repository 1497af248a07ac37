//! Wire messages between pages and the background worker
//!
//! Requests are `{ "type": <string>, "data"?: <any> }`:
//!
//! ```text
//! { "type": "GET_QUEUE_SIZE" }                                  → { "size": n }
//! { "type": "FLUSH_ANALYTICS" }                                 → { "success": bool, "delivered": n, "attempted": n }
//! { "type": "TRACK_EVENT", "data": { "type": kind, "data": {} } }  (no reply)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::delivery::FlushReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    GetQueueSize,
    FlushAnalytics,
    TrackEvent(TrackEventData),
}

impl WorkerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerRequest::GetQueueSize => "GET_QUEUE_SIZE",
            WorkerRequest::FlushAnalytics => "FLUSH_ANALYTICS",
            WorkerRequest::TrackEvent(_) => "TRACK_EVENT",
        }
    }

    /// Whether the sender waits on a reply port
    pub fn expects_reply(&self) -> bool {
        !matches!(self, WorkerRequest::TrackEvent(_))
    }
}

/// Payload of `TRACK_EVENT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEventData {
    /// Event kind, e.g. `page_view`
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSizeReply {
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReply {
    /// Every entry read by the flush was delivered
    pub success: bool,
    pub delivered: usize,
    pub attempted: usize,
}

impl From<&FlushReport> for FlushReply {
    fn from(report: &FlushReport) -> Self {
        Self {
            success: report.is_complete(),
            delivered: report.delivered(),
            attempted: report.attempted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerReply {
    QueueSize(QueueSizeReply),
    Flush(FlushReply),
}

/// A request in flight, with its reply port
pub(crate) struct Envelope {
    /// Correlation id, for logs
    pub id: u64,
    pub request: WorkerRequest,
    pub reply: Option<oneshot::Sender<WorkerReply>>,
}
