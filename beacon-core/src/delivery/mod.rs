//! Delivery of queued events to the collection service
//!
//! ## Architecture
//!
//! Delivery is "local-first":
//! - Events are always written to the durable queue first
//! - The [`FlushEngine`] reads unsynced entries and hands them to a
//!   [`Transport`]
//! - Network failures never block local operation; unacknowledged entries
//!   simply wait for the next flush
//!
//! ## Endpoints
//!
//! ```text
//! POST /api/analytics/events/{kind}   { "events": [...] }   per-kind ingest
//! POST /api/analytics/batch           { "events": [...] }   consolidated fallback
//! ```
//!
//! ## Usage
//!
//! ```toml
//! [transport]
//! server_url = "https://telemetry.example.com"
//! api_key = "tk_live_xxxxxxxxxxxx"
//! ```

mod batch;
mod client;
mod flush;

pub use batch::EventBatch;
pub use client::HttpTransport;
pub use flush::{FlushEngine, FlushReport};

use crate::error::Result;
use crate::types::{EventKind, EventRecord};
use async_trait::async_trait;

/// Where a group of records is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /api/analytics/events/{kind}`
    Kind(EventKind),
    /// `POST /api/analytics/batch`
    Batch,
}

impl Endpoint {
    pub fn path(&self) -> String {
        match self {
            Endpoint::Kind(kind) => format!(
                "/api/analytics/events/{}",
                urlencoding::encode(kind.as_str())
            ),
            Endpoint::Batch => "/api/analytics/batch".to_string(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Sends record groups to the collection service.
///
/// `send` resolves `Ok` only when the whole group was acknowledged (any 2xx).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: Endpoint, events: &[EventRecord]) -> Result<()>;

    /// Fire-and-forget flush signal for process teardown. Must return
    /// immediately, and the attempt must not depend on the caller's async
    /// runtime staying alive.
    fn send_beacon(&self);
}
