//! # beacon-core
//!
//! Client-side telemetry: capture, durable queueing and batched delivery.
//!
//! This library provides:
//! - Event records and the session/device identity stamped on them
//! - A SQLite-backed queue of pending records
//! - The flush engine that delivers queued records per kind, falling back to
//!   one consolidated batch
//! - A background worker reachable over a request/reply channel
//! - Lifecycle triggers (timer, page hidden, teardown)
//! - Configuration and logging
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beacon_core::{Config, FlushEngine, HttpTransport, IdentityProvider, QueueHandle, Tracker};
//!
//! # async fn run() -> beacon_core::Result<()> {
//! let config = Config::load()?;
//! let queue = QueueHandle::from_config(&config.queue);
//! let tracker = Tracker::new(queue.clone(), IdentityProvider::new(config.identity.clone()));
//!
//! tracker.track_page_view("https://app.example/", Some("Home")).await;
//!
//! let transport = HttpTransport::new(config.transport.clone())?;
//! let report = FlushEngine::new(queue, Arc::new(transport)).flush().await;
//! println!("delivered {}", report.delivered());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{EventQueue, QueueHandle};
pub use delivery::{Endpoint, FlushEngine, FlushReport, HttpTransport, Transport};
pub use error::{Error, Result};
pub use identity::IdentityProvider;
pub use lifecycle::LifecycleHooks;
pub use tracker::Tracker;
pub use types::*;
pub use worker::{FlushAck, WorkerClient, WorkerRegistration};

// Public modules
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod tracker;
pub mod types;
pub mod worker;
