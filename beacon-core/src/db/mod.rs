//! Durable queue storage
//!
//! This module provides the on-device event queue using SQLite with:
//! - Schema migrations
//! - A blocking repository ([`EventQueue`])
//! - A lazily opened async handle ([`QueueHandle`]) shared by the flush
//!   engine, the tracker and the background worker

pub mod handle;
pub mod repo;
pub mod schema;

pub use handle::QueueHandle;
pub use repo::EventQueue;
