//! Worker registration lifecycle
//!
//! `Unregistered → Registering → Active`. A failed registration drops back to
//! `Unregistered` and may be retried; once active, later calls hand out the
//! existing client.

use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::delivery::FlushEngine;
use crate::tracker::Tracker;

use super::periodic::{self, PeriodicSync};
use super::{BackgroundWorker, WorkerClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Active,
}

struct ActiveWorker {
    client: WorkerClient,
    worker_task: JoinHandle<()>,
    periodic_task: Option<JoinHandle<()>>,
    periodic: PeriodicSync,
}

struct Slot {
    state: RegistrationState,
    active: Option<ActiveWorker>,
}

pub struct WorkerRegistration {
    config: WorkerConfig,
    slot: Mutex<Slot>,
}

impl WorkerRegistration {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot {
                state: RegistrationState::Unregistered,
                active: None,
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> RegistrationState {
        self.slot().state
    }

    /// Client of the active worker, if any
    pub fn client(&self) -> Option<WorkerClient> {
        self.slot().active.as_ref().map(|active| active.client.clone())
    }

    /// Outcome of the periodic sync registration made on activation
    pub fn periodic_sync(&self) -> Option<PeriodicSync> {
        self.slot().active.as_ref().map(|active| active.periodic)
    }

    /// Bring the worker up. Returns `None` while another registration is in
    /// progress or when the queue cannot be opened.
    pub async fn register(&self, engine: FlushEngine, tracker: Tracker) -> Option<WorkerClient> {
        {
            let mut slot = self.slot();
            match slot.state {
                RegistrationState::Active => {
                    return slot.active.as_ref().map(|active| active.client.clone())
                }
                RegistrationState::Registering => {
                    tracing::debug!("Worker registration already in progress");
                    return None;
                }
                RegistrationState::Unregistered => slot.state = RegistrationState::Registering,
            }
        }

        if let Err(e) = engine.queue().ensure_open().await {
            tracing::warn!(error = %e, "Worker registration failed: queue unavailable");
            self.slot().state = RegistrationState::Unregistered;
            return None;
        }

        let worker = BackgroundWorker::new(engine.clone(), tracker);
        let (client, worker_task) =
            worker.spawn(self.config.channel_capacity, self.config.request_timeout());
        let (periodic, periodic_task) = periodic::register(&self.config.periodic_sync, engine);

        let mut slot = self.slot();
        slot.active = Some(ActiveWorker {
            client: client.clone(),
            worker_task,
            periodic_task,
            periodic,
        });
        slot.state = RegistrationState::Active;
        tracing::info!(periodic_sync = ?periodic, "Worker registered");

        Some(client)
    }

    /// Stop the worker and its periodic task
    pub fn unregister(&self) {
        let mut slot = self.slot();
        if let Some(active) = slot.active.take() {
            active.worker_task.abort();
            if let Some(task) = active.periodic_task {
                task.abort();
            }
            tracing::info!("Worker unregistered");
        }
        slot.state = RegistrationState::Unregistered;
    }
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdentityConfig, PeriodicSyncConfig, PermissionState};
    use crate::db::QueueHandle;
    use crate::delivery::{Endpoint, Transport};
    use crate::error::Result;
    use crate::identity::IdentityProvider;
    use crate::types::EventRecord;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct AcceptAll;

    #[async_trait]
    impl Transport for AcceptAll {
        async fn send(&self, _endpoint: Endpoint, _events: &[EventRecord]) -> Result<()> {
            Ok(())
        }

        fn send_beacon(&self) {}
    }

    fn parts(queue: QueueHandle) -> (FlushEngine, Tracker) {
        let tracker = Tracker::new(queue.clone(), IdentityProvider::new(IdentityConfig::default()));
        (FlushEngine::new(queue, Arc::new(AcceptAll)), tracker)
    }

    #[tokio::test]
    async fn test_register_activates_once() {
        let registration = WorkerRegistration::new(WorkerConfig::default());
        assert_eq!(registration.state(), RegistrationState::Unregistered);

        let (engine, tracker) = parts(QueueHandle::in_memory().unwrap());
        let first = registration
            .register(engine.clone(), tracker.clone())
            .await
            .unwrap();
        assert_eq!(registration.state(), RegistrationState::Active);
        assert_eq!(
            registration.periodic_sync(),
            Some(PeriodicSync::PermissionMissing(PermissionState::Prompt))
        );

        let second = registration.register(engine, tracker).await.unwrap();
        assert_eq!(first.queue_size().await, 0);
        assert_eq!(second.queue_size().await, 0);
    }

    #[tokio::test]
    async fn test_failed_registration_returns_to_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let queue = QueueHandle::lazy(blocker.join("queue.db"), Duration::from_millis(100));

        let registration = WorkerRegistration::new(WorkerConfig::default());
        let (engine, tracker) = parts(queue);

        assert!(registration.register(engine, tracker).await.is_none());
        assert_eq!(registration.state(), RegistrationState::Unregistered);
        assert!(registration.client().is_none());
    }

    #[tokio::test]
    async fn test_granted_permission_registers_periodic_sync() {
        let config = WorkerConfig {
            periodic_sync: PeriodicSyncConfig {
                permission: PermissionState::Granted,
                ..Default::default()
            },
            ..Default::default()
        };
        let registration = WorkerRegistration::new(config);
        let (engine, tracker) = parts(QueueHandle::in_memory().unwrap());

        registration.register(engine, tracker).await.unwrap();
        assert_eq!(registration.periodic_sync(), Some(PeriodicSync::Registered));
    }

    #[tokio::test]
    async fn test_unregister_stops_worker() {
        let registration = WorkerRegistration::new(WorkerConfig {
            request_timeout_ms: 100,
            ..Default::default()
        });
        let (engine, tracker) = parts(QueueHandle::in_memory().unwrap());
        let client = registration.register(engine, tracker).await.unwrap();

        registration.unregister();
        assert_eq!(registration.state(), RegistrationState::Unregistered);

        // Aborted worker drops its inbox; the client falls back
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.queue_size().await, 0);
        assert!(!client.is_connected());
    }
}
