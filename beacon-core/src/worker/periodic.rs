//! Page-independent periodic wake-up
//!
//! Registered once when the worker activates. Without host permission the
//! registration is skipped and logged; it is not retried.

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::{PeriodicSyncConfig, PermissionState};
use crate::delivery::FlushEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicSync {
    Registered,
    Disabled,
    PermissionMissing(PermissionState),
}

/// Register the periodic flush. Returns the outcome and, when registered,
/// the task driving it.
pub fn register(
    config: &PeriodicSyncConfig,
    engine: FlushEngine,
) -> (PeriodicSync, Option<JoinHandle<()>>) {
    if !config.enabled {
        tracing::debug!("Periodic sync disabled by configuration");
        return (PeriodicSync::Disabled, None);
    }

    if config.permission != PermissionState::Granted {
        tracing::info!(
            permission = ?config.permission,
            "Periodic sync not permitted; skipping registration"
        );
        return (PeriodicSync::PermissionMissing(config.permission), None);
    }

    let period = config.interval();
    let task = tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            tracing::debug!("Periodic sync wake-up");
            let report = engine.flush().await;
            tracing::info!(
                attempted = report.attempted,
                delivered = report.delivered(),
                "Periodic sync flush finished"
            );
        }
    });

    tracing::info!(interval_secs = period.as_secs(), "Periodic sync registered");
    (PeriodicSync::Registered, Some(task))
}
