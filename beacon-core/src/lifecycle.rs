//! Page lifecycle triggers for flushing
//!
//! Three triggers drive delivery: a periodic timer, the page becoming hidden,
//! and teardown. Teardown cannot wait on a flush, so it only fires the
//! transport's beacon.

use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::FlushConfig;
use crate::delivery::{FlushEngine, FlushReport};
use crate::types::Visibility;

pub struct LifecycleHooks {
    engine: FlushEngine,
    config: FlushConfig,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleHooks {
    pub fn new(engine: FlushEngine, config: FlushConfig) -> Self {
        Self {
            engine,
            config,
            timer: Mutex::new(None),
        }
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn timer_running(&self) -> bool {
        self.timer()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Start flushing every `flush.interval_secs`. Calling it again while
    /// the timer runs is a no-op.
    pub fn start_timer(&self) {
        let mut timer = self.timer();
        if timer.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let period = self.config.interval();
        let engine = self.engine.clone();
        *timer = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let report = engine.flush().await;
                tracing::debug!(
                    attempted = report.attempted,
                    delivered = report.delivered(),
                    "Timer flush finished"
                );
            }
        }));
        tracing::debug!(interval_ms = period.as_millis() as u64, "Flush timer started");
    }

    pub fn stop_timer(&self) {
        if let Some(task) = self.timer().take() {
            task.abort();
            tracing::debug!("Flush timer stopped");
        }
    }

    /// Flush in the background when the page is hidden
    pub fn on_visibility_change(&self, state: Visibility) -> Option<JoinHandle<FlushReport>> {
        if state != Visibility::Hidden || !self.config.flush_on_hidden {
            return None;
        }

        let engine = self.engine.clone();
        Some(tokio::spawn(async move { engine.flush().await }))
    }

    /// Stop the timer and send the unload beacon
    pub fn on_teardown(&self) {
        self.stop_timer();
        self.engine.send_beacon();
    }
}

impl Drop for LifecycleHooks {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
