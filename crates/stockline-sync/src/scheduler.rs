//! # Pass Scheduler
//!
//! Background task that decides when a pass runs.
//!
//! ## Triggers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  request_sync_now() ──► Notify (one stored permit) ─┐                   │
//! │  enqueue / retry ─────► Notify (one stored permit) ─┤ N triggers during │
//! │  PassInProgress ──────► re-arms the one it consumed ┤ a pass = one      │
//! │                                                     │ extra pass        │
//! │                                                     ▼                   │
//! │  poll_interval tick ──────────────────────────► run pass               │
//! │  Offline → Online (held for online_debounce) ─►     │                   │
//! │  backoff timer (after deferred work) ─────────►     │                   │
//! │                                                     ▼                   │
//! │                                 deferred > 0 ? next_backoff() : reset   │
//! │                                                                         │
//! │  Explicit requests and backoff retries always attempt a pass, online   │
//! │  or not. Enqueue wake-ups and periodic ticks are skipped while         │
//! │  offline; reconnecting covers them. Everything but explicit requests   │
//! │  is disabled when auto_sync is off. Connectivity changes always        │
//! │  republish the status.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SyncSettings;
use crate::engine::EngineCore;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Requested,
    Enqueued,
    Interval,
    Connectivity,
    Backoff,
}

/// Handle to the running scheduler task.
pub(crate) struct Scheduler {
    triggers: Arc<Triggers>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            triggers: Arc::new(Triggers::default()),
            cancel,
            task: Mutex::new(None),
        }
    }

    /// Asks for a pass regardless of connectivity. Coalesces with any
    /// request not yet consumed.
    pub(crate) fn request(&self) {
        self.triggers.requested.notify_one();
    }

    /// Signals new work. Runs a pass only while online.
    pub(crate) fn wake(&self) {
        self.triggers.enqueued.notify_one();
    }

    /// Spawns the loop. A second call is a no-op.
    pub(crate) async fn start(&self, core: Arc<EngineCore>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("Scheduler already running");
            return;
        }
        let triggers = self.triggers.clone();
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(run(core, triggers, cancel)));
        info!("Sync scheduler started");
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Cancels the loop (and the pass it is running) and waits for it.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(?e, "Scheduler task ended abnormally");
            }
            info!("Sync scheduler stopped");
        }
    }
}

#[derive(Default)]
struct Triggers {
    requested: Notify,
    enqueued: Notify,
}

impl Triggers {
    fn rearm(&self, reason: Trigger) {
        match reason {
            Trigger::Requested => self.requested.notify_one(),
            _ => self.enqueued.notify_one(),
        }
    }
}

/// Creates the retry delay policy.
pub(crate) fn create_backoff(settings: &SyncSettings) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: settings.initial_backoff(),
        max_interval: settings.max_backoff(),
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

async fn run(core: Arc<EngineCore>, triggers: Arc<Triggers>, cancel: CancellationToken) {
    let settings = core.config().sync.clone();
    let auto = settings.auto_sync;

    let mut interval = tokio::time::interval(settings.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut connectivity = core.monitor().changes();
    let mut watching = true;

    let mut backoff = create_backoff(&settings);
    let mut retry_at: Option<Instant> = None;

    loop {
        let reason = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = triggers.requested.notified() => Trigger::Requested,

            _ = triggers.enqueued.notified(), if auto => Trigger::Enqueued,

            changed = connectivity.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let online = connectivity.borrow_and_update().is_online();
                core.publish_status().await;
                if !auto || !online {
                    continue;
                }
                Trigger::Connectivity
            }

            _ = sleep_until(retry_at), if auto && retry_at.is_some() => Trigger::Backoff,

            _ = interval.tick(), if auto => Trigger::Interval,
        };

        if reason == Trigger::Connectivity {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(settings.online_debounce()) => {}
            }
            if !core.monitor().current_state().is_online() {
                debug!("Connectivity flapped during debounce");
                continue;
            }
        }

        if reason == Trigger::Backoff {
            retry_at = None;
        }

        let offline = !core.monitor().current_state().is_online();
        if offline && matches!(reason, Trigger::Enqueued | Trigger::Interval) {
            debug!(?reason, "Offline, pass skipped");
            continue;
        }

        debug!(?reason, "Running scheduled pass");

        match core.run_pass(&cancel).await {
            Ok(report) if report.cancelled => break,
            Ok(report) if report.needs_retry() => {
                if let Some(delay) = backoff.next_backoff() {
                    debug!(delay_ms = delay.as_millis() as u64, "Deferred work, retrying later");
                    retry_at = Some(Instant::now() + delay);
                }
            }
            Ok(_) => {
                backoff.reset();
                retry_at = None;
                core.prune_synced().await;
            }
            Err(SyncError::PassInProgress) => {
                // A direct run_pass is draining; run once more after it
                core.wait_until_idle().await;
                triggers.rearm(reason);
            }
            Err(e) => {
                error!(?e, "Sync pass aborted");
                core.emitter().emit_error(&e.to_string(), !e.is_config_error());
                if let Some(delay) = backoff.next_backoff() {
                    retry_at = Some(Instant::now() + delay);
                }
            }
        }
    }

    info!("Sync scheduler loop exited");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backoff_is_bounded() {
        let settings = SyncSettings {
            initial_backoff_ms: 100,
            max_backoff_secs: 1,
            ..SyncSettings::default()
        };
        let mut backoff = create_backoff(&settings);

        for _ in 0..20 {
            let delay = backoff.next_backoff().unwrap();
            // randomization_factor 0.5 can push a delay 50% above the cap
            assert!(delay <= Duration::from_millis(1_500), "{:?}", delay);
        }

        backoff.reset();
        assert!(backoff.next_backoff().unwrap() <= Duration::from_millis(150));
    }
}
