//! Cancellable periodic ticker
//!
//! Replaces free-running interval timers: every background loop is owned by
//! a [`Ticker`] that can be stopped deterministically.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Background loop running `task` once per period
pub struct Ticker {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn the loop. The first run happens one full period after spawning.
    ///
    /// A run that overlaps the next tick delays it; missed ticks are skipped.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticks.tick().await;

            loop {
                tokio::select! {
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                    _ = ticks.tick() => {
                        tracing::trace!(ticker = name, "tick");
                        task().await;
                    }
                }
            }
            tracing::debug!(ticker = name, "ticker stopped");
        });

        tracing::debug!(ticker = name, period_ms = period.as_millis() as u64, "ticker started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop and wait for it to exit.
    ///
    /// A run already in progress finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            tracing::warn!(ticker = self.name, error = %err, "ticker task ended abnormally");
        }
    }
}
