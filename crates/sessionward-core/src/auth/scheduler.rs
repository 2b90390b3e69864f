use std::ops::ControlFlow;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Cancellable periodic timer driving proactive renewal.
///
/// At most one timer task exists; `start` replaces it. The first tick fires
/// one full interval after `start`.
#[derive(Default)]
pub struct RenewalScheduler {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer. `tick` runs on every period until it returns
    /// `ControlFlow::Break` or the timer is stopped. Must be called from
    /// within a Tokio runtime.
    pub fn start<F>(&self, interval: Duration, mut tick: F)
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        if interval.is_zero() {
            warn!("Renewal interval is zero, not arming the scheduler");
            self.stop();
            return;
        }

        let Some(first) = Instant::now().checked_add(interval) else {
            warn!(interval_secs = interval.as_secs(), "Renewal interval out of range, not arming the scheduler");
            self.stop();
            return;
        };

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().is_break() {
                    debug!("Renewal scheduler finished");
                    break;
                }
            }
        });

        if let Some(previous) = self.handle.lock().replace(task) {
            previous.abort();
        }
        debug!(interval_secs = interval.as_secs(), "Renewal scheduler armed");
    }

    /// Cancel the timer. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            debug!("Renewal scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
