//! Process-wide notification sink for server/network failures.
//!
//! Exactly one sink can be registered at a time. The host application
//! typically shows the message in a global error dialog or status line.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

/// Receives the generic, user-safe message for every server-side failure.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str);
}

impl<F> NotificationSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) {
        self(message)
    }
}

/// The single sink slot shared by every clone of the API client.
#[derive(Clone, Default)]
pub struct NotificationSlot {
    sink: Arc<Mutex<Option<Arc<dyn NotificationSink>>>>,
}

impl NotificationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sink, replacing any previous one.
    pub fn set(&self, sink: Arc<dyn NotificationSink>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn clear(&self) {
        *self.sink.lock() = None;
    }

    pub fn is_set(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Deliver a message to the registered sink, if any.
    /// Returns whether a sink received it. A panicking sink is contained.
    pub fn notify(&self, message: &str) -> bool {
        // Clone out of the lock so a sink may re-register itself
        let sink = self.sink.lock().clone();
        let Some(sink) = sink else {
            return false;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| sink.notify(message))).is_err() {
            error!("Notification sink panicked while handling a server error");
        }
        true
    }
}
