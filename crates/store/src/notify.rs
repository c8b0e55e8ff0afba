//! Fire-and-forget notification sink.
//!
//! Delivery failures are the sink's problem: callers log and move on, and a
//! failed notification never rolls back the mutation that produced it.

use std::sync::Mutex;

use tracing::info;

/// Receiver of operational notifications (new order, payment recorded, low
/// stock). Implementations must not block for long and must not panic.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str, meta: serde_json::Value);
}

/// Production default: structured log lines. A real delivery channel (push,
/// mail) can replace this without touching callers.
#[derive(Debug, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, title: &str, message: &str, meta: serde_json::Value) {
        info!(title = %title, message = %message, meta = %meta, "notification");
    }
}

/// Test sink that records every notification.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    inner: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<(String, String, serde_json::Value)> {
        self.inner.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _, _)| t.clone())
            .collect()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify(&self, title: &str, message: &str, meta: serde_json::Value) {
        self.inner
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string(), meta));
    }
}
