//! Operator alert sink.
//!
//! The scheduler escalates two conditions here instead of failing a call:
//! a watchdog timeout (execution exceeded its budget) and a blocker conflict
//! with no configured policy. Both are noticed asynchronously, after the
//! triggering call has already returned, so the only useful destination is
//! an operator-facing channel.
//!
//! [`LogAlert`] routes alerts to `tracing`; real deployments plug in a mail,
//! chat or paging sink.

use std::sync::Arc;

/// Destination for operational alerts.
pub trait Alert: Send + Sync + 'static {
    /// Delivers one alert. `tags` classify it ("error", "watchdog", ...).
    fn notify(&self, message: &str, tags: &[&str]);
}

/// Shared handle to an alert sink.
pub type AlertRef = Arc<dyn Alert>;

/// Default sink: alerts become `tracing` error records.
#[derive(Debug, Default)]
pub struct LogAlert;

impl Alert for LogAlert {
    fn notify(&self, message: &str, tags: &[&str]) {
        tracing::error!(tags = ?tags, "{message}");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Alert;
    use std::sync::Mutex;

    /// Records alerts for assertions.
    #[derive(Default)]
    pub struct RecordingAlert {
        pub messages: Mutex<Vec<String>>,
    }

    impl Alert for RecordingAlert {
        fn notify(&self, message: &str, _tags: &[&str]) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    impl RecordingAlert {
        pub fn count(&self) -> usize {
            self.messages.lock().unwrap().len()
        }
    }
}
