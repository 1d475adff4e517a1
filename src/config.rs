//! Global runtime configuration.
//!
//! [`CoreConfig`] centralizes the few knobs the core needs. It is consumed in
//! two places:
//! 1. **Facade construction**: `CoreBuilder::new(config)`
//! 2. **Scheduler defaults**: every new job inherits `max_exec_time`
//!
//! ## Sentinel values
//! - `max_exec_time = 0s` → watchdog disabled for jobs that don't override it

use std::time::Duration;

/// Configuration for the daemon core runtime.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Default execution-time budget per scheduler job.
    ///
    /// When a job's execution has not settled after this long, the watchdog
    /// raises an operator alert. It never cancels the work: an unresolved
    /// execution on a repeating job silently stalls all future occurrences,
    /// which is exactly what the alert is for. `0s` disables the watchdog.
    pub max_exec_time: Duration,

    /// Minimum repeat interval accepted by `Job::repeated`.
    ///
    /// Timer-driven jobs below one second degenerate into busy loops on the
    /// single dispatch thread, so the floor is enforced rather than advised.
    pub min_repeat_interval: Duration,
}

impl CoreConfig {
    /// Returns the default watchdog budget as an `Option`.
    ///
    /// - `None` → watchdog disabled
    /// - `Some(d)` → alert after `d` of unsettled execution
    #[inline]
    pub fn default_max_exec(&self) -> Option<Duration> {
        if self.max_exec_time == Duration::ZERO {
            None
        } else {
            Some(self.max_exec_time)
        }
    }
}

impl Default for CoreConfig {
    /// Default configuration:
    ///
    /// - `max_exec_time = 10min` (matches the historical daemon default)
    /// - `min_repeat_interval = 1s`
    fn default() -> Self {
        Self {
            max_exec_time: Duration::from_secs(600),
            min_repeat_interval: Duration::from_secs(1),
        }
    }
}
