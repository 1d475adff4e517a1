//! Error types used across the daemonkit runtime.
//!
//! Everything the core can fail with is folded into a single [`CoreError`]
//! enum so that queues and the event bus can record, clone and replay
//! failures uniformly. The split that matters operationally is
//! [`CoreError::is_expected`]: expected failures are logged tersely,
//! unexpected ones (`Internal`) with full diagnostics, since they signal a
//! programming defect rather than an operational condition.

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::context::ContextId;

/// Errors produced by the daemonkit core and by application jobs.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A context id that is not (or no longer) registered was activated.
    #[error("context {id} is not registered")]
    InvalidContext {
        /// The stale or unknown context id.
        id: ContextId,
    },

    /// Illegal scheduler operation (executing an already-working job,
    /// repeat interval below one second, resuming a never-started job, ...).
    #[error("scheduler: {reason}")]
    Scheduler {
        /// What was attempted and why it is illegal.
        reason: String,
    },

    /// A non-repeating job was scheduled into the past.
    #[error("invalid schedule time {at} (in the past, job does not repeat)")]
    InvalidSchedule {
        /// The resolved fire time that was rejected.
        at: DateTime<Local>,
    },

    /// Internal defect: context restoration failed, queue operation on an
    /// unknown item, unimplemented block action. Logged with full detail.
    #[error("internal error: {reason}")]
    Internal {
        /// Diagnostic description.
        reason: String,
    },

    /// Pass-through application error raised by job/worker/handler code.
    ///
    /// `code` is a short stable machine label (`"DB_ERROR"`, `"ACCESS_DENIED"`);
    /// `message` is for humans.
    #[error("{code}: {message}")]
    App {
        /// Short stable error code.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl CoreError {
    /// Builds a pass-through application error.
    pub fn app(code: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::App {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Builds an internal-defect error.
    pub fn internal(reason: impl Into<String>) -> Self {
        CoreError::Internal {
            reason: reason.into(),
        }
    }

    /// Builds a scheduler-misuse error.
    pub fn scheduler(reason: impl Into<String>) -> Self {
        CoreError::Scheduler {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CoreError::InvalidContext { .. } => "invalid_context",
            CoreError::Scheduler { .. } => "scheduler_error",
            CoreError::InvalidSchedule { .. } => "invalid_schedule",
            CoreError::Internal { .. } => "internal_error",
            CoreError::App { .. } => "app_error",
        }
    }

    /// Whether this failure is an expected operational condition.
    ///
    /// Expected errors are logged tersely by the queues; anything else gets
    /// a full diagnostic dump because it points at a defect in the program,
    /// not in the environment.
    pub fn is_expected(&self) -> bool {
        !matches!(self, CoreError::Internal { .. })
    }
}
