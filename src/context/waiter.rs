//! Suspension-aware waiting: capture the context on suspend, restore on resume.
//!
//! Awaiting anything hands control back to the loop, and by the time the
//! result is available an arbitrary number of unrelated chains may have run
//! and moved the active context elsewhere. [`Waiter::wait`] snapshots the
//! active id at the moment of suspension and re-activates it when the result
//! arrives, so code written as "do A, suspend, then do B" always sees its own
//! logical context for B.
//!
//! ```text
//! chain X (ctx C1):   wait(fut) ──┐ snapshot C1      ┌──► restore C1, continue
//!                                 ▼                  │
//! loop:               ... chain Y runs under C2 ...  │
//!                                 │                  │
//! fut resolves:                   └──────────────────┘
//! ```
//!
//! ## Rules
//! - Restoration is on by default; [`Waiter::no_restore`] disables it for
//!   one waiter. Cross-boundary RPC glue uses that to deliberately pick up
//!   the *post-call* ambient context instead of the pre-call one.
//! - A snapshot that died while suspended is a programming defect: it is
//!   logged as an error and the ambient context is left untouched.

use std::future::Future;
use std::sync::Arc;

use crate::context::registry::ContextRegistry;

/// Wrapper that makes one suspension point context-safe.
pub struct Waiter {
    registry: Arc<ContextRegistry>,
    restore: bool,
}

impl Waiter {
    /// Creates a waiter with restoration enabled.
    pub fn new(registry: &Arc<ContextRegistry>) -> Self {
        Self {
            registry: Arc::clone(registry),
            restore: true,
        }
    }

    /// Disables context restoration for this waiter.
    pub fn no_restore(mut self) -> Self {
        self.restore = false;
        self
    }

    /// Awaits `fut`, then re-activates the context that was active when the
    /// wait began (unless restoration is disabled).
    pub async fn wait<F: Future>(&self, fut: F) -> F::Output {
        let snapshot = self.registry.current_id();
        let out = fut.await;
        if self.restore && self.registry.set_active(snapshot).is_err() {
            tracing::error!(
                context = %snapshot,
                "context snapshot died while suspended; ambient context left in place"
            );
        }
        out
    }
}
