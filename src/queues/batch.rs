//! Batch fan-out queue: run a worker once per item, sequentially.
//!
//! [`BatchQueue`] does some asynchronous work for a list of items, one item
//! fully settled before the next starts, and records a tagged result per
//! item. It is the engine behind one-shot fan-out operations and behind
//! event emission (see [`Observable`](crate::Observable)).
//!
//! ```text
//! run(work):
//!   for each item (in list order):
//!     ├─► re-activate the run-entry context (Waiter)
//!     ├─► work(item) ── Ok(v)  → record TaskResult{ok}, success_count += 1
//!     │              └─ Err(e) → normalize, log, record TaskResult{err}
//!     └─► stop_on_failure? → abort, remaining items dropped
//! ```
//!
//! ## Rules
//! - Items are processed strictly in list order, never concurrently.
//! - Every recorded failure is a [`CoreError`]; expected errors are logged
//!   tersely, unexpected ones with full diagnostics.
//! - After `run()` the caller is never uncertain whether all, some or no
//!   items succeeded: `is_success()`, `success_count()`, `first_error()`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use crate::context::{ContextRegistry, Waiter};
use crate::error::CoreError;

/// Tagged outcome of one batch item.
#[derive(Debug, Clone)]
pub struct TaskResult<I, T> {
    /// The item this outcome belongs to.
    pub item: I,
    /// The worker's result for this item.
    pub outcome: Result<T, CoreError>,
}

impl<I, T> TaskResult<I, T> {
    /// True if the worker succeeded for this item.
    pub fn ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Sequential fan-out over a fixed item list. Created per batch, discarded
/// after [`BatchQueue::run`] resolves.
pub struct BatchQueue<I, T> {
    registry: Arc<ContextRegistry>,
    items: VecDeque<I>,
    stop_on_failure: bool,
    results: Vec<TaskResult<I, T>>,
    success: bool,
    success_count: usize,
    first_error: Option<(CoreError, I)>,
}

impl<I: Clone, T> BatchQueue<I, T> {
    /// Creates a queue over the given items.
    pub fn new(registry: &Arc<ContextRegistry>, items: impl IntoIterator<Item = I>) -> Self {
        Self {
            registry: Arc::clone(registry),
            items: items.into_iter().collect(),
            stop_on_failure: false,
            results: Vec::new(),
            success: true,
            success_count: 0,
            first_error: None,
        }
    }

    /// Aborts the run at the first failing item when set.
    pub fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    /// Runs `work` once per item, strictly sequentially.
    ///
    /// The context that was active when `run` was invoked is re-activated
    /// before each step, so a worker that wanders off into other contexts
    /// cannot poison the rest of the batch.
    pub async fn run<W, Fut>(&mut self, work: W) -> &[TaskResult<I, T>]
    where
        W: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let waiter = Waiter::new(&self.registry);
        while let Some(item) = self.items.pop_front() {
            let outcome = waiter.wait(work(item.clone())).await;
            if let Err(e) = &outcome {
                self.success = false;
                if e.is_expected() {
                    tracing::warn!(error = %e, "batch item failed");
                } else {
                    tracing::error!(error = ?e, "batch item failed unexpectedly");
                }
                if self.first_error.is_none() {
                    self.first_error = Some((e.clone(), item.clone()));
                }
            } else {
                self.success_count += 1;
            }
            let failed = outcome.is_err();
            self.results.push(TaskResult { item, outcome });
            if failed && self.stop_on_failure {
                self.items.clear();
                break;
            }
        }
        &self.results
    }

    /// True iff no item failed.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Number of items that succeeded.
    pub fn success_count(&self) -> usize {
        self.success_count
    }

    /// The most recently recorded result.
    pub fn last_result(&self) -> Option<&TaskResult<I, T>> {
        self.results.last()
    }

    /// The first failure and the item that caused it.
    pub fn first_error(&self) -> Option<&(CoreError, I)> {
        self.first_error.as_ref()
    }

    /// All recorded results, in input order.
    pub fn results(&self) -> &[TaskResult<I, T>] {
        &self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextParams, NullResources};
    use pretty_assertions::assert_eq;

    fn registry() -> Arc<ContextRegistry> {
        ContextRegistry::new(Arc::new(NullResources))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn results_match_input_length_and_order() {
        let reg = registry();
        let mut q: BatchQueue<u32, u32> = BatchQueue::new(&reg, [1, 2, 3, 4]);
        q.run(|n| async move {
            if n % 2 == 0 {
                Err(CoreError::app("EVEN", format!("{n} is even")))
            } else {
                Ok(n * 10)
            }
        })
        .await;

        assert_eq!(q.results().len(), 4);
        let tags: Vec<(u32, bool)> = q.results().iter().map(|r| (r.item, r.ok())).collect();
        assert_eq!(tags, vec![(1, true), (2, false), (3, true), (4, false)]);
        assert!(!q.is_success());
        assert_eq!(q.success_count(), 2);

        let (err, item) = q.first_error().unwrap();
        assert_eq!(*item, 2);
        assert_eq!(err.as_label(), "app_error");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_on_failure_halts_at_first_failure() {
        let reg = registry();
        let mut q: BatchQueue<u32, ()> =
            BatchQueue::new(&reg, [1, 2, 3, 4, 5]).with_stop_on_failure(true);
        q.run(|n| async move {
            if n == 3 {
                Err(CoreError::app("BOOM", "third item"))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(q.results().len(), 3, "remaining items are not processed");
        assert!(!q.last_result().unwrap().ok(), "last entry is the failure");
        assert_eq!(q.success_count(), 2);
        assert!(!q.is_success());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_batch_is_a_success() {
        let reg = registry();
        let mut q: BatchQueue<u32, ()> = BatchQueue::new(&reg, []);
        assert!(q.run(|_| async { Ok(()) }).await.is_empty());
        assert!(q.is_success());
        assert_eq!(q.success_count(), 0);
        assert!(q.first_error().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn each_step_sees_the_run_entry_context() {
        let reg = registry();
        let run_ctx = reg.create(ContextParams::initiator("batch"));
        let stray = reg.create(ContextParams::initiator("stray"));
        reg.set_active(run_ctx).unwrap();

        let reg2 = reg.clone();
        let mut q: BatchQueue<u32, crate::context::ContextId> = BatchQueue::new(&reg, [1, 2, 3]);
        let results = q
            .run(|_| {
                let reg = reg2.clone();
                async move {
                    let seen = reg.current_id();
                    // A worker that wanders off must not poison the next step.
                    reg.set_active(stray).unwrap();
                    Ok(seen)
                }
            })
            .await;

        for r in results {
            assert_eq!(*r.outcome.as_ref().unwrap(), run_ctx);
        }
        assert_eq!(reg.current_id(), run_ctx, "restored after the batch too");
    }
}
