//! Always-draining FIFO of one-shot asynchronous jobs.
//!
//! Unlike [`BatchQueue`](crate::BatchQueue), the [`ActionQueue`] has no fixed
//! item set and no overall completion callback: it sleeps while empty, and
//! every enqueued job gets its own completion handling. One job is in flight
//! at a time.
//!
//! ## Drain loop
//! ```text
//! enqueue() ──► push item ──► idle? plan a check on the next loop tick
//!
//! check:
//!   ├─ executing?        → nothing (the finisher plans the next check)
//!   ├─ head item present → mark executing, run it,
//!   │                      restore the enqueue-time context,
//!   │                      deliver the result, plan the next check
//!   └─ empty             → unplanned; resolve wait_for_finish() waiters
//! ```
//!
//! ## Rules
//! - FIFO order, except where [`ActionHandle::move_to_top`] or
//!   [`ActionQueue::clean_by_identifier`] rearrange **pending** items.
//! - The executing item can never be pulled mid-flight: cleaning matches
//!   pending items only, and `move_to_top` on the executing item is a no-op.
//! - A context-restoration failure is logged and turns the item's result
//!   into an `Internal` error; the drain loop itself never dies of it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::context::{ContextId, ContextRegistry};
use crate::error::CoreError;

type ActionFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CoreError>> + Send>;

struct QueuedAction {
    seq: u64,
    work: ActionFn,
    identifier: Option<String>,
    result_tx: oneshot::Sender<Result<(), CoreError>>,
    context_id: ContextId,
}

struct QueueState {
    items: VecDeque<QueuedAction>,
    /// Sequence number of the in-flight item, if any.
    executing: Option<u64>,
    /// True from the first planned check until an empty check runs.
    check_planned: bool,
    finish_waiters: Vec<oneshot::Sender<()>>,
    next_seq: u64,
}

struct QueueInner {
    registry: Arc<ContextRegistry>,
    state: Mutex<QueueState>,
}

impl QueueInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().expect("action queue state poisoned")
    }
}

/// Endless sequential queue of one-shot jobs.
pub struct ActionQueue {
    inner: Arc<QueueInner>,
}

/// Handle to one enqueued action.
///
/// Lets the caller await this specific item, promote it, or cancel it while
/// it is still pending.
pub struct ActionHandle {
    seq: u64,
    identifier: Option<String>,
    queue: Weak<QueueInner>,
    result_rx: oneshot::Receiver<Result<(), CoreError>>,
}

impl ActionQueue {
    /// Creates an empty, idle queue.
    pub fn new(registry: &Arc<ContextRegistry>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                registry: Arc::clone(registry),
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    executing: None,
                    check_planned: false,
                    finish_waiters: Vec::new(),
                    next_seq: 1,
                }),
            }),
        }
    }

    /// Enqueues a job; the queue starts draining on the next loop tick.
    ///
    /// The currently active context is captured and restored once the job
    /// settles, so completion handling runs under the context that enqueued
    /// the work, not whatever happened to be active at that moment.
    pub fn enqueue<F, Fut>(&self, work: F) -> ActionHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.enqueue_inner(None, Box::new(move || Box::pin(work())))
    }

    /// Like [`ActionQueue::enqueue`], with an identifier for later lookup
    /// and cleaning.
    pub fn enqueue_tagged<F, Fut>(&self, identifier: impl Into<String>, work: F) -> ActionHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.enqueue_inner(Some(identifier.into()), Box::new(move || Box::pin(work())))
    }

    fn enqueue_inner(&self, identifier: Option<String>, work: ActionFn) -> ActionHandle {
        let (result_tx, result_rx) = oneshot::channel();
        let context_id = self.inner.registry.current_id();

        let mut st = self.inner.lock_state();
        let seq = st.next_seq;
        st.next_seq += 1;
        st.items.push_back(QueuedAction {
            seq,
            work,
            identifier: identifier.clone(),
            result_tx,
            context_id,
        });
        tracing::debug!(seq, "action enqueued");
        let plan = !st.check_planned;
        if plan {
            st.check_planned = true;
        }
        drop(st);

        if plan {
            spawn_check(Arc::clone(&self.inner));
        }
        ActionHandle {
            seq,
            identifier,
            queue: Arc::downgrade(&self.inner),
            result_rx,
        }
    }

    /// True if a pending (not yet started) item carries this identifier.
    pub fn find_by_identifier(&self, identifier: &str) -> bool {
        self.inner
            .lock_state()
            .items
            .iter()
            .any(|i| i.identifier.as_deref() == Some(identifier))
    }

    /// Removes pending items with this identifier; returns how many.
    ///
    /// The executing item is never pulled mid-flight, so it is unaffected
    /// even when its identifier matches.
    pub fn clean_by_identifier(&self, identifier: &str) -> usize {
        let mut st = self.inner.lock_state();
        let before = st.items.len();
        st.items
            .retain(|i| i.identifier.as_deref() != Some(identifier));
        before - st.items.len()
    }

    /// Number of pending items (excludes the executing one).
    pub fn pending(&self) -> usize {
        self.inner.lock_state().items.len()
    }

    /// True when the queue is empty and nothing is in flight.
    pub fn is_idle(&self) -> bool {
        let st = self.inner.lock_state();
        !st.check_planned && st.executing.is_none()
    }

    /// Resolves once the queue becomes empty and idle.
    ///
    /// Resolves immediately if it already is; any number of callers may wait.
    pub async fn wait_for_finish(&self) {
        let rx = {
            let mut st = self.inner.lock_state();
            if !st.check_planned && st.executing.is_none() {
                return;
            }
            let (tx, rx) = oneshot::channel();
            st.finish_waiters.push(tx);
            rx
        };
        let _ = rx.await;
    }
}

impl ActionHandle {
    /// The identifier this item was tagged with, if any.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Awaits this item's result.
    ///
    /// Reports an `Internal` error if the item was cancelled before it ran
    /// or the queue was dropped.
    pub async fn wait(self) -> Result<(), CoreError> {
        self.result_rx
            .await
            .unwrap_or_else(|_| Err(CoreError::internal("action was cancelled before execution")))
    }

    /// Promotes this item to the head of the pending queue.
    ///
    /// A no-op for the currently executing item (its execution order is
    /// settled); an `Internal` error for an item the queue no longer knows.
    pub fn move_to_top(&self) -> Result<(), CoreError> {
        let inner = self
            .queue
            .upgrade()
            .ok_or_else(|| CoreError::internal("action queue is gone"))?;
        let mut st = inner.lock_state();
        if st.executing == Some(self.seq) {
            return Ok(());
        }
        let Some(pos) = st.items.iter().position(|i| i.seq == self.seq) else {
            return Err(CoreError::internal(
                "can't move a non-member item to the top of the queue",
            ));
        };
        if let Some(item) = st.items.remove(pos) {
            st.items.push_front(item);
        }
        Ok(())
    }

    /// Removes this item if it is still pending. Returns true if removed.
    pub fn cancel(&self) -> bool {
        let Some(inner) = self.queue.upgrade() else {
            return false;
        };
        let mut st = inner.lock_state();
        let before = st.items.len();
        st.items.retain(|i| i.seq != self.seq);
        before != st.items.len()
    }
}

/// Detached drain check, the moral equivalent of "call me on the next tick".
fn spawn_check(inner: Arc<QueueInner>) {
    tokio::spawn(check_queue(inner));
}

async fn check_queue(inner: Arc<QueueInner>) {
    let item = {
        let mut st = inner.lock_state();
        if st.executing.is_some() {
            // Busy: the finisher plans the next check.
            None
        } else if let Some(item) = st.items.pop_front() {
            st.executing = Some(item.seq);
            Some(item)
        } else {
            st.check_planned = false;
            for waiter in st.finish_waiters.drain(..) {
                let _ = waiter.send(());
            }
            None
        }
    };
    let Some(item) = item else { return };

    tracing::debug!(seq = item.seq, "executing action from queue");
    let result = (item.work)().await;

    let result = match inner.registry.set_active(item.context_id) {
        Ok(()) => result,
        Err(e) => {
            // Should never happen; continuing under a wrong context could
            // damage other contexts and their data, so the result is
            // replaced by an internal error.
            tracing::error!(
                seq = item.seq,
                error = %e,
                "unable to restore context after action"
            );
            Err(CoreError::internal(format!(
                "context restoration failed after action: {e}"
            )))
        }
    };

    inner.lock_state().executing = None;
    let _ = item.result_tx.send(result);
    spawn_check(inner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextParams, NullResources};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn registry() -> Arc<ContextRegistry> {
        ContextRegistry::new(Arc::new(NullResources))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drains_in_fifo_order_through_failures() {
        let reg = registry();
        let q = ActionQueue::new(&reg);
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (name, fail) in [("a", false), ("b", true), ("c", false)] {
            let log = log.clone();
            handles.push(q.enqueue(move || async move {
                log.lock().unwrap().push(name);
                if fail {
                    Err(CoreError::app("FAIL", name))
                } else {
                    Ok(())
                }
            }));
        }

        q.wait_for_finish().await;
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(q.is_idle());

        let results: Vec<bool> = [
            handles.remove(0).wait().await.is_ok(),
            handles.remove(0).wait().await.is_ok(),
            handles.remove(0).wait().await.is_ok(),
        ]
        .into();
        assert_eq!(results, vec![true, false, true]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn wait_for_finish_on_idle_queue_resolves_immediately() {
        let reg = registry();
        let q = ActionQueue::new(&reg);
        q.wait_for_finish().await;
        assert!(q.is_idle());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn clean_by_identifier_spares_the_executing_item() {
        let reg = registry();
        let q = ActionQueue::new(&reg);
        let ran = Arc::new(AtomicUsize::new(0));

        let r1 = ran.clone();
        q.enqueue_tagged("batch", move || async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            r1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let r2 = ran.clone();
        q.enqueue_tagged("batch", move || async move {
            r2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // Let the first item start executing.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(q.find_by_identifier("batch"), "second item still pending");

        let removed = q.clean_by_identifier("batch");
        assert_eq!(removed, 1, "only the pending item is pulled");
        assert!(!q.find_by_identifier("batch"));

        q.wait_for_finish().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1, "the executing item still completed");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn move_to_top_promotes_pending_items_only() {
        let reg = registry();
        let q = ActionQueue::new(&reg);
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        let first = q.enqueue(move || async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            l.lock().unwrap().push("first");
            Ok(())
        });
        let l = log.clone();
        q.enqueue(move || async move {
            l.lock().unwrap().push("second");
            Ok(())
        });
        let l = log.clone();
        let third = q.enqueue(move || async move {
            l.lock().unwrap().push("third");
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        // First is executing: promoting it changes nothing.
        first.move_to_top().unwrap();
        // Third is pending: it jumps ahead of second.
        third.move_to_top().unwrap();

        q.wait_for_finish().await;
        assert_eq!(*log.lock().unwrap(), vec!["first", "third", "second"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn move_to_top_on_consumed_item_is_internal_error() {
        let reg = registry();
        let q = ActionQueue::new(&reg);
        let handle = q.enqueue(|| async { Ok(()) });
        q.wait_for_finish().await;

        let err = handle.move_to_top().unwrap_err();
        assert!(matches!(err, CoreError::Internal { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_pending_item_never_runs() {
        let reg = registry();
        let q = ActionQueue::new(&reg);
        let ran = Arc::new(AtomicUsize::new(0));

        // Occupy the queue so the next item stays pending for a moment.
        q.enqueue(|| async {
            tokio::task::yield_now().await;
            Ok(())
        });
        let r = ran.clone();
        let doomed = q.enqueue(move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(doomed.cancel());
        q.wait_for_finish().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let err = doomed.wait().await.unwrap_err();
        assert!(matches!(err, CoreError::Internal { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn enqueue_context_is_restored_after_each_item() {
        let reg = registry();
        let q = ActionQueue::new(&reg);
        let home = reg.create(ContextParams::initiator("home"));
        let stray = reg.create(ContextParams::initiator("stray"));
        reg.set_active(home).unwrap();

        let reg2 = reg.clone();
        let handle = q.enqueue(move || async move {
            // The job wanders into another context.
            reg2.set_active(stray).unwrap();
            Ok(())
        });
        handle.wait().await.unwrap();
        assert_eq!(reg.current_id(), home);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dead_enqueue_context_turns_into_internal_error() {
        let reg = registry();
        let q = ActionQueue::new(&reg);
        let doomed_ctx = reg.create(ContextParams::default());
        reg.set_active(doomed_ctx).unwrap();

        let reg2 = reg.clone();
        let handle = q.enqueue(move || async move {
            // The enqueue-time context dies while the job runs.
            reg2.destroy(doomed_ctx);
            Ok(())
        });
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, CoreError::Internal { .. }));
        q.wait_for_finish().await;
        assert!(q.is_idle(), "the drain loop survives restoration failures");
    }
}
