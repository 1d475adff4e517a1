//! The scheduler: live job set, timers, blocker groups, watchdog.
//!
//! One [`Scheduler`] owns every job registered through it. Jobs are fired by
//! detached timer tasks; mutual exclusion between jobs is expressed through
//! symmetric blocker groups checked at admission time.
//!
//! ## Firing sequence
//! ```text
//! timer fires / force()
//!   ├─► admit(): blocker group check
//!   │     ├─ peer Working, no policy   → alert sink, suppressed (design flaw)
//!   │     ├─ peer Working, Skip        → suppressed, this firing only
//!   │     ├─ peer Working, Enqueue     → queued behind the blocker, suppressed
//!   │     └─ peer Working, Reschedule  → Internal error (representable, unimplemented)
//!   ├─► Working; pending timer disarmed; watchdog armed for max_exec_time
//!   ├─► run the work (inside a fresh context for context jobs)
//!   └─► settle(): record result, re-fire queued peers, then
//!         repeat? → Delayed, drift-corrected rearm
//!         pause latched? → Paused
//!         one-shot → removed
//! ```
//!
//! ## Rules
//! - A Working job never has a pending timer; a non-Working job never has an
//!   in-flight execution.
//! - The watchdog is advisory: it alerts, it never cancels the work. An
//!   unsettled execution on a repeating job stalls all future occurrences,
//!   which is exactly why the alert exists.
//! - `cancel()` stops future firings only; in-flight work always settles.
//! - State lock critical sections never span an `.await`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertRef;
use crate::config::CoreConfig;
use crate::context::{ContextParams, ContextRegistry};
use crate::error::CoreError;
use crate::scheduler::job::{Job, JobId, JobState, StartAt};

/// Stored work callable: produces a fresh future per execution.
pub(crate) type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>;

/// What to do when a due job finds a blocker-group peer Working.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockAction {
    /// Suppress this firing; the job waits for its next scheduled occurrence.
    Skip,
    /// Run once the blocker's in-flight execution settles.
    Enqueue,
    /// Reserved. Representable but unimplemented; admission reports an
    /// `Internal` error rather than inventing semantics.
    Reschedule,
}

struct JobEntry {
    work: JobFn,
    state: JobState,
    fire_at: Option<DateTime<Local>>,
    repeat: Option<Duration>,
    max_exec: Option<Duration>,
    timer: Option<CancellationToken>,
    pause_requested: bool,
    queued_after: Vec<JobId>,
    last_result: Option<Result<(), CoreError>>,
    started_at: Option<DateTime<Local>>,
}

struct SchedState {
    jobs: HashMap<JobId, JobEntry>,
    blockers: HashMap<JobId, HashSet<JobId>>,
    block_actions: HashMap<JobId, BlockAction>,
}

enum Admission {
    Clear,
    Suppressed,
    Rejected(CoreError),
}

pub(crate) struct SchedulerCore {
    state: Mutex<SchedState>,
    pub(crate) registry: Arc<ContextRegistry>,
    alerts: AlertRef,
    config: CoreConfig,
    next_id: AtomicU64,
}

/// Owns timed jobs and the mutual-exclusion relationships between them.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    /// Creates a scheduler bound to the given registry and alert sink.
    pub fn new(registry: Arc<ContextRegistry>, alerts: AlertRef, config: CoreConfig) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                state: Mutex::new(SchedState {
                    jobs: HashMap::new(),
                    blockers: HashMap::new(),
                    block_actions: HashMap::new(),
                }),
                registry,
                alerts,
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a new job in the Paused state.
    ///
    /// `work` is called once per execution and produces a fresh future, so it
    /// carries no hidden state between runs; share state explicitly through
    /// an `Arc` inside the closure.
    pub fn job<F, Fut>(&self, work: F) -> Job
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let work: JobFn = Arc::new(move || Box::pin(work()));
        self.core.insert(work)
    }

    /// Registers a job whose every execution runs inside a fresh context.
    ///
    /// The context is created from `params` right before the work starts and
    /// destroyed when it settles; the previously active context is restored
    /// afterwards (see [`ContextRegistry::run_in_new_context`]).
    pub fn context_job<F, Fut>(&self, params: ContextParams, work: F) -> Job
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let registry = Arc::clone(&self.core.registry);
        let work = Arc::new(work);
        let wrapped: JobFn = Arc::new(move || {
            let registry = Arc::clone(&registry);
            let params = params.clone();
            let work = Arc::clone(&work);
            Box::pin(async move { registry.run_in_new_context(params, (work)()).await })
        });
        self.core.insert(wrapped)
    }

    /// Declares a symmetric blocker group: no member may fire while another
    /// member is Working.
    pub fn set_blocker_group(&self, jobs: &[&Job]) {
        let mut st = self.core.lock_state();
        for a in jobs {
            for b in jobs {
                if a.id != b.id {
                    st.blockers.entry(a.id).or_default().insert(b.id);
                }
            }
        }
    }

    /// Sets the per-job policy applied when a firing hits a busy blocker.
    pub fn set_block_action(&self, job: &Job, action: BlockAction) {
        self.core
            .lock_state()
            .block_actions
            .insert(job.id, action);
    }

    /// Cancels every job and clears all blocker relationships.
    pub fn stop(&self) {
        let mut st = self.core.lock_state();
        for (_, mut entry) in st.jobs.drain() {
            if let Some(token) = entry.timer.take() {
                token.cancel();
            }
        }
        st.blockers.clear();
        st.block_actions.clear();
    }

    /// Number of live jobs.
    pub fn len(&self) -> usize {
        self.core.lock_state().jobs.len()
    }

    /// True when no jobs are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SchedulerCore {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedState> {
        self.state.lock().expect("scheduler state poisoned")
    }

    fn insert(self: &Arc<Self>, work: JobFn) -> Job {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = JobEntry {
            work,
            state: JobState::Paused,
            fire_at: None,
            repeat: None,
            max_exec: self.config.default_max_exec(),
            timer: None,
            pause_requested: false,
            queued_after: Vec::new(),
            last_result: None,
            started_at: None,
        };
        self.lock_state().jobs.insert(id, entry);
        Job {
            id,
            core: Arc::downgrade(self),
        }
    }

    pub(crate) fn set_repeat(&self, id: JobId, every: Duration) -> Result<(), CoreError> {
        if every < self.config.min_repeat_interval {
            return Err(CoreError::scheduler(format!(
                "repeat interval {every:?} is below the minimum {:?}",
                self.config.min_repeat_interval
            )));
        }
        let mut st = self.lock_state();
        let entry = known_job(&mut st, id)?;
        entry.repeat = Some(every);
        Ok(())
    }

    pub(crate) fn set_max_exec(&self, id: JobId, budget: Duration) -> Result<(), CoreError> {
        let mut st = self.lock_state();
        let entry = known_job(&mut st, id)?;
        entry.max_exec = if budget == Duration::ZERO {
            None
        } else {
            Some(budget)
        };
        Ok(())
    }

    pub(crate) fn start(self: &Arc<Self>, id: JobId, at: StartAt) -> Result<(), CoreError> {
        let now = Local::now();
        let fire_at = at.resolve(now)?;
        let mut st = self.lock_state();
        let entry = known_job(&mut st, id)?;
        if entry.state != JobState::Paused {
            return Err(CoreError::scheduler(format!("{id} is already started")));
        }
        if fire_at < now && entry.repeat.is_none() {
            return Err(CoreError::InvalidSchedule { at: fire_at });
        }
        entry.state = JobState::Delayed;
        entry.fire_at = Some(fire_at);
        arm_timer(self, entry, id, delay_until(fire_at, now));
        Ok(())
    }

    pub(crate) fn pause(&self, id: JobId) -> Result<(), CoreError> {
        let mut st = self.lock_state();
        let entry = known_job(&mut st, id)?;
        if entry.state == JobState::Paused {
            return Ok(());
        }
        if let Some(token) = entry.timer.take() {
            token.cancel();
        }
        if entry.state == JobState::Working {
            // Never interrupt in-flight work; apply once it settles.
            entry.pause_requested = true;
        } else {
            entry.state = JobState::Paused;
        }
        Ok(())
    }

    pub(crate) fn resume(self: &Arc<Self>, id: JobId) -> Result<(), CoreError> {
        let mut st = self.lock_state();
        let entry = known_job(&mut st, id)?;
        if entry.state != JobState::Paused {
            return Ok(());
        }
        let repeat = entry
            .repeat
            .ok_or_else(|| CoreError::scheduler(format!("{id} has no repeat interval to resume with")))?;
        let base = entry
            .fire_at
            .ok_or_else(|| CoreError::scheduler(format!("{id} was never started")))?;
        let now = Local::now();
        let next = advance_past(base, now, repeat);
        entry.fire_at = Some(next);
        entry.state = JobState::Delayed;
        arm_timer(self, entry, id, delay_until(next, now));
        Ok(())
    }

    pub(crate) fn cancel(&self, id: JobId) {
        let mut st = self.lock_state();
        if let Some(mut entry) = st.jobs.remove(&id) {
            if let Some(token) = entry.timer.take() {
                token.cancel();
            }
            unlink(&mut st, id);
        }
    }

    pub(crate) fn state_of(&self, id: JobId) -> Option<JobState> {
        self.lock_state().jobs.get(&id).map(|e| e.state)
    }

    pub(crate) fn last_result_of(&self, id: JobId) -> Option<Result<(), CoreError>> {
        self.lock_state().jobs.get(&id).and_then(|e| e.last_result.clone())
    }

    /// Runs one execution of the job: admission, watchdog, work, settling.
    pub(crate) async fn execute(self: &Arc<Self>, id: JobId) -> Result<(), CoreError> {
        let (work, max_exec) = {
            let mut st = self.lock_state();
            match self.admit(&mut st, id) {
                Admission::Suppressed => return Ok(()),
                Admission::Rejected(e) => return Err(e),
                Admission::Clear => {}
            }
            let entry = st.jobs.get_mut(&id).expect("admission checked existence");
            entry.state = JobState::Working;
            entry.started_at = Some(Local::now());
            if let Some(token) = entry.timer.take() {
                token.cancel();
            }
            (entry.work.clone(), entry.max_exec)
        };

        let (done_tx, done_rx) = watch::channel(false);
        if let Some(budget) = max_exec.filter(|d| *d > Duration::ZERO) {
            self.spawn_watchdog(id, budget, done_rx);
        }

        let result = (work)().await;
        let _ = done_tx.send(true);

        match &result {
            Ok(()) => tracing::debug!(%id, "job finished"),
            Err(e) if e.is_expected() => tracing::warn!(%id, error = %e, "job failed"),
            Err(e) => tracing::error!(%id, error = ?e, "job failed with unexpected error"),
        }

        for peer in self.settle(id, result.clone()) {
            spawn_execute(Arc::clone(self), peer);
        }
        result
    }

    /// Blocker-group admission check. Runs before any state change.
    fn admit(&self, st: &mut SchedState, id: JobId) -> Admission {
        if !st.jobs.contains_key(&id) {
            return Admission::Rejected(CoreError::scheduler(format!("{id} is no longer scheduled")));
        }
        let peers: Vec<JobId> = st
            .blockers
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for peer in peers {
            let busy = st.jobs.get(&peer).is_some_and(|e| e.state == JobState::Working);
            if !busy {
                continue;
            }
            return match st.block_actions.get(&id).copied() {
                None => {
                    self.alerts.notify(
                        &format!(
                            "execution of {id} was blocked by currently working {peer} and no \
                             block action is configured; this usually means an architectural \
                             design flaw"
                        ),
                        &["error"],
                    );
                    Admission::Suppressed
                }
                Some(BlockAction::Skip) => {
                    tracing::debug!(%id, blocker = %peer, "firing skipped, blocker group busy");
                    Admission::Suppressed
                }
                Some(BlockAction::Enqueue) => {
                    tracing::info!(%id, blocker = %peer, "execution queued behind blocker");
                    if let Some(b) = st.jobs.get_mut(&peer) {
                        b.queued_after.push(id);
                    }
                    Admission::Suppressed
                }
                Some(BlockAction::Reschedule) => Admission::Rejected(CoreError::internal(
                    "the Reschedule block action is not implemented",
                )),
            };
        }
        if st.jobs[&id].state == JobState::Working {
            return Admission::Rejected(CoreError::scheduler(format!("{id} is already executing")));
        }
        Admission::Clear
    }

    /// Records the result and moves the job to its post-execution state.
    /// Returns the peers queued behind this execution.
    fn settle(self: &Arc<Self>, id: JobId, result: Result<(), CoreError>) -> Vec<JobId> {
        let mut st = self.lock_state();
        let Some(entry) = st.jobs.get_mut(&id) else {
            // Cancelled mid-flight; the result was still delivered to force().
            return Vec::new();
        };
        entry.last_result = Some(result);
        if let Some(started) = entry.started_at.take() {
            tracing::debug!(%id, elapsed = ?(Local::now() - started), "execution settled");
        }
        let followups = std::mem::take(&mut entry.queued_after);

        match entry.repeat {
            None => {
                st.jobs.remove(&id);
                unlink(&mut st, id);
                tracing::debug!(%id, "one-shot job removed");
            }
            Some(repeat) => {
                if entry.pause_requested {
                    entry.pause_requested = false;
                    entry.state = JobState::Paused;
                } else {
                    let now = Local::now();
                    let next = advance_past(entry.fire_at.unwrap_or(now), now, repeat);
                    entry.fire_at = Some(next);
                    entry.state = JobState::Delayed;
                    arm_timer(self, entry, id, delay_until(next, now));
                }
            }
        }
        followups
    }

    fn spawn_watchdog(&self, id: JobId, budget: Duration, mut done: watch::Receiver<bool>) {
        let alerts = Arc::clone(&self.alerts);
        tokio::spawn(async move {
            if tokio::time::timeout(budget, done.wait_for(|settled| *settled))
                .await
                .is_err()
            {
                alerts.notify(
                    &format!(
                        "execution of {id} exceeded {budget:?} without settling; the chain may \
                         be corrupted or something hangs, and if this is a repeating job its \
                         next cycle will never start"
                    ),
                    &["error", "watchdog"],
                );
            }
        });
    }
}

/// Detached re-entry point so that executions can spawn further executions
/// (timers, queued blocked peers) without a recursive future type.
fn spawn_execute(core: Arc<SchedulerCore>, id: JobId) {
    tokio::spawn(async move {
        if let Err(e) = core.execute(id).await {
            tracing::debug!(%id, error = %e, "deferred execution failed");
        }
    });
}

fn arm_timer(core: &Arc<SchedulerCore>, entry: &mut JobEntry, id: JobId, delay: Duration) {
    let token = CancellationToken::new();
    let armed = token.clone();
    let core = Arc::clone(core);
    tokio::spawn(async move {
        tokio::select! {
            _ = armed.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                if let Err(e) = core.execute(id).await {
                    tracing::debug!(%id, error = %e, "timer-driven execution failed");
                }
            }
        }
    });
    entry.timer = Some(token);
}

fn known_job<'a>(st: &'a mut SchedState, id: JobId) -> Result<&'a mut JobEntry, CoreError> {
    st.jobs
        .get_mut(&id)
        .ok_or_else(|| CoreError::scheduler(format!("{id} is not a registered job")))
}

fn unlink(st: &mut SchedState, id: JobId) {
    st.blockers.remove(&id);
    for peers in st.blockers.values_mut() {
        peers.remove(&id);
    }
    st.block_actions.remove(&id);
}

fn delay_until(fire_at: DateTime<Local>, now: DateTime<Local>) -> Duration {
    (fire_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Drift correction: advances `fire_at` by whole intervals until it is at
/// least one second in the future. Missed periods are skipped, never run
/// back-to-back to catch up.
fn advance_past(
    mut fire_at: DateTime<Local>,
    now: DateTime<Local>,
    interval: Duration,
) -> DateTime<Local> {
    let step = chrono::Duration::from_std(interval.max(Duration::from_secs(1)))
        .unwrap_or_else(|_| chrono::Duration::seconds(1));
    let floor = chrono::Duration::seconds(1);
    while fire_at - now < floor {
        fire_at += step;
    }
    fire_at
}
