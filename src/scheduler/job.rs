//! Job handle, state machine states, and fire-time resolution.
//!
//! A [`Job`] is a cheap cloneable handle over scheduler-owned state; all
//! methods delegate to the owning [`Scheduler`](crate::Scheduler). The handle
//! stays valid after the job completes or is cancelled: operations on a gone
//! job report a `Scheduler` error instead of panicking.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime};

use crate::error::CoreError;
use crate::scheduler::scheduler::SchedulerCore;

/// Identity of a job inside its scheduler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Scheduler job states.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JobState {
    /// Registered but not armed; also the landing state of a latched pause.
    Paused,
    /// Armed: a timer will fire the job at its scheduled time.
    Delayed,
    /// Execution in flight. Never has a pending timer.
    Working,
}

/// When a job should first fire.
///
/// Mirrors the accepted inputs of the historical daemons: an absolute time,
/// a relative delay, a bare time-of-day (combined with today's date), or an
/// `"hh:mm:ss"` offset from today's midnight.
#[derive(Clone, Debug)]
pub enum StartAt {
    /// Fire immediately.
    Now,
    /// Fire after the given delay.
    After(Duration),
    /// Fire at an absolute local time.
    At(DateTime<Local>),
    /// Fire at this time-of-day today.
    TimeOfDay(NaiveTime),
    /// Fire at today's midnight plus an `"hh:mm:ss"` offset.
    Offset(String),
}

impl From<Duration> for StartAt {
    fn from(d: Duration) -> Self {
        StartAt::After(d)
    }
}

impl From<DateTime<Local>> for StartAt {
    fn from(t: DateTime<Local>) -> Self {
        StartAt::At(t)
    }
}

impl From<NaiveTime> for StartAt {
    fn from(t: NaiveTime) -> Self {
        StartAt::TimeOfDay(t)
    }
}

impl From<&str> for StartAt {
    fn from(s: &str) -> Self {
        StartAt::Offset(s.to_string())
    }
}

impl StartAt {
    /// Resolves to an absolute local fire time.
    pub(crate) fn resolve(self, now: DateTime<Local>) -> Result<DateTime<Local>, CoreError> {
        match self {
            StartAt::Now => Ok(now),
            StartAt::After(d) => {
                let d = chrono::Duration::from_std(d)
                    .map_err(|_| CoreError::scheduler("start delay out of range"))?;
                Ok(now + d)
            }
            StartAt::At(t) => Ok(t),
            StartAt::TimeOfDay(t) => local_today(now, t),
            StartAt::Offset(s) => {
                let offset = chrono::Duration::from_std(parse_hms(&s)?)
                    .map_err(|_| CoreError::scheduler("start offset out of range"))?;
                Ok(local_today(now, NaiveTime::MIN)? + offset)
            }
        }
    }
}

/// Combines today's date with a time-of-day in the local zone.
fn local_today(now: DateTime<Local>, t: NaiveTime) -> Result<DateTime<Local>, CoreError> {
    now.date_naive()
        .and_time(t)
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| CoreError::scheduler("time-of-day does not exist in the local zone"))
}

/// Parses an `"hh:mm:ss"` offset; shorter forms (`"mm:ss"`, `"ss"`) bind from
/// the right, the way operators write cron-ish offsets.
pub fn parse_hms(s: &str) -> Result<Duration, CoreError> {
    const MULTS: [u64; 3] = [1, 60, 3600];
    let mut secs: u64 = 0;
    for (i, part) in s.split(':').rev().enumerate() {
        if i >= MULTS.len() {
            return Err(CoreError::scheduler(format!(
                "too many components in time offset {s:?}"
            )));
        }
        let v: u64 = part.trim().parse().map_err(|_| {
            CoreError::scheduler(format!("invalid component {part:?} in time offset {s:?}"))
        })?;
        secs += v * MULTS[i];
    }
    Ok(Duration::from_secs(secs))
}

/// Handle to a scheduled job.
#[derive(Clone, Debug)]
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) core: Weak<SchedulerCore>,
}

impl Job {
    fn core(&self) -> Result<Arc<SchedulerCore>, CoreError> {
        self.core
            .upgrade()
            .ok_or_else(|| CoreError::scheduler("scheduler is gone"))
    }

    /// Makes the job repeating with the given interval.
    ///
    /// Intervals below one second are rejected with a `Scheduler` error.
    pub fn repeated(&self, every: Duration) -> Result<&Self, CoreError> {
        self.core()?.set_repeat(self.id, every)?;
        Ok(self)
    }

    /// Like [`Job::repeated`], parsing an `"hh:mm:ss"` interval.
    pub fn repeated_hms(&self, every: &str) -> Result<&Self, CoreError> {
        self.repeated(parse_hms(every)?)
    }

    /// Overrides the watchdog budget for this job.
    ///
    /// `Duration::ZERO` disables the watchdog.
    pub fn max_exec_time(&self, budget: Duration) -> Result<&Self, CoreError> {
        self.core()?.set_max_exec(self.id, budget)?;
        Ok(self)
    }

    /// Arms the job: resolves the fire time and transitions Paused → Delayed.
    ///
    /// A resolved time in the past is only legal for repeating jobs (the
    /// first drift-corrected occurrence is used); otherwise the call fails
    /// with [`CoreError::InvalidSchedule`].
    pub fn start(&self, at: impl Into<StartAt>) -> Result<&Self, CoreError> {
        self.core()?.start(self.id, at.into())?;
        Ok(self)
    }

    /// Shorthand for `start(StartAt::Now)`.
    pub fn start_now(&self) -> Result<&Self, CoreError> {
        self.start(StartAt::Now)
    }

    /// Executes the job immediately, regardless of its timer.
    ///
    /// Returns the execution's result. Forcing an already-working job is a
    /// `Scheduler` error; a blocked firing resolves to `Ok(())` without
    /// executing.
    pub async fn force(&self) -> Result<(), CoreError> {
        self.core()?.execute(self.id).await
    }

    /// Pauses the job.
    ///
    /// A pending timer is disarmed. If the job is Working, the pause is
    /// latched and applied once the in-flight execution settles; running
    /// work is never interrupted.
    pub fn pause(&self) -> Result<(), CoreError> {
        self.core()?.pause(self.id)
    }

    /// Resumes a paused repeating job.
    ///
    /// The next fire time is recomputed by advancing the old one by the
    /// repeat interval until it is at least one second in the future: missed
    /// periods are skipped, never replayed back-to-back.
    pub fn resume(&self) -> Result<(), CoreError> {
        self.core()?.resume(self.id)
    }

    /// Cancels any pending timer and removes the job permanently.
    ///
    /// In-flight execution is not interrupted; only future firings stop.
    pub fn cancel(&self) {
        if let Ok(core) = self.core() {
            core.cancel(self.id);
        }
    }

    /// The job's current state, or `None` once removed.
    pub fn state(&self) -> Option<JobState> {
        self.core().ok()?.state_of(self.id)
    }

    /// True while an execution is in flight.
    pub fn is_working(&self) -> bool {
        self.state() == Some(JobState::Working)
    }

    /// The last recorded execution result, if any.
    pub fn last_result(&self) -> Option<Result<(), CoreError>> {
        self.core().ok()?.last_result_of(self.id)
    }
}
