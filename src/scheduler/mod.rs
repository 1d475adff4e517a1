//! Timer-driven job scheduling with mutual exclusion between jobs.
//!
//! This module groups the job **handle and time model** and the **scheduler**
//! that owns the live job set, blocker groups and the watchdog.
//!
//! ## Contents
//! - [`Job`], [`JobState`], [`StartAt`] handle, state machine, fire-time resolution
//! - [`Scheduler`], [`BlockAction`] live set, blocker groups, block policies
//!
//! ## State machine
//! ```text
//! Paused ──start──► Delayed ──timer, not blocked──► Working
//!    ▲                 ▲                               │
//!    │ pause           └── done, repeat (drift-corrected rearm)
//!    │                                                 │
//!    └──── pause latched while Working ◄───────────────┤
//!                                                      └── done, no repeat ──► removed
//! ```

mod job;
mod scheduler;

pub use job::{Job, JobState, StartAt, parse_hms};
pub use scheduler::{BlockAction, Scheduler};
