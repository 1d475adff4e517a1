//! # daemonkit
//!
//! **daemonkit** is an application core for long-running network daemons.
//!
//! It provides the execution backbone such daemons share: a notion of
//! "execution context" that survives across asynchronous suspension points,
//! a timer-driven job scheduler with mutual exclusion between jobs, ordered
//! asynchronous task queues, and a weak-reference publish/subscribe bus.
//! The transport, config and storage layers of a daemon sit on top and
//! consume these primitives.
//!
//! ## Architecture
//! ```text
//!             ┌─────────────────────────────────────────────────────┐
//!             │  DaemonCore (facade, built by CoreBuilder)          │
//!             │  - ContextRegistry (live contexts + active pointer) │
//!             │  - Scheduler (timed jobs, blocker groups, watchdog) │
//!             │  - ActionQueue (endless sequential job queue)       │
//!             │  - Observable (pub/sub bus, weak receivers)         │
//!             └────┬───────────────┬────────────────┬───────────────┘
//!                  ▼               ▼                ▼
//!            Scheduler jobs   enqueued actions   emit(event)
//!                  │               │                │
//!                  │   run_in_new_context()         │ BatchQueue
//!                  ▼               ▼                ▼ (stop-on-failure)
//!             ┌─────────────────────────────────────────────────────┐
//!             │  ContextRegistry + Waiter                           │
//!             │  every suspension: save active id, restore on resume│
//!             └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Execution model
//! One logical thread of control: all concurrency is cooperative
//! interleaving of suspended chains, with exactly one unit of work executing
//! at a time. Run the core on a `current_thread` tokio runtime. The active
//! context is the single piece of shared mutable state; the [`Waiter`]
//! discipline (save before suspending, restore after resuming) is what keeps
//! it coherent while unrelated chains interleave on the loop.
//!
//! ## Features
//! | Area           | Description                                                  | Key types                               |
//! |----------------|--------------------------------------------------------------|-----------------------------------------|
//! | **Contexts**   | Who/what is running; survives suspension; owns a resource.   | [`ContextRegistry`], [`Context`], [`Waiter`] |
//! | **Scheduling** | Timed jobs, repeat with drift correction, blocker groups.    | [`Scheduler`], [`Job`], [`BlockAction`] |
//! | **Queues**     | Ordered fan-out and endless sequential dispatch.             | [`BatchQueue`], [`ActionQueue`]         |
//! | **Events**     | Weakly-held pub/sub, failure-aware emission.                 | [`Observable`], [`EventHandler`]        |
//! | **Errors**     | One clonable taxonomy for core and application failures.     | [`CoreError`]                           |
//! | **Alerts**     | Operator escalation for watchdog and blocker conflicts.      | [`Alert`]                               |
//!
//! ## Optional features
//! - `logging`: exports [`init_logging`], a `tracing-subscriber` bootstrap
//!   for binaries _(demo/reference only)_.
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use daemonkit::{ContextParams, CoreBuilder, CoreConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = CoreBuilder::new(CoreConfig::default()).build();
//!
//!     // A repeating job that runs inside its own context.
//!     let sync = core.scheduler().context_job(
//!         ContextParams::initiator("inventory-sync"),
//!         || async {
//!             // talk to the outside world...
//!             Ok(())
//!         },
//!     );
//!     sync.repeated(Duration::from_secs(300))?;
//!     sync.start("00:05:00")?; // today, five minutes past midnight
//!
//!     // Sequential dispatch of one-shot work.
//!     let sent = core.actions().enqueue(|| async { Ok(()) });
//!     sent.wait().await?;
//!
//!     core.stop("example done").await;
//!     Ok(())
//! }
//! ```

mod alert;
mod config;
mod context;
mod error;
mod events;
mod queues;
mod runtime;
mod scheduler;

// ---- Public re-exports ----

pub use alert::{Alert, AlertRef, LogAlert};
pub use config::CoreConfig;
pub use context::{
    Context, ContextId, ContextParams, ContextRegistry, NullResources, Resource, ResourceFactory,
    Waiter,
};
pub use error::CoreError;
pub use events::{Event, EventHandler, HandlerFn, Observable};
pub use queues::{ActionHandle, ActionQueue, BatchQueue, TaskResult};
pub use runtime::{ABOUT_TO_STOP, CoreBuilder, DaemonCore};
pub use scheduler::{BlockAction, Job, JobState, Scheduler, StartAt, parse_hms};

// Optional: expose the tracing bootstrap for binaries.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
mod logging;
#[cfg(feature = "logging")]
pub use logging::init_logging;
