//! The two execution engines of the core.
//!
//! - [`BatchQueue`]: one-shot fan-out over a fixed item list, strictly
//!   sequential, collecting tagged ok/error results. The event bus runs its
//!   subscribers through it.
//! - [`ActionQueue`]: an always-draining FIFO of arbitrary one-shot jobs,
//!   one in flight at a time, with reordering, cancellation and a drained
//!   notification.
//!
//! Both capture and restore contexts through the
//! [`Waiter`](crate::Waiter) so that interleaved chains never leak their
//! ambient context into each other.

mod action;
mod batch;

pub use action::{ActionHandle, ActionQueue};
pub use batch::{BatchQueue, TaskResult};
