//! Publish/subscribe event bus with weakly-held receivers.
//!
//! ## Contents
//! - [`Event`] name + JSON payload carried to every receiver
//! - [`EventHandler`], [`HandlerFn`] receiver trait and closure adapter
//! - [`Observable`] the bus: subscribe / unsubscribe / emit
//!
//! Emission delegates to the [`BatchQueue`](crate::BatchQueue) with
//! stop-on-failure, so receivers run strictly in subscription order and the
//! caller gets the first failure back.

mod event;
mod handler;
mod observable;

pub use event::Event;
pub use handler::{EventHandler, HandlerFn};
pub use observable::Observable;
