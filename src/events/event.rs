//! The event payload carried to subscribers.

use serde::Serialize;
use serde_json::Value;

/// One emitted event: a name plus an arbitrary JSON payload.
///
/// The payload is `serde_json::Value` so that emitters and receivers agree
/// on a wire-friendly shape without sharing concrete types; pass
/// `Value::Null` when there is nothing to say.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    /// The event name receivers subscribed to.
    pub name: String,
    /// Event arguments.
    pub payload: Value,
}

impl Event {
    /// Creates an event.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}
