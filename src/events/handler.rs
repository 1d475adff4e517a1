//! Event receiver trait and the closure adapter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::events::Event;

/// An event receiver.
///
/// The bus holds receivers **weakly**: dropping the last `Arc` to a receiver
/// unsubscribes it automatically, so a receiver's lifetime follows its owner
/// instead of the bus. Handlers report failures; emission stops at the first
/// failing receiver and hands its error to the emitter.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event) -> Result<(), CoreError>;
}

/// Closure-backed event handler.
///
/// Adapts a plain `Fn(Event) -> Future` to [`EventHandler`], for receivers
/// that are not methods on some long-lived object. Keep the returned `Arc`
/// alive for as long as the subscription should exist; the bus itself only
/// holds a weak reference.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps the closure and returns it ready for subscription.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
{
    async fn on_event(&self, event: &Event) -> Result<(), CoreError> {
        (self.f)(event.clone()).await
    }
}
