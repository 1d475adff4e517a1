//! The event bus.
//!
//! [`Observable`] maps event names to weakly-held receiver lists. Emission
//! runs all live receivers through a stop-on-failure
//! [`BatchQueue`](crate::BatchQueue), which gives the three properties the
//! callers rely on:
//!
//! - receivers run strictly in subscription order, one settled before the
//!   next starts;
//! - the emitter learns whether all receivers succeeded, and gets the first
//!   failure if not;
//! - each receiver runs under the emitter's context (Waiter restoration
//!   inside the batch queue).
//!
//! ## Rules
//! - A collected receiver is never invoked and never an error: dead weak
//!   references are pruned on subscribe and on emit.
//! - Emitting an event nobody subscribed to resolves trivially to success.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use crate::context::ContextRegistry;
use crate::error::CoreError;
use crate::events::{Event, EventHandler};
use crate::queues::BatchQueue;

/// Name-keyed pub/sub bus with weak receivers.
pub struct Observable {
    registry: Arc<ContextRegistry>,
    connections: Mutex<HashMap<String, Vec<Weak<dyn EventHandler>>>>,
}

impl Observable {
    /// Creates an empty bus.
    pub fn new(registry: &Arc<ContextRegistry>) -> Self {
        Self {
            registry: Arc::clone(registry),
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn lock_connections(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Weak<dyn EventHandler>>>> {
        self.connections.lock().expect("observable state poisoned")
    }

    /// Subscribes a receiver to an event name.
    ///
    /// Only a weak reference is stored: when the last strong reference to
    /// the receiver is dropped, the subscription dies with it.
    pub fn subscribe<H: EventHandler>(&self, event: &str, handler: &Arc<H>) {
        let handler: Arc<dyn EventHandler> = handler.clone();
        let weak: Weak<dyn EventHandler> = Arc::downgrade(&handler);
        let mut conns = self.lock_connections();
        let list = conns.entry(event.to_string()).or_default();
        list.retain(|w| w.strong_count() > 0);
        list.push(weak);
    }

    /// Removes one receiver's subscription to an event name.
    pub fn unsubscribe<H: EventHandler>(&self, event: &str, handler: &Arc<H>) {
        let handler: Arc<dyn EventHandler> = handler.clone();
        let target: Weak<dyn EventHandler> = Arc::downgrade(&handler);
        let mut conns = self.lock_connections();
        if let Some(list) = conns.get_mut(event) {
            list.retain(|w| w.strong_count() > 0 && !w.ptr_eq(&target));
            if list.is_empty() {
                conns.remove(event);
            }
        }
    }

    /// Removes every subscription to an event name.
    pub fn unsubscribe_all(&self, event: &str) {
        self.lock_connections().remove(event);
    }

    /// Number of live subscriptions for an event name.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.lock_connections()
            .get(event)
            .map(|l| l.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Emits an event to all live subscribers, in subscription order.
    ///
    /// Resolves to `Ok(())` when there are no subscribers or all of them
    /// succeeded; otherwise to the first failure, with the remaining
    /// subscribers left uninvoked (stop-on-failure).
    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), CoreError> {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let mut conns = self.lock_connections();
            match conns.get_mut(name) {
                Some(list) => {
                    let live: Vec<_> = list.iter().filter_map(|w| w.upgrade()).collect();
                    list.retain(|w| w.strong_count() > 0);
                    if list.is_empty() {
                        conns.remove(name);
                    }
                    live
                }
                None => Vec::new(),
            }
        };
        if handlers.is_empty() {
            return Ok(());
        }

        let event = Event::new(name, payload);
        let mut queue = BatchQueue::new(&self.registry, handlers).with_stop_on_failure(true);
        queue
            .run(|handler| {
                let event = event.clone();
                async move { handler.on_event(&event).await }
            })
            .await;

        if queue.is_success() {
            Ok(())
        } else {
            Err(queue
                .first_error()
                .map(|(e, _)| e.clone())
                .unwrap_or_else(|| CoreError::internal("emit failed without a recorded error")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NullResources;
    use crate::events::HandlerFn;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bus() -> (Observable, Arc<ContextRegistry>) {
        let reg = ContextRegistry::new(Arc::new(NullResources));
        (Observable::new(&reg), reg)
    }

    /// Object-style receiver: its method is what gets subscribed.
    struct CountingReceiver {
        n: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl EventHandler for CountingReceiver {
        async fn on_event(&self, _event: &Event) -> Result<(), CoreError> {
            self.n.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_handler() -> (Arc<CountingReceiver>, Arc<AtomicUsize>) {
        let n = Arc::new(AtomicUsize::new(0));
        (Arc::new(CountingReceiver { n: n.clone() }), n)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn emit_without_subscribers_is_trivially_ok() {
        let (bus, _reg) = bus();
        bus.emit("changed", Value::Null).await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscribers_receive_name_and_payload() {
        let (bus, _reg) = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let handler = HandlerFn::arc(move |ev: Event| {
            seen2.lock().unwrap().push((ev.name, ev.payload));
            futures::future::ready(Ok(()))
        });
        bus.subscribe("changed", &handler);

        bus.emit("changed", Value::from(42)).await.unwrap();
        bus.emit("ignored", Value::Null).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("changed".to_string(), Value::from(42)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dropped_receiver_is_never_invoked_and_never_errors() {
        let (bus, _reg) = bus();
        let (handler, n) = counting_handler();
        bus.subscribe("changed", &handler);
        assert_eq!(bus.subscriber_count("changed"), 1);

        drop(handler);
        bus.emit("changed", Value::Null).await.unwrap();
        assert_eq!(n.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count("changed"), 0, "dead entries are pruned");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn emission_stops_at_the_first_failure() {
        let (bus, _reg) = bus();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        let ok1 = HandlerFn::arc(move |_| {
            o.lock().unwrap().push("ok1");
            futures::future::ready(Ok(()))
        });
        let o = order.clone();
        let failing = HandlerFn::arc(move |_| {
            o.lock().unwrap().push("failing");
            futures::future::ready(Err(CoreError::app("HANDLER_DOWN", "nope")))
        });
        let o = order.clone();
        let ok2 = HandlerFn::arc(move |_| {
            o.lock().unwrap().push("ok2");
            futures::future::ready(Ok(()))
        });

        bus.subscribe("changed", &ok1);
        bus.subscribe("changed", &failing);
        bus.subscribe("changed", &ok2);

        let err = bus.emit("changed", Value::Null).await.unwrap_err();
        assert_eq!(err.as_label(), "app_error");
        assert_eq!(*order.lock().unwrap(), vec!["ok1", "failing"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unsubscribe_one_and_all() {
        let (bus, _reg) = bus();
        let (h1, n1) = counting_handler();
        let (h2, n2) = counting_handler();
        bus.subscribe("changed", &h1);
        bus.subscribe("changed", &h2);

        bus.unsubscribe("changed", &h1);
        bus.emit("changed", Value::Null).await.unwrap();
        assert_eq!(n1.load(Ordering::SeqCst), 0);
        assert_eq!(n2.load(Ordering::SeqCst), 1);

        bus.unsubscribe_all("changed");
        bus.emit("changed", Value::Null).await.unwrap();
        assert_eq!(n2.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("changed"), 0);
    }
}
