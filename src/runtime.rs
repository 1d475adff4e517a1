//! The daemon core facade: registry + scheduler + queues + bus, wired.
//!
//! [`DaemonCore`] is what a host daemon actually holds: one context registry
//! (with the permanent main context), one scheduler, one global action queue
//! and one event bus, all sharing the same alert sink and resource factory.
//! Construction goes through [`CoreBuilder`].
//!
//! ## Example
//! ```no_run
//! use daemonkit::{CoreBuilder, CoreConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let core = CoreBuilder::new(CoreConfig::default()).build();
//!
//!     let job = core.scheduler().job(|| async { Ok(()) });
//!     job.start_now().unwrap();
//!
//!     core.stop("demo over").await;
//! }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::alert::{Alert, AlertRef, LogAlert};
use crate::config::CoreConfig;
use crate::context::{ContextRegistry, NullResources, ResourceFactory};
use crate::events::Observable;
use crate::queues::ActionQueue;
use crate::scheduler::Scheduler;

/// Event emitted by [`DaemonCore::stop`] before anything is torn down.
pub const ABOUT_TO_STOP: &str = "about_to_stop";

/// Builder for a [`DaemonCore`].
pub struct CoreBuilder {
    config: CoreConfig,
    alerts: AlertRef,
    resources: Arc<dyn ResourceFactory>,
}

impl CoreBuilder {
    /// Creates a builder with the given configuration, a tracing-backed
    /// alert sink and no per-context resources.
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            alerts: Arc::new(LogAlert),
            resources: Arc::new(NullResources),
        }
    }

    /// Sets the operator alert sink.
    pub fn with_alerts(mut self, alerts: Arc<dyn Alert>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Sets the per-context resource factory (e.g. "open a db session").
    pub fn with_resources(mut self, resources: Arc<dyn ResourceFactory>) -> Self {
        self.resources = resources;
        self
    }

    /// Builds the core and initializes all runtime components.
    pub fn build(self) -> DaemonCore {
        let registry = ContextRegistry::new(self.resources);
        let scheduler = Scheduler::new(registry.clone(), self.alerts.clone(), self.config.clone());
        let actions = ActionQueue::new(&registry);
        let bus = Observable::new(&registry);
        DaemonCore {
            registry,
            scheduler,
            actions,
            bus,
            alerts: self.alerts,
            stop_delays: Mutex::new(Vec::new()),
        }
    }
}

/// The assembled application core for one daemon process.
pub struct DaemonCore {
    registry: Arc<ContextRegistry>,
    scheduler: Scheduler,
    actions: ActionQueue,
    bus: Observable,
    alerts: AlertRef,
    stop_delays: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl DaemonCore {
    /// The context registry (main context included).
    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// The job scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The global action queue.
    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }

    /// The event bus.
    pub fn bus(&self) -> &Observable {
        &self.bus
    }

    /// The operator alert sink.
    pub fn alerts(&self) -> &AlertRef {
        &self.alerts
    }

    /// Registers a future that [`DaemonCore::stop`] awaits before tearing
    /// the core down. Subscribers of [`ABOUT_TO_STOP`] use this to finish
    /// in-flight business before the process goes away.
    pub fn delay_stop(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.stop_delays
            .lock()
            .expect("stop delays poisoned")
            .push(Box::pin(fut));
    }

    /// Stops the core: announces, waits, then tears down.
    ///
    /// 1. Emits [`ABOUT_TO_STOP`] on the bus (receivers may register delays
    ///    via [`DaemonCore::delay_stop`]; a failing receiver is logged, it
    ///    cannot veto the stop).
    /// 2. Awaits all registered stop delays.
    /// 3. Drains the action queue.
    /// 4. Cancels every scheduled job.
    pub async fn stop(&self, msg: &str) {
        self.registry.log(&format!("stopping daemon: {msg}"));
        if let Err(e) = self.bus.emit(ABOUT_TO_STOP, Value::Null).await {
            tracing::warn!(error = %e, "a receiver failed during the stop announcement");
        }

        let delays: Vec<_> = std::mem::take(
            &mut *self.stop_delays.lock().expect("stop delays poisoned"),
        );
        futures::future::join_all(delays).await;

        self.actions.wait_for_finish().await;
        self.scheduler.stop();
        self.registry.log("daemon stopped");
    }
}
