//! The execution context: identity, logging prefix, options, resource handle.
//!
//! A [`Context`] represents the logical "who/what is running" for one unit of
//! work: a scheduled job run, an incoming request, an explicit
//! `run_in_new_context` wrapper. It carries a log prefix for every line the
//! unit emits, an arbitrary string-keyed option bag, and an exclusively-owned
//! external resource handle (typically a database session) that is opened on
//! first access and committed+closed exactly once when the context is
//! destroyed.
//!
//! ## Rules
//! - The resource handle belongs to **this** context only; it must never be
//!   shared across unrelated units of work.
//! - Commit failures during destruction are logged and swallowed: context
//!   teardown must always complete.

use std::collections::HashMap;

use serde_json::Value;

use crate::context::ContextId;
use crate::error::CoreError;

/// Host-supplied per-context resource (e.g. a database session).
///
/// Opened lazily on first [`Context::resource`] access, committed and dropped
/// when the owning context is destroyed.
pub trait Resource: Send + 'static {
    /// Flushes pending state. Called once, during context destruction.
    fn commit(&mut self) -> Result<(), CoreError>;
}

/// Factory invoked by a context on first resource access.
pub trait ResourceFactory: Send + Sync + 'static {
    /// Opens a fresh resource handle for one context.
    fn open(&self) -> Result<Box<dyn Resource>, CoreError>;
}

/// Factory for hosts that have no per-context resource.
#[derive(Debug, Default)]
pub struct NullResources;

struct NullResource;

impl Resource for NullResource {
    fn commit(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}

impl ResourceFactory for NullResources {
    fn open(&self) -> Result<Box<dyn Resource>, CoreError> {
        Ok(Box::new(NullResource))
    }
}

/// Construction parameters for a new context.
#[derive(Clone, Debug)]
pub struct ContextParams {
    /// Human-readable origin of the work ("scheduler", "rpc", a job name).
    pub initiator: String,
    /// Prefix prepended to every log line emitted through this context.
    pub log_prefix: String,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            initiator: "context".to_string(),
            log_prefix: String::new(),
        }
    }
}

impl ContextParams {
    /// Shorthand: params with the given initiator and an empty log prefix.
    pub fn initiator(name: impl Into<String>) -> Self {
        Self {
            initiator: name.into(),
            ..Self::default()
        }
    }

    /// Returns the params with the given log prefix.
    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }
}

/// One live execution context.
///
/// Owned by the [`ContextRegistry`](crate::ContextRegistry); user code reaches
/// it through `with_current` / `with_context` closures.
pub struct Context {
    id: ContextId,
    /// Human-readable origin, used in logs.
    pub initiator: String,
    /// Prefix for log lines emitted via [`Context::log`].
    pub log_prefix: String,
    options: HashMap<String, Value>,
    resource: Option<Box<dyn Resource>>,
    factory: std::sync::Arc<dyn ResourceFactory>,
}

impl Context {
    pub(crate) fn new(
        id: ContextId,
        params: ContextParams,
        factory: std::sync::Arc<dyn ResourceFactory>,
    ) -> Self {
        Self {
            id,
            initiator: params.initiator,
            log_prefix: params.log_prefix,
            options: HashMap::new(),
            resource: None,
            factory,
        }
    }

    /// The context's unique id.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Logs a message with this context's prefix.
    pub fn log(&self, msg: &str) {
        tracing::info!(initiator = %self.initiator, "{}{msg}", self.log_prefix);
    }

    /// Stores an option value.
    pub fn set_option(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.options.insert(name.into(), value.into());
    }

    /// Returns an option value, or `None` if unset.
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    /// The resource handle for this context, opened on first access.
    pub fn resource(&mut self) -> Result<&mut dyn Resource, CoreError> {
        if self.resource.is_none() {
            self.resource = Some(self.factory.open()?);
        }
        // just populated above
        Ok(self.resource.as_mut().expect("resource just opened").as_mut())
    }

    /// True once a resource handle has been opened.
    pub fn has_resource(&self) -> bool {
        self.resource.is_some()
    }

    /// Commits and drops the resource handle, if one was opened.
    ///
    /// Commit failures are logged, never propagated: teardown always runs to
    /// completion.
    pub(crate) fn close(&mut self) {
        if let Some(mut res) = self.resource.take() {
            if let Err(e) = res.commit() {
                self.log(&format!("ignoring resource commit failure: {e}"));
            }
        }
    }
}
