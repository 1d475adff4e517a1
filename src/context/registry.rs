//! Process-wide context registry and the "currently active" pointer.
//!
//! The registry owns every live [`Context`] and the id of the one that is
//! currently active. It is the single piece of truly shared mutable state in
//! the core: every suspension point must treat the active pointer as borrowed
//! (save before suspending, restore after resuming: the
//! [`Waiter`](crate::Waiter) contract).
//!
//! ## Architecture
//! ```text
//! ContextRegistry
//!   ├── contexts: HashMap<ContextId, Context>   (live set)
//!   ├── current:  ContextId                     (active pointer)
//!   └── main:     ContextId                     (permanent, never destroyed)
//!
//! create() ──► fresh collision-checked id, does NOT activate
//! set_active(id) ──► InvalidContext unless live
//! destroy(id) ──► commit+close resource; active falls back to main
//! run_in_new_context(params, fut)
//!       ├─► capture current, create + activate fresh context
//!       ├─► await fut through the Waiter
//!       └─► destroy fresh context, restore captured id (success or failure)
//! ```
//!
//! ## Rules
//! - The active id always refers to a live entry, except transiently inside
//!   `destroy`, which atomically falls back to the main context.
//! - Ids are never reused while live; a destroyed id never comes back.
//! - Destroying an id twice is a no-op; the main context cannot be destroyed.
//! - Critical sections are short and never held across `.await`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::context::context::{Context, ContextParams, ResourceFactory};
use crate::context::waiter::Waiter;
use crate::error::CoreError;

/// Opaque identifier of a live context.
///
/// Monotonically distinct: drawn at random and collision-checked against the
/// live set, never reused while the context is alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContextId(u64);

impl ContextId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        ContextId(raw)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:012x}", self.0)
    }
}

struct RegistryState {
    contexts: HashMap<ContextId, Context>,
    current: ContextId,
}

/// Owner of all live contexts and the process-wide active pointer.
pub struct ContextRegistry {
    state: Mutex<RegistryState>,
    factory: Arc<dyn ResourceFactory>,
    main: ContextId,
}

impl ContextRegistry {
    /// Creates the registry with its permanent main context (active).
    ///
    /// The main context logs with the `"MC: "` prefix and lives until the
    /// process exits.
    pub fn new(factory: Arc<dyn ResourceFactory>) -> Arc<Self> {
        let main = ContextId(rand::random());
        let main_ctx = Context::new(
            main,
            ContextParams {
                initiator: "main".to_string(),
                log_prefix: "MC: ".to_string(),
            },
            factory.clone(),
        );
        let mut contexts = HashMap::new();
        contexts.insert(main, main_ctx);
        Arc::new(Self {
            state: Mutex::new(RegistryState {
                contexts,
                current: main,
            }),
            factory,
            main,
        })
    }

    /// The permanent main context id.
    pub fn main_id(&self) -> ContextId {
        self.main
    }

    /// The currently active context id.
    pub fn current_id(&self) -> ContextId {
        self.state.lock().expect("registry poisoned").current
    }

    /// True if the id refers to a live context.
    pub fn contains(&self, id: ContextId) -> bool {
        self.state
            .lock()
            .expect("registry poisoned")
            .contexts
            .contains_key(&id)
    }

    /// Allocates a fresh id and stores a new context built from `params`.
    ///
    /// Does **not** change the active context.
    pub fn create(&self, params: ContextParams) -> ContextId {
        let mut state = self.state.lock().expect("registry poisoned");
        let id = loop {
            let candidate = ContextId(rand::random());
            if !state.contexts.contains_key(&candidate) {
                break candidate;
            }
        };
        let ctx = Context::new(id, params, self.factory.clone());
        state.contexts.insert(id, ctx);
        id
    }

    /// Makes `id` the process-wide active context.
    ///
    /// Fails with [`CoreError::InvalidContext`] if the id is not live.
    pub fn set_active(&self, id: ContextId) -> Result<(), CoreError> {
        let mut state = self.state.lock().expect("registry poisoned");
        if !state.contexts.contains_key(&id) {
            return Err(CoreError::InvalidContext { id });
        }
        state.current = id;
        Ok(())
    }

    /// Runs `f` against the currently active context.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        let mut state = self.state.lock().expect("registry poisoned");
        let current = state.current;
        let ctx = state
            .contexts
            .get_mut(&current)
            .expect("active id always refers to a live context");
        f(ctx)
    }

    /// Runs `f` against the context with the given id.
    pub fn with_context<R>(
        &self,
        id: ContextId,
        f: impl FnOnce(&mut Context) -> R,
    ) -> Result<R, CoreError> {
        let mut state = self.state.lock().expect("registry poisoned");
        match state.contexts.get_mut(&id) {
            Some(ctx) => Ok(f(ctx)),
            None => Err(CoreError::InvalidContext { id }),
        }
    }

    /// Logs a message through the currently active context.
    pub fn log(&self, msg: &str) {
        self.with_current(|ctx| ctx.log(msg));
    }

    /// Destroys the context with the given id.
    ///
    /// The context's resource handle, if open, is committed and closed as
    /// part of destruction (commit failure logged, not propagated). If the
    /// destroyed context was active, the active pointer falls back to the
    /// main context. Destroying an unknown id is a no-op; the main context
    /// is never destroyed.
    pub fn destroy(&self, id: ContextId) {
        if id == self.main {
            tracing::warn!("refusing to destroy the main context");
            return;
        }
        let mut state = self.state.lock().expect("registry poisoned");
        let Some(mut ctx) = state.contexts.remove(&id) else {
            return;
        };
        if state.current == id {
            state.current = self.main;
        }
        drop(state);
        ctx.close();
        tracing::debug!(context = %id, initiator = %ctx.initiator, "context destroyed");
    }

    /// Runs `fut` inside a fresh context, restoring the previous one after.
    ///
    /// Captures the currently active id, creates and activates a new context
    /// built from `params`, awaits `fut` through the [`Waiter`], then,
    /// success or failure, destroys the fresh context and re-activates the
    /// captured id. If the captured context died while `fut` was suspended,
    /// the active pointer stays on the main context and a warning is logged.
    pub async fn run_in_new_context<T, F>(
        self: &Arc<Self>,
        params: ContextParams,
        fut: F,
    ) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let prev = self.current_id();
        let id = self.create(params);
        self.set_active(id)?;

        let out = Waiter::new(self).wait(fut).await;

        // The waiter restored `id`; destroy falls back to main, then the
        // captured id takes over again if it is still alive.
        self.destroy(id);
        if self.set_active(prev).is_err() {
            tracing::warn!(
                context = %prev,
                "previous context died while work was suspended; staying on main"
            );
        }
        out
    }
}
