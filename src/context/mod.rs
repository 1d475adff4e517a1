//! Execution contexts: who/what a chain of work runs on behalf of.
//!
//! This module groups the context **data model**, the **registry** that owns
//! all live contexts plus the single "currently active" pointer, and the
//! **waiter** that keeps that pointer coherent across suspension points.
//!
//! ## Contents
//! - [`Context`], [`ContextParams`] identity, log prefix, option bag, resource handle
//! - [`Resource`], [`ResourceFactory`] host-supplied per-context resource (e.g. a db session)
//! - [`ContextRegistry`], [`ContextId`] live set + active pointer + main context
//! - [`Waiter`] capture-on-suspend / restore-on-resume
//!
//! ## Quick reference
//! - **Creators**: scheduler context jobs, `ContextRegistry::run_in_new_context`,
//!   request-handling glue in the host application.
//! - **Consumers**: both queues (context capture/restore), the event bus
//!   (through the batch queue), every `Context::log` call site.

mod context;
mod registry;
mod waiter;

pub use context::{Context, ContextParams, NullResources, Resource, ResourceFactory};
pub use registry::{ContextId, ContextRegistry};
pub use waiter::Waiter;
