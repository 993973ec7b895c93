#![deny(missing_docs)]
//! Inline workflow engine: activities execute directly, signals ride
//! tokio channels, time is the wall clock.
//!
//! No journaling, no crash recovery, no replay — the deterministic loop
//! runs exactly once. Suitable for development, testing, and
//! single-process deployments; durable engines implement the same
//! [`WorkflowEngine`] contract against their own primitives.

mod channel;
mod runtime;

pub use channel::LocalSignalChannel;
pub use runtime::{LocalEngine, LocalRuntime, LocalRuntimeBuilder};
