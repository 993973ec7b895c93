#![deny(missing_docs)]
//! Planner contract, traced bridge, streaming event sink, and the
//! transcript ledger.
//!
//! The planner is the LLM-driven decision maker. This crate wraps its
//! invocations with tracing, captures streamed model output into hook
//! events and a deterministic transcript ledger, aggregates token
//! usage, and enforces the plan-activity input budget.

pub mod bridge;
pub mod budget;
pub mod history;
pub mod ledger;
pub mod planner;
pub mod sink;
pub mod stream;

pub use bridge::*;
pub use budget::*;
pub use history::*;
pub use ledger::*;
pub use planner::*;
pub use sink::*;
pub use stream::*;
