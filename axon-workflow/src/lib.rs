#![deny(missing_docs)]
//! The deterministic workflow loop and await controller.
//!
//! This crate is the replay-safe heart of the runtime: a plan →
//! tool-call → resume loop whose every decision is a pure function of
//! the run's inputs and the activity results the engine hands back.
//! Time comes only from the engine clock, waiting only from engine
//! timers and signal channels, and derived identifiers are stable
//! across replays.

pub mod awaits;
pub mod children;
pub mod engine;
pub mod input;
pub mod policy;
pub mod reminders;
pub mod runner;
pub mod state;
mod turn;

pub use awaits::*;
pub use children::*;
pub use engine::*;
pub use input::*;
pub use policy::*;
pub use runner::*;
pub use state::*;
