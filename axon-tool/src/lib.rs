#![deny(missing_docs)]
//! Tool registry, typed JSON codecs, and the dispatch pipeline.
//!
//! The runtime is tool-agnostic: it never imports concrete payload or
//! result types. It moves canonical JSON and consults type-erased codecs
//! by tool name — code generation owns type safety, this crate stays
//! generic. [`ToolRegistry`] holds the registrations, [`Dispatcher`]
//! executes one call end to end with structured error surfaces.

pub mod codec;
pub mod dispatch;
pub mod hint;
pub mod registry;
pub mod spec;
pub mod toolset;
pub mod validate;

pub use codec::*;
pub use dispatch::*;
pub use hint::*;
pub use registry::*;
pub use spec::*;
pub use toolset::*;
