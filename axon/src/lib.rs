#![deny(missing_docs)]
//! # axon — umbrella crate
//!
//! Single import surface for the axon agent runtime. Re-exports the
//! member crates behind feature flags, plus a `prelude` for the happy
//! path.

#[cfg(feature = "engine-local")]
pub use axon_engine_local;
#[cfg(feature = "core")]
pub use axon_hooks;
#[cfg(feature = "core")]
pub use axon_planner;
#[cfg(feature = "core")]
pub use axon_tool;
#[cfg(feature = "core")]
pub use axon_types;
#[cfg(feature = "core")]
pub use axon_workflow;

/// Happy-path imports for composing axon runtimes.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use axon_types::{
        AgentId, AgentSpec, AwaitId, AwaitItem, CapsState, FinalResponse, Message, PlanError,
        PlanInput, PlanResult, PlanResumeInput, RetryHint, Role, RunId, SessionId,
        TerminationReason, TokenUsage, ToolCallId, ToolEvent, ToolRequest, TurnId,
    };

    #[cfg(feature = "core")]
    pub use axon_tool::{
        ConfirmationSpec, Dispatcher, ExecutionOutput, ToolExecutor, ToolInvocation,
        ToolRegistry, ToolSpec, ToolValue, ToolsetRegistration, TypeSpec,
    };

    #[cfg(feature = "core")]
    pub use axon_hooks::{EventKind, EventMeta, HookBus, HookSubscriber, RunEvent, RunStore};

    #[cfg(feature = "core")]
    pub use axon_planner::{HistoryPolicy, Planner, PlannerBridge, PlannerEventSink};

    #[cfg(feature = "core")]
    pub use axon_workflow::{
        MissingFieldsPolicy, RunInput, RunLoop, RunOutput, RunPolicy, RuntimePolicy,
        WorkflowEngine,
    };

    #[cfg(feature = "engine-local")]
    pub use axon_engine_local::LocalRuntime;
}
