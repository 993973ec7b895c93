//! The local engine and its service facade.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use axon_hooks::{HookBus, HookSubscriber, RunEvent, RunStore, RunStoreProjector, StreamSink};
use axon_planner::{
    HistoryPolicy, Planner, PlannerBridge, PlannerEventSink, Summarizer, TranscriptLedger,
};
use axon_tool::{DispatchContext, Dispatcher, ToolRegistry};
use axon_types::{
    AwaitError, AwaitId, AwaitResolution, ExternalToolResult, HookError, PlanError, PlanInput,
    PlanResumeInput, RunError, RunId, SignalError, ToolCallId, ToolError, ToolEvent, ToolRequest,
};
use axon_workflow::{
    ActivityOptions, AwaitCoordinator, CONTROL_SIGNAL, ControlSender, ControlSignal,
    PauseRequest, PlanActivityOutput, ResumeRequest, RetryPolicy, RunInput, RunLoop, RunOutput,
    RuntimePolicy, SignalReceiver, WorkflowEngine,
};

use crate::channel::LocalSignalChannel;

/// Direct in-process implementation of [`WorkflowEngine`].
///
/// Planner and tool activities execute inline (with the planner retry
/// policy applied to retryable errors), child workflows are recursive
/// run loops, and hook publication goes straight to the bus.
pub struct LocalEngine {
    this: Weak<LocalEngine>,
    registry: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    bridge: PlannerBridge,
    bus: Arc<HookBus>,
    awaits: Arc<AwaitCoordinator>,
    channels: RwLock<HashMap<(RunId, String), Arc<LocalSignalChannel>>>,
    cancel: CancellationToken,
    planner_retry: RetryPolicy,
    default_tool_timeout: Duration,
    runtime_policy: Option<Arc<dyn RuntimePolicy>>,
    history: HistoryPolicy,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl LocalEngine {
    fn channel(&self, run_id: &RunId, name: &str) -> Arc<LocalSignalChannel> {
        let key = (run_id.clone(), name.to_owned());
        if let Some(channel) = self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return channel.clone();
        }
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(key)
            .or_insert_with(|| Arc::new(LocalSignalChannel::new(self.cancel.clone())))
            .clone()
    }

    fn run_loop(&self) -> Result<RunLoop, RunError> {
        let engine = self
            .this
            .upgrade()
            .ok_or_else(|| RunError::Internal("engine dropped".into()))?;
        let mut run_loop = RunLoop::new(engine, self.registry.clone(), self.awaits.clone())
            .with_history(self.history);
        if let Some(policy) = &self.runtime_policy {
            run_loop = run_loop.with_policy(policy.clone());
        }
        if let Some(summarizer) = &self.summarizer {
            run_loop = run_loop.with_summarizer(summarizer.clone());
        }
        Ok(run_loop)
    }

    fn sink_for(&self, input: &PlanInput) -> PlannerEventSink {
        let mut meta = axon_hooks::EventMeta::new(
            input.context.run_id.clone(),
            input.context.agent_id.clone(),
            input.context.session_id.clone(),
        );
        meta.turn_id = input.context.turn_id.clone();
        PlannerEventSink::with_ledger(self.bus.clone(), meta, TranscriptLedger::new())
    }

}

#[async_trait]
impl WorkflowEngine for LocalEngine {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn signal_channel(&self, run_id: &RunId, name: &str) -> Arc<dyn SignalReceiver> {
        self.channel(run_id, name)
    }

    async fn execute_plan_start(
        &self,
        input: PlanInput,
    ) -> Result<PlanActivityOutput, PlanError> {
        let sink = self.sink_for(&input);
        let mut delay = self.planner_retry.initial_interval;
        let mut attempt = 1;
        let result = loop {
            match self.bridge.plan_start(input.clone(), &sink).await {
                Ok(result) => break result,
                Err(error)
                    if error.is_retryable() && attempt < self.planner_retry.max_attempts =>
                {
                    debug!(attempt, error = %error, "retrying plan activity");
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.planner_retry.backoff_coefficient);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        };
        let (ledger, usage) = sink.export();
        Ok(PlanActivityOutput {
            result,
            usage,
            streamed_text: ledger.recover_final_text(),
        })
    }

    async fn execute_plan_resume(
        &self,
        input: PlanResumeInput,
    ) -> Result<PlanActivityOutput, PlanError> {
        let sink = self.sink_for(&input.base);
        let mut delay = self.planner_retry.initial_interval;
        let mut attempt = 1;
        let result = loop {
            match self.bridge.plan_resume(input.clone(), &sink).await {
                Ok(result) => break result,
                Err(error)
                    if error.is_retryable() && attempt < self.planner_retry.max_attempts =>
                {
                    debug!(attempt, error = %error, "retrying plan activity");
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.planner_retry.backoff_coefficient);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        };
        let (ledger, usage) = sink.export();
        Ok(PlanActivityOutput {
            result,
            usage,
            streamed_text: ledger.recover_final_text(),
        })
    }

    async fn execute_tool(
        &self,
        request: ToolRequest,
        options: ActivityOptions,
    ) -> Result<ToolEvent, ToolError> {
        let cancel = self.cancel.child_token();
        let timeout = options.timeout.unwrap_or(self.default_tool_timeout);
        let ctx = DispatchContext {
            via_activity: true,
            cancel: cancel.clone(),
        };
        tokio::select! {
            _ = self.cancel.cancelled() => {
                cancel.cancel();
                Err(ToolError::Canceled)
            }
            outcome = tokio::time::timeout(timeout, self.dispatcher.dispatch(&request, ctx)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout(timeout)),
                }
            }
        }
    }

    async fn execute_tool_batch(
        &self,
        requests: Vec<(ToolRequest, ActivityOptions)>,
    ) -> Vec<Result<ToolEvent, ToolError>> {
        let futures = requests
            .into_iter()
            .map(|(request, options)| self.execute_tool(request, options));
        futures::future::join_all(futures).await
    }

    async fn start_child_run(&self, input: RunInput) -> Result<RunOutput, RunError> {
        let run_loop = self.run_loop()?;
        Box::pin(run_loop.run(input)).await
    }

    async fn publish_hook(&self, event: RunEvent) -> Result<(), HookError> {
        self.bus.publish(event).await
    }

    fn set_child_suppression(&self, parent: ToolCallId, active: bool) {
        if active {
            self.bus.suppress_children(parent);
        } else {
            self.bus.unsuppress_children(&parent);
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[async_trait]
impl ControlSender for LocalEngine {
    async fn send(&self, run_id: &RunId, signal: ControlSignal) -> Result<(), SignalError> {
        let value = serde_json::to_value(&signal).map_err(|_| SignalError::Closed)?;
        self.channel(run_id, CONTROL_SIGNAL).send(value);
        Ok(())
    }
}

/// Builder for [`LocalRuntime`].
pub struct LocalRuntimeBuilder {
    planner: Arc<dyn Planner>,
    registry: Arc<ToolRegistry>,
    bus: Arc<HookBus>,
    run_store: Option<Arc<dyn RunStore>>,
    planner_retry: RetryPolicy,
    default_tool_timeout: Duration,
    runtime_policy: Option<Arc<dyn RuntimePolicy>>,
    history: HistoryPolicy,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl LocalRuntimeBuilder {
    /// Attach a pre-configured hook bus.
    #[must_use]
    pub fn bus(mut self, bus: Arc<HookBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Project run events into a store. The projector subscribes when
    /// the runtime is built.
    #[must_use]
    pub fn run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    /// Override the planner activity retry policy.
    #[must_use]
    pub fn planner_retry(mut self, retry: RetryPolicy) -> Self {
        self.planner_retry = retry;
        self
    }

    /// Override the default tool activity timeout.
    #[must_use]
    pub fn default_tool_timeout(mut self, timeout: Duration) -> Self {
        self.default_tool_timeout = timeout;
        self
    }

    /// Install a runtime policy.
    #[must_use]
    pub fn runtime_policy(mut self, policy: Arc<dyn RuntimePolicy>) -> Self {
        self.runtime_policy = Some(policy);
        self
    }

    /// Install a history compression policy.
    #[must_use]
    pub fn history(mut self, history: HistoryPolicy) -> Self {
        self.history = history;
        self
    }

    /// Install the summarizer backing `HistoryPolicy::Compress`.
    #[must_use]
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Build the runtime.
    pub fn build(self) -> LocalRuntime {
        if let Some(store) = &self.run_store {
            self.bus
                .subscribe(Arc::new(RunStoreProjector::new(store.clone())));
        }
        let awaits = Arc::new(AwaitCoordinator::new());
        let engine = Arc::new_cyclic(|this| LocalEngine {
            this: this.clone(),
            registry: self.registry.clone(),
            dispatcher: Dispatcher::new(self.registry.clone()),
            bridge: PlannerBridge::new(self.planner),
            bus: self.bus.clone(),
            awaits: awaits.clone(),
            channels: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            planner_retry: self.planner_retry,
            default_tool_timeout: self.default_tool_timeout,
            runtime_policy: self.runtime_policy,
            history: self.history,
            summarizer: self.summarizer,
        });
        LocalRuntime {
            engine,
            awaits,
            bus: self.bus,
        }
    }
}

/// The local runtime: a built engine plus the operator-facing surface
/// (`provide_*`, pause/resume, event streaming).
pub struct LocalRuntime {
    engine: Arc<LocalEngine>,
    awaits: Arc<AwaitCoordinator>,
    bus: Arc<HookBus>,
}

impl LocalRuntime {
    /// Start building a runtime over a planner and tool registry.
    pub fn builder(planner: Arc<dyn Planner>, registry: Arc<ToolRegistry>) -> LocalRuntimeBuilder {
        LocalRuntimeBuilder {
            planner,
            registry,
            bus: Arc::new(HookBus::new()),
            run_store: None,
            planner_retry: RetryPolicy::default(),
            default_tool_timeout: Duration::from_secs(60),
            runtime_policy: None,
            history: HistoryPolicy::KeepAll,
            summarizer: None,
        }
    }

    /// The hook bus, for attaching subscribers.
    pub fn bus(&self) -> &Arc<HookBus> {
        &self.bus
    }

    /// Subscribe a bounded event stream.
    pub fn subscribe_stream(&self, capacity: usize) -> tokio::sync::mpsc::Receiver<RunEvent> {
        let (sink, receiver) = StreamSink::new(capacity);
        self.bus.subscribe(Arc::new(sink));
        receiver
    }

    /// Attach an arbitrary subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn HookSubscriber>) {
        self.bus.subscribe(subscriber);
    }

    /// Run an agent to completion. A missing run ID gets a fresh v4
    /// UUID — the only place the runtime invents an identifier.
    pub async fn start_run(&self, mut input: RunInput) -> Result<RunOutput, RunError> {
        if input.run_id.as_str().is_empty() {
            input.run_id = RunId::new(uuid::Uuid::new_v4().to_string());
        }
        let run_loop = self.engine.run_loop()?;
        run_loop.run(input).await
    }

    /// Answer a pending clarification.
    pub async fn provide_clarification(
        &self,
        run_id: &RunId,
        await_id: AwaitId,
        answer: impl Into<String>,
    ) -> Result<(), AwaitError> {
        self.awaits.validate_clarification(run_id, &await_id)?;
        self.send(
            run_id,
            ControlSignal::Await(AwaitResolution::Clarification {
                await_id,
                answer: answer.into(),
            }),
        )
        .await
    }

    /// Answer pending structured questions.
    pub async fn provide_answers(
        &self,
        run_id: &RunId,
        await_id: AwaitId,
        answers: Vec<(String, String)>,
    ) -> Result<(), AwaitError> {
        self.awaits.validate_answers(run_id, &await_id, &answers)?;
        self.send(
            run_id,
            ControlSignal::Await(AwaitResolution::Answers { await_id, answers }),
        )
        .await
    }

    /// Provide results for awaited external tools. The provided set of
    /// call IDs must equal the awaited set as a multiset.
    pub async fn provide_tool_results(
        &self,
        run_id: &RunId,
        await_id: AwaitId,
        results: Vec<ExternalToolResult>,
    ) -> Result<(), AwaitError> {
        self.awaits
            .validate_tool_results(run_id, &await_id, &results)?;
        self.send(
            run_id,
            ControlSignal::Await(AwaitResolution::ToolResults { await_id, results }),
        )
        .await
    }

    /// Decide a pending confirmation.
    pub async fn provide_confirmation(
        &self,
        run_id: &RunId,
        await_id: AwaitId,
        approved: bool,
        requested_by: impl Into<String>,
    ) -> Result<(), AwaitError> {
        self.awaits.validate_confirmation(run_id, &await_id)?;
        self.send(
            run_id,
            ControlSignal::Await(AwaitResolution::Confirmation {
                await_id,
                approved,
                requested_by: requested_by.into(),
            }),
        )
        .await
    }

    /// Request a pause at the run's next checkpoint.
    pub async fn pause(&self, run_id: &RunId, request: PauseRequest) -> Result<(), AwaitError> {
        self.send(run_id, ControlSignal::Pause(request)).await
    }

    /// Resume a paused run.
    pub async fn resume(
        &self,
        run_id: &RunId,
        reason: Option<String>,
    ) -> Result<(), AwaitError> {
        self.send(run_id, ControlSignal::Resume(ResumeRequest { reason }))
            .await
    }

    /// Cancel every run on this engine.
    pub fn cancel(&self) {
        self.engine.cancel.cancel();
    }

    async fn send(&self, run_id: &RunId, signal: ControlSignal) -> Result<(), AwaitError> {
        ControlSender::send(self.engine.as_ref(), run_id, signal)
            .await
            .map_err(|e| AwaitError::NotAwaitable {
                run_id: run_id.clone(),
                reason: axon_types::NotAwaitableReason::UnknownRun,
                cause: Some(Box::new(e)),
            })
    }
}
