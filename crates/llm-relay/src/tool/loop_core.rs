//! The agent loop state machine shared by every way of driving a turn.
//!
//! `LoopCore` owns one turn: the messages it has produced so far, the
//! usage of each model call and the tool budget. It never touches the
//! session; the driver commits [`LoopCore::take_commit`] once the turn
//! reaches a terminal state, so a failed or abandoned turn leaves no
//! trace in history.
//!
//! ```text
//! prepare ──► model call ──► handle_response ──┬──► Finished (Complete)
//!    ▲                                         ├──► AwaitingApproval ──► decide* ──► resume
//!    └──────────────── Continue ◄──────────────┴──► Finished (Halted)
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use super::execution::{ReadyCall, execute_batch};
use super::{ToolApproval, ToolHandler, ToolRegistry};
use crate::chat::{ChatMessage, ChatResponse, ToolCall};
use crate::config::{CallOptions, ClientConfig, ToolExecutionMode};
use crate::error::LlmError;
use crate::middleware::{Directive, MiddlewareStack, TurnSnapshot};
use crate::provider::{Capability, ChatParams, DynProvider, ToolChoice};
use crate::retry::with_deadline;
use crate::session::{SessionEvent, Termination, TurnOutcome};
use crate::stream::ChatStream;
use crate::usage::Usage;

/// Shared, immutable parts of a session.
pub(crate) struct Engine<Ctx: Send + Sync + 'static> {
    pub(crate) provider: Arc<dyn DynProvider>,
    pub(crate) provider_name: String,
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) tools: Arc<ToolRegistry<Ctx>>,
    pub(crate) middleware: MiddlewareStack,
    pub(crate) state: Arc<Ctx>,
}

impl<Ctx: Send + Sync + 'static> Clone for Engine<Ctx> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            provider_name: self.provider_name.clone(),
            config: Arc::clone(&self.config),
            tools: Arc::clone(&self.tools),
            middleware: self.middleware.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// What to do for the next model call.
pub(crate) enum Prepared {
    /// Send this request.
    Send(ChatParams),
    /// A middleware answered in place of the provider.
    Answered(ChatParams, ChatResponse),
    /// A middleware ended the turn.
    Halted(Step),
}

/// Where the loop stands after a transition.
pub(crate) enum Step {
    /// Call the model again.
    Continue,
    /// Confirm mode: these calls need a decision.
    AwaitingApproval(Vec<ToolCall>),
    /// Terminal.
    Finished(TurnOutcome),
}

enum Planned<Ctx> {
    /// Failed validation; the message goes back to the model.
    Rejected(ToolCall, ChatMessage),
    Ready(ToolCall, Arc<dyn ToolHandler<Ctx>>),
}

struct PendingBatch<Ctx> {
    planned: Vec<Planned<Ctx>>,
    decisions: HashMap<String, ToolApproval>,
}

pub(crate) struct LoopCore<Ctx: Send + Sync + 'static> {
    engine: Engine<Ctx>,
    base: Vec<ChatMessage>,
    staged: Vec<ChatMessage>,
    usages: Vec<Usage>,
    options: CallOptions,
    iteration: u32,
    executed: u32,
    /// Call ids that failed validation last iteration.
    last_failures: HashSet<String>,
    pending: Option<PendingBatch<Ctx>>,
    events: VecDeque<SessionEvent>,
}

impl<Ctx: Send + Sync + 'static> LoopCore<Ctx> {
    pub(crate) fn new(
        engine: Engine<Ctx>,
        base: Vec<ChatMessage>,
        prompt: ChatMessage,
        options: CallOptions,
    ) -> Result<Self, LlmError> {
        engine
            .middleware
            .notify("on_new_message", |m| m.on_new_message(&prompt))?;
        Ok(Self {
            engine,
            base,
            staged: vec![prompt],
            usages: Vec::new(),
            options,
            iteration: 0,
            executed: 0,
            last_failures: HashSet::new(),
            pending: None,
            events: VecDeque::new(),
        })
    }

    pub(crate) fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Model name reported for streamed responses.
    pub(crate) fn model_name(&self) -> String {
        self.options
            .model
            .clone()
            .or_else(|| self.engine.config.model().map(str::to_string))
            .unwrap_or_else(|| self.engine.provider.metadata().model)
    }

    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        self.options
            .timeout
            .or_else(|| self.engine.config.request_timeout())
    }

    pub(crate) fn provider_name(&self) -> &str {
        &self.engine.provider_name
    }

    pub(crate) fn take_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    fn build_request(&self) -> ChatParams {
        let config = &self.engine.config;
        let tools = (!self.engine.tools.is_empty()).then(|| self.engine.tools.definitions());
        let tool_choice = self
            .options
            .tool_choice
            .clone()
            .or_else(|| tools.as_ref().map(|_| ToolChoice::Auto));
        ChatParams {
            messages: self.base.iter().chain(&self.staged).cloned().collect(),
            model: self.options.model.clone().or_else(|| config.model().map(str::to_string)),
            tools,
            tool_choice,
            temperature: self.options.temperature.or_else(|| config.temperature()),
            max_tokens: self.options.max_tokens.or_else(|| config.max_tokens()),
            system: config.system().map(str::to_string),
            timeout: self.request_timeout(),
            metadata: HashMap::new(),
        }
    }

    /// Starts the next iteration and runs the `before_request` hooks.
    pub(crate) fn prepare(&mut self) -> Result<Prepared, LlmError> {
        self.iteration += 1;
        let params = self.build_request();
        let directive = self
            .engine
            .middleware
            .run("before_request", |m| m.before_request(&params))?;
        Ok(match directive {
            None => Prepared::Send(params),
            Some(Directive::ReplaceRequest(replacement)) => Prepared::Send(*replacement),
            Some(Directive::Respond(response)) => Prepared::Answered(params, *response),
            Some(Directive::Halt(message)) => Prepared::Halted(self.halt(message)?),
        })
    }

    /// One non-streaming model call under the retry policy.
    pub(crate) async fn call_model(&self, params: &ChatParams) -> Result<ChatResponse, LlmError> {
        let provider = &self.engine.provider;
        let timeout = params.timeout;
        debug!(
            provider = %self.engine.provider_name,
            iteration = self.iteration,
            messages = params.messages.len(),
            "model call"
        );
        self.engine
            .config
            .retry()
            .run(|| with_deadline(timeout, provider.chat_boxed(params)))
            .await
            .map_err(|e| e.in_operation(&self.engine.provider_name, Capability::Chat))
    }

    /// Opens a stream under the retry policy. Only opening is retried.
    pub(crate) async fn open_stream(&self, params: &ChatParams) -> Result<ChatStream, LlmError> {
        let provider = &self.engine.provider;
        let timeout = params.timeout;
        debug!(
            provider = %self.engine.provider_name,
            iteration = self.iteration,
            "opening stream"
        );
        self.engine
            .config
            .retry()
            .run(|| with_deadline(timeout, provider.stream_boxed(params)))
            .await
            .map_err(|e| e.in_operation(&self.engine.provider_name, Capability::Streaming))
    }

    /// Folds a model response into the turn.
    pub(crate) async fn handle_response(
        &mut self,
        params: ChatParams,
        response: ChatResponse,
        elapsed: Duration,
    ) -> Result<Step, LlmError> {
        let middleware = &self.engine.middleware;
        let response = match middleware.run("after_response", |m| m.after_response(&response))? {
            None => response,
            Some(Directive::Respond(replacement)) => *replacement,
            Some(Directive::Halt(message)) => {
                // The call was made, so its usage stays with the halting message.
                debug!(iteration = self.iteration, "turn halted after response");
                self.usages.push(response.usage.clone());
                let message = ChatMessage {
                    usage: Some(response.usage),
                    ..ChatMessage::assistant(message)
                };
                return self.finish(message, Termination::Halted);
            }
            Some(directive @ Directive::ReplaceRequest(_)) => {
                warn!(?directive, "request replacement ignored after the response");
                response
            }
        };
        self.usages.push(response.usage.clone());

        if !middleware.is_empty() {
            let snapshot = TurnSnapshot {
                iteration: self.iteration,
                request: params,
                usage: response.usage.clone(),
                response: response.clone(),
                elapsed,
            };
            middleware.notify("after_turn", |m| m.after_turn(&snapshot))?;
        }

        let message = response.into_message();
        if !message.has_tool_calls() {
            return self.finish(message, Termination::Complete);
        }

        let calls = message.tool_calls.clone();
        self.staged.push(message);
        let planned = self.plan(calls)?;

        match self.engine.config.tool_mode() {
            ToolExecutionMode::Confirm if planned.iter().any(|p| matches!(p, Planned::Ready(..))) => {
                let awaiting = ready_calls(&planned);
                self.pending = Some(PendingBatch {
                    planned,
                    decisions: HashMap::new(),
                });
                Ok(Step::AwaitingApproval(awaiting))
            }
            _ => self.run_batch(planned).await,
        }
    }

    /// Validates each call. Rejected calls are answered immediately.
    fn plan(&mut self, calls: Vec<ToolCall>) -> Result<Vec<Planned<Ctx>>, LlmError> {
        let mut failures = HashSet::new();
        let mut planned = Vec::with_capacity(calls.len());
        for call in calls {
            match self.engine.tools.validate(&call) {
                Ok(handler) => planned.push(Planned::Ready(call, handler)),
                Err(err) => {
                    if self.last_failures.contains(&call.id) {
                        warn!(tool = %call.name, call_id = %call.id, "validation failed again");
                        return Err(self.tool_failure(err));
                    }
                    warn!(tool = %call.name, call_id = %call.id, error = %err, "invalid tool call");
                    failures.insert(call.id.clone());
                    let message = ChatMessage::tool_error(&call.id, err.to_string()).with_name(&call.name);
                    planned.push(Planned::Rejected(call, message));
                }
            }
        }
        self.last_failures = failures;
        Ok(planned)
    }

    /// Calls still waiting for a decision.
    pub(crate) fn undecided(&self) -> Vec<ToolCall> {
        self.pending.as_ref().map_or_else(Vec::new, |batch| {
            ready_calls(&batch.planned)
                .into_iter()
                .filter(|c| !batch.decisions.contains_key(&c.id))
                .collect()
        })
    }

    pub(crate) fn is_awaiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Records a decision for a pending call.
    pub(crate) fn decide(&mut self, call_id: &str, approval: ToolApproval) -> Result<(), LlmError> {
        let batch = self
            .pending
            .as_mut()
            .ok_or_else(|| LlmError::InvalidRequest("no tool calls are awaiting approval".into()))?;
        let known = batch
            .planned
            .iter()
            .any(|p| matches!(p, Planned::Ready(call, _) if call.id == call_id));
        if !known {
            return Err(LlmError::InvalidRequest(format!(
                "no pending tool call with id '{call_id}'"
            )));
        }
        batch.decisions.insert(call_id.to_string(), approval);
        Ok(())
    }

    /// Runs the pending batch once every call has a decision.
    pub(crate) async fn resume(&mut self) -> Result<Step, LlmError> {
        let Some(mut batch) = self.pending.take() else {
            return Ok(Step::Continue);
        };
        let mut planned = Vec::with_capacity(batch.planned.len());
        for entry in batch.planned {
            let Planned::Ready(call, handler) = entry else {
                planned.push(entry);
                continue;
            };
            match batch.decisions.remove(&call.id) {
                Some(ToolApproval::Approve) => planned.push(Planned::Ready(call, handler)),
                Some(ToolApproval::Deny(reason)) => {
                    debug!(tool = %call.name, call_id = %call.id, "tool call denied");
                    let message = ChatMessage::tool_error(&call.id, format!("Denied: {reason}"))
                        .with_name(&call.name);
                    planned.push(Planned::Rejected(call, message));
                }
                Some(ToolApproval::Modify(arguments)) => {
                    planned.push(self.revalidate(call, arguments));
                }
                None => {
                    return Err(LlmError::InvalidRequest(format!(
                        "tool call '{}' has no approval decision",
                        call.id
                    )));
                }
            }
        }
        self.run_batch(planned).await
    }

    fn revalidate(&self, call: ToolCall, arguments: Value) -> Planned<Ctx> {
        let call = ToolCall { arguments, ..call };
        match self.engine.tools.validate(&call) {
            Ok(handler) => Planned::Ready(call, handler),
            Err(err) => {
                let message = ChatMessage::tool_error(&call.id, err.to_string()).with_name(&call.name);
                Planned::Rejected(call, message)
            }
        }
    }

    async fn run_batch(&mut self, planned: Vec<Planned<Ctx>>) -> Result<Step, LlmError> {
        let limit = self.engine.config.max_tool_calls();
        let ready_count = planned
            .iter()
            .filter(|p| matches!(p, Planned::Ready(..)))
            .count();
        let requested = self
            .executed
            .saturating_add(u32::try_from(ready_count).unwrap_or(u32::MAX));
        if requested > limit {
            warn!(limit, executed = self.executed, requested = ready_count, "tool budget exhausted");
            return Err(self.tool_failure(LlmError::ToolLimitExceeded { limit }));
        }

        let middleware = &self.engine.middleware;
        let mut slots: Vec<Option<ChatMessage>> = Vec::with_capacity(planned.len());
        let mut calls = Vec::with_capacity(planned.len());
        let mut ready = Vec::new();
        for (index, entry) in planned.into_iter().enumerate() {
            match entry {
                Planned::Rejected(call, message) => {
                    slots.push(Some(message));
                    calls.push(call);
                }
                Planned::Ready(call, handler) => {
                    middleware.notify("on_tool_call", |m| m.on_tool_call(&call))?;
                    slots.push(None);
                    calls.push(call.clone());
                    ready.push(ReadyCall {
                        index,
                        call,
                        handler,
                    });
                }
            }
        }

        let mut halt = None;
        if self.engine.config.tool_mode() == ToolExecutionMode::DryRun {
            for r in &ready {
                slots[r.index] = Some(
                    ChatMessage::tool_result(
                        &r.call.id,
                        format!(
                            "[dry run] {} was not executed. Arguments: {}",
                            r.call.name, r.call.arguments
                        ),
                    )
                    .with_name(&r.call.name),
                );
            }
            self.executed += u32::try_from(ready.len()).unwrap_or(u32::MAX);
        } else if !ready.is_empty() {
            let batch = execute_batch(
                &ready,
                self.engine.state.as_ref(),
                self.iteration,
                self.engine.config.parallel_tool_execution(),
            )
            .await
            .map_err(|e| self.tool_failure(e))?;
            self.executed += batch.executed;
            self.events.extend(batch.events);
            for (index, message) in batch.messages {
                slots[index] = Some(message);
            }
            halt = batch.halt;
        }

        for (call, slot) in calls.iter().zip(slots) {
            let Some(message) = slot else { continue };
            middleware.notify("on_tool_result", |m| m.on_tool_result(call, &message))?;
            middleware.notify("on_new_message", |m| m.on_new_message(&message))?;
            self.staged.push(message);
        }

        match halt {
            Some(message) => self.halt(message),
            None => Ok(Step::Continue),
        }
    }

    /// Names the provider and the tool loop on a failure that ends the turn.
    fn tool_failure(&self, err: LlmError) -> LlmError {
        err.in_operation(&self.engine.provider_name, Capability::Tools)
    }

    fn halt(&mut self, message: String) -> Result<Step, LlmError> {
        debug!(iteration = self.iteration, "turn halted");
        self.finish(ChatMessage::assistant(message), Termination::Halted)
    }

    fn finish(&mut self, message: ChatMessage, termination: Termination) -> Result<Step, LlmError> {
        self.engine
            .middleware
            .notify("on_end_message", |m| m.on_end_message(&message))?;
        self.staged.push(message.clone());
        Ok(Step::Finished(TurnOutcome {
            message,
            termination,
            iterations: self.iteration,
            tool_calls_executed: self.executed,
            usage: self.usages.iter().sum(),
        }))
    }

    /// Hands over the messages and per-call usage to append to the session.
    pub(crate) fn take_commit(&mut self) -> (Vec<ChatMessage>, Vec<Usage>) {
        (
            std::mem::take(&mut self.staged),
            std::mem::take(&mut self.usages),
        )
    }
}

fn ready_calls<Ctx>(planned: &[Planned<Ctx>]) -> Vec<ToolCall> {
    planned
        .iter()
        .filter_map(|p| match p {
            Planned::Ready(call, _) => Some(call.clone()),
            Planned::Rejected(..) => None,
        })
        .collect()
}

/// Where a non-streaming drive stopped.
pub(crate) enum Driven {
    AwaitingApproval(Vec<ToolCall>),
    Finished(TurnOutcome),
}

/// Drives a turn without streaming until it finishes or needs approval.
pub(crate) async fn drive<Ctx: Send + Sync + 'static>(
    core: &mut LoopCore<Ctx>,
) -> Result<Driven, LlmError> {
    if core.is_awaiting() {
        let undecided = core.undecided();
        if !undecided.is_empty() {
            return Ok(Driven::AwaitingApproval(undecided));
        }
        match core.resume().await? {
            Step::Continue => {}
            Step::AwaitingApproval(calls) => return Ok(Driven::AwaitingApproval(calls)),
            Step::Finished(outcome) => return Ok(Driven::Finished(outcome)),
        }
    }
    loop {
        let step = match core.prepare()? {
            Prepared::Halted(step) => step,
            Prepared::Answered(params, response) => {
                core.handle_response(params, response, Duration::ZERO).await?
            }
            Prepared::Send(params) => {
                let started = Instant::now();
                let response = core.call_model(&params).await?;
                core.handle_response(params, response, started.elapsed()).await?
            }
        };
        match step {
            Step::Continue => {}
            Step::AwaitingApproval(calls) => return Ok(Driven::AwaitingApproval(calls)),
            Step::Finished(outcome) => return Ok(Driven::Finished(outcome)),
        }
    }
}
