//! Conversations: history, turns and the agent loop entry points.
//!
//! A [`ChatSession`] owns the message history of one conversation and
//! runs turns against a single provider. Each turn sends the history plus
//! the new prompt, executes any tools the model requests, and repeats
//! until the model answers without tool calls or a tool halts the loop.
//!
//! Turns are atomic. The prompt and every message the turn produces are
//! appended to history, and their usage recorded, only once the turn
//! completes or halts. An error, or dropping a stream or
//! [`TurnHandle`] midway, leaves the session exactly as it was.
//!
//! All entry points take `&mut self`, so one session runs one turn at a
//! time.
//!
//! There are three ways to drive a turn:
//!
//! - [`ask`](ChatSession::ask): run to completion and return the answer.
//! - [`stream`](ChatSession::stream): the same loop as a stream of
//!   [`SessionEvent`]s, with model deltas as they arrive.
//! - [`turn`](ChatSession::turn): step through the loop, stopping for
//!   approval when the config uses
//!   [`ToolExecutionMode::Confirm`](crate::config::ToolExecutionMode::Confirm).

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::chat::{ChatMessage, ToolCall};
use crate::config::{CallOptions, ClientConfig};
use crate::error::LlmError;
use crate::middleware::MiddlewareStack;
use crate::provider::{Capability, ChatParams, DynProvider};
use crate::retry::with_deadline;
use crate::stream::{ChatStream, StreamAccumulator, StreamEvent, interrupted};
use crate::tool::loop_core::{Driven, Engine, LoopCore, Prepared, Step, drive};
use crate::tool::{ToolApproval, ToolRegistry};
use crate::usage::{Usage, UsageTracker};

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model answered without requesting tools.
    Complete,
    /// A tool or middleware ended the loop early.
    Halted,
}

/// Result of a finished turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The final assistant message, also the last entry in history.
    pub message: ChatMessage,
    /// Why the loop stopped.
    pub termination: Termination,
    /// Model round trips made.
    pub iterations: u32,
    /// Tool handlers run (or recorded, in dry-run mode).
    pub tool_calls_executed: u32,
    /// Usage summed over the turn's model calls.
    pub usage: Usage,
}

impl TurnOutcome {
    /// Text of the final message.
    pub fn text(&self) -> String {
        self.message.text()
    }

    /// `true` if the turn was halted.
    pub fn is_halted(&self) -> bool {
        self.termination == Termination::Halted
    }
}

/// An item of [`ChatSession::stream`].
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A model event, forwarded as received.
    Stream(StreamEvent),
    /// A tool is about to run.
    ToolExecutionStart {
        /// Id of the call.
        call_id: String,
        /// Tool name.
        tool_name: String,
    },
    /// A tool finished.
    ToolExecutionEnd {
        /// Id of the call.
        call_id: String,
        /// Tool name.
        tool_name: String,
        /// Whether the result is an error message.
        is_error: bool,
        /// Handler run time.
        elapsed: Duration,
    },
    /// The turn finished and has been committed. Always the last item.
    Done(TurnOutcome),
}

/// Stream of [`SessionEvent`]s borrowing the session.
pub type SessionStream<'s> = Pin<Box<dyn Stream<Item = Result<SessionEvent, LlmError>> + Send + 's>>;

/// One conversation with one provider.
///
/// `Ctx` is application state handed to tools through
/// [`ToolContext::state`](crate::tool::ToolContext::state).
pub struct ChatSession<Ctx: Send + Sync + 'static = ()> {
    engine: Engine<Ctx>,
    history: Vec<ChatMessage>,
    usage: UsageTracker,
}

impl<Ctx: Send + Sync + 'static> std::fmt::Debug for ChatSession<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("provider", &self.engine.provider_name)
            .field("messages", &self.history.len())
            .field("tools", &self.engine.tools.len())
            .field("middleware", &self.engine.middleware)
            .finish_non_exhaustive()
    }
}

impl ChatSession<()> {
    /// A session without tool context.
    pub fn new(provider: Arc<dyn DynProvider>, config: ClientConfig) -> Self {
        Self::with_context(provider, config, ())
    }
}

impl<Ctx: Send + Sync + 'static> ChatSession<Ctx> {
    /// A session whose tools receive `state`.
    pub fn with_context(provider: Arc<dyn DynProvider>, config: ClientConfig, state: Ctx) -> Self {
        let provider_name = provider.metadata().name.into_owned();
        Self {
            engine: Engine {
                provider,
                provider_name,
                config: Arc::new(config),
                tools: Arc::new(ToolRegistry::new()),
                middleware: MiddlewareStack::new(),
                state: Arc::new(state),
            },
            history: Vec::new(),
            usage: UsageTracker::new(),
        }
    }

    /// Offers `tools` to the model.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry<Ctx>) -> Self {
        self.engine.tools = Arc::new(tools);
        self
    }

    /// Installs middleware around every provider call.
    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewareStack) -> Self {
        self.engine.middleware = middleware;
        self
    }

    /// Starts from existing history, e.g. a restored conversation.
    #[must_use]
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Sets the context window used by [`UsageTracker::context_utilization`].
    #[must_use]
    pub fn with_context_limit(mut self, limit: u64) -> Self {
        self.usage.set_context_limit(limit);
        self
    }

    /// Committed messages, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Usage of every committed model call.
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Usage summed over committed turns.
    pub fn total_usage(&self) -> &Usage {
        self.usage.total()
    }

    /// The session's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.engine.config
    }

    /// Display name of the provider.
    pub fn provider_name(&self) -> &str {
        &self.engine.provider_name
    }

    /// The tools offered to the model.
    pub fn tools(&self) -> &ToolRegistry<Ctx> {
        &self.engine.tools
    }

    fn begin(&self, prompt: ChatMessage, options: CallOptions) -> Result<LoopCore<Ctx>, LlmError> {
        LoopCore::new(self.engine.clone(), self.history.clone(), prompt, options)
    }

    fn commit(&mut self, core: &mut LoopCore<Ctx>) {
        let (messages, usages) = core.take_commit();
        debug!(
            messages = messages.len(),
            model_calls = usages.len(),
            "turn committed"
        );
        self.history.extend(messages);
        self.usage.extend(usages);
    }

    /// Sends `prompt` and returns the final assistant message.
    ///
    /// # Errors
    ///
    /// Any error that ends the turn. History is unchanged on error.
    pub async fn ask(&mut self, prompt: impl Into<ChatMessage>) -> Result<ChatMessage, LlmError> {
        self.ask_with(prompt, CallOptions::default())
            .await
            .map(|outcome| outcome.message)
    }

    /// Sends `prompt` with per-call overrides and returns the full outcome.
    ///
    /// In confirm mode each tool call is decided by the config's approval
    /// callback.
    ///
    /// # Errors
    ///
    /// - [`LlmError::Configuration`] in confirm mode without an approval callback.
    /// - [`LlmError::ToolLimitExceeded`] when the tool budget runs out.
    /// - Upstream and tool-loop failures wrapped in [`LlmError::Operation`]
    ///   naming the provider; use [`LlmError::root`] to match the cause.
    #[instrument(skip_all, fields(provider = %self.engine.provider_name))]
    pub async fn ask_with(
        &mut self,
        prompt: impl Into<ChatMessage>,
        options: CallOptions,
    ) -> Result<TurnOutcome, LlmError> {
        let mut core = self.begin(prompt.into(), options)?;
        loop {
            match drive(&mut core).await? {
                Driven::Finished(outcome) => {
                    self.commit(&mut core);
                    return Ok(outcome);
                }
                Driven::AwaitingApproval(calls) => {
                    approve_unattended(&mut core, &self.engine.config, &calls)?;
                }
            }
        }
    }

    /// Starts a turn driven step by step.
    ///
    /// # Errors
    ///
    /// An error from an `on_new_message` middleware hook.
    pub fn turn(&mut self, prompt: impl Into<ChatMessage>) -> Result<TurnHandle<'_, Ctx>, LlmError> {
        self.turn_with(prompt, CallOptions::default())
    }

    /// [`turn`](Self::turn) with per-call overrides.
    ///
    /// # Errors
    ///
    /// An error from an `on_new_message` middleware hook.
    pub fn turn_with(
        &mut self,
        prompt: impl Into<ChatMessage>,
        options: CallOptions,
    ) -> Result<TurnHandle<'_, Ctx>, LlmError> {
        let core = self.begin(prompt.into(), options)?;
        Ok(TurnHandle {
            session: self,
            core: Some(core),
        })
    }

    /// Runs a turn as a stream of events.
    ///
    /// The stream ends after [`SessionEvent::Done`], or after the first
    /// error. Dropping it early cancels the turn and leaves history
    /// untouched.
    pub fn stream(&mut self, prompt: impl Into<ChatMessage>) -> SessionStream<'_> {
        self.stream_with(prompt, CallOptions::default())
    }

    /// [`stream`](Self::stream) with per-call overrides.
    pub fn stream_with(
        &mut self,
        prompt: impl Into<ChatMessage>,
        options: CallOptions,
    ) -> SessionStream<'_> {
        let core = match self.begin(prompt.into(), options) {
            Ok(core) => core,
            Err(err) => return Box::pin(futures::stream::once(async move { Err(err) })),
        };
        let state = StreamState {
            session: self,
            core,
            phase: Phase::Idle,
            done: None,
        };
        Box::pin(futures::stream::unfold(Some(state), |slot| async move {
            let mut state = slot?;
            match state.advance().await {
                Ok(Some(SessionEvent::Done(outcome))) => Some((Ok(SessionEvent::Done(outcome)), None)),
                Ok(Some(event)) => Some((Ok(event), Some(state))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        }))
    }
}

fn approve_unattended<Ctx: Send + Sync + 'static>(
    core: &mut LoopCore<Ctx>,
    config: &ClientConfig,
    calls: &[ToolCall],
) -> Result<(), LlmError> {
    if !config.has_approval() {
        return Err(LlmError::Configuration(
            "confirm mode needs an approval callback; set one with approve_with() or drive the turn with turn()"
                .into(),
        ));
    }
    for call in calls {
        let decision = config.approve(call).unwrap_or(ToolApproval::Approve);
        core.decide(&call.id, decision)?;
    }
    Ok(())
}

/// A turn in progress, driven by [`next`](Self::next).
///
/// In confirm mode `next` stops with [`TurnStep::AwaitingApproval`].
/// Record a decision for each listed call, then call `next` again; the
/// validated batch is kept across the pause.
///
/// ```rust,no_run
/// # use llm_relay::{ChatSession, LlmError};
/// # use llm_relay::session::TurnStep;
/// # async fn run(session: &mut ChatSession) -> Result<(), LlmError> {
/// let mut turn = session.turn("Clean up the temp directory")?;
/// let outcome = loop {
///     match turn.next().await? {
///         TurnStep::AwaitingApproval(calls) => {
///             for call in calls {
///                 if call.name == "delete_file" {
///                     turn.deny(&call.id, "deletion needs a human")?;
///                 } else {
///                     turn.approve(&call.id)?;
///                 }
///             }
///         }
///         TurnStep::Done(outcome) => break outcome,
///     }
/// };
/// println!("{}", outcome.text());
/// # Ok(())
/// # }
/// ```
pub struct TurnHandle<'s, Ctx: Send + Sync + 'static = ()> {
    session: &'s mut ChatSession<Ctx>,
    core: Option<LoopCore<Ctx>>,
}

impl<Ctx: Send + Sync + 'static> std::fmt::Debug for TurnHandle<'_, Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHandle")
            .field("finished", &self.core.is_none())
            .field("iteration", &self.core.as_ref().map(LoopCore::iteration))
            .finish()
    }
}

/// Where [`TurnHandle::next`] stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStep {
    /// These calls need a decision before the loop can continue.
    AwaitingApproval(Vec<ToolCall>),
    /// The turn finished and has been committed.
    Done(TurnOutcome),
}

impl<Ctx: Send + Sync + 'static> TurnHandle<'_, Ctx> {
    fn core_mut(&mut self) -> Result<&mut LoopCore<Ctx>, LlmError> {
        self.core
            .as_mut()
            .ok_or_else(|| LlmError::InvalidRequest("the turn has already ended".into()))
    }

    /// Runs until the turn ends or needs approval.
    ///
    /// # Errors
    ///
    /// Any error that ends the turn; afterwards the handle is spent and
    /// history is unchanged.
    #[instrument(skip_all, fields(provider = %self.session.engine.provider_name))]
    pub async fn next(&mut self) -> Result<TurnStep, LlmError> {
        let core = self.core_mut()?;
        match drive(core).await {
            Ok(Driven::AwaitingApproval(calls)) => Ok(TurnStep::AwaitingApproval(calls)),
            Ok(Driven::Finished(outcome)) => {
                if let Some(mut core) = self.core.take() {
                    self.session.commit(&mut core);
                }
                Ok(TurnStep::Done(outcome))
            }
            Err(err) => {
                self.core = None;
                Err(err)
            }
        }
    }

    /// Calls still waiting for a decision.
    pub fn pending(&self) -> Vec<ToolCall> {
        self.core.as_ref().map_or_else(Vec::new, LoopCore::undecided)
    }

    /// Approves one call.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] if no call with that id is pending.
    pub fn approve(&mut self, call_id: &str) -> Result<(), LlmError> {
        self.core_mut()?.decide(call_id, ToolApproval::Approve)
    }

    /// Denies one call; `reason` is reported to the model.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] if no call with that id is pending.
    pub fn deny(&mut self, call_id: &str, reason: impl Into<String>) -> Result<(), LlmError> {
        self.core_mut()?
            .decide(call_id, ToolApproval::Deny(reason.into()))
    }

    /// Approves one call with replacement arguments.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] if no call with that id is pending.
    pub fn modify(&mut self, call_id: &str, arguments: Value) -> Result<(), LlmError> {
        self.core_mut()?
            .decide(call_id, ToolApproval::Modify(arguments))
    }

    /// Approves every pending call.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] if the turn has ended.
    pub fn approve_all(&mut self) -> Result<(), LlmError> {
        let core = self.core_mut()?;
        for call in core.undecided() {
            core.decide(&call.id, ToolApproval::Approve)?;
        }
        Ok(())
    }
}

enum Phase {
    Idle,
    Receiving {
        stream: ChatStream,
        acc: StreamAccumulator,
        params: ChatParams,
        started: Instant,
    },
    Received {
        acc: StreamAccumulator,
        params: ChatParams,
        started: Instant,
    },
    Finished,
}

struct StreamState<'s, Ctx: Send + Sync + 'static> {
    session: &'s mut ChatSession<Ctx>,
    core: LoopCore<Ctx>,
    phase: Phase,
    done: Option<TurnOutcome>,
}

impl<Ctx: Send + Sync + 'static> StreamState<'_, Ctx> {
    /// Produces the next event, or `None` once the turn is over.
    async fn advance(&mut self) -> Result<Option<SessionEvent>, LlmError> {
        loop {
            if let Some(event) = self.core.take_event() {
                return Ok(Some(event));
            }
            match std::mem::replace(&mut self.phase, Phase::Idle) {
                Phase::Idle => match self.core.prepare()? {
                    Prepared::Send(params) => {
                        let stream = self.core.open_stream(&params).await?;
                        self.phase = Phase::Receiving {
                            stream,
                            acc: StreamAccumulator::new(),
                            params,
                            started: Instant::now(),
                        };
                    }
                    Prepared::Answered(params, response) => {
                        let step = self
                            .core
                            .handle_response(params, response, Duration::ZERO)
                            .await?;
                        self.settle(step).await?;
                    }
                    Prepared::Halted(step) => self.settle(step).await?,
                },
                Phase::Receiving {
                    mut stream,
                    mut acc,
                    params,
                    started,
                } => {
                    let timeout = self.core.request_timeout();
                    let next = with_deadline(timeout, async { Ok(stream.next().await) }).await;
                    let event = match next {
                        Ok(Some(Ok(event))) => event,
                        Ok(Some(Err(err))) | Err(err) => {
                            return Err(self.stream_failure(acc.events_seen(), err));
                        }
                        Ok(None) => {
                            let seen = acc.events_seen();
                            return Err(self.stream_failure(
                                seen,
                                LlmError::ResponseFormat {
                                    message: "stream ended before a finish signal".into(),
                                    raw: acc.text().to_string(),
                                },
                            ));
                        }
                    };
                    self.phase = if acc.push(&event) {
                        drop(stream);
                        Phase::Received {
                            acc,
                            params,
                            started,
                        }
                    } else {
                        Phase::Receiving {
                            stream,
                            acc,
                            params,
                            started,
                        }
                    };
                    return Ok(Some(SessionEvent::Stream(event)));
                }
                Phase::Received {
                    acc,
                    params,
                    started,
                } => {
                    let response = acc.finish(self.core.model_name()).map_err(|e| {
                        e.in_operation(self.core.provider_name(), Capability::Streaming)
                    })?;
                    let step = self
                        .core
                        .handle_response(params, response, started.elapsed())
                        .await?;
                    self.settle(step).await?;
                }
                Phase::Finished => {
                    self.phase = Phase::Finished;
                    return Ok(self.done.take().map(SessionEvent::Done));
                }
            }
        }
    }

    fn stream_failure(&self, chunks: usize, err: LlmError) -> LlmError {
        interrupted(chunks, err).in_operation(self.core.provider_name(), Capability::Streaming)
    }

    /// Applies a loop transition. Tool events queued by the core are
    /// yielded before `Done`.
    async fn settle(&mut self, mut step: Step) -> Result<(), LlmError> {
        loop {
            match step {
                Step::Continue => return Ok(()),
                Step::Finished(outcome) => {
                    self.session.commit(&mut self.core);
                    self.done = Some(outcome);
                    self.phase = Phase::Finished;
                    return Ok(());
                }
                Step::AwaitingApproval(calls) => {
                    let config = Arc::clone(&self.session.engine.config);
                    approve_unattended(&mut self.core, &config, &calls)?;
                    step = self.core.resume().await?;
                }
            }
        }
    }
}
