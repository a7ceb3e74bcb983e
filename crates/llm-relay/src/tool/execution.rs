//! Runs one batch of validated tool calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::debug;

use super::{ToolContext, ToolError, ToolHandler, ToolOutput};
use crate::chat::{ChatMessage, ToolCall};
use crate::error::LlmError;
use crate::session::SessionEvent;

/// A call that passed validation and approval.
pub(crate) struct ReadyCall<Ctx> {
    /// Position in the model's response.
    pub(crate) index: usize,
    pub(crate) call: ToolCall,
    pub(crate) handler: Arc<dyn ToolHandler<Ctx>>,
}

/// What a batch produced.
pub(crate) struct BatchResult {
    /// Result messages keyed by response position, in completion order.
    pub(crate) messages: Vec<(usize, ChatMessage)>,
    /// Handlers that ran to completion, successfully or not.
    pub(crate) executed: u32,
    /// Set when a handler halted the loop.
    pub(crate) halt: Option<String>,
    pub(crate) events: Vec<SessionEvent>,
}

const SKIPPED: &str = "Skipped: another tool call ended the turn.";

/// Executes `calls` concurrently or one by one.
///
/// Stops at the first halting output: calls still in flight are dropped
/// and every call without a result gets a skipped marker. A fatal
/// [`ToolError`] fails the batch.
pub(crate) async fn execute_batch<Ctx>(
    calls: &[ReadyCall<Ctx>],
    state: &Ctx,
    iteration: u32,
    parallel: bool,
) -> Result<BatchResult, LlmError>
where
    Ctx: Send + Sync + 'static,
{
    let mut events: Vec<SessionEvent> = calls
        .iter()
        .map(|r| SessionEvent::ToolExecutionStart {
            call_id: r.call.id.clone(),
            tool_name: r.call.name.clone(),
        })
        .collect();

    let futures = calls.iter().map(|r| execute_one(r, state, iteration));
    let mut results = if parallel {
        futures::stream::iter(futures)
            .buffer_unordered(calls.len().max(1))
            .boxed()
    } else {
        futures::stream::iter(futures).then(|f| f).boxed()
    };

    let mut messages = Vec::with_capacity(calls.len());
    let mut executed = 0;
    let mut halt = None;

    while let Some((ready, result, elapsed)) = results.next().await {
        executed += 1;
        let call = &ready.call;
        let message = match result {
            Ok(ToolOutput {
                content,
                halt: halting,
            }) => {
                if halting {
                    halt = Some(content.clone());
                }
                ChatMessage::tool_result(&call.id, content)
            }
            Err(err) if err.fatal => {
                return Err(LlmError::ToolExecution {
                    tool_name: call.name.clone(),
                    source: Box::new(err),
                });
            }
            Err(err) => ChatMessage::tool_error(&call.id, err.message),
        }
        .with_name(&call.name);

        debug!(
            tool = %call.name,
            call_id = %call.id,
            is_error = message.is_error,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "tool executed"
        );
        events.push(SessionEvent::ToolExecutionEnd {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            is_error: message.is_error,
            elapsed,
        });
        messages.push((ready.index, message));

        if halt.is_some() {
            break;
        }
    }
    drop(results);

    if halt.is_some() {
        for ready in calls {
            if !messages.iter().any(|(i, _)| *i == ready.index) {
                messages.push((
                    ready.index,
                    ChatMessage::tool_error(&ready.call.id, SKIPPED).with_name(&ready.call.name),
                ));
            }
        }
    }

    Ok(BatchResult {
        messages,
        executed,
        halt,
        events,
    })
}

async fn execute_one<'a, Ctx>(
    ready: &'a ReadyCall<Ctx>,
    state: &'a Ctx,
    iteration: u32,
) -> (&'a ReadyCall<Ctx>, Result<ToolOutput, ToolError>, Duration)
where
    Ctx: Send + Sync + 'static,
{
    let start = Instant::now();
    let ctx = ToolContext {
        state,
        iteration,
        call_id: &ready.call.id,
    };
    let result = ready
        .handler
        .execute(ready.call.arguments.clone(), ctx)
        .await;
    (ready, result, start.elapsed())
}
