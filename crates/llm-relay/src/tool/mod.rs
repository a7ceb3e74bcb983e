//! Tool calling: handlers, the tool registry and the agent loop.
//!
//! ```text
//!   ToolHandler      one tool: definition + async execute
//!       │
//!   ToolRegistry     handlers by name, argument validation
//!       │
//!   loop_core        model call → validate → approve → execute → repeat
//!       │
//!   ChatSession      ask / stream / turn drive the loop
//! ```
//!
//! # Loop rules
//!
//! - Every tool call the model requests is validated against the tool's
//!   JSON schema first. A call that fails validation, or names an unknown
//!   tool, is answered with an error `tool` message so the model can try
//!   again. It does not count against the budget. If the same call id
//!   fails validation again in the next iteration, the turn fails.
//! - `max_tool_calls` bounds executions per turn. A batch that would go
//!   over it fails the turn with [`LlmError::ToolLimitExceeded`] before
//!   anything in it runs.
//! - Calls in one batch run concurrently unless the config turns
//!   parallel execution off. All of them finish before the next model
//!   call.
//! - A handler returning [`ToolOutput::halt`] ends the turn with that
//!   text as the final answer. Calls still running are dropped and get a
//!   "skipped" result.
//! - Handlers are never retried.
//! - Failures that end the turn are wrapped in [`LlmError::Operation`]
//!   naming the provider and tool calling.
//!
//! # Example
//!
//! ```rust
//! use llm_relay::tool::{tool_fn, ToolError, ToolRegistry};
//! use llm_relay::ToolDefinition;
//! use serde_json::{json, Value};
//!
//! let mut tools: ToolRegistry = ToolRegistry::new();
//! tools.register(tool_fn(
//!     ToolDefinition::new(
//!         "add",
//!         "Add two numbers",
//!         json!({
//!             "type": "object",
//!             "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
//!             "required": ["a", "b"]
//!         }),
//!     ),
//!     |input: Value| async move {
//!         let a = input["a"].as_f64().unwrap_or(0.0);
//!         let b = input["b"].as_f64().unwrap_or(0.0);
//!         Ok::<_, ToolError>(format!("{}", a + b))
//!     },
//! ));
//! assert_eq!(tools.definitions()[0].name, "add");
//! ```
//!
//! [`LlmError::ToolLimitExceeded`]: crate::LlmError::ToolLimitExceeded
//! [`LlmError::Operation`]: crate::LlmError::Operation

mod approval;
mod error;
mod execution;
mod handler;
mod helpers;
pub(crate) mod loop_core;
mod output;
mod registry;

pub use approval::{ToolApproval, ToolApprovalFn};
pub use error::ToolError;
pub use handler::{FnToolHandler, NoCtxToolHandler, ToolContext, ToolFuture, ToolHandler};
pub use helpers::{tool_fn, tool_fn_with_ctx};
pub use output::ToolOutput;
pub use registry::ToolRegistry;

#[cfg(test)]
mod tests;
