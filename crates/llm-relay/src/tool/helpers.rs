//! Closure-to-handler constructors.

use std::future::Future;
use std::marker::PhantomData;

use serde_json::Value;

use super::handler::{FnToolHandler, NoCtxToolHandler};
use super::{ToolContext, ToolError, ToolOutput};
use crate::provider::ToolDefinition;

/// Wraps an async closure that only needs the arguments.
///
/// ```rust
/// use llm_relay::tool::{tool_fn, ToolError, ToolRegistry};
/// use llm_relay::ToolDefinition;
/// use serde_json::{json, Value};
///
/// let mut tools: ToolRegistry = ToolRegistry::new();
/// tools.register(tool_fn(
///     ToolDefinition::new("echo", "Echo the input", json!({"type": "object"})),
///     |input: Value| async move { Ok::<_, ToolError>(input.to_string()) },
/// ));
/// assert!(tools.contains("echo"));
/// ```
pub fn tool_fn<F, Fut, O>(definition: ToolDefinition, handler: F) -> NoCtxToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    NoCtxToolHandler {
        definition,
        handler,
    }
}

/// Wraps an async closure that also receives the [`ToolContext`].
///
/// The returned future must be `'static`: copy what you need out of the
/// context before the `async` block.
///
/// ```rust
/// use llm_relay::tool::{tool_fn_with_ctx, ToolContext, ToolOutput, ToolRegistry};
/// use llm_relay::ToolDefinition;
/// use serde_json::{json, Value};
///
/// struct Shop {
///     currency: String,
/// }
///
/// let checkout = tool_fn_with_ctx(
///     ToolDefinition::new("checkout", "Place the order", json!({"type": "object"})),
///     |_input: Value, ctx: ToolContext<'_, Shop>| {
///         let done = ctx.halt(format!("Order placed, charged in {}.", ctx.state.currency));
///         async move { Ok::<_, llm_relay::tool::ToolError>(done) }
///     },
/// );
///
/// let mut tools: ToolRegistry<Shop> = ToolRegistry::new();
/// tools.register(checkout);
/// ```
pub fn tool_fn_with_ctx<Ctx, F, Fut, O>(
    definition: ToolDefinition,
    handler: F,
) -> FnToolHandler<Ctx, F>
where
    Ctx: Send + Sync + 'static,
    F: for<'c> Fn(Value, ToolContext<'c, Ctx>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    FnToolHandler {
        definition,
        handler,
        _ctx: PhantomData,
    }
}
