//! Tool handler trait and closure-backed implementations.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde_json::Value;

use super::{ToolError, ToolOutput};
use crate::provider::ToolDefinition;

/// Boxed future returned by [`ToolHandler::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// Per-call context handed to a tool handler.
///
/// Exposes the caller's shared state, the loop iteration the call belongs
/// to (1-based, one per model round trip) and the halt primitive.
#[derive(Debug)]
pub struct ToolContext<'a, Ctx = ()> {
    /// Application state passed to the session.
    pub state: &'a Ctx,
    /// Current loop iteration.
    pub iteration: u32,
    /// Id of the call being executed.
    pub call_id: &'a str,
}

impl<Ctx> Clone for ToolContext<'_, Ctx> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Ctx> Copy for ToolContext<'_, Ctx> {}

impl<Ctx> ToolContext<'_, Ctx> {
    /// Ends the loop with `message` as the final answer.
    ///
    /// Return the value from the handler. Other calls still running in
    /// the same batch are abandoned and no further model call is made.
    pub fn halt(&self, message: impl Into<String>) -> ToolOutput {
        ToolOutput::halt(message)
    }
}

/// A tool the model can invoke.
///
/// Implement this for tools with their own state; wrap plain closures
/// with [`super::tool_fn`] or [`super::tool_fn_with_ctx`]. Arguments are
/// validated against [`definition`](Self::definition)'s schema before
/// `execute` is called.
///
/// ```rust
/// use llm_relay::tool::{ToolContext, ToolFuture, ToolHandler, ToolOutput};
/// use llm_relay::ToolDefinition;
/// use serde_json::{json, Value};
///
/// struct Greeter {
///     greeting: String,
/// }
///
/// impl ToolHandler for Greeter {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition::new(
///             "greet",
///             "Greets someone",
///             json!({"type": "object", "properties": {"name": {"type": "string"}}}),
///         )
///     }
///
///     fn execute<'a>(&'a self, input: Value, _ctx: ToolContext<'a>) -> ToolFuture<'a> {
///         Box::pin(async move {
///             let name = input["name"].as_str().unwrap_or("there");
///             Ok(ToolOutput::new(format!("{}, {name}!", self.greeting)))
///         })
///     }
/// }
/// ```
pub trait ToolHandler<Ctx = ()>: Send + Sync {
    /// Name, description and parameter schema.
    fn definition(&self) -> ToolDefinition;

    /// Runs the tool with validated arguments.
    fn execute<'a>(&'a self, input: Value, ctx: ToolContext<'a, Ctx>) -> ToolFuture<'a>;
}

/// A tool handler backed by an async closure receiving context.
///
/// Created via [`super::tool_fn_with_ctx`].
pub struct FnToolHandler<Ctx, F> {
    pub(crate) definition: ToolDefinition,
    pub(crate) handler: F,
    pub(crate) _ctx: PhantomData<fn(&Ctx)>,
}

impl<Ctx, F> std::fmt::Debug for FnToolHandler<Ctx, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnToolHandler")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<Ctx, F, Fut, O> ToolHandler<Ctx> for FnToolHandler<Ctx, F>
where
    Ctx: Send + Sync + 'static,
    F: for<'c> Fn(Value, ToolContext<'c, Ctx>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn execute<'a>(&'a self, input: Value, ctx: ToolContext<'a, Ctx>) -> ToolFuture<'a> {
        let fut = (self.handler)(input, ctx);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// A context-free tool handler, created by [`super::tool_fn`].
///
/// Usable with any session context type.
pub struct NoCtxToolHandler<F> {
    pub(crate) definition: ToolDefinition,
    pub(crate) handler: F,
}

impl<F> std::fmt::Debug for NoCtxToolHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoCtxToolHandler")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<Ctx, F, Fut, O> ToolHandler<Ctx> for NoCtxToolHandler<F>
where
    Ctx: Send + Sync + 'static,
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn execute<'a>(&'a self, input: Value, _ctx: ToolContext<'a, Ctx>) -> ToolFuture<'a> {
        let fut = (self.handler)(input);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}
