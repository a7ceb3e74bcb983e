//! Ordered hooks around every provider call.
//!
//! A [`Middleware`] implements any subset of the hooks; the rest default
//! to no-ops. For each hook the [`MiddlewareStack`] calls every middleware
//! in registration order, even after one of them has returned a
//! [`Directive`]. The first directive wins and is handed back to the
//! engine. An `Err` from any hook aborts the call immediately.
//!
//! Directives are acted on at two points:
//!
//! - `before_request`: replace the outgoing request, answer without
//!   calling the provider, or halt the turn.
//! - `after_response`: replace the response or halt the turn.
//!
//! Directives returned from observation hooks are logged and dropped.
//!
//! ```rust
//! use llm_relay::middleware::{Directive, Middleware, MiddlewareStack};
//! use llm_relay::{ChatParams, LlmError};
//!
//! struct Budget {
//!     max_messages: usize,
//! }
//!
//! impl Middleware for Budget {
//!     fn name(&self) -> &str {
//!         "budget"
//!     }
//!
//!     fn before_request(&self, params: &ChatParams) -> Result<Option<Directive>, LlmError> {
//!         if params.messages.len() > self.max_messages {
//!             return Ok(Some(Directive::Halt("conversation too long".into())));
//!         }
//!         Ok(None)
//!     }
//! }
//!
//! let stack = MiddlewareStack::new().with(Budget { max_messages: 50 });
//! assert_eq!(stack.len(), 1);
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::chat::{ChatMessage, ChatResponse, ToolCall};
use crate::error::LlmError;
use crate::provider::ChatParams;
use crate::usage::Usage;

/// Instruction returned by a hook that changes what the engine does next.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Send this request instead of the one built by the engine.
    ReplaceRequest(Box<ChatParams>),
    /// Use this response. Before the request it skips the provider call.
    Respond(Box<ChatResponse>),
    /// End the turn with this text as the final assistant message.
    Halt(String),
}

/// What happened during one model call.
///
/// Passed to [`Middleware::after_turn`], the seam for persistence and
/// monitoring adapters.
#[derive(Debug, Clone)]
pub struct TurnSnapshot {
    /// Loop iteration the call belongs to (1-based).
    pub iteration: u32,
    /// The request as sent.
    pub request: ChatParams,
    /// The response as accepted.
    pub response: ChatResponse,
    /// Usage reported for this call.
    pub usage: Usage,
    /// Wall time spent on the call, retries included.
    pub elapsed: Duration,
}

/// A set of hooks run around provider calls.
///
/// Hooks are synchronous; hand long work off to a task.
pub trait Middleware: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Before each provider call.
    fn before_request(&self, _params: &ChatParams) -> Result<Option<Directive>, LlmError> {
        Ok(None)
    }

    /// When a message enters the turn: the prompt and every tool result.
    fn on_new_message(&self, _message: &ChatMessage) -> Result<Option<Directive>, LlmError> {
        Ok(None)
    }

    /// After each provider call returns a complete response.
    fn after_response(&self, _response: &ChatResponse) -> Result<Option<Directive>, LlmError> {
        Ok(None)
    }

    /// Before a tool call is executed.
    fn on_tool_call(&self, _call: &ToolCall) -> Result<Option<Directive>, LlmError> {
        Ok(None)
    }

    /// After a tool call produced its result message.
    fn on_tool_result(
        &self,
        _call: &ToolCall,
        _result: &ChatMessage,
    ) -> Result<Option<Directive>, LlmError> {
        Ok(None)
    }

    /// After each model call, with timing and usage.
    fn after_turn(&self, _snapshot: &TurnSnapshot) -> Result<Option<Directive>, LlmError> {
        Ok(None)
    }

    /// With the final message of a completed turn.
    fn on_end_message(&self, _message: &ChatMessage) -> Result<Option<Directive>, LlmError> {
        Ok(None)
    }
}

/// Ordered list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.layers.iter().map(|m| m.name()).collect();
        f.debug_struct("MiddlewareStack")
            .field("layers", &names)
            .finish()
    }
}

impl MiddlewareStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware; it runs after those already added.
    #[must_use]
    pub fn with(self, middleware: impl Middleware + 'static) -> Self {
        self.with_shared(Arc::new(middleware))
    }

    /// Appends a shared middleware.
    #[must_use]
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.layers.push(middleware);
        self
    }

    /// Number of middleware.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Invokes `hook` on every middleware in order and returns the first
    /// directive.
    ///
    /// # Errors
    ///
    /// The first hook error, unchanged. Later middleware are not called.
    pub fn run<F>(&self, hook: &str, f: F) -> Result<Option<Directive>, LlmError>
    where
        F: Fn(&dyn Middleware) -> Result<Option<Directive>, LlmError>,
    {
        let mut directive = None;
        for layer in &self.layers {
            if let Some(d) = f(layer.as_ref())? {
                if directive.is_none() {
                    debug!(hook, middleware = layer.name(), "directive returned");
                    directive = Some(d);
                } else {
                    debug!(hook, middleware = layer.name(), "later directive dropped");
                }
            }
        }
        Ok(directive)
    }

    /// Like [`run`](Self::run) for hooks whose directives are not acted on.
    pub(crate) fn notify<F>(&self, hook: &str, f: F) -> Result<(), LlmError>
    where
        F: Fn(&dyn Middleware) -> Result<Option<Directive>, LlmError>,
    {
        if let Some(directive) = self.run(hook, f)? {
            warn!(hook, ?directive, "directive ignored at this hook");
        }
        Ok(())
    }
}
