//! Tool registry: handlers by name, argument validation, dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{ToolContext, ToolError, ToolHandler, ToolOutput};
use crate::chat::ToolCall;
use crate::error::LlmError;
use crate::provider::ToolDefinition;

/// The tools a session offers to the model.
///
/// Cloning is cheap: handlers are shared behind `Arc`.
pub struct ToolRegistry<Ctx = ()>
where
    Ctx: Send + Sync + 'static,
{
    handlers: HashMap<String, Arc<dyn ToolHandler<Ctx>>>,
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> std::fmt::Debug for ToolRegistry<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, replacing any tool with the same name.
    pub fn register(&mut self, handler: impl ToolHandler<Ctx> + 'static) -> &mut Self {
        self.register_shared(Arc::new(handler))
    }

    /// Adds an already shared handler.
    pub fn register_shared(&mut self, handler: Arc<dyn ToolHandler<Ctx>>) -> &mut Self {
        let name = handler.definition().name;
        self.handlers.insert(name, handler);
        self
    }

    /// Looks up a handler.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler<Ctx>>> {
        self.handlers.get(name)
    }

    /// `true` if a tool named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Definitions for every tool, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.handlers.values().map(|h| h.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// A copy without the named tools.
    #[must_use]
    pub fn without<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let exclude: HashSet<&str> = names.into_iter().collect();
        self.filtered(|name| !exclude.contains(name))
    }

    /// A copy with only the named tools.
    #[must_use]
    pub fn only<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let include: HashSet<&str> = names.into_iter().collect();
        self.filtered(|name| include.contains(name))
    }

    fn filtered(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self {
            handlers: self
                .handlers
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, h)| (name.clone(), Arc::clone(h)))
                .collect(),
        }
    }

    /// Resolves the handler for `call` and checks its arguments.
    ///
    /// # Errors
    ///
    /// [`LlmError::InvalidRequest`] for an unknown tool,
    /// [`LlmError::SchemaValidation`] when the arguments don't match.
    pub fn validate(&self, call: &ToolCall) -> Result<Arc<dyn ToolHandler<Ctx>>, LlmError> {
        let handler = self
            .handlers
            .get(&call.name)
            .ok_or_else(|| LlmError::InvalidRequest(format!("unknown tool '{}'", call.name)))?;
        handler.definition().parameters.validate(&call.arguments)?;
        Ok(Arc::clone(handler))
    }

    /// Validates and runs a single call outside the agent loop.
    ///
    /// Validation failures come back as a recoverable [`ToolError`].
    pub async fn execute(
        &self,
        call: &ToolCall,
        state: &Ctx,
        iteration: u32,
    ) -> Result<ToolOutput, ToolError> {
        let handler = self
            .validate(call)
            .map_err(|e| ToolError::new(e.to_string()))?;
        let ctx = ToolContext {
            state,
            iteration,
            call_id: &call.id,
        };
        handler.execute(call.arguments.clone(), ctx).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::tool_fn;

    fn add_tool() -> impl ToolHandler<()> {
        tool_fn(
            ToolDefinition::new(
                "add",
                "Add two numbers",
                json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }),
            ),
            |input: Value| async move {
                let a = input["a"].as_f64().unwrap_or(0.0);
                let b = input["b"].as_f64().unwrap_or(0.0);
                Ok(format!("{}", a + b))
            },
        )
    }

    fn noop(name: &str) -> impl ToolHandler<()> {
        tool_fn(
            ToolDefinition::new(name, "noop", json!({"type": "object"})),
            |_: Value| async move { Ok("ok") },
        )
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_execute_valid_call() {
        let mut tools = ToolRegistry::new();
        tools.register(add_tool());
        let out = tools
            .execute(&call("add", json!({"a": 2, "b": 3})), &(), 1)
            .await
            .unwrap();
        assert_eq!(out.content, "5");
    }

    #[test]
    fn test_validate_unknown_tool() {
        let tools: ToolRegistry = ToolRegistry::new();
        let err = tools.validate(&call("nope", json!({}))).err().unwrap();
        assert!(matches!(err, LlmError::InvalidRequest(ref m) if m.contains("nope")));
    }

    #[test]
    fn test_validate_schema_mismatch() {
        let mut tools = ToolRegistry::new();
        tools.register(add_tool());
        let err = tools
            .validate(&call("add", json!({"a": "two"})))
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::SchemaValidation { .. }));
    }

    #[tokio::test]
    async fn test_execute_reports_validation_as_tool_error() {
        let mut tools = ToolRegistry::new();
        tools.register(add_tool());
        let err = tools
            .execute(&call("add", json!({})), &(), 1)
            .await
            .unwrap_err();
        assert!(!err.fatal);
        assert!(err.message.contains("required"));
    }

    #[test]
    fn test_definitions_sorted() {
        let mut tools = ToolRegistry::new();
        tools.register(noop("zeta")).register(noop("alpha")).register(noop("mid"));
        let names: Vec<_> = tools.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_without_and_only() {
        let mut tools = ToolRegistry::new();
        tools.register(noop("a")).register(noop("b")).register(noop("c"));

        let rest = tools.without(["b"]);
        assert_eq!(rest.len(), 2);
        assert!(!rest.contains("b"));

        let just = tools.only(["a", "missing"]);
        assert_eq!(just.len(), 1);
        assert!(just.contains("a"));
        assert_eq!(tools.len(), 3);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut tools = ToolRegistry::new();
        tools.register(noop("x")).register(noop("x"));
        assert_eq!(tools.len(), 1);
        assert!(!tools.is_empty());
    }
}
