//! Client configuration and per-call options.
//!
//! [`ClientConfig`] is immutable once built. Construct it with
//! [`ClientConfig::builder`], or deserialize it from a config file; both
//! paths run the same validation.
//!
//! ```rust
//! use std::time::Duration;
//! use llm_relay::config::{ClientConfig, ToolExecutionMode};
//!
//! let config = ClientConfig::builder("openai")
//!     .model("gpt-4o-mini")
//!     .request_timeout(Duration::from_secs(30))
//!     .max_retries(2)
//!     .max_tool_calls(8)
//!     .tool_mode(ToolExecutionMode::Confirm)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.retry().max_attempts, 3);
//! assert_eq!(config.max_tool_calls(), 8);
//!
//! let from_file: ClientConfig = serde_json::from_str(r#"{
//!     "provider": "anthropic",
//!     "request_timeout": 20000,
//!     "max_retries": 4
//! }"#).unwrap();
//! assert_eq!(from_file.request_timeout(), Some(Duration::from_secs(20)));
//! assert_eq!(from_file.max_tool_calls(), 5);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat::ToolCall;
use crate::error::LlmError;
use crate::provider::ToolChoice;
use crate::retry::RetryPolicy;
use crate::tool::{ToolApproval, ToolApprovalFn};

/// Default tool-execution budget per turn.
pub const DEFAULT_MAX_TOOL_CALLS: u32 = 5;

/// Serializes a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Serializes an optional [`Duration`] as whole milliseconds.
pub(crate) mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // signature fixed by serde's `with`
    pub(crate) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// How the agent loop treats tool calls requested by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionMode {
    /// Execute every requested tool immediately.
    #[default]
    Auto,
    /// Suspend and require an approval decision per call before executing.
    Confirm,
    /// Validate arguments and record the call without invoking the handler.
    DryRun,
}

/// Immutable engine configuration.
///
/// Every limit here bounds what a single turn may cost: request deadline,
/// retry budget, tool budget, output tokens.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "ClientConfigBuilder")]
pub struct ClientConfig {
    provider: String,
    model: Option<String>,
    #[serde(with = "option_duration_ms")]
    request_timeout: Option<Duration>,
    retry: RetryPolicy,
    max_tool_calls: u32,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    system: Option<String>,
    tool_mode: ToolExecutionMode,
    parallel_tool_execution: bool,
    #[serde(skip)]
    approval: Option<ToolApprovalFn>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .field("max_tool_calls", &self.max_tool_calls)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("has_system", &self.system.is_some())
            .field("tool_mode", &self.tool_mode)
            .field("parallel_tool_execution", &self.parallel_tool_execution)
            .field("has_approval", &self.approval.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Starts a builder for the provider registered as `provider`.
    pub fn builder(provider: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            provider: provider.into(),
            ..ClientConfigBuilder::default()
        }
    }

    /// Returns a builder pre-filled with this config, for deriving a variant.
    pub fn to_builder(&self) -> ClientConfigBuilder {
        ClientConfigBuilder {
            provider: self.provider.clone(),
            model: self.model.clone(),
            request_timeout: self.request_timeout,
            retry: self.retry.clone(),
            max_retries: None,
            max_tool_calls: self.max_tool_calls,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: self.system.clone(),
            tool_mode: self.tool_mode,
            parallel_tool_execution: self.parallel_tool_execution,
            approval: self.approval.clone(),
        }
    }

    /// Registry name of the provider.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Model override, if any.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Deadline for each upstream call attempt.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Retry policy for upstream calls.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Tool executions allowed per turn.
    pub fn max_tool_calls(&self) -> u32 {
        self.max_tool_calls
    }

    /// Default output-token cap.
    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    /// Default sampling temperature.
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// System prompt sent with every request.
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// How tool calls are handled.
    pub fn tool_mode(&self) -> ToolExecutionMode {
        self.tool_mode
    }

    /// Whether a batch of tool calls runs concurrently.
    pub fn parallel_tool_execution(&self) -> bool {
        self.parallel_tool_execution
    }

    /// Decides a tool call in [`Confirm`](ToolExecutionMode::Confirm) mode
    /// for non-interactive turns. `None` if no callback is configured.
    pub fn approve(&self, call: &ToolCall) -> Option<ToolApproval> {
        self.approval.as_ref().map(|f| f(call))
    }

    /// `true` if an approval callback is configured.
    pub fn has_approval(&self) -> bool {
        self.approval.is_some()
    }
}

/// Builder for [`ClientConfig`]. Also the deserialization shape.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfigBuilder {
    provider: String,
    model: Option<String>,
    #[serde(with = "option_duration_ms")]
    request_timeout: Option<Duration>,
    retry: RetryPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_retries: Option<u32>,
    max_tool_calls: u32,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    system: Option<String>,
    tool_mode: ToolExecutionMode,
    parallel_tool_execution: bool,
    #[serde(skip)]
    approval: Option<ToolApprovalFn>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: None,
            request_timeout: Some(Duration::from_secs(60)),
            retry: RetryPolicy::default(),
            max_retries: None,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            max_tokens: None,
            temperature: None,
            system: None,
            tool_mode: ToolExecutionMode::Auto,
            parallel_tool_execution: true,
            approval: None,
        }
    }
}

impl ClientConfigBuilder {
    /// Sets the model override.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Removes the per-attempt deadline.
    #[must_use]
    pub fn no_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self.max_retries = None;
        self
    }

    /// Sets how many retries follow a transient failure, keeping the backoff settings.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the tool-execution budget per turn.
    #[must_use]
    pub fn max_tool_calls(mut self, limit: u32) -> Self {
        self.max_tool_calls = limit;
        self
    }

    /// Sets the default output-token cap.
    #[must_use]
    pub fn max_tokens(mut self, limit: u32) -> Self {
        self.max_tokens = Some(limit);
        self
    }

    /// Sets the default sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system = Some(prompt.into());
        self
    }

    /// Sets the tool execution mode.
    #[must_use]
    pub fn tool_mode(mut self, mode: ToolExecutionMode) -> Self {
        self.tool_mode = mode;
        self
    }

    /// Runs a batch of tool calls concurrently (default) or one by one.
    #[must_use]
    pub fn parallel_tool_execution(mut self, parallel: bool) -> Self {
        self.parallel_tool_execution = parallel;
        self
    }

    /// Installs the callback that decides tool calls in confirm mode
    /// when a turn is driven non-interactively.
    #[must_use]
    pub fn approve_with(
        mut self,
        f: impl Fn(&ToolCall) -> ToolApproval + Send + Sync + 'static,
    ) -> Self {
        self.approval = Some(std::sync::Arc::new(f));
        self
    }

    /// Validates and freezes the configuration.
    ///
    /// # Errors
    ///
    /// [`LlmError::Configuration`] for an empty provider name, a zero
    /// timeout, a non-finite or negative temperature, or an out-of-range
    /// retry policy.
    pub fn build(self) -> Result<ClientConfig, LlmError> {
        if self.provider.trim().is_empty() {
            return Err(LlmError::Configuration("provider must be set".into()));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(LlmError::Configuration(
                "request_timeout must be greater than zero".into(),
            ));
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() || t < 0.0 {
                return Err(LlmError::Configuration(format!(
                    "temperature must be a non-negative number, got {t}"
                )));
            }
        }
        let mut retry = self.retry;
        if let Some(retries) = self.max_retries {
            retry.max_attempts = retries.saturating_add(1);
        }
        if retry.max_attempts == 0 {
            return Err(LlmError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(LlmError::Configuration(format!(
                "retry.jitter must be within [0, 1], got {}",
                retry.jitter
            )));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(LlmError::Configuration(format!(
                "retry.multiplier must be at least 1.0, got {}",
                retry.multiplier
            )));
        }

        Ok(ClientConfig {
            provider: self.provider.to_lowercase(),
            model: self.model,
            request_timeout: self.request_timeout,
            retry,
            max_tool_calls: self.max_tool_calls,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: self.system,
            tool_mode: self.tool_mode,
            parallel_tool_execution: self.parallel_tool_execution,
            approval: self.approval,
        })
    }
}

impl TryFrom<ClientConfigBuilder> for ClientConfig {
    type Error = LlmError;

    fn try_from(builder: ClientConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

/// Overrides applied to a single `ask`/`stream` call.
///
/// Unset fields fall back to the session's [`ClientConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    /// Model override for this call.
    pub model: Option<String>,
    /// Temperature override.
    pub temperature: Option<f32>,
    /// Output-token cap override.
    pub max_tokens: Option<u32>,
    /// Tool choice for this call.
    pub tool_choice: Option<ToolChoice>,
    /// Per-attempt deadline override.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Overrides the temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Overrides the output-token cap.
    #[must_use]
    pub fn max_tokens(mut self, limit: u32) -> Self {
        self.max_tokens = Some(limit);
        self
    }

    /// Sets the tool choice.
    #[must_use]
    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Overrides the per-attempt deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
