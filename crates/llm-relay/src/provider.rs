//! Provider trait, capability set, and request types.
//!
//! This module defines two core abstractions:
//!
//! - **[`Provider`]**: the trait every backend implements. It uses Rust
//!   2024's native async-fn-in-traits, so implementations are plain
//!   `async fn`s. Only [`chat`](Provider::chat) and
//!   [`metadata`](Provider::metadata) are required; every other
//!   capability has a default that fails with
//!   [`LlmError::Unsupported`].
//!
//! - **[`DynProvider`]**: an object-safe mirror of `Provider` that uses
//!   boxed futures. A blanket `impl<T: Provider> DynProvider for T`
//!   bridges the two, so the registry can hold `Arc<dyn DynProvider>`.
//!
//! # Capability set
//!
//! A provider declares what it implements in
//! [`ProviderMetadata::capabilities`]. The [`Client`](crate::Client)
//! checks that set before dispatching, and the trait defaults back it up
//! for providers called directly:
//!
//! ```rust
//! use llm_relay::provider::{Capability, Provider, ProviderMetadata};
//! use llm_relay::{ChatParams, ChatResponse, LlmError};
//!
//! struct Echo;
//!
//! impl Provider for Echo {
//!     async fn chat(&self, params: &ChatParams) -> Result<ChatResponse, LlmError> {
//!         unimplemented!()
//!     }
//!
//!     fn metadata(&self) -> ProviderMetadata {
//!         ProviderMetadata::new("Echo", "echo-1", [Capability::Chat])
//!     }
//! }
//!
//! # tokio_test_block_on(async {
//! let err = Echo.embed(&Default::default()).await.unwrap_err();
//! assert_eq!(err.to_string(), "Echo doesn't support embeddings");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::{Future, ready};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ChatMessage, ChatResponse};
use crate::error::LlmError;
use crate::media::{
    Embedding, EmbeddingRequest, GeneratedImage, ImageRequest, ModelInfo, Moderation,
    ModerationRequest, Transcription, TranscriptionRequest,
};
use crate::stream::ChatStream;

/// Boxed, `Send` future returned by [`DynProvider`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

/// The trait every LLM backend implements.
///
/// Retries, timeouts and middleware are applied by the engine around
/// these calls, so implementations only map requests to the wire and
/// back. Map HTTP failures with [`LlmError::from_status`] so the retry
/// policy can classify them.
///
/// `Provider` is **not** object-safe; use [`DynProvider`] for dynamic
/// dispatch.
pub trait Provider: Send + Sync {
    /// Sends a chat request and returns the full response.
    fn chat(
        &self,
        params: &ChatParams,
    ) -> impl Future<Output = Result<ChatResponse, LlmError>> + Send;

    /// Opens a streamed chat response.
    fn stream(
        &self,
        _params: &ChatParams,
    ) -> impl Future<Output = Result<ChatStream, LlmError>> + Send {
        ready(Err(self.unsupported(Capability::Streaming)))
    }

    /// Embeds a batch of texts.
    fn embed(
        &self,
        _request: &EmbeddingRequest,
    ) -> impl Future<Output = Result<Embedding, LlmError>> + Send {
        ready(Err(self.unsupported(Capability::Embeddings)))
    }

    /// Classifies text against the provider's content policy.
    fn moderate(
        &self,
        _request: &ModerationRequest,
    ) -> impl Future<Output = Result<Moderation, LlmError>> + Send {
        ready(Err(self.unsupported(Capability::Moderation)))
    }

    /// Generates images from a prompt.
    fn paint(
        &self,
        _request: &ImageRequest,
    ) -> impl Future<Output = Result<Vec<GeneratedImage>, LlmError>> + Send {
        ready(Err(self.unsupported(Capability::ImageGeneration)))
    }

    /// Converts speech to text.
    fn transcribe(
        &self,
        _request: &TranscriptionRequest,
    ) -> impl Future<Output = Result<Transcription, LlmError>> + Send {
        ready(Err(self.unsupported(Capability::Transcription)))
    }

    /// Lists the models this provider serves.
    fn list_models(&self) -> impl Future<Output = Result<Vec<ModelInfo>, LlmError>> + Send {
        ready(Err(self.unsupported(Capability::ModelListing)))
    }

    /// Returns static metadata describing this provider instance.
    fn metadata(&self) -> ProviderMetadata;

    /// Builds the error for a capability this provider lacks.
    fn unsupported(&self, capability: Capability) -> LlmError {
        LlmError::unsupported(Provider::metadata(self).name, capability)
    }
}

/// Object-safe counterpart of [`Provider`].
///
/// Implemented for every `Provider` by a blanket impl.
pub trait DynProvider: Send + Sync {
    /// Boxed-future version of [`Provider::chat`].
    fn chat_boxed<'a>(&'a self, params: &'a ChatParams) -> BoxFuture<'a, ChatResponse>;

    /// Boxed-future version of [`Provider::stream`].
    fn stream_boxed<'a>(&'a self, params: &'a ChatParams) -> BoxFuture<'a, ChatStream>;

    /// Boxed-future version of [`Provider::embed`].
    fn embed_boxed<'a>(&'a self, request: &'a EmbeddingRequest) -> BoxFuture<'a, Embedding>;

    /// Boxed-future version of [`Provider::moderate`].
    fn moderate_boxed<'a>(&'a self, request: &'a ModerationRequest) -> BoxFuture<'a, Moderation>;

    /// Boxed-future version of [`Provider::paint`].
    fn paint_boxed<'a>(&'a self, request: &'a ImageRequest) -> BoxFuture<'a, Vec<GeneratedImage>>;

    /// Boxed-future version of [`Provider::transcribe`].
    fn transcribe_boxed<'a>(
        &'a self,
        request: &'a TranscriptionRequest,
    ) -> BoxFuture<'a, Transcription>;

    /// Boxed-future version of [`Provider::list_models`].
    fn list_models_boxed(&self) -> BoxFuture<'_, Vec<ModelInfo>>;

    /// Returns static metadata describing this provider instance.
    fn metadata(&self) -> ProviderMetadata;
}

impl<T: Provider> DynProvider for T {
    fn chat_boxed<'a>(&'a self, params: &'a ChatParams) -> BoxFuture<'a, ChatResponse> {
        Box::pin(self.chat(params))
    }

    fn stream_boxed<'a>(&'a self, params: &'a ChatParams) -> BoxFuture<'a, ChatStream> {
        Box::pin(self.stream(params))
    }

    fn embed_boxed<'a>(&'a self, request: &'a EmbeddingRequest) -> BoxFuture<'a, Embedding> {
        Box::pin(self.embed(request))
    }

    fn moderate_boxed<'a>(&'a self, request: &'a ModerationRequest) -> BoxFuture<'a, Moderation> {
        Box::pin(self.moderate(request))
    }

    fn paint_boxed<'a>(&'a self, request: &'a ImageRequest) -> BoxFuture<'a, Vec<GeneratedImage>> {
        Box::pin(self.paint(request))
    }

    fn transcribe_boxed<'a>(
        &'a self,
        request: &'a TranscriptionRequest,
    ) -> BoxFuture<'a, Transcription> {
        Box::pin(self.transcribe(request))
    }

    fn list_models_boxed(&self) -> BoxFuture<'_, Vec<ModelInfo>> {
        Box::pin(self.list_models())
    }

    fn metadata(&self) -> ProviderMetadata {
        Provider::metadata(self)
    }
}

/// Describes a provider instance: its name, default model, and
/// capability set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Display name used in error messages (e.g. `"OpenAI"`).
    pub name: Cow<'static, str>,
    /// The default model identifier.
    pub model: String,
    /// Context window of the default model in tokens, 0 if unknown.
    pub context_window: u64,
    /// The operations this provider implements.
    pub capabilities: HashSet<Capability>,
}

impl ProviderMetadata {
    /// Metadata with an unknown context window.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        model: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            context_window: 0,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// `true` if `capability` is in the declared set.
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// An operation or feature a provider may implement.
///
/// The [`Display`](fmt::Display) form is the noun used in
/// [`LlmError::Unsupported`] messages, e.g. `embeddings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Capability {
    /// Non-streamed chat completion.
    Chat,
    /// Streamed chat completion.
    Streaming,
    /// Function/tool calling.
    Tools,
    /// Text embeddings.
    Embeddings,
    /// Content moderation.
    Moderation,
    /// Image generation.
    ImageGeneration,
    /// Speech-to-text.
    Transcription,
    /// Enumerating available models.
    ModelListing,
    /// Image understanding in chat.
    Vision,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Chat => "chat",
            Self::Streaming => "streaming",
            Self::Tools => "tool calling",
            Self::Embeddings => "embeddings",
            Self::Moderation => "moderation",
            Self::ImageGeneration => "image generation",
            Self::Transcription => "transcription",
            Self::ModelListing => "model listing",
            Self::Vision => "vision",
        })
    }
}

/// Parameters for one chat request.
///
/// ```rust
/// use llm_relay::{ChatMessage, ChatParams};
///
/// let params = ChatParams {
///     messages: vec![ChatMessage::user("Hello")],
///     max_tokens: Some(256),
///     ..Default::default()
/// };
/// ```
///
/// [`timeout`](Self::timeout) is a transport concern and is skipped
/// during serialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatParams {
    /// The conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Model override; the provider's default when `None`.
    pub model: Option<String>,
    /// Tools the model may invoke.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Whether and how the model uses tools.
    pub tool_choice: Option<ToolChoice>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// System prompt, for providers that take it outside the message list.
    pub system: Option<String>,
    /// Per-request deadline. Skipped during serialization.
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// Provider-specific key-value pairs without a dedicated field.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Controls whether the model should use tools and, if so, which ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ToolChoice {
    /// The model decides.
    Auto,
    /// The model must not call tools.
    None,
    /// The model must call at least one tool.
    Required,
    /// The model must call this tool.
    Specific(String),
}

/// A tool the model can invoke, as advertised to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Matched against [`ToolCall::name`](crate::ToolCall::name).
    pub name: String,
    /// Shown to the model so it knows when to use the tool.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: JsonSchema,
}

impl ToolDefinition {
    /// A definition from its parts.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: JsonSchema::new(parameters),
        }
    }
}

/// A JSON Schema document, validated with the [`jsonschema`] crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema(Value);

impl JsonSchema {
    /// Wraps a raw JSON value.
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Derives a schema from a type implementing [`schemars::JsonSchema`].
    ///
    /// Requires the `schema` feature (enabled by default).
    #[cfg(feature = "schema")]
    pub fn from_type<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = schemars::schema_for!(T);
        Ok(Self(serde_json::to_value(schema)?))
    }

    /// Validates `value` against this schema.
    ///
    /// Returns [`LlmError::SchemaValidation`] listing every violation, or
    /// [`LlmError::InvalidRequest`] if the schema itself is malformed.
    pub fn validate(&self, value: &Value) -> Result<(), LlmError> {
        let validator = jsonschema::validator_for(&self.0)
            .map_err(|e| LlmError::InvalidRequest(format!("invalid JSON schema: {e}")))?;
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::SchemaValidation {
                message: errors.join("; "),
                schema: self.0.clone(),
                actual: value.clone(),
            })
        }
    }
}
