//! The entry point binding a registry to a configuration.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::error::LlmError;
use crate::media::{
    Embedding, EmbeddingRequest, GeneratedImage, ImageRequest, ModelInfo, Moderation,
    ModerationRequest, Transcription, TranscriptionRequest,
};
use crate::provider::{Capability, DynProvider};
use crate::registry::ProviderRegistry;
use crate::retry::with_deadline;
use crate::session::ChatSession;

/// Resolves the configured provider and dispatches operations to it.
///
/// Non-chat operations check the provider's declared capabilities first
/// and fail with [`LlmError::Unsupported`] without contacting it. Every
/// upstream call runs under the configured retry policy and deadline.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use llm_relay::{Client, ClientConfig, ProviderRegistry};
///
/// # async fn run(registry: Arc<ProviderRegistry>) -> Result<(), llm_relay::LlmError> {
/// let client = Client::new(registry, ClientConfig::builder("openai").build()?);
/// let mut chat = client.chat()?;
/// let answer = chat.ask("What is the capital of France?").await?;
/// println!("{}", answer.text());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    registry: Arc<ProviderRegistry>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// A client for `config.provider()` in `registry`.
    pub fn new(registry: Arc<ProviderRegistry>, config: ClientConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    /// The client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The registry providers are resolved from.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Resolves the configured provider, building it on first use.
    ///
    /// # Errors
    ///
    /// [`LlmError::Configuration`] for an unregistered provider or a
    /// factory failure such as a missing credential.
    pub fn provider(&self) -> Result<Arc<dyn DynProvider>, LlmError> {
        self.registry.resolve(self.config.provider())
    }

    /// Opens a conversation.
    ///
    /// # Errors
    ///
    /// See [`provider`](Self::provider).
    pub fn chat(&self) -> Result<ChatSession, LlmError> {
        self.chat_with_context(())
    }

    /// Opens a conversation whose tools receive `state`.
    ///
    /// # Errors
    ///
    /// See [`provider`](Self::provider).
    pub fn chat_with_context<Ctx: Send + Sync + 'static>(
        &self,
        state: Ctx,
    ) -> Result<ChatSession<Ctx>, LlmError> {
        let provider = self.provider()?;
        Ok(ChatSession::with_context(
            provider,
            ClientConfig::clone(&self.config),
            state,
        ))
    }

    fn provider_for(&self, capability: Capability) -> Result<(Arc<dyn DynProvider>, String), LlmError> {
        let provider = self.provider()?;
        let meta = provider.metadata();
        if !meta.supports(capability) {
            debug!(provider = %meta.name, %capability, "capability not declared");
            return Err(LlmError::unsupported(meta.name, capability));
        }
        Ok((provider, meta.name.into_owned()))
    }

    /// Computes embeddings.
    ///
    /// # Errors
    ///
    /// [`LlmError::Unsupported`] if the provider has no embeddings; upstream
    /// failures wrapped in [`LlmError::Operation`].
    #[instrument(skip_all, fields(provider = %self.config.provider()))]
    pub async fn embed(&self, request: &EmbeddingRequest) -> Result<Embedding, LlmError> {
        let (provider, name) = self.provider_for(Capability::Embeddings)?;
        let timeout = self.config.request_timeout();
        self.config
            .retry()
            .run(|| with_deadline(timeout, provider.embed_boxed(request)))
            .await
            .map_err(|e| e.in_operation(&name, Capability::Embeddings))
    }

    /// Classifies content against the provider's safety policy.
    ///
    /// # Errors
    ///
    /// [`LlmError::Unsupported`] if the provider has no moderation; upstream
    /// failures wrapped in [`LlmError::Operation`].
    #[instrument(skip_all, fields(provider = %self.config.provider()))]
    pub async fn moderate(&self, request: &ModerationRequest) -> Result<Moderation, LlmError> {
        let (provider, name) = self.provider_for(Capability::Moderation)?;
        let timeout = self.config.request_timeout();
        self.config
            .retry()
            .run(|| with_deadline(timeout, provider.moderate_boxed(request)))
            .await
            .map_err(|e| e.in_operation(&name, Capability::Moderation))
    }

    /// Generates images from a prompt.
    ///
    /// # Errors
    ///
    /// [`LlmError::Unsupported`] if the provider has no image generation;
    /// upstream failures wrapped in [`LlmError::Operation`].
    #[instrument(skip_all, fields(provider = %self.config.provider()))]
    pub async fn paint(&self, request: &ImageRequest) -> Result<Vec<GeneratedImage>, LlmError> {
        let (provider, name) = self.provider_for(Capability::ImageGeneration)?;
        let timeout = self.config.request_timeout();
        self.config
            .retry()
            .run(|| with_deadline(timeout, provider.paint_boxed(request)))
            .await
            .map_err(|e| e.in_operation(&name, Capability::ImageGeneration))
    }

    /// Transcribes audio to text.
    ///
    /// # Errors
    ///
    /// [`LlmError::Unsupported`] if the provider has no transcription;
    /// upstream failures wrapped in [`LlmError::Operation`].
    #[instrument(skip_all, fields(provider = %self.config.provider()))]
    pub async fn transcribe(&self, request: &TranscriptionRequest) -> Result<Transcription, LlmError> {
        let (provider, name) = self.provider_for(Capability::Transcription)?;
        let timeout = self.config.request_timeout();
        self.config
            .retry()
            .run(|| with_deadline(timeout, provider.transcribe_boxed(request)))
            .await
            .map_err(|e| e.in_operation(&name, Capability::Transcription))
    }

    /// Lists the models the provider offers.
    ///
    /// # Errors
    ///
    /// [`LlmError::Unsupported`] if the provider can't list models; upstream
    /// failures wrapped in [`LlmError::Operation`].
    #[instrument(skip_all, fields(provider = %self.config.provider()))]
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let (provider, name) = self.provider_for(Capability::ModelListing)?;
        let timeout = self.config.request_timeout();
        self.config
            .retry()
            .run(|| with_deadline(timeout, provider.list_models_boxed()))
            .await
            .map_err(|e| e.in_operation(&name, Capability::ModelListing))
    }
}
