//! Queue-based fake provider for tests.
//!
//! Available under `cfg(test)` and the `test-utils` feature. Queue the
//! results you want, hand a clone to the code under test, then inspect
//! what it sent. Clones share queues and recordings.
//!
//! ```rust
//! use llm_relay::mock::MockProvider;
//! use llm_relay::test_helpers::sample_response;
//! use llm_relay::{ChatParams, Provider};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let mock = MockProvider::named("mock");
//! mock.queue_response(sample_response("Hello!"));
//!
//! let response = mock.chat(&ChatParams::default()).await.unwrap();
//! assert_eq!(response.content, "Hello!");
//! assert_eq!(mock.call_count(), 1);
//! # });
//! ```
//!
//! An empty queue yields a non-retryable [`LlmError::Provider`] with code
//! `mock_exhausted`, so a test that under-provisions fails loudly
//! instead of hanging.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;

use crate::chat::ChatResponse;
use crate::error::LlmError;
use crate::media::{
    Embedding, EmbeddingRequest, GeneratedImage, ImageRequest, ModelInfo, Moderation,
    ModerationRequest, Transcription, TranscriptionRequest,
};
use crate::provider::{Capability, ChatParams, Provider, ProviderMetadata};
use crate::stream::{ChatStream, StreamEvent};

type Queue<T> = Mutex<VecDeque<Result<T, LlmError>>>;

#[derive(Default)]
struct Queues {
    responses: Queue<ChatResponse>,
    streams: Queue<Vec<Result<StreamEvent, LlmError>>>,
    embeddings: Queue<Embedding>,
    moderations: Queue<Moderation>,
    images: Queue<Vec<GeneratedImage>>,
    transcriptions: Queue<Transcription>,
    models: Queue<Vec<ModelInfo>>,
    calls: Mutex<Vec<ChatParams>>,
    open_streams: Arc<AtomicUsize>,
    latency: Mutex<Duration>,
}

/// A fake provider replaying queued results in order.
#[derive(Clone)]
pub struct MockProvider {
    meta: ProviderMetadata,
    queues: Arc<Queues>,
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("meta", &self.meta)
            .field("queued_responses", &lock(&self.queues.responses).len())
            .field("queued_streams", &lock(&self.queues.streams).len())
            .field("recorded_calls", &lock(&self.queues.calls).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().expect("mock lock poisoned")
}

fn pop<T>(queue: &Queue<T>, what: &str) -> Result<T, LlmError> {
    lock(queue).pop_front().unwrap_or_else(|| {
        Err(LlmError::Provider {
            code: "mock_exhausted".into(),
            message: format!("MockProvider: no queued {what} remaining"),
            retryable: false,
        })
    })
}

/// Decrements the open-stream counter when the stream is dropped.
struct StreamGuard(Arc<AtomicUsize>);

impl StreamGuard {
    fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockProvider {
    /// A mock with the given metadata.
    pub fn new(meta: ProviderMetadata) -> Self {
        Self {
            meta,
            queues: Arc::new(Queues::default()),
        }
    }

    /// A mock named `name` that declares every capability.
    pub fn named(name: impl Into<String>) -> Self {
        let name: String = name.into();
        let mut meta = ProviderMetadata::new(
            name,
            "mock-model",
            [
                Capability::Chat,
                Capability::Streaming,
                Capability::Tools,
                Capability::Embeddings,
                Capability::Moderation,
                Capability::ImageGeneration,
                Capability::Transcription,
                Capability::ModelListing,
                Capability::Vision,
            ],
        );
        meta.context_window = 128_000;
        Self::new(meta)
    }

    /// Delays every call by `latency` before answering.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *lock(&self.queues.latency) = latency;
        self
    }

    /// Queues a chat response.
    pub fn queue_response(&self, response: ChatResponse) -> &Self {
        lock(&self.queues.responses).push_back(Ok(response));
        self
    }

    /// Queues a chat failure.
    pub fn queue_error(&self, error: LlmError) -> &Self {
        lock(&self.queues.responses).push_back(Err(error));
        self
    }

    /// Queues a stream that yields `events`.
    pub fn queue_stream(&self, events: Vec<StreamEvent>) -> &Self {
        self.queue_stream_results(events.into_iter().map(Ok).collect())
    }

    /// Queues a stream whose items may include transport errors.
    pub fn queue_stream_results(&self, items: Vec<Result<StreamEvent, LlmError>>) -> &Self {
        lock(&self.queues.streams).push_back(Ok(items));
        self
    }

    /// Queues a failure to open a stream.
    pub fn queue_stream_error(&self, error: LlmError) -> &Self {
        lock(&self.queues.streams).push_back(Err(error));
        self
    }

    /// Queues an embeddings result.
    pub fn queue_embedding(&self, embedding: Embedding) -> &Self {
        lock(&self.queues.embeddings).push_back(Ok(embedding));
        self
    }

    /// Queues a moderation result.
    pub fn queue_moderation(&self, moderation: Moderation) -> &Self {
        lock(&self.queues.moderations).push_back(Ok(moderation));
        self
    }

    /// Queues generated images.
    pub fn queue_images(&self, images: Vec<GeneratedImage>) -> &Self {
        lock(&self.queues.images).push_back(Ok(images));
        self
    }

    /// Queues a transcription.
    pub fn queue_transcription(&self, transcription: Transcription) -> &Self {
        lock(&self.queues.transcriptions).push_back(Ok(transcription));
        self
    }

    /// Queues a model list.
    pub fn queue_models(&self, models: Vec<ModelInfo>) -> &Self {
        lock(&self.queues.models).push_back(Ok(models));
        self
    }

    /// Every `chat`/`stream` request received, in order.
    pub fn recorded_calls(&self) -> Vec<ChatParams> {
        lock(&self.queues.calls).clone()
    }

    /// Number of `chat`/`stream` requests received.
    pub fn call_count(&self) -> usize {
        lock(&self.queues.calls).len()
    }

    /// Streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.queues.open_streams.load(Ordering::SeqCst)
    }

    fn record_call(&self, params: &ChatParams) {
        lock(&self.queues.calls).push(params.clone());
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.queues.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    async fn answer<T>(&self, capability: Capability, queue: &Queue<T>) -> Result<T, LlmError> {
        if !self.meta.supports(capability) {
            return Err(self.unsupported(capability));
        }
        self.simulate_latency().await;
        pop(queue, &capability.to_string())
    }
}

impl Provider for MockProvider {
    async fn chat(&self, params: &ChatParams) -> Result<ChatResponse, LlmError> {
        self.record_call(params);
        self.simulate_latency().await;
        pop(&self.queues.responses, "responses")
    }

    async fn stream(&self, params: &ChatParams) -> Result<ChatStream, LlmError> {
        if !self.meta.supports(Capability::Streaming) {
            return Err(self.unsupported(Capability::Streaming));
        }
        self.record_call(params);
        self.simulate_latency().await;
        let items = pop(&self.queues.streams, "streams")?;
        let guard = StreamGuard::open(&self.queues.open_streams);
        let stream = futures::stream::iter(items).inspect(move |_| {
            let _held = &guard;
        });
        Ok(Box::pin(stream))
    }

    async fn embed(&self, _request: &EmbeddingRequest) -> Result<Embedding, LlmError> {
        self.answer(Capability::Embeddings, &self.queues.embeddings)
            .await
    }

    async fn moderate(&self, _request: &ModerationRequest) -> Result<Moderation, LlmError> {
        self.answer(Capability::Moderation, &self.queues.moderations)
            .await
    }

    async fn paint(&self, _request: &ImageRequest) -> Result<Vec<GeneratedImage>, LlmError> {
        self.answer(Capability::ImageGeneration, &self.queues.images)
            .await
    }

    async fn transcribe(&self, _request: &TranscriptionRequest) -> Result<Transcription, LlmError> {
        self.answer(Capability::Transcription, &self.queues.transcriptions)
            .await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        self.answer(Capability::ModelListing, &self.queues.models)
            .await
    }

    fn metadata(&self) -> ProviderMetadata {
        self.meta.clone()
    }
}
