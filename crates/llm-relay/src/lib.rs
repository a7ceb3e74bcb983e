//! # llm-relay
//!
//! A provider-agnostic engine for running chat conversations against
//! large language models.
//!
//! The crate contains no vendor code. Backends implement [`Provider`] and
//! are registered by name in a [`ProviderRegistry`]; everything above that
//! seam is shared:
//!
//! - retries with jittered exponential backoff and per-attempt deadlines;
//! - streaming aggregation of deltas and tool-call fragments;
//! - a middleware pipeline around every provider call;
//! - an agent loop that validates, approves and executes tool calls
//!   under a budget, with halting and atomic history updates.
//!
//! ```text
//!   Client ──► ChatSession ──► middleware ──► RetryPolicy ──► dyn Provider
//!                  │                                              │
//!                  │◄──────────── ChatResponse / ChatStream ◄─────┘
//!                  ▼
//!             agent loop ──► ToolRegistry ──► ToolHandler
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use llm_relay::mock::MockProvider;
//! use llm_relay::test_helpers::sample_response;
//! use llm_relay::{Client, ClientConfig, DynProvider, ProviderRegistry};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let mock = MockProvider::named("mock");
//! mock.queue_response(sample_response("Paris."));
//!
//! let registry = Arc::new(ProviderRegistry::new());
//! let provider = mock.clone();
//! registry.register("mock", move || Ok(Box::new(provider.clone()) as Box<dyn DynProvider>));
//!
//! let client = Client::new(registry, ClientConfig::builder("mock").build().unwrap());
//! let mut chat = client.chat().unwrap();
//! let answer = chat.ask("What is the capital of France?").await.unwrap();
//!
//! assert_eq!(answer.text(), "Paris.");
//! assert_eq!(chat.history().len(), 2);
//! # });
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chat`] | Messages, content parts, tool calls and responses |
//! | [`client`] | [`Client`]: registry + config, non-chat operations |
//! | [`config`] | [`ClientConfig`] and per-call options |
//! | [`error`] | [`LlmError`] |
//! | [`media`] | Embedding, moderation, image and transcription types |
//! | [`middleware`] | Hooks and directives around provider calls |
//! | [`provider`] | The [`Provider`] trait and capability set |
//! | [`registry`] | Lazy, write-once provider registration |
//! | [`retry`] | [`RetryPolicy`] |
//! | [`session`] | [`ChatSession`], turns and session events |
//! | [`stream`] | Stream events and the aggregator |
//! | [`tool`] | Tool handlers, registry and the agent loop |
//! | [`usage`] | Token counts and the usage tracker |

#![warn(missing_docs)]

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod middleware;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod session;
pub mod stream;
pub mod tool;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

pub use chat::{ChatMessage, ChatResponse, ChatRole, Content, ContentPart, StopReason, ToolCall};
pub use client::Client;
pub use config::{CallOptions, ClientConfig, ToolExecutionMode};
pub use error::LlmError;
pub use middleware::{Directive, Middleware, MiddlewareStack};
pub use provider::{
    Capability, ChatParams, DynProvider, JsonSchema, Provider, ProviderMetadata, ToolChoice,
    ToolDefinition,
};
pub use registry::{ProviderConfig, ProviderRegistry};
pub use retry::RetryPolicy;
pub use session::{ChatSession, SessionEvent, Termination, TurnHandle, TurnOutcome, TurnStep};
pub use stream::{ChatStream, StreamEvent};
pub use tool::{ToolHandler, ToolOutput, ToolRegistry};
pub use usage::{Usage, UsageTracker};
