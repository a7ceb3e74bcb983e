//! Unified error type for every engine operation.
//!
//! Providers map their native failures into [`LlmError`], and the engine
//! adds its own conditions (tool budget, interrupted streams, exhausted
//! retries) to the same enum, so callers match against one type no matter
//! which backend is in use.
//!
//! # Retryability
//!
//! Only transient upstream failures are retried by
//! [`RetryPolicy`](crate::retry::RetryPolicy): HTTP 5xx, 408 and 429,
//! connection failures without a status, and timeouts. Everything else
//! propagates on first occurrence:
//!
//! ```rust
//! use llm_relay::LlmError;
//!
//! let err = LlmError::Timeout { elapsed_ms: 5000 };
//! assert!(err.is_retryable());
//!
//! let err = LlmError::Auth("bad key".into());
//! assert!(!err.is_retryable());
//! ```

use serde_json::Value;

use crate::provider::Capability;

/// The unified error type returned by all provider and engine operations.
///
/// Variants are `#[non_exhaustive]`: new error kinds may be added in
/// minor releases, so always include a wildcard arm when matching.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Missing credentials, an unregistered provider, or an invalid
    /// configuration value. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The resolved provider does not implement the requested capability.
    ///
    /// The display format is part of the public contract:
    /// `"<provider> doesn't support <capability>"`.
    #[error("{provider} doesn't support {capability}")]
    Unsupported {
        /// Display name of the provider.
        provider: String,
        /// The capability that was requested.
        capability: Capability,
    },

    /// An HTTP-level failure (transport error, unexpected status code).
    ///
    /// `status` is `None` when the request never received a response
    /// (DNS failure, connection reset).
    #[error("HTTP error (status={status:?}): {message}")]
    Http {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// A human-readable description of the failure.
        message: String,
        /// Whether the failure is transient.
        retryable: bool,
    },

    /// The API key or token was rejected.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The request was malformed (missing fields, invalid parameters).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A provider-specific error that doesn't map to another variant.
    #[error("Provider error ({code}): {message}")]
    Provider {
        /// Provider-defined error code (e.g. `"overloaded"`).
        code: String,
        /// Human-readable error description.
        message: String,
        /// Whether the failure is transient.
        retryable: bool,
    },

    /// The response body could not be parsed.
    #[error("Response format error: {message}")]
    ResponseFormat {
        /// What went wrong during parsing.
        message: String,
        /// The raw payload, for diagnostics.
        raw: String,
    },

    /// Tool arguments failed JSON Schema validation.
    #[error("Schema validation error: {message}")]
    SchemaValidation {
        /// Concatenated validation error messages.
        message: String,
        /// The schema the value was validated against.
        schema: Value,
        /// The value that failed validation.
        actual: Value,
    },

    /// A tool invocation raised an error that the loop could not recover from.
    #[error("Tool execution error ({tool_name}): {source}")]
    ToolExecution {
        /// The name of the tool that failed.
        tool_name: String,
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The agent loop ran out of its tool-execution budget while the model
    /// kept requesting tools.
    #[error("Tool call limit exceeded: the model requested more than {limit} tool executions")]
    ToolLimitExceeded {
        /// The configured `max_tool_calls` budget.
        limit: u32,
    },

    /// The transport failed after a stream had started. Nothing from the
    /// interrupted response is kept.
    #[error("Stream interrupted after {chunks_received} chunks: {source}")]
    StreamInterrupted {
        /// How many chunks were delivered before the failure.
        chunks_received: usize,
        /// The transport error.
        #[source]
        source: Box<LlmError>,
    },

    /// A retry policy exhausted its budget without a successful response.
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// How many attempts were made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last_error: Box<LlmError>,
    },

    /// The operation exceeded its deadline.
    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the timeout fired.
        elapsed_ms: u64,
    },

    /// An upstream call failed; names the provider and the operation.
    #[error("{provider} {operation} failed: {source}")]
    Operation {
        /// Display name of the provider.
        provider: String,
        /// The operation that was attempted.
        operation: Capability,
        /// The underlying failure.
        #[source]
        source: Box<LlmError>,
    },
}

impl LlmError {
    /// Returns `true` if the error is transient and the request may succeed on retry.
    ///
    /// Checks the `retryable` flag on applicable variants and treats
    /// timeouts as always retryable. Context wrappers are looked through.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } | Self::Provider { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            Self::Operation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Classifies an upstream HTTP status into the error taxonomy.
    ///
    /// 401 and 403 become [`Auth`](Self::Auth); 5xx, 408 and 429 are
    /// transient; every other status is a fatal [`Http`](Self::Http) error.
    pub fn from_status(status: http::StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
            return Self::Auth(message);
        }
        let retryable = status.is_server_error()
            || status == http::StatusCode::REQUEST_TIMEOUT
            || status == http::StatusCode::TOO_MANY_REQUESTS;
        Self::Http {
            status: Some(status),
            message,
            retryable,
        }
    }

    /// A transport failure that never produced a status (connection reset, DNS).
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Http {
            status: None,
            message: message.into(),
            retryable: true,
        }
    }

    /// Shorthand for [`Unsupported`](Self::Unsupported).
    pub fn unsupported(provider: impl Into<String>, capability: Capability) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            capability,
        }
    }

    /// Attaches provider and operation context to an upstream failure.
    ///
    /// Errors that already name the provider (`Unsupported`,
    /// `Configuration`, an existing `Operation`) are returned unchanged.
    #[must_use]
    pub fn in_operation(self, provider: &str, operation: Capability) -> Self {
        match self {
            Self::Unsupported { .. } | Self::Configuration(_) | Self::Operation { .. } => self,
            other => Self::Operation {
                provider: provider.to_string(),
                operation,
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through `Operation` wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseFormat {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}
