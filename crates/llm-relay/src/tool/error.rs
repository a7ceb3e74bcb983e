//! Tool error types.

/// Error returned by a tool handler.
///
/// A recoverable error is reported to the model as an error `tool`
/// message so it can adjust. A fatal error fails the turn with
/// [`LlmError::ToolExecution`](crate::LlmError::ToolExecution).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable error description.
    pub message: String,
    /// Abort the turn instead of reporting back to the model.
    pub fatal: bool,
}

impl ToolError {
    /// A recoverable error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// An error that fails the whole turn.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid arguments: {err}"))
    }
}
