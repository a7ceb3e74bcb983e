//! What a tool hands back to the loop.

/// Output returned by a tool handler.
///
/// `content` becomes the body of the `tool` message sent back to the
/// model. A halting output ends the turn instead: its content is the
/// final assistant answer and no further model call is made.
///
/// ```rust
/// use llm_relay::tool::ToolOutput;
///
/// let normal = ToolOutput::new("42");
/// assert!(!normal.halt);
///
/// let stop = ToolOutput::halt("Order placed, nothing left to do.");
/// assert!(stop.halt);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text returned to the model, or the final answer when halting.
    pub content: String,
    /// Ends the agent loop after this call.
    pub halt: bool,
}

impl ToolOutput {
    /// A regular result.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            halt: false,
        }
    }

    /// A result that stops the loop, answering with `message`.
    pub fn halt(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            halt: true,
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
