//! Conversation messages, content parts, tool calls, and responses.
//!
//! A conversation is an ordered list of [`ChatMessage`]s. Each message has
//! a [`ChatRole`] and [`Content`] that is either plain text or an ordered
//! list of [`ContentPart`]s (text and image references). Assistant
//! messages may carry [`ToolCall`]s; `tool` messages answer one of them
//! through [`tool_call_id`](ChatMessage::tool_call_id).
//!
//! ```rust
//! use llm_relay::{ChatMessage, ChatRole};
//!
//! let msg = ChatMessage::user("What's the weather in Paris?");
//! assert_eq!(msg.role, ChatRole::User);
//! assert_eq!(msg.text(), "What's the weather in Paris?");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::Usage;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Instructions that frame the whole conversation.
    System,
    /// Developer instructions (for providers that distinguish them from system).
    Developer,
    /// The human (or calling application).
    User,
    /// The model.
    Assistant,
    /// The result of a tool invocation.
    Tool,
}

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// A URL the provider fetches itself.
    Url {
        /// The image URL.
        url: String,
    },
    /// Inline base64-encoded bytes.
    Base64 {
        /// MIME type, e.g. `"image/png"`.
        media_type: String,
        /// The encoded payload.
        data: String,
    },
}

/// One typed part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A text fragment.
    Text {
        /// The text.
        text: String,
    },
    /// An image reference.
    Image {
        /// Where the image lives.
        source: ImageSource,
    },
}

impl ContentPart {
    /// Shorthand for a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Shorthand for an image fetched by URL.
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource::Url { url: url.into() },
        }
    }
}

/// The body of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text.
    Text(String),
    /// An ordered list of typed parts.
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Concatenates every text fragment, skipping non-text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect(),
        }
    }

    /// `true` if there is no text and no parts.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }

    /// `true` if any part is an image.
    pub fn has_images(&self) -> bool {
        matches!(self, Self::Parts(parts) if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })))
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentPart>> for Content {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// A structured function-invocation request emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned identifier, echoed back in the tool message.
    pub id: String,
    /// The name of the tool to invoke.
    pub name: String,
    /// Arguments as parsed JSON.
    pub arguments: Value,
}

/// One turn in a conversation.
///
/// Messages are built through the constructors and are never modified
/// after they are appended to a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the message.
    pub role: ChatRole,
    /// The message body.
    pub content: Content,
    /// Tool invocations requested by the model (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Optional author name (for tool messages, the tool's name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Token usage of the upstream call that produced this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// The model's reasoning trace, when the provider exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Set on tool messages whose content describes a failure.
    #[serde(default)]
    pub is_error: bool,
}

impl ChatMessage {
    fn with_role(role: ChatRole, content: Content) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            usage: None,
            reasoning: None,
            is_error: false,
        }
    }

    /// A system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(ChatRole::System, Content::Text(text.into()))
    }

    /// A developer message.
    pub fn developer(text: impl Into<String>) -> Self {
        Self::with_role(ChatRole::Developer, Content::Text(text.into()))
    }

    /// A user message with plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(ChatRole::User, Content::Text(text.into()))
    }

    /// A user message with text and image parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_role(ChatRole::User, Content::Parts(parts))
    }

    /// An assistant message with plain text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(ChatRole::Assistant, Content::Text(text.into()))
    }

    /// A successful tool result answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(ChatRole::Tool, Content::Text(content.into()))
        }
    }

    /// A failed tool result answering `tool_call_id`.
    pub fn tool_error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::tool_result(tool_call_id, content)
        }
    }

    /// Sets the author name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches tool calls.
    #[must_use]
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Attaches the usage record of the call that produced this message.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// The concatenated text content.
    pub fn text(&self) -> String {
        self.content.text()
    }

    /// `true` if the message requests at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl From<&str> for ChatMessage {
    fn from(text: &str) -> Self {
        Self::user(text)
    }
}

impl From<String> for ChatMessage {
    fn from(text: String) -> Self {
        Self::user(text)
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum StopReason {
    /// The model finished its answer.
    EndTurn,
    /// The model wants tool results before continuing.
    ToolUse,
    /// The output hit `max_tokens`.
    MaxTokens,
    /// A stop sequence was generated.
    StopSequence,
}

/// A complete, non-streamed provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated text.
    pub content: String,
    /// Reasoning trace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool invocations the model requested.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Token counts for this call.
    pub usage: Usage,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// The model that actually served the request.
    pub model: String,
}

impl ChatResponse {
    /// Converts the response into the assistant message stored in history.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            tool_calls: self.tool_calls,
            usage: Some(self.usage),
            reasoning: self.reasoning,
            ..ChatMessage::assistant(self.content)
        }
    }

    /// `true` if the response requests at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
