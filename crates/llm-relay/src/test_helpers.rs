//! Ready-made values for tests.
//!
//! Available when the `test-utils` feature is enabled, so downstream
//! crates can reuse them. Also compiled for this crate's own tests.

use futures::StreamExt;
use serde_json::Value;

use crate::chat::{ChatMessage, ChatResponse, StopReason, ToolCall};
use crate::error::LlmError;
use crate::mock::MockProvider;
use crate::provider::{Capability, ProviderMetadata};
use crate::stream::{ChatStream, StreamEvent};
use crate::usage::Usage;

/// A text response that ends the turn.
pub fn sample_response(text: &str) -> ChatResponse {
    ChatResponse {
        content: text.into(),
        reasoning: None,
        tool_calls: Vec::new(),
        usage: sample_usage(),
        stop_reason: StopReason::EndTurn,
        model: "test-model".into(),
    }
}

/// A response requesting `calls`.
pub fn sample_tool_response(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        reasoning: None,
        tool_calls: calls,
        usage: sample_usage(),
        stop_reason: StopReason::ToolUse,
        model: "test-model".into(),
    }
}

/// A tool call.
pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

/// 100 input tokens, 50 output tokens.
pub fn sample_usage() -> Usage {
    Usage::new(100, 50)
}

/// Shorthand for [`ChatMessage::user`].
pub fn user_msg(text: &str) -> ChatMessage {
    ChatMessage::user(text)
}

/// Shorthand for [`ChatMessage::assistant`].
pub fn assistant_msg(text: &str) -> ChatMessage {
    ChatMessage::assistant(text)
}

/// Shorthand for [`ChatMessage::system`].
pub fn system_msg(text: &str) -> ChatMessage {
    ChatMessage::system(text)
}

/// Shorthand for [`ChatMessage::tool_result`].
pub fn tool_result_msg(tool_call_id: &str, content: &str) -> ChatMessage {
    ChatMessage::tool_result(tool_call_id, content)
}

/// The events a provider would stream for `response`: text split into
/// word-sized deltas, each tool call in three phases, usage, then `Done`.
pub fn response_events(response: &ChatResponse) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = response
        .content
        .split_inclusive(' ')
        .map(|chunk| StreamEvent::TextDelta(chunk.to_string()))
        .collect();
    for (index, call) in (0u32..).zip(&response.tool_calls) {
        events.push(StreamEvent::ToolCallStart {
            index,
            id: call.id.clone(),
            name: call.name.clone(),
        });
        events.push(StreamEvent::ToolCallDelta {
            index,
            json_chunk: call.arguments.to_string(),
        });
        events.push(StreamEvent::ToolCallComplete {
            index,
            call: call.clone(),
        });
    }
    events.push(StreamEvent::Usage(response.usage.clone()));
    events.push(StreamEvent::Done {
        stop_reason: response.stop_reason,
    });
    events
}

/// A [`ChatStream`] over fixed items.
pub fn stream_of(items: Vec<Result<StreamEvent, LlmError>>) -> ChatStream {
    Box::pin(futures::stream::iter(items))
}

/// Collects every item, errors included.
pub async fn collect_stream_results(stream: ChatStream) -> Vec<Result<StreamEvent, LlmError>> {
    stream.collect::<Vec<_>>().await
}

/// Collects every event, panicking on an error item.
pub async fn collect_stream(stream: ChatStream) -> Vec<StreamEvent> {
    stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| r.expect("stream event should be Ok"))
        .collect()
}

/// A mock with a chosen name, model and the chat-side capabilities.
pub fn mock_for(provider_name: &str, model: &str) -> MockProvider {
    let mut meta = ProviderMetadata::new(
        provider_name.to_owned(),
        model,
        [Capability::Chat, Capability::Streaming, Capability::Tools],
    );
    meta.context_window = 128_000;
    MockProvider::new(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamAccumulator;

    #[test]
    fn test_response_events_rebuild_response() {
        let response = sample_tool_response(vec![tool_call(
            "c1",
            "search",
            serde_json::json!({"q": "rust"}),
        )]);
        let mut acc = StreamAccumulator::new();
        for event in response_events(&response) {
            acc.push(&event);
        }
        let rebuilt = acc.finish("test-model").unwrap();
        assert_eq!(rebuilt, response);
    }

    #[test]
    fn test_text_split_into_deltas() {
        let events = response_events(&sample_response("one two three"));
        let deltas = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::TextDelta(_)))
            .count();
        assert_eq!(deltas, 3);
    }

    #[test]
    fn test_mock_for_capabilities() {
        let mock = mock_for("acme", "m1");
        let meta = crate::Provider::metadata(&mock);
        assert_eq!(meta.name, "acme");
        assert!(meta.supports(Capability::Tools));
        assert!(!meta.supports(Capability::Embeddings));
    }
}
