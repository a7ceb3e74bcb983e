//! Streaming response types and the aggregator that reduces them.
//!
//! A provider streams its answer as a [`ChatStream`] of [`StreamEvent`]s.
//! The stream is lazy, single-pass and finite: the first
//! [`Done`](StreamEvent::Done) event ends it, and nothing after that is
//! read.
//!
//! [`StreamAccumulator`] folds the events into one [`ChatResponse`]:
//!
//! - text deltas are concatenated in arrival order;
//! - tool-call argument fragments are joined per call until the call
//!   completes, then parsed into a [`ToolCall`];
//! - usage reports are summed.
//!
//! # Tool-call reassembly
//!
//! Tool calls arrive in three phases:
//! 1. [`ToolCallStart`](StreamEvent::ToolCallStart) announces the call's
//!    `id` and `name`.
//! 2. [`ToolCallDelta`](StreamEvent::ToolCallDelta) carries JSON argument
//!    fragments.
//! 3. [`ToolCallComplete`](StreamEvent::ToolCallComplete) carries the fully
//!    parsed call. Providers that never send it get their fragments parsed
//!    when the stream finishes.
//!
//! The `index` field identifies which call an event belongs to when the
//! model invokes several tools at once.

use std::collections::HashMap;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::chat::{ChatResponse, StopReason, ToolCall};
use crate::error::LlmError;
use crate::usage::Usage;

/// A pinned, boxed, `Send` stream of [`StreamEvent`] results.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// An incremental event emitted during a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum StreamEvent {
    /// A fragment of the model's text output.
    TextDelta(String),
    /// A fragment of the model's reasoning output.
    ReasoningDelta(String),
    /// A new tool call has started.
    ToolCallStart {
        /// Zero-based position of this call in the response.
        index: u32,
        /// Provider-assigned call identifier.
        id: String,
        /// The tool being called.
        name: String,
    },
    /// A JSON fragment of a tool call's arguments.
    ToolCallDelta {
        /// The call this fragment belongs to.
        index: u32,
        /// A chunk of the JSON arguments string.
        json_chunk: String,
    },
    /// A fully assembled tool call.
    ToolCallComplete {
        /// The call this completion corresponds to.
        index: u32,
        /// The parsed call.
        call: ToolCall,
    },
    /// Token usage reported by the provider.
    Usage(Usage),
    /// The stream has ended.
    Done {
        /// Why the model stopped generating.
        stop_reason: StopReason,
    },
}

#[derive(Debug)]
struct PartialCall {
    index: u32,
    id: String,
    name: String,
    arguments: String,
    complete: Option<ToolCall>,
}

/// Reduces a sequence of [`StreamEvent`]s into one [`ChatResponse`].
///
/// Feed events with [`push`](Self::push) until it returns `true`, then
/// call [`finish`](Self::finish). Only the running text, argument
/// buffers and usage totals are kept.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    reasoning: String,
    calls: Vec<PartialCall>,
    by_index: HashMap<u32, usize>,
    usage: Usage,
    stop_reason: Option<StopReason>,
    events: usize,
}

impl StreamAccumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event in. Returns `true` once the stream is finished.
    ///
    /// Events pushed after [`Done`](StreamEvent::Done) are ignored.
    pub fn push(&mut self, event: &StreamEvent) -> bool {
        if self.stop_reason.is_some() {
            return true;
        }
        self.events += 1;
        match event {
            StreamEvent::TextDelta(text) => self.text.push_str(text),
            StreamEvent::ReasoningDelta(text) => self.reasoning.push_str(text),
            StreamEvent::ToolCallStart { index, id, name } => {
                self.call_mut(*index, Some((id, name)));
            }
            StreamEvent::ToolCallDelta { index, json_chunk } => {
                self.call_mut(*index, None).arguments.push_str(json_chunk);
            }
            StreamEvent::ToolCallComplete { index, call } => {
                let partial = self.call_mut(*index, Some((&call.id, &call.name)));
                partial.complete = Some(call.clone());
            }
            StreamEvent::Usage(usage) => self.usage += usage,
            StreamEvent::Done { stop_reason } => self.stop_reason = Some(*stop_reason),
        }
        self.stop_reason.is_some()
    }

    fn call_mut(&mut self, index: u32, ident: Option<(&String, &String)>) -> &mut PartialCall {
        let slot = *self.by_index.entry(index).or_insert_with(|| {
            self.calls.push(PartialCall {
                index,
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
                complete: None,
            });
            self.calls.len() - 1
        });
        let call = &mut self.calls[slot];
        if let Some((id, name)) = ident {
            if call.id.is_empty() {
                call.id.clone_from(id);
            }
            if call.name.is_empty() {
                call.name.clone_from(name);
            }
        }
        call
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of events folded in so far.
    pub fn events_seen(&self) -> usize {
        self.events
    }

    /// `true` once a [`Done`](StreamEvent::Done) event has been seen.
    pub fn is_finished(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Produces the final response.
    ///
    /// # Errors
    ///
    /// - [`LlmError::ResponseFormat`] if no `Done` event was seen, or if a
    ///   tool call's argument fragments do not form valid JSON.
    pub fn finish(self, model: impl Into<String>) -> Result<ChatResponse, LlmError> {
        let Some(stop_reason) = self.stop_reason else {
            return Err(LlmError::ResponseFormat {
                message: "stream ended before a finish signal".into(),
                raw: self.text,
            });
        };

        let mut calls = self.calls;
        calls.sort_by_key(|c| c.index);
        let tool_calls = calls
            .into_iter()
            .map(|partial| match partial.complete {
                Some(call) => Ok(call),
                None => {
                    let arguments = if partial.arguments.trim().is_empty() {
                        serde_json::Value::Object(serde_json::Map::new())
                    } else {
                        serde_json::from_str(&partial.arguments).map_err(|e| {
                            LlmError::ResponseFormat {
                                message: format!(
                                    "tool call '{}' has malformed arguments: {e}",
                                    partial.name
                                ),
                                raw: partial.arguments.clone(),
                            }
                        })?
                    };
                    Ok(ToolCall {
                        id: partial.id,
                        name: partial.name,
                        arguments,
                    })
                }
            })
            .collect::<Result<Vec<_>, LlmError>>()?;

        Ok(ChatResponse {
            content: self.text,
            reasoning: (!self.reasoning.is_empty()).then_some(self.reasoning),
            tool_calls,
            usage: self.usage,
            stop_reason,
            model: model.into(),
        })
    }
}

/// Drains `stream` into a [`ChatResponse`].
///
/// Stops reading at the first `Done` event and drops the stream, which
/// releases the underlying transport.
///
/// # Errors
///
/// - [`LlmError::StreamInterrupted`] if the stream yields an error or
///   ends before `Done`.
/// - [`LlmError::ResponseFormat`] for malformed tool-call arguments.
pub async fn collect(mut stream: ChatStream, model: impl Into<String>) -> Result<ChatResponse, LlmError> {
    let mut acc = StreamAccumulator::new();
    while let Some(event) = stream.next().await {
        let event = event.map_err(|e| interrupted(acc.events_seen(), e))?;
        if acc.push(&event) {
            break;
        }
    }
    drop(stream);
    if !acc.is_finished() {
        let seen = acc.events_seen();
        return Err(interrupted(
            seen,
            LlmError::ResponseFormat {
                message: "stream ended before a finish signal".into(),
                raw: String::new(),
            },
        ));
    }
    acc.finish(model)
}

/// Wraps a mid-stream failure.
pub(crate) fn interrupted(chunks_received: usize, source: LlmError) -> LlmError {
    match source {
        already @ LlmError::StreamInterrupted { .. } => already,
        source => LlmError::StreamInterrupted {
            chunks_received,
            source: Box::new(source),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{collect_stream, stream_of};

    fn done() -> StreamEvent {
        StreamEvent::Done {
            stop_reason: StopReason::EndTurn,
        }
    }

    #[test]
    fn test_text_concatenated_in_order() {
        let mut acc = StreamAccumulator::new();
        for chunk in ["Hel", "lo, ", "world"] {
            assert!(!acc.push(&StreamEvent::TextDelta(chunk.into())));
        }
        assert!(acc.push(&done()));
        let resp = acc.finish("m").unwrap();
        assert_eq!(resp.content, "Hello, world");
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert!(resp.reasoning.is_none());
    }

    #[test]
    fn test_tool_call_assembled_from_fragments() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamEvent::ToolCallStart {
            index: 0,
            id: "tc_1".into(),
            name: "add".into(),
        });
        acc.push(&StreamEvent::ToolCallDelta {
            index: 0,
            json_chunk: "{\"a\": 1,".into(),
        });
        acc.push(&StreamEvent::ToolCallDelta {
            index: 0,
            json_chunk: " \"b\": 2}".into(),
        });
        acc.push(&StreamEvent::Done {
            stop_reason: StopReason::ToolUse,
        });
        let resp = acc.finish("m").unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "tc_1");
        assert_eq!(resp.tool_calls[0].arguments, serde_json::json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_complete_event_wins_over_fragments() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamEvent::ToolCallStart {
            index: 1,
            id: "tc_b".into(),
            name: "b".into(),
        });
        acc.push(&StreamEvent::ToolCallDelta {
            index: 1,
            json_chunk: "{\"partial".into(),
        });
        acc.push(&StreamEvent::ToolCallComplete {
            index: 1,
            call: ToolCall {
                id: "tc_b".into(),
                name: "b".into(),
                arguments: serde_json::json!({"x": true}),
            },
        });
        acc.push(&StreamEvent::ToolCallStart {
            index: 0,
            id: "tc_a".into(),
            name: "a".into(),
        });
        acc.push(&done());
        let resp = acc.finish("m").unwrap();
        let ids: Vec<_> = resp.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["tc_a", "tc_b"]);
        assert_eq!(resp.tool_calls[0].arguments, serde_json::json!({}));
        assert_eq!(resp.tool_calls[1].arguments, serde_json::json!({"x": true}));
    }

    #[test]
    fn test_malformed_arguments_rejected() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamEvent::ToolCallStart {
            index: 0,
            id: "tc_1".into(),
            name: "add".into(),
        });
        acc.push(&StreamEvent::ToolCallDelta {
            index: 0,
            json_chunk: "{not json".into(),
        });
        acc.push(&done());
        assert!(matches!(
            acc.finish("m"),
            Err(LlmError::ResponseFormat { .. })
        ));
    }

    #[test]
    fn test_usage_summed_and_events_after_done_ignored() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamEvent::Usage(Usage::new(10, 0)));
        acc.push(&StreamEvent::Usage(Usage::new(0, 7)));
        acc.push(&done());
        assert!(acc.push(&StreamEvent::TextDelta("late".into())));
        let resp = acc.finish("m").unwrap();
        assert_eq!(resp.usage.total_tokens, 17);
        assert_eq!(resp.content, "");
    }

    #[test]
    fn test_finish_without_done_fails() {
        let mut acc = StreamAccumulator::new();
        acc.push(&StreamEvent::TextDelta("half".into()));
        assert!(acc.finish("m").is_err());
    }

    #[tokio::test]
    async fn test_collect_stops_at_first_done() {
        let stream = stream_of(vec![
            Ok(StreamEvent::TextDelta("a".into())),
            Ok(done()),
            Err(LlmError::connection("never read")),
        ]);
        let resp = collect(stream, "m").await.unwrap();
        assert_eq!(resp.content, "a");
        assert_eq!(resp.model, "m");
    }

    #[tokio::test]
    async fn test_collect_mid_stream_error_is_interrupted() {
        let stream = stream_of(vec![
            Ok(StreamEvent::TextDelta("a".into())),
            Ok(StreamEvent::TextDelta("b".into())),
            Err(LlmError::connection("reset")),
        ]);
        let err = collect(stream, "m").await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::StreamInterrupted {
                chunks_received: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_collect_truncated_stream_is_interrupted() {
        let stream = stream_of(vec![Ok(StreamEvent::TextDelta("a".into()))]);
        let err = collect(stream, "m").await.unwrap_err();
        assert!(matches!(err, LlmError::StreamInterrupted { .. }));
    }

    #[tokio::test]
    async fn test_collect_stream_helper() {
        let events = collect_stream(stream_of(vec![
            Ok(StreamEvent::TextDelta("x".into())),
            Ok(done()),
        ]))
        .await;
        assert_eq!(events.len(), 2);
    }
}
