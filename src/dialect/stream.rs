//! Materializes a dialect-appropriate SSE sequence from the upstream
//! [`KiroFrame`] stream (§4.4 "Streaming", §9 "Streaming generators").
//!
//! Both sequencers track which content-block index is a tool call so that
//! interleaved text and tool-use blocks open and close correctly; the
//! OpenAI sequencer additionally remaps Kiro's per-message content index
//! onto OpenAI's own per-tool-call `tool_calls[].index`, since OpenAI only
//! indexes tool calls, not every content block.

use std::collections::HashMap;

use async_stream::stream;
use chrono::Utc;
use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::upstream::kiro_wire::{ContentBlockStart, ContentDelta, KiroFrame};
use crate::upstream::UpstreamError;

use super::openai::{ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkFunctionCall, ChunkToolCall};
use super::{claude::stop_reason_str, openai::finish_reason};

/// One already-framed SSE event ready to write to the response body.
pub struct SseEvent {
    pub event: Option<&'static str>,
    pub data: String,
}

impl SseEvent {
    pub fn to_wire(&self) -> String {
        match self.event {
            Some(name) => format!("event: {name}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

/// Converts a Kiro frame stream into OpenAI `chat.completion.chunk` SSE
/// events, terminated by `data: [DONE]`.
pub fn to_openai_sse(
    frames: impl Stream<Item = Result<KiroFrame, UpstreamError>>,
    model: String,
) -> impl Stream<Item = Result<SseEvent, UpstreamError>> {
    stream! {
        let id = format!("chatcmpl-{}", Uuid::new_v4().as_simple());
        let created = Utc::now().timestamp();
        let mut tool_index_by_block: HashMap<u32, u32> = HashMap::new();
        let mut next_tool_index: u32 = 0;
        let mut sent_role = false;
        futures::pin_mut!(frames);

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut delta = ChunkDelta::default();
            let mut finish: Option<&'static str> = None;

            match frame {
                KiroFrame::MessageStart { .. } => {
                    delta.role = Some("assistant");
                    sent_role = true;
                }
                KiroFrame::ContentBlockStart { index, block } => {
                    if let ContentBlockStart::ToolUse { id, name } = block {
                        let tool_idx = next_tool_index;
                        next_tool_index += 1;
                        tool_index_by_block.insert(index, tool_idx);
                        delta.tool_calls.push(ChunkToolCall {
                            index: tool_idx,
                            id: Some(id),
                            tool_type: Some("function"),
                            function: ChunkFunctionCall {
                                name: Some(name),
                                arguments: Some(String::new()),
                            },
                        });
                    } else {
                        continue;
                    }
                }
                KiroFrame::ContentBlockDelta { index, delta: d } => match d {
                    ContentDelta::TextDelta { text } => {
                        delta.content = Some(text);
                    }
                    ContentDelta::InputJsonDelta { partial_json } => {
                        let tool_idx = *tool_index_by_block.get(&index).unwrap_or(&0);
                        delta.tool_calls.push(ChunkToolCall {
                            index: tool_idx,
                            id: None,
                            tool_type: None,
                            function: ChunkFunctionCall {
                                name: None,
                                arguments: Some(partial_json),
                            },
                        });
                    }
                },
                KiroFrame::ContentBlockStop { .. } => continue,
                KiroFrame::MessageDelta { stop_reason, .. } => {
                    finish = Some(finish_reason(stop_reason));
                }
                KiroFrame::MessageStop => {
                    yield Ok(SseEvent { event: None, data: "[DONE]".to_string() });
                    return;
                }
            }

            if !sent_role {
                delta.role = Some("assistant");
                sent_role = true;
            }

            let chunk = ChatCompletionChunk {
                id: id.clone(),
                object: "chat.completion.chunk",
                created,
                model: model.clone(),
                choices: vec![ChunkChoice { index: 0, delta, finish_reason: finish }],
            };
            yield Ok(SseEvent {
                event: None,
                data: serde_json::to_string(&chunk).unwrap_or_default(),
            });
        }
    }
}

/// Converts a Kiro frame stream into named Claude SSE events
/// (`message_start`, `content_block_start`, …, `message_stop`).
pub fn to_claude_sse(
    frames: impl Stream<Item = Result<KiroFrame, UpstreamError>>,
    model: String,
) -> impl Stream<Item = Result<SseEvent, UpstreamError>> {
    stream! {
        futures::pin_mut!(frames);
        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let event = match frame {
                KiroFrame::MessageStart { id, model: frame_model } => SseEvent {
                    event: Some("message_start"),
                    data: serde_json::json!({
                        "type": "message_start",
                        "message": {
                            "id": id,
                            "type": "message",
                            "role": "assistant",
                            "model": if frame_model.is_empty() { model.clone() } else { frame_model },
                            "content": [],
                        }
                    })
                    .to_string(),
                },
                KiroFrame::ContentBlockStart { index, block } => SseEvent {
                    event: Some("content_block_start"),
                    data: serde_json::json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": content_block_start_json(block),
                    })
                    .to_string(),
                },
                KiroFrame::ContentBlockDelta { index, delta } => SseEvent {
                    event: Some("content_block_delta"),
                    data: serde_json::json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": content_delta_json(delta),
                    })
                    .to_string(),
                },
                KiroFrame::ContentBlockStop { index } => SseEvent {
                    event: Some("content_block_stop"),
                    data: serde_json::json!({
                        "type": "content_block_stop",
                        "index": index,
                    })
                    .to_string(),
                },
                KiroFrame::MessageDelta { stop_reason, usage } => SseEvent {
                    event: Some("message_delta"),
                    data: serde_json::json!({
                        "type": "message_delta",
                        "delta": { "stop_reason": stop_reason_str(stop_reason) },
                        "usage": { "output_tokens": usage.output_tokens },
                    })
                    .to_string(),
                },
                KiroFrame::MessageStop => {
                    yield Ok(SseEvent {
                        event: Some("message_stop"),
                        data: serde_json::json!({ "type": "message_stop" }).to_string(),
                    });
                    return;
                }
            };
            yield Ok(event);
        }
    }
}

fn content_block_start_json(block: ContentBlockStart) -> serde_json::Value {
    match block {
        ContentBlockStart::Text => serde_json::json!({ "type": "text", "text": "" }),
        ContentBlockStart::ToolUse { id, name } => {
            serde_json::json!({ "type": "tool_use", "id": id, "name": name, "input": {} })
        }
    }
}

fn content_delta_json(delta: ContentDelta) -> serde_json::Value {
    match delta {
        ContentDelta::TextDelta { text } => serde_json::json!({ "type": "text_delta", "text": text }),
        ContentDelta::InputJsonDelta { partial_json } => {
            serde_json::json!({ "type": "input_json_delta", "partial_json": partial_json })
        }
    }
}

/// A terminal error event emitted when the upstream stream aborts mid-body
/// (§4.4, §9 open question: the account is reported but the stream is not
/// restarted — no reselection on an already-started response).
pub fn claude_error_event(message: &str) -> SseEvent {
    SseEvent {
        event: Some("error"),
        data: serde_json::json!({
            "type": "error",
            "error": { "type": "overloaded_error", "message": message },
        })
        .to_string(),
    }
}

pub fn openai_error_event(message: &str, code: &str) -> SseEvent {
    SseEvent {
        event: None,
        data: serde_json::json!({
            "error": { "message": message, "code": code },
        })
        .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::kiro_wire::{StopReason, Usage};
    use futures::stream;

    fn frame_sequence() -> Vec<Result<KiroFrame, UpstreamError>> {
        vec![
            Ok(KiroFrame::MessageStart { id: "m1".into(), model: "claude-opus-4-5".into() }),
            Ok(KiroFrame::ContentBlockStart { index: 0, block: ContentBlockStart::Text }),
            Ok(KiroFrame::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta { text: "hi".into() },
            }),
            Ok(KiroFrame::ContentBlockStop { index: 0 }),
            Ok(KiroFrame::ContentBlockStart {
                index: 1,
                block: ContentBlockStart::ToolUse { id: "t1".into(), name: "search".into() },
            }),
            Ok(KiroFrame::ContentBlockDelta {
                index: 1,
                delta: ContentDelta::InputJsonDelta { partial_json: "{}".into() },
            }),
            Ok(KiroFrame::ContentBlockStop { index: 1 }),
            Ok(KiroFrame::MessageDelta { stop_reason: StopReason::ToolUse, usage: Usage::default() }),
            Ok(KiroFrame::MessageStop),
        ]
    }

    #[tokio::test]
    async fn openai_stream_ends_with_done() {
        let events: Vec<_> = to_openai_sse(stream::iter(frame_sequence()), "m".to_string())
            .collect()
            .await;
        let last = events.last().unwrap().as_ref().unwrap();
        assert_eq!(last.data, "[DONE]");
    }

    #[tokio::test]
    async fn openai_stream_assigns_tool_call_index_zero_for_first_tool() {
        let events: Vec<_> = to_openai_sse(stream::iter(frame_sequence()), "m".to_string())
            .collect()
            .await;
        let found = events.iter().any(|e| {
            e.as_ref()
                .map(|ev| ev.data.contains("\"index\":0") && ev.data.contains("tool_calls"))
                .unwrap_or(false)
        });
        assert!(found);
    }

    #[tokio::test]
    async fn claude_stream_ends_with_message_stop_event() {
        let events: Vec<_> = to_claude_sse(stream::iter(frame_sequence()), "m".to_string())
            .collect()
            .await;
        let last = events.last().unwrap().as_ref().unwrap();
        assert_eq!(last.event, Some("message_stop"));
    }

    #[tokio::test]
    async fn claude_stream_opens_tool_use_block_with_name() {
        let events: Vec<_> = to_claude_sse(stream::iter(frame_sequence()), "m".to_string())
            .collect()
            .await;
        let found = events.iter().any(|e| {
            e.as_ref()
                .map(|ev| ev.data.contains("\"tool_use\"") && ev.data.contains("search"))
                .unwrap_or(false)
        });
        assert!(found);
    }

    #[tokio::test]
    async fn upstream_error_propagates_and_stops_stream() {
        let frames = vec![
            Ok(KiroFrame::MessageStart { id: "m1".into(), model: "m".into() }),
            Err(UpstreamError::Transient { status: Some(500), message: "boom".into() }),
        ];
        let events: Vec<_> = to_openai_sse(stream::iter(frames), "m".to_string())
            .collect()
            .await;
        assert!(events.last().unwrap().is_err());
    }
}
