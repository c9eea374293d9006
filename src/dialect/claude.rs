//! Claude-compatible `messages` request/response types and their
//! conversion to/from the shared internal representation (§4.4).

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::upstream::kiro_wire::{
    ContentBlock, InternalMessage, InternalRequest, InternalResponse, Role, StopReason,
    ToolDefinition, Usage,
};

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default)]
    pub system: Option<String>,
    pub messages: Vec<ClaudeMessage>,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<ClaudeTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: ClaudeContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClaudeContent {
    Text(String),
    Blocks(Vec<ClaudeContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ClaudeToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClaudeToolResultContent {
    Text(String),
    Blocks(Vec<ClaudeContentBlock>),
}

impl ClaudeToolResultContent {
    fn to_text(&self) -> String {
        match self {
            ClaudeToolResultContent::Text(t) => t.clone(),
            ClaudeToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ClaudeContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

impl MessagesRequest {
    /// Converts to the shared internal representation. Per §4.4, the
    /// configured global system prompt is concatenated ahead of the
    /// request's own `system` string (rather than injected as a message,
    /// as in the OpenAI dialect).
    pub fn to_internal(&self, system_prompt: &str) -> Result<InternalRequest, GatewayError> {
        let mut messages = Vec::new();

        for m in &self.messages {
            let role = match m.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    return Err(GatewayError::InvalidRequest(format!(
                        "unsupported message role: {other}"
                    )))
                }
            };

            let content = match &m.content {
                ClaudeContent::Text(t) => vec![ContentBlock::Text { text: t.clone() }],
                ClaudeContent::Blocks(blocks) => blocks
                    .iter()
                    .map(|b| match b {
                        ClaudeContentBlock::Text { text } => ContentBlock::Text { text: text.clone() },
                        ClaudeContentBlock::ToolUse { id, name, input } => ContentBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        },
                        ClaudeContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => ContentBlock::ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            content: content.to_text(),
                            is_error: *is_error,
                        },
                    })
                    .collect(),
            };

            messages.push(InternalMessage { role, content });
        }

        let system = crate::dialect::combine_system_prompt(system_prompt, self.system.as_deref());

        let tools = self
            .tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        Ok(InternalRequest {
            model: self.model.clone(),
            system,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tools,
            stream: self.stream,
        })
    }
}

// ---- Response types ------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<ResponseContentBlock>,
    pub stop_reason: &'static str,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaudeUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl From<Usage> for ClaudeUsage {
    fn from(u: Usage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }
    }
}

pub fn stop_reason_str(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::MaxTokens => "max_tokens",
        StopReason::ToolUse => "tool_use",
        StopReason::StopSequence => "stop_sequence",
    }
}

impl MessagesResponse {
    pub fn from_internal(resp: InternalResponse) -> Self {
        let content = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(ResponseContentBlock::Text { text }),
                ContentBlock::ToolUse { id, name, input } => {
                    Some(ResponseContentBlock::ToolUse { id, name, input })
                }
                ContentBlock::ToolResult { .. } => None,
            })
            .collect();

        Self {
            id: resp.id,
            response_type: "message",
            role: "assistant",
            model: resp.model,
            content,
            stop_reason: stop_reason_str(resp.stop_reason),
            usage: resp.usage.into(),
        }
    }
}

/// Dialect-specific error body (§4.5, §7).
#[derive(Debug, Serialize)]
pub struct ClaudeErrorBody {
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub error: ClaudeErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ClaudeErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> MessagesRequest {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn system_prompt_is_concatenated_not_replaced() {
        let req = request(
            r#"{"model":"claude-opus-4-5","system":"request-level","max_tokens":100,"messages":[
                {"role":"user","content":"hi"}
            ]}"#,
        );
        let internal = req.to_internal("global").unwrap();
        assert_eq!(internal.system.as_deref(), Some("global\n\nrequest-level"));
    }

    #[test]
    fn tool_result_block_flattens_to_text() {
        let req = request(
            r#"{"model":"m","max_tokens":10,"messages":[
                {"role":"user","content":[
                    {"type":"tool_result","tool_use_id":"t1","content":"42"}
                ]}
            ]}"#,
        );
        let internal = req.to_internal("").unwrap();
        match &internal.messages[0].content[0] {
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                assert_eq!(tool_use_id, "t1");
                assert_eq!(content, "42");
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn string_content_shorthand_becomes_single_text_block() {
        let req = request(
            r#"{"model":"m","max_tokens":10,"messages":[{"role":"user","content":"hello"}]}"#,
        );
        let internal = req.to_internal("").unwrap();
        assert_eq!(internal.messages[0].content.len(), 1);
    }
}
