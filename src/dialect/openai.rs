//! OpenAI-compatible `chat/completions` request/response types and their
//! conversion to/from the shared internal representation (§4.4).

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::upstream::kiro_wire::{
    ContentBlock, InternalMessage, InternalRequest, InternalResponse, Role, StopReason,
    ToolDefinition, Usage,
};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<OpenAiTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<OpenAiContent>,
    #[serde(default)]
    pub tool_calls: Vec<OpenAiToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    /// Arguments arrive as a JSON-encoded string in the OpenAI dialect.
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ChatCompletionRequest {
    /// Converts to the shared internal representation, prepending the
    /// combined system prompt as a leading `system` message (§4.4).
    pub fn to_internal(&self, system_prompt: &str) -> Result<InternalRequest, GatewayError> {
        let mut messages = Vec::new();
        let mut leading_system: Option<String> = None;

        for m in &self.messages {
            if m.role == "system" {
                let text = content_to_text(m.content.as_ref());
                leading_system = Some(match leading_system {
                    Some(existing) => format!("{existing}\n{text}"),
                    None => text,
                });
                continue;
            }

            let role = match m.role.as_str() {
                "user" | "tool" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    return Err(GatewayError::InvalidRequest(format!(
                        "unsupported message role: {other}"
                    )))
                }
            };

            let mut content = Vec::new();
            if let Some(tool_call_id) = &m.tool_call_id {
                content.push(ContentBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: content_to_text(m.content.as_ref()),
                    is_error: false,
                });
            } else {
                let text = content_to_text(m.content.as_ref());
                if !text.is_empty() {
                    content.push(ContentBlock::Text { text });
                }
                for tc in &m.tool_calls {
                    let input = serde_json::from_str(&tc.function.arguments)
                        .unwrap_or(serde_json::Value::Null);
                    content.push(ContentBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        input,
                    });
                }
            }

            messages.push(InternalMessage { role, content });
        }

        let system = crate::dialect::combine_system_prompt(
            system_prompt,
            leading_system.as_deref(),
        );

        let tools = self
            .tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone(),
            })
            .collect();

        Ok(InternalRequest {
            model: self.model.clone(),
            system,
            messages,
            max_tokens: self.max_tokens.unwrap_or(4096),
            temperature: self.temperature,
            tools,
            stream: self.stream,
        })
    }
}

fn content_to_text(content: Option<&OpenAiContent>) -> String {
    match content {
        None => String::new(),
        Some(OpenAiContent::Text(t)) => t.clone(),
        Some(OpenAiContent::Parts(parts)) => parts
            .iter()
            .filter_map(|p| p.text.clone())
            .collect::<Vec<_>>()
            .join(""),
    }
}

// ---- Response types ------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: OpenAiUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatChoiceMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatChoiceMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<Usage> for OpenAiUsage {
    fn from(u: Usage) -> Self {
        Self {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        }
    }
}

pub fn finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "stop",
        StopReason::MaxTokens => "length",
        StopReason::ToolUse => "tool_calls",
        StopReason::StopSequence => "stop",
    }
}

impl ChatCompletionResponse {
    pub fn from_internal(resp: InternalResponse, created: i64) -> Self {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in resp.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(&t),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ChatToolCall {
                        id,
                        tool_type: "function",
                        function: ChatFunctionCall {
                            name,
                            arguments: input.to_string(),
                        },
                    });
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }

        Self {
            id: resp.id,
            object: "chat.completion",
            created,
            model: resp.model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatChoiceMessage {
                    role: "assistant",
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls,
                },
                finish_reason: finish_reason(resp.stop_reason),
            }],
            usage: resp.usage.into(),
        }
    }
}

// ---- Streaming chunk shape -----------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkToolCall {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<&'static str>,
    pub function: ChunkFunctionCall,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChunkFunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> ChatCompletionRequest {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn system_message_merges_with_configured_prompt() {
        let req = request(
            r#"{"model":"claude-opus-4-5","messages":[
                {"role":"system","content":"be terse"},
                {"role":"user","content":"hi"}
            ]}"#,
        );
        let internal = req.to_internal("global rules").unwrap();
        assert_eq!(internal.system.as_deref(), Some("global rules\n\nbe terse"));
        assert_eq!(internal.messages.len(), 1);
    }

    #[test]
    fn tool_call_round_trips_into_tool_use_block() {
        let req = request(
            r#"{"model":"m","messages":[
                {"role":"assistant","content":null,"tool_calls":[
                    {"id":"call_1","function":{"name":"search","arguments":"{\"q\":\"rust\"}"}}
                ]}
            ]}"#,
        );
        let internal = req.to_internal("").unwrap();
        match &internal.messages[0].content[0] {
            ContentBlock::ToolUse { id, name, .. } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "search");
            }
            other => panic!("expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        let req = request(r#"{"model":"m","messages":[{"role":"bogus","content":"x"}]}"#);
        assert!(req.to_internal("").is_err());
    }
}
