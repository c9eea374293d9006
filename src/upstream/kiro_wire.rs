//! Wire types for the upstream Kiro dialect and the shared internal
//! representation the OpenAI/Claude converters translate through (§4.4).
//!
//! Kiro's request/response shape is intentionally close to Claude's (role +
//! content-block messages, a single top-level `system` string, streamed
//! frames that open/close content blocks) since both client dialects need to
//! round-trip tool calls through it without losing structure (§9).

use serde::{Deserialize, Serialize};

/// A role-tagged message in the shared internal representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One block of message content — text, a tool invocation, or a tool
/// result. Assistant messages may carry any number of interleaved text and
/// tool-use blocks; user messages carry tool-result blocks when replying to
/// a prior tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
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
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A single message in the shared internal representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InternalMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// A tool definition forwarded to the upstream verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// The dialect-neutral request both converters build before handing off to
/// the upstream service (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<InternalMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
}

/// Token accounting returned alongside a completed response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A full (non-streamed) upstream response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

/// One logical upstream streaming event (§4.3: "each frame is one logical
/// upstream event"). The streaming decoder in `dialect::stream` consumes a
/// finite, non-restartable sequence of these and materializes the
/// dialect-appropriate SSE sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KiroFrame {
    MessageStart { id: String, model: String },
    ContentBlockStart { index: u32, block: ContentBlockStart },
    ContentBlockDelta { index: u32, delta: ContentDelta },
    ContentBlockStop { index: u32 },
    MessageDelta { stop_reason: StopReason, usage: Usage },
    MessageStop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum ContentBlockStart {
    Text,
    ToolUse { id: String, name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "delta_type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

/// Usage/quota object returned by `getUsageLimits` (§4.1 usage syncer).
#[derive(Debug, Clone, Deserialize)]
pub struct UsageLimitsResponse {
    pub account_type: Option<String>,
    pub usage_breakdown: Vec<UsageBreakdownEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageBreakdownEntry {
    #[serde(default)]
    pub base_used: f64,
    #[serde(default)]
    pub base_limit: f64,
    #[serde(default)]
    pub free_trial_used: f64,
    #[serde(default)]
    pub free_trial_limit: f64,
    #[serde(default)]
    pub bonus_used: f64,
    #[serde(default)]
    pub bonus_limit: f64,
}

impl UsageBreakdownEntry {
    pub fn used(&self) -> f64 {
        self.base_used + self.free_trial_used + self.bonus_used
    }

    pub fn limit(&self) -> f64 {
        self.base_limit + self.free_trial_limit + self.bonus_limit
    }

    pub fn percent(&self) -> f64 {
        if self.limit() <= 0.0 {
            0.0
        } else {
            (self.used() / self.limit()) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_breakdown_sums_all_three_buckets() {
        let entry = UsageBreakdownEntry {
            base_used: 10.0,
            base_limit: 100.0,
            free_trial_used: 5.0,
            free_trial_limit: 50.0,
            bonus_used: 1.0,
            bonus_limit: 10.0,
        };
        assert_eq!(entry.used(), 16.0);
        assert_eq!(entry.limit(), 160.0);
        assert!((entry.percent() - 10.0).abs() < 0.01);
    }

    #[test]
    fn content_block_serializes_with_type_tag() {
        let block = ContentBlock::ToolUse {
            id: "tu_1".to_string(),
            name: "search".to_string(),
            input: serde_json::json!({"q": "rust"}),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
    }
}
