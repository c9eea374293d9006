//! Bidirectional converters between the two client-facing wire dialects
//! (OpenAI `chat/completions`, Claude `messages`) and the shared internal
//! representation defined in [`crate::upstream::kiro_wire`] (§4.4).
//!
//! Translation is organized as: client dialect → [`InternalRequest`] →
//! upstream call → [`InternalResponse`]/[`KiroFrame`] stream → client
//! dialect. Each dialect module owns its own request/response/chunk types
//! and the `From`/`to_internal` conversions; [`stream`] owns the
//! frame-to-SSE sequencing shared by both directions.

pub mod claude;
pub mod openai;
pub mod stream;

/// Global system prompt injection (§4.4): for OpenAI requests it is
/// prepended as a leading `system` message; for Claude requests it is
/// concatenated ahead of the request's own `system` field.
pub fn combine_system_prompt(configured: &str, request_system: Option<&str>) -> Option<String> {
    match (configured.trim(), request_system) {
        ("", None) => None,
        ("", Some(r)) => Some(r.to_string()),
        (c, None) => Some(c.to_string()),
        (c, Some(r)) => Some(format!("{c}\n\n{r}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_both_when_present() {
        assert_eq!(
            combine_system_prompt("global", Some("request")),
            Some("global\n\nrequest".to_string())
        );
    }

    #[test]
    fn falls_back_to_whichever_is_present() {
        assert_eq!(combine_system_prompt("", Some("request")), Some("request".to_string()));
        assert_eq!(combine_system_prompt("global", None), Some("global".to_string()));
        assert_eq!(combine_system_prompt("", None), None);
    }
}
