mod input;
mod output;

use self::output::BailianStreamChunk;
use crate::{
    error::ChatError,
    messages::{ChatChunk, ChunkUsage, Turn},
    provider::{CallerIdentity, Reframer},
};

pub(crate) const PROVIDER: &str = "bailian";

/// Reframer for the Alibaba Bailian (DashScope) text generation stream.
///
/// DashScope nests its payload: deltas under
/// `output.choices[0].message.content`, the terminal marker a
/// `finish_reason` of `"stop"` next to the message, and usage counters named
/// `input_tokens`/`output_tokens`. Non-terminal chunks report the literal
/// string `"null"` as their finish reason. Streaming must be enabled with
/// the `X-DashScope-SSE` request header.
pub(crate) struct BailianReframer;

impl Reframer for BailianReframer {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn build_request(&self, params: &serde_json::Value, turns: &[Turn]) -> serde_json::Value {
        input::build_request(params, turns)
    }

    fn streaming_headers(&self) -> &'static [(&'static str, &'static str)] {
        &[("X-DashScope-SSE", "enable")]
    }

    fn is_terminal(&self, raw: &str) -> bool {
        match sonic_rs::from_str::<BailianStreamChunk>(raw) {
            Ok(chunk) => chunk.is_terminal(),
            Err(_) => false,
        }
    }

    fn delta(&self, raw: &str) -> String {
        match sonic_rs::from_str::<BailianStreamChunk>(raw) {
            Ok(chunk) => chunk.delta().to_string(),
            Err(e) => {
                log::warn!("Failed to scan bailian chunk for content: {e}");
                String::new()
            }
        }
    }

    fn usage(&self, raw: &str) -> ChunkUsage {
        sonic_rs::from_str::<BailianStreamChunk>(raw)
            .map(|chunk| chunk.usage())
            .unwrap_or_default()
    }

    fn first(&self, raw: &str, caller: &CallerIdentity) -> Result<ChatChunk, ChatError> {
        let chunk = parse(raw)?;

        Ok(ChatChunk::First {
            bot_name: chunk
                .model
                .clone()
                .unwrap_or_else(|| caller.requested_model.clone()),
            user_id: caller.user_id.clone(),
            user_name: caller.user_name.clone(),
            payload: chunk.payload(),
        })
    }

    fn middle(&self, raw: &str) -> Result<ChatChunk, ChatError> {
        let chunk = parse(raw)?;

        Ok(ChatChunk::Middle {
            payload: chunk.payload(),
        })
    }

    fn last(&self, raw: &str) -> Result<ChatChunk, ChatError> {
        let chunk = parse(raw)?;

        Ok(ChatChunk::Last {
            usage: chunk.usage(),
            payload: chunk.payload(),
        })
    }
}

fn parse(raw: &str) -> Result<BailianStreamChunk, ChatError> {
    sonic_rs::from_str(raw).map_err(|e| ChatError::MalformedChunk(e.to_string()))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const MIDDLE: &str = indoc! {r#"
        {"request_id":"rid-42","output":{"choices":[{"message":{"role":"assistant","content":"海"},
         "finish_reason":"null"}]}}
    "#};

    const LAST: &str = indoc! {r#"
        {"request_id":"rid-42","output":{"choices":[{"message":{"role":"assistant","content":""},
         "finish_reason":"stop"}]},
         "usage":{"input_tokens":21,"output_tokens":34,"total_tokens":55}}
    "#};

    fn caller() -> CallerIdentity {
        CallerIdentity {
            requested_model: "qwen-turbo".to_string(),
            user_id: "u-1".to_string(),
            user_name: "alice".to_string(),
        }
    }

    #[test]
    fn terminal_marker_ignores_null_string() {
        let reframer = BailianReframer;

        assert!(!reframer.is_terminal(MIDDLE));
        assert!(reframer.is_terminal(LAST));
        assert!(!reframer.is_terminal(r#"{"output":{"choices":[]}}"#));
    }

    #[test]
    fn delta_is_extracted_from_nested_message() {
        assert_eq!(BailianReframer.delta(MIDDLE), "海");
        assert_eq!(BailianReframer.delta(LAST), "");
    }

    #[test]
    fn first_uses_requested_model_when_upstream_reports_none() {
        let ChatChunk::First { bot_name, payload, .. } = BailianReframer.first(MIDDLE, &caller()).unwrap() else {
            unreachable!("expected a first chunk");
        };

        assert_eq!(bot_name, "qwen-turbo");
        assert_eq!(payload.id.as_deref(), Some("rid-42"));
        assert_eq!(payload.content, "海");
    }

    #[test]
    fn last_carries_dashscope_usage_names() {
        let ChatChunk::Last { usage, .. } = BailianReframer.last(LAST).unwrap() else {
            unreachable!("expected a last chunk");
        };

        assert_eq!(usage.prompt_tokens, 21);
        assert_eq!(usage.answer_tokens, 34);
        assert_eq!(usage.total_tokens, 55);
    }

    #[test]
    fn streaming_header_is_declared() {
        assert_eq!(BailianReframer.streaming_headers(), &[("X-DashScope-SSE", "enable")]);
    }
}
