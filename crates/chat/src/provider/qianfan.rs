mod input;
mod output;

use self::output::QianfanStreamChunk;
use crate::{
    error::ChatError,
    messages::{ChatChunk, ChunkUsage, Turn},
    provider::{CallerIdentity, Reframer},
};

pub(crate) const PROVIDER: &str = "qianfan";

/// Reframer for the Baidu Qianfan chat completion stream.
///
/// Qianfan chunks follow the OpenAI wire shape: deltas under
/// `choices[0].delta.content`, the terminal marker a `finish_reason` of
/// `"stop"`, and usage counters named `prompt_tokens`/`completion_tokens`.
pub(crate) struct QianfanReframer;

impl Reframer for QianfanReframer {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn build_request(&self, params: &serde_json::Value, turns: &[Turn]) -> serde_json::Value {
        input::build_request(params, turns)
    }

    fn is_terminal(&self, raw: &str) -> bool {
        match sonic_rs::from_str::<QianfanStreamChunk>(raw) {
            Ok(chunk) => chunk.is_terminal(),
            Err(_) => false,
        }
    }

    fn delta(&self, raw: &str) -> String {
        match sonic_rs::from_str::<QianfanStreamChunk>(raw) {
            Ok(chunk) => chunk.delta().to_string(),
            Err(e) => {
                log::warn!("Failed to scan qianfan chunk for content: {e}");
                String::new()
            }
        }
    }

    fn usage(&self, raw: &str) -> ChunkUsage {
        sonic_rs::from_str::<QianfanStreamChunk>(raw)
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

fn parse(raw: &str) -> Result<QianfanStreamChunk, ChatError> {
    sonic_rs::from_str(raw).map_err(|e| ChatError::MalformedChunk(e.to_string()))
}
