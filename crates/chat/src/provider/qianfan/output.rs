use serde::Deserialize;

use crate::messages::{ChunkPayload, ChunkUsage};

/// One raw streaming chunk from the Qianfan chat completion endpoint.
///
/// Every field is optional: middles omit usage, the terminal chunk may carry
/// an empty delta, and unknown providers' quirks must not fail the parse.
#[derive(Debug, Deserialize)]
pub(super) struct QianfanStreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<QianfanChoice>,
    #[serde(default)]
    pub usage: Option<QianfanUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct QianfanChoice {
    #[serde(default)]
    pub delta: Option<QianfanDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct QianfanDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub(super) struct QianfanUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

impl QianfanStreamChunk {
    /// The terminal marker: `choices[0].finish_reason == "stop"`.
    pub fn is_terminal(&self) -> bool {
        self.finish_reason().is_some_and(|reason| reason.trim() == "stop")
    }

    pub fn delta(&self) -> &str {
        self.choices
            .first()
            .and_then(|choice| choice.delta.as_ref())
            .and_then(|delta| delta.content.as_deref())
            .unwrap_or_default()
    }

    pub fn usage(&self) -> ChunkUsage {
        self.usage
            .map(|usage| ChunkUsage {
                prompt_tokens: usage.prompt_tokens,
                answer_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default()
    }

    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            id: self.id.clone(),
            content: self.delta().to_string(),
            finish_reason: self.finish_reason().map(str::to_string),
        }
    }

    fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|choice| choice.finish_reason.as_deref())
    }
}
