use serde::Deserialize;

use crate::messages::{ChunkPayload, ChunkUsage};

/// One raw streaming chunk from the DashScope text generation endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct BailianStreamChunk {
    #[serde(default)]
    pub request_id: Option<String>,
    /// Rarely present; when it is, it names the exact model that served the
    /// call and wins over the requested name.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub output: Option<BailianOutput>,
    #[serde(default)]
    pub usage: Option<BailianUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BailianOutput {
    #[serde(default)]
    pub choices: Vec<BailianChoice>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BailianChoice {
    #[serde(default)]
    pub message: Option<BailianMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BailianMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub(super) struct BailianUsage {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

impl BailianStreamChunk {
    /// The terminal marker: `output.choices[0].finish_reason == "stop"`.
    /// DashScope reports the literal string `"null"` on non-terminal chunks.
    pub fn is_terminal(&self) -> bool {
        self.finish_reason().is_some_and(|reason| reason.trim() == "stop")
    }

    pub fn delta(&self) -> &str {
        self.first_choice()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.as_deref())
            .unwrap_or_default()
    }

    pub fn usage(&self) -> ChunkUsage {
        self.usage
            .map(|usage| ChunkUsage {
                prompt_tokens: usage.input_tokens,
                answer_tokens: usage.output_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default()
    }

    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            id: self.request_id.clone(),
            content: self.delta().to_string(),
            finish_reason: self.finish_reason().map(str::to_string),
        }
    }

    fn first_choice(&self) -> Option<&BailianChoice> {
        self.output.as_ref().and_then(|output| output.choices.first())
    }

    fn finish_reason(&self) -> Option<&str> {
        self.first_choice().and_then(|choice| choice.finish_reason.as_deref())
    }
}
