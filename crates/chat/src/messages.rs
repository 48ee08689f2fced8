use serde::{Deserialize, Serialize};

/// Chat request body accepted on `/chat/{provider}`.
///
/// Wire names are camelCase for the existing web clients. Validation is
/// manual in the handler: by the time the body is parsed, the response is
/// already committed to a streaming content type, so declarative rejection
/// would not reach the client as a readable chunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The registered model to chat with.
    pub model_name: String,
    /// The user prompt.
    pub content: String,
    /// Prompt modality code: 0 text, 1 image, 2 voice, 3 video.
    #[serde(default)]
    pub content_type: i64,
    /// When set, history retrieval is bypassed and a fresh context starts.
    #[serde(default)]
    pub is_new_chat: bool,
    /// Requested number of history exchanges; clamped to the model maximum.
    #[serde(default)]
    pub his_msg_number: Option<i64>,
}

/// One turn handed to the upstream model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced the turn.
    pub role: TurnRole,
    /// The turn text.
    pub content: String,
}

/// Speaker of a history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The end user.
    User,
    /// The model.
    Assistant,
}

/// The client-facing streaming unit, decoupled from any upstream wire format.
///
/// Every chunk carries a content delta (possibly empty) and the provider's
/// correlation id when one was reported. `first` additionally carries bot and
/// caller identity; `last` carries the aggregated token usage; `error` is the
/// in-band failure report that keeps the stream from dying silently.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatChunk {
    /// The first chunk of a stream, stamped with identity metadata.
    First {
        /// The model that serves the call; the upstream-reported name wins
        /// over the requested one, the upstream being authoritative.
        bot_name: String,
        /// The caller's external id.
        user_id: String,
        /// The caller's display name.
        user_name: String,
        /// Extracted provider fields.
        #[serde(flatten)]
        payload: ChunkPayload,
    },
    /// Any chunk between the first and the terminal one.
    Middle {
        /// Extracted provider fields.
        #[serde(flatten)]
        payload: ChunkPayload,
    },
    /// The terminal chunk, carrying the upstream-reported token usage.
    Last {
        /// Extracted provider fields.
        #[serde(flatten)]
        payload: ChunkPayload,
        /// Aggregated token counters.
        usage: ChunkUsage,
    },
    /// An in-band failure report.
    Error {
        /// The failure detail.
        error: ErrorChunk,
    },
}

/// Fields extracted from one raw provider chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkPayload {
    /// Provider-assigned correlation id, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Content delta; may be empty.
    pub content: String,
    /// Provider finish reason, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token usage reported by the terminal chunk.
///
/// With merged history, `prompt_tokens` covers the history turns too, not
/// just the newest user prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkUsage {
    /// Tokens consumed by the prompt side.
    pub prompt_tokens: i64,
    /// Tokens generated for the answer.
    pub answer_tokens: i64,
    /// Total billed tokens.
    pub total_tokens: i64,
}

/// An in-band error report, emitted instead of aborting the stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorChunk {
    /// Classified failure kind.
    pub kind: ErrorChunkKind,
    /// HTTP-equivalent status code for the failure.
    pub code: u16,
    /// User-safe message.
    pub message: String,
    /// The raw chunk that triggered the failure, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_chunk: Option<String>,
    /// Epoch milliseconds at which the failure was observed.
    pub timestamp: i64,
    /// A freshly minted credential, present only on membership demotion so
    /// the client can continue as the lower tier without re-login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Classified failure kinds carried by error chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorChunkKind {
    /// The caller's credential was rejected.
    AuthenticationFailure,
    /// The caller's role is not entitled to the model.
    AuthorizationFailure,
    /// The caller's paid membership lapsed; a fresh credential is attached.
    EntitlementLapsed,
    /// The request itself was unusable (blank prompt, unknown model).
    InvalidRequest,
    /// The upstream could not be reached after bounded retries.
    UpstreamConnectionError,
    /// The upstream answered with a non-success status or unusable body.
    UpstreamProtocolError,
    /// One raw chunk could not be parsed; the stream continues.
    JsonMalformed,
    /// One canonical chunk could not be built; the stream continues.
    BuildFailure,
    /// Anything else.
    Unknown,
}
