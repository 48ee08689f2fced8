use axum::http::StatusCode;
use thiserror::Error;

use crate::messages::{ChatChunk, ErrorChunk, ErrorChunkKind};

/// Chat pipeline errors.
///
/// Anything that can be isolated to a single chunk is recovered locally and
/// reported as an in-band error chunk; anything that prevents establishing
/// the stream is reported once as the only chunk of the response.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The presented credential was rejected.
    #[error(transparent)]
    Authentication(#[from] auth::CredentialError),

    /// The credential's fencing version no longer matches the stored one.
    #[error("credential is no longer current, log in again")]
    StaleCredential,

    /// The caller's role is not in the model's allow-list.
    #[error("insufficient role for this model")]
    InsufficientRole,

    /// The caller's paid membership lapsed and the account was reset to the
    /// normal tier. A fresh credential accompanies the report.
    #[error("membership expired, account reset to normal tier")]
    MembershipLapsed,

    /// The prompt was blank.
    #[error("question must not be empty")]
    BlankPrompt,

    /// No model with the requested name is registered.
    #[error("model '{0}' is not registered")]
    UnknownModel(String),

    /// The model is registered for a different upstream than the one called.
    #[error("model '{model}' is not served by provider '{provider}'")]
    WrongProvider {
        /// The requested model.
        model: String,
        /// The provider path segment of the call.
        provider: String,
    },

    /// The model's upstream platform has no configured credentials.
    #[error("provider '{0}' is not configured")]
    ProviderNotConfigured(String),

    /// The upstream could not be reached; retried before surfacing.
    #[error("upstream connection failed: {0}")]
    UpstreamConnection(String),

    /// The upstream answered with a non-success status; never retried.
    #[error("upstream returned status {status}: {detail}")]
    UpstreamProtocol {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream response body.
        detail: String,
    },

    /// One raw chunk could not be parsed.
    #[error("malformed upstream chunk: {0}")]
    MalformedChunk(String),

    /// Storage failed while preparing the request.
    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    /// A replacement credential could not be signed.
    #[error(transparent)]
    Mint(#[from] auth::MintError),
}

impl ChatError {
    /// HTTP-equivalent status for the error chunk's `code` field.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) | Self::StaleCredential => StatusCode::UNAUTHORIZED,
            Self::InsufficientRole | Self::MembershipLapsed => StatusCode::FORBIDDEN,
            Self::BlankPrompt | Self::WrongProvider { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownModel(_) | Self::ProviderNotConfigured(_) => StatusCode::NOT_FOUND,
            Self::UpstreamConnection(_) | Self::UpstreamProtocol { .. } => StatusCode::BAD_GATEWAY,
            Self::MalformedChunk(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Storage(_) | Self::Mint(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The classified kind carried by the in-band error chunk.
    pub fn chunk_kind(&self) -> ErrorChunkKind {
        match self {
            Self::Authentication(_) | Self::StaleCredential => ErrorChunkKind::AuthenticationFailure,
            Self::InsufficientRole => ErrorChunkKind::AuthorizationFailure,
            Self::MembershipLapsed => ErrorChunkKind::EntitlementLapsed,
            Self::BlankPrompt | Self::UnknownModel(_) | Self::WrongProvider { .. } | Self::ProviderNotConfigured(_) => {
                ErrorChunkKind::InvalidRequest
            }
            Self::UpstreamConnection(_) => ErrorChunkKind::UpstreamConnectionError,
            Self::UpstreamProtocol { .. } => ErrorChunkKind::UpstreamProtocolError,
            Self::MalformedChunk(_) => ErrorChunkKind::JsonMalformed,
            Self::Storage(_) | Self::Mint(_) => ErrorChunkKind::Unknown,
        }
    }

    /// Render as an in-band error chunk.
    ///
    /// Internal failures do not leak details to the client; the full error is
    /// logged where it occurred.
    pub fn into_chunk(self) -> ChatChunk {
        self.into_chunk_with(None, None)
    }

    /// Render as an in-band error chunk, attaching the raw chunk that caused
    /// the failure or a replacement credential.
    pub fn into_chunk_with(self, raw_chunk: Option<String>, token: Option<String>) -> ChatChunk {
        let message = match &self {
            Self::Storage(_) | Self::Mint(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        ChatChunk::Error {
            error: ErrorChunk {
                kind: self.chunk_kind(),
                code: self.status_code().as_u16(),
                message,
                raw_chunk,
                timestamp: jiff::Timestamp::now().as_millisecond(),
                token,
            },
        }
    }
}
