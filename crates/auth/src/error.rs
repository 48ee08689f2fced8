use thiserror::Error;

/// Reasons a presented credential is rejected.
///
/// All variants are authentication failures: terminal, never retried, and
/// reported to the caller once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No `Authorization: Bearer` header was presented.
    #[error("missing credential, provide a bearer token")]
    Missing,

    /// The token could not be parsed, or its claims are not in the expected shape.
    #[error("malformed credential")]
    Malformed,

    /// The token's expiry has passed.
    #[error("credential expired")]
    Expired,

    /// The signature does not verify against the gateway's signing key.
    #[error("invalid credential signature")]
    BadSignature,
}

/// Failure to sign a new credential.
#[derive(Debug, Error)]
#[error("failed to sign credential: {0}")]
pub struct MintError(#[from] pub(crate) jwt_compact::CreationError);
