//! Credential signing and expiry settings.

use secrecy::SecretString;
use serde::Deserialize;

/// Credential signing and expiry settings.
///
/// The secret must be at least 32 bytes; this is enforced when the signer is
/// constructed, not at deserialization time, so a missing secret produces a
/// startup error rather than a config parse error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsConfig {
    /// HMAC signing secret for issued credentials.
    pub secret: Option<SecretString>,
    /// Credential lifetime in seconds for non-admin roles.
    pub expiration: u64,
    /// Credential lifetime in seconds for the admin role.
    pub admin_expiration: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            secret: None,
            expiration: 86400,
            admin_expiration: 3600,
        }
    }
}
