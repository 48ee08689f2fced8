//! Credential minting and validation for the botgate gateway.
//!
//! Credentials are HS256-signed tokens carrying the caller's subject (email),
//! role authorities, nickname and a version-fencing counter. Validation here
//! is pure: the version comparison against the authoritative store happens in
//! the entitlement check, which requires a lookup.

#![deny(missing_docs)]

mod claims;
mod error;
mod role;

use anyhow::bail;
use chrono::Duration;
use claims::CredentialClaims;
use config::CredentialsConfig;
pub use error::{CredentialError, MintError};
use jwt_compact::{
    AlgorithmExt, Claims, Header, TimeOptions, UntrustedToken, ValidationError,
    alg::{Hs256, Hs256Key},
};
pub use role::Role;
use secrecy::ExposeSecret;

const BEARER_PREFIX_LENGTH: usize = 6;

/// The validated identity extracted from a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user identifier (email).
    pub subject: String,
    /// The role the credential was minted with.
    pub role: Role,
    /// Display name, echoed into first chunks and persisted exchanges.
    pub nickname: String,
    /// Version-fencing counter; must equal the stored value to be honored.
    pub version: i64,
}

/// Signs and validates gateway credentials.
pub struct CredentialGuard {
    key: Hs256Key,
    expiration: u64,
    admin_expiration: u64,
}

impl CredentialGuard {
    /// Build a guard from configuration.
    ///
    /// Fails when no secret is configured or the secret is shorter than the
    /// 256 bits HS256 requires.
    pub fn new(config: &CredentialsConfig) -> anyhow::Result<Self> {
        let Some(secret) = &config.secret else {
            bail!("no credential secret configured, set credentials.secret");
        };

        let secret = secret.expose_secret();

        if secret.len() < 32 {
            bail!("credential secret must be at least 32 bytes");
        }

        Ok(Self {
            key: Hs256Key::new(secret.as_bytes()),
            expiration: config.expiration,
            admin_expiration: config.admin_expiration,
        })
    }

    /// Mint a credential for the given identity fields.
    ///
    /// Issued on login and on membership demotion. Admins get the shorter
    /// configured lifetime.
    pub fn mint(&self, subject: &str, role: Role, nickname: &str, version: i64) -> Result<String, MintError> {
        let lifetime = if role == Role::Admin {
            self.admin_expiration
        } else {
            self.expiration
        };

        let claims = Claims::new(CredentialClaims {
            sub: subject.to_string(),
            roles: vec![role.authority().to_string()],
            nick_name: nickname.to_string(),
            token_version: version,
        })
        .set_duration_and_issuance(&TimeOptions::default(), Duration::seconds(lifetime as i64));

        let token = Hs256.token(&Header::empty(), &claims, &self.key)?;

        Ok(token)
    }

    /// Validate an `Authorization` header value and extract the identity.
    pub fn validate_bearer(&self, header: Option<&str>) -> Result<Identity, CredentialError> {
        let Some(header) = header else {
            return Err(CredentialError::Missing);
        };

        // RFC 7235: the authentication scheme is case-insensitive.
        if header.len() > BEARER_PREFIX_LENGTH
            && header[..BEARER_PREFIX_LENGTH].eq_ignore_ascii_case("bearer")
            && header.as_bytes()[BEARER_PREFIX_LENGTH] == b' '
        {
            let token = header[BEARER_PREFIX_LENGTH + 1..].trim();

            if token.is_empty() {
                return Err(CredentialError::Missing);
            }

            self.validate(token)
        } else {
            Err(CredentialError::Missing)
        }
    }

    /// Validate a bare token string and extract the identity.
    pub fn validate(&self, token: &str) -> Result<Identity, CredentialError> {
        let untrusted = UntrustedToken::new(token).map_err(|_| CredentialError::Malformed)?;

        let token: jwt_compact::Token<CredentialClaims> =
            Hs256.validator(&self.key).validate(&untrusted).map_err(|e| match e {
                ValidationError::InvalidSignature => CredentialError::BadSignature,
                _ => CredentialError::Malformed,
            })?;

        let claims = token.claims();

        claims
            .validate_expiration(&TimeOptions::default())
            .map_err(|_| CredentialError::Expired)?;

        let custom = &claims.custom;

        let Some(role) = custom.roles.first().and_then(|name| Role::parse(name)) else {
            log::debug!("Credential for {} carries no recognizable role", custom.sub);
            return Err(CredentialError::Malformed);
        };

        Ok(Identity {
            subject: custom.sub.clone(),
            role,
            nickname: custom.nick_name.clone(),
            version: custom.token_version,
        })
    }
}
