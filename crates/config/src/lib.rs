//! Botgate configuration structures to map the botgate.toml configuration.

#![deny(missing_docs)]

mod cors;
mod credentials;
mod database;
mod membership;
mod providers;
mod server;

use std::path::Path;

use anyhow::Context;
pub use cors::{AnyOrUrlArray, CorsConfig, HttpMethod};
pub use credentials::CredentialsConfig;
pub use database::DatabaseConfig;
pub use membership::MembershipConfig;
pub use providers::{ProvidersConfig, UpstreamConfig};
use serde::Deserialize;
pub use server::{HealthConfig, ServerConfig};

/// Main configuration structure for the botgate application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Credential signing and expiry settings.
    pub credentials: CredentialsConfig,
    /// Relational store settings.
    pub database: DatabaseConfig,
    /// Paid-tier membership durations.
    pub membership: MembershipConfig,
    /// Upstream LLM provider settings.
    pub providers: ProvidersConfig,
}

impl Config {
    /// Load configuration from a TOML file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration from {}", path.display()))?;

        Ok(config)
    }
}
