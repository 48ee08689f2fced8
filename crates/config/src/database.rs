//! Relational store settings.

use serde::Deserialize;

/// Relational store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `sqlite://botgate.db`.
    pub url: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://botgate.db?mode=rwc".to_string(),
            max_connections: 16,
        }
    }
}
