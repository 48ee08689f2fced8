//! Upstream LLM provider settings.

use secrecy::SecretString;
use serde::Deserialize;

/// Upstream LLM provider settings, one optional table per supported backend.
///
/// A model whose registered provider has no configured table here cannot be
/// served; the gateway rejects the request before contacting the upstream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvidersConfig {
    /// Baidu Qianfan platform credentials and timeouts.
    pub qianfan: Option<UpstreamConfig>,
    /// Alibaba Bailian (DashScope) platform credentials and timeouts.
    pub bailian: Option<UpstreamConfig>,
}

/// Connection settings for one upstream platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Platform API key, injected as a bearer header on every call.
    pub api_key: SecretString,
    /// Whole-response timeout in milliseconds.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Read-idle timeout in milliseconds between streamed chunks.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_response_timeout_ms() -> u64 {
    30000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    30000
}
