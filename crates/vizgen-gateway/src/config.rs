//! Gateway configuration
//!
//! Providers are declared by name; routes map capability ids to provider
//! names. A capability is resolved by exact route, then by its prefix
//! before the first `.` (`vote.qwen` falls back to `vote`), then by the
//! default provider.
//!
//! API keys never live in config: each provider names the environment
//! variable holding its key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Gemini public endpoint
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// OpenRouter endpoint (OpenAI-compatible)
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Google Gemini `generateContent`
    Gemini,
    /// OpenAI-compatible `chat/completions` (OpenRouter, vLLM, ...)
    OpenaiCompatible,
}

impl ProviderKind {
    /// Default base URL for this kind
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Gemini => GEMINI_BASE_URL,
            Self::OpenaiCompatible => OPENROUTER_BASE_URL,
        }
    }
}

/// One provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wire protocol
    pub kind: ProviderKind,
    /// Model name
    pub model: String,
    /// Base URL (defaults per kind)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Output token cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    /// Effective base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
            .trim_end_matches('/')
    }
}

/// Retry policy for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each retry
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based)
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Providers by name
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Capability (or capability prefix) to provider name
    pub routes: BTreeMap<String, String>,
    /// Provider for unrouted capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    /// Retry policy
    pub retry: RetryPolicy,
    /// TCP connect timeout, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

impl GatewayConfig {
    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// Returns [`GatewayConfigError`] for malformed or inconsistent
    /// configuration.
    pub fn from_toml_str(text: &str) -> Result<Self, GatewayConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    ///
    /// # Errors
    /// As [`GatewayConfig::from_toml_str`], plus I/O errors.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check providers and routes are consistent
    ///
    /// # Errors
    /// Returns [`GatewayConfigError::Invalid`] for missing providers,
    /// empty models or dangling routes.
    pub fn validate(&self) -> Result<(), GatewayConfigError> {
        if self.providers.is_empty() {
            return Err(GatewayConfigError::Invalid("no providers configured".into()));
        }
        for (name, provider) in &self.providers {
            if provider.model.trim().is_empty() {
                return Err(GatewayConfigError::Invalid(format!("provider '{name}' has no model")));
            }
            if provider.api_key_env.trim().is_empty() {
                return Err(GatewayConfigError::Invalid(format!(
                    "provider '{name}' has no api_key_env"
                )));
            }
        }
        for (capability, provider) in &self.routes {
            if !self.providers.contains_key(provider) {
                return Err(GatewayConfigError::Invalid(format!(
                    "route '{capability}' targets unknown provider '{provider}'"
                )));
            }
        }
        if let Some(default) = &self.default_provider {
            if !self.providers.contains_key(default) {
                return Err(GatewayConfigError::Invalid(format!(
                    "default provider '{default}' is not configured"
                )));
            }
        }
        Ok(())
    }

    /// Provider name answering a capability
    #[must_use]
    pub fn route(&self, capability: &str) -> Option<&str> {
        let prefix = capability.split_once('.').map(|(head, _)| head);
        self.routes
            .get(capability)
            .or_else(|| prefix.and_then(|head| self.routes.get(head)))
            .or(self.default_provider.as_ref())
            .map(String::as_str)
    }
}

/// Gateway configuration error
#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    /// Config file could not be read
    #[error("failed to read gateway config: {0}")]
    Io(#[from] std::io::Error),

    /// Config is not valid TOML for the expected shape
    #[error("failed to parse gateway config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config is inconsistent
    #[error("invalid gateway config: {0}")]
    Invalid(String),

    /// API key variable is unset
    #[error("provider '{provider}' needs an API key in ${var}")]
    MissingApiKey { provider: String, var: String },

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        default_provider = "gemini"

        [retry]
        max_retries = 3

        [providers.gemini]
        kind = "gemini"
        model = "gemini-2.0-flash"
        api_key_env = "GEMINI_API_KEY"

        [providers.qwen]
        kind = "openai_compatible"
        model = "qwen/qwen-2.5-coder-32b-instruct"
        api_key_env = "OPENROUTER_API_KEY"
        temperature = 0.2

        [routes]
        vote = "qwen"
        "vote.gemini" = "gemini"
        sanitize_secondary = "qwen"
    "#;

    #[test]
    fn parses_sample() {
        let config = GatewayConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_backoff_ms, 1000);
        assert_eq!(config.providers["qwen"].kind, ProviderKind::OpenaiCompatible);
        assert_eq!(config.providers["gemini"].base_url(), GEMINI_BASE_URL);
    }

    #[test]
    fn routes_by_exact_then_prefix_then_default() {
        let config = GatewayConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.route("vote.gemini"), Some("gemini"));
        assert_eq!(config.route("vote.llama"), Some("qwen"));
        assert_eq!(config.route("sanitize_secondary"), Some("qwen"));
        assert_eq!(config.route("generate"), Some("gemini"));

        let no_default = GatewayConfig {
            default_provider: None,
            ..config
        };
        assert_eq!(no_default.route("generate"), None);
    }

    #[test]
    fn rejects_dangling_route() {
        let err = GatewayConfig::from_toml_str(
            r#"
            [providers.gemini]
            kind = "gemini"
            model = "gemini-2.0-flash"
            api_key_env = "GEMINI_API_KEY"

            [routes]
            generate = "claude"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayConfigError::Invalid(msg) if msg.contains("claude")));
    }

    #[test]
    fn rejects_empty_config() {
        assert!(GatewayConfig::from_toml_str("").is_err());
    }

    #[test]
    fn backoff_doubles() {
        let retry = RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 100,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let provider = ProviderConfig {
            kind: ProviderKind::OpenaiCompatible,
            model: "m".into(),
            base_url: Some("http://localhost:8000/v1/".into()),
            api_key_env: "KEY".into(),
            temperature: None,
            max_tokens: None,
        };
        assert_eq!(provider.base_url(), "http://localhost:8000/v1");
    }
}
