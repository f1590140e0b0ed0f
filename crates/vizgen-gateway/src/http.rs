//! HTTP provider gateway
//!
//! One shared `reqwest::Client` for every provider. Each call:
//! - resolves the capability to a provider through the configured routes
//! - applies the caller's timeout to each attempt, and reports a call
//!   deadline wide enough for every retry
//! - retries connection failures, timeouts, 429 and 5xx with exponential
//!   backoff, up to `retry.max_retries` times
//! - maps everything else to a [`TransportError`] without retrying

use crate::config::{GatewayConfig, GatewayConfigError, RetryPolicy};
use crate::providers::Provider;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use vizgen_core::{ProviderGateway, ProviderRequest, TransportError};

/// Default connect timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in a [`TransportError::Status`]
const MAX_ERROR_BODY: usize = 512;

/// Gateway speaking HTTP to configured providers
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    providers: HashMap<String, Provider>,
    config: GatewayConfig,
}

impl HttpGateway {
    /// Build a gateway, reading API keys from the environment
    ///
    /// # Errors
    /// Returns [`GatewayConfigError::MissingApiKey`] when a provider's key
    /// variable is unset, or another variant for invalid configuration.
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayConfigError> {
        Self::from_config_with(config, |var| std::env::var(var).ok())
    }

    /// Build a gateway, resolving API keys through `lookup`
    ///
    /// # Errors
    /// As [`HttpGateway::from_config`].
    pub fn from_config_with(
        config: GatewayConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, GatewayConfigError> {
        config.validate()?;

        let mut providers = HashMap::with_capacity(config.providers.len());
        for (name, provider) in &config.providers {
            let api_key = lookup(&provider.api_key_env)
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| GatewayConfigError::MissingApiKey {
                    provider: name.clone(),
                    var: provider.api_key_env.clone(),
                })?;
            providers.insert(name.clone(), Provider::new(name, provider.clone(), api_key));
        }

        let connect_timeout = config
            .connect_timeout_secs
            .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs);
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .use_rustls_tls()
            .build()
            .map_err(|e| GatewayConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            providers,
            config,
        })
    }

    /// Provider name answering `capability`
    #[must_use]
    pub fn route(&self, capability: &str) -> Option<&str> {
        self.config.route(capability)
    }

    fn provider(&self, capability: &str) -> Result<&Provider, TransportError> {
        self.route(capability)
            .and_then(|name| self.providers.get(name))
            .ok_or_else(|| TransportError::NoRoute(capability.to_string()))
    }

    async fn attempt(&self, provider: &Provider, request: &ProviderRequest) -> Result<String, TransportError> {
        let response = provider
            .request(&self.client, &request.prompt)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| map_send_error(&e, request.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_send_error(&e, request.timeout))?;

        if !status.is_success() {
            return Err(map_status(status, &body));
        }
        provider.parse(&body)
    }
}

#[async_trait]
impl ProviderGateway for HttpGateway {
    async fn invoke(&self, request: ProviderRequest) -> Result<String, TransportError> {
        let provider = self.provider(&request.capability)?;
        let RetryPolicy { max_retries, .. } = self.config.retry;

        let mut retry = 0;
        loop {
            debug!(
                provider = %provider.name,
                capability = %request.capability,
                attempt = retry + 1,
                timeout_ms = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX),
                "Executing provider request"
            );

            match self.attempt(provider, &request).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && retry < max_retries => {
                    retry += 1;
                    let backoff = self.config.retry.backoff(retry);
                    warn!(
                        provider = %provider.name,
                        capability = %request.capability,
                        retry,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transient provider failure, will retry"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn call_deadline(&self, attempt: Duration) -> Duration {
        let retry = self.config.retry;
        (1..=retry.max_retries).fold(attempt, |total, n| {
            total.saturating_add(attempt).saturating_add(retry.backoff(n))
        })
    }
}

fn map_send_error(err: &reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else if err.is_decode() || err.is_body() {
        TransportError::MalformedEnvelope(err.to_string())
    } else {
        TransportError::Unreachable(err.to_string())
    }
}

/// Map a non-success status to a transport error
///
/// - 401/403 → [`TransportError::Auth`]
/// - anything else → [`TransportError::Status`] (retryable for 429 and 5xx)
fn map_status(status: StatusCode, body: &str) -> TransportError {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::Auth(format!("{status}: {body}"))
        }
        _ => TransportError::Status {
            code: status.as_u16(),
            body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ProviderKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use vizgen_core::{PromptBook, StageContext};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, kind: ProviderKind, max_retries: u32) -> GatewayConfig {
        let mut config = GatewayConfig {
            default_provider: Some("primary".into()),
            retry: RetryPolicy {
                max_retries,
                initial_backoff_ms: 10,
            },
            ..GatewayConfig::default()
        };
        config.providers.insert(
            "primary".into(),
            ProviderConfig {
                kind,
                model: "test-model".into(),
                base_url: Some(format!("{}/v1", server.uri())),
                api_key_env: "TEST_KEY".into(),
                temperature: None,
                max_tokens: None,
            },
        );
        config
    }

    fn gateway(config: GatewayConfig) -> HttpGateway {
        HttpGateway::from_config_with(config, |_| Some("k-123".into())).unwrap()
    }

    fn request(capability: &str) -> ProviderRequest {
        ProviderRequest::new(capability, "classify this", Duration::from_secs(5))
    }

    fn chat_reply(text: &str) -> serde_json::Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] })
    }

    #[tokio::test]
    async fn gemini_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "k-123"))
            .and(body_partial_json(json!({ "contents": [{ "parts": [{ "text": "classify this" }] }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "MATH" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(config(&server, ProviderKind::Gemini, 0));
        assert_eq!(gw.invoke(request("classify")).await.unwrap(), "MATH");
    }

    #[tokio::test]
    async fn chat_round_trip_uses_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer k-123"))
            .and(body_partial_json(json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("YES: fine")))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(config(&server, ProviderKind::OpenaiCompatible, 0));
        assert_eq!(gw.invoke(request("vote.qwen")).await.unwrap(), "YES: fine");
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("LOGIC")))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(config(&server, ProviderKind::OpenaiCompatible, 2));
        assert_eq!(gw.invoke(request("classify")).await.unwrap(), "LOGIC");
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(3)
            .mount(&server)
            .await;

        let gw = gateway(config(&server, ProviderKind::OpenaiCompatible, 2));
        let err = gw.invoke(request("generate")).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                code: 429,
                body: "slow down".into()
            }
        );
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(config(&server, ProviderKind::Gemini, 3));
        let err = gw.invoke(request("generate")).await.unwrap_err();
        assert!(matches!(err, TransportError::Auth(_)));
    }

    #[tokio::test]
    async fn malformed_envelope_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(config(&server, ProviderKind::OpenaiCompatible, 3));
        let err = gw.invoke(request("generate")).await.unwrap_err();
        assert!(matches!(err, TransportError::MalformedEnvelope(_)));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_reply("late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let gw = gateway(config(&server, ProviderKind::OpenaiCompatible, 0));
        let err = gw
            .invoke(ProviderRequest::new("generate", "p", Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout { ms: 200 });
    }

    #[test]
    fn call_deadline_covers_every_attempt_and_backoff() {
        let mut cfg = GatewayConfig {
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff_ms: 100,
            },
            ..GatewayConfig::default()
        };
        cfg.providers.insert(
            "gemini".into(),
            ProviderConfig {
                kind: ProviderKind::Gemini,
                model: "gemini-2.0-flash".into(),
                base_url: None,
                api_key_env: "GEMINI_API_KEY".into(),
                temperature: None,
                max_tokens: None,
            },
        );
        let gw = gateway(cfg);
        // 3 attempts of 1s, backoff 100ms + 200ms
        assert_eq!(gw.call_deadline(Duration::from_secs(1)), Duration::from_millis(3300));
    }

    #[tokio::test]
    async fn stage_call_survives_a_timed_out_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_reply("too late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("recovered")))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(config(&server, ProviderKind::OpenaiCompatible, 1));
        let prompts = PromptBook::new();
        let cancel = CancellationToken::new();
        let reply = StageContext::new(&gw, &prompts, &cancel, Duration::from_millis(300))
            .call("specify", "specify", "p".into())
            .await
            .unwrap();
        assert_eq!(reply, "recovered");
    }

    #[tokio::test]
    async fn unrouted_capability_fails_without_request() {
        let server = MockServer::start().await;
        let mut cfg = config(&server, ProviderKind::Gemini, 0);
        cfg.default_provider = None;

        let gw = gateway(cfg);
        let err = gw.invoke(request("generate")).await.unwrap_err();
        assert_eq!(err, TransportError::NoRoute("generate".into()));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn missing_api_key_is_reported() {
        let mut cfg = GatewayConfig::default();
        cfg.providers.insert(
            "gemini".into(),
            ProviderConfig {
                kind: ProviderKind::Gemini,
                model: "gemini-2.0-flash".into(),
                base_url: None,
                api_key_env: "VIZGEN_TEST_UNSET_KEY".into(),
                temperature: None,
                max_tokens: None,
            },
        );
        let err = HttpGateway::from_config_with(cfg, |_| None).unwrap_err();
        assert!(matches!(
            err,
            GatewayConfigError::MissingApiKey { ref var, .. } if var == "VIZGEN_TEST_UNSET_KEY"
        ));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(map_status(StatusCode::FORBIDDEN, ""), TransportError::Auth(_)));
        let long = "x".repeat(2000);
        match map_status(StatusCode::BAD_GATEWAY, &long) {
            TransportError::Status { code, body } => {
                assert_eq!(code, 502);
                assert_eq!(body.len(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
