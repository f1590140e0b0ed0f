//! Provider gateway boundary
//!
//! The pipeline never talks to a concrete provider. Every call goes
//! through a [`ProviderGateway`], addressed by an opaque capability id
//! (`"generate"`, `"vote.gemini"`, ...). The gateway decides which
//! provider answers and applies its own retry policy.

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// One request to a provider capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    /// Capability id, routed by the gateway
    pub capability: String,
    /// Fully rendered prompt
    pub prompt: String,
    /// Time budget for one attempt
    pub timeout: Duration,
}

impl ProviderRequest {
    /// Create a request
    #[inline]
    #[must_use]
    pub fn new(capability: impl Into<String>, prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            capability: capability.into(),
            prompt: prompt.into(),
            timeout,
        }
    }
}

/// Uniform capability interface over generation providers
///
/// Implementations are shared read-only between concurrent runs
/// (`Arc<dyn ProviderGateway>`) and must not hold locks across calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Invoke a capability, returning the provider's raw text
    async fn invoke(&self, request: ProviderRequest) -> Result<String, TransportError>;

    /// Longest one `invoke` may take, retries and backoff included
    ///
    /// `attempt` is the per-attempt budget sent as
    /// [`ProviderRequest::timeout`]. Gateways that retry must widen it.
    fn call_deadline(&self, attempt: Duration) -> Duration {
        attempt
    }
}

#[cfg(test)]
impl MockProviderGateway {
    /// Mock that never retries: the call deadline is the attempt budget
    pub(crate) fn without_retries() -> Self {
        let mut gateway = Self::new();
        gateway.expect_call_deadline().returning(|attempt| attempt);
        gateway
    }
}
