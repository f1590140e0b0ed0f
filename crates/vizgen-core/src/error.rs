//! Error types for vizgen Core
//!
//! Provides error handling for:
//! - Provider transport failures (surfaced by a [`ProviderGateway`](crate::ProviderGateway))
//! - Stage failures (content errors, timeouts, cancellation, prompt formatting)
//! - Configuration problems detected at construction time

use vizgen_artifact::ArtifactError;

/// Failure at the provider boundary
///
/// Gateways apply their own retry policy before surfacing one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Provider could not be reached
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// Provider did not answer in time
    #[error("provider timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Provider answered with a non-success status
    #[error("provider returned status {code}: {body}")]
    Status { code: u16, body: String },

    /// Response envelope could not be decoded
    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),

    /// Provider refused credentials
    #[error("provider rejected credentials: {0}")]
    Auth(String),

    /// No provider is routed for a capability
    #[error("no provider routed for capability '{0}'")]
    NoRoute(String),
}

impl TransportError {
    /// Check if a gateway may retry the call
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout { .. } => true,
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            Self::MalformedEnvelope(_) | Self::Auth(_) | Self::NoRoute(_) => false,
        }
    }
}

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageFailure {
    /// Provider answered with the error marker
    #[error("content error: {0}")]
    Content(String),

    /// Provider call failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Stage exceeded its time budget
    #[error("stage timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Run was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Prompt template could not be rendered
    #[error("prompt format error: {0}")]
    PromptFormat(String),

    /// Artifact invariant violated
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Request cannot enter the pipeline
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StageFailure {
    /// Short machine-readable kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content(_) => "content",
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::PromptFormat(_) => "prompt_format",
            Self::Artifact(_) => "artifact",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

/// A stage failure attributed to its stage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage '{stage}' failed: {cause}")]
pub struct StageError {
    /// Name of the failing stage
    pub stage: String,
    /// Underlying cause
    pub cause: StageFailure,
}

impl StageError {
    /// Create a stage error
    #[inline]
    #[must_use]
    pub fn new(stage: impl Into<String>, cause: impl Into<StageFailure>) -> Self {
        Self {
            stage: stage.into(),
            cause: cause.into(),
        }
    }

    /// Content error shorthand
    #[inline]
    #[must_use]
    pub fn content(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(stage, StageFailure::Content(detail.into()))
    }

    /// Check if the run was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, StageFailure::Cancelled)
    }
}

/// Configuration error detected before a run starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config text is not valid TOML for the expected shape
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config parsed but is not usable
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_transport_errors() {
        assert!(TransportError::Unreachable("dns".into()).is_retryable());
        assert!(TransportError::Timeout { ms: 30_000 }.is_retryable());
        assert!(TransportError::Status {
            code: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(TransportError::Status {
            code: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!TransportError::Status {
            code: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!TransportError::MalformedEnvelope("no candidates".into()).is_retryable());
        assert!(!TransportError::NoRoute("generate".into()).is_retryable());
    }

    #[test]
    fn stage_error_display_names_stage() {
        let err = StageError::content("extract", "could not parse the equation");
        assert_eq!(
            err.to_string(),
            "stage 'extract' failed: content error: could not parse the equation"
        );
        assert!(!err.is_cancelled());
        assert!(StageError::new("validate", StageFailure::Cancelled).is_cancelled());
    }

    #[test]
    fn transport_converts_into_stage_failure() {
        let err = StageError::new("generate", TransportError::Timeout { ms: 5_000 });
        assert_eq!(err.cause.kind(), "transport");
    }
}
