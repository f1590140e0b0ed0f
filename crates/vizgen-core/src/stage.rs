//! Stage abstraction
//!
//! A [`Stage`] consumes the current artifact and produces the content of
//! the next version. All provider traffic goes through a
//! [`StageContext`], which applies the per-call timeout, races the call
//! against run cancellation and parses the error marker.

use crate::error::{StageError, StageFailure};
use crate::gateway::{ProviderGateway, ProviderRequest};
use crate::markers::Reply;
use crate::prompts::{PromptBook, PromptKey};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vizgen_artifact::{Artifact, ContentType, StageRecord};

/// Everything a stage needs to talk to providers
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    gateway: &'a dyn ProviderGateway,
    prompts: &'a PromptBook,
    cancel: &'a CancellationToken,
    timeout: Duration,
    content_type: Option<ContentType>,
    verified: Option<&'a str>,
}

impl<'a> StageContext<'a> {
    /// Create a context before classification
    #[must_use]
    pub fn new(
        gateway: &'a dyn ProviderGateway,
        prompts: &'a PromptBook,
        cancel: &'a CancellationToken,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            prompts,
            cancel,
            timeout,
            content_type: None,
            verified: None,
        }
    }

    /// With the fixed classification
    #[inline]
    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// With the verified content
    #[inline]
    #[must_use]
    pub fn with_verified(mut self, verified: &'a str) -> Self {
        self.verified = Some(verified);
        self
    }

    /// Classification, once fixed
    #[inline]
    #[must_use]
    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }

    /// Verified content, once produced
    #[inline]
    #[must_use]
    pub fn verified(&self) -> Option<&'a str> {
        self.verified
    }

    /// Check if the run was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Render a prompt
    ///
    /// `{content_type}` and `{content}` are filled from the context unless
    /// `vars` already provides them.
    ///
    /// # Errors
    /// Returns a [`StageFailure::PromptFormat`] stage error when a variable
    /// is missing.
    pub fn render(
        &self,
        stage: &str,
        key: PromptKey,
        vars: &[(&str, &str)],
    ) -> Result<String, StageError> {
        let mut all: Vec<(&str, &str)> = vars.to_vec();
        if let Some(content_type) = self.content_type {
            if !all.iter().any(|(name, _)| *name == "content_type") {
                all.push(("content_type", content_type.label()));
            }
        }
        if let Some(verified) = self.verified {
            if !all.iter().any(|(name, _)| *name == "content") {
                all.push(("content", verified));
            }
        }
        self.prompts
            .render(key, self.content_type, &all)
            .map_err(|cause| StageError::new(stage, cause))
    }

    /// Invoke a capability, bounded by cancellation and the gateway's call deadline
    ///
    /// The stage timeout is the per-attempt budget; the gateway widens it
    /// to cover its own retries. The reply is whitespace-trimmed; markers
    /// are not interpreted.
    ///
    /// # Errors
    /// Returns a stage error for timeouts, transport failures and
    /// cancellation.
    pub async fn call(
        &self,
        stage: &str,
        capability: &str,
        prompt: String,
    ) -> Result<String, StageError> {
        if self.cancel.is_cancelled() {
            return Err(StageError::new(stage, StageFailure::Cancelled));
        }

        tracing::debug!(stage, capability, prompt_len = prompt.len(), "invoking provider");
        let request = ProviderRequest::new(capability, prompt, self.timeout);
        let deadline = self.gateway.call_deadline(self.timeout);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StageError::new(stage, StageFailure::Cancelled)),
            result = tokio::time::timeout(deadline, self.gateway.invoke(request)) => match result {
                Err(_) => Err(StageError::new(
                    stage,
                    StageFailure::Timeout {
                        ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    },
                )),
                Ok(Err(err)) => Err(StageError::new(stage, err)),
                Ok(Ok(text)) => {
                    tracing::debug!(stage, capability, reply_len = text.len(), "provider replied");
                    Ok(text.trim().to_string())
                }
            },
        }
    }

    /// [`call`](Self::call), then treat an error-marked reply as a content error
    ///
    /// # Errors
    /// As [`call`](Self::call), plus [`StageFailure::Content`] for
    /// error-marked replies.
    pub async fn ask(
        &self,
        stage: &str,
        capability: &str,
        prompt: String,
    ) -> Result<String, StageError> {
        match Reply::parse(&self.call(stage, capability, prompt).await?) {
            Reply::Ok(text) => Ok(text),
            Reply::Error(detail) => Err(StageError::content(stage, detail)),
        }
    }
}

/// Result of a successful stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    /// Content of the next artifact version
    pub content: String,
    /// Absorbed failures, recorded before the stage's own entry
    pub notes: Vec<StageRecord>,
}

impl StageOutput {
    /// Output without notes
    #[inline]
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            notes: Vec::new(),
        }
    }

    /// With an absorbed-failure note
    #[inline]
    #[must_use]
    pub fn with_note(mut self, note: StageRecord) -> Self {
        self.notes.push(note);
        self
    }

    /// Produce the next artifact version
    #[must_use]
    pub fn apply(self, stage: &str, artifact: &Artifact) -> Artifact {
        let noted = self
            .notes
            .into_iter()
            .fold(artifact.clone(), |current, note| current.record(note));
        noted.revise(stage, self.content)
    }
}

/// A named unit of work over one artifact
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name, used in history and errors
    fn name(&self) -> &str;

    /// Run the stage
    async fn run(&self, ctx: &StageContext<'_>, artifact: &Artifact) -> Result<StageOutput, StageError>;
}
