use crate::error::StageError;
use crate::fences::strip_code_fences;
use crate::markers::{Marker, Reply};
use crate::prompts::PromptKey;
use crate::stage::{Stage, StageContext, StageOutput};
use async_trait::async_trait;
use vizgen_artifact::{Artifact, StageRecord};

/// Completeness check ruling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    /// Second pass lost nothing
    Complete,
    /// Second pass regressed (detail from the checker)
    Regressed(String),
}

impl Completeness {
    /// Parse a checker reply
    #[must_use]
    pub fn parse(reply: &str) -> Self {
        if Marker::Complete.matches(reply) {
            Self::Complete
        } else {
            Self::Regressed(reply.to_string())
        }
    }
}

/// Two sanitizing passes with rollback on regression
///
/// Pass 1 must succeed. Pass 2 and the completeness check can only make
/// things better: any failure in either returns pass 1's output
/// unchanged.
#[derive(Debug, Clone)]
pub struct SanitizationStage {
    primary: String,
    secondary: String,
    checker: String,
}

impl SanitizationStage {
    /// Stage name
    pub const NAME: &'static str = "sanitize";

    /// Create the stage
    #[inline]
    #[must_use]
    pub fn new(
        primary: impl Into<String>,
        secondary: impl Into<String>,
        checker: impl Into<String>,
    ) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
            checker: checker.into(),
        }
    }

    fn rollback(first: String, pass: &str, detail: impl Into<String>) -> StageOutput {
        let detail = detail.into();
        tracing::warn!(stage = Self::NAME, pass, detail = %detail, "regression detected, rolling back to first pass");
        StageOutput::new(first).with_note(StageRecord::failed(pass, detail))
    }
}

#[async_trait]
impl Stage for SanitizationStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &StageContext<'_>, artifact: &Artifact) -> Result<StageOutput, StageError> {
        let prompt = ctx.render(Self::NAME, PromptKey::SanitizePrimary, &[("input", artifact.content())])?;
        let first = strip_code_fences(&ctx.ask(Self::NAME, &self.primary, prompt).await?);
        if first.is_empty() {
            return Err(StageError::content(Self::NAME, "empty reply"));
        }

        let prompt = ctx.render(Self::NAME, PromptKey::SanitizeSecondary, &[("input", &first)])?;
        let second = match ctx.ask(Self::NAME, &self.secondary, prompt).await {
            Ok(reply) => strip_code_fences(&reply),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => return Ok(Self::rollback(first, "sanitize_secondary", err.cause.to_string())),
        };
        if second.is_empty() {
            return Ok(Self::rollback(first, "sanitize_secondary", "empty reply"));
        }

        let prompt = ctx.render(
            Self::NAME,
            PromptKey::Completeness,
            &[("input", &second), ("draft", &first)],
        )?;
        let ruling = match ctx.call(Self::NAME, &self.checker, prompt).await {
            Ok(reply) => match Reply::parse(&reply) {
                Reply::Ok(text) => Completeness::parse(&text),
                Reply::Error(detail) => Completeness::Regressed(detail),
            },
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => Completeness::Regressed(err.cause.to_string()),
        };

        match ruling {
            Completeness::Complete => Ok(StageOutput::new(second)),
            Completeness::Regressed(detail) => Ok(Self::rollback(first, "completeness", detail)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::gateway::MockProviderGateway;
    use crate::prompts::PromptBook;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn sanitize(
        second: Result<&'static str, TransportError>,
        check: &'static str,
    ) -> Result<StageOutput, StageError> {
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "sanitize_primary")
            .returning(|_| Ok("```js\nlet a = 1;\n```".into()));
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "sanitize_secondary")
            .returning(move |_| second.clone().map(str::to_string));
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "completeness")
            .returning(move |_| Ok(check.to_string()));

        let prompts = PromptBook::new();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(&gateway, &prompts, &cancel, Duration::from_secs(5));
        SanitizationStage::new("sanitize_primary", "sanitize_secondary", "completeness")
            .run(&ctx, &Artifact::new("let a = 1"))
            .await
    }

    #[tokio::test]
    async fn complete_keeps_second_pass() {
        let out = sanitize(Ok("let a = 1; // safe"), "COMPLETE").await.unwrap();
        assert_eq!(out.content, "let a = 1; // safe");
        assert!(out.notes.is_empty());
    }

    #[tokio::test]
    async fn incomplete_rolls_back_to_first_pass() {
        let out = sanitize(Ok("a = 1"), "INCOMPLETE: declaration removed").await.unwrap();
        assert_eq!(out.content, "let a = 1;");
        assert_eq!(out.notes[0].stage(), "completeness");
    }

    #[tokio::test]
    async fn second_pass_failures_roll_back() {
        let out = sanitize(Err(TransportError::Timeout { ms: 5_000 }), "COMPLETE")
            .await
            .unwrap();
        assert_eq!(out.content, "let a = 1;");

        let out = sanitize(Ok("error: refused"), "COMPLETE").await.unwrap();
        assert_eq!(out.content, "let a = 1;");
        assert_eq!(out.notes[0].stage(), "sanitize_secondary");
    }

    #[tokio::test]
    async fn first_pass_failure_is_stage_error() {
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .returning(|_| Err(TransportError::Unreachable("reset".into())));
        let prompts = PromptBook::new();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(&gateway, &prompts, &cancel, Duration::from_secs(5));

        let err = SanitizationStage::new("a", "b", "c")
            .run(&ctx, &Artifact::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.stage, "sanitize");
    }
}
