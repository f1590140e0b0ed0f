use crate::error::StageError;
use crate::fences::strip_code_fences;
use crate::markers::Marker;
use crate::prompts::PromptKey;
use crate::stage::{Stage, StageContext, StageOutput};
use async_trait::async_trait;
use vizgen_artifact::{Artifact, StageRecord};

/// Generates code from the verified structure
///
/// With a review capability set, the code is reviewed once; unless the
/// review passes, it is regenerated with the review as issues to
/// address. Review or regeneration failures keep the first code.
#[derive(Debug, Clone)]
pub struct GenerationStage {
    capability: String,
    review: Option<String>,
}

impl GenerationStage {
    /// Stage name
    pub const NAME: &'static str = "generate";

    /// Create the stage without self-review
    #[inline]
    #[must_use]
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            review: None,
        }
    }

    /// With self-review through `capability`
    #[inline]
    #[must_use]
    pub fn with_review(mut self, capability: impl Into<String>) -> Self {
        self.review = Some(capability.into());
        self
    }

    async fn review(
        &self,
        ctx: &StageContext<'_>,
        reviewer: &str,
        structure: &str,
        code: String,
    ) -> Result<StageOutput, StageError> {
        let prompt = ctx.render(Self::NAME, PromptKey::Review, &[("input", &code)])?;
        let review = match ctx.call(Self::NAME, reviewer, prompt).await {
            Ok(review) => review,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                tracing::warn!(stage = Self::NAME, error = %err, "self-review failed, keeping code");
                return Ok(StageOutput::new(code).with_note(StageRecord::failed("review", err.to_string())));
            }
        };

        if Marker::Passes.matches(&review) {
            tracing::debug!(stage = Self::NAME, "self-review passed");
            return Ok(StageOutput::new(code));
        }

        tracing::info!(stage = Self::NAME, "self-review found issues, regenerating");
        let prompt = ctx.render(
            Self::NAME,
            PromptKey::Regenerate,
            &[("input", structure), ("issues", &review)],
        )?;
        match ctx.ask(Self::NAME, &self.capability, prompt).await {
            Ok(reply) => {
                let regenerated = strip_code_fences(&reply);
                if regenerated.is_empty() {
                    return Ok(StageOutput::new(code)
                        .with_note(StageRecord::failed("regenerate", "empty reply")));
                }
                Ok(StageOutput::new(regenerated).with_note(StageRecord::failed("review", review)))
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                tracing::warn!(stage = Self::NAME, error = %err, "regeneration failed, keeping code");
                Ok(StageOutput::new(code).with_note(StageRecord::failed("regenerate", err.to_string())))
            }
        }
    }
}

#[async_trait]
impl Stage for GenerationStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &StageContext<'_>, artifact: &Artifact) -> Result<StageOutput, StageError> {
        let structure = artifact.content();
        let prompt = ctx.render(Self::NAME, PromptKey::Generate, &[("input", structure)])?;
        let code = strip_code_fences(&ctx.ask(Self::NAME, &self.capability, prompt).await?);
        if code.is_empty() {
            return Err(StageError::content(Self::NAME, "empty reply"));
        }

        match &self.review {
            Some(reviewer) => self.review(ctx, reviewer, structure, code).await,
            None => Ok(StageOutput::new(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::gateway::MockProviderGateway;
    use crate::prompts::PromptBook;
    use mockall::Sequence;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use vizgen_artifact::ContentType;

    async fn run(gateway: MockProviderGateway, stage: GenerationStage) -> Result<StageOutput, StageError> {
        let prompts = PromptBook::new();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(&gateway, &prompts, &cancel, Duration::from_secs(5))
            .with_content_type(ContentType::Logic);
        stage.run(&ctx, &Artifact::new("setup(); draw();")).await
    }

    #[tokio::test]
    async fn generates_without_review() {
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "generate" && req.prompt.contains("LOGIC"))
            .times(1)
            .returning(|_| Ok("```javascript\nlet step = 0;\n```".into()));

        let out = run(gateway, GenerationStage::new("generate")).await.unwrap();
        assert_eq!(out.content, "let step = 0;");
    }

    #[tokio::test]
    async fn failed_review_regenerates_with_issues() {
        let mut seq = Sequence::new();
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "generate")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("v1".into()));
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "review")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("draw() never clears the canvas".into()));
        gateway
            .expect_invoke()
            .withf(|req| {
                req.capability == "generate"
                    && req.prompt.contains("Issues to address:\ndraw() never clears the canvas")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("v2".into()));

        let out = run(gateway, GenerationStage::new("generate").with_review("review"))
            .await
            .unwrap();
        assert_eq!(out.content, "v2");
        assert_eq!(out.notes.len(), 1);
    }

    #[tokio::test]
    async fn passing_review_keeps_code() {
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "generate")
            .times(1)
            .returning(|_| Ok("v1".into()));
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "review")
            .times(1)
            .returning(|_| Ok("CODE PASSES TESTING".into()));

        let out = run(gateway, GenerationStage::new("generate").with_review("review"))
            .await
            .unwrap();
        assert_eq!(out.content, "v1");
    }

    #[tokio::test]
    async fn review_transport_failure_keeps_code() {
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "generate")
            .times(1)
            .returning(|_| Ok("v1".into()));
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "review")
            .returning(|_| Err(TransportError::Timeout { ms: 5_000 }));

        let out = run(gateway, GenerationStage::new("generate").with_review("review"))
            .await
            .unwrap();
        assert_eq!(out.content, "v1");
        assert_eq!(out.notes[0].stage(), "review");
    }

    #[tokio::test]
    async fn error_marker_fails_generation() {
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .returning(|_| Ok("Error: structure is empty".into()));

        let err = run(gateway, GenerationStage::new("generate")).await.unwrap_err();
        assert_eq!(err, StageError::content("generate", "structure is empty"));
    }
}
