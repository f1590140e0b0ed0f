use crate::error::StageError;
use crate::prompts::PromptKey;
use crate::stage::StageContext;
use vizgen_artifact::{Artifact, ContentType};

/// Classifies the request as [`ContentType::Math`] or [`ContentType::Logic`]
#[derive(Debug, Clone)]
pub struct Classifier {
    capability: String,
}

impl Classifier {
    /// Stage name
    pub const NAME: &'static str = "classify";

    /// Create a classifier calling `capability`
    #[inline]
    #[must_use]
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }

    /// Classify the entry artifact
    ///
    /// # Errors
    /// Transport failures, error-marked replies and answers naming
    /// neither type are stage errors.
    pub async fn classify(
        &self,
        ctx: &StageContext<'_>,
        artifact: &Artifact,
    ) -> Result<ContentType, StageError> {
        let prompt = ctx.render(Self::NAME, PromptKey::Classify, &[("input", artifact.content())])?;
        let answer = ctx.ask(Self::NAME, &self.capability, prompt).await?;

        ContentType::from_label(&answer).ok_or_else(|| {
            StageError::content(Self::NAME, format!("unrecognized classification '{answer}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockProviderGateway;
    use crate::prompts::PromptBook;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn classify_with(reply: &'static str) -> Result<ContentType, StageError> {
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "classify" && req.prompt.contains("bubble sort"))
            .returning(move |_| Ok(reply.to_string()));
        let prompts = PromptBook::new();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(&gateway, &prompts, &cancel, Duration::from_secs(5));

        Classifier::new("classify")
            .classify(&ctx, &Artifact::new("animate bubble sort"))
            .await
    }

    #[tokio::test]
    async fn parses_labels() {
        assert_eq!(classify_with("LOGIC").await.unwrap(), ContentType::Logic);
        assert_eq!(classify_with(" math\n").await.unwrap(), ContentType::Math);
    }

    #[tokio::test]
    async fn unknown_label_is_content_error() {
        let err = classify_with("PHYSICS").await.unwrap_err();
        assert_eq!(err.stage, "classify");
        assert_eq!(err.cause.kind(), "content");
    }
}
