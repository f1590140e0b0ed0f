use crate::error::StageError;
use crate::fences::strip_code_fences;
use crate::prompts::PromptKey;
use crate::stage::{Stage, StageContext, StageOutput};
use async_trait::async_trait;
use vizgen_artifact::Artifact;

/// A stage made of one templated provider call
///
/// The artifact content is passed as `{input}`. An error-marked reply
/// fails the stage.
#[derive(Debug, Clone)]
pub struct PromptStage {
    name: String,
    key: PromptKey,
    capability: String,
    code: bool,
}

impl PromptStage {
    /// Create a stage producing prose
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, key: PromptKey, capability: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key,
            capability: capability.into(),
            code: false,
        }
    }

    /// Create a stage producing code (fences are stripped)
    #[inline]
    #[must_use]
    pub fn code(name: impl Into<String>, key: PromptKey, capability: impl Into<String>) -> Self {
        Self {
            code: true,
            ..Self::new(name, key, capability)
        }
    }
}

#[async_trait]
impl Stage for PromptStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext<'_>, artifact: &Artifact) -> Result<StageOutput, StageError> {
        let prompt = ctx.render(&self.name, self.key, &[("input", artifact.content())])?;
        let reply = ctx.ask(&self.name, &self.capability, prompt).await?;

        let content = if self.code { strip_code_fences(&reply) } else { reply };
        if content.is_empty() {
            return Err(StageError::content(&self.name, "empty reply"));
        }
        Ok(StageOutput::new(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockProviderGateway;
    use crate::prompts::PromptBook;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn code_stage_strips_fences() {
        let mut gateway = MockProviderGateway::without_retries();
        gateway
            .expect_invoke()
            .withf(|req| req.capability == "optimize")
            .returning(|_| Ok("```js\nfunction draw() {}\n```".into()));
        let prompts = PromptBook::new();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(&gateway, &prompts, &cancel, Duration::from_secs(5));

        let stage = PromptStage::code("optimize", PromptKey::Optimize, "optimize");
        let out = stage.run(&ctx, &Artifact::new("function draw(){}")).await.unwrap();
        assert_eq!(out.content, "function draw() {}");
        assert!(out.notes.is_empty());
    }

    #[tokio::test]
    async fn empty_reply_fails() {
        let mut gateway = MockProviderGateway::without_retries();
        gateway.expect_invoke().returning(|_| Ok("   ".into()));
        let prompts = PromptBook::new();
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(&gateway, &prompts, &cancel, Duration::from_secs(5));

        let stage = PromptStage::new("extract", PromptKey::Extract, "extract");
        let err = stage.run(&ctx, &Artifact::new("plot x")).await.unwrap_err();
        assert_eq!(err, StageError::content("extract", "empty reply"));
    }
}
