use crate::error::StageError;
use crate::markers::{Marker, Reply};
use crate::prompts::PromptKey;
use crate::stage::{Stage, StageContext, StageOutput};
use async_trait::async_trait;
use vizgen_artifact::Artifact;

/// Verifier's ruling on a structural draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arbitration {
    /// Draft accepted as is
    KeepDraft,
    /// Verifier's full reply replaces the draft
    Replace(String),
}

impl Arbitration {
    /// Parse a verifier reply
    #[must_use]
    pub fn parse(reply: &str) -> Self {
        if Marker::Valid.matches(reply) {
            Self::KeepDraft
        } else {
            Self::Replace(reply.to_string())
        }
    }

    /// Resolve against the draft
    #[must_use]
    pub fn resolve(self, draft: String) -> String {
        match self {
            Self::KeepDraft => draft,
            Self::Replace(text) => text,
        }
    }
}

/// Structural synthesis with embedded verification
///
/// One provider drafts the structure from the specification, a second
/// one verifies it. The verifier wins on disagreement.
#[derive(Debug, Clone)]
pub struct StructureStage {
    drafter: String,
    verifier: String,
}

impl StructureStage {
    /// Stage name
    pub const NAME: &'static str = "structure";

    /// Create the stage
    #[inline]
    #[must_use]
    pub fn new(drafter: impl Into<String>, verifier: impl Into<String>) -> Self {
        Self {
            drafter: drafter.into(),
            verifier: verifier.into(),
        }
    }
}

#[async_trait]
impl Stage for StructureStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &StageContext<'_>, artifact: &Artifact) -> Result<StageOutput, StageError> {
        let specification = artifact.content();

        let prompt = ctx.render(Self::NAME, PromptKey::StructureDraft, &[("input", specification)])?;
        let draft = ctx.ask(Self::NAME, &self.drafter, prompt).await?;

        let prompt = ctx.render(
            Self::NAME,
            PromptKey::StructureVerify,
            &[("input", specification), ("draft", &draft)],
        )?;
        let verdict = match Reply::parse(&ctx.call(Self::NAME, &self.verifier, prompt).await?) {
            Reply::Ok(text) => Arbitration::parse(&text),
            Reply::Error(detail) => return Err(StageError::content(Self::NAME, detail)),
        };

        if verdict == Arbitration::KeepDraft {
            tracing::debug!(stage = Self::NAME, "verifier accepted draft");
        } else {
            tracing::info!(stage = Self::NAME, "verifier replaced draft");
        }
        Ok(StageOutput::new(verdict.resolve(draft)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keeps_draft() {
        let draft = "setup(); draw();".to_string();
        assert_eq!(Arbitration::parse("VALID").resolve(draft.clone()), draft);
        assert_eq!(Arbitration::parse("valid - covers everything").resolve(draft.clone()), draft);
    }

    #[test]
    fn anything_else_replaces_draft() {
        let reply = "setup(); draw(); mousePressed();";
        assert_eq!(
            Arbitration::parse(reply).resolve("setup();".into()),
            reply
        );
        assert_eq!(
            Arbitration::parse("INVALID: missing handler").resolve("setup();".into()),
            "INVALID: missing handler"
        );
    }
}
