//! Escalating fallback ladder
//!
//! Entered when consensus rejects the pipeline's candidate. Rungs, in
//! order:
//!
//! 1. **Repair** (up to `repair_attempts`): fix the latest candidate
//!    using the panel's dissent, then re-validate.
//! 2. **Simplified**: regenerate from the verified content with a
//!    constrained prompt, then re-validate.
//! 3. **Last resort**: simplest generation, accepted without validation.
//!
//! Only validation failures move the ladder down a rung. Any stage error
//! (transport, error marker, prompt format, cancellation) stops it.

use crate::consensus::{ConsensusOutcome, ConsensusValidator};
use crate::error::StageError;
use crate::fences::strip_code_fences;
use crate::prompts::PromptKey;
use crate::stage::StageContext;
use crate::types::{LadderReport, Rung};
use vizgen_artifact::Artifact;

/// Capability ids used by the ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderCapabilities {
    /// Diagnose-and-fix
    pub repair: String,
    /// Simplified regeneration
    pub simplified: String,
    /// Last resort
    pub last_resort: String,
}

/// What the ladder settled on
#[derive(Debug, Clone)]
pub struct LadderResult {
    /// Accepted artifact (validated unless the rung is last resort)
    pub artifact: Artifact,
    /// Rungs taken
    pub report: LadderReport,
    /// Last validator outcome
    pub consensus: ConsensusOutcome,
}

impl LadderResult {
    /// Whether the result bypassed validation
    #[inline]
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.report.rung == Rung::LastResort
    }
}

/// Bounded, non-recursive recovery from a failed validation
#[derive(Debug, Clone)]
pub struct FallbackLadder {
    repair_attempts: u32,
    capabilities: LadderCapabilities,
}

impl FallbackLadder {
    /// Create a ladder
    #[must_use]
    pub fn new(repair_attempts: u32, capabilities: LadderCapabilities) -> Self {
        Self {
            repair_attempts,
            capabilities,
        }
    }

    /// Repair attempts before the simplified rung
    #[inline]
    #[must_use]
    pub fn repair_attempts(&self) -> u32 {
        self.repair_attempts
    }

    /// Walk the ladder from a rejected candidate
    ///
    /// # Errors
    /// Returns the first stage error raised by a rung or by the
    /// validator.
    pub async fn recover(
        &self,
        ctx: &StageContext<'_>,
        validator: &ConsensusValidator,
        rejected: &Artifact,
        outcome: ConsensusOutcome,
    ) -> Result<LadderResult, StageError> {
        let mut candidate = rejected.clone();
        let mut last = outcome;
        let mut validations = 0;

        for attempt in 1..=self.repair_attempts {
            tracing::info!(rung = "repair", attempt, max = self.repair_attempts, "repairing rejected candidate");
            let feedback = last.feedback();
            let code = self
                .generate(
                    ctx,
                    "repair",
                    PromptKey::Repair,
                    &self.capabilities.repair,
                    &[("input", candidate.content()), ("feedback", &feedback)],
                )
                .await?;
            candidate = candidate.revise("repair", code);

            last = validator.validate(ctx, &candidate).await?;
            validations += 1;
            if last.passed() {
                return Ok(Self::accepted(candidate, last, Rung::Repair, attempt, validations));
            }
        }

        tracing::info!(rung = "simplified", "repairs exhausted, regenerating from verified content");
        let code = self
            .generate(ctx, "simplified", PromptKey::Simplified, &self.capabilities.simplified, &[])
            .await?;
        candidate = candidate.revise("simplified", code);

        last = validator.validate(ctx, &candidate).await?;
        validations += 1;
        if last.passed() {
            return Ok(Self::accepted(
                candidate,
                last,
                Rung::Simplified,
                self.repair_attempts,
                validations,
            ));
        }

        tracing::warn!(rung = "last_resort", "simplified candidate rejected, using last resort");
        let code = self
            .generate(ctx, "last_resort", PromptKey::LastResort, &self.capabilities.last_resort, &[])
            .await?;

        Ok(LadderResult {
            artifact: candidate.revise("last_resort", code),
            report: LadderReport {
                rung: Rung::LastResort,
                repair_attempts: self.repair_attempts,
                validations,
            },
            consensus: last,
        })
    }

    async fn generate(
        &self,
        ctx: &StageContext<'_>,
        stage: &str,
        key: PromptKey,
        capability: &str,
        vars: &[(&str, &str)],
    ) -> Result<String, StageError> {
        let prompt = ctx.render(stage, key, vars)?;
        let code = strip_code_fences(&ctx.ask(stage, capability, prompt).await?);
        if code.is_empty() {
            return Err(StageError::content(stage, "empty reply"));
        }
        Ok(code)
    }

    fn accepted(
        candidate: Artifact,
        consensus: ConsensusOutcome,
        rung: Rung,
        repair_attempts: u32,
        validations: u32,
    ) -> LadderResult {
        tracing::info!(rung = ?rung, validations, "ladder candidate accepted");
        let artifact = consensus.enhanced_artifact.clone().unwrap_or(candidate);
        LadderResult {
            artifact,
            report: LadderReport {
                rung,
                repair_attempts,
                validations,
            },
            consensus,
        }
    }
}
