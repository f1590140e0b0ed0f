//! Consensus validation
//!
//! A panel of N voters judges a candidate concurrently. The candidate
//! passes iff at least `floor(N/2) + 1` voters accept; ties fail.
//!
//! # Absent votes
//! A voter whose call fails or whose reply starts with neither `YES` nor
//! `NO` gives no usable answer. Under [`AbsentVotePolicy::Reject`] it
//! counts as a reject; under [`AbsentVotePolicy::Abstain`] the majority is
//! taken over responders only, and a panel with no responders fails.
//!
//! # Enhancement
//! On pass with at least one dissenting rationale, one extra call folds
//! the rationales into the candidate. Its failure leaves the outcome
//! without an enhanced artifact.

use crate::config::{AbsentVotePolicy, VoterConfig};
use crate::error::{StageError, StageFailure};
use crate::fences::strip_code_fences;
use crate::markers::Marker;
use crate::prompts::PromptKey;
use crate::stage::StageContext;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use vizgen_artifact::Artifact;

/// Stage name used for validator errors and history
pub const VALIDATE_STAGE: &str = "validate";

/// Stage name used for the enhancement call
pub const ENHANCE_STAGE: &str = "enhance";

/// Votes needed to pass a panel of `voters`
#[inline]
#[must_use]
pub const fn majority(voters: usize) -> usize {
    voters / 2 + 1
}

/// One voter's ruling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Candidate is acceptable
    Accept,
    /// Candidate is not acceptable
    Reject,
}

/// Panel ruling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusVerdict {
    /// Majority accepted
    Pass,
    /// No majority
    Fail,
}

/// A voter's parsed reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Voter id
    pub voter_id: String,
    /// Ruling
    pub verdict: Verdict,
    /// Text after the marker, the unmarked reply, or the failure detail
    pub rationale: String,
    /// Whether the voter gave a usable answer
    pub responded: bool,
    /// Whether the provider returned any text
    pub received: bool,
}

impl Vote {
    /// Parse a voter reply
    #[must_use]
    pub fn parse(voter_id: impl Into<String>, reply: &str) -> Self {
        let voter_id = voter_id.into();
        if let Some(rationale) = Marker::Accept.strip(reply) {
            Self::answered(voter_id, Verdict::Accept, rationale)
        } else if let Some(rationale) = Marker::Reject.strip(reply) {
            Self::answered(voter_id, Verdict::Reject, rationale)
        } else {
            Self {
                voter_id,
                verdict: Verdict::Reject,
                rationale: reply.trim().to_string(),
                responded: false,
                received: true,
            }
        }
    }

    /// A voter that gave no usable answer
    #[must_use]
    pub fn absent(voter_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            voter_id: voter_id.into(),
            verdict: Verdict::Reject,
            rationale: detail.into(),
            responded: false,
            received: false,
        }
    }

    fn answered(voter_id: String, verdict: Verdict, rationale: &str) -> Self {
        Self {
            voter_id,
            verdict,
            rationale: rationale.to_string(),
            responded: true,
            received: true,
        }
    }

    /// Whether this is a reject whose text should reach the feedback
    ///
    /// Unmarked replies count: their whole text is the rationale.
    /// Transport failures never do.
    #[inline]
    #[must_use]
    pub fn is_dissent(&self) -> bool {
        self.received && self.verdict == Verdict::Reject && !self.rationale.is_empty()
    }
}

/// Result of one validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsensusOutcome {
    /// Panel ruling
    pub verdict: ConsensusVerdict,
    /// Votes in panel order
    pub votes: Vec<Vote>,
    /// Dissent labelled `"<voter>: <rationale>"`, in panel order
    pub dissent_feedback: Vec<String>,
    /// Candidate with dissent folded in (pass only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_artifact: Option<Artifact>,
}

impl ConsensusOutcome {
    /// Tally votes under `policy`
    #[must_use]
    pub fn tally(votes: Vec<Vote>, policy: AbsentVotePolicy) -> Self {
        let accepts = votes.iter().filter(|v| v.verdict == Verdict::Accept).count();
        let counted = match policy {
            AbsentVotePolicy::Reject => votes.len(),
            AbsentVotePolicy::Abstain => votes.iter().filter(|v| v.responded).count(),
        };
        let verdict = if counted > 0 && accepts >= majority(counted) {
            ConsensusVerdict::Pass
        } else {
            ConsensusVerdict::Fail
        };

        let dissent_feedback = votes
            .iter()
            .filter(|v| v.is_dissent())
            .map(|v| format!("{}: {}", v.voter_id, v.rationale))
            .collect();

        Self {
            verdict,
            votes,
            dissent_feedback,
            enhanced_artifact: None,
        }
    }

    /// Whether the panel passed the candidate
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == ConsensusVerdict::Pass
    }

    /// Number of accepting votes
    #[must_use]
    pub fn accepts(&self) -> usize {
        self.votes.iter().filter(|v| v.verdict == Verdict::Accept).count()
    }

    /// Dissent feedback as one block of text
    #[must_use]
    pub fn feedback(&self) -> String {
        self.dissent_feedback.join("\n")
    }
}

/// Majority-vote validator over a voter panel
#[derive(Debug, Clone)]
pub struct ConsensusValidator {
    panel: Vec<VoterConfig>,
    policy: AbsentVotePolicy,
    enhancer: Option<String>,
}

impl ConsensusValidator {
    /// Create a validator without enhancement
    #[must_use]
    pub fn new(panel: Vec<VoterConfig>, policy: AbsentVotePolicy) -> Self {
        Self {
            panel,
            policy,
            enhancer: None,
        }
    }

    /// With dissent enhancement through `capability`
    #[inline]
    #[must_use]
    pub fn with_enhancer(mut self, capability: impl Into<String>) -> Self {
        self.enhancer = Some(capability.into());
        self
    }

    /// Panel size
    #[inline]
    #[must_use]
    pub fn panel_size(&self) -> usize {
        self.panel.len()
    }

    /// Validate a candidate
    ///
    /// # Errors
    /// Only prompt-format errors and cancellation are returned; voter
    /// failures become absent votes and enhancement failures are
    /// absorbed.
    pub async fn validate(
        &self,
        ctx: &StageContext<'_>,
        candidate: &Artifact,
    ) -> Result<ConsensusOutcome, StageError> {
        let prompt = ctx.render(VALIDATE_STAGE, PromptKey::Vote, &[("input", candidate.content())])?;

        let calls = self.panel.iter().map(|voter| {
            let prompt = prompt.clone();
            async move {
                match ctx.call(VALIDATE_STAGE, &voter.capability, prompt).await {
                    Ok(reply) => Ok(Vote::parse(voter.id.as_str(), &reply)),
                    Err(err) if err.is_cancelled() => Err(err),
                    Err(err) => {
                        tracing::warn!(voter = %voter.id, error = %err.cause, "voter gave no answer");
                        Ok(Vote::absent(voter.id.as_str(), err.cause.to_string()))
                    }
                }
            }
        });

        let mut votes = Vec::with_capacity(self.panel.len());
        for result in join_all(calls).await {
            match result {
                Ok(vote) => votes.push(vote),
                Err(_) => return Err(StageError::new(VALIDATE_STAGE, StageFailure::Cancelled)),
            }
        }

        let mut outcome = ConsensusOutcome::tally(votes, self.policy);
        tracing::info!(
            stage = VALIDATE_STAGE,
            accepts = outcome.accepts(),
            voters = self.panel.len(),
            passed = outcome.passed(),
            "consensus reached"
        );

        if outcome.passed() && !outcome.dissent_feedback.is_empty() {
            if let Some(enhancer) = &self.enhancer {
                outcome.enhanced_artifact = self.enhance(ctx, enhancer, candidate, &outcome).await?;
            }
        }
        Ok(outcome)
    }

    async fn enhance(
        &self,
        ctx: &StageContext<'_>,
        capability: &str,
        candidate: &Artifact,
        outcome: &ConsensusOutcome,
    ) -> Result<Option<Artifact>, StageError> {
        let suggestions = outcome
            .votes
            .iter()
            .filter(|v| v.is_dissent())
            .map(|v| v.rationale.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = ctx.render(
            ENHANCE_STAGE,
            PromptKey::Enhance,
            &[("input", candidate.content()), ("suggestions", &suggestions)],
        )?;

        match ctx.ask(ENHANCE_STAGE, capability, prompt).await {
            Ok(reply) => {
                let code = strip_code_fences(&reply);
                if code.is_empty() {
                    tracing::warn!(stage = ENHANCE_STAGE, "empty enhancement, keeping candidate");
                    return Ok(None);
                }
                tracing::info!(stage = ENHANCE_STAGE, dissent = outcome.dissent_feedback.len(), "folded dissent into candidate");
                Ok(Some(candidate.revise(ENHANCE_STAGE, code)))
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                tracing::warn!(stage = ENHANCE_STAGE, error = %err.cause, "enhancement failed, keeping candidate");
                Ok(None)
            }
        }
    }
}
