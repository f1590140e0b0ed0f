//! Core types for vizgen runs

use crate::consensus::ConsensusOutcome;
use crate::error::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use vizgen_artifact::{Artifact, ContentType};

/// Unique run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Candidate passed consensus (directly or after repair/simplification)
    Success,
    /// Last-resort output, accepted without validation
    Fallback,
    /// Run stopped at a failing stage
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Fallback => "fallback",
            Self::Error => "error",
        })
    }
}

/// Where and why a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Failing stage
    pub stage: String,
    /// Human-readable cause
    pub cause: String,
    /// Cause kind (`content`, `transport`, `timeout`, ...)
    pub kind: String,
}

impl From<&StageError> for FailureReport {
    fn from(err: &StageError) -> Self {
        Self {
            stage: err.stage.clone(),
            cause: err.cause.to_string(),
            kind: err.cause.kind().to_string(),
        }
    }
}

/// Best-effort side outputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryOutputs {
    /// Test cases for the generated code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_cases: Option<String>,
    /// User documentation for the final code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

/// Placeholder used when test-case synthesis fails
pub const TEST_CASES_PLACEHOLDER: &str = "Test case generation failed.";

/// Placeholder used when documentation fails
pub const DOCUMENTATION_PLACEHOLDER: &str = "Documentation generation failed.";

/// Ladder rung that produced the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rung {
    /// Diagnose-and-fix
    Repair,
    /// Simplified regeneration from verified content
    Simplified,
    /// Unconditional last resort
    LastResort,
}

/// What the fallback ladder did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderReport {
    /// Final rung reached
    pub rung: Rung,
    /// Repair generations performed
    pub repair_attempts: u32,
    /// Validator calls made by the ladder
    pub validations: u32,
}

/// Record of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    /// Run id
    pub id: RunId,
    /// Raw request text
    pub input: String,
    /// Terminal status
    pub status: RunStatus,
    /// Classification, when it was reached
    pub content_type: Option<ContentType>,
    /// Final artifact (success or fallback)
    pub final_artifact: Option<Artifact>,
    /// Failure (error only)
    pub failure: Option<FailureReport>,
    /// Side outputs
    pub auxiliary: AuxiliaryOutputs,
    /// Last consensus outcome
    pub consensus: Option<ConsensusOutcome>,
    /// Ladder report, when the ladder ran
    pub ladder: Option<LadderReport>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Finish time
    pub finished_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Failing stage name (error only)
    #[inline]
    #[must_use]
    pub fn failure_stage(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.stage.as_str())
    }

    /// Final code, if any
    #[inline]
    #[must_use]
    pub fn final_content(&self) -> Option<&str> {
        self.final_artifact.as_ref().map(Artifact::content)
    }

    /// Wall-clock duration in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
