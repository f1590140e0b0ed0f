//! Stage pipeline orchestrator
//!
//! Drives one request through the fixed stage order:
//!
//! ```text
//! classify -> (math: extract, verify_domain | logic: formalize)
//!          -> specify -> structure -> generate -> [test_cases]
//!          -> sanitize -> validate -> pass: [optimize], [document]
//!                                  -> fail: fallback ladder -> [document]
//! ```
//!
//! Bracketed stages are best-effort. Every other stage failure ends the
//! run with [`RunStatus::Error`]. A run never panics and never returns a
//! raw provider error: the outcome is always a [`PipelineRun`].

use crate::config::PipelineConfig;
use crate::consensus::{ConsensusOutcome, ConsensusValidator};
use crate::error::{ConfigError, StageError, StageFailure};
use crate::gateway::ProviderGateway;
use crate::ladder::{FallbackLadder, LadderCapabilities};
use crate::prompts::{PromptBook, PromptKey};
use crate::stage::{Stage, StageContext};
use crate::stages::{Classifier, GenerationStage, PromptStage, SanitizationStage, StructureStage};
use crate::types::{
    AuxiliaryOutputs, FailureReport, LadderReport, PipelineRun, RunId, RunStatus,
    DOCUMENTATION_PLACEHOLDER, TEST_CASES_PLACEHOLDER,
};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use vizgen_artifact::{Artifact, ContentType, StageRecord};

/// Stage name for request intake
pub const INTAKE_STAGE: &str = "intake";

/// Side results collected while a run progresses
#[derive(Debug, Default)]
struct RunNotes {
    content_type: Option<ContentType>,
    auxiliary: AuxiliaryOutputs,
    consensus: Option<ConsensusOutcome>,
    ladder: Option<LadderReport>,
}

/// The pipeline orchestrator
///
/// Holds the shared gateway and the configured stages. One orchestrator
/// serves any number of concurrent runs; runs share no mutable state.
pub struct PipelineOrchestrator {
    gateway: Arc<dyn ProviderGateway>,
    config: PipelineConfig,
    prompts: PromptBook,
    classifier: Classifier,
    extract: PromptStage,
    verify_domain: PromptStage,
    formalize: PromptStage,
    specify: PromptStage,
    structure: StructureStage,
    generation: GenerationStage,
    test_cases: PromptStage,
    sanitize: SanitizationStage,
    validator: ConsensusValidator,
    ladder: FallbackLadder,
    optimize: PromptStage,
    document: PromptStage,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Create an orchestrator
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when the configuration fails
    /// validation or names an unknown prompt template.
    pub fn new(gateway: Arc<dyn ProviderGateway>, config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let prompts = PromptBook::new().with_overrides(&config.prompts)?;
        let caps = &config.capabilities;

        let mut generation = GenerationStage::new(&caps.generate);
        if config.self_review {
            generation = generation.with_review(&caps.review);
        }

        let mut validator = ConsensusValidator::new(config.panel.clone(), config.absent_votes);
        if config.enhance_on_dissent {
            validator = validator.with_enhancer(&caps.enhance);
        }

        let ladder = FallbackLadder::new(
            config.repair_attempts,
            LadderCapabilities {
                repair: caps.repair.clone(),
                simplified: caps.simplified.clone(),
                last_resort: caps.last_resort.clone(),
            },
        );

        Ok(Self {
            classifier: Classifier::new(&caps.classify),
            extract: PromptStage::new("extract", PromptKey::Extract, &caps.extract),
            verify_domain: PromptStage::new("verify_domain", PromptKey::VerifyDomain, &caps.verify_domain),
            formalize: PromptStage::new("formalize", PromptKey::Formalize, &caps.formalize),
            specify: PromptStage::new("specify", PromptKey::Specify, &caps.specify),
            structure: StructureStage::new(&caps.structure_draft, &caps.structure_verify),
            generation,
            test_cases: PromptStage::new("test_cases", PromptKey::TestCases, &caps.test_cases),
            sanitize: SanitizationStage::new(
                &caps.sanitize_primary,
                &caps.sanitize_secondary,
                &caps.completeness,
            ),
            validator,
            ladder,
            optimize: PromptStage::code("optimize", PromptKey::Optimize, &caps.optimize),
            document: PromptStage::new("document", PromptKey::Document, &caps.document),
            gateway,
            config,
            prompts,
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline on a request
    pub async fn execute(&self, input: &str) -> PipelineRun {
        self.execute_with_cancel(input, CancellationToken::new()).await
    }

    /// Run the pipeline, stopping early when `cancel` fires
    ///
    /// A cancelled run ends with [`RunStatus::Error`] and a `cancelled`
    /// failure at the stage that was in flight.
    pub async fn execute_with_cancel(&self, input: &str, cancel: CancellationToken) -> PipelineRun {
        let id = RunId::new();
        let started_at = Utc::now();
        let span = tracing::info_span!("pipeline_run", run_id = %id);

        let mut notes = RunNotes::default();
        let result = self.drive(input, &cancel, &mut notes).instrument(span.clone()).await;

        let _enter = span.enter();
        let (status, final_artifact, failure) = match result {
            Ok((status, artifact)) => {
                tracing::info!(%status, version = artifact.version(), "run finished");
                (status, Some(artifact), None)
            }
            Err(err) => {
                tracing::error!(stage = %err.stage, cause = %err.cause, "run failed");
                (RunStatus::Error, None, Some(FailureReport::from(&err)))
            }
        };

        PipelineRun {
            id,
            input: input.to_string(),
            status,
            content_type: notes.content_type,
            final_artifact,
            failure,
            auxiliary: notes.auxiliary,
            consensus: notes.consensus,
            ladder: notes.ladder,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn drive(
        &self,
        input: &str,
        cancel: &CancellationToken,
        notes: &mut RunNotes,
    ) -> Result<(RunStatus, Artifact), StageError> {
        if input.trim().is_empty() {
            return Err(StageError::new(
                INTAKE_STAGE,
                StageFailure::InvalidInput("empty request".into()),
            ));
        }

        let base = StageContext::new(
            self.gateway.as_ref(),
            &self.prompts,
            cancel,
            self.config.stage_timeout(),
        );
        let entry = Artifact::new(input);

        let content_type = self.classifier.classify(&base, &entry).await?;
        notes.content_type = Some(content_type);
        tracing::info!(stage = Classifier::NAME, %content_type, "request classified");
        let mut artifact = entry
            .classify(Classifier::NAME, content_type)
            .map_err(|err| StageError::new(Classifier::NAME, err))?;
        let ctx = base.with_content_type(content_type);

        let domain: Vec<&dyn Stage> = match content_type {
            ContentType::Math => vec![&self.extract as &dyn Stage, &self.verify_domain],
            ContentType::Logic => vec![&self.formalize],
        };
        for stage in domain {
            artifact = Self::run_stage(stage, &ctx, &artifact).await?;
        }

        let verified = artifact.content().to_string();
        let ctx = ctx.with_verified(&verified);

        let synthesis: [&dyn Stage; 3] = [&self.specify, &self.structure, &self.generation];
        for stage in synthesis {
            artifact = Self::run_stage(stage, &ctx, &artifact).await?;
        }

        notes.auxiliary.test_cases = Some(
            Self::best_effort(&self.test_cases, &ctx, &artifact)
                .await?
                .unwrap_or_else(|| TEST_CASES_PLACEHOLDER.to_string()),
        );

        artifact = Self::run_stage(&self.sanitize, &ctx, &artifact).await?;

        let outcome = self.validator.validate(&ctx, &artifact).await?;
        let accepted = if outcome.passed() {
            let accepted = outcome.enhanced_artifact.clone().unwrap_or(artifact);
            notes.consensus = Some(outcome);
            accepted
        } else {
            tracing::warn!(
                accepts = outcome.accepts(),
                voters = self.validator.panel_size(),
                "candidate rejected, entering fallback ladder"
            );
            notes.consensus = Some(outcome.clone());
            let result = self.ladder.recover(&ctx, &self.validator, &artifact, outcome).await?;
            notes.consensus = Some(result.consensus.clone());
            notes.ladder = Some(result.report.clone());
            if result.is_fallback() {
                notes.auxiliary.documentation = Some(self.documentation(&ctx, &result.artifact).await?);
                return Ok((RunStatus::Fallback, result.artifact));
            }
            result.artifact
        };

        let finished = match Self::best_effort(&self.optimize, &ctx, &accepted).await? {
            Some(code) => accepted.revise(self.optimize.name(), code),
            None => accepted.record(StageRecord::failed(self.optimize.name(), "kept unoptimized code")),
        };

        notes.auxiliary.documentation = Some(self.documentation(&ctx, &finished).await?);

        Ok((RunStatus::Success, finished))
    }

    async fn documentation(
        &self,
        ctx: &StageContext<'_>,
        artifact: &Artifact,
    ) -> Result<String, StageError> {
        Ok(Self::best_effort(&self.document, ctx, artifact)
            .await?
            .unwrap_or_else(|| DOCUMENTATION_PLACEHOLDER.to_string()))
    }

    async fn run_stage(
        stage: &dyn Stage,
        ctx: &StageContext<'_>,
        artifact: &Artifact,
    ) -> Result<Artifact, StageError> {
        tracing::info!(stage = stage.name(), version = artifact.version(), "stage started");
        let output = stage.run(ctx, artifact).await?;
        Ok(output.apply(stage.name(), artifact))
    }

    /// Run a stage whose failure only degrades the result
    ///
    /// Returns `Ok(None)` on failure; cancellation still aborts.
    async fn best_effort(
        stage: &dyn Stage,
        ctx: &StageContext<'_>,
        artifact: &Artifact,
    ) -> Result<Option<String>, StageError> {
        match stage.run(ctx, artifact).await {
            Ok(output) => Ok(Some(output.content)),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                tracing::warn!(stage = stage.name(), cause = %err.cause, "best-effort stage failed");
                Ok(None)
            }
        }
    }
}
