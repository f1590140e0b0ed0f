//! vizgen Core - resilient visualization pipeline
//!
//! Turns a natural-language request into verified p5.js code by routing
//! it through generation and verification stages, each delegated to an
//! interchangeable provider behind a [`ProviderGateway`]:
//! - Sequences dependent stages, stopping at the first hard failure
//! - Reaches consensus among disagreeing voters by majority rule
//! - Degrades through an escalating fallback ladder instead of failing
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vizgen_core::{PipelineConfig, PipelineOrchestrator, RunStatus};
//!
//! # async fn example(gateway: Arc<dyn vizgen_core::ProviderGateway>) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = PipelineOrchestrator::new(gateway, PipelineConfig::new())?;
//! let run = orchestrator.execute("plot sin(x) from -pi to pi").await;
//!
//! if run.status != RunStatus::Error {
//!     println!("{}", run.final_content().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod consensus;
pub mod error;
pub mod fences;
pub mod gateway;
pub mod ladder;
pub mod markers;
pub mod pipeline;
pub mod prompts;
pub mod stage;
pub mod stages;
pub mod types;

pub use config::{AbsentVotePolicy, CapabilityMap, PipelineConfig, VoterConfig};
pub use consensus::{majority, ConsensusOutcome, ConsensusValidator, ConsensusVerdict, Verdict, Vote};
pub use error::{ConfigError, StageError, StageFailure, TransportError};
pub use fences::strip_code_fences;
pub use gateway::{ProviderGateway, ProviderRequest};
pub use ladder::{FallbackLadder, LadderCapabilities, LadderResult};
pub use markers::{Marker, Reply};
pub use pipeline::PipelineOrchestrator;
pub use prompts::{PromptBook, PromptKey};
pub use stage::{Stage, StageContext, StageOutput};
pub use types::{
    AuxiliaryOutputs, FailureReport, LadderReport, PipelineRun, RunId, RunStatus, Rung,
    DOCUMENTATION_PLACEHOLDER, TEST_CASES_PLACEHOLDER,
};

pub use vizgen_artifact::{Artifact, ContentType, StageRecord, StageStatus};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with vizgen Core
    pub use crate::{
        Artifact, ContentType, PipelineConfig, PipelineOrchestrator, PipelineRun, ProviderGateway,
        ProviderRequest, RunStatus, TransportError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
