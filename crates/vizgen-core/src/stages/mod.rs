//! Pipeline stages
//!
//! - [`Classifier`]: fixes the content type
//! - [`PromptStage`]: one templated call (extraction, specification, ...)
//! - [`StructureStage`]: draft plus embedded verification
//! - [`GenerationStage`]: code generation with optional self-review
//! - [`SanitizationStage`]: two sanitizing passes with rollback on regression

mod classify;
mod generation;
mod prompt;
mod sanitize;
mod structure;

pub use classify::Classifier;
pub use generation::GenerationStage;
pub use prompt::PromptStage;
pub use sanitize::{Completeness, SanitizationStage};
pub use structure::{Arbitration, StructureStage};
