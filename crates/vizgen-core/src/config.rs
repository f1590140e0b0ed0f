//! Pipeline configuration
//!
//! [`PipelineConfig`] is plain data: it can be built in code with the
//! `with_*` methods or loaded from TOML. Every field has a default, so a
//! config file only needs the values it changes:
//!
//! ```toml
//! stage_timeout_secs = 60
//! repair_attempts = 2
//! absent_votes = "abstain"
//!
//! [[panel]]
//! id = "gemini"
//! capability = "vote.gemini"
//!
//! [[panel]]
//! id = "qwen"
//! capability = "vote.qwen"
//!
//! [capabilities]
//! generate = "codegen"
//!
//! [prompts]
//! last_resort = "Draw a circle labelled {content}"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// One consensus voter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterConfig {
    /// Voter id, used to label dissent
    pub id: String,
    /// Gateway capability the voter calls
    pub capability: String,
}

impl VoterConfig {
    /// Create a voter
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
        }
    }
}

/// How voters that give no usable answer are counted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsentVotePolicy {
    /// Count as reject; majority over the whole panel
    #[default]
    Reject,
    /// Leave out; majority over responders only
    Abstain,
}

/// Gateway capability id per stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct CapabilityMap {
    pub classify: String,
    pub extract: String,
    pub verify_domain: String,
    pub formalize: String,
    pub specify: String,
    pub structure_draft: String,
    pub structure_verify: String,
    pub generate: String,
    pub review: String,
    pub test_cases: String,
    pub sanitize_primary: String,
    pub sanitize_secondary: String,
    pub completeness: String,
    pub enhance: String,
    pub repair: String,
    pub simplified: String,
    pub last_resort: String,
    pub optimize: String,
    pub document: String,
}

impl Default for CapabilityMap {
    fn default() -> Self {
        Self {
            classify: "classify".into(),
            extract: "extract".into(),
            verify_domain: "verify_domain".into(),
            formalize: "formalize".into(),
            specify: "specify".into(),
            structure_draft: "structure_draft".into(),
            structure_verify: "structure_verify".into(),
            generate: "generate".into(),
            review: "review".into(),
            test_cases: "test_cases".into(),
            sanitize_primary: "sanitize_primary".into(),
            sanitize_secondary: "sanitize_secondary".into(),
            completeness: "completeness".into(),
            enhance: "enhance".into(),
            repair: "repair".into(),
            simplified: "simplified".into(),
            last_resort: "last_resort".into(),
            optimize: "optimize".into(),
            document: "document".into(),
        }
    }
}

impl CapabilityMap {
    /// `(stage, capability)` pairs in pipeline order
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("classify", &self.classify),
            ("extract", &self.extract),
            ("verify_domain", &self.verify_domain),
            ("formalize", &self.formalize),
            ("specify", &self.specify),
            ("structure_draft", &self.structure_draft),
            ("structure_verify", &self.structure_verify),
            ("generate", &self.generate),
            ("review", &self.review),
            ("test_cases", &self.test_cases),
            ("sanitize_primary", &self.sanitize_primary),
            ("sanitize_secondary", &self.sanitize_secondary),
            ("completeness", &self.completeness),
            ("enhance", &self.enhance),
            ("repair", &self.repair),
            ("simplified", &self.simplified),
            ("last_resort", &self.last_resort),
            ("optimize", &self.optimize),
            ("document", &self.document),
        ]
        .into_iter()
        .map(|(stage, capability)| (stage, capability.as_str()))
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time budget for each provider call, in seconds
    pub stage_timeout_secs: u64,
    /// Repair attempts before the simplified rung
    pub repair_attempts: u32,
    /// Consensus panel
    pub panel: Vec<VoterConfig>,
    /// Absent-vote policy
    pub absent_votes: AbsentVotePolicy,
    /// Fold dissent into an enhanced artifact on pass
    pub enhance_on_dissent: bool,
    /// Review generated code once and regenerate on issues
    pub self_review: bool,
    /// Capability ids
    pub capabilities: CapabilityMap,
    /// Prompt template overrides
    pub prompts: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 120,
            repair_attempts: 3,
            panel: vec![
                VoterConfig::new("gemini", "vote.gemini"),
                VoterConfig::new("qwen", "vote.qwen"),
                VoterConfig::new("llama", "vote.llama"),
            ],
            absent_votes: AbsentVotePolicy::Reject,
            enhance_on_dissent: true,
            self_review: false,
            capabilities: CapabilityMap::default(),
            prompts: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With stage timeout
    #[inline]
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_secs = timeout.as_secs();
        self
    }

    /// With repair attempts
    #[inline]
    #[must_use]
    pub fn with_repair_attempts(mut self, attempts: u32) -> Self {
        self.repair_attempts = attempts;
        self
    }

    /// With voter panel
    #[inline]
    #[must_use]
    pub fn with_panel(mut self, panel: Vec<VoterConfig>) -> Self {
        self.panel = panel;
        self
    }

    /// With absent-vote policy
    #[inline]
    #[must_use]
    pub fn with_absent_votes(mut self, policy: AbsentVotePolicy) -> Self {
        self.absent_votes = policy;
        self
    }

    /// With enhancement on dissent
    #[inline]
    #[must_use]
    pub fn with_enhance_on_dissent(mut self, enabled: bool) -> Self {
        self.enhance_on_dissent = enabled;
        self
    }

    /// With generation self-review
    #[inline]
    #[must_use]
    pub fn with_self_review(mut self, enabled: bool) -> Self {
        self.self_review = enabled;
        self
    }

    /// With a prompt template override
    #[inline]
    #[must_use]
    pub fn with_prompt(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.prompts.insert(name.into(), template.into());
        self
    }

    /// Per-call time budget
    #[inline]
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Parse configuration from TOML text and validate it
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file and validate it
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise
    /// as [`PipelineConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for an empty panel, duplicate
    /// voter ids, empty capability ids or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid("stage_timeout_secs must be positive".into()));
        }
        if self.panel.is_empty() {
            return Err(ConfigError::Invalid("consensus panel is empty".into()));
        }

        if let Some((stage, _)) = self.capabilities.entries().find(|(_, cap)| cap.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("capability for '{stage}' is empty")));
        }

        let mut seen = HashSet::new();
        for voter in &self.panel {
            if voter.id.trim().is_empty() || voter.capability.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "voter id and capability must not be empty".into(),
                ));
            }
            if !seen.insert(voter.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate voter id '{}'", voter.id)));
            }
        }
        Ok(())
    }
}
