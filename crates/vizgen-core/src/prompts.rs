//! Prompt templates
//!
//! A [`PromptBook`] holds one template per [`PromptKey`]. Keys that
//! depend on the content type (`specify`, `vote`, `simplified`) hold one
//! template per family and are stored as `"<key>.math"` / `"<key>.logic"`.
//!
//! Templates use `{name}` placeholders; `{{` and `}}` render literal
//! braces. Rendering with a variable missing fails with
//! [`StageFailure::PromptFormat`].
//!
//! Common variables:
//! - `{input}`: content of the artifact entering the stage
//! - `{content}`: verified content (output of the domain chain)
//! - `{content_type}`: `MATH` or `LOGIC`

use crate::error::{ConfigError, StageFailure};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use vizgen_artifact::ContentType;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{([a-z_]+)\}").expect("placeholder pattern is valid")
});

/// Identifies a prompt template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    /// Content classification
    Classify,
    /// Math: extract the concept from the request
    Extract,
    /// Math: verify the extracted concept
    VerifyDomain,
    /// Logic: formalize the process described by the request
    Formalize,
    /// Visualization specification (per family)
    Specify,
    /// Structural draft
    StructureDraft,
    /// Structural verification of the draft
    StructureVerify,
    /// Code generation
    Generate,
    /// Self-review of generated code
    Review,
    /// Regeneration after a failed self-review
    Regenerate,
    /// Test-case synthesis
    TestCases,
    /// Sanitization pass 1
    SanitizePrimary,
    /// Sanitization pass 2
    SanitizeSecondary,
    /// Sanitization completeness check
    Completeness,
    /// Consensus vote (per family)
    Vote,
    /// Enhancement folding in dissent
    Enhance,
    /// Ladder: diagnose and fix
    Repair,
    /// Ladder: simplified regeneration (per family)
    Simplified,
    /// Ladder: last resort
    LastResort,
    /// Post-validation optimization
    Optimize,
    /// Post-validation documentation
    Document,
}

impl PromptKey {
    /// Every key
    pub const ALL: [Self; 21] = [
        Self::Classify,
        Self::Extract,
        Self::VerifyDomain,
        Self::Formalize,
        Self::Specify,
        Self::StructureDraft,
        Self::StructureVerify,
        Self::Generate,
        Self::Review,
        Self::Regenerate,
        Self::TestCases,
        Self::SanitizePrimary,
        Self::SanitizeSecondary,
        Self::Completeness,
        Self::Vote,
        Self::Enhance,
        Self::Repair,
        Self::Simplified,
        Self::LastResort,
        Self::Optimize,
        Self::Document,
    ];

    /// Template name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Extract => "extract",
            Self::VerifyDomain => "verify_domain",
            Self::Formalize => "formalize",
            Self::Specify => "specify",
            Self::StructureDraft => "structure_draft",
            Self::StructureVerify => "structure_verify",
            Self::Generate => "generate",
            Self::Review => "review",
            Self::Regenerate => "regenerate",
            Self::TestCases => "test_cases",
            Self::SanitizePrimary => "sanitize_primary",
            Self::SanitizeSecondary => "sanitize_secondary",
            Self::Completeness => "completeness",
            Self::Vote => "vote",
            Self::Enhance => "enhance",
            Self::Repair => "repair",
            Self::Simplified => "simplified",
            Self::LastResort => "last_resort",
            Self::Optimize => "optimize",
            Self::Document => "document",
        }
    }

    /// Whether the key has one template per content type
    #[inline]
    #[must_use]
    pub const fn per_family(self) -> bool {
        matches!(self, Self::Specify | Self::Vote | Self::Simplified)
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

/// Prompt templates, keyed by template name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBook {
    templates: BTreeMap<String, String>,
}

impl Default for PromptBook {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        for (name, text) in DEFAULT_TEMPLATES {
            templates.insert((*name).to_string(), (*text).to_string());
        }
        Self { templates }
    }
}

impl PromptBook {
    /// Default templates
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply template overrides
    ///
    /// Override keys are template names (`"generate"`) or, for
    /// per-family keys, `"vote.math"` / `"vote.logic"`. A bare per-family
    /// name replaces both families.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for unknown template names.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        for (name, text) in overrides {
            let (base, family) = match name.split_once('.') {
                Some((base, family)) => (base, Some(family)),
                None => (name.as_str(), None),
            };
            let key = PromptKey::from_name(base)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown prompt template '{name}'")))?;

            match (key.per_family(), family) {
                (false, None) => {
                    self.templates.insert(name.clone(), text.clone());
                }
                (true, None) => {
                    for content_type in [ContentType::Math, ContentType::Logic] {
                        self.templates
                            .insert(family_key(key, content_type), text.clone());
                    }
                }
                (true, Some(family)) if family == "math" || family == "logic" => {
                    self.templates.insert(name.clone(), text.clone());
                }
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown prompt template '{name}'"
                    )))
                }
            }
        }
        Ok(self)
    }

    /// Raw template text
    #[must_use]
    pub fn template(&self, key: PromptKey, content_type: Option<ContentType>) -> Option<&str> {
        let name = match (key.per_family(), content_type) {
            (true, Some(content_type)) => family_key(key, content_type),
            (true, None) => return None,
            (false, _) => key.name().to_string(),
        };
        self.templates.get(&name).map(String::as_str)
    }

    /// Render a template
    ///
    /// # Errors
    /// Returns [`StageFailure::PromptFormat`] when the template is
    /// missing or references a variable not in `vars`.
    pub fn render(
        &self,
        key: PromptKey,
        content_type: Option<ContentType>,
        vars: &[(&str, &str)],
    ) -> Result<String, StageFailure> {
        let template = self.template(key, content_type).ok_or_else(|| {
            StageFailure::PromptFormat(format!("no template for '{}'", key.name()))
        })?;
        fill(template, vars)
            .map_err(|var| StageFailure::PromptFormat(format!("template '{}' needs {{{var}}}", key.name())))
    }
}

fn family_key(key: PromptKey, content_type: ContentType) -> String {
    format!("{}.{}", key.name(), content_type.family())
}

/// Substitute placeholders, returning the first missing variable on failure
fn fill(template: &str, vars: &[(&str, &str)]) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        match caps.get(1) {
            Some(name) => {
                let value = vars
                    .iter()
                    .find(|(var, _)| *var == name.as_str())
                    .map(|(_, value)| *value)
                    .ok_or_else(|| name.as_str().to_string())?;
                out.push_str(value);
            }
            None if whole.as_str() == "{{" => out.push('{'),
            None => out.push('}'),
        }
    }

    out.push_str(&template[last..]);
    Ok(out)
}

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        "classify",
        "Classify the request below. Answer MATH if it asks to visualize a mathematical \
         equation or concept, LOGIC if it describes a program, algorithm or logical process. \
         Answer with the single word MATH or LOGIC.\n\nRequest: {input}",
    ),
    (
        "extract",
        "Extract the mathematical content of this request for an interactive p5.js \
         visualization: equations, variables, ranges and what should be shown. If the request \
         contains no usable mathematics, start your answer with 'error'.\n\nRequest: {input}",
    ),
    (
        "verify_domain",
        "Check the mathematical description below for correctness and completeness. Return \
         the corrected description only. If it cannot be made correct, start your answer with \
         'error'.\n\n{input}",
    ),
    (
        "formalize",
        "Formalize the process described by this request: inputs, state, step-by-step rules \
         and termination condition, precise enough to animate each step. If the request \
         describes no process, start your answer with 'error'.\n\nRequest: {input}",
    ),
    (
        "specify.math",
        "Write a specification for an interactive p5.js visualization of this mathematical \
         concept: canvas layout, plotted elements, axes and labels, user controls and \
         animation.\n\n{input}",
    ),
    (
        "specify.logic",
        "Write a specification for an interactive p5.js visualization that steps through \
         this process: state display, per-step transitions, highlighting, user controls and \
         timing.\n\n{input}",
    ),
    (
        "structure_draft",
        "Outline the structure of a p5.js sketch implementing the specification below: \
         globals, setup(), draw(), helper functions and event handlers.\n\n{input}",
    ),
    (
        "structure_verify",
        "Verify the sketch structure against its specification. If the structure covers the \
         specification, answer VALID. Otherwise answer with a corrected structure only.\n\n\
         Specification:\n{input}\n\nStructure:\n{draft}",
    ),
    (
        "generate",
        "Write the complete p5.js sketch for this {content_type} visualization following the \
         structure below. Return only JavaScript code.\n\n{input}",
    ),
    (
        "review",
        "Review the p5.js code below for runtime errors, logic errors and wrong API usage. If \
         it is correct, answer CODE PASSES TESTING. Otherwise list the issues.\n\n{input}",
    ),
    (
        "regenerate",
        "Write the complete p5.js sketch for this {content_type} visualization following the \
         structure below. Return only JavaScript code.\n\n{input}\n\nIssues to address:\n{issues}",
    ),
    (
        "test_cases",
        "Write test cases for the p5.js sketch below covering rendering, interaction and edge \
         values.\n\n{input}",
    ),
    (
        "sanitize_primary",
        "Fix syntax errors, undefined references and unsafe operations in the p5.js code \
         below without changing its behavior. Return only code.\n\n{input}",
    ),
    (
        "sanitize_secondary",
        "Harden the p5.js code below: guard divisions, clamp loops, handle resize. Do not \
         remove functionality. Return only code.\n\n{input}",
    ),
    (
        "completeness",
        "Compare the sanitized code with the earlier version. If no functionality was lost, \
         answer COMPLETE. Otherwise describe what is missing.\n\nEarlier:\n{draft}\n\n\
         Sanitized:\n{input}",
    ),
    (
        "vote.math",
        "Does this p5.js code correctly and reliably visualize the following mathematical \
         concept?\n\n{content}\n\nAnswer YES or NO, followed by a short reason or improvement \
         suggestion.\n\n{input}",
    ),
    (
        "vote.logic",
        "Does this p5.js code correctly and reliably animate the following process?\n\n\
         {content}\n\nAnswer YES or NO, followed by a short reason or improvement \
         suggestion.\n\n{input}",
    ),
    (
        "enhance",
        "Improve the accepted p5.js code using the reviewer suggestions. Keep everything that \
         works. Return only code.\n\nSuggestions:\n{suggestions}\n\nCode:\n{input}",
    ),
    (
        "repair",
        "Reviewers rejected the p5.js code below. Diagnose and fix the problems they raise. \
         Return only code.\n\nFeedback:\n{feedback}\n\nCode:\n{input}",
    ),
    (
        "simplified.math",
        "Earlier attempts failed. Write a simplified, reliable p5.js sketch for this \
         mathematical concept: static plot, minimal interaction, no external \
         libraries.\n\n{content}",
    ),
    (
        "simplified.logic",
        "Earlier attempts failed. Write a simplified, reliable p5.js sketch that steps through \
         this process with a single button and plain shapes.\n\n{content}",
    ),
    (
        "last_resort",
        "Write the simplest working p5.js sketch that illustrates the following. Return only \
         code.\n\n{content}",
    ),
    (
        "optimize",
        "Improve the performance and readability of the p5.js code below without changing \
         what it does. Return only code.\n\n{input}",
    ),
    (
        "document",
        "Write short user documentation for the p5.js sketch below: what it shows and how to \
         interact with it.\n\n{input}",
    ),
];
