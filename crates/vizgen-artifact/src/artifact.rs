//! The artifact threaded through the pipeline
//!
//! An [`Artifact`] is never edited in place: every stage produces a new
//! version via [`Artifact::revise`] or [`Artifact::record`], which carry
//! the full, append-only stage history forward.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Classification of the request, fixed after the first stage
///
/// Selects which prompt/template family downstream stages use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// A mathematical equation or concept
    Math,
    /// A program, algorithm or logical process
    Logic,
}

impl ContentType {
    /// Wire label used by classification providers
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Math => "MATH",
            Self::Logic => "LOGIC",
        }
    }

    /// Template family key (lowercase)
    #[inline]
    #[must_use]
    pub const fn family(self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Logic => "logic",
        }
    }

    /// Parse a classifier answer
    ///
    /// Accepts the label at the start of the answer, ignoring case and
    /// surrounding whitespace (`"math"`, `"LOGIC\n"`, `"Math."`).
    #[must_use]
    pub fn from_label(text: &str) -> Option<Self> {
        let head = text.trim_start();
        [Self::Math, Self::Logic].into_iter().find(|kind| {
            head.get(..kind.label().len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(kind.label()))
        })
    }
}

impl Display for ContentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one stage as recorded in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Stage completed
    Ok,
    /// Stage failed (the detail is kept on the record)
    Failed,
}

/// One immutable entry of an artifact's stage history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    stage: String,
    status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
}

impl StageRecord {
    /// Successful stage
    #[inline]
    #[must_use]
    pub fn ok(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Ok,
            error_detail: None,
        }
    }

    /// Failed stage with detail
    #[inline]
    #[must_use]
    pub fn failed(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Failed,
            error_detail: Some(detail.into()),
        }
    }

    /// Stage name
    #[inline]
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Stage status
    #[inline]
    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.status
    }

    /// Failure detail, if any
    #[inline]
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }
}

/// Errors related to artifact operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactError {
    /// Attempt to change an already-fixed classification
    #[error("content type already fixed as {fixed}, refusing {requested}")]
    ContentTypeFixed {
        fixed: ContentType,
        requested: ContentType,
    },
}

/// A versioned pipeline artifact
///
/// # Invariants
/// - `hash` is always the hash of `content`
/// - `content_type` never changes once set
/// - `history` only grows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    content: String,
    content_type: Option<ContentType>,
    history: Vec<StageRecord>,
    hash: ContentHash,
}

impl Artifact {
    /// Create the entry artifact from raw request text
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            hash: ContentHash::of_text(&content),
            content,
            content_type: None,
            history: Vec::new(),
        }
    }

    /// Current payload
    #[inline]
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Classification, once fixed
    #[inline]
    #[must_use]
    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }

    /// Stage history, oldest first
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    /// Hash of the current payload
    #[inline]
    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Version number (number of recorded stages)
    #[inline]
    #[must_use]
    pub fn version(&self) -> usize {
        self.history.len()
    }

    /// Most recent history entry
    #[inline]
    #[must_use]
    pub fn last_record(&self) -> Option<&StageRecord> {
        self.history.last()
    }

    /// Fix the classification, recording the classifying stage
    ///
    /// Re-classifying with the same type is a no-op apart from the record.
    ///
    /// # Errors
    /// Returns [`ArtifactError::ContentTypeFixed`] when a different type
    /// was already set.
    pub fn classify(
        &self,
        stage: impl Into<String>,
        content_type: ContentType,
    ) -> Result<Self, ArtifactError> {
        match self.content_type {
            Some(fixed) if fixed != content_type => Err(ArtifactError::ContentTypeFixed {
                fixed,
                requested: content_type,
            }),
            _ => {
                let mut next = self.record(StageRecord::ok(stage));
                next.content_type = Some(content_type);
                Ok(next)
            }
        }
    }

    /// New version with replaced content and a successful record
    #[must_use]
    pub fn revise(&self, stage: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let mut history = self.history.clone();
        history.push(StageRecord::ok(stage));
        Self {
            hash: ContentHash::of_text(&content),
            content,
            content_type: self.content_type,
            history,
        }
    }

    /// New version with the same content and an extra record
    #[must_use]
    pub fn record(&self, record: StageRecord) -> Self {
        let mut next = self.clone();
        next.history.push(record);
        next
    }

    /// Whether two versions carry the same payload
    #[inline]
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revise_replaces_content_and_appends_history() {
        let a = Artifact::new("plot y = x^2");
        let b = a.revise("extract", "y = x^2");

        assert_eq!(a.content(), "plot y = x^2");
        assert_eq!(b.content(), "y = x^2");
        assert_eq!(b.version(), 1);
        assert_eq!(b.last_record().unwrap().stage(), "extract");
        assert!(!a.same_content(&b));
    }

    #[test]
    fn classification_is_fixed_once_set() {
        let a = Artifact::new("bubble sort")
            .classify("classify", ContentType::Logic)
            .unwrap();
        assert_eq!(a.content_type(), Some(ContentType::Logic));

        let again = a.classify("classify", ContentType::Logic).unwrap();
        assert_eq!(again.content_type(), Some(ContentType::Logic));

        let err = a.classify("classify", ContentType::Math).unwrap_err();
        assert_eq!(
            err,
            ArtifactError::ContentTypeFixed {
                fixed: ContentType::Logic,
                requested: ContentType::Math
            }
        );
    }

    #[test]
    fn content_type_survives_revisions() {
        let a = Artifact::new("x")
            .classify("classify", ContentType::Math)
            .unwrap()
            .revise("generate", "function setup() {}");
        assert_eq!(a.content_type(), Some(ContentType::Math));
    }

    #[test]
    fn record_keeps_content() {
        let a = Artifact::new("code");
        let b = a.record(StageRecord::failed("optimize", "timed out"));
        assert!(a.same_content(&b));
        assert_eq!(b.history()[0].status(), StageStatus::Failed);
        assert_eq!(b.history()[0].error_detail(), Some("timed out"));
    }

    #[test]
    fn content_type_labels() {
        assert_eq!(ContentType::from_label("MATH"), Some(ContentType::Math));
        assert_eq!(ContentType::from_label("  logic\n"), Some(ContentType::Logic));
        assert_eq!(ContentType::from_label("Math."), Some(ContentType::Math));
        assert_eq!(ContentType::from_label("physics"), None);
        assert_eq!(ContentType::from_label(""), None);
    }

    #[test]
    fn serializes_with_hex_hash() {
        let a = Artifact::new("draw()");
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["hash"].as_str().unwrap().len(), 64);
        let back: Artifact = serde_json::from_value(json).unwrap();
        assert_eq!(a, back);
    }
}
