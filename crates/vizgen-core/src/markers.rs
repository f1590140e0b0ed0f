//! Reply markers
//!
//! Providers signal outcomes with a leading keyword (`error`, `VALID`,
//! `YES`, `NO`, `COMPLETE`, `CODE PASSES TESTING`). A marker is a plain
//! case-insensitive prefix after leading whitespace: `"YESTERDAY"` starts
//! with `YES`, `"INCOMPLETE"` does not start with `COMPLETE`.
//!
//! Stages parse a reply once, at their boundary, into a typed value.

/// A reply marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Provider reports it could not do the task
    Error,
    /// Structural verifier accepts the draft
    Valid,
    /// Voter accepts the candidate
    Accept,
    /// Voter rejects the candidate
    Reject,
    /// Completeness check passes
    Complete,
    /// Self-review passes
    Passes,
}

impl Marker {
    /// Marker keyword
    #[inline]
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Valid => "VALID",
            Self::Accept => "YES",
            Self::Reject => "NO",
            Self::Complete => "COMPLETE",
            Self::Passes => "CODE PASSES TESTING",
        }
    }

    /// Check whether `text` starts with this marker
    #[must_use]
    pub fn matches(self, text: &str) -> bool {
        self.split(text).is_some()
    }

    /// Text after the marker, trimmed of leading punctuation and whitespace
    ///
    /// Returns `None` when the text does not start with the marker.
    #[must_use]
    pub fn strip(self, text: &str) -> Option<&str> {
        self.split(text).map(|rest| {
            rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | ',' | '.'))
                .trim_end()
        })
    }

    fn split(self, text: &str) -> Option<&str> {
        let head = text.trim_start();
        let keyword = self.keyword();
        let prefix = head.get(..keyword.len())?;
        prefix
            .eq_ignore_ascii_case(keyword)
            .then(|| &head[keyword.len()..])
    }
}

/// A provider reply with the error marker parsed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Usable text
    Ok(String),
    /// Provider reported an error (detail after the marker)
    Error(String),
}

impl Reply {
    /// Parse a raw provider reply
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match Marker::Error.strip(text) {
            Some(detail) if detail.is_empty() => Self::Error(text.trim().to_string()),
            Some(detail) => Self::Error(detail.to_string()),
            None => Self::Ok(text.to_string()),
        }
    }
}
