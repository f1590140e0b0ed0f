//! vizgen Artifact System
//!
//! The versioned payload threaded through the vizgen pipeline.
//!
//! # Core Concepts
//!
//! - [`Artifact`]: text payload plus classification and stage history
//! - [`ContentType`]: request classification fixed after the first stage
//! - [`StageRecord`]: one append-only audit entry
//! - [`ContentHash`]: 32-byte Blake3 hash telling artifact versions apart
//!
//! # Example
//!
//! ```rust
//! use vizgen_artifact::{Artifact, ContentType};
//!
//! let entry = Artifact::new("plot sin(x) from -pi to pi");
//! let classified = entry.classify("classify", ContentType::Math).unwrap();
//! let next = classified.revise("extract", "y = sin(x), x in [-pi, pi]");
//!
//! assert_eq!(next.version(), 2);
//! assert!(!next.same_content(&classified));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod hash;

pub use artifact::{Artifact, ArtifactError, ContentType, StageRecord, StageStatus};
pub use hash::{ContentHash, HashError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
