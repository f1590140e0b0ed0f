//! vizgen Gateway - HTTP provider gateway
//!
//! Implements [`vizgen_core::ProviderGateway`] over HTTP:
//! - Routes capability ids to named providers (exact, prefix, default)
//! - Speaks Gemini `generateContent` and OpenAI-compatible chat completions
//! - Retries transient failures with exponential backoff
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vizgen_core::{PipelineConfig, PipelineOrchestrator};
//! use vizgen_gateway::{GatewayConfig, HttpGateway};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = HttpGateway::from_config(GatewayConfig::from_file("gateway.toml")?)?;
//! let orchestrator = PipelineOrchestrator::new(Arc::new(gateway), PipelineConfig::new())?;
//! let run = orchestrator.execute("animate bubble sort on 8 bars").await;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod http;
mod providers;

pub use config::{
    GatewayConfig, GatewayConfigError, ProviderConfig, ProviderKind, RetryPolicy, GEMINI_BASE_URL,
    OPENROUTER_BASE_URL,
};
pub use http::HttpGateway;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
