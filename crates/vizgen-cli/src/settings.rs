//! Config file for the `vizgen` binary
//!
//! One TOML file: pipeline settings at the top level, the HTTP gateway
//! under `[gateway]`.
//!
//! ```toml
//! repair_attempts = 2
//!
//! [gateway]
//! default_provider = "gemini"
//!
//! [gateway.providers.gemini]
//! kind = "gemini"
//! model = "gemini-2.0-flash"
//! api_key_env = "GEMINI_API_KEY"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use vizgen_core::PipelineConfig;
use vizgen_gateway::GatewayConfig;

#[derive(Debug, Deserialize)]
struct GatewaySection {
    gateway: GatewayConfig,
}

/// Pipeline and gateway settings
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) pipeline: PipelineConfig,
    pub(crate) gateway: GatewayConfig,
}

impl Settings {
    pub(crate) fn from_toml_str(text: &str) -> Result<Self> {
        let pipeline = PipelineConfig::from_toml_str(text).context("pipeline settings")?;
        let GatewaySection { gateway } = toml::from_str(text).context("missing or malformed [gateway] section")?;
        gateway.validate().context("gateway settings")?;
        Ok(Self { pipeline, gateway })
    }

    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// `(stage, capability, provider)` for every capability the pipeline calls
    pub(crate) fn routing(&self) -> Vec<(String, String, Option<String>)> {
        let panel = self
            .pipeline
            .panel
            .iter()
            .map(|voter| (format!("vote:{}", voter.id), voter.capability.as_str()));
        self.pipeline
            .capabilities
            .entries()
            .map(|(stage, capability)| (stage.to_string(), capability))
            .chain(panel)
            .map(|(stage, capability)| {
                let provider = self.gateway.route(capability).map(str::to_string);
                (stage, capability.to_string(), provider)
            })
            .collect()
    }

    /// Fail when some capability has no provider
    pub(crate) fn ensure_routable(&self) -> Result<()> {
        let unrouted: Vec<String> = self
            .routing()
            .into_iter()
            .filter(|(_, _, provider)| provider.is_none())
            .map(|(_, capability, _)| capability)
            .collect();
        if !unrouted.is_empty() {
            bail!("no provider for capabilities: {}", unrouted.join(", "));
        }
        Ok(())
    }
}
