//! Testing utilities for vizgen workspace
//!
//! Shared test helpers and fixtures: a scripted, call-counting provider
//! gateway and canned replies for a pipeline that succeeds end to end.

#![allow(missing_docs)]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use vizgen_core::{PipelineConfig, PipelineOrchestrator, ProviderGateway, ProviderRequest, TransportError};

/// One scripted reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Text(String),
    Fail(TransportError),
    Delayed(Duration, Box<Scripted>),
}

impl Scripted {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Gateway answering from per-capability scripts
///
/// Queued replies are consumed first, then the capability's default.
/// A capability with neither fails with [`TransportError::NoRoute`].
/// Every request is counted and logged.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    defaults: Mutex<HashMap<String, Scripted>>,
    calls: DashMap<String, usize>,
    log: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default reply for a capability
    pub fn always(self, capability: &str, reply: impl Into<String>) -> Self {
        self.defaults
            .lock()
            .insert(capability.to_string(), Scripted::text(reply));
        self
    }

    /// Default failure for a capability
    pub fn always_fail(self, capability: &str, error: TransportError) -> Self {
        self.defaults
            .lock()
            .insert(capability.to_string(), Scripted::Fail(error));
        self
    }

    /// Queue one reply for a capability
    pub fn then(self, capability: &str, reply: impl Into<String>) -> Self {
        self.push(capability, Scripted::text(reply))
    }

    /// Queue one failure for a capability
    pub fn then_fail(self, capability: &str, error: TransportError) -> Self {
        self.push(capability, Scripted::Fail(error))
    }

    /// Queue any scripted reply
    pub fn push(self, capability: &str, reply: Scripted) -> Self {
        self.queues
            .lock()
            .entry(capability.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Number of calls made to a capability
    pub fn calls(&self, capability: &str) -> usize {
        self.calls.get(capability).map_or(0, |count| *count)
    }

    /// Number of calls made to capabilities starting with `prefix`
    pub fn calls_with_prefix(&self, prefix: &str) -> usize {
        self.calls
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| *entry.value())
            .sum()
    }

    /// Total number of calls
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    /// Requests in call order
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.log.lock().clone()
    }

    /// Prompts sent to a capability, in call order
    pub fn prompts_for(&self, capability: &str) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|req| req.capability == capability)
            .map(|req| req.prompt.clone())
            .collect()
    }

    fn next_reply(&self, capability: &str) -> Option<Scripted> {
        let queued = self
            .queues
            .lock()
            .get_mut(capability)
            .and_then(VecDeque::pop_front);
        queued.or_else(|| self.defaults.lock().get(capability).cloned())
    }
}

#[async_trait]
impl ProviderGateway for ScriptedGateway {
    async fn invoke(&self, request: ProviderRequest) -> Result<String, TransportError> {
        *self.calls.entry(request.capability.clone()).or_insert(0) += 1;
        self.log.lock().push(request.clone());

        let mut reply = self
            .next_reply(&request.capability)
            .ok_or_else(|| TransportError::NoRoute(request.capability.clone()))?;

        loop {
            match reply {
                Scripted::Text(text) => return Ok(text),
                Scripted::Fail(error) => return Err(error),
                Scripted::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

/// Canned replies for a run that passes every stage
pub mod replies {
    pub const EXTRACTED: &str = "y = x^2 for x in [-5, 5]";
    pub const VERIFIED: &str = "y = x^2 for x in [-5, 5], parabola with vertex at the origin";
    pub const FORMALIZED: &str = "bubble sort: compare adjacent pairs, swap when out of order, repeat until no swaps";
    pub const SPECIFICATION: &str = "canvas 400x400, axes, curve, slider for x range";
    pub const STRUCTURE: &str = "globals; setup(); draw(); drawAxes(); drawCurve()";
    pub const GENERATED: &str = "function setup() { createCanvas(400, 400); }\nfunction draw() { background(255); }";
    pub const TEST_CASES: &str = "1. canvas is 400x400\n2. curve passes through origin";
    pub const SANITIZED_1: &str = "function setup() { createCanvas(400, 400); }\nfunction draw() { background(255); } // pass 1";
    pub const SANITIZED_2: &str = "function setup() { createCanvas(400, 400); }\nfunction draw() { background(255); } // pass 2";
    pub const ENHANCED: &str = "function setup() { createCanvas(400, 400); }\nfunction draw() { background(255); } // enhanced";
    pub const REPAIRED: &str = "function draw() { /* repaired */ }";
    pub const SIMPLIFIED: &str = "function draw() { /* simplified */ }";
    pub const LAST_RESORT: &str = "function draw() { circle(200, 200, 50); }";
    pub const OPTIMIZED: &str = "function setup(){createCanvas(400,400)}function draw(){background(255)}";
    pub const DOCUMENTATION: &str = "Drag the slider to change the x range.";
}

/// Voter capabilities of [`test_config`]
pub const VOTERS: [&str; 3] = ["vote.gemini", "vote.qwen", "vote.llama"];

/// Default configuration with a short timeout
pub fn test_config() -> PipelineConfig {
    PipelineConfig::new().with_stage_timeout(Duration::from_secs(5))
}

/// Gateway where every stage succeeds and every voter accepts
pub fn happy_path_gateway(classification: &str) -> ScriptedGateway {
    let gateway = ScriptedGateway::new()
        .always("classify", classification)
        .always("extract", replies::EXTRACTED)
        .always("verify_domain", replies::VERIFIED)
        .always("formalize", replies::FORMALIZED)
        .always("specify", replies::SPECIFICATION)
        .always("structure_draft", replies::STRUCTURE)
        .always("structure_verify", "VALID")
        .always("generate", format!("```javascript\n{}\n```", replies::GENERATED))
        .always("test_cases", replies::TEST_CASES)
        .always("sanitize_primary", replies::SANITIZED_1)
        .always("sanitize_secondary", replies::SANITIZED_2)
        .always("completeness", "COMPLETE")
        .always("enhance", replies::ENHANCED)
        .always("repair", replies::REPAIRED)
        .always("simplified", replies::SIMPLIFIED)
        .always("last_resort", replies::LAST_RESORT)
        .always("optimize", replies::OPTIMIZED)
        .always("document", replies::DOCUMENTATION);

    VOTERS
        .iter()
        .fold(gateway, |gateway, voter| gateway.always(voter, "YES"))
}

/// Orchestrator over a shared scripted gateway
pub fn orchestrator(gateway: &Arc<ScriptedGateway>, config: PipelineConfig) -> PipelineOrchestrator {
    let shared: Arc<dyn ProviderGateway> = gateway.clone();
    PipelineOrchestrator::new(shared, config).expect("test config is valid")
}
