//! Provider wire formats
//!
//! Request bodies and response envelopes for the supported
//! [`ProviderKind`]s. Envelope decoding never panics: anything
//! unexpected becomes [`TransportError::MalformedEnvelope`].

use crate::config::{ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use vizgen_core::TransportError;

/// A configured provider with its resolved API key
#[derive(Clone)]
pub(crate) struct Provider {
    pub(crate) name: String,
    pub(crate) config: ProviderConfig,
    api_key: String,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("kind", &self.config.kind)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl Provider {
    pub(crate) fn new(name: impl Into<String>, config: ProviderConfig, api_key: String) -> Self {
        Self {
            name: name.into(),
            config,
            api_key,
        }
    }

    /// Endpoint URL for one completion
    pub(crate) fn endpoint(&self) -> String {
        match self.config.kind {
            ProviderKind::Gemini => format!(
                "{}/models/{}:generateContent",
                self.config.base_url(),
                self.config.model
            ),
            ProviderKind::OpenaiCompatible => format!("{}/chat/completions", self.config.base_url()),
        }
    }

    /// Build the HTTP request for a prompt
    pub(crate) fn request(&self, client: &reqwest::Client, prompt: &str) -> reqwest::RequestBuilder {
        let builder = client.post(self.endpoint());
        match self.config.kind {
            ProviderKind::Gemini => builder
                .header("x-goog-api-key", &self.api_key)
                .json(&GeminiRequest::new(prompt, &self.config)),
            ProviderKind::OpenaiCompatible => builder
                .bearer_auth(&self.api_key)
                .json(&ChatRequest::new(prompt, &self.config)),
        }
    }

    /// Extract the reply text from a response body
    pub(crate) fn parse(&self, body: &str) -> Result<String, TransportError> {
        match self.config.kind {
            ProviderKind::Gemini => parse_gemini(body),
            ProviderKind::OpenaiCompatible => parse_chat(body),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: [GeminiContent<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

impl<'a> GeminiRequest<'a> {
    fn new(prompt: &'a str, config: &ProviderConfig) -> Self {
        let generation_config = (config.temperature.is_some() || config.max_tokens.is_some()).then(|| {
            GenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_tokens,
            }
        });
        Self {
            contents: [GeminiContent {
                parts: [GeminiPart { text: prompt }],
            }],
            generation_config,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiReplyContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyPart {
    text: Option<String>,
}

fn parse_gemini(body: &str) -> Result<String, TransportError> {
    let envelope: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::MalformedEnvelope(format!("gemini: {e}")))?;

    let content = envelope
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .ok_or_else(|| TransportError::MalformedEnvelope("gemini: no candidates".into()))?;

    let text: String = content.parts.into_iter().filter_map(|part| part.text).collect();
    if text.is_empty() {
        return Err(TransportError::MalformedEnvelope("gemini: candidate has no text".into()));
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> ChatRequest<'a> {
    fn new(prompt: &'a str, config: &'a ProviderConfig) -> Self {
        Self {
            model: &config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

fn parse_chat(body: &str) -> Result<String, TransportError> {
    let envelope: ChatResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::MalformedEnvelope(format!("chat completion: {e}")))?;

    envelope
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.is_empty())
        .ok_or_else(|| TransportError::MalformedEnvelope("chat completion: missing choices[0] content".into()))
}
