//! Uniform contract over the AI providers used for drafting articles and
//! generating images.
//!
//! Pipeline code only ever talks to [`Provider`]; the concrete provider is
//! chosen once by [`create_provider`] from configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

mod claude;
mod gemini;
mod openai;
mod openrouter;

pub use claude::ClaudeProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use openrouter::OpenRouterProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    Openai,
    Claude,
    Openrouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gemini,
        ProviderKind::Openai,
        ProviderKind::Claude,
        ProviderKind::Openrouter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Openai => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Openrouter => "openrouter",
        }
    }

    /// Environment variable consulted when no key was entered.
    pub fn api_key_env(self) -> String {
        format!("POSTFORGE_{}_API_KEY", self.as_str().to_ascii_uppercase())
    }

    pub fn base_url_env(self) -> String {
        format!("POSTFORGE_{}_BASE_URL", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "openai" => Ok(ProviderKind::Openai),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "openrouter" => Ok(ProviderKind::Openrouter),
            other => anyhow::bail!(
                "unsupported provider: {other} (expected one of: gemini, openai, claude, openrouter)"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    #[default]
    Idle,
    Validating,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub prompt: String,
    pub system_instruction: Option<String>,
    /// JSON schema of the expected answer. Providers without structured
    /// output fall back to asking for JSON in the prompt.
    pub json_schema: Option<serde_json::Value>,
    /// Ask for web-search augmentation where the provider offers it.
    pub web_search: bool,
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.json_schema = Some(schema);
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    /// System instruction with the JSON fallback appended, for providers
    /// that cannot enforce a schema natively.
    fn system_with_json_fallback(&self) -> Option<String> {
        let Some(schema) = self.json_schema.as_ref() else {
            return self.system_instruction.clone();
        };
        let mut system = self.system_instruction.clone().unwrap_or_default();
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(
            "Respond with a single valid JSON object only, no commentary. \
The object must match this JSON schema:\n",
        );
        system.push_str(&schema.to_string());
        Some(system)
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Whether `json_schema` is enforced by the provider itself.
    fn supports_schema(&self) -> bool {
        false
    }

    /// Cheapest call that proves the key is accepted.
    async fn check_key(&self) -> Result<(), ProviderError>;

    async fn validate_key(&self) -> KeyStatus {
        match self.check_key().await {
            Ok(()) => KeyStatus::Valid,
            Err(err) => {
                tracing::debug!(provider = %self.kind(), error = %err, "key validation failed");
                KeyStatus::Invalid
            }
        }
    }

    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError>;

    /// Returns the generated image as base64.
    async fn generate_image(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: self.kind(),
            operation: "image generation",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub client: Option<reqwest::Client>,
}

impl ProviderOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    fn client(&self) -> reqwest::Client {
        self.client.clone().unwrap_or_default()
    }

    fn base_url(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_owned()
    }
}

pub fn create_provider(
    kind: ProviderKind,
    options: &ProviderOptions,
) -> Result<Arc<dyn Provider>, ProviderError> {
    if options.api_key.trim().is_empty() {
        return Err(ProviderError::MissingCredentials(kind));
    }
    tracing::debug!(provider = %kind, model = ?options.model, "create provider");
    let provider: Arc<dyn Provider> = match kind {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(options)),
        ProviderKind::Openai => Arc::new(OpenAiProvider::new(options)),
        ProviderKind::Claude => Arc::new(ClaudeProvider::new(options)),
        ProviderKind::Openrouter => Arc::new(OpenRouterProvider::new(options)),
    };
    Ok(provider)
}

/// Removes an optional markdown code fence around a model answer. Must be
/// applied to every text response before parsing it as JSON.
pub fn clean_json_response(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        return body.trim();
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    // Prose around the object: keep the outermost braces.
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

pub fn parse_json_response<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, ProviderError> {
    let cleaned = clean_json_response(text);
    serde_json::from_str(cleaned).map_err(|err| {
        ProviderError::InvalidResponse(format!("model answer is not the expected JSON: {err}"))
    })
}

/// Reads a provider response body, mapping non-2xx answers to
/// [`ProviderError::Api`] with the provider's own message.
pub(crate) async fn read_json(
    kind: ProviderKind,
    response: reqwest::Response,
) -> Result<serde_json::Value, ProviderError> {
    let status = response.status();
    let raw = response.text().await?;
    if !status.is_success() {
        let message = parse_error_message(&raw).unwrap_or(raw);
        return Err(ProviderError::Api {
            provider: kind,
            status: status.as_u16(),
            message,
        });
    }
    Ok(serde_json::from_str(&raw)?)
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let error = value.get("error")?;
    if let Some(message) = error.as_str() {
        return Some(message.to_owned());
    }
    Some(error.get("message")?.as_str()?.to_owned())
}

fn non_empty(text: String, kind: ProviderKind) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        return Err(ProviderError::InvalidResponse(format!(
            "{kind} returned an empty answer"
        )));
    }
    Ok(text)
}
