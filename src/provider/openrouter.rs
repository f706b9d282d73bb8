use async_trait::async_trait;

use super::{Provider, ProviderKind, ProviderOptions, TextRequest, non_empty, read_json};
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "openrouter/auto";

/// OpenAI-compatible chat completions with a model id typed in by the user.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterProvider {
    pub fn new(options: &ProviderOptions) -> Self {
        let model = options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_owned();
        Self {
            client: options.client(),
            base_url: options.base_url(DEFAULT_BASE_URL),
            api_key: options.api_key.clone(),
            model,
        }
    }

    fn chat_body(&self, request: &TextRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = request.system_with_json_fallback() {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));
        serde_json::json!({
            "model": self.model,
            "messages": messages,
        })
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openrouter
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn check_key(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/key", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        read_json(self.kind(), response).await.map(|_| ())
    }

    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.chat_body(request))
            .send()
            .await?;
        let value = read_json(self.kind(), response).await?;
        let text = value
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("missing choices[0].message.content".to_owned())
            })?;
        non_empty(text.to_owned(), self.kind())
    }
}
