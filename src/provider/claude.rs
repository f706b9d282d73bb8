use async_trait::async_trait;

use super::{Provider, ProviderKind, ProviderOptions, TextRequest, non_empty, read_json};
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

pub struct ClaudeProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ClaudeProvider {
    pub fn new(options: &ProviderOptions) -> Self {
        Self {
            client: options.client(),
            base_url: options.base_url(DEFAULT_BASE_URL),
            api_key: options.api_key.clone(),
        }
    }

    async fn messages(&self, body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        read_json(self.kind(), response).await
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn model(&self) -> &str {
        MODEL
    }

    async fn check_key(&self) -> Result<(), ProviderError> {
        self.messages(serde_json::json!({
            "model": MODEL,
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "ping" }],
        }))
        .await
        .map(|_| ())
    }

    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let mut body = serde_json::json!({
            "model": MODEL,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = request.system_with_json_fallback()
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("system".to_owned(), serde_json::json!(system));
        }

        let value = self.messages(body).await?;
        let content = value
            .get("content")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse("missing `content` array".to_owned()))?;
        let text = content
            .iter()
            .filter(|block| block.get("type").and_then(|v| v.as_str()) == Some("text"))
            .filter_map(|block| block.get("text").and_then(|v| v.as_str()))
            .collect::<String>();
        non_empty(text, self.kind())
    }
}
