use async_trait::async_trait;

use super::{Provider, ProviderKind, ProviderOptions, TextRequest, non_empty, read_json};
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const TEXT_MODEL: &str = "gpt-4o";
const IMAGE_MODEL: &str = "dall-e-3";
const IMAGE_SIZE: &str = "1792x1024";

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(options: &ProviderOptions) -> Self {
        Self {
            client: options.client(),
            base_url: options.base_url(DEFAULT_BASE_URL),
            api_key: options.api_key.clone(),
        }
    }

    fn responses_body(&self, request: &TextRequest) -> serde_json::Value {
        let format = match request.json_schema.as_ref() {
            Some(schema) => serde_json::json!({
                "type": "json_schema",
                "name": "response",
                "schema": schema,
                "strict": false,
            }),
            None => serde_json::json!({ "type": "text" }),
        };

        let mut body = serde_json::json!({
            "model": TEXT_MODEL,
            "input": request.prompt,
            "text": { "format": format },
            "store": false,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(instructions) = request.system_instruction.as_deref() {
                obj.insert("instructions".to_owned(), serde_json::json!(instructions));
            }
            if request.web_search {
                obj.insert(
                    "tools".to_owned(),
                    serde_json::json!([{ "type": "web_search_preview" }]),
                );
            }
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    fn model(&self) -> &str {
        TEXT_MODEL
    }

    fn supports_schema(&self) -> bool {
        true
    }

    async fn check_key(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        read_json(self.kind(), response).await.map(|_| ())
    }

    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let endpoint = format!("{}/responses", self.base_url);
        tracing::debug!(endpoint = %endpoint, web_search = request.web_search, "openai responses");

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.responses_body(request))
            .send()
            .await?;
        let value = read_json(self.kind(), response).await?;
        non_empty(extract_output_text(&value)?, self.kind())
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": IMAGE_MODEL,
                "prompt": prompt,
                "n": 1,
                "size": IMAGE_SIZE,
                "response_format": "b64_json",
            }))
            .send()
            .await?;
        let value = read_json(self.kind(), response).await?;
        value
            .pointer("/data/0/b64_json")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::InvalidResponse("missing data[0].b64_json".to_owned()))
    }
}

fn extract_output_text(value: &serde_json::Value) -> Result<String, ProviderError> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing `output` array".to_owned()))?;

    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(|v| v.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(|v| v.as_str()) != Some("output_text") {
                continue;
            }
            if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
                text.push_str(part_text);
            }
        }
    }
    Ok(text)
}
