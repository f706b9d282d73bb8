use async_trait::async_trait;

use super::{Provider, ProviderKind, ProviderOptions, TextRequest, non_empty, read_json};
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TEXT_MODEL: &str = "gemini-2.5-flash";
const IMAGE_MODEL: &str = "imagen-3.0-generate-002";

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(options: &ProviderOptions) -> Self {
        Self {
            client: options.client(),
            base_url: options.base_url(DEFAULT_BASE_URL),
            api_key: options.api_key.clone(),
        }
    }

    /// Search grounding cannot be combined with a response schema, so a
    /// grounded request carries the schema in its system instruction.
    fn generate_content_body(request: &TextRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });
        let Some(obj) = body.as_object_mut() else {
            return body;
        };

        let system = if request.web_search {
            obj.insert(
                "tools".to_owned(),
                serde_json::json!([{ "googleSearch": {} }]),
            );
            request.system_with_json_fallback()
        } else {
            if let Some(schema) = request.json_schema.as_ref() {
                obj.insert(
                    "generationConfig".to_owned(),
                    serde_json::json!({
                        "responseMimeType": "application/json",
                        "responseSchema": gemini_schema(schema),
                    }),
                );
            }
            request.system_instruction.clone()
        };
        if let Some(system) = system {
            obj.insert(
                "systemInstruction".to_owned(),
                serde_json::json!({ "parts": [{ "text": system }] }),
            );
        }
        body
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
            .query(&[("key", self.api_key.as_str()), ("pageSize", "1")])
            .send()
            .await?;
        read_json(self.kind(), response).await.map(|_| ())
    }

    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!(
                "{}/models/{TEXT_MODEL}:generateContent",
                self.base_url
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::generate_content_body(request))
            .send()
            .await?;
        let value = read_json(self.kind(), response).await?;

        let parts = value
            .pointer("/candidates/0/content/parts")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse("no candidate in response".to_owned()))?;
        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
            .collect::<String>();
        non_empty(text, self.kind())
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/models/{IMAGE_MODEL}:predict", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({
                "instances": [{ "prompt": prompt }],
                "parameters": { "sampleCount": 1, "aspectRatio": "16:9" },
            }))
            .send()
            .await?;
        let value = read_json(self.kind(), response).await?;
        value
            .pointer("/predictions/0/bytesBase64Encoded")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                ProviderError::InvalidResponse(
                    "missing predictions[0].bytesBase64Encoded".to_owned(),
                )
            })
    }
}

/// Gemini accepts an OpenAPI subset: upper-case type names and no
/// `additionalProperties`.
fn gemini_schema(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "additionalProperties" | "$schema" => {}
                    "type" => {
                        let upper = value
                            .as_str()
                            .map(|t| serde_json::json!(t.to_ascii_uppercase()))
                            .unwrap_or_else(|| value.clone());
                        out.insert(key.clone(), upper);
                    }
                    _ => {
                        out.insert(key.clone(), gemini_schema(value));
                    }
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(gemini_schema).collect())
        }
        other => other.clone(),
    }
}
