//! Gemini provider
//!
//! Speaks `POST {endpoint}/models/{model}:generateContent`, with the key in
//! the `x-goog-api-key` header so it never appears in a URL.

use super::{
    http_client, parse_reply, status_error, transport_error, user_prompt, ApiSecret,
    ProviderClient, ProviderReply, SYSTEM_PROMPT,
};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct GeminiClient {
    name: String,
    endpoint: String,
    model: String,
    max_output_tokens: u32,
    secret: ApiSecret,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: &ProviderConfig, secret: ApiSecret) -> anyhow::Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
            secret,
            client: http_client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, text: &str, context: &str) -> GenerateRequest {
        GenerateRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(SYSTEM_PROMPT.to_string()),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(user_prompt(text, context)),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
                temperature: 0.3,
            },
        }
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_credentials(&self) -> bool {
        self.secret.is_present()
    }

    async fn explain(&self, text: &str, context: &str) -> Result<ProviderReply, ProviderError> {
        let Some(api_key) = self.secret.expose() else {
            return Err(ProviderError::AuthMissing(self.name.clone()));
        };

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        debug!("🧠 {} request ({} chars)", self.name, text.chars().count());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&self.request_body(text, context))
            .send()
            .await
            .map_err(|e| transport_error(&self.name, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&self.name, &e))?;

        if !status.is_success() {
            warn!("❌ {} API error ({})", self.name, status);
            return Err(status_error(&self.name, status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(self.name.clone(), format!("malformed body: {}", e))
        })?;

        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::InvalidResponse(
                self.name.clone(),
                format!("prompt blocked: {}", reason),
            ));
        }

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        parse_reply(&self.name, &text)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderKind, RateLimitConfig};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GeminiClient {
        let config = ProviderConfig {
            name: "gemini".to_string(),
            kind: ProviderKind::Gemini,
            endpoint: format!("{}/v1beta", server.uri()),
            auth_token_env: "UNUSED".to_string(),
            model: "gemini-test".to_string(),
            rate_limit: RateLimitConfig {
                capacity: 10,
                window_secs: 60,
            },
            priority: 1,
            max_output_tokens: 64,
            timeout_secs: 5,
            enabled: true,
        };
        GeminiClient::new(&config, ApiSecret::new(Some("g-key".to_string()))).unwrap()
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": {"maxOutputTokens": 64}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "{\"explanation\": \"Plants make food"},
                            {"text": " from light.\"}"}
                        ]
                    },
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server).explain("photosynthesis", "").await.unwrap();
        assert_eq!(reply.explanation, "Plants make food from light.");
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"code": 429, "message": "Resource exhausted"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).explain("word", "").await.unwrap_err();
        assert_eq!(err, ProviderError::RateLimited("gemini".to_string()));
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).explain("word", "").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(..)));
    }

    #[tokio::test]
    async fn test_no_candidates_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": []
            })))
            .mount(&server)
            .await;

        let err = client(&server).explain("word", "").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(..)));
    }

    #[tokio::test]
    async fn test_forbidden_is_auth_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server).explain("word", "").await.unwrap_err();
        assert_eq!(err, ProviderError::AuthRejected("gemini".to_string()));
    }
}
