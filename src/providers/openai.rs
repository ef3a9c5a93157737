//! OpenAI-compatible chat completions provider
//!
//! Speaks `POST {endpoint}/chat/completions` with bearer auth, which covers
//! the free-tier fast providers (Groq and friends) as well as OpenAI itself.

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
pub struct OpenAiCompatClient {
    name: String,
    endpoint: String,
    model: String,
    max_output_tokens: u32,
    secret: ApiSecret,
    client: Client,
}

impl OpenAiCompatClient {
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

    fn request_body(&self, text: &str, context: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(user_prompt(text, context)),
                },
            ],
            max_tokens: self.max_output_tokens,
            temperature: 0.3,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatClient {
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

        let url = format!("{}/chat/completions", self.endpoint);
        debug!("🧠 {} request ({} chars)", self.name, text.chars().count());

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
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

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::InvalidResponse(self.name.clone(), format!("malformed body: {}", e))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::InvalidResponse(self.name.clone(), "no choices".to_string())
            })?;

        parse_reply(&self.name, &content)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
