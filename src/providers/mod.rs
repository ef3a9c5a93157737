//! Explanation Providers
//!
//! A unified interface over the remote AI services that can explain text.
//! Every client is interchangeable behind [`ProviderClient`]; the
//! orchestrator only cares about their order.

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod gemini;
pub mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiCompatClient;

/// Instruction sent ahead of every selection
pub const SYSTEM_PROMPT: &str = "You explain text that a reader has selected on a web page. \
Use plain, friendly language that a twelve-year-old could follow, in at most three short \
sentences. Respond with ONLY valid JSON in this exact format: \
{\"explanation\": \"...\", \"examples\": [\"...\"]} where examples is a list of up to two \
short usage examples, or an empty list when examples do not make sense.";

/// Normalized answer from a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub explanation: String,
    pub examples: Vec<String>,
}

/// Trait for remote explanation services
#[async_trait]
pub trait ProviderClient: Send + Sync + std::fmt::Debug {
    /// Configured provider name
    fn name(&self) -> &str;

    /// Whether a credential is present. Checked before spending a rate
    /// limit token.
    fn has_credentials(&self) -> bool;

    /// Ask for an explanation in one bounded outbound call
    async fn explain(&self, text: &str, context: &str) -> Result<ProviderReply, ProviderError>;
}

/// API key that never shows up in logs or debug output
#[derive(Clone, Default)]
pub struct ApiSecret(Option<String>);

impl ApiSecret {
    pub fn new(value: Option<String>) -> Self {
        Self(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
    }

    /// Resolve from the named environment variable
    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).ok())
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    pub fn expose(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl std::fmt::Debug for ApiSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(_) => f.write_str("ApiSecret(***)"),
            None => f.write_str("ApiSecret(none)"),
        }
    }
}

/// Build the client for a provider config, reading its key from the environment
pub fn create_client(config: &ProviderConfig) -> anyhow::Result<Arc<dyn ProviderClient>> {
    let secret = ApiSecret::from_env(&config.auth_token_env);
    create_client_with_secret(config, secret)
}

/// Build the client with an explicit secret
pub fn create_client_with_secret(
    config: &ProviderConfig,
    secret: ApiSecret,
) -> anyhow::Result<Arc<dyn ProviderClient>> {
    if !secret.is_present() {
        warn!(
            "🔑 {} has no API key (set {}); it will be skipped",
            config.name, config.auth_token_env
        );
    }

    let client: Arc<dyn ProviderClient> = match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiCompatClient::new(config, secret)?),
        ProviderKind::Gemini => Arc::new(GeminiClient::new(config, secret)?),
    };
    info!(
        "✅ Provider '{}' ready ({:?}, model {})",
        config.name, config.kind, config.model
    );
    Ok(client)
}

/// Shared HTTP client with the provider's timeout
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(timeout_secs.min(5)))
        .build()
}

/// User message combining the selection with where it came from
pub(crate) fn user_prompt(text: &str, context: &str) -> String {
    if context.is_empty() {
        format!("Selected text: \"{text}\"")
    } else {
        format!("Page: \"{context}\"\nSelected text: \"{text}\"")
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> ProviderError {
    let name = provider.to_string();
    match status.as_u16() {
        429 => ProviderError::RateLimited(name),
        401 | 403 => ProviderError::AuthRejected(name),
        500..=599 => ProviderError::NetworkFailure(name, format!("upstream status {}", status)),
        _ => ProviderError::InvalidResponse(name, format!("status {}: {}", status, truncate(body, 200))),
    }
}

/// Map a transport error; timeouts count as network failures
pub(crate) fn transport_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    let name = provider.to_string();
    if err.is_decode() {
        ProviderError::InvalidResponse(name, err.to_string())
    } else if err.is_timeout() {
        ProviderError::NetworkFailure(name, "timed out".to_string())
    } else {
        ProviderError::NetworkFailure(name, err.to_string())
    }
}

/// Turn model output into a reply.
///
/// The model is asked for JSON but may wrap it in prose or a code fence, or
/// ignore the format entirely; plain text is accepted as the explanation.
pub(crate) fn parse_reply(provider: &str, raw: &str) -> Result<ProviderReply, ProviderError> {
    #[derive(Deserialize)]
    struct Parsed {
        explanation: String,
        #[serde(default)]
        examples: Vec<String>,
    }

    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProviderError::InvalidResponse(
            provider.to_string(),
            "empty completion".to_string(),
        ));
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            match serde_json::from_str::<Parsed>(&raw[start..=end]) {
                Ok(parsed) if !parsed.explanation.trim().is_empty() => {
                    return Ok(ProviderReply {
                        explanation: parsed.explanation.trim().to_string(),
                        examples: parsed
                            .examples
                            .into_iter()
                            .map(|e| e.trim().to_string())
                            .filter(|e| !e.is_empty())
                            .take(5)
                            .collect(),
                    });
                }
                Ok(_) => {
                    return Err(ProviderError::InvalidResponse(
                        provider.to_string(),
                        "empty explanation".to_string(),
                    ));
                }
                Err(e) => debug!("{} reply is not JSON ({}), using raw text", provider, e),
            }
        }
    }

    let text = raw
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if text.is_empty() {
        return Err(ProviderError::InvalidResponse(
            provider.to_string(),
            "empty completion".to_string(),
        ));
    }
    Ok(ProviderReply {
        explanation: text.to_string(),
        examples: Vec::new(),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
