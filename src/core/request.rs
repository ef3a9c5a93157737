//! Explanation request and result types

use super::text_normalizer::TextNormalizer;
use crate::error::ExplainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider label for answers produced without any network call
pub const LOCAL_PROVIDER: &str = "local";

/// A validated request to explain a piece of selected text.
///
/// Only constructible through [`ExplanationRequest::new`], so every instance
/// holds sanitized, non-empty, length-capped text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplanationRequest {
    text: String,
    context: String,
    preferred_provider: Option<String>,
}

impl ExplanationRequest {
    /// Sanitize and validate a raw request.
    ///
    /// Fails with `InvalidInput` when nothing is left after stripping markup
    /// or when the sanitized text exceeds `max_chars` characters.
    pub fn new(
        text: &str,
        context: &str,
        preferred_provider: Option<String>,
        max_chars: usize,
    ) -> Result<Self, ExplainError> {
        let normalizer = TextNormalizer::new();
        let text = normalizer.sanitize(text);

        if text.is_empty() {
            return Err(ExplainError::InvalidInput("text is empty".to_string()));
        }

        let len = text.chars().count();
        if len > max_chars {
            return Err(ExplainError::InvalidInput(format!(
                "text is {} characters, limit is {}",
                len, max_chars
            )));
        }

        let preferred_provider = preferred_provider
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            text,
            context: normalizer.sanitize(context),
            preferred_provider,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn preferred_provider(&self) -> Option<&str> {
        self.preferred_provider.as_deref()
    }

    pub fn word_count(&self) -> usize {
        TextNormalizer::word_count(&self.text)
    }
}

/// A usable explanation, from a provider or the local fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationResult {
    pub explanation: String,
    pub provider: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub examples: Vec<String>,
    /// Served from the response cache rather than a fresh call
    #[serde(default)]
    pub cached: bool,
}

impl ExplanationResult {
    pub fn new(explanation: String, provider: &str, examples: Vec<String>) -> Self {
        Self {
            explanation,
            provider: provider.to_string(),
            timestamp: Utc::now(),
            examples,
            cached: false,
        }
    }

    pub fn is_local(&self) -> bool {
        self.provider == LOCAL_PROVIDER
    }
}

/// Inbound request from the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub text: String,
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
}

impl ExplainRequest {
    pub fn new(text: &str, context: &str) -> Self {
        Self {
            text: text.to_string(),
            context: context.to_string(),
            preferred_provider: None,
        }
    }

    pub fn with_preferred_provider(mut self, provider: &str) -> Self {
        self.preferred_provider = Some(provider.to_string());
        self
    }
}

/// Outbound response to the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExplainResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<String>>,
}

impl From<ExplanationResult> for ExplainResponse {
    fn from(result: ExplanationResult) -> Self {
        Self {
            success: true,
            explanation: Some(result.explanation),
            provider: Some(result.provider),
            error: None,
            examples: (!result.examples.is_empty()).then_some(result.examples),
        }
    }
}

impl From<ExplainError> for ExplainResponse {
    fn from(err: ExplainError) -> Self {
        let code = err.code().to_string();
        match err {
            // The UI shows a consent prompt, with the local text beside it
            ExplainError::ConsentDenied { local } => Self {
                success: false,
                explanation: Some(local.explanation),
                provider: Some(local.provider),
                error: Some(code),
                examples: None,
            },
            ExplainError::InvalidInput(_) | ExplainError::Cancelled => Self {
                success: false,
                error: Some(code),
                ..Self::default()
            },
        }
    }
}
