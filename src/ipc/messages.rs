//! IPC Message Types
//!
//! JSON-serializable messages between the extension host and the daemon.
//! Closed enums: a new request kind is a compile-checked change on both ends.

use crate::core::{ExplainRequest, ExplainResponse};
use serde::{Deserialize, Serialize};

/// Request types sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Explain a selection
    #[serde(rename = "explain")]
    Explain {
        seq_id: u64,
        text: String,
        #[serde(default)]
        context: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred_provider: Option<String>,
    },

    /// Abandon an in-flight explanation (the overlay was dismissed)
    #[serde(rename = "cancel")]
    Cancel { seq_id: u64 },

    /// Consent was changed in the settings UI
    #[serde(rename = "consent_changed")]
    ConsentChanged {
        granted: bool,
        #[serde(default)]
        allowed_services: Vec<String>,
    },

    /// Request status of the daemon
    #[serde(rename = "status_request")]
    StatusRequest { seq_id: u64 },
}

impl IpcRequest {
    pub fn explain(seq_id: u64, request: ExplainRequest) -> Self {
        IpcRequest::Explain {
            seq_id,
            text: request.text,
            context: request.context,
            preferred_provider: request.preferred_provider,
        }
    }
}

/// Response types sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Outcome of an explain request
    #[serde(rename = "explanation")]
    Explanation {
        seq_id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        examples: Option<Vec<String>>,
    },

    /// Status response
    #[serde(rename = "status_response")]
    StatusResponse {
        seq_id: u64,
        providers: Vec<String>,
        consent_granted: bool,
        cache_entries: usize,
    },

    /// Acknowledgment
    #[serde(rename = "ack")]
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq_id: Option<u64>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl IpcResponse {
    pub fn explanation(seq_id: u64, response: ExplainResponse) -> Self {
        IpcResponse::Explanation {
            seq_id,
            success: response.success,
            explanation: response.explanation,
            provider: response.provider,
            error: response.error,
            examples: response.examples,
        }
    }

    pub fn ack(seq_id: Option<u64>, success: bool, message: impl Into<String>) -> Self {
        IpcResponse::Ack {
            seq_id,
            success,
            message: Some(message.into()),
        }
    }

    /// Back to the boundary type, for explanation responses
    pub fn into_explain_response(self) -> Option<(u64, ExplainResponse)> {
        match self {
            IpcResponse::Explanation {
                seq_id,
                success,
                explanation,
                provider,
                error,
                examples,
            } => Some((
                seq_id,
                ExplainResponse {
                    success,
                    explanation,
                    provider,
                    error,
                    examples,
                },
            )),
            _ => None,
        }
    }
}
