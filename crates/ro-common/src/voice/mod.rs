//! Outbound boundary to the hosted voice-AI provider.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use http::{HttpVoiceProvider, VoiceProviderConfig};
#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeVoiceProvider;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("voice provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("voice provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid voice provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// 429 and 5xx responses and transport failures are worth retrying in a
    /// later batch; other errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}

/// One field the provider extracts from the transcript after a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateAgentRequest {
    pub agent_name: String,
    pub prompt: String,
    pub voice_id: Option<String>,
    pub webhook_url: String,
    pub post_call_analysis_data: Vec<AnalysisField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateCallRequest {
    pub agent_id: String,
    pub to_number: String,
    pub from_number: Option<String>,
    /// Echoed back on every webhook for correlation.
    pub metadata: Map<String, Value>,
}

impl CreateCallRequest {
    pub fn new(agent_id: &str, to_number: &str, from_number: Option<&str>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            to_number: to_number.to_string(),
            from_number: from_number.map(str::to_string),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }
}

#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Creates a speaking agent and returns its provider id.
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<String, ProviderError>;

    /// Places one outbound call and returns the provider call id.
    async fn create_call(&self, request: &CreateCallRequest) -> Result<String, ProviderError>;
}
