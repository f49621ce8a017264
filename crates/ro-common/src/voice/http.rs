use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{CreateAgentRequest, CreateCallRequest, ProviderError, VoiceProvider};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct VoiceProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl VoiceProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    call_id: Option<String>,
}

/// REST client for the hosted voice provider.
pub struct HttpVoiceProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpVoiceProvider {
    pub fn new(config: VoiceProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    async fn ensure_success(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl VoiceProvider for HttpVoiceProvider {
    #[instrument(skip(self, request), fields(agent_name = %request.agent_name))]
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<String, ProviderError> {
        let url = format!("{}/create-agent", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let body: AgentResponse = Self::ensure_success(response).await?.json().await?;

        let agent_id = body
            .agent_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("missing agent_id".into()))?;
        debug!(%agent_id, "voice agent created");
        Ok(agent_id)
    }

    #[instrument(skip(self, request), fields(agent_id = %request.agent_id))]
    async fn create_call(&self, request: &CreateCallRequest) -> Result<String, ProviderError> {
        let url = format!("{}/v2/create-phone-call", self.base_url);
        let payload = json!({
            "from_number": request.from_number,
            "to_number": request.to_number,
            "override_agent_id": request.agent_id,
            "metadata": request.metadata,
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let body: CallResponse = Self::ensure_success(response).await?.json().await?;

        body.call_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("missing call_id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn provider(base_url: &str) -> HttpVoiceProvider {
        HttpVoiceProvider::new(VoiceProviderConfig::new(base_url, "secret")).unwrap()
    }

    #[tokio::test]
    async fn create_call_posts_override_agent_and_metadata() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/create-phone-call")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(json!({
                "to_number": "+15550100",
                "override_agent_id": "agent_1",
                "metadata": {"campaign_id": "camp", "candidate_id": "cand"}
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"call_id":"call_123","call_status":"registered"}"#)
            .create_async()
            .await;

        let request = CreateCallRequest::new("agent_1", "+15550100", Some("+15550000"))
            .with_metadata("campaign_id", "camp")
            .with_metadata("candidate_id", "cand");
        let call_id = provider(&server.url()).create_call(&request).await.unwrap();

        assert_eq!(call_id, "call_123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limited_calls_surface_as_transient_status_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2/create-phone-call")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let request = CreateCallRequest::new("agent_1", "+15550100", None);
        let err = provider(&server.url())
            .create_call(&request)
            .await
            .unwrap_err();

        match &err {
            ProviderError::Status { status, body } => {
                assert_eq!(*status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn create_agent_rejects_responses_without_an_id() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/create-agent")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"agent_id":""}"#)
            .create_async()
            .await;

        let request = CreateAgentRequest {
            agent_name: "Spring drive".into(),
            prompt: "Say hello".into(),
            voice_id: None,
            webhook_url: "https://example.test/webhooks/voice".into(),
            post_call_analysis_data: Vec::new(),
        };
        let err = provider(&format!("{}/", server.url()))
            .create_agent(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
        assert!(!err.is_transient());
    }
}
