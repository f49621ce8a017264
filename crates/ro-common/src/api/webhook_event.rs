use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, EnumString};

/// Lifecycle events the voice provider delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    CallStarted,
    CallEnded,
    CallAnalyzed,
}

/// Inbound webhook body. Shapes vary between provider versions, so every
/// field whose type is not stable is kept as raw JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub call: Option<CallPayload>,
    #[serde(default)]
    pub call_analysis: Option<CallAnalysisPayload>,
}

impl WebhookPayload {
    pub fn kind(&self) -> Option<EventKind> {
        self.event.trim().parse().ok()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call
            .as_ref()
            .and_then(|c| c.call_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// The analysis block, wherever the provider put it.
    pub fn analysis(&self) -> Option<&CallAnalysisPayload> {
        self.call_analysis
            .as_ref()
            .or_else(|| self.call.as_ref().and_then(|c| c.call_analysis.as_ref()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallPayload {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub to_number: Option<String>,
    /// Epoch milliseconds, or an RFC 3339 / numeric string.
    #[serde(default)]
    pub start_timestamp: Option<Value>,
    #[serde(default)]
    pub end_timestamp: Option<Value>,
    /// Seconds.
    #[serde(default)]
    pub call_duration: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub call_analysis: Option<CallAnalysisPayload>,
}

impl CallPayload {
    /// Correlation id from the metadata echoed back by the provider.
    /// Numbers are accepted and rendered as strings.
    pub fn metadata_id(&self, key: &str) -> Option<String> {
        match self.metadata.as_ref()?.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallAnalysisPayload {
    #[serde(default)]
    pub post_call_analysis_data: Option<Value>,
    #[serde(default)]
    pub custom_analysis_data: Option<Value>,
    #[serde(default)]
    pub call_summary: Option<String>,
    #[serde(default)]
    pub call_successful: Option<Value>,
    #[serde(default)]
    pub in_voicemail: Option<Value>,
    #[serde(default)]
    pub user_sentiment: Option<String>,
    #[serde(default)]
    pub sentiment_score: Option<Value>,
    #[serde(default)]
    pub transcript_url: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
}

impl CallAnalysisPayload {
    /// Extracted objective answers; older payloads use `custom_analysis_data`.
    pub fn answers(&self) -> Option<&Map<String, Value>> {
        self.post_call_analysis_data
            .as_ref()
            .and_then(Value::as_object)
            .or_else(|| {
                self.custom_analysis_data
                    .as_ref()
                    .and_then(Value::as_object)
            })
    }
}

/// Acknowledgement body returned to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_event_kinds_and_ignores_unknown_ones() {
        let payload = WebhookPayload {
            event: "call_analyzed".into(),
            ..Default::default()
        };
        assert_eq!(payload.kind(), Some(EventKind::CallAnalyzed));
        assert_eq!(EventKind::CallStarted.as_ref(), "call_started");

        let payload = WebhookPayload {
            event: "transfer_started".into(),
            ..Default::default()
        };
        assert_eq!(payload.kind(), None);
    }

    #[test]
    fn analysis_falls_back_to_the_nested_call_block() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "event": "call_analyzed",
            "call": {
                "call_id": " call_1 ",
                "metadata": {"campaign_id": "camp", "candidate_id": 42},
                "call_analysis": {"call_summary": "ok", "custom_analysis_data": {"interested": "yes"}}
            }
        }))
        .unwrap();

        assert_eq!(payload.call_id(), Some("call_1"));
        let call = payload.call.as_ref().unwrap();
        assert_eq!(call.metadata_id("campaign_id").as_deref(), Some("camp"));
        assert_eq!(call.metadata_id("candidate_id").as_deref(), Some("42"));
        assert_eq!(call.metadata_id("missing"), None);

        let analysis = payload.analysis().unwrap();
        assert_eq!(analysis.call_summary.as_deref(), Some("ok"));
        assert_eq!(analysis.answers().unwrap()["interested"], json!("yes"));
    }
}
