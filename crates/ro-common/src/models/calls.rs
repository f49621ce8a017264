use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::objectives::CallObjectives;
use crate::run_id;

/// Failure reason written on call records a cancelled batch never placed.
pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRecordStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl CallRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallRecordStatus::Pending => "pending",
            CallRecordStatus::InProgress => "in_progress",
            CallRecordStatus::Completed => "completed",
            CallRecordStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CallRecordStatus::Pending),
            "in_progress" => Some(CallRecordStatus::InProgress),
            "completed" => Some(CallRecordStatus::Completed),
            "failed" => Some(CallRecordStatus::Failed),
            _ => None,
        }
    }

    /// Status after a `call_started` event. A completed call stays completed
    /// even when the start event is delivered late.
    pub fn on_started(self) -> Self {
        match self {
            CallRecordStatus::Completed => CallRecordStatus::Completed,
            _ => CallRecordStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: String,
    pub campaign_candidate_id: String,
    pub batch_id: Option<String>,
    pub provider_call_id: Option<String>,
    pub from_number: Option<String>,
    pub to_number: String,
    pub status: CallRecordStatus,
    pub failure_reason: Option<String>,
    pub duration_seconds: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// A call the provider accepted; waits in `pending` for lifecycle events.
    pub fn placed(
        candidate_id: &str,
        batch_id: &str,
        provider_call_id: &str,
        from_number: Option<&str>,
        to_number: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: run_id::generate(),
            campaign_candidate_id: candidate_id.to_string(),
            batch_id: Some(batch_id.to_string()),
            provider_call_id: Some(provider_call_id.to_string()),
            from_number: from_number.map(str::to_string),
            to_number: to_number.to_string(),
            status: CallRecordStatus::Pending,
            failure_reason: None,
            duration_seconds: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A call that was never placed because its batch was cancelled first.
    pub fn cancelled(candidate_id: &str, batch_id: &str, to_number: &str) -> Self {
        let now = Utc::now();
        Self {
            id: run_id::generate(),
            campaign_candidate_id: candidate_id.to_string(),
            batch_id: Some(batch_id.to_string()),
            provider_call_id: None,
            from_number: None,
            to_number: to_number.to_string(),
            status: CallRecordStatus::Failed,
            failure_reason: Some(CANCELLED_REASON.to_string()),
            duration_seconds: None,
            started_at: None,
            ended_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Payload of a `call_ended` event after normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnded {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAnalysis {
    pub provider_call_id: String,
    pub campaign_candidate_id: String,
    pub objectives: CallObjectives,
    pub sentiment_score: Option<f64>,
    pub summary: Option<String>,
    pub transcript_url: Option<String>,
    pub recording_url: Option<String>,
    pub key_points: Vec<String>,
    pub next_step: Option<String>,
    pub call_successful: Option<bool>,
    pub in_voicemail: bool,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(BatchStatus::InProgress),
            "completed" => Some(BatchStatus::Completed),
            "cancelled" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub campaign_id: String,
    pub total_candidates: i32,
    pub completed_calls: i32,
    pub failed_calls: i32,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(campaign_id: &str, total_candidates: usize) -> Self {
        Self {
            id: run_id::generate(),
            campaign_id: campaign_id.to_string(),
            total_candidates: i32::try_from(total_candidates).unwrap_or(i32::MAX),
            completed_calls: 0,
            failed_calls: 0,
            status: BatchStatus::InProgress,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}
