//! Ingestion of provider lifecycle events.
//!
//! Every event is applied with conditional, field-scoped writes keyed by the
//! provider call id, so replays and out-of-order deliveries converge on the
//! same stored state. The processor never returns an error: the caller gets
//! an [`EventOutcome`] and always acknowledges the delivery.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{EventKind, WebhookPayload};
use crate::models::{CallAnalysis, CallEnded, CallStatus, CandidateContactUpdate};
use crate::store::{OutreachStore, StoreError};

pub mod parse;

pub use parse::{decode_flag, decode_objectives, parse_bool, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum EventOutcome {
    Processed,
    Ignored(String),
    Failed(String),
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Processed => "processed",
            EventOutcome::Ignored(_) => "ignored",
            EventOutcome::Failed(_) => "failed",
        }
    }

    fn ignored(reason: &str) -> Self {
        EventOutcome::Ignored(reason.to_string())
    }
}

#[derive(Clone)]
pub struct WebhookEventProcessor {
    store: Arc<dyn OutreachStore>,
}

impl WebhookEventProcessor {
    pub fn new(store: Arc<dyn OutreachStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, payload), fields(event = %payload.event))]
    pub async fn handle_event(&self, payload: &WebhookPayload) -> EventOutcome {
        let Some(kind) = payload.kind() else {
            info!("ignoring unsupported webhook event");
            return EventOutcome::ignored("unsupported event");
        };
        let label = kind.as_ref().to_string();
        counter!("outreach_webhook_events_total", "event" => label.clone()).increment(1);

        let Some(call_id) = payload.call_id() else {
            warn!("webhook event without a call id");
            return EventOutcome::ignored("missing call id");
        };

        let result = match kind {
            EventKind::CallStarted => self.call_started(call_id, payload).await,
            EventKind::CallEnded => self.call_ended(call_id, payload).await,
            EventKind::CallAnalyzed => self.call_analyzed(call_id, payload).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                counter!("outreach_webhook_errors_total", "event" => label).increment(1);
                error!(
                    event = kind.as_ref(),
                    provider_call_id = call_id,
                    error = %err,
                    "failed to persist webhook event"
                );
                EventOutcome::Failed(err.to_string())
            }
        }
    }

    async fn call_started(
        &self,
        call_id: &str,
        payload: &WebhookPayload,
    ) -> Result<EventOutcome, StoreError> {
        let started_at = payload
            .call
            .as_ref()
            .and_then(|call| parse::parse_timestamp(call.start_timestamp.as_ref()))
            .unwrap_or_else(Utc::now);

        if !self.store.mark_call_started(call_id, started_at).await? {
            debug!(provider_call_id = call_id, "no call record for started call");
            return Ok(EventOutcome::ignored("unknown call"));
        }
        Ok(EventOutcome::Processed)
    }

    async fn call_ended(
        &self,
        call_id: &str,
        payload: &WebhookPayload,
    ) -> Result<EventOutcome, StoreError> {
        let call = payload.call.as_ref();
        let started_at = call.and_then(|c| parse::parse_timestamp(c.start_timestamp.as_ref()));
        let ended_at = call
            .and_then(|c| parse::parse_timestamp(c.end_timestamp.as_ref()))
            .unwrap_or_else(Utc::now);
        let duration_seconds = call
            .and_then(|c| parse::parse_duration_seconds(c.call_duration.as_ref()))
            .or_else(|| derived_duration(started_at, ended_at));

        let ended = CallEnded {
            started_at,
            ended_at,
            duration_seconds,
        };
        if !self.store.mark_call_ended(call_id, &ended).await? {
            debug!(provider_call_id = call_id, "no call record for ended call");
            return Ok(EventOutcome::ignored("unknown call"));
        }
        Ok(EventOutcome::Processed)
    }

    async fn call_analyzed(
        &self,
        call_id: &str,
        payload: &WebhookPayload,
    ) -> Result<EventOutcome, StoreError> {
        let Some(call) = payload.call.as_ref() else {
            return Ok(EventOutcome::ignored("missing call block"));
        };
        let (Some(campaign_id), Some(candidate_id)) = (
            call.metadata_id("campaign_id"),
            call.metadata_id("candidate_id"),
        ) else {
            warn!(provider_call_id = call_id, "analyzed call without correlation metadata");
            return Ok(EventOutcome::ignored("missing correlation metadata"));
        };
        let Some(analysis) = payload.analysis() else {
            warn!(provider_call_id = call_id, "call_analyzed event without analysis");
            return Ok(EventOutcome::ignored("missing call analysis"));
        };

        let Some(campaign) = self.store.get_campaign(&campaign_id).await? else {
            warn!(provider_call_id = call_id, %campaign_id, "analysis for unknown campaign");
            return Ok(EventOutcome::ignored("unknown campaign"));
        };
        let known_candidate = self
            .store
            .get_campaign_candidate(&candidate_id)
            .await?
            .is_some_and(|c| c.campaign_id == campaign_id);
        if !known_candidate {
            warn!(
                provider_call_id = call_id,
                %campaign_id,
                %candidate_id,
                "analysis for a candidate outside the campaign"
            );
            return Ok(EventOutcome::ignored("unknown candidate"));
        }

        let objectives = parse::decode_objectives(analysis.answers(), &campaign.objective_targets);
        let in_voicemail = parse::parse_bool(analysis.in_voicemail.as_ref());
        let analyzed_at = parse::parse_timestamp(call.end_timestamp.as_ref()).unwrap_or_else(Utc::now);
        let summary = analysis
            .call_summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let record = CallAnalysis {
            provider_call_id: call_id.to_string(),
            campaign_candidate_id: candidate_id.clone(),
            sentiment_score: parse::sentiment(analysis),
            summary: summary.map(str::to_string),
            transcript_url: analysis.transcript_url.clone(),
            recording_url: analysis.recording_url.clone(),
            key_points: parse::key_points(summary),
            next_step: Some(parse::next_step(&objectives, in_voicemail)),
            call_successful: parse::decode_flag(analysis.call_successful.as_ref()),
            in_voicemail,
            analyzed_at,
            objectives: objectives.clone(),
        };
        let contact = CandidateContactUpdate {
            campaign_id: campaign_id.clone(),
            candidate_id,
            objectives,
            last_contact: analyzed_at,
            call_status: CallStatus::Contacted,
        };

        let write = self.store.record_call_analysis(&record, &contact).await?;
        if !write.candidate_updated {
            info!(
                provider_call_id = call_id,
                %campaign_id,
                "candidate already holds a newer contact; objectives kept"
            );
        }

        match self.store.refresh_response_rate(&campaign_id).await {
            Ok(rate) => debug!(%campaign_id, rate, "response rate refreshed"),
            Err(err) => warn!(%campaign_id, error = %err, "failed to refresh response rate"),
        }

        info!(
            provider_call_id = call_id,
            %campaign_id,
            analysis = ?write.analysis,
            "call analysis stored"
        );
        Ok(EventOutcome::Processed)
    }
}

fn derived_duration(started_at: Option<DateTime<Utc>>, ended_at: DateTime<Utc>) -> Option<i32> {
    let seconds = (ended_at - started_at?).num_seconds();
    if seconds < 0 {
        return None;
    }
    i32::try_from(seconds).ok()
}
