//! The single seam in front of the relational store.
//!
//! Every component (dispatcher, webhook processor, reconciliation engine)
//! talks to persistence through [`OutreachStore`]. Writes are field-scoped
//! and conditional so that concurrent writers on the same row only ever
//! race at the field level.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::PoolError;
use serde::Serialize;
use tokio_postgres::Error as PgError;

use crate::models::{
    BatchJob, BatchStatus, CallAnalysis, CallEnded, CallRecord, Campaign, CampaignCandidate,
    CampaignStatus, CandidateContactUpdate, KanbanColumn, PipelineCandidate, StatusTransition,
};

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map row: {0}")]
    Mapping(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Created,
    Updated,
}

/// Result of persisting one analyzed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWrite {
    pub analysis: UpsertStatus,
    /// False when the candidate named in the metadata does not belong to the
    /// campaign named in the metadata (or does not exist), or when it already
    /// carries a contact newer than this analysis.
    pub candidate_updated: bool,
}

/// Outreach activity observed for one phone number since a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivitySummary {
    pub calls: i64,
    pub analyses: i64,
    pub latest_snippet: Option<String>,
}

impl ActivitySummary {
    pub fn is_empty(&self) -> bool {
        self.calls == 0 && self.analyses == 0
    }
}

#[async_trait]
pub trait OutreachStore: Send + Sync {
    async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>, StoreError>;

    /// Stores `agent_id` only when the campaign has none yet and returns the
    /// id that ends up stored.
    async fn set_campaign_agent(
        &self,
        campaign_id: &str,
        agent_id: &str,
    ) -> Result<String, StoreError>;

    async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), StoreError>;

    /// Recomputes `contacted / candidate_count` and returns the new rate.
    async fn refresh_response_rate(&self, campaign_id: &str) -> Result<f64, StoreError>;

    async fn list_campaign_candidates(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignCandidate>, StoreError>;

    async fn get_campaign_candidate(
        &self,
        candidate_id: &str,
    ) -> Result<Option<CampaignCandidate>, StoreError>;

    async fn insert_call_record(&self, record: &CallRecord) -> Result<(), StoreError>;

    /// Moves the record to `in_progress` (never out of `completed`) and sets
    /// `started_at` once. Returns false when no record matches.
    async fn mark_call_started(
        &self,
        provider_call_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_call_ended(
        &self,
        provider_call_id: &str,
        ended: &CallEnded,
    ) -> Result<bool, StoreError>;

    /// Fails every record of the batch still in `pending`.
    async fn fail_pending_calls(&self, batch_id: &str, reason: &str) -> Result<u64, StoreError>;

    async fn list_batch_calls(&self, batch_id: &str) -> Result<Vec<CallRecord>, StoreError>;

    async fn get_call_record(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, StoreError>;

    /// Upserts the analysis keyed by provider call id and applies the contact
    /// update to the owning candidate in one transaction. The candidate is
    /// only touched when `contact.last_contact` is not older than the stored
    /// one, so a redelivered older analysis never rolls objectives back.
    async fn record_call_analysis(
        &self,
        analysis: &CallAnalysis,
        contact: &CandidateContactUpdate,
    ) -> Result<AnalysisWrite, StoreError>;

    async fn get_call_analysis(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallAnalysis>, StoreError>;

    /// Most recent analysis of a call placed to `phone` (normalised).
    async fn latest_analysis_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<CallAnalysis>, StoreError>;

    async fn call_activity_since(
        &self,
        phone: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<ActivitySummary, StoreError>;

    async fn create_batch_job(&self, batch: &BatchJob) -> Result<(), StoreError>;

    async fn get_batch_job(&self, batch_id: &str) -> Result<Option<BatchJob>, StoreError>;

    async fn record_batch_progress(
        &self,
        batch_id: &str,
        completed_delta: i32,
        failed_delta: i32,
    ) -> Result<(), StoreError>;

    /// Closes a batch that is still `in_progress`. Returns false when the
    /// batch was already closed.
    async fn close_batch_job(
        &self,
        batch_id: &str,
        status: BatchStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn list_active_batches(&self, campaign_id: &str) -> Result<Vec<BatchJob>, StoreError>;

    async fn list_stale_batches(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<BatchJob>, StoreError>;

    async fn list_job_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn list_pipeline_candidates(
        &self,
        job_id: &str,
    ) -> Result<Vec<PipelineCandidate>, StoreError>;

    async fn get_pipeline_candidate(
        &self,
        candidate_id: &str,
    ) -> Result<Option<PipelineCandidate>, StoreError>;

    async fn list_kanban_columns(&self, job_id: &str) -> Result<Vec<KanbanColumn>, StoreError>;

    /// Applies the transition and its hired-counter delta together. Returns
    /// false when the candidate moved or was locked in the meantime.
    async fn transition_pipeline_status(
        &self,
        transition: &StatusTransition,
    ) -> Result<bool, StoreError>;

    async fn set_manual_override(
        &self,
        candidate_id: &str,
        manual_override: bool,
    ) -> Result<bool, StoreError>;

    async fn append_pipeline_note(&self, candidate_id: &str, note: &str)
    -> Result<(), StoreError>;

    async fn hired_count(&self, job_id: &str) -> Result<i32, StoreError>;

    /// Repair path: recounts hired-equivalent candidates and stores the result.
    async fn recompute_hired_count(&self, job_id: &str) -> Result<i32, StoreError>;
}
