use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{
    PgPool, batch_jobs, call_analyses, call_records, campaigns, pipeline,
};
use crate::models::{
    BatchJob, BatchStatus, CallAnalysis, CallEnded, CallRecord, Campaign, CampaignCandidate,
    CampaignStatus, CandidateContactUpdate, KanbanColumn, PipelineCandidate, StatusTransition,
};
use crate::store::{ActivitySummary, AnalysisWrite, OutreachStore, StoreError};

/// [`OutreachStore`] backed by the `outreach` Postgres schema.
#[derive(Clone)]
pub struct PgOutreachStore {
    pool: PgPool,
}

impl PgOutreachStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OutreachStore for PgOutreachStore {
    async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>, StoreError> {
        campaigns::get_campaign(&self.pool, campaign_id).await
    }

    async fn set_campaign_agent(
        &self,
        campaign_id: &str,
        agent_id: &str,
    ) -> Result<String, StoreError> {
        campaigns::set_campaign_agent(&self.pool, campaign_id, agent_id).await
    }

    async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), StoreError> {
        campaigns::set_campaign_status(&self.pool, campaign_id, status).await
    }

    async fn refresh_response_rate(&self, campaign_id: &str) -> Result<f64, StoreError> {
        campaigns::refresh_response_rate(&self.pool, campaign_id).await
    }

    async fn list_campaign_candidates(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignCandidate>, StoreError> {
        campaigns::list_campaign_candidates(&self.pool, campaign_id).await
    }

    async fn get_campaign_candidate(
        &self,
        candidate_id: &str,
    ) -> Result<Option<CampaignCandidate>, StoreError> {
        campaigns::get_campaign_candidate(&self.pool, candidate_id).await
    }

    async fn insert_call_record(&self, record: &CallRecord) -> Result<(), StoreError> {
        call_records::insert_call_record(&self.pool, record).await
    }

    async fn mark_call_started(
        &self,
        provider_call_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        call_records::mark_call_started(&self.pool, provider_call_id, started_at).await
    }

    async fn mark_call_ended(
        &self,
        provider_call_id: &str,
        ended: &CallEnded,
    ) -> Result<bool, StoreError> {
        call_records::mark_call_ended(&self.pool, provider_call_id, ended).await
    }

    async fn fail_pending_calls(&self, batch_id: &str, reason: &str) -> Result<u64, StoreError> {
        call_records::fail_pending_calls(&self.pool, batch_id, reason).await
    }

    async fn list_batch_calls(&self, batch_id: &str) -> Result<Vec<CallRecord>, StoreError> {
        call_records::list_batch_calls(&self.pool, batch_id).await
    }

    async fn get_call_record(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, StoreError> {
        call_records::get_call_record(&self.pool, provider_call_id).await
    }

    async fn record_call_analysis(
        &self,
        analysis: &CallAnalysis,
        contact: &CandidateContactUpdate,
    ) -> Result<AnalysisWrite, StoreError> {
        call_analyses::record_call_analysis(&self.pool, analysis, contact).await
    }

    async fn get_call_analysis(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallAnalysis>, StoreError> {
        call_analyses::get_call_analysis(&self.pool, provider_call_id).await
    }

    async fn latest_analysis_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<CallAnalysis>, StoreError> {
        call_analyses::latest_analysis_for_phone(&self.pool, phone).await
    }

    async fn call_activity_since(
        &self,
        phone: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<ActivitySummary, StoreError> {
        call_analyses::call_activity_since(&self.pool, phone, since).await
    }

    async fn create_batch_job(&self, batch: &BatchJob) -> Result<(), StoreError> {
        batch_jobs::create_batch_job(&self.pool, batch).await
    }

    async fn get_batch_job(&self, batch_id: &str) -> Result<Option<BatchJob>, StoreError> {
        batch_jobs::get_batch_job(&self.pool, batch_id).await
    }

    async fn record_batch_progress(
        &self,
        batch_id: &str,
        completed_delta: i32,
        failed_delta: i32,
    ) -> Result<(), StoreError> {
        batch_jobs::record_batch_progress(&self.pool, batch_id, completed_delta, failed_delta)
            .await
    }

    async fn close_batch_job(
        &self,
        batch_id: &str,
        status: BatchStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        batch_jobs::close_batch_job(&self.pool, batch_id, status, ended_at).await
    }

    async fn list_active_batches(&self, campaign_id: &str) -> Result<Vec<BatchJob>, StoreError> {
        batch_jobs::list_active_batches(&self.pool, campaign_id).await
    }

    async fn list_stale_batches(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<BatchJob>, StoreError> {
        batch_jobs::list_stale_batches(&self.pool, started_before).await
    }

    async fn list_job_ids(&self) -> Result<Vec<String>, StoreError> {
        pipeline::list_job_ids(&self.pool).await
    }

    async fn list_pipeline_candidates(
        &self,
        job_id: &str,
    ) -> Result<Vec<PipelineCandidate>, StoreError> {
        pipeline::list_pipeline_candidates(&self.pool, job_id).await
    }

    async fn get_pipeline_candidate(
        &self,
        candidate_id: &str,
    ) -> Result<Option<PipelineCandidate>, StoreError> {
        pipeline::get_pipeline_candidate(&self.pool, candidate_id).await
    }

    async fn list_kanban_columns(&self, job_id: &str) -> Result<Vec<KanbanColumn>, StoreError> {
        pipeline::list_kanban_columns(&self.pool, job_id).await
    }

    async fn transition_pipeline_status(
        &self,
        transition: &StatusTransition,
    ) -> Result<bool, StoreError> {
        pipeline::transition_pipeline_status(&self.pool, transition).await
    }

    async fn set_manual_override(
        &self,
        candidate_id: &str,
        manual_override: bool,
    ) -> Result<bool, StoreError> {
        pipeline::set_manual_override(&self.pool, candidate_id, manual_override).await
    }

    async fn append_pipeline_note(
        &self,
        candidate_id: &str,
        note: &str,
    ) -> Result<(), StoreError> {
        pipeline::append_pipeline_note(&self.pool, candidate_id, note).await
    }

    async fn hired_count(&self, job_id: &str) -> Result<i32, StoreError> {
        pipeline::hired_count(&self.pool, job_id).await
    }

    async fn recompute_hired_count(&self, job_id: &str) -> Result<i32, StoreError> {
        pipeline::recompute_hired_count(&self.pool, job_id).await
    }
}
