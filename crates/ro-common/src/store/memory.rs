use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ActivitySummary, AnalysisWrite, OutreachStore, StoreError, UpsertStatus};
use crate::models::{
    BatchJob, BatchStatus, CallAnalysis, CallEnded, CallRecord, CallRecordStatus, CallStatus,
    Campaign, CampaignCandidate, CampaignStatus, CandidateContactUpdate, KanbanColumn,
    PipelineCandidate, StatusTransition, status_keys,
};
use crate::normalize::normalize_phone;

#[derive(Default)]
struct State {
    campaigns: BTreeMap<String, Campaign>,
    campaign_candidates: BTreeMap<String, CampaignCandidate>,
    call_records: BTreeMap<String, CallRecord>,
    analyses: BTreeMap<String, CallAnalysis>,
    batches: BTreeMap<String, BatchJob>,
    jobs: BTreeMap<String, i32>,
    columns: BTreeMap<String, KanbanColumn>,
    pipeline: BTreeMap<String, PipelineCandidate>,
}

impl State {
    fn record_by_provider_id(&mut self, provider_call_id: &str) -> Option<&mut CallRecord> {
        self.call_records
            .values_mut()
            .find(|record| record.provider_call_id.as_deref() == Some(provider_call_id))
    }

    fn candidate_ids_for_phone(&self, phone: &str) -> Vec<String> {
        let wanted = normalize_phone(phone);
        if wanted.is_empty() {
            return Vec::new();
        }
        self.campaign_candidates
            .values()
            .filter(|candidate| {
                candidate
                    .phone
                    .as_deref()
                    .is_some_and(|p| normalize_phone(p) == wanted)
            })
            .map(|candidate| candidate.id.clone())
            .collect()
    }

    fn counts_as_hired(&self, job_id: &str, status: &str) -> bool {
        status == status_keys::HIRED
            || self
                .columns
                .values()
                .any(|c| c.job_id == job_id && c.status_key == status && c.counts_as_hired())
    }
}

/// Mutex-guarded in-memory store with the same conditional-write semantics
/// as the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_writes: AtomicBool,
    fail_call_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    /// Makes every subsequent write fail until turned off again.
    pub fn fail_writes(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    /// Makes only `insert_call_record` fail until turned off again.
    pub fn fail_call_inserts(&self, enabled: bool) {
        self.fail_call_inserts.store(enabled, Ordering::SeqCst);
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.state()
            .campaigns
            .insert(campaign.id.clone(), campaign);
    }

    pub fn insert_campaign_candidate(&self, candidate: CampaignCandidate) {
        let mut state = self.state();
        if let Some(campaign) = state.campaigns.get_mut(&candidate.campaign_id) {
            campaign.candidate_count += 1;
        }
        state
            .campaign_candidates
            .insert(candidate.id.clone(), candidate);
    }

    pub fn insert_job(&self, job_id: &str, hired_count: i32) {
        self.state().jobs.insert(job_id.to_string(), hired_count);
    }

    pub fn insert_column(&self, column: KanbanColumn) {
        self.state().columns.insert(column.id.clone(), column);
    }

    pub fn insert_pipeline_candidate(&self, candidate: PipelineCandidate) {
        self.state()
            .pipeline
            .insert(candidate.id.clone(), candidate);
    }

    pub fn call_records(&self) -> Vec<CallRecord> {
        self.state().call_records.values().cloned().collect()
    }

    pub fn analysis_count(&self) -> usize {
        self.state().analyses.len()
    }
}

#[async_trait]
impl OutreachStore for MemoryStore {
    async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>, StoreError> {
        Ok(self.state().campaigns.get(campaign_id).cloned())
    }

    async fn set_campaign_agent(
        &self,
        campaign_id: &str,
        agent_id: &str,
    ) -> Result<String, StoreError> {
        self.check_write()?;
        let mut state = self.state();
        let campaign = state
            .campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {campaign_id}")))?;
        if campaign.agent_id.is_none() {
            campaign.agent_id = Some(agent_id.to_string());
            campaign.updated_at = Utc::now();
        }
        Ok(campaign.agent_id.clone().unwrap_or_default())
    }

    async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut state = self.state();
        let campaign = state
            .campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {campaign_id}")))?;
        campaign.status = status;
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn refresh_response_rate(&self, campaign_id: &str) -> Result<f64, StoreError> {
        self.check_write()?;
        let mut state = self.state();
        let (total, contacted) = state
            .campaign_candidates
            .values()
            .filter(|c| c.campaign_id == campaign_id)
            .fold((0usize, 0usize), |(total, contacted), c| {
                let hit = usize::from(c.call_status == CallStatus::Contacted);
                (total + 1, contacted + hit)
            });
        let campaign = state
            .campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {campaign_id}")))?;
        let rate = if total == 0 {
            0.0
        } else {
            contacted as f64 / total as f64
        };
        campaign.response_rate = rate;
        Ok(rate)
    }

    async fn list_campaign_candidates(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<CampaignCandidate>, StoreError> {
        Ok(self
            .state()
            .campaign_candidates
            .values()
            .filter(|c| c.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn get_campaign_candidate(
        &self,
        candidate_id: &str,
    ) -> Result<Option<CampaignCandidate>, StoreError> {
        Ok(self.state().campaign_candidates.get(candidate_id).cloned())
    }

    async fn insert_call_record(&self, record: &CallRecord) -> Result<(), StoreError> {
        self.check_write()?;
        if self.fail_call_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("call record inserts disabled".into()));
        }
        let mut state = self.state();
        if state.call_records.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("call record {}", record.id)));
        }
        if let Some(provider_id) = record.provider_call_id.as_deref() {
            if state.record_by_provider_id(provider_id).is_some() {
                return Err(StoreError::Conflict(format!("provider call {provider_id}")));
            }
        }
        state.call_records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn mark_call_started(
        &self,
        provider_call_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut state = self.state();
        let Some(record) = state.record_by_provider_id(provider_call_id) else {
            return Ok(false);
        };
        record.status = record.status.on_started();
        record.started_at.get_or_insert(started_at);
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_call_ended(
        &self,
        provider_call_id: &str,
        ended: &CallEnded,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut state = self.state();
        let Some(record) = state.record_by_provider_id(provider_call_id) else {
            return Ok(false);
        };
        if record.started_at.is_none() {
            record.started_at = ended.started_at;
        }
        let derived = record
            .started_at
            .map(|start| (ended.ended_at - start).num_seconds().max(0))
            .and_then(|secs| i32::try_from(secs).ok());
        record.status = CallRecordStatus::Completed;
        record.ended_at = Some(ended.ended_at);
        record.duration_seconds = ended.duration_seconds.or(derived);
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail_pending_calls(&self, batch_id: &str, reason: &str) -> Result<u64, StoreError> {
        self.check_write()?;
        let now = Utc::now();
        let mut failed = 0;
        for record in self.state().call_records.values_mut() {
            if record.batch_id.as_deref() == Some(batch_id)
                && record.status == CallRecordStatus::Pending
            {
                record.status = CallRecordStatus::Failed;
                record.failure_reason = Some(reason.to_string());
                record.updated_at = now;
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn list_batch_calls(&self, batch_id: &str) -> Result<Vec<CallRecord>, StoreError> {
        Ok(self
            .state()
            .call_records
            .values()
            .filter(|r| r.batch_id.as_deref() == Some(batch_id))
            .cloned()
            .collect())
    }

    async fn get_call_record(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, StoreError> {
        Ok(self
            .state()
            .record_by_provider_id(provider_call_id)
            .map(|r| r.clone()))
    }

    async fn record_call_analysis(
        &self,
        analysis: &CallAnalysis,
        contact: &CandidateContactUpdate,
    ) -> Result<AnalysisWrite, StoreError> {
        self.check_write()?;
        let mut state = self.state();

        let status = match state
            .analyses
            .insert(analysis.provider_call_id.clone(), analysis.clone())
        {
            Some(_) => UpsertStatus::Updated,
            None => UpsertStatus::Created,
        };

        if let Some(record) = state.record_by_provider_id(&analysis.provider_call_id) {
            if record.status != CallRecordStatus::Completed {
                record.status = CallRecordStatus::Completed;
                record.updated_at = Utc::now();
            }
        }

        let candidate_updated = match state.campaign_candidates.get_mut(&contact.candidate_id) {
            Some(candidate)
                if candidate.campaign_id == contact.campaign_id
                    && candidate
                        .last_contact
                        .is_none_or(|previous| previous <= contact.last_contact) =>
            {
                candidate.apply_contact(contact);
                true
            }
            _ => false,
        };

        Ok(AnalysisWrite {
            analysis: status,
            candidate_updated,
        })
    }

    async fn get_call_analysis(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallAnalysis>, StoreError> {
        Ok(self.state().analyses.get(provider_call_id).cloned())
    }

    async fn latest_analysis_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<CallAnalysis>, StoreError> {
        let state = self.state();
        let owners = state.candidate_ids_for_phone(phone);
        Ok(state
            .analyses
            .values()
            .filter(|a| owners.contains(&a.campaign_candidate_id))
            .max_by_key(|a| a.analyzed_at)
            .cloned())
    }

    async fn call_activity_since(
        &self,
        phone: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<ActivitySummary, StoreError> {
        let state = self.state();
        let owners = state.candidate_ids_for_phone(phone);
        let after = |at: DateTime<Utc>| since.is_none_or(|since| at > since);

        let calls = state
            .call_records
            .values()
            .filter(|r| owners.contains(&r.campaign_candidate_id) && after(r.created_at))
            .count();
        let recent: Vec<&CallAnalysis> = state
            .analyses
            .values()
            .filter(|a| owners.contains(&a.campaign_candidate_id) && after(a.analyzed_at))
            .collect();
        let latest_snippet = recent
            .iter()
            .max_by_key(|a| a.analyzed_at)
            .and_then(|a| a.summary.clone());

        Ok(ActivitySummary {
            calls: calls as i64,
            analyses: recent.len() as i64,
            latest_snippet,
        })
    }

    async fn create_batch_job(&self, batch: &BatchJob) -> Result<(), StoreError> {
        self.check_write()?;
        let mut state = self.state();
        if !state.campaigns.contains_key(&batch.campaign_id) {
            return Err(StoreError::NotFound(format!("campaign {}", batch.campaign_id)));
        }
        state.batches.insert(batch.id.clone(), batch.clone());
        Ok(())
    }

    async fn get_batch_job(&self, batch_id: &str) -> Result<Option<BatchJob>, StoreError> {
        Ok(self.state().batches.get(batch_id).cloned())
    }

    async fn record_batch_progress(
        &self,
        batch_id: &str,
        completed_delta: i32,
        failed_delta: i32,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut state = self.state();
        let batch = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {batch_id}")))?;
        batch.completed_calls += completed_delta;
        batch.failed_calls += failed_delta;
        Ok(())
    }

    async fn close_batch_job(
        &self,
        batch_id: &str,
        status: BatchStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut state = self.state();
        match state.batches.get_mut(batch_id) {
            Some(batch) if batch.status == BatchStatus::InProgress => {
                batch.status = status;
                batch.ended_at = Some(ended_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_batches(&self, campaign_id: &str) -> Result<Vec<BatchJob>, StoreError> {
        Ok(self
            .state()
            .batches
            .values()
            .filter(|b| b.campaign_id == campaign_id && b.status == BatchStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn list_stale_batches(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<BatchJob>, StoreError> {
        Ok(self
            .state()
            .batches
            .values()
            .filter(|b| b.status == BatchStatus::InProgress && b.started_at < started_before)
            .cloned()
            .collect())
    }

    async fn list_job_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state().jobs.keys().cloned().collect())
    }

    async fn list_pipeline_candidates(
        &self,
        job_id: &str,
    ) -> Result<Vec<PipelineCandidate>, StoreError> {
        Ok(self
            .state()
            .pipeline
            .values()
            .filter(|c| c.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn get_pipeline_candidate(
        &self,
        candidate_id: &str,
    ) -> Result<Option<PipelineCandidate>, StoreError> {
        Ok(self.state().pipeline.get(candidate_id).cloned())
    }

    async fn list_kanban_columns(&self, job_id: &str) -> Result<Vec<KanbanColumn>, StoreError> {
        let mut columns: Vec<KanbanColumn> = self
            .state()
            .columns
            .values()
            .filter(|c| c.job_id == job_id)
            .cloned()
            .collect();
        columns.sort_by_key(|c| c.position);
        Ok(columns)
    }

    async fn transition_pipeline_status(
        &self,
        transition: &StatusTransition,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut state = self.state();
        let Some(candidate) = state.pipeline.get_mut(&transition.candidate_id) else {
            return Ok(false);
        };
        let movable = candidate.job_id == transition.job_id
            && candidate.status == transition.from
            && (transition.manual || !candidate.manual_override);
        if !movable {
            return Ok(false);
        }

        candidate.status = transition.to.clone();
        if transition.manual {
            candidate.manual_override = true;
        }
        candidate.updated_at = Utc::now();

        if let Some(hired) = state.jobs.get_mut(&transition.job_id) {
            *hired = (*hired + transition.hired_delta).max(0);
        }
        Ok(true)
    }

    async fn set_manual_override(
        &self,
        candidate_id: &str,
        manual_override: bool,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        let mut state = self.state();
        Ok(match state.pipeline.get_mut(candidate_id) {
            Some(candidate) => {
                candidate.manual_override = manual_override;
                candidate.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn append_pipeline_note(
        &self,
        candidate_id: &str,
        note: &str,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut state = self.state();
        let candidate = state
            .pipeline
            .get_mut(candidate_id)
            .ok_or_else(|| StoreError::NotFound(format!("pipeline candidate {candidate_id}")))?;
        candidate.notes.push(note.to_string());
        Ok(())
    }

    async fn hired_count(&self, job_id: &str) -> Result<i32, StoreError> {
        self.state()
            .jobs
            .get(job_id)
            .copied()
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))
    }

    async fn recompute_hired_count(&self, job_id: &str) -> Result<i32, StoreError> {
        self.check_write()?;
        let mut state = self.state();
        if !state.jobs.contains_key(job_id) {
            return Err(StoreError::NotFound(format!("job {job_id}")));
        }
        let count = state
            .pipeline
            .values()
            .filter(|c| c.job_id == job_id && state.counts_as_hired(job_id, &c.status))
            .count();
        let count = i32::try_from(count).unwrap_or(i32::MAX);
        state.jobs.insert(job_id.to_string(), count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CallObjectives;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_campaign(Campaign::new("camp", "Spring drive"));
        let mut candidate = CampaignCandidate::new("cand", "camp", "Ada", "Lovelace");
        candidate.phone = Some("+1 555 0100".into());
        store.insert_campaign_candidate(candidate);
        store
    }

    fn analysis(call_id: &str, interested: Option<bool>) -> CallAnalysis {
        CallAnalysis {
            provider_call_id: call_id.into(),
            campaign_candidate_id: "cand".into(),
            objectives: CallObjectives {
                interested,
                ..Default::default()
            },
            sentiment_score: None,
            summary: Some("Talked about the role.".into()),
            transcript_url: None,
            recording_url: None,
            key_points: Vec::new(),
            next_step: None,
            call_successful: Some(true),
            in_voicemail: false,
            analyzed_at: Utc::now(),
        }
    }

    fn contact(campaign_id: &str, interested: Option<bool>) -> CandidateContactUpdate {
        CandidateContactUpdate {
            campaign_id: campaign_id.into(),
            candidate_id: "cand".into(),
            objectives: CallObjectives {
                interested,
                ..Default::default()
            },
            last_contact: Utc::now(),
            call_status: CallStatus::Contacted,
        }
    }

    #[tokio::test]
    async fn analysis_upsert_is_keyed_by_provider_call_id() {
        let store = seeded();
        let first = store
            .record_call_analysis(&analysis("call-1", Some(true)), &contact("camp", Some(true)))
            .await
            .unwrap();
        let second = store
            .record_call_analysis(&analysis("call-1", Some(true)), &contact("camp", Some(true)))
            .await
            .unwrap();

        assert_eq!(first.analysis, UpsertStatus::Created);
        assert_eq!(second.analysis, UpsertStatus::Updated);
        assert_eq!(store.analysis_count(), 1);
    }

    #[tokio::test]
    async fn older_contact_does_not_roll_candidate_back() {
        let store = seeded();
        let mut newer = contact("camp", Some(true));
        newer.last_contact = Utc::now();
        let mut older = contact("camp", Some(false));
        older.last_contact = newer.last_contact - chrono::Duration::minutes(10);

        store
            .record_call_analysis(&analysis("call-new", Some(true)), &newer)
            .await
            .unwrap();
        let write = store
            .record_call_analysis(&analysis("call-old", Some(false)), &older)
            .await
            .unwrap();

        assert_eq!(write.analysis, UpsertStatus::Created);
        assert!(!write.candidate_updated);
        let candidate = store.get_campaign_candidate("cand").await.unwrap().unwrap();
        assert_eq!(candidate.interested, Some(true));
        assert_eq!(candidate.last_contact, Some(newer.last_contact));
    }

    #[tokio::test]
    async fn contact_update_requires_matching_campaign() {
        let store = seeded();
        let write = store
            .record_call_analysis(&analysis("call-1", Some(true)), &contact("other", Some(true)))
            .await
            .unwrap();
        assert!(!write.candidate_updated);

        let candidate = store.get_campaign_candidate("cand").await.unwrap().unwrap();
        assert_eq!(candidate.call_status, CallStatus::NotCalled);
        assert_eq!(candidate.interested, None);
    }

    #[tokio::test]
    async fn latest_analysis_matches_normalised_phone() {
        let store = seeded();
        store
            .record_call_analysis(&analysis("call-1", Some(false)), &contact("camp", Some(false)))
            .await
            .unwrap();
        let mut newer = analysis("call-2", Some(true));
        newer.analyzed_at = Utc::now() + chrono::Duration::seconds(5);
        store
            .record_call_analysis(&newer, &contact("camp", Some(true)))
            .await
            .unwrap();

        let latest = store
            .latest_analysis_for_phone("+15550100")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.provider_call_id, "call-2");
        assert!(store.latest_analysis_for_phone("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closing_a_batch_only_succeeds_once() {
        let store = seeded();
        let batch = BatchJob::new("camp", 2);
        store.create_batch_job(&batch).await.unwrap();

        assert!(
            store
                .close_batch_job(&batch.id, BatchStatus::Cancelled, Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !store
                .close_batch_job(&batch.id, BatchStatus::Completed, Utc::now())
                .await
                .unwrap()
        );
        let stored = store.get_batch_job(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Cancelled);
    }

    #[tokio::test]
    async fn failed_writes_surface_as_unavailable() {
        let store = seeded();
        store.fail_writes(true);
        let err = store
            .set_campaign_status("camp", CampaignStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
