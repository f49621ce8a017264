//! Merges externally observed candidate signals into the job pipeline.
//!
//! Automated moves are conditional on the candidate still sitting where the
//! engine saw it and on `manual_override` being unset; the hired counter is
//! adjusted in the same store operation as the move.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::api::ReconcileSummary;
use crate::models::{KanbanColumn, PipelineCandidate, StatusTransition};
use crate::normalize::normalize_phone;
use crate::store::{ActivitySummary, OutreachStore, StoreError};

pub mod override_cache;
pub mod rules;
pub mod scheduler;
pub mod source;

pub use override_cache::OverrideCache;
pub use scheduler::ReconcileScheduler;
pub use source::{CallAnalysisSource, ObjectiveSource};

const SNIPPET_CHARS: usize = 160;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("pipeline candidate not found: {0}")]
    CandidateNotFound(String),
    #[error("status {status} is not a column of job {job_id}")]
    UnknownStatus { job_id: String, status: String },
    #[error("candidate {0} changed concurrently")]
    Conflict(String),
    #[error("sync interval must be positive")]
    InvalidInterval,
}

enum Step {
    Moved,
    Skipped,
}

pub struct StatusReconciliationEngine {
    store: Arc<dyn OutreachStore>,
    source: Arc<dyn ObjectiveSource>,
    overrides: Arc<OverrideCache>,
    last_run: DashMap<String, DateTime<Utc>>,
}

impl StatusReconciliationEngine {
    pub fn new(
        store: Arc<dyn OutreachStore>,
        source: Arc<dyn ObjectiveSource>,
        overrides: Arc<OverrideCache>,
    ) -> Self {
        Self {
            store,
            source,
            overrides,
            last_run: DashMap::new(),
        }
    }

    /// Engine reading signals from the store's own call analyses.
    pub fn from_store(store: Arc<dyn OutreachStore>, overrides: Arc<OverrideCache>) -> Self {
        let source = Arc::new(CallAnalysisSource::new(store.clone()));
        Self::new(store, source, overrides)
    }

    pub fn overrides(&self) -> &OverrideCache {
        &self.overrides
    }

    /// Reconciles every pipeline candidate of the job.
    pub async fn reconcile_job(&self, job_id: &str) -> Result<ReconcileSummary, ReconcileError> {
        let candidates = self.store.list_pipeline_candidates(job_id).await?;
        self.reconcile(job_id, &candidates).await
    }

    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn reconcile(
        &self,
        job_id: &str,
        candidates: &[PipelineCandidate],
    ) -> Result<ReconcileSummary, ReconcileError> {
        let columns = self.store.list_kanban_columns(job_id).await?;
        let since = self.last_run.get(job_id).map(|at| *at);
        let started = Utc::now();

        let mut summary = ReconcileSummary::default();
        for candidate in candidates {
            let step = match self.reconcile_one(job_id, candidate, &columns, since).await {
                Ok(step) => step,
                Err(err) => {
                    warn!(candidate_id = %candidate.id, error = %err, "reconciliation step failed");
                    Step::Skipped
                }
            };
            match step {
                Step::Moved => summary.updated += 1,
                Step::Skipped => summary.skipped += 1,
            }
        }
        self.last_run.insert(job_id.to_string(), started);

        counter!("outreach_reconcile_moves_total").increment(summary.updated as u64);
        counter!("outreach_reconcile_skipped_total").increment(summary.skipped as u64);
        info!(updated = summary.updated, skipped = summary.skipped, "reconciliation finished");
        Ok(summary)
    }

    async fn reconcile_one(
        &self,
        job_id: &str,
        candidate: &PipelineCandidate,
        columns: &[KanbanColumn],
        since: Option<DateTime<Utc>>,
    ) -> Result<Step, ReconcileError> {
        if candidate.job_id != job_id {
            return Ok(Step::Skipped);
        }
        if candidate.manual_override || self.overrides.contains(&candidate.id) {
            debug!(candidate_id = %candidate.id, "manual override, leaving in place");
            return Ok(Step::Skipped);
        }
        let Some(phone) = candidate
            .phone
            .as_deref()
            .map(normalize_phone)
            .filter(|p| !p.is_empty())
        else {
            return Ok(Step::Skipped);
        };

        let target = self
            .source
            .latest_objectives(&phone)
            .await?
            .as_ref()
            .and_then(rules::target_status);

        let mut step = Step::Skipped;
        if let Some(target) = target.filter(|t| *t != candidate.status) {
            let transition = StatusTransition {
                candidate_id: candidate.id.clone(),
                job_id: job_id.to_string(),
                from: candidate.status.clone(),
                to: target.to_string(),
                hired_delta: rules::hired_delta(&candidate.status, target, columns),
                manual: false,
            };
            if self.store.transition_pipeline_status(&transition).await? {
                info!(
                    candidate_id = %candidate.id,
                    from = %transition.from,
                    to = %transition.to,
                    hired_delta = transition.hired_delta,
                    "pipeline status reconciled"
                );
                step = Step::Moved;
            } else {
                debug!(candidate_id = %candidate.id, "candidate moved or locked concurrently");
            }
        }

        self.append_activity_note(candidate, &phone, since).await;
        Ok(step)
    }

    async fn append_activity_note(
        &self,
        candidate: &PipelineCandidate,
        phone: &str,
        since: Option<DateTime<Utc>>,
    ) {
        let activity = match self.source.activity_since(phone, since).await {
            Ok(activity) if !activity.is_empty() => activity,
            Ok(_) => return,
            Err(err) => {
                warn!(candidate_id = %candidate.id, error = %err, "failed to load activity");
                return;
            }
        };
        let note = activity_note(&activity);
        if let Err(err) = self.store.append_pipeline_note(&candidate.id, &note).await {
            warn!(candidate_id = %candidate.id, error = %err, "failed to append audit note");
        }
    }

    /// User-initiated move. Locks the candidate against automated moves.
    #[instrument(skip(self))]
    pub async fn move_candidate(
        &self,
        candidate_id: &str,
        status: &str,
    ) -> Result<StatusTransition, ReconcileError> {
        let candidate = self
            .store
            .get_pipeline_candidate(candidate_id)
            .await?
            .ok_or_else(|| ReconcileError::CandidateNotFound(candidate_id.to_string()))?;
        let columns = self.store.list_kanban_columns(&candidate.job_id).await?;
        if !rules::is_known_status(status, &columns) {
            return Err(ReconcileError::UnknownStatus {
                job_id: candidate.job_id,
                status: status.to_string(),
            });
        }

        let transition = StatusTransition {
            candidate_id: candidate.id.clone(),
            job_id: candidate.job_id.clone(),
            from: candidate.status.clone(),
            to: status.to_string(),
            hired_delta: rules::hired_delta(&candidate.status, status, &columns),
            manual: true,
        };

        if transition.from == transition.to {
            self.store.set_manual_override(candidate_id, true).await?;
        } else if !self.store.transition_pipeline_status(&transition).await? {
            return Err(ReconcileError::Conflict(candidate_id.to_string()));
        }
        self.overrides.insert(candidate_id);

        let note = format!("Moved manually from {} to {}.", transition.from, transition.to);
        if let Err(err) = self.store.append_pipeline_note(candidate_id, &note).await {
            warn!(candidate_id, error = %err, "failed to append audit note");
        }
        info!(
            candidate_id,
            from = %transition.from,
            to = %transition.to,
            "pipeline candidate moved manually"
        );
        Ok(transition)
    }

    pub async fn clear_override(&self, candidate_id: &str) -> Result<(), ReconcileError> {
        if !self.store.set_manual_override(candidate_id, false).await? {
            return Err(ReconcileError::CandidateNotFound(candidate_id.to_string()));
        }
        self.overrides.remove(candidate_id);
        info!(candidate_id, "manual override cleared");
        Ok(())
    }

    pub async fn hired_count(&self, job_id: &str) -> Result<i32, ReconcileError> {
        Ok(self.store.hired_count(job_id).await?)
    }

    pub async fn recompute_hired(&self, job_id: &str) -> Result<i32, ReconcileError> {
        let count = self.store.recompute_hired_count(job_id).await?;
        info!(job_id, hired = count, "hired count recomputed");
        Ok(count)
    }
}

fn activity_note(activity: &ActivitySummary) -> String {
    let mut note = format!(
        "New activity: {} call(s), {} analyzed.",
        activity.calls, activity.analyses
    );
    if let Some(snippet) = activity.latest_snippet.as_deref() {
        let snippet: String = snippet.chars().take(SNIPPET_CHARS).collect();
        note.push_str(&format!(" Latest: \"{snippet}\""));
    }
    note
}
