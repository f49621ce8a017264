//! Bounded-concurrency outbound call dispatch.
//!
//! A batch is split into consecutive chunks of `max_concurrent` targets. All
//! calls of a chunk are issued together and awaited as a group before the
//! batch counters are persisted, so at most `max_concurrent` provider
//! requests are ever outstanding. Chunks are separated by
//! `delay_between_chunks`. Cancellation is cooperative: it stops future
//! chunks and fails records still `pending`, but never touches calls that
//! are already running.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::models::{BatchJob, BatchStatus, CANCELLED_REASON, CallRecord, CampaignStatus};
use crate::store::{OutreachStore, StoreError};
use crate::voice::{CreateCallRequest, ProviderError, VoiceProvider};

pub mod agent;
pub mod launcher;

pub use agent::{AgentProvisioner, AgentSettings, build_agent_prompt};
pub use launcher::CampaignLauncher;

/// Failure reason for records of batches whose dispatcher disappeared.
pub const DISPATCHER_LOST_REASON: &str = "dispatcher_lost";
/// Failure reason for records of batches aborted by a store error.
pub const PERSISTENCE_FAILED_REASON: &str = "persistence_failed";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("batch has no candidates to call")]
    EmptyBatch,
    #[error("invalid dispatch options: {0}")]
    InvalidOptions(String),
    #[error("campaign not found: {0}")]
    CampaignNotFound(String),
    #[error("campaign {campaign_id} is {} and cannot be launched", .status.as_str())]
    CampaignClosed {
        campaign_id: String,
        status: CampaignStatus,
    },
    #[error("batch not found: {0}")]
    BatchNotFound(String),
    #[error("batch {0} already completed")]
    BatchFinished(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("dispatch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub max_concurrent: usize,
    pub delay_between_chunks: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            delay_between_chunks: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub candidate_id: String,
    pub phone: String,
}

impl CallTarget {
    pub fn new(candidate_id: &str, phone: &str) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            phone: phone.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub campaign_id: String,
    pub agent_id: String,
    pub from_number: Option<String>,
    pub targets: Vec<CallTarget>,
    pub options: DispatchOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub status: BatchStatus,
    pub placed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// A batch whose dispatch loop is running in the background.
pub struct LaunchedBatch {
    pub batch_id: String,
    pub handle: JoinHandle<Result<BatchSummary, DispatchError>>,
}

/// A batch together with the call records it produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    pub batch: BatchJob,
    pub calls: Vec<CallRecord>,
}

enum CallOutcome {
    Placed,
    ProviderFailed,
    NotRecorded {
        provider_call_id: String,
        error: StoreError,
    },
}

#[derive(Clone)]
pub struct CallBatchDispatcher {
    store: Arc<dyn OutreachStore>,
    provider: Arc<dyn VoiceProvider>,
    active: Arc<DashMap<String, watch::Sender<bool>>>,
}

impl CallBatchDispatcher {
    pub fn new(store: Arc<dyn OutreachStore>, provider: Arc<dyn VoiceProvider>) -> Self {
        Self {
            store,
            provider,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Whether this process is currently running the dispatch loop of `batch_id`.
    pub fn is_running(&self, batch_id: &str) -> bool {
        self.active.contains_key(batch_id)
    }

    /// Persists a new batch and starts dispatching it in the background.
    ///
    /// Validation and batch creation errors are returned directly; the
    /// outcome of the dispatch loop itself is available through
    /// [`LaunchedBatch::handle`].
    #[instrument(skip(self, request), fields(campaign_id = %request.campaign_id, targets = request.targets.len()))]
    pub async fn launch_batch(&self, request: BatchRequest) -> Result<LaunchedBatch, DispatchError> {
        if request.targets.is_empty() {
            return Err(DispatchError::EmptyBatch);
        }
        if request.options.max_concurrent == 0 {
            return Err(DispatchError::InvalidOptions(
                "max_concurrent must be positive".into(),
            ));
        }
        if request.agent_id.trim().is_empty() {
            return Err(DispatchError::InvalidOptions("agent id is required".into()));
        }

        let batch = BatchJob::new(&request.campaign_id, request.targets.len());
        self.store.create_batch_job(&batch).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active.insert(batch.id.clone(), cancel_tx);

        info!(
            batch_id = %batch.id,
            max_concurrent = request.options.max_concurrent,
            "batch dispatch started"
        );

        let dispatcher = self.clone();
        let batch_id = batch.id.clone();
        let handle = tokio::spawn(async move {
            let result = dispatcher.run(&batch_id, &request, cancel_rx).await;
            dispatcher.active.remove(&batch_id);
            match &result {
                Ok(summary) => info!(
                    batch_id = %batch_id,
                    status = summary.status.as_str(),
                    placed = summary.placed,
                    failed = summary.failed,
                    cancelled = summary.cancelled,
                    "batch dispatch finished"
                ),
                Err(err) => {
                    error!(batch_id = %batch_id, error = %err, "batch dispatch aborted");
                    dispatcher.fail_batch(&batch_id).await;
                }
            }
            result
        });

        Ok(LaunchedBatch {
            batch_id: batch.id,
            handle,
        })
    }

    async fn run(
        &self,
        batch_id: &str,
        request: &BatchRequest,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<BatchSummary, DispatchError> {
        let chunk_size = request.options.max_concurrent;
        let chunk_count = request.targets.len().div_ceil(chunk_size);
        let mut summary = BatchSummary {
            batch_id: batch_id.to_string(),
            status: BatchStatus::InProgress,
            placed: 0,
            failed: 0,
            cancelled: 0,
        };

        for (index, chunk) in request.targets.chunks(chunk_size).enumerate() {
            if self.is_cancelled(batch_id, &cancel_rx).await? {
                let remaining = &request.targets[index * chunk_size..];
                summary.cancelled = self.abandon(batch_id, remaining).await?;
                summary.status = BatchStatus::Cancelled;
                return Ok(summary);
            }

            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|target| self.place_call(batch_id, request, target)),
            )
            .await;

            let mut placed = 0;
            let mut failed = 0;
            let mut unrecorded = Vec::new();
            let mut write_error = None;
            for outcome in outcomes {
                match outcome {
                    CallOutcome::Placed => placed += 1,
                    CallOutcome::ProviderFailed => failed += 1,
                    CallOutcome::NotRecorded {
                        provider_call_id,
                        error,
                    } => {
                        placed += 1;
                        unrecorded.push(provider_call_id);
                        write_error.get_or_insert(error);
                    }
                }
            }

            self.store
                .record_batch_progress(batch_id, placed as i32, failed as i32)
                .await?;
            summary.placed += placed;
            summary.failed += failed;

            if let Some(err) = write_error {
                error!(
                    batch_id,
                    unrecorded_calls = ?unrecorded,
                    "placed calls are missing from the batch record"
                );
                return Err(err.into());
            }

            if index + 1 < chunk_count {
                tokio::select! {
                    _ = tokio::time::sleep(request.options.delay_between_chunks) => {}
                    _ = cancel_rx.changed() => {}
                }
            }
        }

        if self
            .store
            .close_batch_job(batch_id, BatchStatus::Completed, Utc::now())
            .await?
        {
            summary.status = BatchStatus::Completed;
        } else {
            // Cancelled while the last chunk was in flight.
            self.store
                .fail_pending_calls(batch_id, CANCELLED_REASON)
                .await?;
            summary.status = BatchStatus::Cancelled;
        }
        Ok(summary)
    }

    async fn is_cancelled(
        &self,
        batch_id: &str,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<bool, DispatchError> {
        if *cancel_rx.borrow() {
            return Ok(true);
        }
        // Another process may have cancelled the batch.
        let persisted = self.store.get_batch_job(batch_id).await?;
        Ok(persisted.is_some_and(|batch| batch.status == BatchStatus::Cancelled))
    }

    async fn place_call(
        &self,
        batch_id: &str,
        request: &BatchRequest,
        target: &CallTarget,
    ) -> CallOutcome {
        let call = CreateCallRequest::new(
            &request.agent_id,
            &target.phone,
            request.from_number.as_deref(),
        )
        .with_metadata("campaign_id", &request.campaign_id)
        .with_metadata("candidate_id", &target.candidate_id)
        .with_metadata("batch_id", batch_id);

        let provider_call_id = match self.provider.create_call(&call).await {
            Ok(id) => id,
            Err(err) => {
                counter!("outreach_calls_failed_total").increment(1);
                warn!(
                    batch_id,
                    candidate_id = %target.candidate_id,
                    transient = err.is_transient(),
                    error = %err,
                    "call placement failed"
                );
                return CallOutcome::ProviderFailed;
            }
        };

        let record = CallRecord::placed(
            &target.candidate_id,
            batch_id,
            &provider_call_id,
            request.from_number.as_deref(),
            &target.phone,
        );
        match self.store.insert_call_record(&record).await {
            Ok(()) => {
                counter!("outreach_calls_placed_total").increment(1);
                CallOutcome::Placed
            }
            Err(err) => {
                error!(
                    batch_id,
                    candidate_id = %target.candidate_id,
                    provider_call_id = %provider_call_id,
                    error = %err,
                    "placed call could not be recorded"
                );
                CallOutcome::NotRecorded {
                    provider_call_id,
                    error: err,
                }
            }
        }
    }

    /// Records never-issued targets as cancelled and closes the batch.
    async fn abandon(&self, batch_id: &str, remaining: &[CallTarget]) -> Result<usize, DispatchError> {
        for target in remaining {
            let record = CallRecord::cancelled(&target.candidate_id, batch_id, &target.phone);
            self.store.insert_call_record(&record).await?;
        }
        self.store
            .record_batch_progress(batch_id, 0, remaining.len() as i32)
            .await?;
        self.store
            .fail_pending_calls(batch_id, CANCELLED_REASON)
            .await?;
        self.store
            .close_batch_job(batch_id, BatchStatus::Cancelled, Utc::now())
            .await?;
        info!(batch_id, abandoned = remaining.len(), "batch dispatch stopped by cancellation");
        Ok(remaining.len())
    }

    /// Best-effort close of a batch whose dispatch loop hit a store error.
    /// Records still `pending` are failed so the batch view shows the abort.
    async fn fail_batch(&self, batch_id: &str) {
        match self
            .store
            .close_batch_job(batch_id, BatchStatus::Cancelled, Utc::now())
            .await
        {
            Ok(true) => counter!("outreach_batches_cancelled_total").increment(1),
            Ok(false) => {}
            Err(err) => error!(batch_id, error = %err, "aborted batch could not be closed"),
        }
        match self
            .store
            .fail_pending_calls(batch_id, PERSISTENCE_FAILED_REASON)
            .await
        {
            Ok(failed) => warn!(batch_id, pending_failed = failed, "aborted batch closed"),
            Err(err) => error!(batch_id, error = %err, "pending calls of aborted batch not failed"),
        }
    }

    /// Cooperative cancellation: closes the batch, stops further chunks and
    /// fails records still `pending`. Calls already running are left alone.
    #[instrument(skip(self))]
    pub async fn cancel_batch(&self, batch_id: &str) -> Result<BatchJob, DispatchError> {
        let batch = self
            .store
            .get_batch_job(batch_id)
            .await?
            .ok_or_else(|| DispatchError::BatchNotFound(batch_id.to_string()))?;

        match batch.status {
            BatchStatus::Completed => return Err(DispatchError::BatchFinished(batch.id)),
            BatchStatus::Cancelled => {
                self.signal_cancel(batch_id);
                return Ok(batch);
            }
            BatchStatus::InProgress => {}
        }

        let closed = self
            .store
            .close_batch_job(batch_id, BatchStatus::Cancelled, Utc::now())
            .await?;
        self.signal_cancel(batch_id);

        let current = self
            .store
            .get_batch_job(batch_id)
            .await?
            .ok_or_else(|| DispatchError::BatchNotFound(batch_id.to_string()))?;
        if !closed && current.status == BatchStatus::Completed {
            return Err(DispatchError::BatchFinished(current.id));
        }

        let failed = self
            .store
            .fail_pending_calls(batch_id, CANCELLED_REASON)
            .await?;
        if closed {
            counter!("outreach_batches_cancelled_total").increment(1);
        }
        info!(batch_id, pending_failed = failed, "batch cancelled");
        Ok(current)
    }

    fn signal_cancel(&self, batch_id: &str) {
        if let Some(sender) = self.active.get(batch_id) {
            let _ = sender.send(true);
        }
    }

    /// Cancels every in-progress batch of the campaign and pauses it.
    /// Returns the ids of the batches that were cancelled.
    #[instrument(skip(self))]
    pub async fn stop_campaign(&self, campaign_id: &str) -> Result<Vec<String>, DispatchError> {
        if self.store.get_campaign(campaign_id).await?.is_none() {
            return Err(DispatchError::CampaignNotFound(campaign_id.to_string()));
        }

        let mut cancelled = Vec::new();
        for batch in self.store.list_active_batches(campaign_id).await? {
            match self.cancel_batch(&batch.id).await {
                Ok(_) => cancelled.push(batch.id),
                Err(DispatchError::BatchFinished(_)) => {}
                Err(err) => return Err(err),
            }
        }

        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Paused)
            .await?;
        info!(campaign_id, batches = cancelled.len(), "campaign paused");
        Ok(cancelled)
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<BatchView, DispatchError> {
        let batch = self
            .store
            .get_batch_job(batch_id)
            .await?
            .ok_or_else(|| DispatchError::BatchNotFound(batch_id.to_string()))?;
        let calls = self.store.list_batch_calls(batch_id).await?;
        Ok(BatchView { batch, calls })
    }

    /// Cancels `in_progress` batches started before `now - older_than` that
    /// have no dispatch loop in this process.
    pub async fn recover_stale_batches(
        &self,
        older_than: chrono::Duration,
    ) -> Result<Vec<String>, DispatchError> {
        let recovered =
            recover_stale_batches(self.store.as_ref(), older_than, |id| self.is_running(id))
                .await?;
        Ok(recovered)
    }
}

/// Cancels `in_progress` batches started before `now - older_than`, skipping
/// those for which `is_running` holds, and fails their `pending` records.
/// Returns the ids of the batches that were cancelled.
#[instrument(skip(store, is_running))]
pub async fn recover_stale_batches<F>(
    store: &dyn OutreachStore,
    older_than: chrono::Duration,
    is_running: F,
) -> Result<Vec<String>, StoreError>
where
    F: Fn(&str) -> bool,
{
    let cutoff = Utc::now() - older_than;
    let mut recovered = Vec::new();

    for batch in store.list_stale_batches(cutoff).await? {
        if is_running(&batch.id) {
            continue;
        }
        if !store
            .close_batch_job(&batch.id, BatchStatus::Cancelled, Utc::now())
            .await?
        {
            continue;
        }
        let failed = store
            .fail_pending_calls(&batch.id, DISPATCHER_LOST_REASON)
            .await?;
        counter!("outreach_batches_cancelled_total").increment(1);
        warn!(
            batch_id = %batch.id,
            campaign_id = %batch.campaign_id,
            pending_failed = failed,
            "stale batch cancelled"
        );
        recovered.push(batch.id);
    }

    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Campaign, CampaignCandidate, CallRecordStatus, CallEnded};
    use crate::store::MemoryStore;
    use crate::voice::FakeVoiceProvider;

    fn phone(n: usize) -> String {
        format!("+1555000{n:04}")
    }

    fn seeded_store(candidates: usize) -> (Arc<MemoryStore>, Vec<CallTarget>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_campaign(Campaign::new("camp", "Spring drive"));
        let mut targets = Vec::new();
        for n in 0..candidates {
            let id = format!("cand-{n}");
            let mut candidate = CampaignCandidate::new(&id, "camp", "Test", &n.to_string());
            candidate.phone = Some(phone(n));
            store.insert_campaign_candidate(candidate);
            targets.push(CallTarget::new(&id, &phone(n)));
        }
        (store, targets)
    }

    fn request(targets: Vec<CallTarget>, max_concurrent: usize, delay: Duration) -> BatchRequest {
        BatchRequest {
            campaign_id: "camp".into(),
            agent_id: "agent-1".into(),
            from_number: Some("+15559999".into()),
            targets,
            options: DispatchOptions {
                max_concurrent,
                delay_between_chunks: delay,
            },
        }
    }

    async fn wait_for_completed(store: &MemoryStore, batch_id: &str, completed: i32) {
        for _ in 0..200 {
            let batch = store.get_batch_job(batch_id).await.unwrap().unwrap();
            if batch.completed_calls >= completed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("batch {batch_id} never reached {completed} completed calls");
    }

    #[tokio::test]
    async fn dispatches_in_waves_bounded_by_max_concurrent() {
        let (store, targets) = seeded_store(7);
        let provider =
            Arc::new(FakeVoiceProvider::new().with_latency(Duration::from_millis(20)));
        let dispatcher = CallBatchDispatcher::new(store.clone(), provider.clone());

        let launched = dispatcher
            .launch_batch(request(targets, 3, Duration::from_millis(10)))
            .await
            .unwrap();
        let summary = launched.handle.await.unwrap().unwrap();

        assert_eq!(provider.waves(), vec![3, 3, 1]);
        assert_eq!(provider.max_in_flight(), 3);
        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.placed, 7);

        let batch = store.get_batch_job(&launched.batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.completed_calls, 7);
        assert!(batch.ended_at.is_some());

        let records = store.list_batch_calls(&launched.batch_id).await.unwrap();
        assert_eq!(records.len(), 7);
        assert!(records.iter().all(|r| r.status == CallRecordStatus::Pending));
        assert!(!dispatcher.is_running(&launched.batch_id));
    }

    #[tokio::test]
    async fn provider_failures_are_isolated_per_call() {
        let (store, targets) = seeded_store(3);
        let provider = Arc::new(FakeVoiceProvider::new().failing_for(&phone(1)));
        let dispatcher = CallBatchDispatcher::new(store.clone(), provider.clone());

        let launched = dispatcher
            .launch_batch(request(targets, 3, Duration::ZERO))
            .await
            .unwrap();
        let summary = launched.handle.await.unwrap().unwrap();

        assert_eq!(summary.placed, 2);
        assert_eq!(summary.failed, 1);
        let batch = store.get_batch_job(&launched.batch_id).await.unwrap().unwrap();
        assert_eq!((batch.completed_calls, batch.failed_calls), (2, 1));
        assert_eq!(batch.status, BatchStatus::Completed);

        let records = store.list_batch_calls(&launched.batch_id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.campaign_candidate_id != "cand-1"));
    }

    #[tokio::test]
    async fn rejects_empty_batches_and_zero_concurrency() {
        let (store, targets) = seeded_store(1);
        let dispatcher = CallBatchDispatcher::new(store, Arc::new(FakeVoiceProvider::new()));

        let err = dispatcher
            .launch_batch(request(Vec::new(), 3, Duration::ZERO))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::EmptyBatch));

        let err = dispatcher
            .launch_batch(request(targets, 0, Duration::ZERO))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn batch_creation_failure_fails_the_launch() {
        let (store, targets) = seeded_store(2);
        store.fail_writes(true);
        let provider = Arc::new(FakeVoiceProvider::new());
        let dispatcher = CallBatchDispatcher::new(store, provider.clone());

        let err = dispatcher
            .launch_batch(request(targets, 2, Duration::ZERO))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::Store(StoreError::Unavailable(_))));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn store_failure_mid_batch_closes_the_batch() {
        let (store, targets) = seeded_store(4);
        let provider = Arc::new(FakeVoiceProvider::new());
        let dispatcher = CallBatchDispatcher::new(store.clone(), provider.clone());

        let launched = dispatcher
            .launch_batch(request(targets, 2, Duration::from_millis(300)))
            .await
            .unwrap();
        let batch_id = launched.batch_id.clone();
        wait_for_completed(&store, &batch_id, 2).await;
        store.fail_call_inserts(true);

        let err = launched.handle.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::Store(StoreError::Unavailable(_))));
        assert_eq!(provider.call_count(), 4);
        assert!(!dispatcher.is_running(&batch_id));

        let view = dispatcher.get_batch(&batch_id).await.unwrap();
        assert_eq!(view.batch.status, BatchStatus::Cancelled);
        assert!(view.batch.ended_at.is_some());
        assert_eq!(view.calls.len(), 2);
        assert!(view.calls.iter().all(|r| {
            r.status == CallRecordStatus::Failed
                && r.failure_reason.as_deref() == Some(PERSISTENCE_FAILED_REASON)
        }));
    }

    #[tokio::test]
    async fn cancellation_mid_flight_spares_running_calls() {
        let (store, targets) = seeded_store(6);
        let provider = Arc::new(FakeVoiceProvider::new());
        let dispatcher = CallBatchDispatcher::new(store.clone(), provider.clone());

        let launched = dispatcher
            .launch_batch(request(targets, 2, Duration::from_millis(500)))
            .await
            .unwrap();
        let batch_id = launched.batch_id.clone();
        wait_for_completed(&store, &batch_id, 2).await;

        let call_a = FakeVoiceProvider::call_id_for(&phone(0));
        let call_b = FakeVoiceProvider::call_id_for(&phone(1));
        assert!(store.mark_call_started(&call_a, Utc::now()).await.unwrap());

        let cancelled = dispatcher.cancel_batch(&batch_id).await.unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);

        let summary = launched.handle.await.unwrap().unwrap();
        assert_eq!(summary.status, BatchStatus::Cancelled);
        assert_eq!(summary.cancelled, 4);
        assert_eq!(provider.call_count(), 2);

        let a = store.get_call_record(&call_a).await.unwrap().unwrap();
        assert_eq!(a.status, CallRecordStatus::InProgress);
        let b = store.get_call_record(&call_b).await.unwrap().unwrap();
        assert_eq!(b.status, CallRecordStatus::Failed);
        assert_eq!(b.failure_reason.as_deref(), Some(CANCELLED_REASON));

        let records = store.list_batch_calls(&batch_id).await.unwrap();
        let never_issued: Vec<_> = records
            .iter()
            .filter(|r| r.provider_call_id.is_none())
            .collect();
        assert_eq!(never_issued.len(), 4);
        assert!(never_issued.iter().all(|r| {
            r.status == CallRecordStatus::Failed
                && r.failure_reason.as_deref() == Some(CANCELLED_REASON)
        }));

        let ended = CallEnded {
            started_at: None,
            ended_at: Utc::now(),
            duration_seconds: Some(42),
        };
        assert!(store.mark_call_ended(&call_a, &ended).await.unwrap());
        let a = store.get_call_record(&call_a).await.unwrap().unwrap();
        assert_eq!(a.status, CallRecordStatus::Completed);
        assert_eq!(a.duration_seconds, Some(42));

        let batch = store.get_batch_job(&batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert_eq!((batch.completed_calls, batch.failed_calls), (2, 4));
    }

    #[tokio::test]
    async fn cancelling_twice_is_idempotent_and_completed_batches_refuse() {
        let (store, targets) = seeded_store(1);
        let dispatcher = CallBatchDispatcher::new(store.clone(), Arc::new(FakeVoiceProvider::new()));

        let launched = dispatcher
            .launch_batch(request(targets, 1, Duration::ZERO))
            .await
            .unwrap();
        launched.handle.await.unwrap().unwrap();
        let err = dispatcher.cancel_batch(&launched.batch_id).await.unwrap_err();
        assert!(matches!(err, DispatchError::BatchFinished(_)));

        let open = BatchJob::new("camp", 1);
        store.create_batch_job(&open).await.unwrap();
        let first = dispatcher.cancel_batch(&open.id).await.unwrap();
        let second = dispatcher.cancel_batch(&open.id).await.unwrap();
        assert_eq!(first.status, BatchStatus::Cancelled);
        assert_eq!(second.ended_at, first.ended_at);

        let err = dispatcher.cancel_batch("missing").await.unwrap_err();
        assert!(matches!(err, DispatchError::BatchNotFound(_)));
    }

    #[tokio::test]
    async fn stop_campaign_cancels_active_batches_and_pauses() {
        let (store, _) = seeded_store(1);
        let dispatcher = CallBatchDispatcher::new(store.clone(), Arc::new(FakeVoiceProvider::new()));
        store
            .set_campaign_status("camp", CampaignStatus::Active)
            .await
            .unwrap();
        let first = BatchJob::new("camp", 3);
        let second = BatchJob::new("camp", 3);
        store.create_batch_job(&first).await.unwrap();
        store.create_batch_job(&second).await.unwrap();

        let mut cancelled = dispatcher.stop_campaign("camp").await.unwrap();
        cancelled.sort();
        let mut expected = vec![first.id.clone(), second.id.clone()];
        expected.sort();
        assert_eq!(cancelled, expected);

        let campaign = store.get_campaign("camp").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Paused);
        assert!(store.list_active_batches("camp").await.unwrap().is_empty());

        let err = dispatcher.stop_campaign("nope").await.unwrap_err();
        assert!(matches!(err, DispatchError::CampaignNotFound(_)));
    }

    #[tokio::test]
    async fn stale_batches_without_a_dispatcher_are_recovered() {
        let (store, _) = seeded_store(1);
        let dispatcher = CallBatchDispatcher::new(store.clone(), Arc::new(FakeVoiceProvider::new()));
        let mut stale = BatchJob::new("camp", 1);
        stale.started_at = Utc::now() - chrono::Duration::hours(3);
        store.create_batch_job(&stale).await.unwrap();
        store
            .insert_call_record(&CallRecord::placed("cand-0", &stale.id, "call-x", None, &phone(0)))
            .await
            .unwrap();
        let fresh = BatchJob::new("camp", 1);
        store.create_batch_job(&fresh).await.unwrap();

        let recovered = dispatcher
            .recover_stale_batches(chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(recovered, vec![stale.id.clone()]);

        let record = store.get_call_record("call-x").await.unwrap().unwrap();
        assert_eq!(record.failure_reason.as_deref(), Some(DISPATCHER_LOST_REASON));
        let fresh = store.get_batch_job(&fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, BatchStatus::InProgress);
    }
}
