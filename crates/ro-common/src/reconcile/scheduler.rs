//! One cancellable periodic reconciliation task per job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{ReconcileError, StatusReconciliationEngine};

struct SyncTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ReconcileScheduler {
    engine: Arc<StatusReconciliationEngine>,
    tasks: Mutex<HashMap<String, SyncTask>>,
}

impl ReconcileScheduler {
    pub fn new(engine: Arc<StatusReconciliationEngine>) -> Self {
        Self {
            engine,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<StatusReconciliationEngine> {
        &self.engine
    }

    /// Starts periodic reconciliation of `job_id`. Returns false when a task
    /// for the job is already running.
    pub async fn start(&self, job_id: &str, interval: Duration) -> Result<bool, ReconcileError> {
        if interval.is_zero() {
            return Err(ReconcileError::InvalidInterval);
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get(job_id) {
            if !task.handle.is_finished() {
                return Ok(false);
            }
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            self.engine.clone(),
            job_id.to_string(),
            interval,
            stop_rx,
        ));
        tasks.insert(job_id.to_string(), SyncTask { stop, handle });
        info!(job_id, interval_secs = interval.as_secs_f64(), "reconciliation sync started");
        Ok(true)
    }

    /// Stops the job's task and waits for an in-flight pass to finish.
    pub async fn stop(&self, job_id: &str) -> bool {
        let task = self.tasks.lock().await.remove(job_id);
        match task {
            Some(task) => {
                finish(job_id, task).await;
                info!(job_id, "reconciliation sync stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, job_id: &str) -> bool {
        self.tasks
            .lock()
            .await
            .get(job_id)
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub async fn running_jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();
        jobs.sort();
        jobs
    }

    pub async fn shutdown(&self) {
        let drained: Vec<(String, SyncTask)> = self.tasks.lock().await.drain().collect();
        let count = drained.len();
        for (job_id, task) in drained {
            finish(&job_id, task).await;
        }
        info!(count, "reconciliation scheduler shut down");
    }
}

async fn finish(job_id: &str, task: SyncTask) {
    let _ = task.stop.send(true);
    if let Err(err) = task.handle.await {
        warn!(job_id, error = %err, "reconciliation task ended abnormally");
    }
}

async fn run(
    engine: Arc<StatusReconciliationEngine>,
    job_id: String,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.reconcile_job(&job_id).await {
                    Ok(summary) => debug!(
                        job_id = %job_id,
                        updated = summary.updated,
                        skipped = summary.skipped,
                        "scheduled reconciliation pass"
                    ),
                    Err(err) => warn!(job_id = %job_id, error = %err, "scheduled reconciliation failed"),
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PipelineCandidate;
    use crate::reconcile::OverrideCache;
    use crate::store::{MemoryStore, OutreachStore};

    fn scheduler() -> (Arc<MemoryStore>, ReconcileScheduler) {
        let store = Arc::new(MemoryStore::new());
        store.insert_job("job", 0);
        let mut candidate = PipelineCandidate::new("p-1", "job", "applied");
        candidate.phone = Some("+15550100".into());
        store.insert_pipeline_candidate(candidate);
        let engine = Arc::new(StatusReconciliationEngine::from_store(
            store.clone(),
            Arc::new(OverrideCache::default()),
        ));
        (store, ReconcileScheduler::new(engine))
    }

    #[tokio::test]
    async fn start_is_idempotent_per_job_and_stop_ends_the_task() {
        let (_store, scheduler) = scheduler();
        assert!(scheduler.start("job", Duration::from_millis(10)).await.unwrap());
        assert!(!scheduler.start("job", Duration::from_millis(10)).await.unwrap());
        assert!(scheduler.is_running("job").await);
        assert_eq!(scheduler.running_jobs().await, vec!["job".to_string()]);

        assert!(scheduler.stop("job").await);
        assert!(!scheduler.is_running("job").await);
        assert!(!scheduler.stop("job").await);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (_store, scheduler) = scheduler();
        let err = scheduler.start("job", Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidInterval));
    }

    #[tokio::test]
    async fn shutdown_stops_every_job() {
        let (store, scheduler) = scheduler();
        store.insert_job("other", 0);
        scheduler.start("job", Duration::from_millis(10)).await.unwrap();
        scheduler.start("other", Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.shutdown().await;
        assert!(scheduler.running_jobs().await.is_empty());

        // Passes ran against the store without touching the candidate.
        let candidate = store.get_pipeline_candidate("p-1").await.unwrap().unwrap();
        assert_eq!(candidate.status, "applied");
    }
}
