use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;
use ro_common::db::{DbPoolError, MigrationError, PgOutreachStore, create_pool_from_url, run_migrations};
use ro_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use ro_common::reconcile::{
    OverrideCache, ReconcileError, ReconcileScheduler, StatusReconciliationEngine,
};
use ro_common::reconcile::override_cache::DEFAULT_OVERRIDE_CAPACITY;
use ro_common::store::{OutreachStore, StoreError};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "ro-reconciler",
    about = "Keep hiring pipelines in step with analyzed outreach calls"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    db_url: String,

    /// Jobs to reconcile, comma separated (default: every job in the store)
    #[arg(long = "job", value_delimiter = ',')]
    jobs: Vec<String>,

    /// Seconds between reconciliation passes of one job
    #[arg(long, env = "OUTREACH_RECONCILE_INTERVAL_SECS", default_value_t = 300)]
    interval_secs: u64,

    /// How long a manual move shields a candidate in this process
    #[arg(long, env = "OUTREACH_OVERRIDE_CACHE_TTL_SECS", default_value_t = 900)]
    override_ttl_secs: u64,

    /// Run a single pass over the jobs and exit instead of syncing periodically
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[derive(Debug, thiserror::Error)]
enum ReconcilerError {
    #[error("failed to create pool: {0}")]
    DbPool(#[from] DbPoolError),
    #[error("failed to run migrations: {0}")]
    Migrations(#[from] MigrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("interval must be at least one second")]
    ZeroInterval,
}

/// Explicitly requested jobs in order without duplicates, or every job known
/// to the store.
async fn resolve_jobs(
    store: &dyn OutreachStore,
    requested: &[String],
) -> Result<Vec<String>, StoreError> {
    let mut jobs: Vec<String> = Vec::new();
    for job in requested.iter().map(|job| job.trim()).filter(|job| !job.is_empty()) {
        if !jobs.iter().any(|known| known == job) {
            jobs.push(job.to_string());
        }
    }
    if !jobs.is_empty() {
        return Ok(jobs);
    }

    let mut all = store.list_job_ids().await?;
    all.sort();
    all.dedup();
    Ok(all)
}

/// One pass over every job. A failing job is logged and does not stop the
/// others; returns how many jobs failed.
async fn reconcile_once(engine: &StatusReconciliationEngine, jobs: &[String]) -> usize {
    let mut failures = 0;
    for job_id in jobs {
        match engine.reconcile_job(job_id).await {
            Ok(summary) => info!(
                job_id = %job_id,
                updated = summary.updated,
                skipped = summary.skipped,
                "reconciliation pass finished"
            ),
            Err(err) => {
                failures += 1;
                warn!(job_id = %job_id, error = %err, "reconciliation pass failed");
            }
        }
    }
    failures
}

async fn start_jobs(
    scheduler: &ReconcileScheduler,
    jobs: &[String],
    interval: Duration,
) -> Result<usize, ReconcileError> {
    let mut started = 0;
    for job_id in jobs {
        if scheduler.start(job_id, interval).await? {
            started += 1;
        }
    }
    Ok(started)
}

async fn run() -> Result<(), ReconcilerError> {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let args = Cli::parse();
    if args.interval_secs == 0 {
        return Err(ReconcilerError::ZeroInterval);
    }

    let pool = create_pool_from_url(&args.db_url)?;
    run_migrations(&pool).await?;

    let store: Arc<dyn OutreachStore> = Arc::new(PgOutreachStore::new(pool));
    let overrides = Arc::new(OverrideCache::new(
        Duration::from_secs(args.override_ttl_secs),
        DEFAULT_OVERRIDE_CAPACITY,
    ));
    let engine = Arc::new(StatusReconciliationEngine::from_store(
        store.clone(),
        overrides,
    ));
    let jobs = resolve_jobs(store.as_ref(), &args.jobs).await?;

    if args.once {
        let failures = reconcile_once(&engine, &jobs).await;
        info!(jobs = jobs.len(), failures, "single reconciliation run finished");
        return Ok(());
    }

    ro_metrics::init_metrics("OUTREACH_RECONCILER_METRICS_PORT", 9103);

    let scheduler = ReconcileScheduler::new(engine);
    let started = start_jobs(&scheduler, &jobs, Duration::from_secs(args.interval_secs)).await?;
    info!(
        jobs = started,
        interval_secs = args.interval_secs,
        "ro-reconciler running"
    );

    shutdown_signal().await;
    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("ro-reconciler failed: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ro_common::models::{
        CallAnalysis, CallObjectives, CallStatus, Campaign, CampaignCandidate,
        CandidateContactUpdate, PipelineCandidate,
    };
    use ro_common::store::MemoryStore;

    fn store_with_jobs() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_job("job-b", 0);
        store.insert_job("job-a", 0);

        store.insert_campaign(Campaign::new("camp", "Warehouse night shift"));
        let mut contact = CampaignCandidate::new("cc-1", "camp", "Alan", "Turing");
        contact.phone = Some("+15550142".into());
        store.insert_campaign_candidate(contact);

        let mut candidate = PipelineCandidate::new("p-1", "job-a", "applied");
        candidate.phone = Some("+1 555 0142".into());
        store.insert_pipeline_candidate(candidate);
        store
    }

    async fn interested_call(store: &MemoryStore) {
        let objectives = CallObjectives {
            interested: Some(true),
            ..Default::default()
        };
        let analysis = CallAnalysis {
            provider_call_id: "call-1".into(),
            campaign_candidate_id: "cc-1".into(),
            objectives: objectives.clone(),
            sentiment_score: Some(1.0),
            summary: Some("Keen to hear more.".into()),
            transcript_url: None,
            recording_url: None,
            key_points: Vec::new(),
            next_step: None,
            call_successful: Some(true),
            in_voicemail: false,
            analyzed_at: Utc::now(),
        };
        let contact = CandidateContactUpdate {
            campaign_id: "camp".into(),
            candidate_id: "cc-1".into(),
            objectives,
            last_contact: Utc::now(),
            call_status: CallStatus::Contacted,
        };
        store.record_call_analysis(&analysis, &contact).await.unwrap();
    }

    fn engine(store: Arc<MemoryStore>) -> Arc<StatusReconciliationEngine> {
        Arc::new(StatusReconciliationEngine::from_store(
            store,
            Arc::new(OverrideCache::default()),
        ))
    }

    #[tokio::test]
    async fn every_job_is_used_when_none_requested() {
        let store = store_with_jobs();
        let jobs = resolve_jobs(store.as_ref(), &[]).await.unwrap();
        assert_eq!(jobs, vec!["job-a".to_string(), "job-b".to_string()]);
    }

    #[tokio::test]
    async fn requested_jobs_keep_order_and_drop_duplicates() {
        let store = store_with_jobs();
        let requested = vec![
            "job-b".to_string(),
            " ".to_string(),
            "job-a".to_string(),
            "job-b".to_string(),
        ];
        let jobs = resolve_jobs(store.as_ref(), &requested).await.unwrap();
        assert_eq!(jobs, vec!["job-b".to_string(), "job-a".to_string()]);
    }

    #[tokio::test]
    async fn single_pass_moves_candidates() {
        let store = store_with_jobs();
        interested_call(&store).await;
        let engine = engine(store.clone());

        let failures = reconcile_once(&engine, &["job-a".to_string(), "job-b".to_string()]).await;
        assert_eq!(failures, 0);

        let candidate = store.get_pipeline_candidate("p-1").await.unwrap().unwrap();
        assert_eq!(candidate.status, "interested");
    }

    #[tokio::test]
    async fn periodic_sync_starts_once_per_job() {
        let store = store_with_jobs();
        let scheduler = ReconcileScheduler::new(engine(store));
        let jobs = vec!["job-a".to_string(), "job-b".to_string()];

        let started = start_jobs(&scheduler, &jobs, Duration::from_millis(20)).await.unwrap();
        assert_eq!(started, 2);
        let again = start_jobs(&scheduler, &jobs, Duration::from_millis(20)).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(scheduler.running_jobs().await, jobs);

        scheduler.shutdown().await;
        assert!(scheduler.running_jobs().await.is_empty());
    }

    #[test]
    fn cli_reads_job_list() {
        let cli = Cli::try_parse_from([
            "ro-reconciler",
            "--db-url",
            "postgres://localhost/outreach",
            "--job",
            "job-a,job-b",
            "--once",
        ])
        .unwrap();
        assert_eq!(cli.jobs, vec!["job-a".to_string(), "job-b".to_string()]);
        assert!(cli.once);
    }
}
