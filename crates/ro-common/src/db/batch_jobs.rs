use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tracing::instrument;

use crate::db::PgPool;
use crate::db::util::{conflict_or_pg, timed};
use crate::models::{BatchJob, BatchStatus};
use crate::store::StoreError;

const BATCH_COLUMNS: &str = "id, campaign_id, total_candidates, completed_calls, \
     failed_calls, status, started_at, ended_at";

fn batch_from_row(row: &Row) -> Result<BatchJob, StoreError> {
    let status: String = row.try_get("status")?;
    let status = BatchStatus::parse(&status)
        .ok_or_else(|| StoreError::Mapping(format!("unknown batch status: {status}")))?;

    Ok(BatchJob {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        total_candidates: row.try_get("total_candidates")?,
        completed_calls: row.try_get("completed_calls")?,
        failed_calls: row.try_get("failed_calls")?,
        status,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
    })
}

#[instrument(skip(pool, batch), fields(batch_id = %batch.id))]
pub async fn create_batch_job(pool: &PgPool, batch: &BatchJob) -> Result<(), StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "INSERT INTO outreach.batch_jobs (
                id, campaign_id, total_candidates, completed_calls, failed_calls, status,
                started_at, ended_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .await?;
    timed(
        "create_batch_job",
        client.execute(
            &stmt,
            &[
                &batch.id,
                &batch.campaign_id,
                &batch.total_candidates,
                &batch.completed_calls,
                &batch.failed_calls,
                &batch.status.as_str(),
                &batch.started_at,
                &batch.ended_at,
            ],
        ),
    )
    .await
    .map_err(|e| conflict_or_pg(e, format!("batch {}", batch.id)))?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_batch_job(pool: &PgPool, batch_id: &str) -> Result<Option<BatchJob>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {BATCH_COLUMNS} FROM outreach.batch_jobs WHERE id = $1"
        ))
        .await?;
    let row = timed("get_batch_job", client.query_opt(&stmt, &[&batch_id])).await?;
    row.as_ref().map(batch_from_row).transpose()
}

/// Increments the batch counters in place so concurrent writers never lose
/// an update.
#[instrument(skip(pool))]
pub async fn record_batch_progress(
    pool: &PgPool,
    batch_id: &str,
    completed_delta: i32,
    failed_delta: i32,
) -> Result<(), StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.batch_jobs SET
                completed_calls = completed_calls + $2,
                failed_calls = failed_calls + $3
            WHERE id = $1",
        )
        .await?;
    let rows = timed(
        "record_batch_progress",
        client.execute(&stmt, &[&batch_id, &completed_delta, &failed_delta]),
    )
    .await?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!("batch {batch_id}")));
    }
    Ok(())
}

#[instrument(skip(pool))]
pub async fn close_batch_job(
    pool: &PgPool,
    batch_id: &str,
    status: BatchStatus,
    ended_at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.batch_jobs SET status = $2, ended_at = $3
             WHERE id = $1 AND status = 'in_progress'",
        )
        .await?;
    let rows = timed(
        "close_batch_job",
        client.execute(&stmt, &[&batch_id, &status.as_str(), &ended_at]),
    )
    .await?;
    Ok(rows > 0)
}

#[instrument(skip(pool))]
pub async fn list_active_batches(
    pool: &PgPool,
    campaign_id: &str,
) -> Result<Vec<BatchJob>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {BATCH_COLUMNS} FROM outreach.batch_jobs
             WHERE campaign_id = $1 AND status = 'in_progress'
             ORDER BY started_at, id"
        ))
        .await?;
    let rows = timed("list_active_batches", client.query(&stmt, &[&campaign_id])).await?;
    rows.iter().map(batch_from_row).collect()
}

#[instrument(skip(pool))]
pub async fn list_stale_batches(
    pool: &PgPool,
    started_before: DateTime<Utc>,
) -> Result<Vec<BatchJob>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {BATCH_COLUMNS} FROM outreach.batch_jobs
             WHERE status = 'in_progress' AND started_at < $1
             ORDER BY started_at, id"
        ))
        .await?;
    let rows = timed("list_stale_batches", client.query(&stmt, &[&started_before])).await?;
    rows.iter().map(batch_from_row).collect()
}
