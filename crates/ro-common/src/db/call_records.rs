use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tracing::instrument;

use crate::db::PgPool;
use crate::db::util::{conflict_or_pg, timed};
use crate::models::{CallEnded, CallRecord, CallRecordStatus};
use crate::store::StoreError;

const RECORD_COLUMNS: &str = "id, campaign_candidate_id, batch_id, provider_call_id, \
     from_number, to_number, status, failure_reason, duration_seconds, started_at, ended_at, \
     created_at, updated_at";

fn record_from_row(row: &Row) -> Result<CallRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status = CallRecordStatus::parse(&status)
        .ok_or_else(|| StoreError::Mapping(format!("unknown call record status: {status}")))?;

    Ok(CallRecord {
        id: row.try_get("id")?,
        campaign_candidate_id: row.try_get("campaign_candidate_id")?,
        batch_id: row.try_get("batch_id")?,
        provider_call_id: row.try_get("provider_call_id")?,
        from_number: row.try_get("from_number")?,
        to_number: row.try_get("to_number")?,
        status,
        failure_reason: row.try_get("failure_reason")?,
        duration_seconds: row.try_get("duration_seconds")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[instrument(skip(pool, record), fields(record_id = %record.id))]
pub async fn insert_call_record(pool: &PgPool, record: &CallRecord) -> Result<(), StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "INSERT INTO outreach.call_records (
                id, campaign_candidate_id, batch_id, provider_call_id, from_number, to_number,
                status, failure_reason, duration_seconds, started_at, ended_at, created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .await?;

    timed(
        "insert_call_record",
        client.execute(
            &stmt,
            &[
                &record.id,
                &record.campaign_candidate_id,
                &record.batch_id,
                &record.provider_call_id,
                &record.from_number,
                &record.to_number,
                &record.status.as_str(),
                &record.failure_reason,
                &record.duration_seconds,
                &record.started_at,
                &record.ended_at,
                &record.created_at,
                &record.updated_at,
            ],
        ),
    )
    .await
    .map_err(|e| conflict_or_pg(e, format!("call record {}", record.id)))?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn mark_call_started(
    pool: &PgPool,
    provider_call_id: &str,
    started_at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.call_records SET
                status = CASE WHEN status = 'completed' THEN status ELSE 'in_progress' END,
                started_at = COALESCE(started_at, $2),
                updated_at = NOW()
            WHERE provider_call_id = $1",
        )
        .await?;
    let rows = timed(
        "mark_call_started",
        client.execute(&stmt, &[&provider_call_id, &started_at]),
    )
    .await?;
    Ok(rows > 0)
}

#[instrument(skip(pool, ended))]
pub async fn mark_call_ended(
    pool: &PgPool,
    provider_call_id: &str,
    ended: &CallEnded,
) -> Result<bool, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.call_records SET
                status = 'completed',
                started_at = COALESCE(started_at, $2),
                ended_at = $3,
                duration_seconds = COALESCE(
                    $4::int4,
                    CASE WHEN COALESCE(started_at, $2) IS NULL THEN NULL
                        ELSE GREATEST(
                            EXTRACT(EPOCH FROM ($3 - COALESCE(started_at, $2)))::int4,
                            0
                        )
                    END
                ),
                updated_at = NOW()
            WHERE provider_call_id = $1",
        )
        .await?;
    let rows = timed(
        "mark_call_ended",
        client.execute(
            &stmt,
            &[
                &provider_call_id,
                &ended.started_at,
                &ended.ended_at,
                &ended.duration_seconds,
            ],
        ),
    )
    .await?;
    Ok(rows > 0)
}

#[instrument(skip(pool))]
pub async fn fail_pending_calls(
    pool: &PgPool,
    batch_id: &str,
    reason: &str,
) -> Result<u64, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.call_records SET
                status = 'failed',
                failure_reason = $2,
                updated_at = NOW()
            WHERE batch_id = $1 AND status = 'pending'",
        )
        .await?;
    let rows = timed(
        "fail_pending_calls",
        client.execute(&stmt, &[&batch_id, &reason]),
    )
    .await?;
    Ok(rows)
}

#[instrument(skip(pool))]
pub async fn list_batch_calls(pool: &PgPool, batch_id: &str) -> Result<Vec<CallRecord>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM outreach.call_records
             WHERE batch_id = $1 ORDER BY created_at, id"
        ))
        .await?;
    let rows = timed("list_batch_calls", client.query(&stmt, &[&batch_id])).await?;
    rows.iter().map(record_from_row).collect()
}

#[instrument(skip(pool))]
pub async fn get_call_record(
    pool: &PgPool,
    provider_call_id: &str,
) -> Result<Option<CallRecord>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM outreach.call_records WHERE provider_call_id = $1"
        ))
        .await?;
    let row = timed("get_call_record", client.query_opt(&stmt, &[&provider_call_id])).await?;
    row.as_ref().map(record_from_row).transpose()
}
