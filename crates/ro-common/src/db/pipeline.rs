use tokio_postgres::Row;
use tokio_postgres::types::Json;
use tracing::instrument;

use crate::db::PgPool;
use crate::db::util::timed;
use crate::models::{KanbanColumn, PipelineCandidate, StatusTransition};
use crate::store::StoreError;

const CANDIDATE_COLUMNS: &str = "id, job_id, first_name, last_name, phone, email, status, \
     manual_override, notes, updated_at";

fn candidate_from_row(row: &Row) -> Result<PipelineCandidate, StoreError> {
    let Json(notes): Json<Vec<String>> = row.try_get("notes")?;
    Ok(PipelineCandidate {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        status: row.try_get("status")?,
        manual_override: row.try_get("manual_override")?,
        notes,
        updated_at: row.try_get("updated_at")?,
    })
}

fn column_from_row(row: &Row) -> Result<KanbanColumn, StoreError> {
    Ok(KanbanColumn {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        title: row.try_get("title")?,
        status_key: row.try_get("status_key")?,
        position: row.try_get("position")?,
        is_post_hire: row.try_get("is_post_hire")?,
    })
}

#[instrument(skip(pool))]
pub async fn list_job_ids(pool: &PgPool) -> Result<Vec<String>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached("SELECT id FROM outreach.jobs ORDER BY id")
        .await?;
    let rows = timed("list_job_ids", client.query(&stmt, &[])).await?;
    rows.iter()
        .map(|row| row.try_get("id").map_err(StoreError::from))
        .collect()
}

#[instrument(skip(pool))]
pub async fn list_pipeline_candidates(
    pool: &PgPool,
    job_id: &str,
) -> Result<Vec<PipelineCandidate>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM outreach.pipeline_candidates
             WHERE job_id = $1 ORDER BY id"
        ))
        .await?;
    let rows = timed("list_pipeline_candidates", client.query(&stmt, &[&job_id])).await?;
    rows.iter().map(candidate_from_row).collect()
}

#[instrument(skip(pool))]
pub async fn get_pipeline_candidate(
    pool: &PgPool,
    candidate_id: &str,
) -> Result<Option<PipelineCandidate>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM outreach.pipeline_candidates WHERE id = $1"
        ))
        .await?;
    let row = timed("get_pipeline_candidate", client.query_opt(&stmt, &[&candidate_id])).await?;
    row.as_ref().map(candidate_from_row).transpose()
}

#[instrument(skip(pool))]
pub async fn list_kanban_columns(
    pool: &PgPool,
    job_id: &str,
) -> Result<Vec<KanbanColumn>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "SELECT id, job_id, title, status_key, position, is_post_hire
             FROM outreach.kanban_columns WHERE job_id = $1 ORDER BY position, id",
        )
        .await?;
    let rows = timed("list_kanban_columns", client.query(&stmt, &[&job_id])).await?;
    rows.iter().map(column_from_row).collect()
}

/// Moves the candidate and adjusts the job's hired counter in one
/// transaction. The move only applies while the candidate still sits in
/// `transition.from`; automated moves also require the override flag to be
/// clear.
#[instrument(skip(pool, transition), fields(candidate_id = %transition.candidate_id))]
pub async fn transition_pipeline_status(
    pool: &PgPool,
    transition: &StatusTransition,
) -> Result<bool, StoreError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let moved = timed(
        "transition_pipeline_status",
        tx.execute(
            "UPDATE outreach.pipeline_candidates SET
                status = $4,
                manual_override = manual_override OR $5,
                updated_at = NOW()
            WHERE id = $1 AND job_id = $2 AND status = $3
              AND ($5 OR manual_override = FALSE)",
            &[
                &transition.candidate_id,
                &transition.job_id,
                &transition.from,
                &transition.to,
                &transition.manual,
            ],
        ),
    )
    .await?;

    if moved == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    if transition.hired_delta != 0 {
        timed(
            "adjust_hired_count",
            tx.execute(
                "UPDATE outreach.jobs SET hired_count = GREATEST(hired_count + $2, 0)
                 WHERE id = $1",
                &[&transition.job_id, &transition.hired_delta],
            ),
        )
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

#[instrument(skip(pool))]
pub async fn set_manual_override(
    pool: &PgPool,
    candidate_id: &str,
    manual_override: bool,
) -> Result<bool, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.pipeline_candidates SET manual_override = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .await?;
    let rows = timed(
        "set_manual_override",
        client.execute(&stmt, &[&candidate_id, &manual_override]),
    )
    .await?;
    Ok(rows > 0)
}

#[instrument(skip(pool, note))]
pub async fn append_pipeline_note(
    pool: &PgPool,
    candidate_id: &str,
    note: &str,
) -> Result<(), StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.pipeline_candidates SET notes = notes || jsonb_build_array($2::text)
             WHERE id = $1",
        )
        .await?;
    let rows = timed(
        "append_pipeline_note",
        client.execute(&stmt, &[&candidate_id, &note]),
    )
    .await?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!(
            "pipeline candidate {candidate_id}"
        )));
    }
    Ok(())
}

#[instrument(skip(pool))]
pub async fn hired_count(pool: &PgPool, job_id: &str) -> Result<i32, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached("SELECT hired_count FROM outreach.jobs WHERE id = $1")
        .await?;
    let row = timed("hired_count", client.query_opt(&stmt, &[&job_id]))
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
    Ok(row.try_get("hired_count")?)
}

/// Repair path for the materialised hired counter.
#[instrument(skip(pool))]
pub async fn recompute_hired_count(pool: &PgPool, job_id: &str) -> Result<i32, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.jobs j SET hired_count = (
                SELECT COUNT(*)::int4
                FROM outreach.pipeline_candidates p
                WHERE p.job_id = j.id
                  AND (
                    p.status = 'hired'
                    OR EXISTS (
                        SELECT 1 FROM outreach.kanban_columns k
                        WHERE k.job_id = j.id
                          AND k.status_key = p.status
                          AND (k.is_post_hire OR k.status_key = 'hired')
                    )
                  )
            )
            WHERE j.id = $1
            RETURNING j.hired_count",
        )
        .await?;
    let row = timed("recompute_hired_count", client.query_opt(&stmt, &[&job_id]))
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
    Ok(row.try_get("hired_count")?)
}
