use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tokio_postgres::types::Json;
use tracing::instrument;

use crate::db::PgPool;
use crate::db::util::timed;
use crate::models::{CallAnalysis, CallObjectives, CandidateContactUpdate, ObjectiveMap};
use crate::normalize::{normalize_phone, sql_normalized_phone};
use crate::store::{ActivitySummary, AnalysisWrite, StoreError, UpsertStatus};

const ANALYSIS_COLUMNS: &str = "a.provider_call_id, a.campaign_candidate_id, \
     a.available_to_work, a.interested, a.knows_referee, a.custom_responses, \
     a.sentiment_score, a.summary, a.transcript_url, a.recording_url, a.key_points, \
     a.next_step, a.call_successful, a.in_voicemail, a.analyzed_at";

fn analysis_from_row(row: &Row) -> Result<CallAnalysis, StoreError> {
    let Json(custom): Json<ObjectiveMap> = row.try_get("custom_responses")?;
    let Json(key_points): Json<Vec<String>> = row.try_get("key_points")?;

    Ok(CallAnalysis {
        provider_call_id: row.try_get("provider_call_id")?,
        campaign_candidate_id: row.try_get("campaign_candidate_id")?,
        objectives: CallObjectives {
            available_to_work: row.try_get("available_to_work")?,
            interested: row.try_get("interested")?,
            knows_referee: row.try_get("knows_referee")?,
            custom,
        },
        sentiment_score: row.try_get("sentiment_score")?,
        summary: row.try_get("summary")?,
        transcript_url: row.try_get("transcript_url")?,
        recording_url: row.try_get("recording_url")?,
        key_points,
        next_step: row.try_get("next_step")?,
        call_successful: row.try_get("call_successful")?,
        in_voicemail: row.try_get("in_voicemail")?,
        analyzed_at: row.try_get("analyzed_at")?,
    })
}

/// Upserts the analysis and updates the owning candidate in one transaction.
///
/// The candidate update is field-scoped: unknown objectives keep whatever
/// value the row already has, and custom objectives are merged key by key.
#[instrument(
    skip(pool, analysis, contact),
    fields(provider_call_id = %analysis.provider_call_id)
)]
pub async fn record_call_analysis(
    pool: &PgPool,
    analysis: &CallAnalysis,
    contact: &CandidateContactUpdate,
) -> Result<AnalysisWrite, StoreError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let upsert = tx
        .prepare_cached(
            "INSERT INTO outreach.call_analyses (
                provider_call_id, campaign_candidate_id, available_to_work, interested,
                knows_referee, custom_responses, sentiment_score, summary, transcript_url,
                recording_url, key_points, next_step, call_successful, in_voicemail,
                analyzed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (provider_call_id) DO UPDATE SET
                campaign_candidate_id = EXCLUDED.campaign_candidate_id,
                available_to_work = EXCLUDED.available_to_work,
                interested = EXCLUDED.interested,
                knows_referee = EXCLUDED.knows_referee,
                custom_responses = EXCLUDED.custom_responses,
                sentiment_score = EXCLUDED.sentiment_score,
                summary = EXCLUDED.summary,
                transcript_url = EXCLUDED.transcript_url,
                recording_url = EXCLUDED.recording_url,
                key_points = EXCLUDED.key_points,
                next_step = EXCLUDED.next_step,
                call_successful = EXCLUDED.call_successful,
                in_voicemail = EXCLUDED.in_voicemail,
                analyzed_at = EXCLUDED.analyzed_at,
                updated_at = NOW()
            RETURNING xmax = 0 AS inserted",
        )
        .await?;

    let objectives = &analysis.objectives;
    let row = timed(
        "upsert_call_analysis",
        tx.query_one(
            &upsert,
            &[
                &analysis.provider_call_id,
                &analysis.campaign_candidate_id,
                &objectives.available_to_work,
                &objectives.interested,
                &objectives.knows_referee,
                &Json(&objectives.custom),
                &analysis.sentiment_score,
                &analysis.summary,
                &analysis.transcript_url,
                &analysis.recording_url,
                &Json(&analysis.key_points),
                &analysis.next_step,
                &analysis.call_successful,
                &analysis.in_voicemail,
                &analysis.analyzed_at,
            ],
        ),
    )
    .await?;
    let inserted: bool = row.try_get("inserted")?;

    timed(
        "complete_analyzed_call",
        tx.execute(
            "UPDATE outreach.call_records SET status = 'completed', updated_at = NOW()
             WHERE provider_call_id = $1 AND status <> 'completed'",
            &[&analysis.provider_call_id],
        ),
    )
    .await?;

    let update = &contact.objectives;
    let updated = timed(
        "apply_candidate_contact",
        tx.execute(
            "UPDATE outreach.campaign_candidates SET
                available_to_work = COALESCE($3, available_to_work),
                interested = COALESCE($4, interested),
                knows_referee = COALESCE($5, knows_referee),
                custom_objectives = custom_objectives || $6::jsonb,
                last_contact = $7,
                call_status = $8
            WHERE id = $1 AND campaign_id = $2
              AND (last_contact IS NULL OR last_contact <= $7)",
            &[
                &contact.candidate_id,
                &contact.campaign_id,
                &update.available_to_work,
                &update.interested,
                &update.knows_referee,
                &Json(&update.custom),
                &contact.last_contact,
                &contact.call_status.as_str(),
            ],
        ),
    )
    .await?;

    tx.commit().await?;

    Ok(AnalysisWrite {
        analysis: if inserted {
            UpsertStatus::Created
        } else {
            UpsertStatus::Updated
        },
        candidate_updated: updated > 0,
    })
}

#[instrument(skip(pool))]
pub async fn get_call_analysis(
    pool: &PgPool,
    provider_call_id: &str,
) -> Result<Option<CallAnalysis>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM outreach.call_analyses a
             WHERE a.provider_call_id = $1"
        ))
        .await?;
    let row = timed("get_call_analysis", client.query_opt(&stmt, &[&provider_call_id])).await?;
    row.as_ref().map(analysis_from_row).transpose()
}

#[instrument(skip(pool, phone))]
pub async fn latest_analysis_for_phone(
    pool: &PgPool,
    phone: &str,
) -> Result<Option<CallAnalysis>, StoreError> {
    let phone = normalize_phone(phone);
    if phone.is_empty() {
        return Ok(None);
    }

    let normalized = sql_normalized_phone("c.phone");
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {ANALYSIS_COLUMNS}
             FROM outreach.call_analyses a
             JOIN outreach.campaign_candidates c ON c.id = a.campaign_candidate_id
             WHERE {normalized} = $1
             ORDER BY a.analyzed_at DESC
             LIMIT 1"
        ))
        .await?;
    let row = timed("latest_analysis_for_phone", client.query_opt(&stmt, &[&phone])).await?;
    row.as_ref().map(analysis_from_row).transpose()
}

#[instrument(skip(pool, phone))]
pub async fn call_activity_since(
    pool: &PgPool,
    phone: &str,
    since: Option<DateTime<Utc>>,
) -> Result<ActivitySummary, StoreError> {
    let phone = normalize_phone(phone);
    if phone.is_empty() {
        return Ok(ActivitySummary::default());
    }

    let normalized = sql_normalized_phone("phone");
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "WITH owners AS (
                SELECT id FROM outreach.campaign_candidates
                WHERE {normalized} = $1
            )
            SELECT
                (SELECT COUNT(*) FROM outreach.call_records r
                    WHERE r.campaign_candidate_id IN (SELECT id FROM owners)
                      AND ($2::timestamptz IS NULL OR r.created_at > $2)) AS calls,
                (SELECT COUNT(*) FROM outreach.call_analyses a
                    WHERE a.campaign_candidate_id IN (SELECT id FROM owners)
                      AND ($2::timestamptz IS NULL OR a.analyzed_at > $2)) AS analyses,
                (SELECT a.summary FROM outreach.call_analyses a
                    WHERE a.campaign_candidate_id IN (SELECT id FROM owners)
                      AND ($2::timestamptz IS NULL OR a.analyzed_at > $2)
                    ORDER BY a.analyzed_at DESC
                    LIMIT 1) AS latest_snippet"
        ))
        .await?;
    let row = timed("call_activity_since", client.query_one(&stmt, &[&phone, &since])).await?;

    Ok(ActivitySummary {
        calls: row.try_get("calls")?,
        analyses: row.try_get("analyses")?,
        latest_snippet: row.try_get("latest_snippet")?,
    })
}
