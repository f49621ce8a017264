use tokio_postgres::Row;
use tokio_postgres::types::Json;
use tracing::instrument;

use crate::db::PgPool;
use crate::db::util::timed;
use crate::models::{
    Campaign, CampaignCandidate, CampaignStatus, CallStatus, Channel, ObjectiveMap,
    ObjectiveTarget,
};
use crate::store::StoreError;

const CAMPAIGN_COLUMNS: &str = "id, name, job_id, channels, status, candidate_count, \
     response_rate, agent_id, agent_prompt, voice_id, from_number, objective_targets, \
     created_at, updated_at";

const CANDIDATE_COLUMNS: &str = "id, campaign_id, first_name, last_name, phone, email, \
     call_status, available_to_work, interested, knows_referee, custom_objectives, notes, \
     last_contact";

fn campaign_from_row(row: &Row) -> Result<Campaign, StoreError> {
    let status: String = row.try_get("status")?;
    let status = CampaignStatus::parse(&status)
        .ok_or_else(|| StoreError::Mapping(format!("unknown campaign status: {status}")))?;
    let channels: Vec<String> = row.try_get("channels")?;
    let channels = channels
        .iter()
        .map(|c| {
            Channel::parse(c).ok_or_else(|| StoreError::Mapping(format!("unknown channel: {c}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let Json(objective_targets): Json<Vec<ObjectiveTarget>> = row.try_get("objective_targets")?;

    Ok(Campaign {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        job_id: row.try_get("job_id")?,
        channels,
        status,
        candidate_count: row.try_get("candidate_count")?,
        response_rate: row.try_get("response_rate")?,
        agent_id: row.try_get("agent_id")?,
        agent_prompt: row.try_get("agent_prompt")?,
        voice_id: row.try_get("voice_id")?,
        from_number: row.try_get("from_number")?,
        objective_targets,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn candidate_from_row(row: &Row) -> Result<CampaignCandidate, StoreError> {
    let call_status: String = row.try_get("call_status")?;
    let call_status = CallStatus::parse(&call_status)
        .ok_or_else(|| StoreError::Mapping(format!("unknown call status: {call_status}")))?;
    let Json(custom_objectives): Json<ObjectiveMap> = row.try_get("custom_objectives")?;
    let Json(notes): Json<Vec<String>> = row.try_get("notes")?;

    Ok(CampaignCandidate {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        call_status,
        available_to_work: row.try_get("available_to_work")?,
        interested: row.try_get("interested")?,
        knows_referee: row.try_get("knows_referee")?,
        custom_objectives,
        notes,
        last_contact: row.try_get("last_contact")?,
    })
}

#[instrument(skip(pool))]
pub async fn get_campaign(pool: &PgPool, campaign_id: &str) -> Result<Option<Campaign>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM outreach.campaigns WHERE id = $1"
        ))
        .await?;
    let row = timed("get_campaign", client.query_opt(&stmt, &[&campaign_id])).await?;
    row.as_ref().map(campaign_from_row).transpose()
}

/// Compare-and-set: the first stored agent id wins.
#[instrument(skip(pool))]
pub async fn set_campaign_agent(
    pool: &PgPool,
    campaign_id: &str,
    agent_id: &str,
) -> Result<String, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.campaigns SET
                agent_id = COALESCE(agent_id, $2),
                updated_at = NOW()
            WHERE id = $1
            RETURNING agent_id",
        )
        .await?;
    let row = timed(
        "set_campaign_agent",
        client.query_opt(&stmt, &[&campaign_id, &agent_id]),
    )
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("campaign {campaign_id}")))?;
    Ok(row.try_get("agent_id")?)
}

#[instrument(skip(pool))]
pub async fn set_campaign_status(
    pool: &PgPool,
    campaign_id: &str,
    status: CampaignStatus,
) -> Result<(), StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.campaigns SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .await?;
    let rows = timed(
        "set_campaign_status",
        client.execute(&stmt, &[&campaign_id, &status.as_str()]),
    )
    .await?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!("campaign {campaign_id}")));
    }
    Ok(())
}

#[instrument(skip(pool))]
pub async fn refresh_response_rate(pool: &PgPool, campaign_id: &str) -> Result<f64, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            "UPDATE outreach.campaigns c SET
                response_rate = s.rate,
                updated_at = NOW()
            FROM (
                SELECT CASE WHEN COUNT(*) = 0 THEN 0::float8
                    ELSE (COUNT(*) FILTER (WHERE call_status = 'contacted'))::float8
                        / COUNT(*)::float8
                END AS rate
                FROM outreach.campaign_candidates
                WHERE campaign_id = $1
            ) s
            WHERE c.id = $1
            RETURNING c.response_rate",
        )
        .await?;
    let row = timed("refresh_response_rate", client.query_opt(&stmt, &[&campaign_id]))
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("campaign {campaign_id}")))?;
    Ok(row.try_get("response_rate")?)
}

#[instrument(skip(pool))]
pub async fn list_campaign_candidates(
    pool: &PgPool,
    campaign_id: &str,
) -> Result<Vec<CampaignCandidate>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM outreach.campaign_candidates
             WHERE campaign_id = $1 ORDER BY id"
        ))
        .await?;
    let rows = timed("list_campaign_candidates", client.query(&stmt, &[&campaign_id])).await?;
    rows.iter().map(candidate_from_row).collect()
}

#[instrument(skip(pool))]
pub async fn get_campaign_candidate(
    pool: &PgPool,
    candidate_id: &str,
) -> Result<Option<CampaignCandidate>, StoreError> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM outreach.campaign_candidates WHERE id = $1"
        ))
        .await?;
    let row = timed("get_campaign_candidate", client.query_opt(&stmt, &[&candidate_id])).await?;
    row.as_ref().map(candidate_from_row).transpose()
}
