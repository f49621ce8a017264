use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;
use tracing::{info, instrument};

use crate::db::PgPool;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to run migration: {0}")]
    Postgres(#[from] PgError),
}

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        description: "campaigns, call records, analyses and batch jobs",
        sql: r#"
CREATE TABLE IF NOT EXISTS outreach.jobs (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    hired_count INTEGER NOT NULL DEFAULT 0 CHECK (hired_count >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS outreach.campaigns (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    job_id TEXT REFERENCES outreach.jobs(id) ON DELETE SET NULL,
    channels TEXT[] NOT NULL DEFAULT ARRAY['voice'],
    status TEXT NOT NULL DEFAULT 'draft'
        CHECK (status IN ('draft', 'active', 'paused', 'completed', 'stopped')),
    candidate_count INTEGER NOT NULL DEFAULT 0,
    response_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
    agent_id TEXT,
    agent_prompt TEXT,
    voice_id TEXT,
    from_number TEXT,
    objective_targets JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS outreach.campaign_candidates (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES outreach.campaigns(id) ON DELETE CASCADE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    phone TEXT,
    email TEXT,
    call_status TEXT NOT NULL DEFAULT 'not_called'
        CHECK (call_status IN ('not_called', 'contacted')),
    available_to_work BOOLEAN,
    interested BOOLEAN,
    knows_referee BOOLEAN,
    custom_objectives JSONB NOT NULL DEFAULT '{}'::jsonb,
    notes JSONB NOT NULL DEFAULT '[]'::jsonb,
    last_contact TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS outreach.batch_jobs (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES outreach.campaigns(id) ON DELETE CASCADE,
    total_candidates INTEGER NOT NULL CHECK (total_candidates >= 0),
    completed_calls INTEGER NOT NULL DEFAULT 0,
    failed_calls INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'in_progress'
        CHECK (status IN ('in_progress', 'completed', 'cancelled')),
    started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    ended_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS outreach.call_records (
    id TEXT PRIMARY KEY,
    campaign_candidate_id TEXT NOT NULL
        REFERENCES outreach.campaign_candidates(id) ON DELETE CASCADE,
    batch_id TEXT REFERENCES outreach.batch_jobs(id) ON DELETE SET NULL,
    provider_call_id TEXT UNIQUE,
    from_number TEXT,
    to_number TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'in_progress', 'completed', 'failed')),
    failure_reason TEXT,
    duration_seconds INTEGER,
    started_at TIMESTAMPTZ,
    ended_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS outreach.call_analyses (
    provider_call_id TEXT PRIMARY KEY,
    campaign_candidate_id TEXT NOT NULL
        REFERENCES outreach.campaign_candidates(id) ON DELETE CASCADE,
    available_to_work BOOLEAN,
    interested BOOLEAN,
    knows_referee BOOLEAN,
    custom_responses JSONB NOT NULL DEFAULT '{}'::jsonb,
    sentiment_score DOUBLE PRECISION
        CHECK (sentiment_score IS NULL OR (sentiment_score >= 0.0 AND sentiment_score <= 1.0)),
    summary TEXT,
    transcript_url TEXT,
    recording_url TEXT,
    key_points JSONB NOT NULL DEFAULT '[]'::jsonb,
    next_step TEXT,
    call_successful BOOLEAN,
    in_voicemail BOOLEAN NOT NULL DEFAULT FALSE,
    analyzed_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#,
    },
    Migration {
        id: 2,
        description: "pipeline candidates and kanban columns",
        sql: r#"
CREATE TABLE IF NOT EXISTS outreach.kanban_columns (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES outreach.jobs(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    status_key TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    is_post_hire BOOLEAN NOT NULL DEFAULT FALSE,
    UNIQUE (job_id, status_key)
);

CREATE TABLE IF NOT EXISTS outreach.pipeline_candidates (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES outreach.jobs(id) ON DELETE CASCADE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    phone TEXT,
    email TEXT,
    status TEXT NOT NULL,
    manual_override BOOLEAN NOT NULL DEFAULT FALSE,
    notes JSONB NOT NULL DEFAULT '[]'::jsonb,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#,
    },
    Migration {
        id: 3,
        description: "lookup indexes for dispatch, webhooks and reconciliation",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_campaign_candidates_campaign
    ON outreach.campaign_candidates(campaign_id, id);
CREATE INDEX IF NOT EXISTS idx_campaign_candidates_phone
    ON outreach.campaign_candidates((regexp_replace(phone, '[^0-9+]', '', 'g')));
CREATE INDEX IF NOT EXISTS idx_call_records_batch_status
    ON outreach.call_records(batch_id, status);
CREATE INDEX IF NOT EXISTS idx_call_analyses_candidate
    ON outreach.call_analyses(campaign_candidate_id, analyzed_at DESC);
CREATE INDEX IF NOT EXISTS idx_batch_jobs_in_progress
    ON outreach.batch_jobs(started_at)
    WHERE status = 'in_progress';
CREATE INDEX IF NOT EXISTS idx_pipeline_candidates_job
    ON outreach.pipeline_candidates(job_id, id);
"#,
    },
    Migration {
        id: 4,
        description: "phone index keeps only a leading plus",
        sql: r#"
DROP INDEX IF EXISTS outreach.idx_campaign_candidates_phone;
CREATE INDEX IF NOT EXISTS idx_campaign_candidates_phone_canonical
    ON outreach.campaign_candidates((NULLIF(CASE WHEN ltrim(phone, E' \t\r\n') LIKE '+%' THEN '+' ELSE '' END || regexp_replace(phone, '[^0-9]', '', 'g'), '+')));
"#,
    },
];

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE SCHEMA IF NOT EXISTS outreach;
             CREATE TABLE IF NOT EXISTS outreach.schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM outreach.schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO outreach.schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}
