use std::future::Future;
use std::sync::OnceLock;
use std::time::Instant;

use tokio_postgres::error::SqlState;
use tracing::warn;

use crate::store::StoreError;

fn slow_query_threshold_ms() -> Option<u64> {
    static CACHE: OnceLock<Option<u64>> = OnceLock::new();

    *CACHE.get_or_init(|| parse_threshold(std::env::var("OUTREACH_DB_LOG_MIN_DURATION_MS").ok()))
}

fn parse_threshold(raw: Option<String>) -> Option<u64> {
    raw.and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(|v| v.max(0) as u64)
        .filter(|v| *v > 0)
}

/// Awaits a query future and logs it when it ran longer than
/// `OUTREACH_DB_LOG_MIN_DURATION_MS`.
pub async fn timed<F, T>(label: &'static str, query: F) -> T
where
    F: Future<Output = T>,
{
    let started = Instant::now();
    let result = query.await;
    if let Some(threshold_ms) = slow_query_threshold_ms() {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms >= threshold_ms {
            warn!(query = label, elapsed_ms, "slow_query_detected");
        }
    }
    result
}

/// Maps unique-key violations to `Conflict`; everything else stays a
/// postgres error.
pub fn conflict_or_pg(err: tokio_postgres::Error, what: String) -> StoreError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StoreError::Conflict(what)
    } else {
        StoreError::Postgres(err)
    }
}
