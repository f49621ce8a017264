use chrono::Duration;
use clap::Parser;
use dotenvy::dotenv;
use ro_common::db::{PgOutreachStore, create_pool_from_url};
use ro_common::dispatch::recover_stale_batches;
use ro_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use ro_common::store::{OutreachStore, StoreError};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "ro-batch-recovery",
    about = "Cancel call batches left in progress by a dispatcher that went away"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    db_url: String,

    /// Batches started longer ago than this are considered abandoned
    #[arg(long, env = "OUTREACH_STALE_BATCH_MINUTES", default_value_t = 30)]
    max_age_minutes: i64,
}

fn max_age(minutes: i64) -> Result<Duration, String> {
    if minutes <= 0 {
        return Err(format!("max age must be positive, got {minutes} minutes"));
    }
    Ok(Duration::minutes(minutes))
}

/// Closes every abandoned batch and fails its records still `pending`.
/// No dispatch loop runs in this process, so every stale batch is abandoned.
async fn recover(
    store: &dyn OutreachStore,
    older_than: Duration,
) -> Result<Vec<String>, StoreError> {
    let recovered = recover_stale_batches(store, older_than, |_| false).await?;
    for batch_id in &recovered {
        info!(batch_id = %batch_id, "batch recovered");
    }
    Ok(recovered)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    let args = Cli::parse();
    let older_than = max_age(args.max_age_minutes)?;

    let pool = create_pool_from_url(&args.db_url)?;
    let store = PgOutreachStore::new(pool);

    let recovered = recover(&store, older_than).await?;
    info!(
        recovered = recovered.len(),
        max_age_minutes = args.max_age_minutes,
        "stale batch recovery finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("ro-batch-recovery failed: {err}");
        std::process::exit(1);
    }
}
