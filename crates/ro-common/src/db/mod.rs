pub mod batch_jobs;
pub mod call_analyses;
pub mod call_records;
pub mod campaigns;
pub mod migrations;
pub mod pipeline;
pub mod pool;
pub mod store;
pub mod util;

pub use migrations::{MigrationError, run_migrations};
pub use pool::{DEFAULT_POOL_SIZE, DbPoolError, PgPool, create_pool_from_url, create_pool_with_size};
pub use store::PgOutreachStore;
