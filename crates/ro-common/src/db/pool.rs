use deadpool_postgres::{
    Config, CreatePoolError, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use std::str::FromStr;
use thiserror::Error;
use tokio_postgres::NoTls;

pub type PgPool = Pool;

/// Default number of pooled connections. Webhook bursts and a running batch
/// share the pool, so keep it above the dispatcher's chunk size.
pub const DEFAULT_POOL_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum DbPoolError {
    #[error("invalid database url: {0}")]
    InvalidConfig(String),
    #[error("failed to create database pool: {0}")]
    PoolCreation(#[from] CreatePoolError),
}

pub fn create_pool_from_url(db_url: &str) -> Result<PgPool, DbPoolError> {
    create_pool_with_size(db_url, DEFAULT_POOL_SIZE)
}

pub fn create_pool_with_size(db_url: &str, max_size: usize) -> Result<PgPool, DbPoolError> {
    let _ = tokio_postgres::Config::from_str(db_url)
        .map_err(|e| DbPoolError::InvalidConfig(e.to_string()))?;
    if max_size == 0 {
        return Err(DbPoolError::InvalidConfig(
            "pool size must be positive".into(),
        ));
    }

    let mut cfg = Config::new();
    cfg.url = Some(db_url.to_string());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(max_size));

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(DbPoolError::PoolCreation)
}
