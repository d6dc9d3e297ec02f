use sqlx::sqlite::SqlitePool;

use crate::domain::error::Result;
use crate::infrastructure::config::DatabaseConfig;

use super::connection::{connect_in_memory, connect_pool, init_exchange_db};

mod entities;
mod rows;
mod templates;

/// Template store and row store over one SQLite pool. Both live on the same
/// struct so template deletion can cascade inside a single transaction.
pub struct ExchangeRepository {
    pool: SqlitePool,
}

impl ExchangeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file and apply the schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = connect_pool(config).await?;
        init_exchange_db(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = connect_in_memory().await?;
        init_exchange_db(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
