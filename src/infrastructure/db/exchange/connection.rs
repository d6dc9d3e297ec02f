use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::DatabaseConfig;

const EXCHANGE_SCHEMA: &str = include_str!("../../../../resources/schema.sql");

const EXCHANGE_SCHEMA_VERSION: i32 = 1;

pub async fn connect_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let db_url = db_path_to_url(&config.path)?;
    let options = SqliteConnectOptions::from_str(&db_url)
        .map_err(|e| AppError::DatabaseError(format!("Failed to parse database URL: {}", e)))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to connect to database: {}", e)))
}

/// Single-connection in-memory pool. Every connection to `:memory:` is its own
/// database, so the pool must never open a second one or drop the first.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| AppError::DatabaseError(format!("Failed to parse database URL: {}", e)))?
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to open in-memory database: {}", e)))
}

/// Apply the schema additively and stamp `PRAGMA user_version`.
pub async fn init_exchange_db(pool: &SqlitePool) -> Result<()> {
    let current_version = read_user_version(pool).await?;
    if current_version > EXCHANGE_SCHEMA_VERSION {
        return Err(AppError::DatabaseError(format!(
            "Database schema too new: db user_version={} > app supported_version={}",
            current_version, EXCHANGE_SCHEMA_VERSION
        )));
    }

    for stmt in split_sql_statements(EXCHANGE_SCHEMA) {
        sqlx::query(&stmt)
            .execute(pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to apply schema statement: {}", e)))?;
    }

    let sql = format!("PRAGMA user_version = {}", EXCHANGE_SCHEMA_VERSION);
    sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to set user_version: {}", e)))?;

    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Database health check failed: {}", e)))?;

    Ok(())
}

async fn read_user_version(pool: &SqlitePool) -> Result<i32> {
    sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to read PRAGMA user_version: {}", e)))
}

fn db_path_to_url(db_path: &Path) -> Result<String> {
    let db_path_str = db_path.to_str().ok_or_else(|| {
        AppError::DatabaseError("Database path is not valid UTF-8".to_string())
    })?;
    Ok(format!("sqlite://{}", db_path_str.replace('\\', "/")))
}

/// Split on `;`, dropping `--` comment lines and empty statements.
fn split_sql_statements(schema: &str) -> Vec<String> {
    let without_comments: String = schema
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(str::to_string)
        .collect()
}
