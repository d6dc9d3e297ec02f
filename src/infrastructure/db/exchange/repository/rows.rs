use sqlx::SqliteConnection;

use crate::domain::error::{AppError, Result};
use crate::domain::row::{FieldMap, Row, RowOrder};

use super::entities::{now_timestamp, RowEntity};
use super::ExchangeRepository;

impl ExchangeRepository {
    pub async fn insert_row(&self, template_id: i64, fields: &FieldMap) -> Result<Row> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        ensure_template_in(&mut tx, template_id).await?;

        let row = sqlx::query_as::<_, RowEntity>(
            "INSERT INTO template_rows (template_id, data_json, created_at) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(template_id)
        .bind(encode_fields(fields)?)
        .bind(now_timestamp())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert row: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(row.into())
    }

    /// Insert a whole import batch in one transaction. Either every row lands or
    /// none does. All rows share one `created_at`.
    pub async fn insert_rows(&self, template_id: i64, rows: &[FieldMap]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        ensure_template_in(&mut tx, template_id).await?;

        let created_at = now_timestamp();
        let mut affected: u64 = 0;
        for fields in rows {
            let res = sqlx::query(
                "INSERT INTO template_rows (template_id, data_json, created_at) VALUES (?, ?, ?)",
            )
            .bind(template_id)
            .bind(encode_fields(fields)?)
            .bind(&created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to insert row: {}", e)))?;
            affected += res.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(affected)
    }

    pub async fn list_rows(&self, template_id: i64, order: RowOrder) -> Result<Vec<Row>> {
        let sql = match order {
            RowOrder::NewestFirst => {
                "SELECT id, template_id, data_json, created_at FROM template_rows
                 WHERE template_id = ? ORDER BY id DESC"
            }
            RowOrder::ImportOrder => {
                "SELECT id, template_id, data_json, created_at FROM template_rows
                 WHERE template_id = ? ORDER BY id ASC"
            }
        };

        let rows = sqlx::query_as::<_, RowEntity>(sql)
            .bind(template_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list rows: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    pub async fn count_rows(&self, template_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM template_rows WHERE template_id = ?")
            .bind(template_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count rows: {}", e)))
    }

    /// Remove every row of a template. Zero matches is not an error.
    pub async fn delete_rows_by_template(&self, template_id: i64) -> Result<u64> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to acquire connection: {}", e)))?;

        delete_rows_in(&mut conn, template_id).await
    }

    pub async fn delete_row(&self, template_id: i64, row_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM template_rows WHERE id = ? AND template_id = ?")
            .bind(row_id)
            .bind(template_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete row: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Row {} not found in template {}",
                row_id, template_id
            )));
        }
        Ok(())
    }
}

/// Row deletion on a caller-supplied connection so template deletion can run it
/// inside its own transaction.
pub(super) async fn delete_rows_in(conn: &mut SqliteConnection, template_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM template_rows WHERE template_id = ?")
        .bind(template_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to delete rows: {}", e)))?;

    Ok(result.rows_affected())
}

async fn ensure_template_in(conn: &mut SqliteConnection, template_id: i64) -> Result<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM templates WHERE id = ?")
        .bind(template_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to check template: {}", e)))?;

    match exists {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!("Template not found: {}", template_id))),
    }
}

fn encode_fields(fields: &FieldMap) -> Result<String> {
    serde_json::to_string(fields)
        .map_err(|e| AppError::Internal(format!("Failed to serialize row: {}", e)))
}
