use tracing::info;
use validator::Validate;

use crate::domain::error::{AppError, Result};
use crate::domain::template::{ColumnSpec, Template, TemplateInput, TemplatePatch};

use super::entities::{now_timestamp, TemplateEntity};
use super::rows::delete_rows_in;
use super::ExchangeRepository;

const TEMPLATE_COLUMNS: &str =
    "id, name, columns_json, created_by, is_public, created_at, updated_at";

impl ExchangeRepository {
    pub async fn create_template(
        &self,
        input: &TemplateInput,
        created_by: Option<&str>,
    ) -> Result<Template> {
        input.validate()?;

        let columns_json = encode_columns(&input.columns)?;
        let now = now_timestamp();

        let result = sqlx::query_as::<_, TemplateEntity>(
            "INSERT INTO templates (name, columns_json, created_by, is_public, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(input.name.trim())
        .bind(columns_json)
        .bind(created_by)
        .bind(input.is_public)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create template: {}", e)))?;

        Ok(result.into())
    }

    pub async fn get_template(&self, id: i64) -> Result<Template> {
        let sql = format!("SELECT {} FROM templates WHERE id = ?", TEMPLATE_COLUMNS);
        let template = sqlx::query_as::<_, TemplateEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch template: {}", e)))?;

        match template {
            Some(template) => Ok(template.into()),
            None => Err(AppError::NotFound(format!("Template not found: {}", id))),
        }
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let sql = format!(
            "SELECT {} FROM templates ORDER BY created_at DESC, id DESC",
            TEMPLATE_COLUMNS
        );
        let templates = sqlx::query_as::<_, TemplateEntity>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list templates: {}", e)))?;

        Ok(templates.into_iter().map(|t| t.into()).collect())
    }

    /// Replace only the fields present in `patch`.
    pub async fn update_template(&self, id: i64, patch: &TemplatePatch) -> Result<Template> {
        patch.validate()?;

        let columns_json = patch.columns.as_deref().map(encode_columns).transpose()?;
        let name = patch.name.as_deref().map(str::trim);

        let updated = sqlx::query_as::<_, TemplateEntity>(
            "UPDATE templates
             SET name = COALESCE(?, name),
                 columns_json = COALESCE(?, columns_json),
                 is_public = COALESCE(?, is_public),
                 updated_at = ?
             WHERE id = ?
             RETURNING *",
        )
        .bind(name)
        .bind(columns_json)
        .bind(patch.is_public)
        .bind(now_timestamp())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update template: {}", e)))?;

        match updated {
            Some(template) => Ok(template.into()),
            None => Err(AppError::NotFound(format!("Template not found: {}", id))),
        }
    }

    /// Delete the template's rows and then the template in one transaction.
    /// Returns how many rows went with it. Dropping `tx` on any error rolls the
    /// row deletion back.
    pub async fn delete_template(&self, id: i64) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let removed_rows = delete_rows_in(&mut tx, id).await?;

        let result = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete template: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Template not found: {}", id)));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;

        info!(template_id = id, removed_rows, "Template deleted");
        Ok(removed_rows)
    }
}

fn encode_columns(columns: &[ColumnSpec]) -> Result<String> {
    serde_json::to_string(columns)
        .map_err(|e| AppError::Internal(format!("Failed to serialize columns: {}", e)))
}
