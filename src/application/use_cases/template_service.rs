use std::sync::Arc;

use tracing::info;

use crate::domain::error::Result;
use crate::domain::principal::Principal;
use crate::domain::row::{Row, RowOrder};
use crate::domain::template::{Template, TemplateInput, TemplatePatch};
use crate::infrastructure::db::exchange::repository::ExchangeRepository;

/// Template CRUD plus row browsing. Rows themselves are only ever created by
/// import.
pub struct TemplateUseCase {
    repository: Arc<ExchangeRepository>,
}

impl TemplateUseCase {
    pub fn new(repository: Arc<ExchangeRepository>) -> Self {
        Self { repository }
    }

    pub async fn create_template(
        &self,
        input: TemplateInput,
        principal: &Principal,
    ) -> Result<Template> {
        let template = self
            .repository
            .create_template(&input, Some(principal.id.as_str()))
            .await?;
        info!(
            template_id = template.id,
            columns = template.columns.len(),
            created_by = %principal.id,
            "Template created"
        );
        Ok(template)
    }

    pub async fn get_template(&self, id: i64) -> Result<Template> {
        self.repository.get_template(id).await
    }

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        self.repository.list_templates().await
    }

    pub async fn update_template(&self, id: i64, patch: TemplatePatch) -> Result<Template> {
        let template = self.repository.update_template(id, &patch).await?;
        info!(template_id = id, "Template updated");
        Ok(template)
    }

    /// Returns the number of rows removed along with the template.
    pub async fn delete_template(&self, id: i64) -> Result<u64> {
        self.repository.delete_template(id).await
    }

    /// Most recent first. NotFound when the template does not exist, so an empty
    /// list always means an empty template.
    pub async fn list_rows(&self, template_id: i64) -> Result<Vec<Row>> {
        self.repository.get_template(template_id).await?;
        self.repository
            .list_rows(template_id, RowOrder::NewestFirst)
            .await
    }

    pub async fn delete_row(&self, template_id: i64, row_id: i64) -> Result<()> {
        self.repository.delete_row(template_id, row_id).await?;
        info!(template_id, row_id, "Row deleted");
        Ok(())
    }
}
