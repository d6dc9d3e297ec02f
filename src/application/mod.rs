pub mod use_cases;

pub use use_cases::table_export::{ExportArtifact, TableExportUseCase};
pub use use_cases::table_import::TableImportUseCase;
pub use use_cases::template_service::TemplateUseCase;
