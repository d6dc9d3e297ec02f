pub mod table_export;
pub mod table_import;
pub mod template_service;
