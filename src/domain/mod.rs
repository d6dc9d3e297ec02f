pub mod error;
pub mod principal;
pub mod row;
pub mod table_format;
pub mod template;
