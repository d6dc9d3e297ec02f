use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::domain::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Xlsx,
    Xls,
    Docx,
    Pdf,
}

impl TableFormat {
    pub const ALL: [TableFormat; 5] = [
        TableFormat::Csv,
        TableFormat::Xlsx,
        TableFormat::Xls,
        TableFormat::Docx,
        TableFormat::Pdf,
    ];

    /// Parse a format identifier (`csv`, `xlsx`, `xls`, `excel`, `docx`, `pdf`).
    /// A leading dot is tolerated so extensions can be passed directly.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        let id = identifier.trim().trim_start_matches('.').to_ascii_lowercase();
        match id.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "excel" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "docx" => Some(Self::Docx),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Pick the format for an upload. An explicit identifier always wins over the
    /// filename extension.
    pub fn resolve(filename: Option<&str>, explicit: Option<&str>) -> Result<Self> {
        if let Some(explicit) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
            return Self::from_identifier(explicit).ok_or_else(|| {
                AppError::UnsupportedFormat(format!("No codec for format '{}'", explicit))
            });
        }

        let extension = filename
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| {
                AppError::UnsupportedFormat(format!(
                    "Cannot determine format of '{}'",
                    filename.unwrap_or_default()
                ))
            })?;

        Self::from_identifier(extension).ok_or_else(|| {
            AppError::UnsupportedFormat(format!("No codec for extension '.{}'", extension))
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
            Self::Docx => "docx",
            Self::Pdf => "pdf",
        }
    }

    /// Extension of the artifact produced on export. Legacy `xls` exports are
    /// written as `xlsx`.
    pub fn export_extension(self) -> &'static str {
        match self {
            Self::Xls => "xlsx",
            other => other.as_str(),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Xlsx | Self::Xls => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
