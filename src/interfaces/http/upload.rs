use actix_multipart::{Field, Multipart, MultipartError};
use futures_util::TryStreamExt;

use crate::domain::error::{AppError, Result};

/// A `multipart/form-data` import: the `file` part plus the optional `format` field.
#[derive(Debug, Default)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub format: Option<String>,
}

fn malformed(err: MultipartError) -> AppError {
    AppError::ValidationError(format!("Malformed multipart body: {}", err))
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(malformed)? {
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload exceeds the {} byte limit",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Reads every part, keeping the first `file` part. Unknown fields are drained.
pub async fn read_upload(mut payload: Multipart, limit: usize) -> Result<Upload> {
    let mut file: Option<(Vec<u8>, Option<String>)> = None;
    let mut format = None;

    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or_default().to_string();
        let filename = disposition.get_filename().map(str::to_string);

        match name.as_str() {
            "file" if file.is_none() => {
                let bytes = read_field(&mut field, limit).await?;
                file = Some((bytes, filename));
            }
            "format" => {
                let text = read_field(&mut field, limit).await?;
                let text = String::from_utf8(text).map_err(|_| {
                    AppError::ValidationError("The format field is not UTF-8".to_string())
                })?;
                let text = text.trim();
                format = (!text.is_empty()).then(|| text.to_string());
            }
            _ => {
                read_field(&mut field, limit).await?;
            }
        }
    }

    let (bytes, filename) =
        file.ok_or_else(|| AppError::ValidationError("No file uploaded".to_string()))?;
    Ok(Upload {
        bytes,
        filename,
        format,
    })
}
