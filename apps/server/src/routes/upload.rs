//! Multipart upload: each file becomes one record.

use crate::error::{AppError, Result};
use crate::state::SharedContext;
use axum::extract::multipart::{Multipart, MultipartError};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use recordroute_engines::media;
use recordroute_history::FileType;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub record_id: String,
    pub file_path: String,
    pub file_type: FileType,
    pub filename: String,
}

pub async fn upload(
    State(context): State<SharedContext>,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadedFile>>> {
    let mut uploaded = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };
        if field.name() != Some("files") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload.bin".to_string());
        let bytes = field.bytes().await.map_err(multipart_error)?;

        let dest = context.layout.new_upload_path(&filename)?;
        tokio::fs::write(&dest, &bytes)
            .await
            .map_err(|e| AppError::Internal(format!("failed to store upload: {e}")))?;
        let relative = context
            .layout
            .relativize(&dest)
            .ok_or_else(|| AppError::Internal("upload landed outside the data root".to_string()))?;

        let file_type = FileType::from_filename(&filename);
        let duration_seconds = match file_type {
            FileType::Audio => media::probe_duration(&dest).await.ok().flatten(),
            _ => None,
        };

        let record = context.history.create_record(
            relative.clone(),
            file_type,
            filename.clone(),
            duration_seconds,
        )?;
        tracing::info!(record_id = %record.record_id, filename = %filename, "file uploaded");

        uploaded.push(UploadedFile {
            record_id: record.record_id,
            file_path: relative,
            file_type,
            filename,
        });
    }

    if uploaded.is_empty() {
        return Err(AppError::BadRequest(
            "multipart field `files` is required".to_string(),
        ));
    }
    Ok(Json(uploaded))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(format!("invalid multipart body: {e}"))
    }
}
