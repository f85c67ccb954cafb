//! Record lifecycle: listing, deletion, resets, renames, downloads.

use crate::error::{AppError, Result};
use crate::state::SharedContext;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use recordroute_events::StepKind;
use recordroute_history::Record;
use recordroute_storage::{OUTPUTS_DIR, UPLOADS_DIR};
use serde::{Deserialize, Serialize};
use std::fs;

pub async fn history(State(context): State<SharedContext>) -> Json<Vec<Record>> {
    Json(context.history.list())
}

#[derive(Debug, Deserialize)]
pub struct DeleteBody {
    pub record_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteReply {
    pub deleted: Vec<String>,
}

/// Delete records with their uploads, artifacts, and vector entries in one
/// logical batch. Unknown ids succeed, making deletion idempotent.
pub async fn delete_records(
    State(context): State<SharedContext>,
    Json(body): Json<DeleteBody>,
) -> Result<Json<DeleteReply>> {
    for record_id in &body.record_ids {
        if let Some(record) = context.history.delete(record_id)? {
            context.vector.delete(record_id)?;
            remove_record_dirs(&context, &record);
            tracing::info!(record_id, "record deleted");
        }
    }
    Ok(Json(DeleteReply {
        deleted: body.record_ids,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResetBody {
    pub record_id: String,
}

#[derive(Debug, Serialize)]
pub struct OkReply {
    pub ok: bool,
}

/// Clear every completion flag, dropping artifacts and vector entries.
pub async fn reset(
    State(context): State<SharedContext>,
    Json(body): Json<ResetBody>,
) -> Result<Json<OkReply>> {
    let dropped = context.history.reset(&body.record_id, &StepKind::ALL)?;
    context.vector.delete(&body.record_id)?;
    remove_artifacts(&context, &dropped);
    Ok(Json(OkReply { ok: true }))
}

/// Clear summary and embedding while keeping the transcript.
pub async fn reset_summary_embedding(
    State(context): State<SharedContext>,
    Json(body): Json<ResetBody>,
) -> Result<Json<OkReply>> {
    let dropped = context
        .history
        .reset(&body.record_id, &[StepKind::Embedding, StepKind::Summary])?;
    context.vector.delete(&body.record_id)?;
    remove_artifacts(&context, &dropped);
    Ok(Json(OkReply { ok: true }))
}

#[derive(Debug, Deserialize)]
pub struct ResetAllBody {
    pub tasks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageReply {
    pub message: String,
}

/// Bulk reset one or more step kinds across every record.
pub async fn reset_all_tasks(
    State(context): State<SharedContext>,
    Json(body): Json<ResetAllBody>,
) -> Result<Json<MessageReply>> {
    let mut records_touched = 0;
    for name in &body.tasks {
        let step = StepKind::parse(name)
            .ok_or_else(|| AppError::BadRequest(format!("unknown task kind: {name}")))?;
        let changed = context.history.reset_step_for_all(step)?;
        for (record_id, dropped) in &changed {
            if step == StepKind::Embedding {
                context.vector.delete(record_id)?;
            }
            remove_artifacts(&context, dropped);
        }
        records_touched += changed.len();
    }
    Ok(Json(MessageReply {
        message: format!("reset {} record task(s)", records_touched),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSttBody {
    pub file_identifier: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateSttReply {
    pub success: bool,
    pub record_id: String,
}

/// Replace the transcript with edited text, invalidating summary and
/// embedding so they are regenerated from the correction.
pub async fn update_stt_text(
    State(context): State<SharedContext>,
    Json(body): Json<UpdateSttBody>,
) -> Result<Json<UpdateSttReply>> {
    let record = context.history.resolve(&body.file_identifier)?;
    let dropped = context
        .history
        .update_stt_text(&record.record_id, &body.content)?;
    context.vector.delete(&record.record_id)?;
    remove_artifacts(&context, &dropped);
    tracing::info!(record_id = %record.record_id, "transcript updated; derived state invalidated");
    Ok(Json(UpdateSttReply {
        success: true,
        record_id: record.record_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
    pub record_id: String,
    pub filename: String,
}

pub async fn update_filename(
    State(context): State<SharedContext>,
    Json(body): Json<RenameBody>,
) -> Result<Json<OkReply>> {
    if body.filename.trim().is_empty() {
        return Err(AppError::BadRequest("filename must not be empty".to_string()));
    }
    context
        .history
        .rename(&body.record_id, body.filename.trim().to_string())?;
    Ok(Json(OkReply { ok: true }))
}

/// Serve an artifact (`<record_id>.<stt|summary|chunks>`) or an original
/// upload (bare record id).
pub async fn download(
    State(context): State<SharedContext>,
    Path(opaque): Path<String>,
) -> Result<Response> {
    let upload = context.history.get(&opaque).ok();
    let path = context
        .layout
        .download_path(&opaque, upload.as_ref().map(|r| r.source_path.as_str()))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::NotFound(format!("no such artifact: {opaque}")))?;

    let filename = upload
        .map(|r| r.display_filename)
        .unwrap_or_else(|| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| opaque.clone())
        });
    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("md") => "text/markdown; charset=utf-8",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Best-effort removal of dropped artifact files; a missing file is fine.
fn remove_artifacts(context: &SharedContext, dropped: &[String]) {
    for relative in dropped {
        let path = context.layout.resolve(relative);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact");
            }
        }
    }
}

/// Remove a deleted record's output directory and upload directory.
fn remove_record_dirs(context: &SharedContext, record: &Record) {
    let outputs = context
        .layout
        .root()
        .join(OUTPUTS_DIR)
        .join(&record.record_id);
    if let Err(e) = fs::remove_dir_all(&outputs) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %outputs.display(), error = %e, "failed to remove outputs");
        }
    }

    if let Some(dir) = record.upload_dir_name() {
        let upload = context.layout.root().join(UPLOADS_DIR).join(dir);
        if let Err(e) = fs::remove_dir_all(&upload) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %upload.display(), error = %e, "failed to remove upload");
            }
        }
    }
}
