//! Process requests, cancellation, and the task listing.

use crate::error::{AppError, Result};
use crate::state::SharedContext;
use axum::extract::State;
use axum::Json;
use recordroute_events::StepKind;
use recordroute_workflow::{ProcessRequest, StepOutcome, StepRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct ProcessBody {
    pub record_id: Option<String>,
    pub file_path: Option<String>,
    pub steps: Vec<String>,
    pub task_id: Option<String>,
    #[serde(default)]
    pub model_settings: Option<ModelSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelSettings {
    pub summarize: Option<String>,
    pub stt: Option<String>,
}

/// Blocking RPC: replies once every requested step has finished. Progress
/// streams over the WebSocket feed in the meantime, and the reply always
/// matches the terminal events published there.
pub async fn process(
    State(context): State<SharedContext>,
    Json(body): Json<ProcessBody>,
) -> Result<Json<Value>> {
    let identifier = body
        .record_id
        .as_deref()
        .or(body.file_path.as_deref())
        .ok_or_else(|| AppError::BadRequest("record_id or file_path is required".to_string()))?;
    let record = context.history.resolve(identifier)?;

    if body.steps.is_empty() {
        return Err(AppError::BadRequest("steps must not be empty".to_string()));
    }
    let mut steps = Vec::with_capacity(body.steps.len());
    for (i, name) in body.steps.iter().enumerate() {
        let step = StepKind::parse(name)
            .ok_or_else(|| AppError::BadRequest(format!("unknown step: {name}")))?;
        // A client-supplied task id names the first step; the rest get
        // generated ids so cancellation stays unambiguous.
        let task_id = if i == 0 { body.task_id.clone() } else { None };
        steps.push(StepRequest { step, task_id });
    }

    let model_settings = body.model_settings.unwrap_or_default();
    let request = ProcessRequest {
        record_id: record.record_id,
        steps,
        stt_model: model_settings.stt,
        summary_model: model_settings.summarize,
    };

    let outcome = context.scheduler.process(request).await;
    if outcome.all_succeeded() {
        let mut reply = serde_json::Map::new();
        for (step, step_outcome) in &outcome.steps {
            if let StepOutcome::Succeeded { artifact_url } = step_outcome {
                reply.insert(step.as_str().to_string(), json!(artifact_url));
            }
        }
        return Ok(Json(Value::Object(reply)));
    }

    let (_, failure) = outcome
        .first_failure()
        .expect("non-success outcome has a failure");
    let reply = match failure {
        StepOutcome::Failed { code, message } => json!({
            "error": code.as_str(),
            "message": message,
        }),
        StepOutcome::Cancelled => json!({ "error": "CANCELLED" }),
        StepOutcome::Succeeded { .. } => unreachable!("first_failure returned a success"),
    };
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub task_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelReply {
    pub cancelled: bool,
}

pub async fn cancel(
    State(context): State<SharedContext>,
    Json(body): Json<CancelBody>,
) -> Json<CancelReply> {
    let cancelled = context.registry.cancel(&body.task_id);
    Json(CancelReply { cancelled })
}

#[derive(Debug, Serialize)]
pub struct TaskEntry {
    pub record_id: String,
    pub step: StepKind,
    pub duration_seconds: u64,
}

pub async fn tasks(State(context): State<SharedContext>) -> Json<HashMap<String, TaskEntry>> {
    let listing = context
        .registry
        .list()
        .into_iter()
        .map(|t| {
            (
                t.task_id,
                TaskEntry {
                    record_id: t.record_id,
                    step: t.step,
                    duration_seconds: t.duration_seconds,
                },
            )
        })
        .collect();
    Json(listing)
}

#[derive(Debug, Serialize)]
pub struct IncrementalEmbeddingReply {
    pub success: bool,
    pub processed_count: usize,
    pub message: String,
}

/// Embed every record that has a transcript but no embedding yet.
pub async fn incremental_embedding(
    State(context): State<SharedContext>,
) -> Json<IncrementalEmbeddingReply> {
    let processed_count = context.scheduler.embed_missing().await;
    Json(IncrementalEmbeddingReply {
        success: true,
        processed_count,
        message: format!("incremental embedding finished: {processed_count} records"),
    })
}

#[derive(Debug, Deserialize)]
pub struct CheckSttBody {
    pub file_path: String,
}

#[derive(Debug, Serialize)]
pub struct CheckSttReply {
    pub has_stt: bool,
}

pub async fn check_existing_stt(
    State(context): State<SharedContext>,
    Json(body): Json<CheckSttBody>,
) -> Json<CheckSttReply> {
    let has_stt = context
        .history
        .resolve(&body.file_path)
        .map(|record| record.completed_tasks.stt)
        .unwrap_or(false);
    Json(CheckSttReply { has_stt })
}
