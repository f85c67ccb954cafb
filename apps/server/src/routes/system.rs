//! Model discovery and graceful shutdown.

use crate::state::SharedContext;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ModelsReply {
    pub models: Vec<String>,
    pub default: ModelDefaults,
}

#[derive(Debug, Serialize)]
pub struct ModelDefaults {
    pub summarize: String,
    pub embedding: String,
}

/// Models the inference backend serves, with the configured defaults. The
/// listing degrades to empty when the backend is unreachable so the UI can
/// still render.
pub async fn models(State(context): State<SharedContext>) -> Json<ModelsReply> {
    let models = match context.inference.list_models().await {
        Ok(models) => models,
        Err(e) => {
            tracing::warn!(error = %e, "model listing unavailable");
            Vec::new()
        }
    };
    Json(ModelsReply {
        models,
        default: ModelDefaults {
            summarize: context.config.inference.summary_model.clone(),
            embedding: context.config.inference.embed_model.clone(),
        },
    })
}

#[derive(Debug, Serialize)]
pub struct ShutdownReply {
    pub success: bool,
    pub message: String,
}

/// Cancel live tasks and stop the listener once this reply is sent.
pub async fn shutdown(State(context): State<SharedContext>) -> Json<ShutdownReply> {
    tracing::info!("shutdown requested over http");
    context.request_shutdown();
    Json(ShutdownReply {
        success: true,
        message: "server is shutting down".to_string(),
    })
}
