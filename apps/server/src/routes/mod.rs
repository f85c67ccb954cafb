//! Request routing: thin glue over the core components.

mod process;
mod records;
mod search;
mod system;
mod upload;
mod ws;

use crate::state::SharedContext;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(context: SharedContext) -> Router {
    let body_limit = context.config.max_upload_bytes as usize;
    Router::new()
        .route("/upload", post(upload::upload))
        .route("/process", post(process::process))
        .route("/cancel", post(process::cancel))
        .route("/tasks", get(process::tasks))
        .route("/incremental_embedding", post(process::incremental_embedding))
        .route("/check_existing_stt", post(process::check_existing_stt))
        .route("/history", get(records::history))
        .route("/delete_records", post(records::delete_records))
        .route("/reset", post(records::reset))
        .route("/reset_summary_embedding", post(records::reset_summary_embedding))
        .route("/reset_all_tasks", post(records::reset_all_tasks))
        .route("/update_stt_text", post(records::update_stt_text))
        .route("/update_filename", post(records::update_filename))
        .route("/download/{opaque}", get(records::download))
        .route("/search", get(search::search))
        .route("/similar", post(search::similar))
        .route("/models", get(system::models))
        .route("/shutdown", post(system::shutdown))
        .route("/ws", get(ws::websocket))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(context)
}
