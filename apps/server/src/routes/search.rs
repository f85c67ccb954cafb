//! Keyword plus semantic search, and record-to-record similarity.

use crate::error::{AppError, Result};
use crate::state::SharedContext;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use recordroute_vector::DateRange;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const KEYWORD_TOP_K: usize = 20;
const SEMANTIC_TOP_K: usize = 10;
const SIMILAR_TOP_K: usize = 5;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// `GET /search?q=...&start=...&end=...`
///
/// Served through the content-addressed query cache; a mutation of the
/// vector index or the 24 h TTL invalidates cached replies.
pub async fn search(
    State(context): State<SharedContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>> {
    let query = params.q.trim().to_string();
    if query.is_empty() {
        return Err(AppError::BadRequest("query parameter q is required".to_string()));
    }
    let range = DateRange {
        start: parse_date(params.start.as_deref(), false)?,
        end: parse_date(params.end.as_deref(), true)?,
    };

    if let Some(cached) = context.vector.cached_query(&query, range) {
        tracing::debug!(%query, "search served from cache");
        return Ok(Json(cached));
    }

    let titles = title_map(&context);
    let keyword_matches: Vec<Value> = context
        .vector
        .keyword_search(&query, KEYWORD_TOP_K, range)
        .into_iter()
        .map(|hit| {
            json!({
                "file": hit.record_id,
                "link": format!("/download/{}.stt", hit.record_id),
                "display_name": hit.display_filename,
                "count": hit.count,
                "uploaded_at": hit.uploaded_at,
                "title_summary": titles.get(&hit.record_id),
            })
        })
        .collect();

    // Semantic half degrades to keyword-only when the embedding
    // collaborator is unreachable.
    let similar_documents: Vec<Value> = match context.embedder.embed(&query).await {
        Ok(query_vector) => context
            .vector
            .search(&query_vector, SEMANTIC_TOP_K, range)
            .into_iter()
            .map(|hit| {
                json!({
                    "file": hit.record_id,
                    "link": format!("/download/{}.stt", hit.record_id),
                    "display_name": hit.display_filename,
                    "score": hit.score,
                    "chunk_index": hit.chunk_index,
                    "uploaded_at": hit.uploaded_at,
                    "title_summary": titles.get(&hit.record_id),
                })
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed; keyword results only");
            Vec::new()
        }
    };

    let reply = json!({
        "keywordMatches": keyword_matches,
        "similarDocuments": similar_documents,
    });
    context.vector.store_cached_query(&query, range, reply.clone());
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
pub struct SimilarBody {
    pub file_identifier: String,
    #[serde(default)]
    pub refresh: bool,
    pub user_filename: Option<String>,
}

/// `POST /similar`: records closest to the given one by mean chunk vector.
pub async fn similar(
    State(context): State<SharedContext>,
    Json(body): Json<SimilarBody>,
) -> Result<Json<Value>> {
    let record = context
        .history
        .resolve(&body.file_identifier)
        .or_else(|e| match &body.user_filename {
            Some(name) => context.history.resolve(name),
            None => Err(e),
        })?;

    let cache_query = format!("similar:{}", record.record_id);
    if !body.refresh {
        if let Some(cached) = context.vector.cached_query(&cache_query, DateRange::default()) {
            return Ok(Json(cached));
        }
    }

    let titles = title_map(&context);
    let hits = context.vector.similar_to(&record.record_id, SIMILAR_TOP_K)?;
    let reply = Value::Array(
        hits.into_iter()
            .map(|hit| {
                json!({
                    "file": hit.record_id,
                    "link": format!("/download/{}.stt", hit.record_id),
                    "score": hit.score,
                    "display_name": hit.display_filename,
                    "title_summary": titles.get(&hit.record_id),
                })
            })
            .collect(),
    );
    context
        .vector
        .store_cached_query(&cache_query, DateRange::default(), reply.clone());
    Ok(Json(reply))
}

fn title_map(context: &SharedContext) -> HashMap<String, String> {
    context
        .history
        .list()
        .into_iter()
        .filter_map(|r| r.title_summary.map(|t| (r.record_id, t)))
        .collect()
}

/// Accepts RFC 3339 instants or bare `YYYY-MM-DD` dates; a bare end date
/// extends to the end of that day.
fn parse_date(value: Option<&str>, end_of_day: bool) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(instant.with_timezone(&Utc)));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid date: {value}")))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59).expect("valid time")
    } else {
        date.and_hms_opt(0, 0, 0).expect("valid time")
    };
    Ok(Some(DateTime::from_naive_utc_and_offset(time, Utc)))
}
