//! HTTP routes over [`RetrievalApi`]

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::{ApiError, RetrievalApi};

const INDEX_HTML: &str = include_str!("index.html");

#[derive(Debug, Default, Deserialize)]
pub struct CreatedAtParams {
    created_at: Option<String>,
}

/// Routes mounted under `prefix` (e.g. `/debug`); an empty prefix or `/`
/// mounts them at the root
pub fn router(api: RetrievalApi, prefix: &str) -> Router {
    let routes = Router::new()
        .route("/", get(index))
        .route("/revisions", get(revisions))
        .route("/digest", get(digest))
        .route("/access-log", get(access_log))
        .with_state(api);

    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        routes
    } else if prefix.starts_with('/') {
        Router::new().nest(prefix, routes)
    } else {
        Router::new().nest(&format!("/{}", prefix), routes)
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn revisions(State(api): State<RetrievalApi>) -> Result<Response, ApiError> {
    let revisions = api.list_revisions().await?;
    Ok(Json(revisions).into_response())
}

/// The digest is JSON already, so it goes out as is
async fn digest(
    State(api): State<RetrievalApi>,
    Query(params): Query<CreatedAtParams>,
) -> Result<Response, ApiError> {
    let content = api.digest(params.created_at.as_deref()).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], content).into_response())
}

/// The table is sent as a JSON string so the index page can `JSON.parse` it
async fn access_log(
    State(api): State<RetrievalApi>,
    Query(params): Query<CreatedAtParams>,
) -> Result<Response, ApiError> {
    let content = api.access_log(params.created_at.as_deref()).await?;
    let body = serde_json::to_string(&String::from_utf8_lossy(&content))
        .map_err(|e| ApiError::Storage(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/csv")], body).into_response())
}
