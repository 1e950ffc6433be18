//! Read side of the capture log
//!
//! [`RetrievalApi`] turns request parameters into store queries and store
//! failures into client- or server-side errors. [`routes`] mounts it on an
//! axum router.

pub mod routes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::store::{LogKind, LogStore, RevisionSummary, StoreError};

pub use routes::router;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid created_at: {0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            other => ApiError::Storage(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Storage(message) = &self {
            warn!("Retrieval failed: {}", message);
        }
        (self.status(), self.to_string()).into_response()
    }
}

/// Parse the `created_at` query parameter (Unix seconds)
pub fn parse_created_at(raw: Option<&str>) -> Result<i64, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing parameter".to_string()))?;
    raw.parse::<i64>()
        .map_err(|e| ApiError::BadRequest(format!("{:?}: {}", raw, e)))
}

/// Query operations exposed to the HTTP layer
#[derive(Clone)]
pub struct RetrievalApi {
    store: Arc<LogStore>,
}

impl RetrievalApi {
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }

    /// Every captured revision/timestamp pair, newest first
    pub async fn list_revisions(&self) -> Result<Vec<RevisionSummary>, ApiError> {
        Ok(LogStore::blocking(&self.store, |store| store.list_revisions()).await?)
    }

    /// Raw digest output of the cycle at `created_at`
    pub async fn digest(&self, created_at: Option<&str>) -> Result<Vec<u8>, ApiError> {
        self.content(LogKind::digest(), created_at).await
    }

    /// Raw access-log table of the cycle at `created_at`
    pub async fn access_log(&self, created_at: Option<&str>) -> Result<Vec<u8>, ApiError> {
        self.content(LogKind::access_log(), created_at).await
    }

    pub async fn content(
        &self,
        kind: LogKind,
        created_at: Option<&str>,
    ) -> Result<Vec<u8>, ApiError> {
        let created_at = parse_created_at(created_at)?;
        let content =
            LogStore::blocking(&self.store, move |store| store.get_content(&kind, created_at))
                .await?;
        Ok(content)
    }
}
