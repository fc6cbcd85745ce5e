use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::core::SearchError;
use crate::knowledge_graph::DatasetId;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Dataset {0} not found")]
    DatasetNotFound(DatasetId),
    #[error("Search failed: {0}")]
    Search(#[from] SearchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::DatasetNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Search(e) => {
                tracing::error!("Discovery payload could not be projected: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
