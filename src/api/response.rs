use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::error::Result;

/// `{data, meta}` envelope used by the dashboard routes.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub meta: ResponseMeta,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    pub status: String,
    pub status_code: u16,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseMeta {
    fn new(status: StatusCode, message: Option<String>) -> Self {
        Self {
            status: if status.is_success() { "success" } else { "error" }.to_string(),
            status_code: status.as_u16(),
            timestamp: Utc::now().to_rfc3339(),
            message,
        }
    }
}

pub fn success<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(ApiResponse {
            data: Some(data),
            meta: ResponseMeta::new(StatusCode::OK, None),
        }),
    )
        .into_response()
}

pub fn error(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            data: None,
            meta: ResponseMeta::new(status, Some(message)),
        }),
    )
        .into_response()
}

/// Wraps a handler result in the envelope, mapping errors to their status.
pub fn envelope<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(data) => success(data),
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                tracing::error!(error = %err, "request failed");
            }
            error(status, err.to_string())
        }
    }
}
