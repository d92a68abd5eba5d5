//! Response helpers shared by dispatch and the transport glue.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub const NOT_FOUND_BODY: &str = "404 - Not Found";

/// 200 with the value as JSON.
pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

pub fn plain_text(status: StatusCode, body: impl Into<String>) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body.into()).into_response()
}

/// Fallback for requests matching no declared route.
pub async fn not_found() -> Response {
    plain_text(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}
