//! Typed errors and HTTP mapping.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Declaration-time errors: raised while entities, value objects and routes are assembled.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),
    #[error("type '{0}' has no storage column type")]
    NotStorable(&'static str),
    #[error("associations not finalized; call finalize_associations before {0}")]
    NotFinalized(&'static str),
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("invalid role expression '{expression}': {reason}")]
    InvalidRole { expression: String, reason: String },
    #[error("config load: {0}")]
    Load(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Business error carrying its own status, message and diagnostic payload.
    #[error("{message}")]
    Api {
        status: StatusCode,
        message: String,
        data: Option<Value>,
    },
    /// Control-flow signal: answered with a 301 to `location`.
    #[error("moved permanently to {0}")]
    Redirect(String),
    #[error("Required Permissions..")]
    Unauthorized { required: Vec<String> },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("storage: {0}")]
    Storage(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("secure field: {0}")]
    Crypto(String),
    #[error("transaction is already closed")]
    TransactionClosed,
}

impl AppError {
    /// Business error with an explicit status.
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        AppError::Api {
            status,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a diagnostic payload. No-op for variants that carry fixed data.
    pub fn with_data(self, data: Value) -> Self {
        match self {
            AppError::Api { status, message, .. } => AppError::Api {
                status,
                message,
                data: Some(data),
            },
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Api { status, .. } => *status,
            AppError::Redirect(_) => StatusCode::MOVED_PERMANENTLY,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Config(_)
            | AppError::Db(_)
            | AppError::Storage(_)
            | AppError::Io(_)
            | AppError::Crypto(_)
            | AppError::TransactionClosed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Errors without a status of their own are the ones worth a warning in the log.
    pub fn is_unexpected(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR && !matches!(self, AppError::Api { .. })
    }

    fn data(&self) -> Option<Value> {
        match self {
            AppError::Api { data, .. } => data.clone(),
            AppError::Unauthorized { required } => Some(Value::from(required.clone())),
            other if other.status_code() == StatusCode::INTERNAL_SERVER_ERROR => {
                Some(Value::String(format!("{:?}", other)))
            }
            _ => None,
        }
    }

    /// Standard error envelope `{uri, message, data}`; a redirect signal becomes a 301.
    pub fn into_envelope(self, uri: Option<&str>) -> Response {
        if let AppError::Redirect(location) = &self {
            return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location.clone())]).into_response();
        }
        let status = self.status_code();
        let body = ErrorBody {
            uri: uri.map(str::to_string),
            message: self.to_string(),
            data: self.data(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub message: String,
    pub data: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_envelope(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_carries_required_roles() {
        let err = AppError::Unauthorized {
            required: vec!["admin".into()],
        };
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.data(), Some(serde_json::json!(["admin"])));
        assert!(!err.is_unexpected());
    }

    #[test]
    fn api_error_keeps_its_status_and_data() {
        let err = AppError::status(StatusCode::CONFLICT, "taken").with_data(serde_json::json!({"field": "email"}));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "taken");
        assert_eq!(err.data(), Some(serde_json::json!({"field": "email"})));
    }

    #[test]
    fn storage_failure_defaults_to_500_with_stringified_data() {
        let err = AppError::Storage("boom".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_unexpected());
        let data = err.data().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
        assert!(data.contains("boom"));
    }

    #[test]
    fn redirect_becomes_301_with_location() {
        let resp = AppError::Redirect("/elsewhere".into()).into_envelope(Some("/x"));
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()), Some("/elsewhere"));
    }
}
