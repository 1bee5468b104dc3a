//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),
    #[error("duplicate attribute: {entity}.{field}")]
    DuplicateAttribute { entity: String, field: String },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("invalid primary key: entity {entity} attribute {field}")]
    InvalidPrimaryKey { entity: String, field: String },
    #[error("unknown data type '{data_type}' on {entity}.{field}")]
    UnknownDataType {
        entity: String,
        field: String,
        data_type: String,
    },
    #[error("relation {entity}.{field} has no options")]
    MissingOptions { entity: String, field: String },
    #[error("config load: {0}")]
    Load(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation: {field}: {message}")]
    Validation {
        field: String,
        operator: Option<String>,
        message: String,
    },
    #[error("resolution: {entity}.{attribute} points at unknown entity '{target}'")]
    Resolution {
        entity: String,
        attribute: String,
        target: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("command timed out after {0} ms")]
    Timeout(u64),
    #[error("request cancelled")]
    Cancelled,
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            operator: None,
            message: message.into(),
        }
    }

    pub fn invalid_operator(field: impl Into<String>, operator: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            operator: Some(operator.into()),
            message: message.into(),
        }
    }

    /// Errors a caller may retry with backoff. The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Timeout(_) => true,
            AppError::Db(e) => matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)),
            _ => false,
        }
    }

    /// Stable machine-readable code, also used for per-field errors in nested results.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Validation { .. } => "validation_error",
            AppError::Resolution { .. } => "resolution_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Db(_) => "database_error",
            AppError::Timeout(_) => "timeout",
            AppError::Cancelled => "cancelled",
        }
    }

    /// Message safe to hand to a client: execution failures stay generic.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Db(_) | AppError::Config(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation { field, operator, .. } => Some(serde_json::json!({
                "field": field,
                "operator": operator,
            })),
            AppError::Resolution {
                entity,
                attribute,
                target,
            } => Some(serde_json::json!({
                "entity": entity,
                "attribute": attribute,
                "target": target,
            })),
            AppError::Timeout(_) => Some(serde_json::json!({ "retryable": true })),
            _ => None,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Resolution { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            AppError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.public_message(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_field_and_operator() {
        let err = AppError::invalid_operator("title", "between", "expects exactly 2 values");
        assert_eq!(err.code(), "validation_error");
        let details = err.details().unwrap();
        assert_eq!(details["field"], "title");
        assert_eq!(details["operator"], "between");
    }

    #[test]
    fn execution_errors_stay_generic_for_clients() {
        let err = AppError::Db(sqlx::Error::Protocol("relation \"x\" does not exist".into()));
        assert_eq!(err.public_message(), "internal server error");
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        let err = AppError::Timeout(500);
        assert!(err.is_retryable());
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn resolution_is_client_error() {
        let err = AppError::Resolution {
            entity: "post".into(),
            attribute: "author".into(),
            target: "ghost".into(),
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
