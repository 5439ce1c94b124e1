//! Crate-wide error taxonomy.
//!
//! Every fallible public operation returns `Result<T, RagError>`. The kinds
//! mirror what callers can act on: retry (`RateLimited`,
//! `UpstreamUnavailable`), fix the request (`BadInput`, `NotFound`,
//! `Unauthorized`), reindex (`SchemaMismatch`), or give up (`Internal`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Upstream quota exhausted. `retry_after` is seconds, when the
    /// upstream provided one.
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<u64> },

    /// An upstream dependency (git host, embedding service, LLM) failed
    /// after local retries. The original reason is attached.
    #[error("upstream unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    /// Stored embedding model does not match the requested model. Fatal on
    /// the read path; triggers a full reindex on the write path.
    #[error("embedding space mismatch: {0}")]
    SchemaMismatch(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        RagError::BadInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        RagError::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        RagError::Unauthorized(msg.into())
    }

    pub fn upstream(reason: impl Into<String>) -> Self {
        RagError::UpstreamUnavailable {
            reason: reason.into(),
        }
    }

    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        RagError::SchemaMismatch(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        RagError::Internal(msg.into())
    }

    /// Machine-readable kind, as exposed on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::BadInput(_) => "BadInput",
            RagError::NotFound(_) => "NotFound",
            RagError::Unauthorized(_) => "Unauthorized",
            RagError::RateLimited { .. } => "RateLimited",
            RagError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            RagError::SchemaMismatch(_) => "SchemaMismatch",
            RagError::Cancelled => "Cancelled",
            RagError::Internal(_) => "Internal",
        }
    }

    /// Whether a local retry with backoff can help.
    /// `BadInput` and `NotFound` are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::RateLimited { .. } | RagError::UpstreamUnavailable { .. }
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            RagError::BadInput(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RagError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RagError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            RagError::SchemaMismatch(_) => StatusCode::CONFLICT,
            RagError::Cancelled => {
                // 499 Client Closed Request (nginx convention)
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let RagError::RateLimited {
            retry_after: Some(secs),
        } = &self
        {
            error["retryAfter"] = serde_json::json!(secs);
        }
        (status, Json(serde_json::json!({ "error": error }))).into_response()
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RagError::NotFound("row not found".to_string()),
            other => RagError::Internal(format!("database error: {other}")),
        }
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::UpstreamUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for RagError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            RagError::Cancelled
        } else {
            RagError::Internal(format!("background task panicked: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(RagError::bad_input("x").kind(), "BadInput");
        assert_eq!(RagError::not_found("x").kind(), "NotFound");
        assert_eq!(RagError::unauthorized("x").kind(), "Unauthorized");
        assert_eq!(
            RagError::RateLimited { retry_after: None }.kind(),
            "RateLimited"
        );
        assert_eq!(RagError::upstream("x").kind(), "UpstreamUnavailable");
        assert_eq!(RagError::schema_mismatch("x").kind(), "SchemaMismatch");
        assert_eq!(RagError::Cancelled.kind(), "Cancelled");
        assert_eq!(RagError::internal("x").kind(), "Internal");
    }

    #[test]
    fn test_retryability() {
        assert!(RagError::RateLimited { retry_after: None }.is_retryable());
        assert!(RagError::upstream("down").is_retryable());
        assert!(!RagError::bad_input("x").is_retryable());
        assert!(!RagError::not_found("x").is_retryable());
        assert!(!RagError::schema_mismatch("x").is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RagError::bad_input("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(RagError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            RagError::RateLimited { retry_after: Some(3) }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            RagError::schema_mismatch("x").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(RagError::Cancelled.status_code().as_u16(), 499);
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: RagError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), "NotFound");
    }
}
