//! # Error Handling
//!
//! Core error kinds shared by the mirror pipeline, plus the problem+json
//! [`ApiError`] the HTTP surface renders them as. Every response carries the
//! request trace id so clients can correlate failures with server logs.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Failures raised by the commit and config stores.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("stored row is malformed: {0}")]
    Corrupt(String),
}

/// Classified failure from the upstream source-control provider.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Quota exhausted; `reset` is when the provider will accept requests again.
    #[error("upstream rate limit exceeded (resets at {reset:?})")]
    RateLimited { reset: Option<DateTime<Utc>> },
    /// Timeouts, connection failures and 5xx responses.
    #[error("transient upstream failure: {0}")]
    Transient(String),
    /// 4xx responses other than 429 (and other than quota-exhausted 403).
    #[error("upstream rejected request with status {status}: {message}")]
    Permanent { status: u16, message: String },
}

/// Error kinds surfaced by the monitoring core.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid monitor configuration: {0}")]
    InvalidConfig(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("upstream rate limited until {reset:?}")]
    RateLimited { reset: Option<DateTime<Utc>> },
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),
    #[error("permanent upstream failure (status {status}): {message}")]
    PermanentUpstream { status: u16, message: String },
    #[error("store failure: {0}")]
    StoreFailure(#[from] RepositoryError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    /// Whether a later attempt of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MonitorError::RateLimited { .. } | MonitorError::TransientUpstream(_)
        )
    }

    /// Short label used for log fields and metric outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::InvalidConfig(_) => "invalid_config",
            MonitorError::NotFound(_) => "not_found",
            MonitorError::RateLimited { .. } => "rate_limited",
            MonitorError::TransientUpstream(_) => "transient_upstream",
            MonitorError::PermanentUpstream { .. } => "permanent_upstream",
            MonitorError::StoreFailure(_) => "store_failure",
            MonitorError::Cancelled => "cancelled",
            MonitorError::DeadlineExceeded => "deadline_exceeded",
            MonitorError::Internal(_) => "internal",
        }
    }
}

impl From<UpstreamError> for MonitorError {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::RateLimited { reset } => MonitorError::RateLimited { reset },
            UpstreamError::Transient(message) => MonitorError::TransientUpstream(message),
            UpstreamError::Permanent { status, message } => {
                MonitorError::PermanentUpstream { status, message }
            }
        }
    }
}

impl From<sea_orm::DbErr> for MonitorError {
    fn from(error: sea_orm::DbErr) -> Self {
        MonitorError::StoreFailure(RepositoryError::Database(error))
    }
}

/// Canonical status codes exposed to RPC callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    InvalidArgument,
    NotFound,
    Unavailable,
    Internal,
    DeadlineExceeded,
    Cancelled,
}

impl Canonical {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Canonical::InvalidArgument => StatusCode::BAD_REQUEST,
            Canonical::NotFound => StatusCode::NOT_FOUND,
            Canonical::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Canonical::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Canonical::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            // 499 "client closed request"
            Canonical::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Canonical::InvalidArgument => "INVALID_ARGUMENT",
            Canonical::NotFound => "NOT_FOUND",
            Canonical::Unavailable => "UNAVAILABLE",
            Canonical::Internal => "INTERNAL",
            Canonical::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Canonical::Cancelled => "CANCELLED",
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Canonical error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given canonical code and message
    pub fn new<S: Into<String>>(code: Canonical, message: S) -> Self {
        Self {
            status: code.status_code(),
            code: code.as_str().into(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Trace id of the active request, or a short correlation id outside of one.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<MonitorError> for ApiError {
    fn from(error: MonitorError) -> Self {
        match error {
            MonitorError::InvalidConfig(message) => {
                ApiError::new(Canonical::InvalidArgument, message)
            }
            MonitorError::NotFound(what) => {
                ApiError::new(Canonical::NotFound, format!("{} not found", what))
            }
            MonitorError::RateLimited { reset } => {
                let api = ApiError::new(Canonical::Unavailable, "upstream rate limit exceeded");
                match reset.map(|at| (at - Utc::now()).num_seconds()) {
                    Some(secs) if secs > 0 => api.with_retry_after(secs as u64),
                    _ => api,
                }
            }
            MonitorError::TransientUpstream(message) => {
                tracing::warn!(%message, "transient upstream failure surfaced to caller");
                ApiError::new(Canonical::Unavailable, "upstream temporarily unavailable")
            }
            MonitorError::StoreFailure(source) => {
                tracing::error!(error = ?source, "store failure surfaced to caller");
                ApiError::new(Canonical::Unavailable, "storage temporarily unavailable")
            }
            MonitorError::PermanentUpstream { status, message } => {
                tracing::error!(status, %message, "upstream rejected request");
                ApiError::new(
                    Canonical::Internal,
                    format!("upstream rejected request with status {}", status),
                )
                .with_details(serde_json::json!({ "upstreamStatus": status }))
            }
            MonitorError::Cancelled => ApiError::new(Canonical::Cancelled, "request cancelled"),
            MonitorError::DeadlineExceeded => {
                ApiError::new(Canonical::DeadlineExceeded, "request deadline exceeded")
            }
            MonitorError::Internal(message) => {
                tracing::error!(%message, "internal error");
                ApiError::new(Canonical::Internal, "an internal error occurred")
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);
        ApiError::new(Canonical::Internal, "an internal error occurred")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        ApiError::new(Canonical::InvalidArgument, message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(Canonical::InvalidArgument, rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::new(Canonical::InvalidArgument, rejection.body_text())
    }
}

/// Create an INVALID_ARGUMENT error with field details
pub fn invalid_argument(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(Canonical::InvalidArgument, message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_status_mapping() {
        let cases = [
            (Canonical::InvalidArgument, 400),
            (Canonical::NotFound, 404),
            (Canonical::Unavailable, 503),
            (Canonical::Internal, 500),
            (Canonical::DeadlineExceeded, 504),
            (Canonical::Cancelled, 499),
        ];
        for (code, status) in cases {
            assert_eq!(code.status_code().as_u16(), status, "{}", code.as_str());
        }
    }

    #[test]
    fn test_monitor_error_mapping() {
        let invalid: ApiError = MonitorError::InvalidConfig("owner is empty".into()).into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(invalid.code.as_ref(), "INVALID_ARGUMENT");
        assert!(invalid.message.contains("owner is empty"));

        let missing: ApiError = MonitorError::NotFound("commit abc".into()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let store: ApiError =
            MonitorError::StoreFailure(RepositoryError::Corrupt("bad date".into())).into();
        assert_eq!(store.code.as_ref(), "UNAVAILABLE");

        let transient: ApiError = MonitorError::TransientUpstream("502".into()).into();
        assert_eq!(transient.code.as_ref(), "UNAVAILABLE");

        let permanent: ApiError = MonitorError::PermanentUpstream {
            status: 404,
            message: "Not Found".into(),
        }
        .into();
        assert_eq!(permanent.code.as_ref(), "INTERNAL");
        assert_eq!(permanent.details, Some(Box::new(json!({"upstreamStatus": 404}))));

        let deadline: ApiError = MonitorError::DeadlineExceeded.into();
        assert_eq!(deadline.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let reset = Utc::now() + chrono::Duration::seconds(120);
        let api: ApiError = MonitorError::RateLimited { reset: Some(reset) }.into();

        assert_eq!(api.code.as_ref(), "UNAVAILABLE");
        let retry = api.retry_after.unwrap();
        assert!((110..=120).contains(&retry));

        let response = api.into_response();
        assert!(response.headers().get("retry-after").is_some());
    }

    #[test]
    fn test_upstream_error_conversion() {
        assert!(MonitorError::from(UpstreamError::Transient("timeout".into())).is_retryable());
        assert!(MonitorError::from(UpstreamError::RateLimited { reset: None }).is_retryable());

        let permanent = MonitorError::from(UpstreamError::Permanent {
            status: 422,
            message: "bad sha".into(),
        });
        assert!(!permanent.is_retryable());
        assert_eq!(permanent.kind(), "permanent_upstream");
    }

    #[test]
    fn test_problem_json_response() {
        let response = invalid_argument("limit too large", json!({"limit": "must be <= 1000"}))
            .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_fallback() {
        let error = ApiError::new(Canonical::Internal, "boom");
        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[tokio::test]
    async fn test_trace_id_from_request_scope() {
        let error = telemetry::with_trace_context(
            telemetry::TraceContext {
                trace_id: "req-42".to_string(),
            },
            async { ApiError::new(Canonical::NotFound, "missing") },
        )
        .await;

        assert_eq!(error.trace_id.as_deref(), Some("req-42"));
    }
}
