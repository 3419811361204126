//! # Common API Types
//!
//! Request and response shapes shared by the monitor and commit handlers,
//! plus the request-scoped deadline wrapper every operation runs under.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, MonitorError, invalid_argument};
use crate::models::{
    AuthorAggregate, Commit, CommitFilter, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT, RepoKey,
    parse_date,
};
use crate::registry::JobSnapshot;

/// Date window and paging shared by commit listings and author aggregates.
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CommitQuery {
    /// First day to include (`YYYY-MM-DD`); unparseable values are ignored
    pub from_date: Option<String>,
    /// Last day to include (`YYYY-MM-DD`); unparseable values are ignored
    pub to_date: Option<String>,
    /// Page size (default: 100, max: 1000; 0 means default)
    pub limit: Option<u64>,
    /// 1-based page number (0 means 1)
    pub page: Option<u64>,
}

impl CommitQuery {
    /// Resolve defaults and bounds into a store filter for `key`.
    pub fn into_filter(self, key: RepoKey) -> Result<CommitFilter, ApiError> {
        let limit = match self.limit {
            None | Some(0) => DEFAULT_QUERY_LIMIT,
            Some(limit) if limit > MAX_QUERY_LIMIT => {
                return Err(invalid_argument(
                    "Invalid limit",
                    serde_json::json!({
                        "limit": format!("Maximum allowed limit is {}", MAX_QUERY_LIMIT)
                    }),
                ));
            }
            Some(limit) => limit,
        };
        let page = self.page.filter(|page| *page > 0).unwrap_or(1);

        Ok(CommitFilter::new(key)
            .with_dates(
                self.from_date.as_deref().and_then(parse_date),
                self.to_date.as_deref().and_then(parse_date),
            )
            .with_page(page, limit))
    }
}

/// Body of `POST /monitors`
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartMonitoringRequest {
    #[schema(example = "acme")]
    pub owner_name: String,
    #[schema(example = "widget")]
    pub repo_name: String,
    /// First day of the initial backfill (`YYYY-MM-DD`)
    #[schema(example = "2024-01-01")]
    pub from_date: Option<String>,
    /// Last day of the initial backfill (`YYYY-MM-DD`)
    pub to_date: Option<String>,
    /// Poll interval in hours (at least 1)
    #[schema(example = 1)]
    pub poll_interval_hours: u32,
}

/// Empty acknowledgement body
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Empty {}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = 200)]
    pub code: u16,
}

/// Commit listing response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommitListResponse {
    pub data: Vec<Commit>,
}

/// Top authors response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorListResponse {
    pub data: Vec<AuthorAggregate>,
}

/// Active monitor jobs
#[derive(Debug, Serialize, ToSchema)]
pub struct MonitorListResponse {
    pub data: Vec<JobSnapshot>,
}

/// Run `operation` under a request deadline.
///
/// The token handed to `operation` is cancelled when the deadline expires
/// or when the request future is dropped (client went away).
pub async fn with_deadline<F, Fut, T>(deadline: Duration, operation: F) -> Result<T, ApiError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, MonitorError>>,
{
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match tokio::time::timeout(deadline, operation(cancel.clone())).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            cancel.cancel();
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "request deadline exceeded");
            Err(MonitorError::DeadlineExceeded.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn key() -> RepoKey {
        RepoKey::new("acme", "widget")
    }

    #[test]
    fn test_query_defaults() {
        let filter = CommitQuery::default().into_filter(key()).unwrap();
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.page, 1);

        let zeroes = CommitQuery {
            limit: Some(0),
            page: Some(0),
            ..CommitQuery::default()
        };
        let filter = zeroes.into_filter(key()).unwrap();
        assert_eq!((filter.limit, filter.page), (100, 1));
    }

    #[test]
    fn test_query_rejects_limit_above_maximum() {
        let query = CommitQuery {
            limit: Some(1001),
            ..CommitQuery::default()
        };
        let err = query.into_filter(key()).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code.as_ref(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_unparseable_dates_become_absent() {
        let query = CommitQuery {
            from_date: Some("yesterday".into()),
            to_date: Some("2024-01-31".into()),
            ..CommitQuery::default()
        };
        let filter = query.into_filter(key()).unwrap();
        assert_eq!(filter.from_date, None);
        assert_eq!(filter.to_date, chrono::NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_operation() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let result: Result<(), ApiError> = with_deadline(Duration::from_secs(1), |cancel| async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
            }
            let _ = tx.send(());
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code.as_ref(), "DEADLINE_EXCEEDED");
        // The operation future was dropped before it could finish.
        assert!(rx.await.is_err());
    }
}
