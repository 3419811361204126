//! # Data Models
//!
//! Domain values shared by the stores, the mirror pipeline and the HTTP
//! surface, plus the SeaORM entities backing the two databases.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::MonitorError;

pub mod commit;
pub mod cron_task;

pub use commit::Entity as CommitEntity;
pub use cron_task::Entity as CronTaskEntity;

/// Largest page size accepted by list queries.
pub const MAX_QUERY_LIMIT: u64 = 1000;
/// Page size used when a query leaves `limit` unset or zero.
pub const DEFAULT_QUERY_LIMIT: u64 = 100;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "gitbeam-commit-monitor".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Identifies an upstream repository by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoKey {
    #[schema(example = "acme")]
    pub owner_name: String,
    #[schema(example = "widget")]
    pub repo_name: String,
}

impl RepoKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner_name: owner.into(),
            repo_name: repo.into(),
        }
    }

    /// Rejects names the upstream provider could never accept.
    pub fn validate(&self) -> Result<(), MonitorError> {
        for (field, value) in [("ownerName", &self.owner_name), ("repoName", &self.repo_name)] {
            if !is_valid_name(value) {
                return Err(MonitorError::InvalidConfig(format!(
                    "{} '{}' is not a valid repository identifier",
                    field, value
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_name, self.repo_name)
    }
}

fn is_valid_name(value: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.-]{1,100}$").expect("repository name pattern is valid")
    });
    pattern.is_match(value) && value != "." && value != ".."
}

/// Durable monitoring configuration for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(flatten)]
    pub key: RepoKey,
    /// First day of the initial backfill (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Date, example = "2024-01-01")]
    pub from_date: Option<NaiveDate>,
    /// Last day of the initial backfill (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Date, example = "2024-01-31")]
    pub to_date: Option<NaiveDate>,
    #[schema(example = 1, minimum = 1)]
    pub poll_interval_hours: u32,
}

impl MonitorConfig {
    /// Checks names, date ordering and the accepted poll interval range.
    pub fn validate(&self, max_poll_interval_hours: u32) -> Result<(), MonitorError> {
        self.key.validate()?;

        if self.poll_interval_hours < 1 || self.poll_interval_hours > max_poll_interval_hours {
            return Err(MonitorError::InvalidConfig(format!(
                "pollIntervalHours must be between 1 and {}, got {}",
                max_poll_interval_hours, self.poll_interval_hours
            )));
        }

        if let (Some(from), Some(to)) = (self.from_date, self.to_date)
            && from > to
        {
            return Err(MonitorError::InvalidConfig(format!(
                "fromDate {} is after toDate {}",
                from, to
            )));
        }

        Ok(())
    }

    /// Window for the one-off backfill that follows registration.
    pub fn backfill_window(&self) -> MirrorWindow {
        MirrorWindow {
            since: self.from_date.map(start_of_day),
            until: self.to_date.map(end_of_day_exclusive),
        }
    }
}

/// A mirrored commit. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    #[serde(flatten)]
    pub key: RepoKey,
    #[schema(example = "6dcb09b5b57875f334f61aebed695e2e4193db5e")]
    pub sha: String,
    pub author: String,
    pub message: String,
    #[schema(value_type = String, format = DateTime)]
    pub date: DateTime<Utc>,
    pub url: String,
    /// Parent commits in upstream order.
    pub parent_shas: Vec<String>,
}

/// Commit count for one author over a query window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorAggregate {
    #[serde(flatten)]
    pub key: RepoKey,
    pub author: String,
    pub commit_count: u64,
}

/// Read-side filter shared by commit listings and author aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitFilter {
    pub key: RepoKey,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    /// 1-based page number.
    pub page: u64,
    pub limit: u64,
}

impl CommitFilter {
    /// Filter for the first page of the whole history of `key`.
    pub fn new(key: RepoKey) -> Self {
        Self {
            key,
            from_date: None,
            to_date: None,
            page: 1,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    pub fn with_dates(mut self, from_date: Option<NaiveDate>, to_date: Option<NaiveDate>) -> Self {
        self.from_date = from_date;
        self.to_date = to_date;
        self
    }

    pub fn with_page(mut self, page: u64, limit: u64) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    /// Rows to skip before the requested page.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// Half-open `[since, until)` instant range; `toDate` covers its whole day.
    pub fn window(&self) -> MirrorWindow {
        MirrorWindow {
            since: self.from_date.map(start_of_day),
            until: self.to_date.map(end_of_day_exclusive),
        }
    }

    /// Whether `date` falls inside the filter's date range.
    pub fn contains(&self, date: &DateTime<Utc>) -> bool {
        let window = self.window();
        window.since.is_none_or(|since| *date >= since)
            && window.until.is_none_or(|until| *date < until)
    }
}

/// `{since?, until?}` bounds for a mirror run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl MirrorWindow {
    /// Unbounded window; the engine fills `since` from the latest stored commit.
    pub fn open() -> Self {
        Self::default()
    }

    /// Window used by pollers and boot catch-ups.
    pub fn until(until: DateTime<Utc>) -> Self {
        Self {
            since: None,
            until: Some(until),
        }
    }
}

/// Parses a `YYYY-MM-DD` wire date. Anything else yields `None`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day_exclusive(date: NaiveDate) -> DateTime<Utc> {
    let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
    start_of_day(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hours: u32) -> MonitorConfig {
        MonitorConfig {
            key: RepoKey::new("acme", "widget"),
            from_date: None,
            to_date: None,
            poll_interval_hours: hours,
        }
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2024-01-02"), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(parse_date(" 2024-01-02 "), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(parse_date("02/01/2024"), None);
        assert_eq!(parse_date("2024-13-01"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_monitor_config_validation() {
        assert!(config(1).validate(720).is_ok());
        assert!(matches!(
            config(0).validate(720),
            Err(MonitorError::InvalidConfig(_))
        ));
        assert!(config(721).validate(720).is_err());

        let mut bad_name = config(1);
        bad_name.key.owner_name = "ac me".to_string();
        assert!(bad_name.validate(720).is_err());

        let mut dotdot = config(1);
        dotdot.key.repo_name = "..".to_string();
        assert!(dotdot.validate(720).is_err());

        let mut inverted = config(1);
        inverted.from_date = NaiveDate::from_ymd_opt(2024, 2, 1);
        inverted.to_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(inverted.validate(720).is_err());
    }

    #[test]
    fn test_filter_window_covers_whole_to_date() {
        let filter = CommitFilter::new(RepoKey::new("acme", "widget")).with_dates(
            NaiveDate::from_ymd_opt(2024, 1, 2),
            NaiveDate::from_ymd_opt(2024, 1, 2),
        );

        let late = "2024-01-02T23:59:59Z".parse::<DateTime<Utc>>().unwrap();
        let next = "2024-01-03T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let before = "2024-01-01T23:59:59Z".parse::<DateTime<Utc>>().unwrap();

        assert!(filter.contains(&late));
        assert!(!filter.contains(&next));
        assert!(!filter.contains(&before));
    }

    #[test]
    fn test_filter_offset() {
        let filter = CommitFilter::new(RepoKey::new("a", "b")).with_page(3, 25);
        assert_eq!(filter.offset(), 50);
        assert_eq!(CommitFilter::new(RepoKey::new("a", "b")).offset(), 0);
    }

    #[test]
    fn test_monitor_config_json_shape() {
        let mut cfg = config(6);
        cfg.from_date = NaiveDate::from_ymd_opt(2024, 1, 1);

        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["ownerName"], "acme");
        assert_eq!(json["repoName"], "widget");
        assert_eq!(json["fromDate"], "2024-01-01");
        assert_eq!(json["pollIntervalHours"], 6);
        assert!(json.get("toDate").is_none());

        let back: MonitorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }
}
