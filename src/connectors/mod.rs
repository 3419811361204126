//! Connectors module
//!
//! The upstream seam of the mirror pipeline:
//! - The `UpstreamClient` trait the mirror engine consumes
//! - The GitHub REST implementation

pub mod github;
pub mod trait_;

#[cfg(test)]
pub(crate) mod fake;

pub use github::GitHubClient;
pub use trait_::{CommitPage, ListCommitsParams, RateLimitInfo, UpstreamClient};
