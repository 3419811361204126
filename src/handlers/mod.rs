//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the commit monitor API.

pub mod commits;
pub mod monitors;
pub mod types;

use crate::handlers::types::HealthResponse;
use crate::models::ServiceInfo;
use axum::response::Json;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe; answers `{ "code": 200 }` while the process runs
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "root"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { code: 200 })
}

#[cfg(test)]
mod tests;
