//! # Server Configuration
//!
//! This module contains the server setup and configuration for the commit monitor API.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::query::QueryService;
use crate::scheduler::MonitorScheduler;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub scheduler: Arc<MonitorScheduler>,
    pub query: Arc<QueryService>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/monitors",
            get(handlers::monitors::list_monitors).post(handlers::monitors::start_monitoring),
        )
        .route(
            "/monitors/{owner}/{repo}",
            delete(handlers::monitors::stop_monitoring),
        )
        .route(
            "/repos/{owner}/{repo}/commits",
            get(handlers::commits::list_commits),
        )
        .route(
            "/repos/{owner}/{repo}/commits/{sha}",
            get(handlers::commits::get_commit),
        )
        .route(
            "/repos/{owner}/{repo}/authors/top",
            get(handlers::commits::top_authors),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(telemetry::propagate_trace_id))
}

/// Serves `state` until `shutdown` resolves, then drains in-flight requests.
pub async fn run_server<F>(config: &AppConfig, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_app(state);
    let addr = config.bind_addr();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::monitors::start_monitoring,
        crate::handlers::monitors::stop_monitoring,
        crate::handlers::monitors::list_monitors,
        crate::handlers::commits::list_commits,
        crate::handlers::commits::get_commit,
        crate::handlers::commits::top_authors,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::RepoKey,
            crate::models::Commit,
            crate::models::AuthorAggregate,
            crate::registry::JobSnapshot,
            crate::registry::JobState,
            crate::handlers::types::StartMonitoringRequest,
            crate::handlers::types::Empty,
            crate::handlers::types::HealthResponse,
            crate::handlers::types::CommitListResponse,
            crate::handlers::types::AuthorListResponse,
            crate::handlers::types::MonitorListResponse,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "monitors", description = "Repository monitoring lifecycle"),
        (name = "commits", description = "Mirrored commit queries")
    ),
    info(
        title = "GitBeam Commit Monitor API",
        description = "Mirrors upstream repository commits and serves queries over them",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
