//! HTTP/WebSocket surface.
//!
//! Router layout:
//! - Public: `/`, `/health`, `/ready`, `/metrics`
//! - API: `/api/v1/jobs` (submit + status), `/api/v1/export/{format}`,
//!   `/api/v1/users/{principal}/jobs`, `/api/v1/data/{identifier}`,
//!   `/api/v1/gdpr/{principal}[/export]`, `/api/v1/status/*`
//! - Progress: `/ws/{job_id}`
//!
//! Authentication is handled upstream; the already-verified principal
//! arrives in the `x-principal` header.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::catalogue::CatalogueStore;
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::ocr::OcrProvider;
use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.server.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let max_body = (state.config.limits.max_image_mib as usize + 1) * 1024 * 1024;
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let api = Router::new()
        .route("/api/v1/jobs", post(routes::jobs::submit))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::status))
        .route(
            "/api/v1/users/{principal}/jobs",
            get(routes::jobs::list_for_principal),
        )
        .route("/api/v1/export/{format}", post(routes::export::export_deck))
        .route(
            "/api/v1/data/{identifier}",
            delete(routes::data::delete_identifier),
        )
        .route(
            "/api/v1/gdpr/{principal}/export",
            get(routes::data::export_principal),
        )
        .route(
            "/api/v1/gdpr/{principal}",
            delete(routes::data::erase_principal),
        )
        .route("/api/v1/status/vision", get(routes::health::vision_status))
        .route("/api/v1/status/cache", get(routes::health::cache_stats))
        .route("/api/v1/status/jobs", get(routes::health::job_stats))
        .layer(DefaultBodyLimit::max(max_body));

    Router::new()
        .route("/", get(routes::api_info))
        .route("/health", get(routes::health::health))
        .route("/ready", get(routes::health::ready))
        .route("/metrics", get(routes::health::metrics_endpoint))
        .route("/ws/{job_id}", get(routes::ws::watch_job))
        .merge(api)
        .fallback(routes::not_found)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors)
        .layer(from_fn(middleware::request_id))
        .layer(from_fn(middleware::log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server with explicit catalogue and OCR wiring.
pub async fn start_server_with(
    config: ServiceConfig,
    catalogue: Arc<CatalogueStore>,
    ocr: Arc<dyn OcrProvider>,
) -> Result<()> {
    let state = AppState::build(config, catalogue, ocr).await?;
    let retention_tasks = state.retention.spawn();

    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .map_err(|e| ServiceError::Internal(format!("invalid bind address: {e}")))?;

    tracing::info!(
        %addr,
        rate_limit = state.config.limits.rate_limit_minute,
        vision = state.config.vision.enabled,
        "starting deckscan server"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in retention_tasks {
        task.abort();
    }
    tracing::info!("server shutdown complete");
    Ok(())
}

/// Start the server with the defaults: catalogue opened from configuration
/// and, when no engine is compiled in, the offline scripted OCR provider.
pub async fn start_server(config: ServiceConfig) -> Result<()> {
    let catalogue = open_catalogue(&config)?;
    let ocr: Arc<dyn OcrProvider> = Arc::new(crate::ocr::stub::ScriptedOcr::fixed(
        crate::ocr::RawOcr::default(),
    ));
    tracing::warn!("no OCR engine wired in; submissions will use the offline stub provider");
    start_server_with(config, catalogue, ocr).await
}

fn open_catalogue(config: &ServiceConfig) -> Result<Arc<CatalogueStore>> {
    if let Some(parent) = std::path::Path::new(&config.catalogue.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = CatalogueStore::open(&config.catalogue.db_path)?;

    #[cfg(feature = "online-catalogue")]
    if config.catalogue.online_enabled {
        let remote = crate::catalogue::remote::http::HttpCatalogue::new(
            "https://api.scryfall.com",
            Duration::from_secs(config.catalogue.remote_timeout_secs),
        )?;
        return Ok(Arc::new(store.with_remote(
            Arc::new(remote),
            config.catalogue.remote_min_interval_ms,
        )));
    }

    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

/// Initialize structured JSON logging for the process.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .json()
        .try_init();
}
