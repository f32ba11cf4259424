//! Health, readiness, metrics, and introspection routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::server::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_seconds(),
    }))
}

/// Ready when the catalogue snapshot is loaded and the cache answers.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let cards = state.catalogue.card_count().unwrap_or(0);

    let probe_key = "metric:readiness_probe";
    state.cache.set(probe_key, b"ok".to_vec(), None).await;
    let cache_ok = state.cache.exists(probe_key).await;

    if cards > 0 && cache_ok {
        (
            StatusCode::OK,
            Json(json!({"ready": true, "catalogue_cards": cards})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ready": false,
                "catalogue_cards": cards,
                "cache_ok": cache_ok,
            })),
        )
    }
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder unavailable\n".to_string(),
        ),
    }
}

pub async fn vision_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.gate.status()).unwrap_or_default())
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.cache.stats();
    let layers: serde_json::Map<String, serde_json::Value> = stats
        .layers
        .iter()
        .map(|(layer, s)| {
            (
                layer.clone(),
                json!({
                    "hits": s.hits,
                    "misses": s.misses,
                    "hit_rate": s.hit_rate(),
                }),
            )
        })
        .collect();
    Json(json!({
        "backend": stats.backend,
        "layers": layers,
    }))
}

pub async fn job_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.jobs.stats().await;
    Json(json!({
        "jobs": stats,
        "watchers": state.progress.connection_count(),
    }))
}
