//! Retention and data-subject routes.

use axum::extract::{Path, State};
use axum::Json;

use crate::error::Result;
use crate::retention::{DeletionReport, PrincipalExport};
use crate::server::state::AppState;

/// Delete by job id (UUID) or fingerprint (64-hex digest).
pub async fn delete_identifier(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<DeletionReport>> {
    let report = state.retention.delete_identifier(&identifier).await?;
    Ok(Json(report))
}

pub async fn export_principal(
    State(state): State<AppState>,
    Path(principal): Path<String>,
) -> Json<PrincipalExport> {
    Json(state.retention.export_principal(&principal).await)
}

pub async fn erase_principal(
    State(state): State<AppState>,
    Path(principal): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.retention.erase_principal(&principal).await;
    Json(serde_json::json!({
        "principal": principal,
        "removed_keys": removed,
    }))
}
