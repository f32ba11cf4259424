//! Submission and status routes.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::intake;
use crate::jobs::JobState;
use crate::ratelimit::RateLimits;
use crate::server::middleware::client_address;
use crate::server::routes::rate_limit_headers;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub cached: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accept a multipart image upload and start a job, or short-circuit to an
/// existing one on an idempotency hit.
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    intake::screen_headers(headers.keys().map(|k| k.as_str()))?;

    let address = client_address(&headers);
    let limits = RateLimits {
        per_minute: state.config.limits.rate_limit_minute,
        burst: state.config.limits.rate_limit_burst,
    };
    let decision = state.submit_limiter.check(&address, &limits).await;
    if !decision.allowed {
        metrics::counter!("deckscan_rate_limited_total", "route" => "submit").increment(1);
        return Err(ServiceError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let principal = headers
        .get("x-principal")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(format!("malformed multipart body: {e}")))?
    {
        let is_file =
            matches!(field.name(), Some("file") | Some("image")) || field.file_name().is_some();
        if is_file {
            let filename = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ServiceError::BadImage(format!("upload read failed: {e}")))?;
            upload = Some((filename, data));
            break;
        }
    }
    let (filename, data) =
        upload.ok_or_else(|| ServiceError::Validation("missing file field".to_string()))?;

    let sanitized = intake::validate_upload(filename.as_deref(), &data, &state.config.limits)?;
    let outcome = state
        .pipeline
        .submit(sanitized, state.config.pipeline_defaults(), principal)
        .await?;

    metrics::counter!("deckscan_jobs_submitted_total").increment(1);
    if outcome.cached {
        metrics::counter!("deckscan_jobs_cache_hits_total").increment(1);
    }

    Ok((
        rate_limit_headers(&decision),
        Json(SubmitResponse {
            job_id: outcome.job_id,
            cached: outcome.cached,
        }),
    ))
}

pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    if uuid::Uuid::parse_str(&job_id).is_err() {
        return Err(ServiceError::Validation("malformed job id".to_string()));
    }
    let job = state
        .jobs
        .get_job(&job_id)
        .await
        .ok_or(ServiceError::NotFound)?;

    let result = if job.state == JobState::Completed {
        job.result
    } else {
        None
    };
    Ok(Json(StatusResponse {
        state: job.state,
        progress: job.progress,
        result,
        error: job.error,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn list_for_principal(
    State(state): State<AppState>,
    Path(principal): Path<String>,
    Query(page): Query<PageParams>,
) -> Result<Json<serde_json::Value>> {
    let jobs = state
        .jobs
        .jobs_for_principal(&principal, page.limit, page.offset)
        .await;
    Ok(Json(serde_json::json!({
        "principal": principal,
        "jobs": jobs,
    })))
}
