//! Deck export route.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::{Result, ServiceError};
use crate::export::{export, ExportFormat};
use crate::ratelimit::RateLimits;
use crate::resolver::NormalizedDeck;
use crate::server::middleware::client_address;
use crate::server::routes::rate_limit_headers;
use crate::server::state::AppState;

pub async fn export_deck(
    State(state): State<AppState>,
    Path(format): Path<String>,
    headers: HeaderMap,
    Json(deck): Json<NormalizedDeck>,
) -> Result<impl IntoResponse> {
    let format = ExportFormat::parse(&format)?;

    let address = client_address(&headers);
    let limits = RateLimits {
        per_minute: state.config.limits.export_rate_limit_minute,
        burst: state.config.limits.rate_limit_burst,
    };
    let decision = state.export_limiter.check(&address, &limits).await;
    if !decision.allowed {
        metrics::counter!("deckscan_rate_limited_total", "route" => "export").increment(1);
        return Err(ServiceError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let text = export(format, &deck);
    metrics::counter!("deckscan_exports_total", "format" => format.tag()).increment(1);

    let mut response_headers = rate_limit_headers(&decision);
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Ok((response_headers, text))
}
