use super::types::{DelegationView, DelegationsResponse, ErrorResponse};
use crate::metrics;
use crate::models::{year_bounds, Delegation};
use crate::repositories::DelegationStore;
use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

pub const PAGE_LIMIT: i64 = 50;
pub const FIRST_YEAR: i32 = 2018;

pub type ApiState = Arc<dyn DelegationStore>;

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn delegations_response(
    result: Result<Vec<Delegation>, crate::error::StoreError>,
) -> Response {
    match result {
        Ok(delegations) => Json(DelegationsResponse {
            data: delegations.into_iter().map(DelegationView::from).collect(),
        })
        .into_response(),
        Err(e) => {
            error!("Failed to read delegations: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// `GET /delegations`: the most recent delegations, newest block first.
pub async fn get_delegations(State(store): State<ApiState>) -> Response {
    delegations_response(store.get_all(PAGE_LIMIT).await)
}

/// `GET /delegations/:year`: as above, restricted to one UTC calendar year.
pub async fn get_delegations_by_year(
    State(store): State<ApiState>,
    Path(year): Path<String>,
) -> Response {
    let year = match year.parse::<i32>() {
        Ok(year) if year >= FIRST_YEAR => year,
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Year must be a valid integer after 2018",
            )
        }
    };
    if year_bounds(year).is_none() {
        // Beyond the representable date range; nothing can be stored there.
        return delegations_response(Ok(Vec::new()));
    }
    delegations_response(store.get_by_year(year, PAGE_LIMIT).await)
}

/// Logs every request with its latency and records it in the HTTP metrics.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let uri = req.uri().path().to_string();

    let response = next.run(req).await;

    let elapsed = start.elapsed();
    info!("Request {} {} processed in {:?}", method, uri, elapsed);
    metrics::HTTP_REQUESTS
        .with_label_values(&[&method, &path, response.status().as_str()])
        .inc();
    metrics::HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path])
        .observe(elapsed.as_secs_f64());

    response
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics_handler() -> Response {
    match metrics::gather_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
