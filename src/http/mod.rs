//! HTTP surface: JSON over axum, one sub-router per resource, all sharing an
//! `Arc<Engine>`.

mod bookings;
mod drivers;
mod error;
mod rooms;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::Instrument;
use ulid::Ulid;

use crate::engine::Engine;
use crate::limits::MAX_BODY_BYTES;
use crate::observability;

pub type AppState = Arc<Engine>;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .merge(bookings::routes())
        .merge(rooms::routes())
        .merge(drivers::routes())
        .route("/health", get(health))
        .route_layer(middleware::from_fn(track_requests))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(engine)
}

async fn health() -> &'static str {
    "ok"
}

/// Per-request span with a fresh request id, plus RED metrics keyed by the
/// matched route template.
async fn track_requests(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let span = tracing::info_span!(
        "request",
        request_id = %Ulid::new(),
        method = %method,
        path = %req.uri().path(),
    );
    let response = next.run(req).instrument(span.clone()).await;

    let status = response.status().as_u16().to_string();
    let elapsed = started.elapsed().as_secs_f64();
    span.in_scope(|| tracing::debug!(status = %status, elapsed_ms = elapsed * 1000.0, "request done"));
    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(
        observability::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route,
    )
    .record(elapsed);
    response
}
