use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::model::{BookingDraft, BookingView, Id};

use super::{ApiError, AppState};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings", get(list).post(create))
        .route(
            "/bookings/:id",
            get(fetch).put(update).patch(update).delete(remove),
        )
}

async fn list(State(engine): State<AppState>) -> Json<Vec<BookingView>> {
    Json(engine.list_bookings().await)
}

async fn fetch(
    State(engine): State<AppState>,
    path: Result<Path<Id>, PathRejection>,
) -> Result<Json<BookingView>, ApiError> {
    let Path(id) = path?;
    Ok(Json(engine.get_booking(id).await?))
}

async fn create(
    State(engine): State<AppState>,
    body: Result<Json<BookingDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(draft) = body?;
    let booking = engine.create_booking(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "booking created", "trainbook": booking })),
    ))
}

async fn update(
    State(engine): State<AppState>,
    path: Result<Path<Id>, PathRejection>,
    body: Result<Json<BookingDraft>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = path?;
    // An unknown booking is a 404 even when the body is also bad.
    engine.get_booking(id).await?;
    let Json(draft) = body?;
    let booking = engine.update_booking(id, draft).await?;
    Ok(Json(json!({ "message": "booking updated", "trainbook": booking })))
}

async fn remove(
    State(engine): State<AppState>,
    path: Result<Path<Id>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = path?;
    engine.delete_booking(id).await?;
    Ok(Json(json!({ "message": "booking deleted" })))
}
