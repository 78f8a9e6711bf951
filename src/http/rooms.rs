use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::model::{Id, Room, RoomDraft};

use super::{ApiError, AppState};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(list).post(create))
        .route("/rooms/:id", get(fetch).put(update).delete(remove))
}

async fn list(State(engine): State<AppState>) -> Json<Vec<Room>> {
    Json(engine.list_rooms().await)
}

async fn fetch(
    State(engine): State<AppState>,
    path: Result<Path<Id>, PathRejection>,
) -> Result<Json<Room>, ApiError> {
    let Path(id) = path?;
    Ok(Json(engine.get_room(id).await?))
}

async fn create(
    State(engine): State<AppState>,
    body: Result<Json<RoomDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(draft) = body?;
    let room = engine.create_room(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "room created", "room": room })),
    ))
}

async fn update(
    State(engine): State<AppState>,
    path: Result<Path<Id>, PathRejection>,
    body: Result<Json<RoomDraft>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = path?;
    let Json(draft) = body?;
    let room = engine.update_room(id, draft).await?;
    Ok(Json(json!({ "message": "room updated", "room": room })))
}

async fn remove(
    State(engine): State<AppState>,
    path: Result<Path<Id>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = path?;
    engine.delete_room(id).await?;
    Ok(Json(json!({ "message": "room deleted" })))
}
