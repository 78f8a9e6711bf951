use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::model::{Driver, DriverDraft, Id};

use super::{ApiError, AppState};

// Drivers are reference data: register and read only.
pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/drivers", get(list).post(register))
        .route("/drivers/:id", get(fetch))
}

async fn list(State(engine): State<AppState>) -> Json<Vec<Driver>> {
    Json(engine.list_drivers())
}

async fn fetch(
    State(engine): State<AppState>,
    path: Result<Path<Id>, PathRejection>,
) -> Result<Json<Driver>, ApiError> {
    let Path(id) = path?;
    Ok(Json(engine.get_driver(id)?))
}

async fn register(
    State(engine): State<AppState>,
    body: Result<Json<DriverDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(draft) = body?;
    let driver = engine.register_driver(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "driver registered", "driver": driver })),
    ))
}
