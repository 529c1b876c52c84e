use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use classbook_core::{BookingDetails, Class};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::{committed, CommittedBody};

#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CancellationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub class_id: Uuid,
    pub status: &'static str,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/classes", get(list_classes))
        .route("/v1/classes/{id}/bookings", post(request_booking))
        .route("/v1/classes/{id}/cancellations", post(request_cancellation))
        .route("/v1/bookings/confirm", post(confirm_booking))
        .route("/v1/cancellations/confirm", post(confirm_cancellation))
        .route(
            "/v1/bookings/{id}",
            get(booking_for_cancellation).delete(cancel_with_token),
        )
}

async fn list_classes(State(state): State<AppState>) -> Result<Json<Vec<Class>>, AppError> {
    let classes = state.engine.schedule.list_upcoming_classes(Utc::now()).await?;
    Ok(Json(classes))
}

async fn request_booking(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<CommittedBody<PendingResponse>>), AppError> {
    let result = state
        .engine
        .pending
        .create_pending_booking(class_id, &req.first_name, &req.last_name, &req.email)
        .await?;

    Ok((StatusCode::ACCEPTED, committed(result.map(awaiting_confirmation))))
}

async fn request_cancellation(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<CancellationRequest>,
) -> Result<(StatusCode, Json<CommittedBody<PendingResponse>>), AppError> {
    let result = state
        .engine
        .pending
        .cancel_pending_booking(class_id, &req.email)
        .await?;

    Ok((StatusCode::ACCEPTED, committed(result.map(awaiting_confirmation))))
}

fn awaiting_confirmation(class_id: Uuid) -> PendingResponse {
    PendingResponse {
        class_id,
        status: "AWAITING_CONFIRMATION",
    }
}

async fn confirm_booking(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<CommittedBody<BookingDetails>>, AppError> {
    let result = state.engine.pending.confirm_booking(&query.token).await?;
    Ok(committed(result))
}

async fn confirm_cancellation(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<CommittedBody<BookingDetails>>, AppError> {
    let result = state.engine.pending.confirm_cancellation(&query.token).await?;
    Ok(committed(result))
}

async fn booking_for_cancellation(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<BookingDetails>, AppError> {
    let details = state
        .engine
        .lifecycle
        .get_booking_for_cancellation(booking_id, &query.token)
        .await?;
    Ok(Json(details))
}

async fn cancel_with_token(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<CommittedBody<BookingDetails>>, AppError> {
    let result = state
        .engine
        .lifecycle
        .cancel_with_booking_token(booking_id, &query.token)
        .await?;
    Ok(committed(result))
}
