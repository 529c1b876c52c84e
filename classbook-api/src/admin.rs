//! Owner endpoints. Access control is left to the deployment in front of
//! the service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use classbook_booking::ClassSchedule;
use classbook_core::{Booking, BookingDetails, Class, NewClass, Pass};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::{committed, CommittedBody};

/// Either an explicit batch or a recurring schedule.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CreateClassesRequest {
    Batch { classes: Vec<NewClass> },
    Schedule(ClassSchedule),
}

#[derive(Debug, Deserialize)]
pub struct IssuePassRequest {
    pub email: String,
    pub total_credits: i32,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/classes", post(create_classes))
        .route("/v1/admin/classes/{id}", delete(delete_class))
        .route("/v1/admin/classes/{id}/bookings", get(list_bookings))
        .route("/v1/admin/bookings/{id}", delete(delete_booking))
        .route("/v1/admin/passes", post(issue_pass).get(active_pass))
        .route("/v1/admin/passes/{id}/activate", post(activate_pass))
        .route("/v1/admin/pending-operations/purge", post(purge_pending))
}

async fn create_classes(
    State(state): State<AppState>,
    Json(req): Json<CreateClassesRequest>,
) -> Result<(StatusCode, Json<Vec<Class>>), AppError> {
    let classes = match req {
        CreateClassesRequest::Batch { classes } => classes,
        CreateClassesRequest::Schedule(schedule) => schedule.expand()?,
    };
    let inserted = state.engine.schedule.schedule_classes(classes).await?;
    Ok((StatusCode::CREATED, Json(inserted)))
}

async fn delete_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.engine.schedule.delete_class(class_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_bookings(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let bookings = state.engine.schedule.list_bookings_for_class(class_id).await?;
    Ok(Json(bookings))
}

async fn delete_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<CommittedBody<BookingDetails>>, AppError> {
    let result = state.engine.lifecycle.delete_booking(booking_id).await?;
    Ok(committed(result))
}

async fn issue_pass(
    State(state): State<AppState>,
    Json(req): Json<IssuePassRequest>,
) -> Result<(StatusCode, Json<Pass>), AppError> {
    let pass = state
        .engine
        .passes
        .issue_pass(&req.email, req.total_credits)
        .await?;
    Ok((StatusCode::CREATED, Json(pass)))
}

async fn active_pass(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<Pass>, AppError> {
    state
        .engine
        .passes
        .active_pass_for(&query.email)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No active pass for this email".to_string()))
}

async fn activate_pass(
    State(state): State<AppState>,
    Path(pass_id): Path<Uuid>,
) -> Result<Json<CommittedBody<Pass>>, AppError> {
    let result = state.engine.passes.activate_pass(pass_id).await?;
    Ok(committed(result))
}

async fn purge_pending(State(state): State<AppState>) -> Result<Json<PurgeResponse>, AppError> {
    let purged = state.engine.pending.purge_expired(Utc::now()).await?;
    Ok(Json(PurgeResponse { purged }))
}
