use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::slot::{self, SlotKind},
    errors::ServiceError,
    handlers::common::ActorId,
    services::slots::{CreateSlotInput, UpdateSlotInput},
    ApiResponse, AppState,
};

pub fn slot_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_slot).get(list_available_slots))
        .route("/:id", get(get_slot).put(update_slot).delete(delete_slot))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSlotRequest {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[schema(value_type = String, example = "45.00")]
    pub price: Decimal,
    /// Percentage discount, 0-100
    pub reduction: Option<i32>,
    #[schema(value_type = String, example = "remote")]
    pub kind: SlotKind,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSlotRequest {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>)]
    pub price: Option<Decimal>,
    pub reduction: Option<i32>,
    #[schema(value_type = Option<String>)]
    pub kind: Option<SlotKind>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AvailabilityQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// When present, slots colliding with this student's existing bookings
    /// are filtered out as well
    pub for_student: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SlotResponse {
    pub id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by_id: Uuid,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub reduction: Option<i32>,
    #[schema(value_type = String)]
    pub kind: SlotKind,
}

impl From<slot::Model> for SlotResponse {
    fn from(model: slot::Model) -> Self {
        Self {
            id: model.id,
            start_at: model.start_at,
            end_at: model.end_at,
            created_at: model.created_at,
            created_by_id: model.created_by_id,
            price: model.price,
            reduction: model.reduction,
            kind: model.kind,
        }
    }
}

/// Publish a bookable slot
#[utoipa::path(
    post,
    path = "/api/v1/slots",
    request_body = CreateSlotRequest,
    responses(
        (status = 201, description = "Slot created", body = crate::ApiResponse<SlotResponse>),
        (status = 400, description = "Invalid interval or price", body = crate::errors::ErrorResponse)
    ),
    tag = "Slots"
)]
async fn create_slot(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Json(payload): Json<CreateSlotRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let slot = state
        .services
        .slots
        .create_slot(
            actor,
            CreateSlotInput {
                start_at: payload.start_at,
                end_at: payload.end_at,
                price: payload.price,
                reduction: payload.reduction,
                kind: payload.kind,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(SlotResponse::from(slot))),
    ))
}

/// Fetch one slot
#[utoipa::path(
    get,
    path = "/api/v1/slots/{id}",
    responses(
        (status = 200, description = "Slot found", body = crate::ApiResponse<SlotResponse>),
        (status = 404, description = "Unknown slot", body = crate::errors::ErrorResponse)
    ),
    tag = "Slots"
)]
async fn get_slot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let slot = state.services.slots.get_slot(id).await?;
    Ok(Json(ApiResponse::success(SlotResponse::from(slot))))
}

/// Modify an unbooked, future slot
#[utoipa::path(
    put,
    path = "/api/v1/slots/{id}",
    request_body = UpdateSlotRequest,
    responses(
        (status = 200, description = "Slot updated", body = crate::ApiResponse<SlotResponse>),
        (status = 403, description = "Not the creator", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown slot", body = crate::errors::ErrorResponse),
        (status = 409, description = "Booked or already started", body = crate::errors::ErrorResponse)
    ),
    tag = "Slots"
)]
async fn update_slot(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSlotRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let slot = state
        .services
        .slots
        .update_slot(
            id,
            actor,
            UpdateSlotInput {
                start_at: payload.start_at,
                end_at: payload.end_at,
                price: payload.price,
                reduction: payload.reduction,
                kind: payload.kind,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(SlotResponse::from(slot))))
}

/// Delete an unbooked, future slot
#[utoipa::path(
    delete,
    path = "/api/v1/slots/{id}",
    responses(
        (status = 200, description = "Slot deleted"),
        (status = 403, description = "Not the creator", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown slot", body = crate::errors::ErrorResponse),
        (status = 409, description = "Booked or already started", body = crate::errors::ErrorResponse)
    ),
    tag = "Slots"
)]
async fn delete_slot(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.slots.delete_slot(id, actor).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "deleted": id
    }))))
}

/// List bookable slots in a window
#[utoipa::path(
    get,
    path = "/api/v1/slots",
    params(
        ("from" = String, Query, description = "Window start (RFC 3339)"),
        ("to" = String, Query, description = "Window end (RFC 3339)"),
        ("for_student" = Option<Uuid>, Query, description = "Also hide slots colliding with this student's bookings")
    ),
    responses(
        (status = 200, description = "Available slots", body = crate::ApiResponse<Vec<SlotResponse>>)
    ),
    tag = "Slots"
)]
async fn list_available_slots(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let slots = state
        .services
        .slots
        .list_available_slots(query.for_student, query.from, query.to)
        .await?;

    let slots: Vec<SlotResponse> = slots.into_iter().map(SlotResponse::from).collect();
    Ok(Json(ApiResponse::success(slots)))
}
