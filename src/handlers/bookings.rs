use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::booking, errors::ServiceError, handlers::common::ActorId,
    services::bookings::BookingMetadata, ApiResponse, AppState,
};

pub fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(book_slot))
        .route("/:id", axum::routing::delete(cancel_booking))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BookSlotRequest {
    pub slot_id: Uuid,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub help_kind: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BookingResponse {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub booked_by_id: Uuid,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub help_kind: Option<String>,
}

impl From<booking::Model> for BookingResponse {
    fn from(model: booking::Model) -> Self {
        Self {
            id: model.id,
            slot_id: model.slot_id,
            booked_by_id: model.booked_by_id,
            order_id: model.order_id,
            created_at: model.created_at,
            subject: model.subject,
            description: model.description,
            help_kind: model.help_kind,
        }
    }
}

/// Reserve a slot
#[utoipa::path(
    post,
    path = "/api/v1/bookings",
    request_body = BookSlotRequest,
    responses(
        (status = 201, description = "Slot reserved", body = crate::ApiResponse<BookingResponse>),
        (status = 404, description = "Unknown slot", body = crate::errors::ErrorResponse),
        (status = 409, description = "Slot no longer available", body = crate::errors::ErrorResponse)
    ),
    tag = "Bookings"
)]
async fn book_slot(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Json(payload): Json<BookSlotRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let booking = state
        .services
        .bookings
        .book_slot(
            actor,
            payload.slot_id,
            BookingMetadata {
                subject: payload.subject,
                description: payload.description,
                help_kind: payload.help_kind,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(BookingResponse::from(booking))),
    ))
}

/// Cancel a reservation before payment
#[utoipa::path(
    delete,
    path = "/api/v1/bookings/{id}",
    responses(
        (status = 200, description = "Booking cancelled"),
        (status = 403, description = "Not the booking's student", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown booking", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse)
    ),
    tag = "Bookings"
)]
async fn cancel_booking(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.bookings.cancel_booking(actor, id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "cancelled": id
    }))))
}
