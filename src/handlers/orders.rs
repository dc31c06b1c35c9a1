use axum::{
    extract::{Path, Query, State},
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
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    handlers::common::ActorId,
    services::orders::{CheckoutDetails, OrderView},
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/current", get(get_current_order))
        .route("/:id", get(get_order))
        .route("/:id/checkout", post(start_checkout))
        .route("/:id/confirm", post(confirm_payment))
        .route("/:id/fail", post(fail_payment))
        .route("/:id/reset", post(reset_checkout))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub booker_id: Uuid,
    #[schema(value_type = String, example = "pending")]
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub checkout_session_id: Option<String>,
    pub checkout_expires_at: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub payment_intent_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>)]
    pub total_original: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub total_discounted: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub total_reduction: Option<Decimal>,
}

impl From<order::Model> for OrderResponse {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            booker_id: model.booker_id,
            status: model.status,
            created_at: model.created_at,
            updated_at: model.updated_at,
            checkout_session_id: model.checkout_session_id,
            checkout_expires_at: model.checkout_expires_at,
            payment_method: model.payment_method,
            payment_intent_id: model.payment_intent_id,
            paid_at: model.paid_at,
            total_original: model.total_original,
            total_discounted: model.total_discounted,
            total_reduction: model.total_reduction,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderLineResponse {
    pub booking_id: Uuid,
    pub slot_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub reduction: Option<i32>,
    pub subject: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderViewResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub lines: Vec<OrderLineResponse>,
    #[schema(value_type = String)]
    pub original_total: Decimal,
    #[schema(value_type = String)]
    pub discounted_total: Decimal,
    #[schema(value_type = String)]
    pub reduction_total: Decimal,
    #[schema(value_type = String)]
    pub tax_percent: Decimal,
    #[schema(value_type = String)]
    pub total_with_tax: Decimal,
}

impl From<OrderView> for OrderViewResponse {
    fn from(view: OrderView) -> Self {
        let lines = view
            .lines
            .into_iter()
            .map(|line| OrderLineResponse {
                booking_id: line.booking.id,
                slot_id: line.slot.id,
                start_at: line.slot.start_at,
                end_at: line.slot.end_at,
                price: line.slot.price,
                reduction: line.slot.reduction,
                subject: line.booking.subject,
            })
            .collect();

        Self {
            order: OrderResponse::from(view.order),
            lines,
            original_total: view.totals.original,
            discounted_total: view.totals.discounted,
            reduction_total: view.totals.reduction,
            tax_percent: view.tax_percent,
            total_with_tax: view.total_with_tax,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub checkout_session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl From<CheckoutDetails> for CheckoutResponse {
    fn from(details: CheckoutDetails) -> Self {
        Self {
            checkout_session_id: details.checkout_session_id,
            expires_at: details.expires_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: String,
    pub payment_method: Option<String>,
}

// Resolve an order identifier that may be a UUID or an order_number string
async fn resolve_order(state: &AppState, id: &str) -> Result<order::Model, ServiceError> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return state.services.orders.get_order(uuid).await;
    }
    state.services.orders.find_order_by_number(id).await
}

fn ensure_booker(order: &order::Model, actor: Uuid) -> Result<(), ServiceError> {
    if order.booker_id != actor {
        return Err(ServiceError::Forbidden(
            "order belongs to another student".to_string(),
        ));
    }
    Ok(())
}

/// The caller's open order with lines and totals
#[utoipa::path(
    get,
    path = "/api/v1/orders/current",
    responses(
        (status = 200, description = "Current open order", body = crate::ApiResponse<OrderViewResponse>),
        (status = 404, description = "No open order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn get_current_order(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state.services.orders.get_current_order(actor).await?;
    Ok(Json(ApiResponse::success(OrderViewResponse::from(view))))
}

/// One order by id or order number
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    responses(
        (status = 200, description = "Order found", body = crate::ApiResponse<OrderViewResponse>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn get_order(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = resolve_order(&state, &id).await?;
    ensure_booker(&order, actor)?;
    let view = state.services.orders.get_order_view(order.id).await?;
    Ok(Json(ApiResponse::success(OrderViewResponse::from(view))))
}

/// The caller's order history, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses(
        (status = 200, description = "Orders", body = crate::ApiResponse<PaginatedResponse<OrderResponse>>)
    ),
    tag = "Orders"
)]
async fn list_orders(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(actor, query.page, query.limit)
        .await?;

    let items: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    let total_pages = total.div_ceil(query.limit.max(1));

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page: query.page,
        limit: query.limit,
        total_pages,
    })))
}

/// Open the payment window for a pending order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/checkout",
    responses(
        (status = 200, description = "Checkout session opened", body = crate::ApiResponse<CheckoutResponse>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order empty or not pending", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn start_checkout(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    ensure_booker(&order, actor)?;

    let details = state.services.orders.start_checkout(id).await?;
    Ok(Json(ApiResponse::success(CheckoutResponse::from(details))))
}

/// Payment collaborator confirms payment
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirm",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Order paid", body = crate::ApiResponse<OrderResponse>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order not awaiting payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .confirm_payment(id, &payload.payment_intent_id, payload.payment_method)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}

/// Payment collaborator reports a rejected payment
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/fail",
    responses(
        (status = 200, description = "Order marked failed", body = crate::ApiResponse<OrderResponse>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order not awaiting payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn fail_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.fail_payment(id).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}

/// Abandon checkout / reset the order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/reset",
    responses(
        (status = 200, description = "Order reset to pending", body = crate::ApiResponse<OrderResponse>),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order already paid", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn reset_checkout(
    ActorId(actor): ActorId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    ensure_booker(&order, actor)?;

    let order = state.services.orders.reset_checkout(id).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}
