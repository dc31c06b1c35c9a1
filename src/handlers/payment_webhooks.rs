use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entities::order, errors::ServiceError, AppState};

/// What the payment gateway posts back. Orders are addressed either directly
/// or through the checkout session the gateway was handed at checkout time.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentWebhookPayload {
    pub order_id: Option<Uuid>,
    pub checkout_session_id: Option<String>,
    /// "succeeded" or "failed"
    pub outcome: String,
    pub payment_intent_id: Option<String>,
    pub payment_method: Option<String>,
}

async fn resolve_order(
    state: &AppState,
    payload: &PaymentWebhookPayload,
) -> Result<order::Model, ServiceError> {
    if let Some(order_id) = payload.order_id {
        return state.services.orders.get_order(order_id).await;
    }
    if let Some(session_id) = &payload.checkout_session_id {
        return state
            .services
            .orders
            .find_order_by_checkout_session(session_id)
            .await;
    }
    Err(ServiceError::Validation(
        "webhook payload carries neither order_id nor checkout_session_id".to_string(),
    ))
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = PaymentWebhookPayload,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order or session", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order not awaiting payment", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhookPayload>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = resolve_order(&state, &payload).await?;

    match payload.outcome.as_str() {
        "succeeded" => {
            let intent = payload.payment_intent_id.as_deref().ok_or_else(|| {
                ServiceError::Validation(
                    "successful payment webhook requires payment_intent_id".to_string(),
                )
            })?;
            state
                .services
                .orders
                .confirm_payment(order.id, intent, payload.payment_method)
                .await?;
            info!(order_id = %order.id, "Payment webhook confirmed order");
        }
        "failed" => {
            state.services.orders.fail_payment(order.id).await?;
            warn!(order_id = %order.id, "Payment webhook reported failure");
        }
        other => {
            return Err(ServiceError::Validation(format!(
                "unknown payment outcome: {}",
                other
            )));
        }
    }

    Ok((StatusCode::OK, "ok"))
}
