use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entities::tax_rate, errors::ServiceError, ApiResponse, AppState};

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/expiry/run", post(run_expiry_sweep))
}

pub fn tax_rate_routes() -> Router<AppState> {
    Router::new()
        .route("/", put(set_tax_rate))
        .route("/current", get(get_current_tax_rate))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetTaxRateRequest {
    #[schema(value_type = String, example = "20.0")]
    pub percent: Decimal,
    /// When the rate takes effect; defaults to now
    pub starts_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaxRateResponse {
    pub id: Uuid,
    #[schema(value_type = String)]
    pub percent: Decimal,
    pub starts_at: DateTime<Utc>,
}

impl From<tax_rate::Model> for TaxRateResponse {
    fn from(model: tax_rate::Model) -> Self {
        Self {
            id: model.id,
            percent: model.percent,
            starts_at: model.starts_at,
        }
    }
}

/// Release every order whose checkout window has elapsed.
/// External schedulers hit this; the built-in worker runs the same sweep.
#[utoipa::path(
    post,
    path = "/api/v1/admin/expiry/run",
    responses(
        (status = 200, description = "Sweep finished", body = crate::ApiResponse<crate::services::expiry::SweepOutcome>)
    ),
    tag = "Admin"
)]
async fn run_expiry_sweep(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.services.expiry.run_sweep().await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// Register a new tax rate
#[utoipa::path(
    put,
    path = "/api/v1/tax-rates",
    request_body = SetTaxRateRequest,
    responses(
        (status = 200, description = "Rate registered", body = crate::ApiResponse<TaxRateResponse>),
        (status = 400, description = "Negative percent", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
async fn set_tax_rate(
    State(state): State<AppState>,
    Json(payload): Json<SetTaxRateRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let rate = state
        .services
        .tax_rates
        .set_rate(payload.percent, payload.starts_at.unwrap_or_else(Utc::now))
        .await?;
    Ok(Json(ApiResponse::success(TaxRateResponse::from(rate))))
}

/// The tax rate currently in effect
#[utoipa::path(
    get,
    path = "/api/v1/tax-rates/current",
    responses(
        (status = 200, description = "Current rate, if any", body = crate::ApiResponse<Option<TaxRateResponse>>)
    ),
    tag = "Admin"
)]
async fn get_current_tax_rate(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let rate = state.services.tax_rates.current_rate().await?;
    Ok(Json(ApiResponse::success(rate.map(TaxRateResponse::from))))
}
