use crate::{
    db::DbPool,
    entities::tax_rate::{self, Entity as TaxRateEntity},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Timestamped tax rates. Changing the rate inserts a new row; the rate in
/// effect at an instant is the most recently started one at or before it.
#[derive(Clone)]
pub struct TaxRateService {
    db: Arc<DbPool>,
}

impl TaxRateService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Registers a new rate taking effect at `starts_at`.
    #[instrument(skip(self))]
    pub async fn set_rate(
        &self,
        percent: Decimal,
        starts_at: DateTime<Utc>,
    ) -> Result<tax_rate::Model, ServiceError> {
        if percent.is_sign_negative() {
            return Err(ServiceError::Validation(format!(
                "tax percent must not be negative, got {}",
                percent
            )));
        }

        let active = tax_rate::ActiveModel {
            id: Set(Uuid::new_v4()),
            percent: Set(percent),
            starts_at: Set(starts_at),
            created_at: Set(Utc::now()),
        };

        let model = active.insert(&*self.db).await?;
        info!(percent = %percent, starts_at = %starts_at, "Tax rate registered");
        Ok(model)
    }

    /// The rate row in effect at `when`, if any has started by then.
    pub async fn rate_at(
        &self,
        when: DateTime<Utc>,
    ) -> Result<Option<tax_rate::Model>, ServiceError> {
        TaxRateEntity::find()
            .filter(tax_rate::Column::StartsAt.lte(when))
            .order_by_desc(tax_rate::Column::StartsAt)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// The percentage in effect at `when`; zero when no rate has started.
    pub async fn percent_at(&self, when: DateTime<Utc>) -> Result<Decimal, ServiceError> {
        Ok(self
            .rate_at(when)
            .await?
            .map(|r| r.percent)
            .unwrap_or(Decimal::ZERO))
    }

    pub async fn current_rate(&self) -> Result<Option<tax_rate::Model>, ServiceError> {
        self.rate_at(Utc::now()).await
    }
}
