use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What a single sweep run did.
#[derive(Debug, Clone, Copy, Default, Serialize, utoipa::ToSchema)]
pub struct SweepOutcome {
    /// Orders whose deadline had passed when the sweep looked.
    pub examined: usize,
    /// Orders actually moved back to `pending` by this run.
    pub released: usize,
}

/// Finds orders whose checkout window elapsed without payment and releases
/// them back to `pending`.
///
/// Each per-order release is an independent conditional update, so the sweep
/// is idempotent and safe to abort mid-run; an order that got paid between
/// the scan and the update is simply skipped.
#[derive(Clone)]
pub struct ExpirySweeper {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ExpirySweeper {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Sweeps with the wall clock.
    pub async fn run_sweep(&self) -> Result<SweepOutcome, ServiceError> {
        self.run_sweep_at(Utc::now()).await
    }

    /// Sweeps relative to an explicit instant.
    #[instrument(skip(self))]
    pub async fn run_sweep_at(&self, now: DateTime<Utc>) -> Result<SweepOutcome, ServiceError> {
        let expired = OrderEntity::find()
            .filter(order::Column::Status.eq(OrderStatus::WaitingForPayment))
            .filter(order::Column::CheckoutExpiresAt.lt(now))
            .all(&*self.db)
            .await?;

        let mut outcome = SweepOutcome {
            examined: expired.len(),
            ..Default::default()
        };

        for order in expired {
            match self.release(order.id).await {
                Ok(true) => {
                    info!(order_id = %order.id, "Checkout window elapsed, order released");
                    outcome.released += 1;
                    self.emit(Event::CheckoutExpired(order.id)).await;
                }
                Ok(false) => {
                    // Lost the race to a payment confirmation or an earlier
                    // sweep; nothing to do.
                }
                Err(e) => {
                    // One stuck order must not starve the rest of the batch.
                    error!(order_id = %order.id, error = %e, "Failed to release expired order");
                }
            }
        }

        if outcome.released > 0 {
            info!(
                examined = outcome.examined,
                released = outcome.released,
                "Expiry sweep completed"
            );
        }

        Ok(outcome)
    }

    /// `waiting_for_payment -> pending` for one order; bookings stay
    /// attached. Returns whether this call performed the transition.
    async fn release(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Pending))
            .col_expr(
                order::Column::CheckoutSessionId,
                Expr::value(None::<String>),
            )
            .col_expr(
                order::Column::CheckoutExpiresAt,
                Expr::value(None::<DateTime<Utc>>),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::WaitingForPayment))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!("Failed to send expiry event: {}", e);
            }
        }
    }
}

/// Spawns the recurring sweep. Each run is independent; a failing run logs
/// and the loop keeps going.
pub fn start_worker(sweeper: ExpirySweeper, interval: Duration) {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Expiry sweep worker started");
        loop {
            if let Err(e) = sweeper.run_sweep().await {
                error!(error = %e, "Expiry sweep run failed");
            }
            sleep(interval).await;
        }
    });
}
