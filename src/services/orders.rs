use crate::{
    db::DbPool,
    entities::booking,
    entities::order::{self, Entity as OrderEntity, OrderStatus},
    entities::slot::{self, Entity as SlotEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{self, OrderTotals, PriceLine},
    services::tax_rates::TaxRateService,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// How many times order creation retries when the storage layer rejects a
/// duplicate (open-order or order-number collision under concurrency).
const ORDER_CREATE_ATTEMPTS: usize = 5;

/// What `start_checkout` hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutDetails {
    pub checkout_session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// One line of an order: a live booking together with its slot.
#[derive(Debug, Clone, Serialize)]
pub struct OrderLine {
    pub booking: booking::Model,
    pub slot: slot::Model,
}

/// An order with its lines and the amounts a student sees.
///
/// For open orders the totals are recomputed from the slots on every read;
/// only a paid order carries frozen totals of its own.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order: order::Model,
    pub lines: Vec<OrderLine>,
    pub totals: OrderTotals,
    pub tax_percent: Decimal,
    pub total_with_tax: Decimal,
}

/// Owns the per-student open order, drives the order status state machine and
/// generates order numbers.
///
/// Every transition is a conditional update filtered on the expected current
/// status, so concurrent attempts (payment confirmation racing the expiry
/// sweep, double webhooks) have at-most-once effect.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    tax_rates: Arc<TaxRateService>,
    event_sender: Option<Arc<EventSender>>,
    checkout_expiry: Duration,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        tax_rates: Arc<TaxRateService>,
        event_sender: Option<Arc<EventSender>>,
        checkout_expiry: Duration,
    ) -> Self {
        Self {
            db,
            tax_rates,
            event_sender,
            checkout_expiry,
        }
    }

    /// The student's open (`pending` / `waiting_for_payment`) order, if any.
    pub async fn find_open_order(
        &self,
        booker_id: Uuid,
    ) -> Result<Option<order::Model>, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::BookerId.eq(booker_id))
            .filter(order::Column::Status.is_in([
                OrderStatus::Pending,
                OrderStatus::WaitingForPayment,
            ]))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Returns the student's open order, creating a `pending` one if none
    /// exists. Concurrent creation races are settled by the storage layer's
    /// one-open-order-per-student index; the loser re-reads and returns the
    /// winner's row.
    #[instrument(skip(self), fields(booker_id = %booker_id))]
    pub async fn get_or_create_current_order(
        &self,
        booker_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        for attempt in 0..ORDER_CREATE_ATTEMPTS {
            if let Some(existing) = self.find_open_order(booker_id).await? {
                return Ok(existing);
            }

            let order_number = self.next_order_number(attempt as u64).await?;
            let now = Utc::now();
            let active = order::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_number: Set(order_number.clone()),
                booker_id: Set(booker_id),
                status: Set(OrderStatus::Pending),
                created_at: Set(now),
                updated_at: Set(now),
                checkout_session_id: Set(None),
                checkout_expires_at: Set(None),
                payment_method: Set(None),
                payment_intent_id: Set(None),
                paid_at: Set(None),
                total_original: Set(None),
                total_discounted: Set(None),
                total_reduction: Set(None),
            };

            match active.insert(&*self.db).await {
                Ok(model) => {
                    info!(order_id = %model.id, order_number = %order_number, "Order created");
                    self.emit(Event::OrderCreated(model.id)).await;
                    return Ok(model);
                }
                Err(e) if super::is_unique_violation(&e) => {
                    // Either another request opened the student's order first
                    // or the order number collided; both resolve on retry.
                    info!(booker_id = %booker_id, attempt, "Order creation collided, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Conflict(format!(
            "could not create an order for student {} after {} attempts",
            booker_id, ORDER_CREATE_ATTEMPTS
        )))
    }

    /// `ORD-YYYYMMDD-NNNN`: date-scoped sequence, globally unique through the
    /// order-number index plus retry.
    async fn next_order_number(&self, bump: u64) -> Result<String, ServiceError> {
        let prefix = format!("ORD-{}-", Utc::now().format("%Y%m%d"));
        let existing = OrderEntity::find()
            .filter(order::Column::OrderNumber.starts_with(prefix.as_str()))
            .count(&*self.db)
            .await?;
        Ok(format!("{}{:04}", prefix, existing + 1 + bump))
    }

    /// The student's open order with lines and recomputed totals.
    #[instrument(skip(self), fields(booker_id = %booker_id))]
    pub async fn get_current_order(&self, booker_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = self.find_open_order(booker_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("student {} has no open order", booker_id))
        })?;
        self.build_view(order).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn get_order_view(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = self.get_order(order_id).await?;
        self.build_view(order).await
    }

    pub async fn find_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<order::Model, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", order_number))
            })
    }

    /// Resolves the order a gateway webhook refers to by its checkout
    /// session.
    pub async fn find_order_by_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<order::Model, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::CheckoutSessionId.eq(session_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no order for checkout session {}", session_id))
            })
    }

    /// Lists a student's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        booker_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::BookerId.eq(booker_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// `pending -> waiting_for_payment`: stamps the checkout session and its
    /// deadline.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn start_checkout(&self, order_id: Uuid) -> Result<CheckoutDetails, ServiceError> {
        self.get_order(order_id).await?;

        let live = self.count_live_bookings(order_id).await?;
        if live == 0 {
            return Err(ServiceError::InvalidState(
                "order has no bookings to check out".to_string(),
            ));
        }

        let session_id = format!("cs_{}", Uuid::new_v4().simple());
        let expires_at = Utc::now() + self.checkout_expiry;

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::WaitingForPayment),
            )
            .col_expr(
                order::Column::CheckoutSessionId,
                Expr::value(Some(session_id.clone())),
            )
            .col_expr(
                order::Column::CheckoutExpiresAt,
                Expr::value(Some(expires_at)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(self.transition_error(order_id, "start checkout for").await);
        }

        info!(order_id = %order_id, session_id = %session_id, "Checkout started");
        self.emit(Event::CheckoutStarted {
            order_id,
            session_id: session_id.clone(),
        })
        .await;

        Ok(CheckoutDetails {
            checkout_session_id: session_id,
            expires_at,
        })
    }

    /// `waiting_for_payment -> paid`: snapshots the totals computed from the
    /// slots onto the order, where they stay frozen even if a slot is later
    /// altered.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment_intent_id: &str,
        payment_method: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to start payment transaction");
            ServiceError::DatabaseError(e)
        })?;

        let lines = booking::Entity::find()
            .filter(booking::Column::OrderId.eq(order_id))
            .filter(booking::Column::CancelledAt.is_null())
            .find_also_related(SlotEntity)
            .all(&txn)
            .await?;

        let totals = pricing::order_totals(lines.iter().filter_map(|(_, s)| {
            s.as_ref().map(|s| PriceLine {
                base_price: s.price,
                reduction: s.reduction,
            })
        }))?;

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(
                order::Column::PaymentIntentId,
                Expr::value(Some(payment_intent_id.to_string())),
            )
            .col_expr(order::Column::PaymentMethod, Expr::value(payment_method))
            .col_expr(order::Column::PaidAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::TotalOriginal,
                Expr::value(Some(totals.original)),
            )
            .col_expr(
                order::Column::TotalDiscounted,
                Expr::value(Some(totals.discounted)),
            )
            .col_expr(
                order::Column::TotalReduction,
                Expr::value(Some(totals.reduction)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::WaitingForPayment))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            // Free the connection before the diagnostic read.
            txn.rollback().await.ok();
            return Err(self.transition_error(order_id, "confirm payment for").await);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit payment confirmation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, "Order paid");
        self.emit(Event::OrderPaid(order_id)).await;

        self.get_order(order_id).await
    }

    /// `waiting_for_payment -> failed`: the gateway rejected the payment.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn fail_payment(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Failed))
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

        if result.rows_affected == 0 {
            return Err(self.transition_error(order_id, "fail payment for").await);
        }

        warn!(order_id = %order_id, "Payment failed");
        self.emit(Event::OrderPaymentFailed(order_id)).await;

        self.get_order(order_id).await
    }

    /// Student abandons checkout.
    ///
    /// From `waiting_for_payment` this only clears the checkout session and
    /// keeps the bookings, mirroring the expiry sweep. From `pending` or
    /// `failed` it empties the order: every live booking is detached and its
    /// slot released.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reset_checkout(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let existing = self.get_order(order_id).await?;

        match existing.status {
            OrderStatus::WaitingForPayment => {
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

                if result.rows_affected == 0 {
                    return Err(self.transition_error(order_id, "reset").await);
                }

                info!(order_id = %order_id, "Checkout abandoned, order back to pending");
                self.emit(Event::CheckoutReset(order_id)).await;
            }
            OrderStatus::Pending | OrderStatus::Failed => {
                let txn = self.db.begin().await?;

                let live = booking::Entity::find()
                    .filter(booking::Column::OrderId.eq(order_id))
                    .filter(booking::Column::CancelledAt.is_null())
                    .all(&txn)
                    .await?;

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
                    .col_expr(order::Column::TotalOriginal, Expr::value(None::<Decimal>))
                    .col_expr(order::Column::TotalDiscounted, Expr::value(None::<Decimal>))
                    .col_expr(order::Column::TotalReduction, Expr::value(None::<Decimal>))
                    .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(order::Column::Id.eq(order_id))
                    .filter(order::Column::Status.is_in([
                        OrderStatus::Pending,
                        OrderStatus::Failed,
                    ]))
                    .exec(&txn)
                    .await
                    .map_err(|e| {
                        // A failed order can only reopen while the student has
                        // no other open order.
                        if super::is_unique_violation(&e) {
                            ServiceError::Conflict(format!(
                                "student already has a different open order, cannot reopen {}",
                                order_id
                            ))
                        } else {
                            ServiceError::DatabaseError(e)
                        }
                    })?;

                if result.rows_affected == 0 {
                    txn.rollback().await.ok();
                    return Err(self.transition_error(order_id, "reset").await);
                }

                booking::Entity::update_many()
                    .col_expr(
                        booking::Column::CancelledAt,
                        Expr::value(Some(Utc::now())),
                    )
                    .col_expr(booking::Column::OrderId, Expr::value(None::<Uuid>))
                    .filter(booking::Column::OrderId.eq(order_id))
                    .filter(booking::Column::CancelledAt.is_null())
                    .exec(&txn)
                    .await?;

                txn.commit().await?;

                info!(
                    order_id = %order_id,
                    released = live.len(),
                    "Order reset, bookings released"
                );
                self.emit(Event::CheckoutReset(order_id)).await;
                for b in &live {
                    self.emit(Event::SlotReleased(b.slot_id)).await;
                }
            }
            OrderStatus::Paid => {
                return Err(ServiceError::InvalidState(
                    "order has already been paid".to_string(),
                ));
            }
        }

        self.get_order(order_id).await
    }

    async fn count_live_bookings(&self, order_id: Uuid) -> Result<u64, ServiceError> {
        booking::Entity::find()
            .filter(booking::Column::OrderId.eq(order_id))
            .filter(booking::Column::CancelledAt.is_null())
            .count(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Builds the student-facing view. Paid orders keep their snapshotted
    /// totals; open orders recompute from the slots.
    async fn build_view(&self, order: order::Model) -> Result<OrderView, ServiceError> {
        let rows = booking::Entity::find()
            .filter(booking::Column::OrderId.eq(order.id))
            .filter(booking::Column::CancelledAt.is_null())
            .find_also_related(SlotEntity)
            .all(&*self.db)
            .await?;

        let mut lines = Vec::with_capacity(rows.len());
        for (b, s) in rows {
            let slot_id = b.slot_id;
            let slot = s.ok_or_else(|| {
                ServiceError::InternalError(format!("booking references missing slot {}", slot_id))
            })?;
            lines.push(OrderLine { booking: b, slot });
        }

        let totals = match (
            order.status,
            order.total_original,
            order.total_discounted,
            order.total_reduction,
        ) {
            (OrderStatus::Paid, Some(original), Some(discounted), Some(reduction)) => {
                OrderTotals {
                    original,
                    discounted,
                    reduction,
                }
            }
            _ => pricing::order_totals(lines.iter().map(|l| PriceLine {
                base_price: l.slot.price,
                reduction: l.slot.reduction,
            }))?,
        };

        let tax_at = order.paid_at.unwrap_or_else(Utc::now);
        let tax_percent = self.tax_rates.percent_at(tax_at).await?;
        let total_with_tax = pricing::apply_tax(totals.discounted, tax_percent);

        Ok(OrderView {
            order,
            lines,
            totals,
            tax_percent,
            total_with_tax,
        })
    }

    /// Builds the right error after a conditional transition touched no rows:
    /// either the order is gone or it is in a state the transition is not
    /// legal from.
    async fn transition_error(&self, order_id: Uuid, action: &str) -> ServiceError {
        match OrderEntity::find_by_id(order_id).one(&*self.db).await {
            Ok(Some(order)) => ServiceError::InvalidState(format!(
                "cannot {} order {} in status {:?}",
                action, order_id, order.status
            )),
            Ok(None) => ServiceError::NotFound(format!("Order {} not found", order_id)),
            Err(e) => ServiceError::DatabaseError(e),
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!("Failed to send order event: {}", e);
            }
        }
    }
}
