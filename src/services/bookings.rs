use crate::{
    db::DbPool,
    entities::booking::{self, Entity as BookingEntity},
    entities::order::{self, OrderStatus},
    entities::slot::Entity as SlotEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::OrderService,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Free-form details a student attaches when reserving a slot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingMetadata {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub help_kind: Option<String>,
}

/// Creates and cancels the binding of one student to one slot.
///
/// The one-live-booking-per-slot invariant is not checked here; the storage
/// layer's unique index is the arbiter, and a violated insert is surfaced as
/// `Conflict`.
#[derive(Clone)]
pub struct BookingService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    event_sender: Option<Arc<EventSender>>,
}

impl BookingService {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            orders,
            event_sender,
        }
    }

    /// Reserves a slot for a student, attaching the booking to the student's
    /// current open order (created on demand).
    ///
    /// Two racing reservations of the same slot both reach the insert; the
    /// unique index lets exactly one through and the loser gets `Conflict`.
    #[instrument(skip(self, metadata), fields(student_id = %student_id, slot_id = %slot_id))]
    pub async fn book_slot(
        &self,
        student_id: Uuid,
        slot_id: Uuid,
        metadata: BookingMetadata,
    ) -> Result<booking::Model, ServiceError> {
        let order = self.orders.get_or_create_current_order(student_id).await?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for booking");
            ServiceError::DatabaseError(e)
        })?;

        let slot = SlotEntity::find_by_id(slot_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Slot {} not found", slot_id)))?;

        if slot.start_at <= Utc::now() {
            return Err(ServiceError::Validation(
                "slot has already started".to_string(),
            ));
        }

        // The order could have moved to checkout since it was fetched;
        // bookings only attach while it is still pending.
        let order = order::Entity::find_by_id(order.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "bookings can only be added to a pending order, order {} is {:?}",
                order.id, order.status
            )));
        }

        let booking_id = Uuid::new_v4();
        let active = booking::ActiveModel {
            id: Set(booking_id),
            slot_id: Set(slot_id),
            booked_by_id: Set(student_id),
            created_at: Set(Utc::now()),
            subject: Set(metadata.subject),
            description: Set(metadata.description),
            help_kind: Set(metadata.help_kind),
            order_id: Set(Some(order.id)),
            cancelled_at: Set(None),
        };

        let model = match active.insert(&txn).await {
            Ok(model) => model,
            Err(e) if super::is_unique_violation(&e) => {
                info!(slot_id = %slot_id, "Concurrent reservation lost the race");
                return Err(ServiceError::Conflict("slot no longer available".into()));
            }
            Err(e) => return Err(e.into()),
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, booking_id = %booking_id, "Failed to commit booking");
            ServiceError::DatabaseError(e)
        })?;

        info!(booking_id = %booking_id, order_id = %order.id, "Slot booked");
        self.emit(Event::BookingCreated {
            booking_id,
            slot_id,
            order_id: order.id,
        })
        .await;

        Ok(model)
    }

    /// Cancels a booking the student owns, detaching it from its order.
    /// Paid orders are frozen; their bookings can no longer be cancelled.
    #[instrument(skip(self), fields(student_id = %student_id, booking_id = %booking_id))]
    pub async fn cancel_booking(
        &self,
        student_id: Uuid,
        booking_id: Uuid,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let existing = BookingEntity::find_by_id(booking_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Booking {} not found", booking_id)))?;

        if existing.booked_by_id != student_id {
            return Err(ServiceError::Forbidden(
                "only the booking's student may cancel it".to_string(),
            ));
        }
        if !existing.is_live() {
            return Err(ServiceError::Conflict(
                "booking is already cancelled".to_string(),
            ));
        }

        if let Some(order_id) = existing.order_id {
            let order = order::Entity::find_by_id(order_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
            if order.status == OrderStatus::Paid {
                return Err(ServiceError::Conflict(
                    "order has already been paid".to_string(),
                ));
            }
        }

        let slot_id = existing.slot_id;
        let mut active: booking::ActiveModel = existing.into();
        active.cancelled_at = Set(Some(Utc::now()));
        active.order_id = Set(None);
        active.update(&txn).await?;

        txn.commit().await?;

        info!(booking_id = %booking_id, slot_id = %slot_id, "Booking cancelled");
        self.emit(Event::BookingCancelled {
            booking_id,
            slot_id,
        })
        .await;
        self.emit(Event::SlotReleased(slot_id)).await;

        Ok(())
    }

    /// Looks up a booking by id.
    pub async fn get_booking(&self, booking_id: Uuid) -> Result<booking::Model, ServiceError> {
        BookingEntity::find_by_id(booking_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Booking {} not found", booking_id)))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!("Failed to send booking event: {}", e);
            }
        }
    }
}
