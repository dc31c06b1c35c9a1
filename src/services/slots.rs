use crate::{
    db::DbPool,
    entities::booking,
    entities::slot::{self, Entity as SlotEntity, SlotKind},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Query;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Fields accepted when a teacher publishes a slot.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSlotInput {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub price: Decimal,
    pub reduction: Option<i32>,
    pub kind: SlotKind,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSlotInput {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub price: Option<Decimal>,
    pub reduction: Option<i32>,
    pub kind: Option<SlotKind>,
}

/// Owns slot records: creation, modification, deletion, availability queries.
#[derive(Clone)]
pub struct SlotService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    /// Hide slots overlapping a window the student already holds a live
    /// booking on from availability listings.
    exclude_student_overlap: bool,
}

impl SlotService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        exclude_student_overlap: bool,
    ) -> Self {
        Self {
            db,
            event_sender,
            exclude_student_overlap,
        }
    }

    fn validate_interval(
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if start_at >= end_at {
            return Err(ServiceError::Validation(format!(
                "slot must start before it ends ({} >= {})",
                start_at, end_at
            )));
        }
        Ok(())
    }

    fn validate_price(price: Decimal) -> Result<(), ServiceError> {
        if price.is_sign_negative() {
            return Err(ServiceError::Validation(format!(
                "price must not be negative, got {}",
                price
            )));
        }
        Ok(())
    }

    fn validate_reduction(reduction: Option<i32>) -> Result<(), ServiceError> {
        if let Some(r) = reduction {
            if !(0..=100).contains(&r) {
                return Err(ServiceError::Validation(format!(
                    "reduction must be between 0 and 100, got {}",
                    r
                )));
            }
        }
        Ok(())
    }

    /// Publishes a new bookable slot for `creator_id`.
    #[instrument(skip(self, input), fields(creator_id = %creator_id))]
    pub async fn create_slot(
        &self,
        creator_id: Uuid,
        input: CreateSlotInput,
    ) -> Result<slot::Model, ServiceError> {
        Self::validate_interval(input.start_at, input.end_at)?;
        Self::validate_price(input.price)?;
        Self::validate_reduction(input.reduction)?;

        let slot_id = Uuid::new_v4();
        let active = slot::ActiveModel {
            id: Set(slot_id),
            start_at: Set(input.start_at),
            end_at: Set(input.end_at),
            created_at: Set(Utc::now()),
            created_by_id: Set(creator_id),
            price: Set(input.price),
            reduction: Set(input.reduction),
            kind: Set(input.kind),
        };

        let model = active.insert(&*self.db).await?;

        info!(slot_id = %slot_id, "Slot created");
        self.emit(Event::SlotCreated(slot_id)).await;

        Ok(model)
    }

    /// Looks up a slot by id.
    pub async fn get_slot(&self, slot_id: Uuid) -> Result<slot::Model, ServiceError> {
        SlotEntity::find_by_id(slot_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Slot {} not found", slot_id)))
    }

    /// Applies a partial update to an unbooked, future slot owned by the
    /// requester.
    #[instrument(skip(self, changes), fields(slot_id = %slot_id, requester_id = %requester_id))]
    pub async fn update_slot(
        &self,
        slot_id: Uuid,
        requester_id: Uuid,
        changes: UpdateSlotInput,
    ) -> Result<slot::Model, ServiceError> {
        let existing = self.get_slot(slot_id).await?;

        if existing.created_by_id != requester_id {
            return Err(ServiceError::Forbidden(
                "only the slot's creator may modify it".to_string(),
            ));
        }
        if existing.start_at <= Utc::now() {
            return Err(ServiceError::Conflict(
                "slot has already started and can no longer be modified".to_string(),
            ));
        }
        if self.has_live_booking(slot_id).await? {
            return Err(ServiceError::Conflict(
                "slot has an active booking and cannot be modified".to_string(),
            ));
        }

        let start_at = changes.start_at.unwrap_or(existing.start_at);
        let end_at = changes.end_at.unwrap_or(existing.end_at);
        let price = changes.price.unwrap_or(existing.price);
        let reduction = changes.reduction.or(existing.reduction);
        Self::validate_interval(start_at, end_at)?;
        Self::validate_price(price)?;
        Self::validate_reduction(reduction)?;

        let mut active: slot::ActiveModel = existing.into();
        active.start_at = Set(start_at);
        active.end_at = Set(end_at);
        active.price = Set(price);
        active.reduction = Set(reduction);
        if let Some(kind) = changes.kind {
            active.kind = Set(kind);
        }

        let updated = active.update(&*self.db).await?;

        info!(slot_id = %slot_id, "Slot updated");
        self.emit(Event::SlotUpdated(slot_id)).await;

        Ok(updated)
    }

    /// Deletes an unbooked slot that has not started yet.
    #[instrument(skip(self), fields(slot_id = %slot_id, requester_id = %requester_id))]
    pub async fn delete_slot(&self, slot_id: Uuid, requester_id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_slot(slot_id).await?;

        if existing.created_by_id != requester_id {
            return Err(ServiceError::Forbidden(
                "only the slot's creator may delete it".to_string(),
            ));
        }
        // A booked slot stays, whatever its timing: the booking references it.
        if self.has_live_booking(slot_id).await? {
            return Err(ServiceError::Conflict(
                "slot has an active booking and cannot be deleted".to_string(),
            ));
        }
        if existing.start_at <= Utc::now() {
            return Err(ServiceError::Conflict(
                "slot has already started and can no longer be deleted".to_string(),
            ));
        }

        existing.delete(&*self.db).await?;

        info!(slot_id = %slot_id, "Slot deleted");
        self.emit(Event::SlotDeleted(slot_id)).await;

        Ok(())
    }

    /// Lists bookable slots in `[from, to)`: slots without a live booking,
    /// and (policy permitting) not overlapping a window the student already
    /// holds.
    #[instrument(skip(self))]
    pub async fn list_available_slots(
        &self,
        for_student: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<slot::Model>, ServiceError> {
        let booked = Query::select()
            .column(booking::Column::SlotId)
            .from(booking::Entity)
            .and_where(booking::Column::CancelledAt.is_null())
            .to_owned();

        let slots = SlotEntity::find()
            .filter(slot::Column::StartAt.gte(from))
            .filter(slot::Column::StartAt.lt(to))
            .filter(slot::Column::Id.not_in_subquery(booked))
            .order_by_asc(slot::Column::StartAt)
            .all(&*self.db)
            .await?;

        let Some(student_id) = for_student else {
            return Ok(slots);
        };
        if !self.exclude_student_overlap {
            return Ok(slots);
        }

        let held = self.student_held_windows(student_id).await?;
        Ok(slots
            .into_iter()
            .filter(|s| {
                !held
                    .iter()
                    .any(|(start, end)| s.start_at < *end && s.end_at > *start)
            })
            .collect())
    }

    /// Time windows of the slots a student currently holds a live booking on.
    async fn student_held_windows(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, ServiceError> {
        let held = booking::Entity::find()
            .filter(booking::Column::BookedById.eq(student_id))
            .filter(booking::Column::CancelledAt.is_null())
            .find_also_related(SlotEntity)
            .all(&*self.db)
            .await?;

        Ok(held
            .into_iter()
            .filter_map(|(_, slot)| slot.map(|s| (s.start_at, s.end_at)))
            .collect())
    }

    async fn has_live_booking(&self, slot_id: Uuid) -> Result<bool, ServiceError> {
        let count = booking::Entity::find()
            .filter(booking::Column::SlotId.eq(slot_id))
            .filter(booking::Column::CancelledAt.is_null())
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!("Failed to send slot event: {}", e);
            }
        }
    }
}
