//! The double-booking guard: concurrent reservations of one slot, order
//! attachment rules and cancellation guards.

mod common;

use chrono::{Duration, Utc};
use common::TestCtx;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use tutorhub_api::{
    entities::booking,
    entities::order::OrderStatus,
    errors::ServiceError,
    services::bookings::BookingMetadata,
};
use uuid::Uuid;

#[tokio::test]
async fn concurrent_bookings_of_one_slot_yield_one_winner() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let slot = ctx.seed_slot(teacher, dec!(40.00), None).await;

    let (a, b) = tokio::join!(
        ctx.services
            .bookings
            .book_slot(alice, slot.id, BookingMetadata::default()),
        ctx.services
            .bookings
            .book_slot(bob, slot.id, BookingMetadata::default()),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one reservation must win");

    let loser = if a.is_ok() { b } else { a };
    match loser {
        Err(ServiceError::Conflict(msg)) => assert!(msg.contains("no longer available")),
        other => panic!("loser must observe Conflict, got {:?}", other.map(|b| b.id)),
    }

    let live = booking::Entity::find()
        .filter(booking::Column::SlotId.eq(slot.id))
        .filter(booking::Column::CancelledAt.is_null())
        .count(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(live, 1, "slot ends with exactly one live booking");
}

#[tokio::test]
async fn rebooking_a_taken_slot_conflicts() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let slot = ctx.seed_slot(teacher, dec!(40.00), None).await;

    ctx.services
        .bookings
        .book_slot(Uuid::new_v4(), slot.id, BookingMetadata::default())
        .await
        .expect("first booking succeeds");

    let result = ctx
        .services
        .bookings
        .book_slot(Uuid::new_v4(), slot.id, BookingMetadata::default())
        .await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn bookings_aggregate_into_one_open_order() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let first = ctx.seed_slot(teacher, dec!(40.00), None).await;
    let second = ctx.seed_slot(teacher, dec!(60.00), None).await;

    let b1 = ctx
        .services
        .bookings
        .book_slot(student, first.id, BookingMetadata::default())
        .await
        .unwrap();
    let b2 = ctx
        .services
        .bookings
        .book_slot(student, second.id, BookingMetadata::default())
        .await
        .unwrap();

    assert_eq!(b1.order_id, b2.order_id, "same open order aggregates both");

    let view = ctx
        .services
        .orders
        .get_current_order(student)
        .await
        .unwrap();
    assert_eq!(view.order.status, OrderStatus::Pending);
    assert_eq!(view.lines.len(), 2);
}

#[tokio::test]
async fn booking_a_started_slot_is_rejected() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let slot = ctx
        .seed_slot_at(teacher, dec!(40.00), None, Utc::now() - Duration::hours(1))
        .await;

    let result = ctx
        .services
        .bookings
        .book_slot(Uuid::new_v4(), slot.id, BookingMetadata::default())
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn booking_an_unknown_slot_is_not_found() {
    let ctx = TestCtx::new().await;

    let result = ctx
        .services
        .bookings
        .book_slot(Uuid::new_v4(), Uuid::new_v4(), BookingMetadata::default())
        .await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn bookings_cannot_attach_while_awaiting_payment() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let first = ctx.seed_slot(teacher, dec!(40.00), None).await;
    let second = ctx.seed_slot(teacher, dec!(60.00), None).await;

    let b1 = ctx
        .services
        .bookings
        .book_slot(student, first.id, BookingMetadata::default())
        .await
        .unwrap();
    ctx.services
        .orders
        .start_checkout(b1.order_id.unwrap())
        .await
        .unwrap();

    let result = ctx
        .services
        .bookings
        .book_slot(student, second.id, BookingMetadata::default())
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn only_the_owner_cancels_a_booking() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let slot = ctx.seed_slot(teacher, dec!(40.00), None).await;

    let booking = ctx
        .services
        .bookings
        .book_slot(student, slot.id, BookingMetadata::default())
        .await
        .unwrap();

    let result = ctx
        .services
        .bookings
        .cancel_booking(Uuid::new_v4(), booking.id)
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn cancel_detaches_and_leaves_order_pending() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let slot = ctx.seed_slot(teacher, dec!(40.00), None).await;

    let booking = ctx
        .services
        .bookings
        .book_slot(student, slot.id, BookingMetadata::default())
        .await
        .unwrap();
    let order_id = booking.order_id.unwrap();

    ctx.services
        .bookings
        .cancel_booking(student, booking.id)
        .await
        .unwrap();

    let cancelled = ctx.services.bookings.get_booking(booking.id).await.unwrap();
    assert!(cancelled.cancelled_at.is_some());
    assert!(cancelled.order_id.is_none());

    // Empty order survives in pending, ready for the next booking
    let order = ctx.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    // Double cancellation is a conflict
    let result = ctx
        .services
        .bookings
        .cancel_booking(student, booking.id)
        .await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn paid_orders_freeze_their_bookings() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let slot = ctx.seed_slot(teacher, dec!(40.00), None).await;

    let booking = ctx
        .services
        .bookings
        .book_slot(student, slot.id, BookingMetadata::default())
        .await
        .unwrap();
    let order_id = booking.order_id.unwrap();

    ctx.services.orders.start_checkout(order_id).await.unwrap();
    ctx.services
        .orders
        .confirm_payment(order_id, "pi_test", None)
        .await
        .unwrap();

    let result = ctx
        .services
        .bookings
        .cancel_booking(student, booking.id)
        .await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
}
