//! End-to-end order lifecycle: lazy creation, totals, the checkout state
//! machine and its illegal transitions.

mod common;

use chrono::Utc;
use common::TestCtx;
use rust_decimal_macros::dec;
use tutorhub_api::{
    entities::order::OrderStatus, errors::ServiceError, services::bookings::BookingMetadata,
};
use uuid::Uuid;

#[tokio::test]
async fn first_booking_opens_a_pending_order_with_discounted_total() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let slot = ctx.seed_slot(teacher, dec!(100.00), Some(10)).await;

    ctx.services
        .bookings
        .book_slot(student, slot.id, BookingMetadata::default())
        .await
        .unwrap();

    let view = ctx
        .services
        .orders
        .get_current_order(student)
        .await
        .unwrap();

    assert_eq!(view.order.status, OrderStatus::Pending);
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.totals.original, dec!(100.00));
    assert_eq!(view.totals.discounted, dec!(90.00));
    assert_eq!(view.totals.reduction, dec!(10.00));
    // Not paid yet: nothing snapshotted
    assert!(view.order.total_discounted.is_none());
}

#[tokio::test]
async fn get_or_create_reuses_the_open_order() {
    let ctx = TestCtx::new().await;
    let student = Uuid::new_v4();

    let first = ctx
        .services
        .orders
        .get_or_create_current_order(student)
        .await
        .unwrap();
    let second = ctx
        .services
        .orders
        .get_or_create_current_order(student)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert!(first.order_number.starts_with("ORD-"));
}

#[tokio::test]
async fn order_numbers_are_distinct_across_students() {
    let ctx = TestCtx::new().await;

    let a = ctx
        .services
        .orders
        .get_or_create_current_order(Uuid::new_v4())
        .await
        .unwrap();
    let b = ctx
        .services
        .orders
        .get_or_create_current_order(Uuid::new_v4())
        .await
        .unwrap();

    assert_ne!(a.order_number, b.order_number);
}

#[tokio::test]
async fn paying_a_two_booking_order_snapshots_totals() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let cheap = ctx.seed_slot(teacher, dec!(50.00), None).await;
    let dear = ctx.seed_slot(teacher, dec!(80.00), None).await;

    ctx.services
        .bookings
        .book_slot(student, cheap.id, BookingMetadata::default())
        .await
        .unwrap();
    let booking = ctx
        .services
        .bookings
        .book_slot(student, dear.id, BookingMetadata::default())
        .await
        .unwrap();
    let order_id = booking.order_id.unwrap();

    let details = ctx.services.orders.start_checkout(order_id).await.unwrap();
    assert!(details.expires_at > Utc::now());
    assert!(details.checkout_session_id.starts_with("cs_"));

    let paid = ctx
        .services
        .orders
        .confirm_payment(order_id, "pi_12345", Some("card".into()))
        .await
        .unwrap();

    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.total_original, Some(dec!(130.00)));
    assert_eq!(paid.total_discounted, Some(dec!(130.00)));
    assert_eq!(paid.total_reduction, Some(dec!(0.00)));
    assert_eq!(paid.payment_intent_id.as_deref(), Some("pi_12345"));
    assert!(paid.paid_at.is_some());

    // The student no longer has an open order
    let result = ctx.services.orders.get_current_order(student).await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn totals_obey_the_reduction_identity_at_payment() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();

    for (price, reduction) in [(dec!(100.00), Some(10)), (dec!(45.00), Some(33))] {
        let slot = ctx.seed_slot(teacher, price, reduction).await;
        ctx.services
            .bookings
            .book_slot(student, slot.id, BookingMetadata::default())
            .await
            .unwrap();
    }

    let order = ctx
        .services
        .orders
        .get_or_create_current_order(student)
        .await
        .unwrap();
    ctx.services.orders.start_checkout(order.id).await.unwrap();
    let paid = ctx
        .services
        .orders
        .confirm_payment(order.id, "pi_ident", None)
        .await
        .unwrap();

    let original = paid.total_original.unwrap();
    let discounted = paid.total_discounted.unwrap();
    let reduction = paid.total_reduction.unwrap();
    assert!(discounted <= original);
    assert_eq!(reduction, original - discounted);
}

#[tokio::test]
async fn unlisted_transitions_fail_with_invalid_state() {
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

    // Confirming or failing payment on a pending order is illegal
    let result = ctx
        .services
        .orders
        .confirm_payment(order_id, "pi_early", None)
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    let result = ctx.services.orders.fail_payment(order_id).await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));

    // Checkout twice is illegal
    ctx.services.orders.start_checkout(order_id).await.unwrap();
    let result = ctx.services.orders.start_checkout(order_id).await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));

    // Once paid the order is terminal
    ctx.services
        .orders
        .confirm_payment(order_id, "pi_done", None)
        .await
        .unwrap();
    let result = ctx.services.orders.reset_checkout(order_id).await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    let result = ctx
        .services
        .orders
        .confirm_payment(order_id, "pi_again", None)
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn checkout_requires_a_booking() {
    let ctx = TestCtx::new().await;
    let student = Uuid::new_v4();

    let order = ctx
        .services
        .orders
        .get_or_create_current_order(student)
        .await
        .unwrap();

    let result = ctx.services.orders.start_checkout(order.id).await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn checkout_on_unknown_order_is_not_found() {
    let ctx = TestCtx::new().await;

    let result = ctx.services.orders.start_checkout(Uuid::new_v4()).await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn failed_payment_clears_checkout_and_allows_reset() {
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
    let failed = ctx.services.orders.fail_payment(order_id).await.unwrap();
    assert_eq!(failed.status, OrderStatus::Failed);
    assert!(failed.checkout_session_id.is_none());
    assert!(failed.checkout_expires_at.is_none());

    // Reset from failed releases the bookings and reopens the order
    let reset = ctx.services.orders.reset_checkout(order_id).await.unwrap();
    assert_eq!(reset.status, OrderStatus::Pending);

    let freed = ctx.services.bookings.get_booking(booking.id).await.unwrap();
    assert!(freed.cancelled_at.is_some());
    assert!(freed.order_id.is_none());
}

#[tokio::test]
async fn abandoning_checkout_keeps_the_bookings() {
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
    let reset = ctx.services.orders.reset_checkout(order_id).await.unwrap();

    assert_eq!(reset.status, OrderStatus::Pending);
    assert!(reset.checkout_session_id.is_none());

    // The booking survived the abandoned checkout
    let kept = ctx.services.bookings.get_booking(booking.id).await.unwrap();
    assert!(kept.cancelled_at.is_none());
    assert_eq!(kept.order_id, Some(order_id));
}

#[tokio::test]
async fn reset_of_a_pending_order_empties_it() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let a = ctx.seed_slot(teacher, dec!(40.00), None).await;
    let b = ctx.seed_slot(teacher, dec!(60.00), None).await;

    ctx.services
        .bookings
        .book_slot(student, a.id, BookingMetadata::default())
        .await
        .unwrap();
    let booking = ctx
        .services
        .bookings
        .book_slot(student, b.id, BookingMetadata::default())
        .await
        .unwrap();
    let order_id = booking.order_id.unwrap();

    ctx.services.orders.reset_checkout(order_id).await.unwrap();

    let view = ctx
        .services
        .orders
        .get_current_order(student)
        .await
        .unwrap();
    assert_eq!(view.order.id, order_id);
    assert!(view.lines.is_empty());
    assert_eq!(view.totals.discounted, dec!(0.00));

    // Both slots are bookable again
    let listed = ctx
        .services
        .slots
        .list_available_slots(None, Utc::now(), Utc::now() + chrono::Duration::days(7))
        .await
        .unwrap();
    let ids: Vec<_> = listed.iter().map(|s| s.id).collect();
    assert!(ids.contains(&a.id));
    assert!(ids.contains(&b.id));
}

#[tokio::test]
async fn tax_rate_in_effect_applies_to_the_order_view() {
    let ctx = TestCtx::new().await;
    let teacher = Uuid::new_v4();
    let student = Uuid::new_v4();
    let slot = ctx.seed_slot(teacher, dec!(100.00), None).await;

    ctx.services
        .tax_rates
        .set_rate(dec!(20), Utc::now() - chrono::Duration::days(1))
        .await
        .unwrap();
    // A newer rate takes precedence only once it starts
    ctx.services
        .tax_rates
        .set_rate(dec!(25), Utc::now() + chrono::Duration::days(30))
        .await
        .unwrap();

    ctx.services
        .bookings
        .book_slot(student, slot.id, BookingMetadata::default())
        .await
        .unwrap();

    let view = ctx
        .services
        .orders
        .get_current_order(student)
        .await
        .unwrap();
    assert_eq!(view.tax_percent, dec!(20));
    assert_eq!(view.total_with_tax, dec!(120.00));
}

#[tokio::test]
async fn orders_are_never_deleted_only_transitioned() {
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
        .confirm_payment(order_id, "pi_hist", None)
        .await
        .unwrap();

    // Paid order remains fetchable by id and number for the audit trail
    let paid = ctx.services.orders.get_order(order_id).await.unwrap();
    let by_number = ctx
        .services
        .orders
        .find_order_by_number(&paid.order_number)
        .await
        .unwrap();
    assert_eq!(by_number.id, order_id);

    let (orders, total) = ctx.services.orders.list_orders(student, 1, 20).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders[0].status, OrderStatus::Paid);
}
