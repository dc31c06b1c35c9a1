//! The expiry sweep: releasing timed-out checkouts, idempotence, and staying
//! out of the way of completed payments.

mod common;

use chrono::{Duration, Utc};
use common::TestCtx;
use rust_decimal_macros::dec;
use tutorhub_api::{
    entities::order::OrderStatus, services::bookings::BookingMetadata,
};
use uuid::Uuid;

/// Books a slot and opens the payment window; returns (order_id, booking_id).
async fn order_in_checkout(ctx: &TestCtx) -> (Uuid, Uuid) {
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
    (order_id, booking.id)
}

#[tokio::test]
async fn sweep_releases_orders_past_their_deadline() {
    let ctx = TestCtx::new().await;
    let (order_id, booking_id) = order_in_checkout(&ctx).await;

    // Deadline is checkout + 30 minutes; look from beyond it
    let later = Utc::now() + ctx.config.checkout_expiry() + Duration::minutes(1);
    let outcome = ctx.services.expiry.run_sweep_at(later).await.unwrap();

    assert_eq!(outcome.examined, 1);
    assert_eq!(outcome.released, 1);

    let order = ctx.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.checkout_session_id.is_none());
    assert!(order.checkout_expires_at.is_none());

    // Bookings stay attached: the student only lost the payment window
    let booking = ctx.services.bookings.get_booking(booking_id).await.unwrap();
    assert!(booking.cancelled_at.is_none());
    assert_eq!(booking.order_id, Some(order_id));
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let ctx = TestCtx::new().await;
    let (order_id, _) = order_in_checkout(&ctx).await;

    let later = Utc::now() + ctx.config.checkout_expiry() + Duration::minutes(1);
    let first = ctx.services.expiry.run_sweep_at(later).await.unwrap();
    let second = ctx.services.expiry.run_sweep_at(later).await.unwrap();

    assert_eq!(first.released, 1);
    assert_eq!(second.examined, 0);
    assert_eq!(second.released, 0);

    let order = ctx.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn sweep_ignores_orders_still_inside_their_window() {
    let ctx = TestCtx::new().await;
    let (order_id, _) = order_in_checkout(&ctx).await;

    let outcome = ctx.services.expiry.run_sweep().await.unwrap();
    assert_eq!(outcome.examined, 0);
    assert_eq!(outcome.released, 0);

    let order = ctx.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::WaitingForPayment);
}

#[tokio::test]
async fn sweep_never_touches_paid_orders() {
    let ctx = TestCtx::new().await;
    let (order_id, _) = order_in_checkout(&ctx).await;

    ctx.services
        .orders
        .confirm_payment(order_id, "pi_quick", None)
        .await
        .unwrap();

    let later = Utc::now() + ctx.config.checkout_expiry() + Duration::minutes(1);
    let outcome = ctx.services.expiry.run_sweep_at(later).await.unwrap();
    assert_eq!(outcome.released, 0);

    let order = ctx.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn released_order_can_check_out_again() {
    let ctx = TestCtx::new().await;
    let (order_id, _) = order_in_checkout(&ctx).await;

    let later = Utc::now() + ctx.config.checkout_expiry() + Duration::minutes(1);
    ctx.services.expiry.run_sweep_at(later).await.unwrap();

    // Second attempt opens a fresh session with a fresh deadline
    let details = ctx.services.orders.start_checkout(order_id).await.unwrap();
    assert!(details.expires_at > Utc::now());

    let order = ctx.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::WaitingForPayment);
    assert_eq!(
        order.checkout_session_id.as_deref(),
        Some(details.checkout_session_id.as_str())
    );
}
