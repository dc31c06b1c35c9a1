use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the core services.
///
/// Delivery is fire-and-forget: a failure to hand an event to the
/// notification side never rolls back the state transition that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Slot events
    SlotCreated(Uuid),
    SlotUpdated(Uuid),
    SlotDeleted(Uuid),
    SlotReleased(Uuid),

    // Booking events
    BookingCreated {
        booking_id: Uuid,
        slot_id: Uuid,
        order_id: Uuid,
    },
    BookingCancelled {
        booking_id: Uuid,
        slot_id: Uuid,
    },

    // Order events
    OrderCreated(Uuid),
    CheckoutStarted {
        order_id: Uuid,
        session_id: String,
    },
    CheckoutReset(Uuid),
    CheckoutExpired(Uuid),
    OrderPaid(Uuid),
    OrderPaymentFailed(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Receives domain events and forwards them to whatever carries the actual
/// notification (mail, push, chat). Implementations must be infallible from
/// the core's point of view: errors are reported back only for logging.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &Event) -> Result<(), String>;
}

/// Default sink: structured log lines only. Real deployments plug an
/// outbound dispatcher in here.
pub struct LoggingNotifier;

#[async_trait]
impl NotificationSink for LoggingNotifier {
    async fn notify(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::BookingCreated {
                booking_id,
                slot_id,
                order_id,
            } => {
                info!(
                    "notify: booking {} created for slot {} on order {}",
                    booking_id, slot_id, order_id
                );
            }
            Event::OrderPaid(order_id) => {
                info!("notify: order {} paid", order_id);
            }
            Event::SlotReleased(slot_id) => {
                info!("notify: slot {} released", slot_id);
            }
            other => {
                info!("notify: {:?}", other);
            }
        }
        Ok(())
    }
}

/// Drains the event channel for the lifetime of the process.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, sink: impl NotificationSink) {
    info!("Event processing loop started");

    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.notify(&event).await {
            // Notification delivery is best-effort by contract.
            warn!("Failed to dispatch event {:?}: {}", event, e);
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_drain() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        sender
            .send(Event::OrderPaid(Uuid::new_v4()))
            .await
            .expect("channel open");

        let received = rx.recv().await.expect("event present");
        assert!(matches!(received, Event::OrderPaid(_)));
    }

    #[tokio::test]
    async fn send_on_closed_channel_reports_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender.send(Event::CheckoutReset(Uuid::new_v4())).await;
        assert!(result.is_err());
    }
}
