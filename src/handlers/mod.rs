pub mod admin;
pub mod bookings;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod slots;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub slots: Arc<crate::services::slots::SlotService>,
    pub bookings: Arc<crate::services::bookings::BookingService>,
    pub orders: Arc<crate::services::orders::OrderService>,
    pub expiry: Arc<crate::services::expiry::ExpirySweeper>,
    pub tax_rates: Arc<crate::services::tax_rates::TaxRateService>,
}

impl AppServices {
    /// Wires the service graph: slots stand alone, bookings depend on orders,
    /// orders on pricing and tax rates, the sweeper on the order table.
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let tax_rates = Arc::new(crate::services::tax_rates::TaxRateService::new(db.clone()));

        let slots = Arc::new(crate::services::slots::SlotService::new(
            db.clone(),
            Some(event_sender.clone()),
            config.exclude_student_overlap,
        ));

        let orders = Arc::new(crate::services::orders::OrderService::new(
            db.clone(),
            tax_rates.clone(),
            Some(event_sender.clone()),
            config.checkout_expiry(),
        ));

        let bookings = Arc::new(crate::services::bookings::BookingService::new(
            db.clone(),
            orders.clone(),
            Some(event_sender.clone()),
        ));

        let expiry = Arc::new(crate::services::expiry::ExpirySweeper::new(
            db,
            Some(event_sender),
        ));

        Self {
            slots,
            bookings,
            orders,
            expiry,
            tax_rates,
        }
    }
}
