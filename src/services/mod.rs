pub mod bookings;
pub mod expiry;
pub mod orders;
pub mod pricing;
pub mod slots;
pub mod tax_rates;

use sea_orm::{DbErr, SqlErr};

/// Whether a storage error is the unique-constraint signal the services treat
/// as an expected concurrent conflict rather than a bug.
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
